use std::path::Path;

use shelf_engine::{
    DeviceInfo, FetchOptions, MobileChoice, PollState, ProductRecord, SyncConfig, SyncService,
    create_client,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::ChoiceArg;
use crate::error::{AppError, Result};
use crate::host::TerminalHost;

pub struct CommandExecutor {
    config: SyncConfig,
    service: SyncService,
}

impl CommandExecutor {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let service = SyncService::http(config.clone())?;
        Ok(Self { config, service })
    }

    pub async fn fetch(&self, id: &str, reviews: bool, skip_cache: bool, json: bool) -> Result<()> {
        let options = FetchOptions::new()
            .with_reviews(reviews)
            .skip_cache(skip_cache);
        let record = self.service.fetch_record(id, options).await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&record)?);
        } else {
            print!("{}", render(&record));
        }
        Ok(())
    }

    /// Print merged updates until Ctrl-C, `ticks` updates, or the poller gives up.
    pub async fn watch(&self, id: &str, ticks: Option<usize>) -> Result<()> {
        let initial = self
            .service
            .fetch_record(id, FetchOptions::new().with_reviews(true))
            .await?;
        print!("{}", render(&initial));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.service.subscribe_to_reconciliation(id, move |record| {
            let _ = tx.send(record.clone());
        });
        let mut state = subscription.handle().watch_state();

        info!(
            "Watching {id} every {}s, press Ctrl-C to stop",
            self.config.poll_interval.as_secs()
        );

        let mut seen = 0usize;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    break;
                }
                stopped = state.wait_for(PollState::is_stopped) => {
                    let reason = stopped.map(|s| s.to_string()).unwrap_or_default();
                    warn!("Polling ended: {reason}");
                    break;
                }
                Some(record) = rx.recv() => {
                    seen += 1;
                    println!("--- update {seen} ---");
                    print!("{}", render(&record));
                    if ticks.is_some_and(|limit| seen >= limit) {
                        break;
                    }
                }
            }
        }

        subscription.unsubscribe();
        debug!(updates = seen, "Watch finished");
        Ok(())
    }

    pub async fn download(
        &self,
        id: &str,
        output_dir: &Path,
        mobile: bool,
        choice: ChoiceArg,
    ) -> Result<()> {
        let device = if mobile {
            DeviceInfo::mobile()
        } else {
            DeviceInfo::desktop()
        };
        let choice = match choice {
            ChoiceArg::Open => MobileChoice::OpenInBrowser,
            ChoiceArg::Download => MobileChoice::Download,
            ChoiceArg::Cancel => MobileChoice::Dismissed,
        };

        // The title feeds the generated filename
        if let Err(e) = self.service.fetch_record(id, FetchOptions::new()).await {
            debug!(error = %e, "Record not loaded before download");
        }

        let client = create_client(&self.config)?;
        let host = TerminalHost::new(client, output_dir, device, choice);
        let report = self.service.download(id, &host).await;

        if report.outcome.is_success() {
            Ok(())
        } else {
            Err(AppError::Download(report.outcome.to_string()))
        }
    }
}

fn render(record: &ProductRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} ({})\n", record.title, record.id));
    out.push_str(&format!("  by {}\n", record.creator.name));

    if record.is_free() {
        out.push_str("  price: free\n");
    } else {
        out.push_str(&format!(
            "  price: {:.2} {}\n",
            record.price.amount, record.price.currency
        ));
    }

    if let Some(average) = record.rating.average {
        out.push_str(&format!(
            "  rating: {average:.1} ({} ratings)\n",
            record.rating.count.unwrap_or_default()
        ));
    }
    out.push_str(&format!(
        "  likes: {}  downloads: {}  reviews: {}\n",
        count(record.likes_count),
        count(record.download_count),
        count(record.review_count)
    ));

    for review in &record.reviews {
        let author = review.user_name.as_deref().unwrap_or("anonymous");
        match review.rating {
            Some(rating) => out.push_str(&format!("    [{rating:.0}] {author}: {}\n", review.comment)),
            None => out.push_str(&format!("    {author}: {}\n", review.comment)),
        }
    }
    out
}

fn count(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
