use std::path::Path;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;
mod error;
mod host;

use crate::cli::{Args, Commands, ConfigAction};
use crate::commands::CommandExecutor;
use crate::error::{AppError, Result};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = ?e, "Application failed");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet, args.log_file.as_deref())?;

    info!("==================================================================");
    info!("Shelf - marketplace record sync and downloads");
    info!("==================================================================");

    let file_config = config::load(args.config.as_deref())?;
    let mut config = config::apply_overrides(file_config, &args)?;

    match args.command {
        Commands::Fetch {
            id,
            reviews,
            skip_cache,
            json,
        } => {
            CommandExecutor::new(config)?
                .fetch(&id, reviews, skip_cache, json)
                .await?;
        }

        Commands::Watch {
            id,
            interval,
            ticks,
        } => {
            if let Some(secs) = interval {
                if secs == 0 {
                    return Err(AppError::InvalidInput(
                        "--interval must be at least 1 second".to_string(),
                    ));
                }
                config.poll_interval = Duration::from_secs(secs);
            }
            CommandExecutor::new(config)?.watch(&id, ticks).await?;
        }

        Commands::Download {
            id,
            output_dir,
            mobile,
            choice,
            no_proxy_download,
        } => {
            if no_proxy_download {
                config.proxy_download_enabled = false;
            }
            CommandExecutor::new(config)?
                .download(&id, &output_dir, mobile, choice)
                .await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => println!("{}", config::show(&config)?),
            ConfigAction::Init { path } => {
                let path = path.unwrap_or_else(|| config::DEFAULT_CONFIG_FILE.into());
                config::save(&config, &path)?;
                println!("Configuration written to {}", path.display());
            }
        },
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let writer = MakeWriterExt::and(std::io::stderr, file);
            registry
                .with(fmt::layer().with_target(verbose).with_writer(writer).with_ansi(false))
                .try_init()
        }
        None => registry
            .with(
                fmt::layer()
                    .with_target(verbose)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .try_init(),
    }
    .map_err(|e| AppError::Initialization(e.to_string()))
}
