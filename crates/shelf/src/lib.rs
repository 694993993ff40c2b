//! # Shelf Engine
//!
//! Client-side data synchronization and resilient downloads for the shelf marketplace.
//! Fetches product records through a coalescing TTL cache, keeps displayed records
//! fresh with a background reconciliation poller, and delivers files through an
//! ordered chain of download strategies.
//!
//! ## Features
//!
//! - Request coalescing: concurrent fetches of one record share a single round trip
//! - TTL cache with stale reads as an offline fallback
//! - Field-level merge that never erases data a partial response omitted
//! - Cancellable, pausable polling with a consecutive-failure cut-off
//! - Download resolution across proxy, direct fetch, new tab and clipboard strategies
//!
//! ## Example
//!
//! ```no_run
//! use shelf_engine::{FetchOptions, SyncConfig, SyncService};
//!
//! # async fn run() -> Result<(), shelf_engine::SyncError> {
//! let config = SyncConfig::builder()
//!     .with_api_base_url("https://shop.example.com/api")
//!     .build()?;
//! let service = SyncService::http(config)?;
//!
//! let record = service
//!     .fetch_record("agent-1", FetchOptions::new().with_reviews(true))
//!     .await?;
//! println!("{} has {:?} likes", record.title, record.likes_count);
//!
//! let _subscription = service.subscribe_to_reconciliation("agent-1", |record| {
//!     println!("updated: {:?} likes", record.likes_count);
//! });
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod builder;
pub mod cache;
pub mod client;
pub mod coalesce;
pub mod config;
pub mod download;
pub mod error;
pub mod fetcher;
pub mod poller;
pub mod record;
pub mod service;
pub mod store;
pub mod test_utils;

pub use builder::SyncConfigBuilder;
pub use config::SyncConfig;
pub use error::SyncError;

// Re-export the moving parts a front end wires together
pub use backend::{DownloadBackend, HttpBackend, RecordQuery, RecordSource, SignedDownload};
pub use cache::TtlCache;
pub use client::create_client;
pub use coalesce::RequestCoalescer;
pub use fetcher::{FetchOptions, RecordFetcher};
pub use poller::{PollHandle, PollState, ReconciliationPoller, StopReason, Visibility};
pub use service::{Subscription, SyncService};
pub use store::RecordStore;

// Re-export record types
pub use record::{MergeOutcome, ProductRecord, Review, merge_record, normalize_record};

// Re-export download types
pub use download::{
    DeviceClass, DeviceInfo, DownloadHost, DownloadOutcome, DownloadReport, DownloadResolver,
    DownloadTarget, FailureReason, MobileChoice, StrategyKind, UrlKind,
};
