//! # Quest Sync
//!
//! A scheduled synchronization job that fetches external web documents,
//! extracts structured records via configurable selector rules, and mirrors
//! them into an object store under deterministic keys, announcing each new
//! object on a downstream event queue.
//!
//! ## Features
//!
//! - Declarative per-target extraction rules (text, attribute, nested)
//! - Bounded retry with exponential backoff for transient fetch failures
//! - Idempotent writes: repeated runs over unchanged sources never
//!   duplicate objects or re-fire downstream events
//! - Per-target failure isolation: one broken source never fails the run
//! - Local filesystem store + NDJSON event spool by default; S3 + SQS
//!   backends behind the `aws` feature
//!
//! ## Usage
//!
//! ```sh
//! quest_sync -c sync.yaml -s ./objects -e ./events.ndjson
//! ```
//!
//! ## Architecture
//!
//! One invocation runs the pipeline once per target:
//! 1. **Fetch**: download the source document (retry with backoff)
//! 2. **Extract**: apply selector rules, one record per matched element
//! 3. **Derive**: compute the record's deterministic storage key
//! 4. **Write**: persist unless the key already exists
//! 5. **Notify**: enqueue an event for each newly created object
//!
//! The process exits non-zero only when the run aborts (unreadable
//! configuration or unreachable store); per-target failures are reported
//! in the run summary and logs.

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod errors;
mod extractor;
mod fetcher;
mod keys;
mod models;
mod notify;
mod runner;
mod store;
mod utils;

use cli::Cli;
use config::load_config;
use fetcher::{HttpFetcher, RetryFetch};
use models::RunState;
use notify::{EventQueue, FileQueue, Notifier};
use runner::RunCoordinator;
use store::{FsObjectStore, ObjectStore, StoreWriter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!("quest_sync starting up");

    let args = Cli::parse();
    debug!(?args.config, ?args.store_root, ?args.event_spool, "Parsed CLI arguments");

    // Unreadable or invalid configuration is the one failure that happens
    // before the run even reaches Running.
    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config, error = %e, "Failed to load sync configuration");
            return Err(Box::new(e) as Box<dyn Error>);
        }
    };

    let http = HttpFetcher::new(config.request_timeout())?;
    let fetcher = RetryFetch::new(http, config.max_attempts, Duration::from_secs(1));

    let store = make_store(&args).await;
    let queue = make_queue(&args).await;

    let coordinator = RunCoordinator::new(
        fetcher,
        StoreWriter::new(store),
        Notifier::new(queue),
        config.concurrency,
    );

    let summary = coordinator.run(&config.targets).await;

    for failure in &summary.failures {
        error!(target = %failure.target, reason = %failure.reason, "Target failed");
    }

    if summary.state == RunState::Aborted {
        let reason = summary
            .abort_reason
            .unwrap_or_else(|| "unknown abort cause".to_string());
        error!(reason = %reason, "Run aborted");
        return Err(reason.into());
    }

    info!(
        targets_attempted = summary.targets_attempted,
        targets_failed = summary.targets_failed,
        created = summary.created,
        skipped = summary.skipped,
        records_failed = summary.records_failed,
        notify_failures = summary.notify_failures,
        secs = summary.elapsed.as_secs(),
        millis = summary.elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

/// Pick the object store from the CLI: S3 when a bucket is given (and the
/// `aws` feature is on), the local directory store otherwise.
async fn make_store(args: &Cli) -> Arc<dyn ObjectStore> {
    #[cfg(feature = "aws")]
    if let Some(bucket) = &args.bucket {
        let aws_conf = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = aws_sdk_s3::Client::new(&aws_conf);
        info!(bucket = %bucket, "Using S3 object store");
        return Arc::new(store::s3::S3Store::new(client, bucket));
    }
    info!(root = %args.store_root, "Using filesystem object store");
    Arc::new(FsObjectStore::new(&args.store_root))
}

/// Pick the event queue from the CLI: SQS when a queue URL is given (and
/// the `aws` feature is on), the local NDJSON spool otherwise.
async fn make_queue(args: &Cli) -> Arc<dyn EventQueue> {
    #[cfg(feature = "aws")]
    if let Some(queue_url) = &args.queue_url {
        let aws_conf = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = aws_sdk_sqs::Client::new(&aws_conf);
        info!(queue_url = %queue_url, "Using SQS event queue");
        return Arc::new(notify::sqs::SqsQueue::new(client, queue_url));
    }
    info!(path = %args.event_spool, "Using NDJSON event spool");
    Arc::new(FileQueue::new(&args.event_spool))
}
