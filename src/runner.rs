//! Run coordination: one invocation of the sync pipeline.
//!
//! [`RunCoordinator`] is the only component with orchestration logic. It
//! drives each configured target through fetch -> extract -> derive key ->
//! write -> notify, processing targets concurrently (bounded) and
//! converting every stage failure into a recorded per-target outcome.
//!
//! # State Machine
//!
//! ```text
//! Idle -> Running -> Completed   (all targets attempted, any outcomes)
//!              \--> Aborted     (store unreachable before any target)
//! ```
//!
//! A run that reaches `Completed` is a success regardless of how many
//! individual targets failed; only a failed store probe aborts it. The
//! configuration collaborator aborts earlier still, in `main`, before the
//! coordinator is ever built.

use crate::extractor::extract;
use crate::fetcher::Fetch;
use crate::keys::derive_key;
use crate::models::{Record, RunState, RunSummary, StorageKey, Target, TargetOutcome, WriteOutcome};
use crate::notify::Notifier;
use crate::store::StoreWriter;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Orchestrates one invocation over the configured targets.
pub struct RunCoordinator<F> {
    fetcher: F,
    writer: StoreWriter,
    notifier: Notifier,
    concurrency: usize,
}

impl<F> RunCoordinator<F>
where
    F: Fetch,
{
    pub fn new(fetcher: F, writer: StoreWriter, notifier: Notifier, concurrency: usize) -> Self {
        RunCoordinator {
            fetcher,
            writer,
            notifier,
            concurrency: concurrency.max(1),
        }
    }

    /// Execute one run over `targets` and produce its summary.
    ///
    /// The summary's `state` tells the caller whether the run completed or
    /// aborted; per-target failures never escape as errors.
    #[instrument(level = "info", skip_all, fields(targets = targets.len()))]
    pub async fn run(&self, targets: &[Target]) -> RunSummary {
        let start = Instant::now();
        let mut state = RunState::Idle;
        debug!(%state, "Run created");

        state = RunState::Running;
        info!(%state, concurrency = self.concurrency, "Run starting");

        // Total storage unavailability is the one condition that aborts a
        // run instead of failing targets one by one.
        if let Err(e) = self.writer.probe().await {
            state = RunState::Aborted;
            error!(%state, error = %e, "Store probe failed; aborting run");
            return RunSummary::aborted(e, start.elapsed());
        }

        let outcomes: Vec<TargetOutcome> = stream::iter(targets)
            .map(|target| self.process_target(target))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let summary = RunSummary::from_outcomes(outcomes, start.elapsed());
        info!(
            state = %summary.state,
            targets_attempted = summary.targets_attempted,
            targets_failed = summary.targets_failed,
            created = summary.created,
            skipped = summary.skipped,
            records_failed = summary.records_failed,
            notify_failures = summary.notify_failures,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Run completed"
        );
        summary
    }

    /// Drive one target through the full pipeline. Never returns an error:
    /// every failure is folded into the outcome.
    #[instrument(level = "info", skip_all, fields(target = %target.name))]
    async fn process_target(&self, target: &Target) -> TargetOutcome {
        let payload = match self.fetcher.fetch(target).await {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Target fetch failed");
                return TargetOutcome::failed(target, e);
            }
        };

        let records = match extract(target, &payload) {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Target extraction failed");
                return TargetOutcome::failed(target, e);
            }
        };
        drop(payload);

        let mut outcome = TargetOutcome {
            target: target.name.clone(),
            records_extracted: records.len(),
            ..TargetOutcome::default()
        };

        // A listing can legitimately repeat an entry; one key gets one write.
        let keyed: Vec<(StorageKey, Record)> = records
            .into_iter()
            .map(|record| (derive_key(target, &record), record))
            .unique_by(|(key, _)| key.clone())
            .collect();

        for (key, record) in keyed {
            match self.writer.write(&key, &record).await {
                Ok(WriteOutcome::Created) => {
                    outcome.created += 1;
                    if let Err(e) = self.notifier.notify(&key, target, &record).await {
                        // Object is already durable; a missed trigger is
                        // the worst case here.
                        warn!(%key, error = %e, "Failed to enqueue sync event");
                        outcome.notify_failures += 1;
                    }
                }
                Ok(WriteOutcome::Skipped) => {
                    outcome.skipped += 1;
                }
                Err(e) => {
                    warn!(%key, error = %e, "Record write failed");
                    outcome.records_failed += 1;
                }
            }
        }

        info!(
            records = outcome.records_extracted,
            created = outcome.created,
            skipped = outcome.skipped,
            failed = outcome.records_failed,
            "Target processed"
        );
        outcome
    }
}
