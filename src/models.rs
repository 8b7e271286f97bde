//! Data models for sync targets, extracted records, and run outcomes.
//!
//! This module defines the core data structures flowing through the pipeline:
//! - [`Target`]: one configured source with its extraction rules
//! - [`FieldRule`]: the closed set of selector kinds a field can use
//! - [`RawPayload`]: fetched bytes handed from fetcher to extractor
//! - [`Record`]: one structured extraction result
//! - [`StorageKey`]: the deterministic object-store key for a record
//! - [`SyncEvent`]: the downstream notification emitted for new objects
//! - [`TargetOutcome`] / [`RunSummary`] / [`RunState`]: per-run accounting
//!
//! `Record` keeps its fields in a `BTreeMap` so serialization order is
//! canonical regardless of extraction order; key derivation and stored
//! object bytes both rely on that.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// One external source to fetch and extract from in a given run.
///
/// Targets come from the run configuration and are immutable for the
/// duration of the run. Each element matching `record_selector` in the
/// fetched document yields one [`Record`] with fields populated per rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Target {
    /// Unique name; doubles as the key prefix in the object store.
    pub name: String,
    /// Source URL to fetch.
    pub url: String,
    /// Selector matching one element per record.
    pub record_selector: String,
    /// Field name -> extraction rule, applied within each matched element.
    pub fields: BTreeMap<String, FieldRule>,
    /// Fields whose values identify a record for storage-key purposes.
    /// Records missing any of these fall back to a content hash.
    #[serde(default)]
    pub identity_fields: Vec<String>,
}

/// The closed set of selector kinds a field can be extracted with.
///
/// Kept deliberately small: anything fancier belongs in a downstream
/// consumer, not in the sync job.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldRule {
    /// The joined text content of the first element matching `selector`.
    Text { selector: String },
    /// The value of attribute `attr` on the first element matching
    /// `selector`. Values of `href`/`src` are resolved against the
    /// target URL when relative.
    Attribute { selector: String, attr: String },
    /// Scope to the first element matching `selector`, then apply the
    /// inner rule within it.
    Nested { selector: String, rule: Box<FieldRule> },
}

/// Raw bytes retrieved from a target, before extraction.
///
/// Lives only on the fetcher -> extractor handoff and is dropped once
/// records have been extracted.
#[derive(Debug)]
pub struct RawPayload {
    /// The response body.
    pub body: Vec<u8>,
    /// Content type reported by the server, if any.
    pub content_type: Option<String>,
    /// When the payload was retrieved.
    pub retrieved_at: DateTime<Utc>,
}

/// One structured extraction result.
///
/// Immutable once produced. Deliberately carries no volatile timestamp so
/// its serialized bytes are identical across runs over unchanged sources,
/// which is what makes the existence-check write path idempotent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Record {
    /// Name of the target this record came from.
    pub target: String,
    /// URL of the document it was extracted from.
    pub source_url: String,
    /// Field name -> extracted value. Absent optional fields are simply
    /// not present. Sorted map gives canonical serialization order.
    pub fields: BTreeMap<String, String>,
}

/// A deterministic object-store key for a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(key: String) -> Self {
        StorageKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one persistence attempt.
///
/// Store failures surface as `Err(StoreError)` from the writer rather
/// than a third variant; the coordinator records them as failed records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new object was written under the key.
    Created,
    /// The key already existed; nothing was written.
    Skipped,
}

/// The event enqueued for downstream consumers after each new write.
///
/// Carries the key plus minimal identifying metadata; consumers that need
/// the full record read it from the store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncEvent {
    /// The object-store key of the newly written record.
    pub key: String,
    /// Name of the target the record came from.
    pub target: String,
    /// URL of the source document.
    pub source_url: String,
    /// The record's identity-bearing fields, if any were configured.
    pub identity: BTreeMap<String, String>,
    /// When the event was emitted.
    pub emitted_at: DateTime<Utc>,
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    /// All targets were attempted, regardless of individual outcomes.
    Completed,
    /// A process-fatal condition stopped the run before or during
    /// target processing.
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Accounting for one target's trip through the pipeline.
#[derive(Debug, Default)]
pub struct TargetOutcome {
    /// Target name.
    pub target: String,
    /// Records extracted from the fetched document.
    pub records_extracted: usize,
    /// Records newly written to the store.
    pub created: usize,
    /// Records whose key already existed.
    pub skipped: usize,
    /// Records whose write or existence check failed.
    pub records_failed: usize,
    /// Created records whose downstream event could not be enqueued.
    pub notify_failures: usize,
    /// Stage error that stopped the target before record processing,
    /// rendered for the summary.
    pub error: Option<String>,
}

impl TargetOutcome {
    pub fn failed(target: &Target, error: impl fmt::Display) -> Self {
        TargetOutcome {
            target: target.name.clone(),
            error: Some(error.to_string()),
            ..TargetOutcome::default()
        }
    }
}

/// A target-level failure with its reason, for the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct TargetFailure {
    pub target: String,
    pub reason: String,
}

/// Aggregated result of one run, handed back to the invoking environment.
///
/// Target-level failures live here and in the logs only; the run's exit
/// status reflects nothing but run-level aborts.
#[derive(Debug)]
pub struct RunSummary {
    /// Terminal state the run reached.
    pub state: RunState,
    /// Targets the run attempted.
    pub targets_attempted: usize,
    /// Targets that failed before record processing.
    pub targets_failed: usize,
    /// New objects written across all targets.
    pub created: usize,
    /// Writes skipped because the key already existed.
    pub skipped: usize,
    /// Records whose persistence failed.
    pub records_failed: usize,
    /// Created records whose notification could not be enqueued.
    pub notify_failures: usize,
    /// Per-target failure reasons.
    pub failures: Vec<TargetFailure>,
    /// The process-fatal condition, when the run aborted.
    pub abort_reason: Option<String>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl RunSummary {
    /// Fold per-target outcomes into a run summary.
    pub fn from_outcomes(outcomes: Vec<TargetOutcome>, elapsed: Duration) -> Self {
        let mut summary = RunSummary {
            state: RunState::Completed,
            targets_attempted: outcomes.len(),
            targets_failed: 0,
            created: 0,
            skipped: 0,
            records_failed: 0,
            notify_failures: 0,
            failures: Vec::new(),
            abort_reason: None,
            elapsed,
        };
        for outcome in outcomes {
            summary.created += outcome.created;
            summary.skipped += outcome.skipped;
            summary.records_failed += outcome.records_failed;
            summary.notify_failures += outcome.notify_failures;
            if let Some(reason) = outcome.error {
                summary.targets_failed += 1;
                summary.failures.push(TargetFailure {
                    target: outcome.target,
                    reason,
                });
            }
        }
        summary
    }

    /// Summary for a run stopped by a process-fatal condition before any
    /// target was attempted.
    pub fn aborted(reason: impl fmt::Display, elapsed: Duration) -> Self {
        RunSummary {
            state: RunState::Aborted,
            targets_attempted: 0,
            targets_failed: 0,
            created: 0,
            skipped: 0,
            records_failed: 0,
            notify_failures: 0,
            failures: Vec::new(),
            abort_reason: Some(reason.to_string()),
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(target: &str) -> TargetOutcome {
        TargetOutcome {
            target: target.to_string(),
            ..TargetOutcome::default()
        }
    }

    #[test]
    fn test_field_rule_deserialization() {
        let yaml = r#"
            title:
              kind: text
              selector: "a.title"
            href:
              kind: attribute
              selector: "a"
              attr: "href"
            author:
              kind: nested
              selector: ".byline"
              rule:
                kind: text
                selector: "span.name"
        "#;
        let fields: BTreeMap<String, FieldRule> = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(fields["title"], FieldRule::Text { .. }));
        assert!(matches!(fields["href"], FieldRule::Attribute { .. }));
        assert!(matches!(fields["author"], FieldRule::Nested { .. }));
    }

    #[test]
    fn test_unknown_field_rule_kind_rejected() {
        let yaml = r#"
            kind: regex
            selector: "a"
        "#;
        let result: Result<FieldRule, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_record_serialization_is_canonical() {
        let mut fields_a = BTreeMap::new();
        fields_a.insert("zeta".to_string(), "1".to_string());
        fields_a.insert("alpha".to_string(), "2".to_string());

        let mut fields_b = BTreeMap::new();
        fields_b.insert("alpha".to_string(), "2".to_string());
        fields_b.insert("zeta".to_string(), "1".to_string());

        let record_a = Record {
            target: "t".to_string(),
            source_url: "https://example.com".to_string(),
            fields: fields_a,
        };
        let record_b = Record {
            target: "t".to_string(),
            source_url: "https://example.com".to_string(),
            fields: fields_b,
        };

        assert_eq!(
            serde_json::to_string(&record_a).unwrap(),
            serde_json::to_string(&record_b).unwrap()
        );
    }

    #[test]
    fn test_summary_aggregation() {
        let mut ok = outcome("a");
        ok.records_extracted = 3;
        ok.created = 2;
        ok.skipped = 1;

        let mut bad = outcome("b");
        bad.error = Some("fetch of https://b failed".to_string());

        let summary = RunSummary::from_outcomes(vec![ok, bad], Duration::from_secs(1));
        assert_eq!(summary.state, RunState::Completed);
        assert_eq!(summary.targets_attempted, 2);
        assert_eq!(summary.targets_failed, 1);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].target, "b");
    }

    #[test]
    fn test_sync_event_round_trip() {
        let mut identity = BTreeMap::new();
        identity.insert("href".to_string(), "/pub/file.txt".to_string());
        let event = SyncEvent {
            key: "bls/pub-file-txt-0011223344556677.json".to_string(),
            target: "bls".to_string(),
            source_url: "https://example.com/pub/".to_string(),
            identity,
            emitted_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SyncEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, event.key);
        assert_eq!(back.identity["href"], "/pub/file.txt");
    }
}
