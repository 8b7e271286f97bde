//! Downstream event notification for newly written objects.
//!
//! After each `Created` write the pipeline enqueues a [`SyncEvent`] so
//! consumers learn about the new object without polling the store. The
//! seam is the [`EventQueue`] trait; implementations:
//!
//! - [`FileQueue`]: NDJSON append spool on local disk
//! - [`MemoryQueue`]: in-process buffer for tests
//! - [`sqs::SqsQueue`]: an SQS queue, behind the `aws` feature
//!
//! Enqueue failures are non-fatal by design: the object is already
//! durably stored, so the authoritative state is never lost; at most a
//! consumer misses a timely trigger. The coordinator logs a warning and
//! counts the miss in the run summary.

use crate::errors::NotifyError;
use crate::models::{Record, StorageKey, SyncEvent, Target};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// A message sink with at-least-once delivery. The sync job only ever
/// enqueues; consumption happens elsewhere.
#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn enqueue(&self, event: &SyncEvent) -> Result<(), NotifyError>;
}

/// Event queue that appends one JSON line per event to a spool file.
///
/// Appends are serialized through a mutex so concurrent target tasks
/// cannot interleave partial lines.
pub struct FileQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileQueue {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn io_error(&self, source: std::io::Error) -> NotifyError {
        NotifyError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl EventQueue for FileQueue {
    async fn enqueue(&self, event: &SyncEvent) -> Result<(), NotifyError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&line).await.map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// In-memory event queue for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryQueue {
    events: Arc<std::sync::Mutex<Vec<SyncEvent>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        MemoryQueue::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventQueue for MemoryQueue {
    async fn enqueue(&self, event: &SyncEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Builds and enqueues the event for one newly created object.
#[derive(Clone)]
pub struct Notifier {
    queue: Arc<dyn EventQueue>,
}

impl Notifier {
    pub fn new(queue: Arc<dyn EventQueue>) -> Self {
        Notifier { queue }
    }

    /// Announce a freshly written object. Invoked only for `Created`
    /// outcomes; skipped writes must never re-notify.
    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub async fn notify(
        &self,
        key: &StorageKey,
        target: &Target,
        record: &Record,
    ) -> Result<(), NotifyError> {
        let identity: BTreeMap<String, String> = target
            .identity_fields
            .iter()
            .filter_map(|name| {
                record
                    .fields
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();
        let event = SyncEvent {
            key: key.as_str().to_string(),
            target: target.name.clone(),
            source_url: record.source_url.clone(),
            identity,
            emitted_at: Utc::now(),
        };
        self.queue.enqueue(&event).await?;
        debug!("Enqueued sync event");
        Ok(())
    }
}

/// SQS-backed event queue, available with the `aws` feature.
#[cfg(feature = "aws")]
pub mod sqs {
    use super::EventQueue;
    use crate::errors::NotifyError;
    use crate::models::SyncEvent;
    use async_trait::async_trait;
    use aws_sdk_sqs::Client;
    use tracing::{debug, instrument};

    /// Event queue publishing to a single SQS queue URL.
    #[derive(Clone)]
    pub struct SqsQueue {
        client: Client,
        queue_url: String,
    }

    impl SqsQueue {
        pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
            SqsQueue {
                client,
                queue_url: queue_url.into(),
            }
        }
    }

    #[async_trait]
    impl EventQueue for SqsQueue {
        #[instrument(level = "debug", skip_all, fields(key = %event.key))]
        async fn enqueue(&self, event: &SyncEvent) -> Result<(), NotifyError> {
            let body = serde_json::to_string(event)?;
            self.client
                .send_message()
                .queue_url(&self.queue_url)
                .message_body(body)
                .send()
                .await
                .map_err(|e| NotifyError::Backend(format!("sqs send: {e}")))?;
            debug!(queue_url = %self.queue_url, "Sent SQS message");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldRule;

    fn target() -> Target {
        Target {
            name: "bls".to_string(),
            url: "https://example.com/pub/".to_string(),
            record_selector: "a".to_string(),
            fields: BTreeMap::<String, FieldRule>::new(),
            identity_fields: vec!["href".to_string()],
        }
    }

    fn record() -> Record {
        let mut fields = BTreeMap::new();
        fields.insert("href".to_string(), "/pub/pr.txt".to_string());
        fields.insert("size".to_string(), "12 KB".to_string());
        Record {
            target: "bls".to_string(),
            source_url: "https://example.com/pub/".to_string(),
            fields,
        }
    }

    #[tokio::test]
    async fn test_notify_carries_key_and_identity_only() {
        let queue = MemoryQueue::new();
        let notifier = Notifier::new(Arc::new(queue.clone()));
        let key = StorageKey::new("bls/pr-txt-0011223344556677.json".to_string());

        notifier.notify(&key, &target(), &record()).await.unwrap();

        let events = queue.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, key.as_str());
        assert_eq!(events[0].target, "bls");
        assert_eq!(events[0].identity.len(), 1);
        assert_eq!(events[0].identity["href"], "/pub/pr.txt");
        // Non-identity fields stay out of the event.
        assert!(!events[0].identity.contains_key("size"));
    }

    #[tokio::test]
    async fn test_file_queue_appends_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("events.ndjson");
        let queue = FileQueue::new(&spool);
        let notifier = Notifier::new(Arc::new(queue));
        let key_a = StorageKey::new("bls/a.json".to_string());
        let key_b = StorageKey::new("bls/b.json".to_string());

        notifier.notify(&key_a, &target(), &record()).await.unwrap();
        notifier.notify(&key_b, &target(), &record()).await.unwrap();

        let contents = std::fs::read_to_string(&spool).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: SyncEvent = serde_json::from_str(lines[0]).unwrap();
        let second: SyncEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(first.key, "bls/a.json");
        assert_eq!(second.key, "bls/b.json");
    }
}
