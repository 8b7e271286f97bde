//! HTTP retrieval with exponential backoff retry logic.
//!
//! # Architecture
//!
//! The module uses a trait-based design for flexibility:
//! - [`Fetch`]: core trait defining async document retrieval
//! - [`HttpFetcher`]: performs the actual GET over a shared `reqwest` client
//! - [`RetryFetch`]: decorator that adds bounded retry to any `Fetch`
//!   implementation, for transient causes only
//!
//! # Retry Strategy
//!
//! - Capped total attempt count (3 by default, from config)
//! - Exponential backoff starting at the base delay
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd
//!
//! Permanent causes (4xx responses, malformed URLs) fail immediately
//! without retry; the run coordinator records the target as failed and
//! moves on. Fetching never aborts the run.

use crate::errors::{FetchCause, FetchError};
use crate::models::{RawPayload, Target};
use chrono::Utc;
use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// User-Agent sent on every request. Some of the hosts we sync from reject
/// the library default.
const USER_AGENT: &str = concat!("quest_sync/", env!("CARGO_PKG_VERSION"));

/// Trait for async document retrieval.
///
/// Implementors fetch one target's document and return its raw payload.
/// This abstraction allows decorators (like retry logic) and test fakes.
pub trait Fetch {
    /// Retrieve the target's document.
    async fn fetch(&self, target: &Target) -> Result<RawPayload, FetchError>;
}

/// Fetcher that performs a plain HTTP GET.
///
/// Holds a shared [`reqwest::Client`] configured with a per-request timeout
/// and the sync job's User-Agent; no process-wide session state.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: StdDuration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(HttpFetcher { client })
    }
}

fn classify_transport(e: &reqwest::Error) -> FetchCause {
    if e.is_timeout() {
        FetchCause::Timeout
    } else if e.is_connect() {
        FetchCause::Connect(e.to_string())
    } else {
        FetchCause::Transport(e.to_string())
    }
}

impl Fetch for HttpFetcher {
    #[instrument(level = "info", skip_all, fields(target = %target.name, url = %target.url))]
    async fn fetch(&self, target: &Target) -> Result<RawPayload, FetchError> {
        let fail = |cause| FetchError {
            url: target.url.clone(),
            attempts: 1,
            cause,
        };

        let url = url::Url::parse(&target.url)
            .map_err(|e| fail(FetchCause::InvalidUrl(e.to_string())))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fail(classify_transport(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(FetchCause::Status(status.as_u16())));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let body = response
            .bytes()
            .await
            .map_err(|e| fail(classify_transport(&e)))?
            .to_vec();

        info!(bytes = body.len(), ?content_type, "Fetched target document");
        Ok(RawPayload {
            body,
            content_type,
            retrieved_at: Utc::now(),
        })
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`Fetch`]
/// implementation.
///
/// Retries only transient causes; permanent failures are returned as-is
/// after the first attempt. The returned [`FetchError`] always reports the
/// total number of attempts made.
///
/// # Backoff Strategy
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryFetch<T> {
    /// The underlying fetcher to wrap.
    inner: T,
    /// Total attempt budget, including the first call.
    max_attempts: usize,
    /// Initial delay between attempts (doubles with each one).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T> RetryFetch<T>
where
    T: Fetch,
{
    /// Create a new retry wrapper around an existing [`Fetch`] implementation.
    ///
    /// `max_attempts` counts every call, so `1` disables retries entirely.
    pub fn new(inner: T, max_attempts: usize, base_delay: StdDuration) -> Self {
        RetryFetch {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    /// Delay before the retry following `attempt`, without jitter. The
    /// exponent is clamped so oversized attempt budgets cannot overflow
    /// the shift; the cap kicks in long before that anyway.
    fn backoff_delay(&self, attempt: usize) -> StdDuration {
        let shift = (attempt - 1).min(31) as u32;
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Fetch for RetryFetch<T>
where
    T: Fetch,
{
    #[instrument(level = "info", skip_all, fields(target = %target.name))]
    async fn fetch(&self, target: &Target) -> Result<RawPayload, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            match self.inner.fetch(target).await {
                Ok(payload) => {
                    debug!(attempt, "fetch succeeded");
                    return Ok(payload);
                }
                Err(mut e) => {
                    e.attempts = attempt;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !e.cause.is_transient() {
                        warn!(
                            attempt,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                            error = %e,
                            "fetch failed with permanent cause; not retrying"
                        );
                        return Err(e);
                    }
                    if attempt >= self.max_attempts {
                        warn!(
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_total = total_dt.as_millis() as u128,
                            error = %e,
                            "fetch exhausted attempts"
                        );
                        return Err(e);
                    }

                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = self.backoff_delay(attempt) + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn target() -> Target {
        Target {
            name: "t".to_string(),
            url: "https://example.com/listing".to_string(),
            record_selector: "a".to_string(),
            fields: BTreeMap::new(),
            identity_fields: vec![],
        }
    }

    fn payload() -> RawPayload {
        RawPayload {
            body: b"<html></html>".to_vec(),
            content_type: Some("text/html".to_string()),
            retrieved_at: Utc::now(),
        }
    }

    /// Fails with the given cause builder for the first `failures` calls,
    /// then succeeds.
    struct FlakyFetch {
        calls: AtomicUsize,
        failures: usize,
        cause: fn() -> FetchCause,
    }

    impl Fetch for FlakyFetch {
        async fn fetch(&self, target: &Target) -> Result<RawPayload, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(FetchError {
                    url: target.url.clone(),
                    attempts: 1,
                    cause: (self.cause)(),
                })
            } else {
                Ok(payload())
            }
        }
    }

    #[tokio::test]
    async fn test_transient_failures_within_budget_succeed() {
        let inner = FlakyFetch {
            calls: AtomicUsize::new(0),
            failures: 2,
            cause: || FetchCause::Status(503),
        };
        let fetcher = RetryFetch::new(inner, 3, StdDuration::from_millis(1));
        let result = fetcher.fetch(&target()).await;
        assert!(result.is_ok());
        assert_eq!(fetcher.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempt_budget_is_respected() {
        let inner = FlakyFetch {
            calls: AtomicUsize::new(0),
            failures: usize::MAX,
            cause: || FetchCause::Timeout,
        };
        let fetcher = RetryFetch::new(inner, 3, StdDuration::from_millis(1));
        let err = fetcher.fetch(&target()).await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(fetcher.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let inner = FlakyFetch {
            calls: AtomicUsize::new(0),
            failures: usize::MAX,
            cause: || FetchCause::Status(404),
        };
        let fetcher = RetryFetch::new(inner, 5, StdDuration::from_millis(1));
        let err = fetcher.fetch(&target()).await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(fetcher.inner.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err.cause, FetchCause::Status(404)));
    }

    #[test]
    fn test_backoff_delay_doubles_then_caps() {
        let inner = FlakyFetch {
            calls: AtomicUsize::new(0),
            failures: 0,
            cause: || FetchCause::Timeout,
        };
        let fetcher = RetryFetch::new(inner, 3, StdDuration::from_secs(1));
        assert_eq!(fetcher.backoff_delay(1), StdDuration::from_secs(1));
        assert_eq!(fetcher.backoff_delay(3), StdDuration::from_secs(4));
        assert_eq!(fetcher.backoff_delay(6), StdDuration::from_secs(30));
        // Absurd attempt counts must clamp, not overflow the shift.
        assert_eq!(fetcher.backoff_delay(500), StdDuration::from_secs(30));
    }

    #[tokio::test]
    async fn test_invalid_url_is_permanent() {
        let fetcher = HttpFetcher::new(StdDuration::from_secs(5)).unwrap();
        let mut bad = target();
        bad.url = "not a url at all".to_string();
        let err = fetcher.fetch(&bad).await.unwrap_err();
        assert!(matches!(err.cause, FetchCause::InvalidUrl(_)));
        assert!(!err.cause.is_transient());
    }
}
