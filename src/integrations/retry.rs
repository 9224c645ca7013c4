//! Retry with exponential backoff for idempotent remote reads
//!
//! Listing calls against either tracker go through [`with_retry`]; creates
//! and updates never do, since a repeated create is a duplicate task.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How many times, and how patiently, a read is retried
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    pub initial_backoff: Duration,

    /// Upper bound for a single wait, including server-supplied Retry-After
    pub max_backoff: Duration,

    pub multiplier: f64,

    /// Add up to 25% random jitter to each wait
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::for_reads()
    }
}

impl RetryConfig {
    /// Settings used by the tracker adapters for listing calls
    pub fn for_reads() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// A single attempt, no retries
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::for_reads()
        }
    }

    /// Wait before retry number `attempt` (zero based)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_secs_f64());

        let secs = if self.jitter {
            capped * (1.0 + rand_jitter() * 0.25)
        } else {
            capped
        };

        Duration::from_secs_f64(secs)
    }
}

/// Pseudo-random value in [0, 1) from the clock's sub-second nanos
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Retry classification for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    /// Retry after a server-supplied delay (Retry-After)
    RetryAfter(Duration),
    /// Permanent failure
    NoRetry,
}

/// Errors that know whether repeating the call can help
pub trait RetryableError {
    fn retry_decision(&self) -> RetryDecision;
}

/// Run `operation` until it succeeds, fails permanently, or runs out of retries
///
/// Returns the last error when every attempt failed.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        let error = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        let decision = error.retry_decision();
        if decision == RetryDecision::NoRetry {
            debug!(
                operation = operation_name,
                attempt = attempt,
                "Permanent failure: {}",
                error
            );
            return Err(error);
        }

        if attempt >= config.max_retries {
            warn!(
                operation = operation_name,
                attempts = attempt + 1,
                "Giving up after {} attempts: {}",
                attempt + 1,
                error
            );
            return Err(error);
        }

        let backoff = match decision {
            RetryDecision::RetryAfter(d) => d.min(config.max_backoff),
            _ => config.backoff_duration(attempt),
        };

        warn!(
            operation = operation_name,
            attempt = attempt + 1,
            max_attempts = config.max_retries + 1,
            backoff_secs = backoff.as_secs_f64(),
            "Retrying after error: {}",
            error
        );

        sleep(backoff).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum FakeError {
        Transient,
        Throttled(u64),
        Permanent,
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl RetryableError for FakeError {
        fn retry_decision(&self) -> RetryDecision {
            match self {
                FakeError::Transient => RetryDecision::Retry,
                FakeError::Throttled(secs) => RetryDecision::RetryAfter(Duration::from_secs(*secs)),
                FakeError::Permanent => RetryDecision::NoRetry,
            }
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::for_reads()
        };

        assert_eq!(config.backoff_duration(0), Duration::from_secs(1));
        assert_eq!(config.backoff_duration(1), Duration::from_secs(2));
        assert_eq!(config.backoff_duration(3), Duration::from_secs(8));
        assert_eq!(config.backoff_duration(10), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let backoff = RetryConfig::for_reads().backoff_duration(0);
        assert!(backoff >= Duration::from_secs(1));
        assert!(backoff <= Duration::from_millis(1250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let mut attempts = 0;

        let result: Result<&str, FakeError> =
            with_retry(&RetryConfig::for_reads(), "list", || {
                attempts += 1;
                let n = attempts;
                async move {
                    if n < 3 {
                        Err(FakeError::Transient)
                    } else {
                        Ok("page")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "page");
        assert_eq!(attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honoured() {
        let start = tokio::time::Instant::now();
        let mut attempts = 0;

        let result: Result<(), FakeError> = with_retry(&RetryConfig::for_reads(), "list", || {
            attempts += 1;
            let n = attempts;
            async move {
                if n == 1 {
                    Err(FakeError::Throttled(30))
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let mut attempts = 0;

        let result: Result<(), FakeError> = with_retry(&RetryConfig::for_reads(), "list", || {
            attempts += 1;
            async { Err(FakeError::Transient) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 4);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let mut attempts = 0;

        let result: Result<(), FakeError> = with_retry(&RetryConfig::for_reads(), "list", || {
            attempts += 1;
            async { Err(FakeError::Permanent) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_disabled_makes_one_attempt() {
        let mut attempts = 0;

        let result: Result<(), FakeError> = with_retry(&RetryConfig::disabled(), "list", || {
            attempts += 1;
            async { Err(FakeError::Transient) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
