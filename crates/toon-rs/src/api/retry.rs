//! Automatic retry with exponential backoff and jitter.
//!
//! Retries transient backend errors (429, 500, 502, 503, 504, network
//! failures). Never retries 4xx client errors or parse failures.

use super::BackendError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential backoff).
    pub multiplier: f64,
    /// Whether to add jitter to prevent thundering herd.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries. Uses sensible defaults.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed on the attempt number; no rand dependency.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Whether an HTTP status indicates a transient (retryable) failure.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    "{label}: transient error (attempt {}/{}), retrying in {:.2}s: {err}",
                    attempt + 1,
                    config.max_retries + 1,
                    delay.as_secs_f64(),
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant(retries: u32) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::ZERO,
            jitter: false,
            ..RetryConfig::with_retries(retries)
        }
    }

    #[test]
    fn default_config_no_retries() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn delay_increases_exponentially() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::with_retries(5)
        };
        let d0 = config.delay_for_attempt(0);
        let d1 = config.delay_for_attempt(1);
        let d2 = config.delay_for_attempt(2);

        assert!(d1 > d0, "d1={d1:?} should be > d0={d0:?}");
        assert!(d2 > d1, "d2={d2:?} should be > d1={d1:?}");
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            jitter: false,
            max_delay: Duration::from_secs(2),
            ..RetryConfig::with_retries(10)
        };
        assert!(config.delay_for_attempt(10) <= Duration::from_secs(2));
    }

    #[test]
    fn jitter_reduces_delay() {
        let jittered = RetryConfig::with_retries(3);
        let plain = RetryConfig {
            jitter: false,
            ..RetryConfig::with_retries(3)
        };
        assert!(jittered.delay_for_attempt(2) <= plain.delay_for_attempt(2));
    }

    #[test]
    fn transient_statuses() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_transient_status(status));
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!is_transient_status(status));
        }
    }

    #[tokio::test]
    async fn transient_error_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&instant(3), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BackendError::Http("connection reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&instant(3), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(BackendError::Api {
                    status: 401,
                    body: "unauthorized".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_exhausted_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&instant(2), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(BackendError::Api {
                    status: 503,
                    body: "overloaded".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(BackendError::Api { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
