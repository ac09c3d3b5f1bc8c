//! Timeout and bounded retry for collaborator calls.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RequestConfig;
use crate::error::{CollaboratorError, CollaboratorResult};

/// Per-call timeout plus exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Build from request configuration.
    pub fn from_config(config: &RequestConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Single attempt, no retry.
    pub fn once(timeout: Duration) -> Self {
        Self {
            timeout,
            max_retries: 0,
            retry_delay: Duration::ZERO,
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2_u32.saturating_pow(retry.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RequestConfig::default())
    }
}

/// Run `call` with a timeout per attempt, retrying failures with backoff.
///
/// Cancellation aborts immediately with [`CollaboratorError::Cancelled`],
/// including during a backoff sleep. When every attempt fails the last error
/// is wrapped in [`CollaboratorError::Unavailable`].
pub async fn call_with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    mut call: F,
) -> CollaboratorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CollaboratorResult<T>>,
{
    let mut last_error = None;
    let mut retries = 0;

    while retries <= policy.max_retries {
        if retries > 0 {
            let delay = policy.backoff(retries);
            warn!(
                operation,
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                "Retrying collaborator call"
            );
            cancellable(cancel, tokio::time::sleep(delay)).await?;
        }

        let start = Instant::now();
        let attempt = tokio::time::timeout(policy.timeout, call());

        match cancellable(cancel, attempt).await? {
            Ok(Ok(value)) => {
                debug!(
                    operation,
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Collaborator call succeeded"
                );
                return Ok(value);
            }
            Ok(Err(CollaboratorError::Cancelled)) => return Err(CollaboratorError::Cancelled),
            Ok(Err(e)) => {
                warn!(
                    operation,
                    error = %e,
                    latency_ms = start.elapsed().as_millis() as u64,
                    retry = retries,
                    "Collaborator call failed"
                );
                last_error = Some(e);
            }
            Err(_) => {
                let timeout_ms = policy.timeout.as_millis() as u64;
                warn!(operation, timeout_ms, retry = retries, "Collaborator call timed out");
                last_error = Some(CollaboratorError::Timeout { timeout_ms });
            }
        }
        retries += 1;
    }

    Err(CollaboratorError::Unavailable {
        operation: operation.to_string(),
        message: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string()),
        retries,
    })
}

async fn cancellable<F: Future>(cancel: Option<&CancellationToken>, fut: F) -> CollaboratorResult<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(CollaboratorError::Cancelled),
            out = fut => Ok(out),
        },
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_retries,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = call_with_retry("seed", &fast_policy(2), None, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CollaboratorError::Failed {
                        message: "flaky".to_string(),
                    })
                } else {
                    Ok("seed text")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "seed text");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_unavailable() {
        let result: CollaboratorResult<()> = call_with_retry("verify", &fast_policy(1), None, || async {
            Err(CollaboratorError::Failed {
                message: "down".to_string(),
            })
        })
        .await;
        match result {
            Err(CollaboratorError::Unavailable {
                operation, retries, ..
            }) => {
                assert_eq!(operation, "verify");
                assert_eq!(retries, 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let result: CollaboratorResult<()> = call_with_retry("propose", &fast_policy(0), None, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts() {
        let token = CancellationToken::new();
        token.cancel();
        let result: CollaboratorResult<()> =
            call_with_retry("verify", &fast_policy(3), Some(&token), || async { Ok(()) }).await;
        assert!(matches!(result, Err(CollaboratorError::Cancelled)));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            timeout: Duration::from_secs(1),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }
}
