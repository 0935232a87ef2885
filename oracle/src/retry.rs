//! Retry loop for chain data reads.
//!
//! Every read the oracle makes is idempotent, so failures are retried until
//! they succeed or shutdown is requested. Giving up early would leave a slot
//! half-reconciled, which the orchestrator treats as a hard error.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fixed-delay retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts. 0 means infinite retries.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl RetryConfig {
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Retry `operation` until it succeeds, attempts run out, or `shutdown` fires.
///
/// Cancellation is checked while waiting between attempts, a call that is
/// already in flight is allowed to finish.
pub async fn retry<F, Fut, T, E>(
    config: &RetryConfig,
    shutdown: &CancellationToken,
    operation_name: &str,
    operation: F,
) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error> + std::fmt::Display,
{
    let mut attempt = 1u32;
    let max_attempts_str = if config.max_attempts == 0 {
        "∞".to_string()
    } else {
        config.max_attempts.to_string()
    };

    loop {
        let e = match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        if config.max_attempts > 0 && attempt >= config.max_attempts {
            warn!(
                operation = operation_name,
                attempt,
                max_attempts = config.max_attempts,
                error = %e,
                "Max retry attempts exhausted"
            );
            return Err(e.into());
        }

        let delay = config.delay;
        warn!(
            operation = operation_name,
            attempt,
            max_attempts = %max_attempts_str,
            delay_secs = delay.as_secs(),
            error = %e,
            "Operation failed, retrying after delay"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => {
                let e: anyhow::Error = e.into();
                return Err(e.context(format!("{operation_name} abandoned: shutdown requested")));
            }
        }
        attempt += 1;
    }
}
