//! Bounded retry with exponential backoff.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the initial attempt)
    pub max_retries: u32,
    /// Initial delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (typically 2.0)
    pub backoff_multiplier: f64,
}

/// Retry an async operation with exponential backoff.
///
/// `is_retryable` decides per error whether another attempt is worthwhile;
/// any other error is returned as soon as it occurs. A backoff wait ends
/// early once `interrupt` resolves, and the operation runs again right away.
pub async fn retry_with_backoff<T, E, F, Fut, P, I, IFut>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: P,
    interrupt: I,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
    I: Fn() -> IFut,
    IFut: Future<Output = ()>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempt += 1;

                if attempt > config.max_retries || !is_retryable(&err) {
                    return Err(err);
                }

                tracing::debug!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt,
                    config.max_retries + 1,
                    err,
                    delay
                );

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = interrupt() => tracing::debug!("Retry wait interrupted"),
                }

                // Next delay: exponential, capped, with +/-20% jitter
                let next_delay_ms = (delay.as_millis() as f64 * config.backoff_multiplier) as u64;
                let base_delay = Duration::from_millis(next_delay_ms).min(config.max_delay);
                let jitter_factor = rand::thread_rng().gen_range(0.8..=1.2);
                delay =
                    Duration::from_millis((base_delay.as_millis() as f64 * jitter_factor) as u64);
            }
        }
    }
}
