//! Exponential backoff retry for provider calls.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tracing::warn;

use crate::error::ProviderError;

/// Configuration: 3 total attempts, base 1s, max 30s.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const INITIAL_INTERVAL_SECS: u64 = 1;
const MAX_INTERVAL_SECS: u64 = 30;

/// Retry an async operation with exponential backoff.
///
/// `attempt` is called up to `max_attempts` times (at least once). Errors
/// for which `is_retryable` returns false are returned immediately; the last
/// retryable error is returned once attempts run out.
pub async fn retry_with_backoff<T, E, Fut, F, R>(
    max_attempts: u32,
    mut attempt: F,
    is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut backoff = ExponentialBackoff {
        initial_interval: Duration::from_secs(INITIAL_INTERVAL_SECS),
        max_interval: Duration::from_secs(MAX_INTERVAL_SECS),
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempts = 0;
    loop {
        attempts += 1;

        let error = match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempts >= max_attempts || !is_retryable(&error) {
            return Err(error);
        }

        let wait = backoff
            .next_backoff()
            .unwrap_or(Duration::from_secs(MAX_INTERVAL_SECS));
        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:.1}s",
            attempts,
            max_attempts,
            error,
            wait.as_secs_f64()
        );
        tokio::time::sleep(wait).await;
    }
}

/// [`retry_with_backoff`] specialised to provider errors.
pub async fn retry_provider_call<T, Fut, F>(max_attempts: u32, attempt: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    retry_with_backoff(max_attempts, attempt, ProviderError::is_retryable).await
}
