//! Retry of transient provider errors

use crate::error::ProviderResult;
use crate::provider::RetryConfig;
use std::future::Future;

/// Run `operation`, retrying transient errors with exponential backoff.
///
/// A transient error that survives `max_attempts` is escalated to
/// [`ControlPlaneErrorKind::RetriesExhausted`](crate::ControlPlaneErrorKind).
/// Control-plane errors are returned immediately.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = config.delay_for(attempt);
                tracing::warn!(
                    operation = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient error, retrying: {}",
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err.escalate(attempt)),
        }
    }
}
