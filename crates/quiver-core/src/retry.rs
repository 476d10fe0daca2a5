//! Deadlines and bounded retries for external calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::{Error, Result};

/// Run `fut` with a deadline, mapping expiry to [`Error::Timeout`].
pub async fn with_timeout<T, Fut>(deadline: Duration, op: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "{} exceeded {}ms",
            op,
            deadline.as_millis()
        ))),
    }
}

/// Retry `call` on transient errors with jittered exponential backoff.
///
/// Non-transient errors return immediately. After `max_attempts` the last
/// transient error is surfaced.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = jittered(policy.delay_for(attempt));
                warn!(
                    op,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Scale a delay into `[delay/2, delay]` so concurrent retries spread out.
fn jittered(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
    delay.mul_f64(factor)
}
