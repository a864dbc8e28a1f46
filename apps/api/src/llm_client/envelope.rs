//! Resilient call envelope for provider round trips.
//!
//! Every external call gets a correlation ID carried through its start,
//! success and failure log lines, wall-clock timing, and bounded retry
//! with exponential backoff plus a randomized jitter fraction. Only
//! transient failures are retried; permanent failures and retry
//! exhaustion propagate to the caller.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::LlmError;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Cap on a single backoff sleep so retries never stall a run for long.
const DEFAULT_MAX_DELAY_MS: u64 = 8_000;
/// Jitter adds up to this fraction of the computed delay.
const JITTER_FRACTION: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct CallEnvelope {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for CallEnvelope {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl CallEnvelope {
    #[cfg(test)]
    pub fn with_timing(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Runs `operation` through the envelope. `f` must perform exactly one
    /// network round trip per invocation; the envelope re-invokes it on
    /// transient failures up to the attempt bound.
    pub async fn call<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let cid = Uuid::new_v4();
        let start = Instant::now();
        info!(operation, correlation_id = %cid, "llm call start");

        let mut attempt = 1u32;
        loop {
            match f().await {
                Ok(result) => {
                    info!(
                        operation,
                        correlation_id = %cid,
                        duration_ms = start.elapsed().as_millis() as u64,
                        attempt,
                        "llm call success"
                    );
                    return Ok(result);
                }
                Err(e) => {
                    if !e.is_transient() || attempt >= self.max_attempts {
                        error!(
                            operation,
                            correlation_id = %cid,
                            duration_ms = start.elapsed().as_millis() as u64,
                            attempt,
                            error = %e,
                            "llm call failure"
                        );
                        return Err(e);
                    }

                    let delay = self
                        .base_delay
                        .saturating_mul(1u32 << (attempt - 1))
                        .min(self.max_delay);
                    let jitter = delay.mul_f64(rand::thread_rng().gen_range(0.0..JITTER_FRACTION));
                    warn!(
                        operation,
                        correlation_id = %cid,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = (delay + jitter).as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay + jitter).await;
                    attempt += 1;
                }
            }
        }
    }
}
