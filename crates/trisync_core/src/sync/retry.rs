//! Timeouts and in-cycle retries for filesystem and remote calls.

use std::future::Future;
use std::time::Duration;

use log::debug;

use crate::config::SyncOptions;
use crate::error::{Result, SyncError};

/// Bounds every call by a timeout and retries transient failures with
/// exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on one attempt.
    pub timeout: Duration,
    /// Extra attempts after a transient failure.
    pub retries: u32,
    /// Delay before the first retry, doubled after each one.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Policy derived from the runtime options.
    pub fn from_options(options: &SyncOptions) -> Self {
        Self {
            timeout: options.io_timeout,
            retries: options.transient_retries,
            backoff: options.retry_backoff,
        }
    }

    /// Run `op` until it succeeds, fails for good, or the retries run out.
    /// A timed out attempt fails with [`SyncError::Timeout`], which is transient.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.backoff;
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(self.timeout)),
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    debug!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        what, e, attempt, self.retries, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                other => return other,
            }
        }
    }
}
