use std::future::Future;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{HvError, HvResult};

/// Bounded retry for transient transport failures.
///
/// Only errors for which [`HvError::is_retryable`] holds are retried; everything
/// else surfaces on the first attempt. Retries run inline in the caller's task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,

    /// Sleep between attempts
    #[serde(with = "humantime_serde")]
    pub retry_sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_sleep: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_sleep: Duration) -> Self {
        Self {
            max_retries,
            retry_sleep,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_sleep(mut self, sleep: Duration) -> Self {
        self.retry_sleep = sleep;
        self
    }

    /// Run `op`, retrying while it fails with a retryable error.
    pub async fn run<T, F, Fut>(&self, operation: &str, op: F) -> HvResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HvResult<T>>,
    {
        let backoff = ConstantBuilder::default()
            .with_delay(self.retry_sleep)
            .with_max_times(self.max_retries as usize);

        op.retry(backoff)
            .when(HvError::is_retryable)
            .notify(|err: &HvError, sleep: Duration| {
                warn!(operation, error = %err, ?sleep, "retrying after transient failure");
            })
            .await
    }
}
