//! Bounded timeout + retry wrapper for any regional store.
//!
//! Every call gets a per-attempt timeout and a fixed attempt budget with
//! exponential backoff. Only transient failures are retried. Once the budget is
//! spent the caller sees `StoreError::Unavailable`; callers never retry on top
//! of this.
//!
//! A retried `numeric_add` whose first attempt timed out after the store
//! applied it is counted twice. That is the same at-least-once gap the
//! replication layer has, and is not masked here.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use globalcat_core::{ItemKey, ReadMode, RegionCode, StoreSettings};

use crate::adapter::RegionalStore;
use crate::error::StoreError;
use crate::row::Row;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub call_timeout: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&StoreSettings::default())
    }
}

impl From<&StoreSettings> for RetryPolicy {
    fn from(s: &StoreSettings) -> Self {
        Self {
            max_attempts: s.max_attempts.max(1),
            call_timeout: s.call_timeout,
            base_backoff: s.base_backoff,
            max_backoff: s.max_backoff,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based), capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        std::cmp::min(self.base_backoff.saturating_mul(factor), self.max_backoff)
    }
}

/// Store decorator enforcing a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let max = self.policy.max_attempts;
        let mut last: Option<StoreError> = None;

        for attempt in 1..=max {
            let err = match tokio::time::timeout(self.policy.call_timeout, call()).await {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(op, attempt, "store call succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(err)) if !err.is_transient() => return Err(err),
                Ok(Err(err)) => err,
                Err(_) => StoreError::Timeout(self.policy.call_timeout),
            };

            warn!(op, attempt, max_attempts = max, error = %err, "store call failed");
            last = Some(err);

            if attempt < max {
                tokio::time::sleep(self.policy.backoff(attempt)).await;
            }
        }

        let reason = last
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        Err(StoreError::unavailable(format!(
            "{op} failed after {max} attempts: {reason}"
        )))
    }
}

#[async_trait]
impl<S> RegionalStore for RetryingStore<S>
where
    S: RegionalStore,
{
    fn region(&self) -> &RegionCode {
        self.inner.region()
    }

    async fn get(&self, key: &ItemKey, mode: ReadMode) -> Result<Option<Row>, StoreError> {
        self.run("get", || self.inner.get(key, mode)).await
    }

    async fn put(&self, row: Row) -> Result<(), StoreError> {
        self.run("put", || self.inner.put(row.clone())).await
    }

    async fn numeric_add(
        &self,
        key: &ItemKey,
        deltas: &BTreeMap<String, i64>,
    ) -> Result<Row, StoreError> {
        self.run("numeric_add", || self.inner.numeric_add(key, deltas))
            .await
    }

    async fn query(
        &self,
        partition: &str,
        sort_prefix: &str,
        mode: ReadMode,
    ) -> Result<Vec<Row>, StoreError> {
        self.run("query", || self.inner.query(partition, sort_prefix, mode))
            .await
    }
}
