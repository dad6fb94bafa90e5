use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{CounterIncrement, CounterStore, StoreError};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// Single funnel for every counter-store call made by the limiter.
///
/// A call that errors or exceeds `timeout` is logged and reported as `None`
/// (or `false`); callers treat that as "fail open". No store error ever
/// escapes this type.
#[derive(Clone)]
pub struct ResilientCounterStore {
    inner: Arc<dyn CounterStore>,
    timeout: Duration,
}

impl ResilientCounterStore {
    pub fn new(inner: Arc<dyn CounterStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// `None` means the store is degraded.
    pub async fn get_counts(&self, operation: &'static str, keys: &[String]) -> Option<Vec<u64>> {
        let expected = keys.len();
        self.guarded(operation, async {
            let counts = self.inner.get_counts(keys).await?;
            if counts.len() != expected {
                return Err(StoreError::ShortRead {
                    expected,
                    actual: counts.len(),
                });
            }
            Ok(counts)
        })
        .await
    }

    /// Returns whether the increments landed.
    pub async fn increment_all(
        &self,
        operation: &'static str,
        increments: &[CounterIncrement],
    ) -> bool {
        self.guarded(operation, self.inner.increment_all(increments))
            .await
            .is_some()
    }

    pub async fn ping(&self) -> bool {
        self.guarded("ping", self.inner.ping()).await.is_some()
    }

    async fn guarded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Option<T> {
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(
                    operation = operation,
                    error = %err,
                    "counter store unavailable; failing open"
                );
                None
            }
        }
    }
}
