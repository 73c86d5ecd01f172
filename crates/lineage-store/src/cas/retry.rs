//! Bounded exponential-backoff retries at the object-storage boundary
//!
//! Only errors the store marks retryable (`StorageFailure`, `Io`) are
//! retried; everything else, including `NotFound`, returns immediately.

#![allow(clippy::result_large_err)]

use crate::errors::Result;
use lineage_core::ports::ObjectStore;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            backoff_multiplier: 2.0,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(base.min(self.max_backoff_ms as f64).max(0.0) as u64)
    }
}

/// Wraps an object store and retries its transient failures
pub struct RetryingObjectStore<S> {
    inner: S,
    config: RetryConfig,
}

impl<S: ObjectStore> RetryingObjectStore<S> {
    pub fn new(inner: S, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn with_retry<T>(&self, op: &str, operation: impl Fn() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        op,
                        attempt = attempt + 1,
                        max = self.config.max_retries,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient storage error"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<S: ObjectStore> ObjectStore for RetryingObjectStore<S> {
    fn put(&self, bytes: &[u8]) -> Result<String> {
        self.with_retry("object_put", || self.inner.put(bytes))
    }

    fn get(&self, location: &str) -> Result<Vec<u8>> {
        self.with_retry("object_get", || self.inner.get(location))
    }

    fn delete(&self, location: &str) -> Result<()> {
        self.with_retry("object_delete", || self.inner.delete(location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineage_core::errors::{ExError, ExErrorKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls with the given kind
    struct Flaky {
        failures: u32,
        kind: ExErrorKind,
        calls: AtomicU32,
    }

    impl ObjectStore for Flaky {
        fn put(&self, _bytes: &[u8]) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ExError::new(self.kind))
            } else {
                Ok("loc".to_string())
            }
        }

        fn get(&self, _location: &str) -> Result<Vec<u8>> {
            Err(ExError::new(ExErrorKind::NotFound))
        }

        fn delete(&self, _location: &str) -> Result<()> {
            Ok(())
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            backoff_multiplier: 2.0,
            max_backoff_ms: 4,
        }
    }

    fn flaky(failures: u32, kind: ExErrorKind) -> RetryingObjectStore<Flaky> {
        RetryingObjectStore::new(
            Flaky {
                failures,
                kind,
                calls: AtomicU32::new(0),
            },
            fast(),
        )
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = RetryConfig {
            max_retries: 5,
            initial_backoff_ms: 10,
            backoff_multiplier: 2.0,
            max_backoff_ms: 50,
        };
        assert_eq!(config.backoff(0), Duration::from_millis(10));
        assert_eq!(config.backoff(1), Duration::from_millis(20));
        assert_eq!(config.backoff(2), Duration::from_millis(40));
        assert_eq!(config.backoff(3), Duration::from_millis(50));
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let store = flaky(2, ExErrorKind::StorageFailure);
        assert_eq!(store.put(b"x").unwrap(), "loc");
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retries_are_bounded() {
        let store = flaky(10, ExErrorKind::Io);
        let err = store.put(b"x").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Io);
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_permanent_failures_are_not_retried() {
        let store = flaky(10, ExErrorKind::InvalidInput);
        assert!(store.put(b"x").is_err());
        assert_eq!(store.inner().calls.load(Ordering::SeqCst), 1);
    }
}
