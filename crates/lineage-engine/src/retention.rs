//! Background retention sweep
//!
//! A single thread that applies a fixed policy every interval and, when an
//! audit window is set, hard-purges versions soft-deleted before it. The
//! thread stops promptly on `shutdown` or drop.

#![allow(clippy::result_large_err)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lineage_core::errors::{ExError, ExErrorKind, ExResult};
use lineage_core::retention::RetentionPolicy;

use crate::service::VersioningService;

#[derive(Debug, Clone)]
pub struct SweepSchedule {
    pub policy: RetentionPolicy,
    pub interval: Duration,
    /// Purge soft-deleted versions older than this after each sweep
    pub audit_window: Option<chrono::Duration>,
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    /// Sleep up to `timeout`; true once a stop was requested
    fn wait(&self, timeout: Duration) -> bool {
        let stopped = self
            .stopped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (stopped, _) = self
            .wake
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *stopped
    }

    fn stop(&self) {
        *self
            .stopped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = true;
        self.wake.notify_all();
    }
}

pub struct RetentionSweeper {
    signal: Arc<StopSignal>,
    sweeps: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl RetentionSweeper {
    /// Start sweeping; the first sweep runs after one interval
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an invalid policy or a zero interval, `Io` when
    /// the thread cannot be spawned.
    pub fn spawn(service: Arc<VersioningService>, schedule: SweepSchedule) -> ExResult<Self> {
        schedule.policy.validate()?;
        if schedule.interval.is_zero() {
            return Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("retention_sweeper")
                .with_message("Sweep interval must be positive"));
        }

        let signal = Arc::new(StopSignal::default());
        let sweeps = Arc::new(AtomicU64::new(0));
        let thread_signal = signal.clone();
        let thread_sweeps = sweeps.clone();

        let handle = thread::Builder::new()
            .name("lineage-retention".to_string())
            .spawn(move || {
                while !thread_signal.wait(schedule.interval) {
                    sweep_once(&service, &schedule);
                    thread_sweeps.fetch_add(1, Ordering::Relaxed);
                }
                tracing::debug!("retention sweeper stopped");
            })
            .map_err(|e| {
                ExError::new(ExErrorKind::Io)
                    .with_op("retention_sweeper")
                    .with_message(e.to_string())
            })?;

        Ok(Self {
            signal,
            sweeps,
            handle: Some(handle),
        })
    }

    /// Completed sweeps so far
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.signal.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("retention sweeper panicked");
            }
        }
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn sweep_once(service: &VersioningService, schedule: &SweepSchedule) {
    // a failed sweep is retried at the next interval
    if let Err(e) = service.apply_retention(&schedule.policy) {
        tracing::warn!(error = %e, "retention sweep failed");
    }
    if let Some(window) = schedule.audit_window {
        if let Err(e) = service.purge_deleted(window) {
            tracing::warn!(error = %e, "purge of deleted versions failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineage_core::model::TransformationStep;
    use lineage_core::ports::TransformationEngine;
    use lineage_store::{FsObjectStore, SqliteMetadataStore};
    use std::time::Instant;
    use tempfile::TempDir;

    struct AppendRow;

    impl TransformationEngine for AppendRow {
        fn apply(&self, input: &[u8], steps: &[TransformationStep]) -> ExResult<Vec<u8>> {
            let mut out = input.to_vec();
            for step in steps {
                out.extend_from_slice(format!("{}\n", step.step_type).as_bytes());
            }
            Ok(out)
        }
    }

    #[test]
    fn test_sweeper_applies_policy_in_background() {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(SqliteMetadataStore::open_in_memory().unwrap());
        let objects = Arc::new(FsObjectStore::new(dir.path()));
        let service = Arc::new(VersioningService::new(metadata, objects, Arc::new(AppendRow)));

        let root = service.ingest(b"step\nraw\n", "t").unwrap();
        let child = service
            .apply_transformation(&root.version_id, vec![TransformationStep::new("clean")], "t")
            .unwrap();

        let sweeper = RetentionSweeper::spawn(
            service.clone(),
            SweepSchedule {
                policy: RetentionPolicy::new().with_max_versions_per_root(1),
                interval: Duration::from_millis(10),
                audit_window: None,
            },
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while service.get_version(&child.version_id).is_ok() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        sweeper.shutdown();

        assert_eq!(
            service.get_version(&child.version_id).unwrap_err().kind(),
            ExErrorKind::NotFound
        );
        assert!(service.get_version(&root.version_id).is_ok());
    }

    #[test]
    fn test_rejects_zero_interval_and_bad_policy() {
        let dir = TempDir::new().unwrap();
        let metadata = Arc::new(SqliteMetadataStore::open_in_memory().unwrap());
        let objects = Arc::new(FsObjectStore::new(dir.path()));
        let service = Arc::new(VersioningService::new(metadata, objects, Arc::new(AppendRow)));

        let zero = RetentionSweeper::spawn(
            service.clone(),
            SweepSchedule {
                policy: RetentionPolicy::new(),
                interval: Duration::ZERO,
                audit_window: None,
            },
        );
        assert!(zero.is_err());

        let bad = RetentionSweeper::spawn(
            service,
            SweepSchedule {
                policy: RetentionPolicy::new().with_max_versions_per_root(0),
                interval: Duration::from_secs(1),
                audit_window: None,
            },
        );
        assert_eq!(bad.err().map(|e| e.kind()), Some(ExErrorKind::InvalidInput));
    }
}
