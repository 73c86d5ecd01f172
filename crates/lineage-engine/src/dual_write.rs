//! Legacy dual-write mirror
//!
//! Ingest hands each new version's summary to a bounded queue and returns at
//! once; a dedicated worker thread writes the summaries to the legacy record
//! store. A failed or dropped write is logged as a `DualWriteWarning` and
//! never reaches the primary operation.

#![allow(clippy::result_large_err)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use lineage_core::errors::{ExError, ExErrorKind, ExResult};
use lineage_core::ports::{LegacyRecordStore, LegacySummary};
use lineage_core_types::schema::EVENT_DUAL_WRITE_WARNING;

/// Outcome of handing a summary to the mirror
#[derive(Debug, Clone)]
pub enum MirrorStatus {
    /// Accepted; it will be written in the background
    Queued,
    /// The legacy store will not see this version
    Stale(ExError),
    /// No legacy mirror is configured
    Disabled,
}

impl MirrorStatus {
    pub fn is_stale(&self) -> bool {
        matches!(self, MirrorStatus::Stale(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub queued: u64,
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

enum Message {
    Write(LegacySummary),
    Flush(SyncSender<()>),
}

pub struct LegacyMirror {
    sender: Mutex<Option<SyncSender<Message>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn warning(version_id: &str, message: &str) -> ExError {
    ExError::new(ExErrorKind::DualWriteWarning)
        .with_op("legacy_mirror")
        .with_entity_id(version_id)
        .with_message(message.to_string())
}

fn log_warning(err: &ExError) {
    tracing::warn!(
        event = EVENT_DUAL_WRITE_WARNING,
        err_code = err.code(),
        version_id = err.entity_id().unwrap_or_default(),
        error = %err,
        "legacy mirror is stale"
    );
}

impl LegacyMirror {
    /// Start the worker thread writing into `target`
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a zero capacity, `Io` when the thread cannot be
    /// spawned.
    pub fn spawn(target: Arc<dyn LegacyRecordStore>, capacity: usize) -> ExResult<Self> {
        if capacity == 0 {
            return Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("legacy_mirror")
                .with_message("Queue capacity must be at least 1"));
        }

        let (sender, receiver) = mpsc::sync_channel(capacity);
        let counters = Arc::new(Counters::default());
        let worker_counters = counters.clone();

        let worker = thread::Builder::new()
            .name("lineage-legacy-mirror".to_string())
            .spawn(move || run_worker(receiver, target, worker_counters))
            .map_err(|e| {
                ExError::new(ExErrorKind::Io)
                    .with_op("legacy_mirror")
                    .with_message(e.to_string())
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            counters,
        })
    }

    /// Queue a summary without waiting for the legacy store
    pub fn submit(&self, summary: LegacySummary) -> MirrorStatus {
        let version_id = summary.version_id.clone();
        let result = match lock(&self.sender).as_ref() {
            Some(sender) => sender.try_send(Message::Write(summary)),
            None => Err(TrySendError::Disconnected(Message::Write(summary))),
        };

        match result {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                MirrorStatus::Queued
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let err = warning(&version_id, "Legacy mirror queue is full");
                log_warning(&err);
                MirrorStatus::Stale(err)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let err = warning(&version_id, "Legacy mirror is shut down");
                log_warning(&err);
                MirrorStatus::Stale(err)
            }
        }
    }

    /// Block until every summary queued so far has been handled
    pub fn flush(&self) {
        let Some(sender) = lock(&self.sender).clone() else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        if sender.send(Message::Flush(ack_tx)).is_ok() {
            ack_rx.recv().ok();
        }
    }

    pub fn stats(&self) -> MirrorStats {
        MirrorStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Drain the queue and stop the worker; later submissions are stale
    pub fn shutdown(&self) {
        lock(&self.sender).take();
        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                tracing::error!("legacy mirror worker panicked");
            }
        }
    }
}

impl Drop for LegacyMirror {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    receiver: Receiver<Message>,
    target: Arc<dyn LegacyRecordStore>,
    counters: Arc<Counters>,
) {
    for message in receiver {
        match message {
            Message::Write(summary) => match target.write(&summary) {
                Ok(()) => {
                    counters.written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    let err = warning(&summary.version_id, "Legacy write failed").with_source(e);
                    log_warning(&err);
                }
            },
            Message::Flush(ack) => {
                ack.send(()).ok();
            }
        }
    }
}
