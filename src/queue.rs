//! Asynchronous dispatch of point writes.
//!
//! The pipeline hands points to [`QueuedWriter`] without waiting; a single
//! worker task writes them to the [`PointStore`] in FIFO order and retries
//! transient failures.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::domain::Record;
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::sink::{PointSink, PointStore, StoreError};

struct PendingWrite {
    series: String,
    record: Arc<Record>,
}

#[derive(Clone)]
pub struct QueuedWriter {
    tx: mpsc::Sender<PendingWrite>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriterStats {
    pub written: u64,
    pub failed: u64,
    pub retries: u64,
}

impl QueuedWriter {
    /// Spawns the worker. It exits once every `QueuedWriter` clone is dropped
    /// and the queue is drained.
    pub fn spawn(
        store: Arc<dyn PointStore>,
        policy: RetryPolicy,
        capacity: usize,
    ) -> (Self, JoinHandle<WriterStats>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(drain(rx, store, policy));
        (Self { tx }, handle)
    }
}

impl PointSink for QueuedWriter {
    fn write_point(&self, series: &str, record: Arc<Record>) -> Result<(), StoreError> {
        let pending = PendingWrite {
            series: series.to_string(),
            record,
        };
        match self.tx.try_send(pending) {
            Ok(()) => {
                metrics::POINTS_ENQUEUED.inc();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(StoreError::Transient("write queue full".into())),
            Err(TrySendError::Closed(_)) => Err(StoreError::Fatal("writer stopped".into())),
        }
    }
}

async fn drain(
    mut rx: mpsc::Receiver<PendingWrite>,
    store: Arc<dyn PointStore>,
    policy: RetryPolicy,
) -> WriterStats {
    let mut stats = WriterStats::default();
    while let Some(w) = rx.recv().await {
        let (result, retries) = write_with_retry(store.as_ref(), &policy, &w.series, &w.record).await;
        stats.retries += u64::from(retries);
        match result {
            Ok(()) => {
                stats.written += 1;
                metrics::POINTS_WRITTEN.inc();
            }
            Err(e) => {
                stats.failed += 1;
                metrics::POINTS_FAILED.inc();
                tracing::error!(
                    series = %w.series,
                    error = %e,
                    "point lost: {}",
                    w.record
                );
            }
        }
    }
    tracing::debug!(?stats, "write queue drained");
    stats
}

/// Writes one point, retrying transient failures per `policy`.
///
/// Returns the final result and the number of retries made.
pub async fn write_with_retry(
    store: &dyn PointStore,
    policy: &RetryPolicy,
    series: &str,
    record: &Record,
) -> (Result<(), StoreError>, u32) {
    let mut retries = 0;
    loop {
        match store.write_point(series, record).await {
            Ok(()) => {
                if retries > 0 {
                    tracing::info!(series, retries, "write recovered after retry");
                }
                return (Ok(()), retries);
            }
            Err(e) if e.is_transient() && retries < policy.max_attempts => {
                retries += 1;
                let delay = policy.delay_for_attempt(retries);
                tracing::warn!(
                    series,
                    attempt = retries,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "write failed, retrying"
                );
                metrics::STORE_RETRIES.inc();
                tokio::time::sleep(delay).await;
            }
            Err(e) => return (Err(e), retries),
        }
    }
}
