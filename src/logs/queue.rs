//! Log batch queue between the receiver and the consumer.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;

/// Raw body of one telemetry delivery, kept verbatim until decoded.
pub type TelemetryBatch = Bytes;

/// Configuration for the log queue.
#[derive(Debug, Clone)]
pub struct LogQueueConfig {
    /// Upper bound on undecoded batches. The host's buffering thresholds are
    /// the primary backpressure; this only caps memory if the consumer stalls.
    pub max_pending: usize,
}

impl Default for LogQueueConfig {
    fn default() -> Self {
        Self { max_pending: 1024 }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("log queue is closed")]
    Closed,

    #[error("log queue is full ({max} pending batches)")]
    Full { max: usize },
}

struct Inner {
    batches: VecDeque<TelemetryBatch>,
    closed: bool,
}

/// FIFO queue of telemetry batches for one producer and one consumer.
///
/// `put` never waits. `get` waits until a batch is available and, once the
/// queue is closed, keeps returning buffered batches until it is empty.
pub struct LogQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    config: LogQueueConfig,
}

impl LogQueue {
    pub fn new(config: LogQueueConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                batches: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            config,
        }
    }

    /// Append a batch.
    pub fn put(&self, batch: TelemetryBatch) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(QueueError::Closed);
        }
        if inner.batches.len() >= self.config.max_pending {
            return Err(QueueError::Full {
                max: self.config.max_pending,
            });
        }
        inner.batches.push_back(batch);
        drop(inner);

        self.notify.notify_one();
        Ok(())
    }

    /// Wait for up to `n` batches. Returns None once closed and drained.
    pub async fn get(&self, n: usize) -> Option<Vec<TelemetryBatch>> {
        loop {
            if let Some(taken) = self.take(n) {
                return taken;
            }
            self.notify.notified().await;
        }
    }

    /// Take up to `n` batches without waiting.
    ///
    /// `Some(None)` means end of stream, `None` means nothing is buffered yet.
    fn take(&self, n: usize) -> Option<Option<Vec<TelemetryBatch>>> {
        let mut inner = self.inner.lock();
        if !inner.batches.is_empty() {
            let count = n.max(1).min(inner.batches.len());
            return Some(Some(inner.batches.drain(..count).collect()));
        }
        if inner.closed {
            return Some(None);
        }
        None
    }

    /// Refuse further batches and wake the consumer. Idempotent.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().batches.is_empty()
    }

    pub fn max_pending(&self) -> usize {
        self.config.max_pending
    }
}

impl Default for LogQueue {
    fn default() -> Self {
        Self::new(LogQueueConfig::default())
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
