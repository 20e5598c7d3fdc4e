//! Per-request handling for pushed telemetry batches.
//!
//! Nothing on the success path may log: the host turns extension output into
//! telemetry, which would be pushed straight back here.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::StatusCode;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::error;

use crate::logs::{LogQueue, QueueError};
use crate::shutdown::DrainTracker;
use crate::telemetry;

/// Unrecoverable receiver condition, reported to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiverFault {
    #[error("failed to enqueue telemetry batch: {0}")]
    Enqueue(QueueError),

    #[error("failed to read telemetry batch body: {0}")]
    Body(String),
}

/// Moves request bodies onto the queue.
#[derive(Clone)]
pub struct BatchHandler {
    queue: Arc<LogQueue>,
    drain: Arc<DrainTracker>,
    faults: mpsc::UnboundedSender<ReceiverFault>,
}

impl BatchHandler {
    pub fn new(
        queue: Arc<LogQueue>,
        drain: Arc<DrainTracker>,
        faults: mpsc::UnboundedSender<ReceiverFault>,
    ) -> Self {
        Self {
            queue,
            drain,
            faults,
        }
    }

    /// Enqueue one batch and pick the status to acknowledge it with.
    pub fn handle(&self, body: Bytes) -> StatusCode {
        let Some(_guard) = self.drain.begin() else {
            return StatusCode::SERVICE_UNAVAILABLE;
        };

        let len = body.len();
        match self.queue.put(body) {
            Ok(()) => {
                telemetry::record_batch_received(len);
                telemetry::record_queue_depth(self.queue.len());
                StatusCode::OK
            }
            Err(e) => {
                error!(error = %e, "cannot push telemetry batch to queue");
                self.report(ReceiverFault::Enqueue(e));
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn reject(&self, rejection: BytesRejection) -> StatusCode {
        let Some(_guard) = self.drain.begin() else {
            return StatusCode::SERVICE_UNAVAILABLE;
        };

        error!(error = %rejection, "error reading telemetry batch body");
        self.report(ReceiverFault::Body(rejection.body_text()));
        StatusCode::INTERNAL_SERVER_ERROR
    }

    fn report(&self, fault: ReceiverFault) {
        // The coordinator may already be gone during teardown.
        let _ = self.faults.send(fault);
    }
}

pub(crate) async fn receive(
    State(handler): State<BatchHandler>,
    body: Result<Bytes, BytesRejection>,
) -> StatusCode {
    match body {
        Ok(body) => handler.handle(body),
        Err(rejection) => handler.reject(rejection),
    }
}
