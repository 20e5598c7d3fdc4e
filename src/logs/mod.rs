//! Telemetry log handling.
//!
//! The receiver pushes raw batches into the [`LogQueue`]; the
//! [`TelemetryConsumer`] drains it, decodes each batch into [`LogItem`]s and
//! reacts to the invocation-finished marker.

pub mod consumer;
mod item;
mod queue;

pub use consumer::{
    compact_json, ConsumerConfig, ConsumerError, ConsumerReport, ConsumerState, DecodePolicy,
    PolicyWriter, TelemetryConsumer,
};
pub use item::{decode_batch, LogItem, RUNTIME_DONE};
pub use queue::{LogQueue, LogQueueConfig, QueueError, TelemetryBatch};
