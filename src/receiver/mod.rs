//! Telemetry receiver: accepts pushed batches and enqueues them.

mod handler;
mod server;

pub use handler::{BatchHandler, ReceiverFault};
pub use server::{ReceiverConfig, ReceiverError, ReceiverHandle, TelemetryReceiver};
