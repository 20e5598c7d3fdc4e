//! Ambient observability for the extension.
//!
//! Logs go to stderr so stdout carries only emitted policy lines. Metrics use
//! the `metrics` facade and stay inert unless a recorder is installed.
//!
//! The receiver's success path must not log: the host delivers extension log
//! output back through the telemetry feed, so each line would trigger another
//! delivery.

mod logging;
mod metrics;

pub use self::logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    record_batch_received, record_dropped_batch, record_invocation, record_queue_depth,
    record_snapshot,
};
