//! policy-tap
//!
//! A serverless extension that runs next to a function, watches the
//! platform's telemetry stream for the end of each invocation, and prints the
//! permissions document accumulated by a recording proxy at that point.
//!
//! # Flow
//!
//! - Launch the proxy ([`collaborator`]), then register with the host
//!   ([`lifecycle`]).
//! - Bind the local [`receiver`], subscribe it to the host's logs API, and
//!   start the [`logs`] consumer.
//! - Long-poll for control events until the host asks for shutdown or a
//!   signal arrives, then drain and stop within a deadline.
//!
//! # Output
//!
//! - stdout: one `[<name>] Result IAM Policy: <json>` line per finished
//!   invocation.
//! - stderr: structured logs ([`telemetry`]).

pub mod collaborator;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logs;
pub mod receiver;
pub mod shutdown;
pub mod telemetry;

pub use error::ExtensionError;
pub use lifecycle::{Coordinator, CoordinatorConfig, LifecycleState, RunReport, ShutdownTrigger};
