//! Host lifecycle integration.
//!
//! [`ExtensionClient`] speaks to the extensions API, [`TelemetrySubscriber`]
//! to the logs API, and [`Coordinator`] ties both to the local pipeline.

mod client;
mod coordinator;
mod events;
mod signals;
mod subscribe;

pub use client::{ExtensionClient, LifecycleError, EXTENSION_API_VERSION};
pub use coordinator::{
    Coordinator, CoordinatorConfig, LifecycleState, RunReport, ShutdownTrigger,
};
pub use events::{
    ControlEvent, EventKind, InvokeEvent, Registration, ShutdownEvent, ShutdownReason,
    TraceContext, EXTENSION_ID_HEADER, EXTENSION_NAME_HEADER,
};
pub use signals::{join_signal_listener, spawn_signal_listener};
pub use subscribe::{
    BufferingConfig, Destination, SubscribeError, SubscriptionConfig, TelemetryCategory,
    TelemetrySubscriber, LOGS_API_VERSION, MIN_MAX_BYTES, MIN_MAX_ITEMS, MIN_TIMEOUT_MS,
};
