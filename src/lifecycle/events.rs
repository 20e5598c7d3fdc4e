//! Wire types for the host's extension lifecycle API.

use serde::{Deserialize, Serialize};

/// Request header naming the extension at registration.
pub const EXTENSION_NAME_HEADER: &str = "Lambda-Extension-Name";
/// Header carrying the identifier issued at registration.
pub const EXTENSION_ID_HEADER: &str = "Lambda-Extension-Identifier";

/// Lifecycle events an extension can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Invoke,
    Shutdown,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub events: &'a [EventKind],
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegisterResponse {
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub function_version: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
}

/// This process's registration with the host. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    extension_id: String,
    function_name: Option<String>,
    function_version: Option<String>,
    handler: Option<String>,
}

impl Registration {
    pub fn new(extension_id: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            function_name: None,
            function_version: None,
            handler: None,
        }
    }

    pub(crate) fn with_details(extension_id: String, details: RegisterResponse) -> Self {
        Self {
            extension_id,
            function_name: details.function_name,
            function_version: details.function_version,
            handler: details.handler,
        }
    }

    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    pub fn function_name(&self) -> Option<&str> {
        self.function_name.as_deref()
    }

    pub fn function_version(&self) -> Option<&str> {
        self.function_version.as_deref()
    }

    pub fn handler(&self) -> Option<&str> {
        self.handler.as_deref()
    }
}

/// Directive returned by the next-event long poll.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "eventType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlEvent {
    Invoke(InvokeEvent),
    Shutdown(ShutdownEvent),
}

impl ControlEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Invoke(_) => EventKind::Invoke,
            Self::Shutdown(_) => EventKind::Shutdown,
        }
    }

    /// Epoch milliseconds by which the host expects the extension to be done.
    pub fn deadline_ms(&self) -> u64 {
        match self {
            Self::Invoke(e) => e.deadline_ms,
            Self::Shutdown(e) => e.deadline_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeEvent {
    pub deadline_ms: u64,
    pub request_id: String,
    #[serde(default)]
    pub invoked_function_arn: String,
    #[serde(default)]
    pub tracing: Option<TraceContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TraceContext {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownEvent {
    pub deadline_ms: u64,
    #[serde(default)]
    pub shutdown_reason: ShutdownReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownReason {
    #[default]
    Spindown,
    Timeout,
    Failure,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Spindown => "spindown",
            Self::Timeout => "timeout",
            Self::Failure => "failure",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}
