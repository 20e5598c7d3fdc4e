//! Top-level error and process exit codes.

use thiserror::Error;

use crate::collaborator::CollaboratorError;
use crate::config::ConfigError;
use crate::lifecycle::{LifecycleError, SubscribeError};
use crate::logs::ConsumerError;
use crate::receiver::ReceiverError;
use crate::telemetry::LogError;

/// Exit code for a fatal runtime condition.
pub const EXIT_FAILURE: u8 = 1;
/// Exit code for invalid or missing configuration.
pub const EXIT_CONFIG: u8 = 2;

#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("logging setup failed: {0}")]
    Logging(#[from] LogError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("telemetry subscription failed: {0}")]
    Subscribe(#[from] SubscribeError),

    #[error(transparent)]
    Receiver(#[from] ReceiverError),

    #[error("telemetry consumer failed: {0}")]
    Consumer(#[from] ConsumerError),

    #[error("proxy error: {0}")]
    Collaborator(#[from] CollaboratorError),
}

impl ExtensionError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Logging(_) => EXIT_CONFIG,
            _ => EXIT_FAILURE,
        }
    }

    /// True for failures that happen before the poll loop starts.
    pub fn is_startup(&self) -> bool {
        match self {
            Self::Config(_) | Self::Logging(_) | Self::Subscribe(_) | Self::Collaborator(_) => {
                true
            }
            Self::Lifecycle(e) => e.is_registration(),
            Self::Receiver(ReceiverError::Bind { .. }) => true,
            _ => false,
        }
    }
}
