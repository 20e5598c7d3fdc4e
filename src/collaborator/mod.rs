//! Seam to the permissions-recording proxy.
//!
//! The proxy observes outbound cloud API calls and accumulates a policy
//! document. This crate only launches it and reads snapshots of that
//! document; everything else about the proxy is opaque.

mod memory;
mod process;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::StaticPolicySource;
pub use process::ProcessPolicySource;

/// Policy document emitted when the proxy has observed nothing yet.
pub const EMPTY_POLICY: &str = r#"{"Version":"2012-10-17","Statement":[]}"#;

/// Snapshot of the accumulated permissions document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDocument {
    bytes: Vec<u8>,
}

impl PolicyDocument {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn empty() -> Self {
        Self::new(EMPTY_POLICY.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// How the proxy intercepts calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyMode {
    /// HTTP(S) man-in-the-middle proxy.
    #[default]
    Proxy,
    /// Client-side monitoring over UDP.
    Csm,
}

impl std::str::FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proxy" => Ok(Self::Proxy),
            "csm" => Ok(Self::Csm),
            other => Err(format!("unknown proxy mode: {other}")),
        }
    }
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::Csm => "csm",
        }
    }
}

/// Launch parameters for the proxy.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Interface host the proxy listens on.
    pub host: String,
    /// Listen address for proxied traffic.
    pub bind_addr: String,
    pub ca_bundle: PathBuf,
    pub ca_key: PathBuf,
    pub mode: ProxyMode,
    /// Where the proxy writes its accumulated document.
    pub output_file: PathBuf,
    /// Seconds between document refreshes; 0 leaves the proxy default.
    pub refresh_rate: u64,
    pub sort_alphabetical: bool,
    pub fails_only: bool,
    pub force_wildcard_resource: bool,
    /// Pause after launching so the proxy is listening before the function runs.
    pub startup_delay: Duration,
    /// How long a snapshot waits for the proxy to rewrite its document.
    pub flush_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            bind_addr: "127.0.0.1:10080".to_string(),
            ca_bundle: PathBuf::from("/tmp/iamlive-ca.pem"),
            ca_key: PathBuf::from("/tmp/iamlive-ca.key"),
            mode: ProxyMode::Proxy,
            output_file: PathBuf::from("/tmp/iamlive-policy.json"),
            refresh_rate: 0,
            sort_alphabetical: false,
            fails_only: false,
            force_wildcard_resource: false,
            startup_delay: Duration::from_secs(3),
            flush_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("failed to launch proxy `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("proxy already started")]
    AlreadyStarted,

    #[error("proxy exited: {0}")]
    Exited(String),

    #[error("failed to signal proxy: {0}")]
    Signal(String),

    #[error("failed to read policy document {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The two operations this crate needs from the proxy.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Launch the proxy. Called once, before registration.
    async fn start(&self, config: &ProxyConfig) -> Result<(), CollaboratorError>;

    /// Current accumulated document. Safe to call repeatedly.
    async fn snapshot(&self) -> Result<PolicyDocument, CollaboratorError>;
}
