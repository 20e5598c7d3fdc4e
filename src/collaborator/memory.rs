//! In-memory policy source.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{CollaboratorError, PolicyDocument, PolicySource, ProxyConfig};

/// Serves a fixed document. Used for dry runs and tests.
pub struct StaticPolicySource {
    document: RwLock<PolicyDocument>,
    started: AtomicBool,
    snapshots: AtomicUsize,
    snapshot_delay: Duration,
}

impl StaticPolicySource {
    pub fn new(document: PolicyDocument) -> Self {
        Self {
            document: RwLock::new(document),
            started: AtomicBool::new(false),
            snapshots: AtomicUsize::new(0),
            snapshot_delay: Duration::ZERO,
        }
    }

    /// Make every snapshot take at least `delay`, like a slow proxy.
    pub fn with_snapshot_delay(mut self, delay: Duration) -> Self {
        self.snapshot_delay = delay;
        self
    }

    /// Replace the document returned by later snapshots.
    pub fn set_document(&self, document: PolicyDocument) {
        *self.document.write() = document;
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Number of snapshots taken so far.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.load(Ordering::Acquire)
    }
}

impl Default for StaticPolicySource {
    fn default() -> Self {
        Self::new(PolicyDocument::empty())
    }
}

#[async_trait]
impl PolicySource for StaticPolicySource {
    async fn start(&self, _config: &ProxyConfig) -> Result<(), CollaboratorError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(CollaboratorError::AlreadyStarted);
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<PolicyDocument, CollaboratorError> {
        self.snapshots.fetch_add(1, Ordering::AcqRel);
        if !self.snapshot_delay.is_zero() {
            tokio::time::sleep(self.snapshot_delay).await;
        }
        Ok(self.document.read().clone())
    }
}
