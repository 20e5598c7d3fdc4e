//! Proxy running as a child process.
//!
//! The proxy keeps its document in memory and writes it to the output file
//! on SIGHUP. A snapshot signals the process and waits for the rewrite.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::de::IgnoredAny;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use super::{CollaboratorError, PolicyDocument, PolicySource, ProxyConfig};

const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(10);

struct Running {
    child: Child,
    output_file: PathBuf,
    flush_timeout: Duration,
}

/// Launches the proxy executable and reads the document it flushes to disk.
pub struct ProcessPolicySource {
    command: String,
    running: Mutex<Option<Running>>,
}

impl ProcessPolicySource {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            running: Mutex::new(None),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Command-line arguments for the given launch parameters.
    pub fn args(config: &ProxyConfig) -> Vec<String> {
        let mut args = vec![
            "--mode".to_string(),
            config.mode.as_str().to_string(),
            "--host".to_string(),
            config.host.clone(),
            "--bind-addr".to_string(),
            config.bind_addr.clone(),
            "--ca-bundle".to_string(),
            config.ca_bundle.display().to_string(),
            "--ca-key".to_string(),
            config.ca_key.display().to_string(),
            "--output-file".to_string(),
            config.output_file.display().to_string(),
        ];
        if config.refresh_rate > 0 {
            args.push("--refresh-rate".to_string());
            args.push(config.refresh_rate.to_string());
        }
        if config.sort_alphabetical {
            args.push("--sort-alphabetical".to_string());
        }
        if config.fails_only {
            args.push("--fails-only".to_string());
        }
        if config.force_wildcard_resource {
            args.push("--force-wildcard-resource".to_string());
        }
        args
    }
}

#[async_trait]
impl PolicySource for ProcessPolicySource {
    async fn start(&self, config: &ProxyConfig) -> Result<(), CollaboratorError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CollaboratorError::AlreadyStarted);
        }

        let child = Command::new(&self.command)
            .args(Self::args(config))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CollaboratorError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        tracing::info!(
            command = %self.command,
            bind_addr = %config.bind_addr,
            pid = child.id(),
            "proxy launched"
        );

        *running = Some(Running {
            child,
            output_file: config.output_file.clone(),
            flush_timeout: config.flush_timeout,
        });
        Ok(())
    }

    async fn snapshot(&self) -> Result<PolicyDocument, CollaboratorError> {
        let mut guard = self.running.lock().await;
        let running = guard
            .as_mut()
            .ok_or_else(|| CollaboratorError::Exited("proxy was never started".to_string()))?;

        match running.child.try_wait() {
            Ok(Some(status)) => return Err(CollaboratorError::Exited(status.to_string())),
            Ok(None) => {}
            Err(e) => return Err(CollaboratorError::Exited(e.to_string())),
        }

        let path = running.output_file.as_path();
        let before = fingerprint(path).await;
        request_flush(&running.child)?;

        let deadline = Instant::now() + running.flush_timeout;
        loop {
            if fingerprint(path).await != before {
                let document = read_document(path).await?;
                if is_complete(&document) {
                    return Ok(document);
                }
            }
            if Instant::now() >= deadline {
                warn!(
                    path = %path.display(),
                    timeout = ?running.flush_timeout,
                    "proxy did not rewrite its policy document in time"
                );
                return read_document(path).await;
            }
            tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
        }
    }
}

/// Ask the proxy to write its current document.
#[cfg(unix)]
fn request_flush(child: &Child) -> Result<(), CollaboratorError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = child
        .id()
        .ok_or_else(|| CollaboratorError::Exited("proxy has already been reaped".to_string()))?;
    kill(Pid::from_raw(pid as i32), Signal::SIGHUP)
        .map_err(|e| CollaboratorError::Signal(e.to_string()))
}

#[cfg(not(unix))]
fn request_flush(_child: &Child) -> Result<(), CollaboratorError> {
    Ok(())
}

/// Modification time and length, or None when the file does not exist.
async fn fingerprint(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// A rewrite caught halfway is not valid JSON yet.
fn is_complete(document: &PolicyDocument) -> bool {
    serde_json::from_slice::<IgnoredAny>(document.as_bytes()).is_ok()
}

/// Read a document file. Missing or blank files mean nothing was recorded yet.
pub(crate) async fn read_document(path: &Path) -> Result<PolicyDocument, CollaboratorError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(PolicyDocument::empty()),
        Ok(bytes) => Ok(PolicyDocument::new(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(PolicyDocument::empty()),
        Err(source) => Err(CollaboratorError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}
