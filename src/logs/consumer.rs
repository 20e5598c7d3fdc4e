//! Consumer loop: drain batches, decode them, snapshot on invocation end.
//!
//! The consumer runs as its own task. It stops racing the stop token once
//! signalled and then drains whatever the queue still holds, returning when
//! the queue reports end of stream.

use std::io::Write;
use std::sync::Arc;
use std::str::FromStr;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::item::decode_batch;
use super::queue::{LogQueue, TelemetryBatch};
use crate::collaborator::{CollaboratorError, PolicySource};
use crate::telemetry;

/// What to do with a batch that is not a JSON array of log items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodePolicy {
    /// Stop the consumer with an error. The extension exits and is restarted.
    #[default]
    FailFast,
    /// Log a warning, count the batch as dropped, keep going.
    Skip,
}

impl FromStr for DecodePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-fast" | "failfast" | "fail_fast" => Ok(Self::FailFast),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown decode policy: {other}")),
        }
    }
}

/// Configuration for the consumer loop.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Batches taken from the queue per wake-up.
    pub batch_size: usize,
    pub decode_policy: DecodePolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            decode_policy: DecodePolicy::FailFast,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Draining,
    Stopped,
}

/// Counters returned when the consumer finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub batches: u64,
    pub items: u64,
    pub snapshots: u64,
    pub dropped: u64,
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to decode telemetry batch #{batch}: {source}")]
    Decode {
        batch: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("policy snapshot failed: {0}")]
    Snapshot(#[from] CollaboratorError),

    #[error("policy snapshot is not valid JSON: {0}")]
    Compact(#[source] serde_json::Error),

    #[error("failed to emit policy: {0}")]
    Emit(#[from] std::io::Error),

    #[error("consumer task failed: {0}")]
    Task(String),
}

/// Writes one compacted policy document per line.
#[derive(Clone)]
pub struct PolicyWriter {
    prefix: String,
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl PolicyWriter {
    pub fn new(prefix: impl Into<String>, out: impl Write + Send + 'static) -> Self {
        Self {
            prefix: prefix.into(),
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    pub fn stdout(prefix: impl Into<String>) -> Self {
        Self::new(prefix, std::io::stdout())
    }

    pub fn emit(&self, compact_policy: &str) -> std::io::Result<()> {
        let mut out = self.out.lock();
        writeln!(out, "{} Result IAM Policy: {}", self.prefix, compact_policy)?;
        out.flush()
    }
}

/// Re-serialize a JSON document without insignificant whitespace.
/// Key order is preserved.
pub fn compact_json(document: &[u8]) -> Result<String, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_slice(document)?;
    serde_json::to_string(&value)
}

/// Drains the log queue and emits a policy snapshot per finished invocation.
pub struct TelemetryConsumer {
    queue: Arc<LogQueue>,
    source: Arc<dyn PolicySource>,
    writer: PolicyWriter,
    config: ConsumerConfig,
    state: ConsumerState,
    report: ConsumerReport,
}

impl TelemetryConsumer {
    pub fn new(
        queue: Arc<LogQueue>,
        source: Arc<dyn PolicySource>,
        writer: PolicyWriter,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            source,
            writer,
            config,
            state: ConsumerState::Draining,
            report: ConsumerReport::default(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Spawn the loop. The handle resolves when the queue is drained or on
    /// the first fatal error.
    pub fn spawn(
        self,
        stop: CancellationToken,
    ) -> JoinHandle<Result<ConsumerReport, ConsumerError>> {
        tokio::spawn(self.run(stop))
    }

    pub async fn run(mut self, stop: CancellationToken) -> Result<ConsumerReport, ConsumerError> {
        let batch_size = self.config.batch_size;

        loop {
            let next = match self.state {
                ConsumerState::Draining => tokio::select! {
                    biased;
                    () = stop.cancelled() => {
                        tracing::debug!(pending = self.queue.len(), "consumer: stop requested, draining");
                        self.state = ConsumerState::Stopped;
                        continue;
                    }
                    next = self.queue.get(batch_size) => next,
                },
                ConsumerState::Stopped => self.queue.get(batch_size).await,
            };

            let Some(batches) = next else { break };
            for batch in batches {
                self.process_batch(batch).await?;
            }
        }

        self.state = ConsumerState::Stopped;
        tracing::debug!(
            batches = self.report.batches,
            snapshots = self.report.snapshots,
            dropped = self.report.dropped,
            "consumer: queue drained"
        );
        Ok(self.report)
    }

    async fn process_batch(&mut self, batch: TelemetryBatch) -> Result<(), ConsumerError> {
        self.report.batches += 1;
        let sequence = self.report.batches;

        let items = match decode_batch(&batch) {
            Ok(items) => items,
            Err(source) => match self.config.decode_policy {
                DecodePolicy::FailFast => {
                    return Err(ConsumerError::Decode { batch: sequence, source });
                }
                DecodePolicy::Skip => {
                    self.report.dropped += 1;
                    telemetry::record_dropped_batch();
                    tracing::warn!(
                        batch = sequence,
                        bytes = batch.len(),
                        dropped = self.report.dropped,
                        error = %source,
                        "skipping undecodable telemetry batch"
                    );
                    return Ok(());
                }
            },
        };

        self.report.items += items.len() as u64;
        for item in items.iter().filter(|item| item.is_runtime_done()) {
            tracing::debug!(time = item.time.as_deref(), "invocation finished");
            self.emit_snapshot().await?;
        }
        Ok(())
    }

    async fn emit_snapshot(&mut self) -> Result<(), ConsumerError> {
        let document = self.source.snapshot().await?;
        let compact = compact_json(document.as_bytes()).map_err(ConsumerError::Compact)?;
        self.writer.emit(&compact)?;
        self.report.snapshots += 1;
        telemetry::record_snapshot();
        Ok(())
    }
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
