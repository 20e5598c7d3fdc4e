//! Local HTTP endpoint the host pushes telemetry batches to.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::handler::{receive, BatchHandler, ReceiverFault};
use crate::lifecycle::Destination;
use crate::logs::LogQueue;
use crate::shutdown::{DrainOutcome, DrainTracker};

/// Configuration for the telemetry receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    pub bind_addr: SocketAddr,
    /// Host name the platform resolves to this process.
    pub advertised_host: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 1234)),
            advertised_host: "sandbox".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("failed to bind telemetry receiver on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("telemetry receiver stopped unexpectedly: {0}")]
    Serve(#[source] io::Error),

    #[error("telemetry receiver did not stop within {deadline:?} ({in_flight} requests in flight)")]
    ShutdownTimeout { deadline: Duration, in_flight: usize },

    #[error("telemetry receiver task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Fault(#[from] ReceiverFault),
}

/// A bound but not yet serving receiver.
pub struct TelemetryReceiver {
    listener: TcpListener,
    local_addr: SocketAddr,
    advertised_host: String,
    handler: BatchHandler,
    drain: Arc<DrainTracker>,
}

impl TelemetryReceiver {
    /// Bind the listening socket. Faults seen while serving are sent on
    /// `faults`.
    pub async fn bind(
        config: &ReceiverConfig,
        queue: Arc<LogQueue>,
        faults: mpsc::UnboundedSender<ReceiverFault>,
    ) -> Result<Self, ReceiverError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| ReceiverError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ReceiverError::Bind {
            addr: config.bind_addr,
            source,
        })?;

        let drain = Arc::new(DrainTracker::new());
        Ok(Self {
            listener,
            local_addr,
            advertised_host: config.advertised_host.clone(),
            handler: BatchHandler::new(queue, Arc::clone(&drain), faults),
            drain,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Where the host should deliver batches.
    pub fn destination(&self) -> Destination {
        Destination::http(&self.advertised_host, self.local_addr.port())
    }

    /// Start serving on a background task.
    pub fn start(self) -> ReceiverHandle {
        let app = Router::new()
            .route("/", post(receive))
            .route("/*path", post(receive))
            .with_state(self.handler);

        let stop = CancellationToken::new();
        let server_stop = stop.clone();
        let listener = self.listener;
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(server_stop.cancelled_owned())
                .await
        });

        info!(addr = %self.local_addr, "telemetry receiver listening");

        ReceiverHandle {
            local_addr: self.local_addr,
            stop,
            drain: self.drain,
            task,
        }
    }
}

/// Handle to a serving receiver.
pub struct ReceiverHandle {
    local_addr: SocketAddr,
    stop: CancellationToken,
    drain: Arc<DrainTracker>,
    task: JoinHandle<io::Result<()>>,
}

impl ReceiverHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn in_flight(&self) -> usize {
        self.drain.in_flight()
    }

    /// Stop accepting and wait up to `deadline` for in-flight requests.
    ///
    /// On timeout the server task is aborted before the error is returned.
    pub async fn shutdown(mut self, deadline: Duration) -> Result<(), ReceiverError> {
        let started = Instant::now();
        self.stop.cancel();

        if let DrainOutcome::TimedOut { in_flight } = self.drain.drain(deadline).await {
            self.task.abort();
            warn!(in_flight, "telemetry receiver shutdown timed out");
            return Err(ReceiverError::ShutdownTimeout {
                deadline,
                in_flight,
            });
        }

        let remaining = deadline.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, &mut self.task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(ReceiverError::Serve(e)),
            Ok(Err(e)) => Err(ReceiverError::Task(e.to_string())),
            Err(_) => {
                self.task.abort();
                warn!("telemetry receiver connections did not close in time");
                Err(ReceiverError::ShutdownTimeout {
                    deadline,
                    in_flight: self.drain.in_flight(),
                })
            }
        }
    }
}
