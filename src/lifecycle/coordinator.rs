//! Extension lifecycle: register, start the pipeline, poll, shut down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::ExtensionClient;
use super::events::{ControlEvent, EventKind, Registration, ShutdownReason};
use super::subscribe::{SubscriptionConfig, TelemetrySubscriber};
use crate::collaborator::{PolicySource, ProxyConfig};
use crate::error::ExtensionError;
use crate::logs::{
    ConsumerConfig, ConsumerError, ConsumerReport, LogQueue, LogQueueConfig, PolicyWriter,
    TelemetryConsumer,
};
use crate::receiver::{ReceiverConfig, ReceiverError, ReceiverFault, ReceiverHandle, TelemetryReceiver};
use crate::telemetry;

/// Coordinator state. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Init,
    Registered,
    Polling,
    ShuttingDown,
    Terminated,
}

/// What ended the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// The host sent a shutdown event.
    Host(ShutdownReason),
    /// The cancellation token fired (signal).
    Cancelled,
    /// The consumer finished while the queue was still open.
    ConsumerExited,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub invocations: u64,
    pub trigger: ShutdownTrigger,
    pub consumer: ConsumerReport,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name registered with the host; must match the executable name.
    pub extension_name: String,
    pub receiver: ReceiverConfig,
    pub subscription: SubscriptionConfig,
    pub queue: LogQueueConfig,
    pub consumer: ConsumerConfig,
    pub proxy: ProxyConfig,
    /// Pause before stopping components so in-flight telemetry can land.
    pub shutdown_grace: Duration,
    /// Receiver shutdown deadline.
    pub shutdown_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            extension_name: "policy-tap".to_string(),
            receiver: ReceiverConfig::default(),
            subscription: SubscriptionConfig::default(),
            queue: LogQueueConfig::default(),
            consumer: ConsumerConfig::default(),
            proxy: ProxyConfig::default(),
            shutdown_grace: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

/// Started pipeline components.
struct Pipeline {
    queue: Arc<LogQueue>,
    receiver: ReceiverHandle,
    faults: mpsc::UnboundedReceiver<ReceiverFault>,
    consumer: tokio::task::JoinHandle<Result<ConsumerReport, ConsumerError>>,
    consumer_stop: CancellationToken,
}

/// Drives one extension process from launch to exit.
pub struct Coordinator {
    config: CoordinatorConfig,
    client: ExtensionClient,
    source: Arc<dyn PolicySource>,
    writer: PolicyWriter,
    cancel: CancellationToken,
    state: watch::Sender<LifecycleState>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        client: ExtensionClient,
        source: Arc<dyn PolicySource>,
        writer: PolicyWriter,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Init);
        Self {
            config,
            client,
            source,
            writer,
            cancel,
            state,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: LifecycleState) {
        let prev = self.state.send_replace(next);
        debug!(from = ?prev, to = ?next, "lifecycle transition");
    }

    /// Run until the host shuts the extension down, the token is cancelled,
    /// or a component fails.
    ///
    /// Once the pipeline has started, the shutdown sequence always runs,
    /// including on failure.
    pub async fn run(&self) -> Result<RunReport, ExtensionError> {
        self.source.start(&self.config.proxy).await?;

        let delay = self.config.proxy.startup_delay;
        if !delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.cancel.cancelled() => {
                    info!("cancelled before registration");
                    self.set_state(LifecycleState::Terminated);
                    return Ok(RunReport {
                        invocations: 0,
                        trigger: ShutdownTrigger::Cancelled,
                        consumer: ConsumerReport::default(),
                    });
                }
            }
        }

        let registration = self
            .client
            .register(
                &self.config.extension_name,
                &[EventKind::Invoke, EventKind::Shutdown],
            )
            .await?;
        info!(
            extension_id = registration.extension_id(),
            function = registration.function_name(),
            version = registration.function_version(),
            "registered extension"
        );
        self.set_state(LifecycleState::Registered);

        let Pipeline {
            queue,
            receiver,
            mut faults,
            consumer: mut consumer_task,
            consumer_stop,
        } = self.start_pipeline(&registration).await?;
        self.set_state(LifecycleState::Polling);

        let mut invocations = 0u64;
        let mut consumer_exit: Option<Result<ConsumerReport, ConsumerError>> = None;
        let polled: Result<ShutdownTrigger, ExtensionError> = loop {
            tokio::select! {
                biased;
                Some(fault) = faults.recv() => {
                    break Err(ReceiverError::Fault(fault).into());
                }
                joined = &mut consumer_task, if consumer_exit.is_none() => {
                    consumer_exit = Some(flatten_consumer(joined));
                    break Ok(ShutdownTrigger::ConsumerExited);
                }
                event = self.client.next_event(&registration, &self.cancel) => match event {
                    Ok(Some(ControlEvent::Invoke(invoke))) => {
                        invocations += 1;
                        telemetry::record_invocation();
                        debug!(request_id = %invoke.request_id, "invoke event");
                    }
                    Ok(Some(ControlEvent::Shutdown(shutdown))) => {
                        info!(reason = %shutdown.shutdown_reason, "shutdown event received");
                        break Ok(ShutdownTrigger::Host(shutdown.shutdown_reason));
                    }
                    Ok(None) => {
                        info!("cancelled while polling");
                        break Ok(ShutdownTrigger::Cancelled);
                    }
                    Err(e) => break Err(e.into()),
                },
            }
        };

        self.set_state(LifecycleState::ShuttingDown);
        if !self.config.shutdown_grace.is_zero() {
            tokio::time::sleep(self.config.shutdown_grace).await;
        }

        consumer_stop.cancel();
        let receiver_result = receiver.shutdown(self.config.shutdown_timeout).await;
        // Deliveries refused after the poll loop ended are still fatal.
        let late_fault = faults.try_recv().ok();
        queue.close();
        let consumer_result = match consumer_exit {
            Some(result) => result,
            None => flatten_consumer(consumer_task.await),
        };
        self.set_state(LifecycleState::Terminated);

        let trigger = polled?;
        if let Some(fault) = late_fault {
            return Err(ReceiverError::Fault(fault).into());
        }
        let consumer = consumer_result?;
        receiver_result?;

        Ok(RunReport {
            invocations,
            trigger,
            consumer,
        })
    }

    /// Receiver, then subscription, then consumer.
    async fn start_pipeline(&self, registration: &Registration) -> Result<Pipeline, ExtensionError> {
        let queue = Arc::new(LogQueue::new(self.config.queue.clone()));
        let (fault_tx, faults) = mpsc::unbounded_channel();

        let receiver =
            TelemetryReceiver::bind(&self.config.receiver, Arc::clone(&queue), fault_tx).await?;
        let destination = receiver.destination();
        let receiver = receiver.start();

        let subscriber = TelemetrySubscriber::new(&self.client);
        if let Err(e) = subscriber
            .subscribe(&self.config.subscription, &destination, registration)
            .await
        {
            if let Err(shutdown_err) = receiver.shutdown(self.config.shutdown_timeout).await {
                warn!(error = %shutdown_err, "receiver shutdown after failed subscription");
            }
            return Err(e.into());
        }
        info!(
            uri = destination.uri(),
            types = ?self.config.subscription.categories,
            "subscribed to telemetry"
        );

        let consumer_stop = CancellationToken::new();
        let consumer = TelemetryConsumer::new(
            Arc::clone(&queue),
            Arc::clone(&self.source),
            self.writer.clone(),
            self.config.consumer.clone(),
        )
        .spawn(consumer_stop.clone());

        Ok(Pipeline {
            queue,
            receiver,
            faults,
            consumer,
            consumer_stop,
        })
    }
}

fn flatten_consumer(
    joined: Result<Result<ConsumerReport, ConsumerError>, JoinError>,
) -> Result<ConsumerReport, ConsumerError> {
    joined.map_err(|e| ConsumerError::Task(e.to_string()))?
}
