//! In-process stand-in for the host's lifecycle and logs APIs.

#![allow(dead_code)]

use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use policy_tap::collaborator::ProxyConfig;
use policy_tap::receiver::ReceiverConfig;
use policy_tap::CoordinatorConfig;

pub const EXTENSION_ID: &str = "6f3bc0de-5b5d-4f5a-9b1e-policy-tap";

pub const RUNTIME_DONE_BATCH: &str = r#"[
    {"time":"2024-01-01T00:00:00.000Z","type":"platform.start","record":{"requestId":"req-1"}},
    {"time":"2024-01-01T00:00:00.120Z","type":"platform.runtimeDone","record":{"requestId":"req-1","status":"success"}}
]"#;

/// What the next-event endpoint does.
#[derive(Clone)]
pub enum Script {
    /// First poll: push `batches` to the subscribed destination, then answer
    /// INVOKE. Second poll: SHUTDOWN.
    InvokeThenShutdown { batches: Vec<String> },
    /// Never answer.
    Hang,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub header: Option<String>,
    pub body: Value,
}

struct HostState {
    script: Script,
    register_status: StatusCode,
    subscribe_status: StatusCode,
    registrations: Mutex<Vec<Recorded>>,
    subscriptions: Mutex<Vec<Recorded>>,
    polls: AtomicUsize,
    deliveries: Mutex<Vec<StatusCode>>,
}

pub struct MockHost {
    pub addr: SocketAddr,
    state: Arc<HostState>,
    task: JoinHandle<()>,
}

impl MockHost {
    pub async fn start(script: Script) -> Self {
        Self::start_with(script, StatusCode::OK, StatusCode::OK).await
    }

    pub async fn start_with(
        script: Script,
        register_status: StatusCode,
        subscribe_status: StatusCode,
    ) -> Self {
        let state = Arc::new(HostState {
            script,
            register_status,
            subscribe_status,
            registrations: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
            deliveries: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/2020-01-01/extension/register", post(register))
            .route("/2020-01-01/extension/event/next", get(next_event))
            .route("/2020-08-15/logs", put(subscribe))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, task }
    }

    /// `host:port`, as published in `AWS_LAMBDA_RUNTIME_API`.
    pub fn runtime_api(&self) -> String {
        self.addr.to_string()
    }

    pub fn registrations(&self) -> Vec<Recorded> {
        self.state.registrations.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<Recorded> {
        self.state.subscriptions.lock().clone()
    }

    pub fn polls(&self) -> usize {
        self.state.polls.load(Ordering::SeqCst)
    }

    /// Statuses the receiver answered pushed batches with.
    pub fn deliveries(&self) -> Vec<StatusCode> {
        self.state.deliveries.lock().clone()
    }
}

impl Drop for MockHost {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn register(State(state): State<Arc<HostState>>, headers: HeaderMap, body: Bytes) -> Response {
    state.registrations.lock().push(Recorded {
        header: header(&headers, "Lambda-Extension-Name"),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });

    if !state.register_status.is_success() {
        return (state.register_status, "registration refused").into_response();
    }

    let body = json!({
        "functionName": "demo-function",
        "functionVersion": "$LATEST",
        "handler": "index.handler"
    });
    (
        StatusCode::OK,
        [("Lambda-Extension-Identifier", EXTENSION_ID)],
        body.to_string(),
    )
        .into_response()
}

async fn subscribe(State(state): State<Arc<HostState>>, headers: HeaderMap, body: Bytes) -> Response {
    state.subscriptions.lock().push(Recorded {
        header: header(&headers, "Lambda-Extension-Identifier"),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });
    (state.subscribe_status, "OK").into_response()
}

async fn next_event(State(state): State<Arc<HostState>>) -> Response {
    let poll = state.polls.fetch_add(1, Ordering::SeqCst) + 1;

    match &state.script {
        Script::Hang => {
            std::future::pending::<()>().await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
        Script::InvokeThenShutdown { batches } if poll == 1 => {
            push_batches(&state, batches).await;
            json!({
                "eventType": "INVOKE",
                "deadlineMs": 1_700_000_003_000u64,
                "requestId": "req-1",
                "invokedFunctionArn": "arn:aws:lambda:us-east-1:123456789012:function:demo-function",
                "tracing": {"type": "X-Amzn-Trace-Id", "value": "Root=1-abc"}
            })
            .to_string()
            .into_response()
        }
        Script::InvokeThenShutdown { .. } => json!({
            "eventType": "SHUTDOWN",
            "shutdownReason": "spindown",
            "deadlineMs": 1_700_000_005_000u64
        })
        .to_string()
        .into_response(),
    }
}

async fn push_batches(state: &HostState, batches: &[String]) {
    let uri = state
        .subscriptions
        .lock()
        .last()
        .and_then(|s| s.body["destination"]["URI"].as_str().map(str::to_string));
    let Some(uri) = uri else { return };

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    for batch in batches {
        let status = client
            .post(&uri)
            .body(batch.clone())
            .send()
            .await
            .map(|r| r.status().as_u16())
            .unwrap_or(0);
        state
            .deliveries
            .lock()
            .push(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
    }
}

/// Coordinator settings for tests: loopback receiver, no proxy start delay,
/// short grace period.
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        extension_name: "policy-tap".to_string(),
        receiver: ReceiverConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            advertised_host: "127.0.0.1".to_string(),
        },
        proxy: ProxyConfig {
            startup_delay: Duration::ZERO,
            ..ProxyConfig::default()
        },
        shutdown_grace: Duration::from_millis(50),
        shutdown_timeout: Duration::from_secs(1),
        ..CoordinatorConfig::default()
    }
}

/// `Write` sink whose contents tests can inspect.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
