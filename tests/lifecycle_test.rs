//! End-to-end coordinator tests against a mock host.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{test_config, MockHost, Script, SharedBuffer, EXTENSION_ID, RUNTIME_DONE_BATCH};
use policy_tap::collaborator::{PolicyDocument, StaticPolicySource};
use policy_tap::lifecycle::{ExtensionClient, LifecycleError, ShutdownReason, SubscribeError};
use policy_tap::logs::{PolicyWriter, QueueError};
use policy_tap::receiver::{ReceiverError, ReceiverFault};
use policy_tap::{Coordinator, ExtensionError, LifecycleState, ShutdownTrigger};

const POLICY: &str = "{\n  \"Version\": \"2012-10-17\",\n  \"Statement\": [\n    {\"Effect\": \"Allow\", \"Action\": [\"s3:ListBucket\"], \"Resource\": \"*\"}\n  ]\n}";

fn coordinator(host: &MockHost, source: Arc<StaticPolicySource>, out: SharedBuffer) -> Coordinator {
    Coordinator::new(
        test_config(),
        ExtensionClient::new(&host.runtime_api()).unwrap(),
        source,
        PolicyWriter::new("[policy-tap]", out),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn full_run_emits_policy_for_finished_invocation() {
    let host = MockHost::start(Script::InvokeThenShutdown {
        batches: vec![RUNTIME_DONE_BATCH.to_string()],
    })
    .await;
    let source = Arc::new(StaticPolicySource::new(PolicyDocument::new(POLICY.as_bytes().to_vec())));
    let out = SharedBuffer::default();
    let coordinator = coordinator(&host, Arc::clone(&source), out.clone());

    let report = tokio::time::timeout(Duration::from_secs(10), coordinator.run())
        .await
        .expect("run should finish after the shutdown event")
        .unwrap();

    assert_eq!(report.invocations, 1);
    assert_eq!(report.trigger, ShutdownTrigger::Host(ShutdownReason::Spindown));
    assert_eq!(report.consumer.batches, 1);
    assert_eq!(report.consumer.items, 2);
    assert_eq!(report.consumer.snapshots, 1);
    assert_eq!(coordinator.state(), LifecycleState::Terminated);
    assert!(source.is_started());
    assert_eq!(source.snapshot_count(), 1);
    assert_eq!(host.deliveries(), vec![StatusCode::OK]);
    assert_eq!(
        out.lines(),
        vec![
            r#"[policy-tap] Result IAM Policy: {"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":["s3:ListBucket"],"Resource":"*"}]}"#
        ]
    );
}

#[tokio::test]
async fn registration_and_subscription_requests_match_host_api() {
    let host = MockHost::start(Script::InvokeThenShutdown { batches: vec![] }).await;
    let coordinator = coordinator(&host, Arc::new(StaticPolicySource::default()), SharedBuffer::default());

    coordinator.run().await.unwrap();

    let registrations = host.registrations();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].header.as_deref(), Some("policy-tap"));
    assert_eq!(registrations[0].body, json!({"events": ["INVOKE", "SHUTDOWN"]}));

    let subscriptions = host.subscriptions();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].header.as_deref(), Some(EXTENSION_ID));
    let body = &subscriptions[0].body;
    assert_eq!(body["types"], json!(["platform"]));
    assert_eq!(
        body["buffering"],
        json!({"maxItems": 10000, "maxBytes": 262144, "timeoutMs": 100})
    );
    assert_eq!(body["destination"]["protocol"], "HTTP");
    assert_eq!(body["destination"]["method"], "POST");
    assert_eq!(body["destination"]["encoding"], "JSON");
    assert!(body["destination"]["URI"]
        .as_str()
        .unwrap()
        .starts_with("http://127.0.0.1:"));
    assert_eq!(host.polls(), 2);
}

#[tokio::test]
async fn invocation_without_marker_takes_no_snapshot() {
    let batch = r#"[{"type":"platform.start","record":{"requestId":"req-1"}}]"#;
    let host = MockHost::start(Script::InvokeThenShutdown {
        batches: vec![batch.to_string()],
    })
    .await;
    let source = Arc::new(StaticPolicySource::default());
    let out = SharedBuffer::default();

    let report = coordinator(&host, Arc::clone(&source), out.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.consumer.batches, 1);
    assert_eq!(report.consumer.snapshots, 0);
    assert_eq!(source.snapshot_count(), 0);
    assert!(out.lines().is_empty());
}

#[tokio::test]
async fn registration_failure_starts_nothing() {
    let host = MockHost::start_with(
        Script::InvokeThenShutdown {
            batches: vec![RUNTIME_DONE_BATCH.to_string()],
        },
        StatusCode::FORBIDDEN,
        StatusCode::OK,
    )
    .await;
    let source = Arc::new(StaticPolicySource::default());
    let coordinator = coordinator(&host, Arc::clone(&source), SharedBuffer::default());

    let err = coordinator.run().await.unwrap_err();

    assert!(matches!(
        err,
        ExtensionError::Lifecycle(LifecycleError::Register { status: 403, .. })
    ));
    assert!(err.is_startup());
    assert_eq!(err.exit_code(), 1);
    assert_eq!(coordinator.state(), LifecycleState::Init);
    assert!(host.subscriptions().is_empty());
    assert_eq!(host.polls(), 0);
    assert_eq!(source.snapshot_count(), 0);
}

#[tokio::test]
async fn subscription_failure_stops_receiver_and_skips_polling() {
    let host = MockHost::start_with(
        Script::InvokeThenShutdown { batches: vec![] },
        StatusCode::OK,
        StatusCode::BAD_REQUEST,
    )
    .await;
    let coordinator = coordinator(&host, Arc::new(StaticPolicySource::default()), SharedBuffer::default());

    let err = coordinator.run().await.unwrap_err();

    assert!(matches!(
        err,
        ExtensionError::Subscribe(SubscribeError::Rejected { status: 400, .. })
    ));
    assert!(err.is_startup());
    assert_eq!(coordinator.state(), LifecycleState::Registered);
    assert_eq!(host.polls(), 0);
}

#[tokio::test]
async fn cancel_interrupts_blocked_poll() {
    let host = MockHost::start(Script::Hang).await;
    let cancel = CancellationToken::new();
    let config = test_config();
    let bound = config.shutdown_grace + config.shutdown_timeout + Duration::from_secs(1);
    let coordinator = Coordinator::new(
        config,
        ExtensionClient::new(&host.runtime_api()).unwrap(),
        Arc::new(StaticPolicySource::default()),
        PolicyWriter::new("[policy-tap]", SharedBuffer::default()),
        cancel.clone(),
    );
    let mut states = coordinator.subscribe_state();
    let run = tokio::spawn(async move { coordinator.run().await });

    states
        .wait_for(|s| *s == LifecycleState::Polling)
        .await
        .unwrap();
    // Let the poll request reach the host.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(host.polls(), 1);

    let started = Instant::now();
    cancel.cancel();
    let report = tokio::time::timeout(bound, run)
        .await
        .expect("cancellation must not wait on the blocked poll")
        .unwrap()
        .unwrap();

    assert!(started.elapsed() < bound);
    assert_eq!(report.trigger, ShutdownTrigger::Cancelled);
    assert_eq!(report.invocations, 0);
}

#[tokio::test]
async fn cancel_before_registration_skips_host() {
    let host = MockHost::start(Script::Hang).await;
    let cancel = CancellationToken::new();
    let mut config = test_config();
    config.proxy.startup_delay = Duration::from_secs(30);
    let coordinator = Coordinator::new(
        config,
        ExtensionClient::new(&host.runtime_api()).unwrap(),
        Arc::new(StaticPolicySource::default()),
        PolicyWriter::new("[policy-tap]", SharedBuffer::default()),
        cancel.clone(),
    );

    cancel.cancel();
    let report = tokio::time::timeout(Duration::from_secs(2), coordinator.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.trigger, ShutdownTrigger::Cancelled);
    assert!(host.registrations().is_empty());
    assert_eq!(coordinator.state(), LifecycleState::Terminated);
}

#[tokio::test]
async fn undecodable_batch_fails_the_run_after_shutdown() {
    let host = MockHost::start(Script::InvokeThenShutdown {
        batches: vec!["{not an array".to_string()],
    })
    .await;
    let coordinator = coordinator(&host, Arc::new(StaticPolicySource::default()), SharedBuffer::default());

    let err = tokio::time::timeout(Duration::from_secs(10), coordinator.run())
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, ExtensionError::Consumer(_)));
    assert!(!err.is_startup());
    assert_eq!(err.exit_code(), 1);
    assert_eq!(coordinator.state(), LifecycleState::Terminated);
}

#[tokio::test]
async fn refused_delivery_during_shutdown_fails_the_run() {
    let host = MockHost::start(Script::Hang).await;
    let cancel = CancellationToken::new();
    let mut config = test_config();
    config.queue.max_pending = 1;
    config.shutdown_grace = Duration::from_millis(300);
    let source = Arc::new(
        StaticPolicySource::default().with_snapshot_delay(Duration::from_millis(400)),
    );
    let coordinator = Coordinator::new(
        config,
        ExtensionClient::new(&host.runtime_api()).unwrap(),
        source,
        PolicyWriter::new("[policy-tap]", SharedBuffer::default()),
        cancel.clone(),
    );
    let mut states = coordinator.subscribe_state();
    let run = tokio::spawn(async move { coordinator.run().await });

    states
        .wait_for(|s| *s == LifecycleState::Polling)
        .await
        .unwrap();
    let uri = host.subscriptions()[0].body["destination"]["URI"]
        .as_str()
        .unwrap()
        .to_string();

    cancel.cancel();
    states
        .wait_for(|s| *s == LifecycleState::ShuttingDown)
        .await
        .unwrap();

    // The consumer is stuck in a slow snapshot, so the one-slot queue fills.
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let status = client
            .post(&uri)
            .body(RUNTIME_DONE_BATCH)
            .send()
            .await
            .unwrap()
            .status();
        statuses.push(status);
    }
    assert!(statuses.contains(&StatusCode::INTERNAL_SERVER_ERROR), "{statuses:?}");

    let err = tokio::time::timeout(Duration::from_secs(10), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();

    assert!(matches!(
        err,
        ExtensionError::Receiver(ReceiverError::Fault(ReceiverFault::Enqueue(QueueError::Full {
            max: 1
        })))
    ));
    assert_eq!(err.exit_code(), 1);
}
