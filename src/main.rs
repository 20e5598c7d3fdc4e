//! policy-tap entry point.
//!
//! Bootstraps the extension with:
//! - Configuration loading (exit 2 on error)
//! - Structured logging to stderr
//! - Signal handling for graceful shutdown
//! - The lifecycle coordinator, which owns everything else

use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use policy_tap::collaborator::ProcessPolicySource;
use policy_tap::config;
use policy_tap::lifecycle::{
    join_signal_listener, spawn_signal_listener, Coordinator, ExtensionClient,
};
use policy_tap::logs::PolicyWriter;
use policy_tap::telemetry::init_logging;
use policy_tap::ExtensionError;

#[tokio::main]
async fn main() -> ExitCode {
    let env = match config::load() {
        Ok(env) => env,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(ExtensionError::from(e).exit_code());
        }
    };

    if let Err(e) = init_logging(&env.log) {
        eprintln!("Logging setup failed: {}", e);
        return ExitCode::from(ExtensionError::from(e).exit_code());
    }

    match run(env).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, startup = e.is_startup(), "extension failed");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(env: config::EnvConfig) -> Result<(), ExtensionError> {
    let name = env.coordinator.extension_name.clone();
    info!(
        extension = %name,
        runtime_api = %env.runtime_api,
        version = env!("CARGO_PKG_VERSION"),
        "starting extension"
    );

    let client = ExtensionClient::new(&env.runtime_api)?;
    let source = Arc::new(ProcessPolicySource::new(env.proxy_command));
    let writer = PolicyWriter::stdout(format!("[{name}]"));

    let cancel = CancellationToken::new();
    let signals = spawn_signal_listener(cancel.clone());

    let coordinator = Coordinator::new(env.coordinator, client, source, writer, cancel.clone());
    let result = coordinator.run().await;

    cancel.cancel();
    join_signal_listener(signals).await;

    let report = result?;
    info!(
        invocations = report.invocations,
        snapshots = report.consumer.snapshots,
        trigger = ?report.trigger,
        "extension exited cleanly"
    );
    Ok(())
}
