//! Runtime configuration loading from environment variables.
//!
//! Only `AWS_LAMBDA_RUNTIME_API` is required. Everything else is read from
//! `POLICY_TAP_*` variables; invalid values fall back to defaults without
//! failing, and buffering values are raised to the host's floors.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `AWS_LAMBDA_RUNTIME_API` | required | Lifecycle API `host:port` |
//! | `POLICY_TAP_RECEIVER_ADDR` | 0.0.0.0:1234 | Receiver bind address |
//! | `POLICY_TAP_RECEIVER_HOST` | sandbox | Host name sent in the destination URI |
//! | `POLICY_TAP_MAX_ITEMS` | 10000 | Buffering max items (floor 1000) |
//! | `POLICY_TAP_MAX_BYTES` | 262144 | Buffering max bytes (floor 262144) |
//! | `POLICY_TAP_TIMEOUT_MS` | 100 | Buffering timeout (floor 25) |
//! | `POLICY_TAP_EVENT_TYPES` | platform | Comma-separated telemetry categories |
//! | `POLICY_TAP_SCHEMA_VERSION` | unset | Logs API schema version |
//! | `POLICY_TAP_QUEUE_DEPTH` | 1024 | Max undecoded batches |
//! | `POLICY_TAP_BATCH_SIZE` | 1 | Batches per consumer wake-up |
//! | `POLICY_TAP_DECODE_POLICY` | fail-fast | `fail-fast` or `skip` |
//! | `POLICY_TAP_SHUTDOWN_TIMEOUT_MS` | 1000 | Receiver shutdown deadline |
//! | `POLICY_TAP_SHUTDOWN_GRACE_MS` | 500 | Pause before stopping components |
//! | `POLICY_TAP_PROXY_COMMAND` | iamlive | Proxy executable |
//! | `POLICY_TAP_PROXY_MODE` | proxy | `proxy` or `csm` |
//! | `POLICY_TAP_PROXY_ADDR` | 127.0.0.1:10080 | Proxy listen address |
//! | `POLICY_TAP_PROXY_OUTPUT` | /tmp/iamlive-policy.json | Policy document path |
//! | `POLICY_TAP_PROXY_CA_BUNDLE` | /tmp/iamlive-ca.pem | CA certificate path |
//! | `POLICY_TAP_PROXY_CA_KEY` | /tmp/iamlive-ca.key | CA key path |
//! | `POLICY_TAP_PROXY_REFRESH_RATE` | 0 | Document refresh interval (secs) |
//! | `POLICY_TAP_PROXY_SORT_ALPHABETICAL` | false | Sort policy actions |
//! | `POLICY_TAP_PROXY_FAILS_ONLY` | false | Record failed calls only |
//! | `POLICY_TAP_PROXY_FORCE_WILDCARD` | false | Use `*` for every resource |
//! | `POLICY_TAP_PROXY_STARTUP_MS` | 3000 | Wait after launching the proxy |
//! | `POLICY_TAP_PROXY_FLUSH_MS` | 1000 | Wait for the proxy to rewrite its document |
//! | `POLICY_TAP_LOG_FORMAT` | json | `json` or `pretty` |
//! | `POLICY_TAP_LOG` | info | Log filter directive |

use std::ffi::OsStr;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::collaborator::ProxyConfig;
use crate::lifecycle::{BufferingConfig, CoordinatorConfig, SubscriptionConfig, TelemetryCategory};
use crate::logs::{ConsumerConfig, LogQueueConfig};
use crate::receiver::ReceiverConfig;
use crate::telemetry::LogConfig;

pub const RUNTIME_API_VAR: &str = "AWS_LAMBDA_RUNTIME_API";
const DEFAULT_EXTENSION_NAME: &str = "policy-tap";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("AWS_LAMBDA_RUNTIME_API is not set")]
    MissingRuntimeApi,
}

/// All runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub runtime_api: String,
    pub proxy_command: String,
    pub log: LogConfig,
    pub coordinator: CoordinatorConfig,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Parse any `FromStr` env var, returning `default` on missing or invalid.
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Non-empty string env var.
fn parse_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn load_receiver_config() -> ReceiverConfig {
    let defaults = ReceiverConfig::default();
    ReceiverConfig {
        bind_addr: parse_or::<SocketAddr>("POLICY_TAP_RECEIVER_ADDR", defaults.bind_addr),
        advertised_host: parse_string("POLICY_TAP_RECEIVER_HOST")
            .unwrap_or(defaults.advertised_host),
    }
}

fn load_subscription_config() -> SubscriptionConfig {
    let buffering = BufferingConfig {
        max_items: parse_u32("POLICY_TAP_MAX_ITEMS", 10_000),
        max_bytes: parse_u32("POLICY_TAP_MAX_BYTES", 262_144),
        timeout_ms: parse_u32("POLICY_TAP_TIMEOUT_MS", 100),
    }
    .clamped();

    SubscriptionConfig {
        categories: parse_categories(std::env::var("POLICY_TAP_EVENT_TYPES").ok().as_deref()),
        buffering,
        schema_version: parse_string("POLICY_TAP_SCHEMA_VERSION"),
    }
}

/// Unknown names are skipped; an empty result falls back to `platform`.
fn parse_categories(raw: Option<&str>) -> Vec<TelemetryCategory> {
    let mut categories = Vec::new();
    for name in raw.unwrap_or_default().split(',').filter(|s| !s.trim().is_empty()) {
        if let Ok(category) = name.parse::<TelemetryCategory>() {
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
    }
    if categories.is_empty() {
        categories.push(TelemetryCategory::Platform);
    }
    categories
}

fn load_proxy_config() -> ProxyConfig {
    let defaults = ProxyConfig::default();
    ProxyConfig {
        host: defaults.host,
        bind_addr: parse_string("POLICY_TAP_PROXY_ADDR").unwrap_or(defaults.bind_addr),
        ca_bundle: parse_string("POLICY_TAP_PROXY_CA_BUNDLE")
            .map(PathBuf::from)
            .unwrap_or(defaults.ca_bundle),
        ca_key: parse_string("POLICY_TAP_PROXY_CA_KEY")
            .map(PathBuf::from)
            .unwrap_or(defaults.ca_key),
        mode: parse_or("POLICY_TAP_PROXY_MODE", defaults.mode),
        output_file: parse_string("POLICY_TAP_PROXY_OUTPUT")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_file),
        refresh_rate: parse_u64("POLICY_TAP_PROXY_REFRESH_RATE", defaults.refresh_rate),
        sort_alphabetical: parse_bool("POLICY_TAP_PROXY_SORT_ALPHABETICAL", false),
        fails_only: parse_bool("POLICY_TAP_PROXY_FAILS_ONLY", false),
        force_wildcard_resource: parse_bool("POLICY_TAP_PROXY_FORCE_WILDCARD", false),
        startup_delay: Duration::from_millis(parse_u64("POLICY_TAP_PROXY_STARTUP_MS", 3000)),
        flush_timeout: Duration::from_millis(parse_u64("POLICY_TAP_PROXY_FLUSH_MS", 1000)),
    }
}

fn load_log_config() -> LogConfig {
    let defaults = LogConfig::default();
    LogConfig {
        format: parse_or("POLICY_TAP_LOG_FORMAT", defaults.format),
        level: parse_string("POLICY_TAP_LOG").unwrap_or(defaults.level),
        output_path: None,
    }
}

/// Load all configuration from environment variables.
pub fn load() -> Result<EnvConfig, ConfigError> {
    let runtime_api = parse_string(RUNTIME_API_VAR).ok_or(ConfigError::MissingRuntimeApi)?;

    let queue = LogQueueConfig {
        max_pending: parse_usize("POLICY_TAP_QUEUE_DEPTH", 1024).max(1),
    };
    let consumer = ConsumerConfig {
        batch_size: parse_usize("POLICY_TAP_BATCH_SIZE", 1).max(1),
        decode_policy: parse_or("POLICY_TAP_DECODE_POLICY", Default::default()),
    };
    let shutdown_timeout_ms = parse_u64("POLICY_TAP_SHUTDOWN_TIMEOUT_MS", 1000).max(1);
    let shutdown_grace_ms = parse_u64("POLICY_TAP_SHUTDOWN_GRACE_MS", 500);

    Ok(EnvConfig {
        runtime_api,
        proxy_command: parse_string("POLICY_TAP_PROXY_COMMAND")
            .unwrap_or_else(|| "iamlive".to_string()),
        log: load_log_config(),
        coordinator: CoordinatorConfig {
            extension_name: extension_name(),
            receiver: load_receiver_config(),
            subscription: load_subscription_config(),
            queue,
            consumer,
            proxy: load_proxy_config(),
            shutdown_grace: Duration::from_millis(shutdown_grace_ms),
            shutdown_timeout: Duration::from_millis(shutdown_timeout_ms),
        },
    })
}

/// The host requires the registered name to match the executable's file name.
pub fn extension_name() -> String {
    extension_name_from(std::env::args_os().next().as_deref())
}

fn extension_name_from(arg0: Option<&OsStr>) -> String {
    arg0.map(Path::new)
        .and_then(Path::file_name)
        .and_then(OsStr::to_str)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_EXTENSION_NAME)
        .to_string()
}
