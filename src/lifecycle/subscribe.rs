//! Telemetry subscription against the host's logs API.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use super::client::ExtensionClient;
use super::events::{Registration, EXTENSION_ID_HEADER};

/// Version path segment of the logs API.
pub const LOGS_API_VERSION: &str = "2020-08-15";

/// Host-side floors for the buffering parameters.
pub const MIN_MAX_ITEMS: u32 = 1000;
pub const MIN_MAX_BYTES: u32 = 262_144;
pub const MIN_TIMEOUT_MS: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryCategory {
    Platform,
    Function,
    Extension,
}

impl FromStr for TelemetryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "platform" => Ok(Self::Platform),
            "function" => Ok(Self::Function),
            "extension" => Ok(Self::Extension),
            other => Err(format!("unknown telemetry category: {other}")),
        }
    }
}

impl fmt::Display for TelemetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Platform => "platform",
            Self::Function => "function",
            Self::Extension => "extension",
        })
    }
}

/// How the host batches telemetry before delivering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferingConfig {
    pub max_items: u32,
    pub max_bytes: u32,
    pub timeout_ms: u32,
}

impl BufferingConfig {
    /// Raise each value to the host's floor.
    pub fn clamped(self) -> Self {
        Self {
            max_items: self.max_items.max(MIN_MAX_ITEMS),
            max_bytes: self.max_bytes.max(MIN_MAX_BYTES),
            timeout_ms: self.timeout_ms.max(MIN_TIMEOUT_MS),
        }
    }
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            max_items: 10_000,
            max_bytes: 262_144,
            timeout_ms: 100,
        }
    }
}

/// Where the host pushes telemetry batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Destination {
    protocol: &'static str,
    #[serde(rename = "URI")]
    uri: String,
    method: &'static str,
    encoding: &'static str,
}

impl Destination {
    /// A JSON-over-HTTP POST destination at `http://{host}:{port}`.
    pub fn http(host: &str, port: u16) -> Self {
        Self {
            protocol: "HTTP",
            uri: format!("http://{host}:{port}"),
            method: "POST",
            encoding: "JSON",
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// What to subscribe to and how it should be batched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    pub categories: Vec<TelemetryCategory>,
    pub buffering: BufferingConfig,
    pub schema_version: Option<String>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            categories: vec![TelemetryCategory::Platform],
            buffering: BufferingConfig::default(),
            schema_version: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    schema_version: Option<&'a str>,
    destination: &'a Destination,
    types: &'a [TelemetryCategory],
    buffering: BufferingConfig,
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("subscription request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("subscription rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Issues the one-shot logs API subscription.
pub struct TelemetrySubscriber<'a> {
    client: &'a ExtensionClient,
}

impl<'a> TelemetrySubscriber<'a> {
    pub fn new(client: &'a ExtensionClient) -> Self {
        Self { client }
    }

    /// Ask the host to push `config.categories` to `destination`.
    ///
    /// The receiver behind `destination` must already be accepting; the
    /// host may deliver the first batch before this call returns.
    pub async fn subscribe(
        &self,
        config: &SubscriptionConfig,
        destination: &Destination,
        registration: &Registration,
    ) -> Result<(), SubscribeError> {
        let url = format!("{}/{LOGS_API_VERSION}/logs", self.client.base_url());
        let request = SubscribeRequest {
            schema_version: config.schema_version.as_deref(),
            destination,
            types: &config.categories,
            buffering: config.buffering.clamped(),
        };

        let response = self
            .client
            .http()
            .put(url)
            .header(EXTENSION_ID_HEADER, registration.extension_id())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubscribeError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
