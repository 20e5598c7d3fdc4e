//! HTTP client for the host's extension lifecycle API.

use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::events::{
    ControlEvent, EventKind, RegisterRequest, RegisterResponse, Registration,
    EXTENSION_ID_HEADER, EXTENSION_NAME_HEADER,
};

/// Version path segment of the extensions API.
pub const EXTENSION_API_VERSION: &str = "2020-01-01";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("registration rejected with status {status}: {body}")]
    Register { status: u16, body: String },

    #[error("registration response carried no Lambda-Extension-Identifier header")]
    MissingIdentifier,

    #[error("next-event request failed with status {status}: {body}")]
    NextEvent { status: u16, body: String },

    #[error("lifecycle API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed lifecycle event: {0}")]
    Decode(#[from] serde_json::Error),
}

impl LifecycleError {
    pub fn is_registration(&self) -> bool {
        matches!(self, Self::Register { .. } | Self::MissingIdentifier)
    }
}

/// Client for registration and the next-event long poll.
///
/// Requests bypass any configured HTTP proxy: the recording proxy runs in
/// the same environment and must not see the extension's own traffic.
#[derive(Clone)]
pub struct ExtensionClient {
    http: Client,
    base_url: String,
}

impl ExtensionClient {
    /// `runtime_api` is the `host:port` published by the host.
    pub fn new(runtime_api: &str) -> Result<Self, LifecycleError> {
        let http = Client::builder()
            .no_proxy()
            .build()
            .map_err(LifecycleError::Client)?;
        Ok(Self {
            http,
            base_url: format!("http://{runtime_api}"),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// Register with the host. Must happen before the host starts invoking.
    pub async fn register(
        &self,
        extension_name: &str,
        events: &[EventKind],
    ) -> Result<Registration, LifecycleError> {
        let url = format!("{}/{EXTENSION_API_VERSION}/extension/register", self.base_url);
        let response = self
            .http
            .post(url)
            .header(EXTENSION_NAME_HEADER, extension_name)
            .json(&RegisterRequest { events })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LifecycleError::Register {
                status: status.as_u16(),
                body,
            });
        }

        let extension_id = response
            .headers()
            .get(EXTENSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(LifecycleError::MissingIdentifier)?
            .to_string();

        let body = response.bytes().await?;
        Ok(Registration::with_details(extension_id, register_details(&body)))
    }

    /// Block until the host has the next event.
    ///
    /// Returns `Ok(None)` if `cancel` fires first; the in-flight request is
    /// dropped, which closes its connection.
    pub async fn next_event(
        &self,
        registration: &Registration,
        cancel: &CancellationToken,
    ) -> Result<Option<ControlEvent>, LifecycleError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Ok(None),
            event = self.fetch_next(registration) => event.map(Some),
        }
    }

    async fn fetch_next(&self, registration: &Registration) -> Result<ControlEvent, LifecycleError> {
        let url = format!("{}/{EXTENSION_API_VERSION}/extension/event/next", self.base_url);
        let response = self
            .http
            .get(url)
            .header(EXTENSION_ID_HEADER, registration.extension_id())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LifecycleError::NextEvent {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Function details from a registration body. They are informational, so a
/// body that does not decode is logged and ignored.
fn register_details(body: &[u8]) -> RegisterResponse {
    if body.is_empty() {
        return RegisterResponse::default();
    }
    serde_json::from_slice(body).unwrap_or_else(|e| {
        warn!(error = %e, "ignoring undecodable registration response body");
        RegisterResponse::default()
    })
}
