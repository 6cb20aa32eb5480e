//! HTTP and Server-Sent Events transport.
//!
//! Every outbound call made by this crate goes through the [`Transport`]
//! trait so the health monitor, the open client and the sync client can be
//! exercised against scripted fakes.
//!
//! ## Design
//!
//! - `TransportRequest`: method, relative path, optional JSON body, an
//!   explicit timeout and an optional abort token.
//! - `TransportResponse`: status code and raw body text. Interpreting the body
//!   is left to the caller.
//! - `HttpTransport`: the `reqwest` implementation. It deliberately has no
//!   client-wide timeout because event streams stay open indefinitely;
//!   request/response calls are bounded individually.
//! - **Event streams**: `subscribe` returns a stream of parsed [`SseEvent`]s.
//!   The end of the stream is the transport-level disconnect signal.

mod sse;

pub use sse::SseEvent;

use async_trait::async_trait;
use docbridge_types::CompanionError;
use futures_util::stream::BoxStream;
use reqwest::{Client, Method, header};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Parsed events of one event-stream connection, in server-send order.
pub type EventStream = BoxStream<'static, Result<SseEvent, CompanionError>>;

/// Timeout applied when a request does not set one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for an event stream to return its response headers.
pub const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A single request/response call.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    /// Path relative to the transport's base URL.
    pub path: String,
    pub body: Option<JsonValue>,
    pub timeout: Duration,
    /// Firing this token cancels the in-flight call.
    pub abort: Option<CancellationToken>,
}

impl TransportRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            abort: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn abort_on(mut self, token: CancellationToken) -> Self {
        self.abort = Some(token);
        self
    }
}

/// Status and body text of a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body, classifying parse failures as malformed responses.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, CompanionError> {
        serde_json::from_str(&self.body).map_err(|error| CompanionError::malformed(error.to_string()))
    }

    /// Best human-readable description of a failed response.
    ///
    /// Prefers a JSON `message` or `error` field, then the raw body text, then
    /// the status line.
    pub fn error_message(&self) -> String {
        if let Ok(JsonValue::Object(map)) = serde_json::from_str::<JsonValue>(&self.body) {
            for key in ["message", "error"] {
                if let Some(JsonValue::String(text)) = map.get(key)
                    && !text.trim().is_empty()
                {
                    return text.clone();
                }
            }
        }
        let text = self.body.trim();
        if !text.is_empty() {
            return text.to_string();
        }
        match reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|code| code.canonical_reason())
        {
            Some(reason) => format!("HTTP {} {}", self.status, reason),
            None => format!("HTTP {}", self.status),
        }
    }

    /// Convert a non-2xx response into a protocol error.
    pub fn into_protocol_error(self) -> CompanionError {
        let message = self.error_message();
        CompanionError::protocol(self.status, message)
    }
}

/// Outbound calls to a remote HTTP surface.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request/response call bounded by `request.timeout`.
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, CompanionError>;

    /// Open an event stream at `path`.
    async fn subscribe(&self, path: &str) -> Result<EventStream, CompanionError>;
}

/// `reqwest`-backed [`Transport`] bound to a base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Creates a new `HttpTransport` for `base_url`.
    pub fn new(base_url: Url) -> Result<Self, CompanionError> {
        let client = Client::builder()
            .build()
            .map_err(|error| CompanionError::network(format!("failed to create HTTP client: {error}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Creates a new `HttpTransport` reusing an existing client.
    pub fn with_client(client: Client, mut base_url: Url) -> Self {
        // Url::join replaces the last segment unless the base ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> Result<Url, CompanionError> {
        let relative = path.trim_start_matches('/');
        self.base_url
            .join(relative)
            .map_err(|error| CompanionError::user_input(format!("invalid path '{path}': {error}")))
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> CompanionError {
    if error.is_timeout() {
        CompanionError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        CompanionError::network(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, CompanionError> {
        let url = self.url_for(&request.path)?;
        let timeout = request.timeout;
        let mut builder = self.client.request(request.method.clone(), url).timeout(timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let call = async {
            let response = builder.send().await.map_err(|error| classify(error, timeout))?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(|error| classify(error, timeout))?;
            Ok(TransportResponse { status, body })
        };

        let abort = request.abort.unwrap_or_default();
        let result = tokio::select! {
            biased;
            _ = abort.cancelled() => Err(CompanionError::Aborted),
            outcome = tokio::time::timeout(timeout, call) => outcome.unwrap_or(Err(CompanionError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })),
        };

        if let Err(error) = &result {
            tracing::debug!(target: "companion_transport", method = %request.method, path = %request.path, %error, "request failed");
        }
        result
    }

    async fn subscribe(&self, path: &str) -> Result<EventStream, CompanionError> {
        let url = self.url_for(path)?;
        let send = self.client.get(url).header(header::ACCEPT, "text/event-stream").send();
        let response = tokio::time::timeout(STREAM_CONNECT_TIMEOUT, send)
            .await
            .map_err(|_| CompanionError::Timeout {
                timeout_ms: STREAM_CONNECT_TIMEOUT.as_millis() as u64,
            })?
            .map_err(|error| classify(error, STREAM_CONNECT_TIMEOUT))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportResponse::new(status, body).into_protocol_error());
        }

        tracing::debug!(target: "companion_transport", %path, "event stream connected");
        Ok(sse::event_stream(response.bytes_stream()))
    }
}
