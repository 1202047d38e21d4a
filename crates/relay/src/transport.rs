//! HTTP transport seam between delivery workers and the network.
//!
//! Workers talk to a [`WebhookTransport`] rather than to reqwest
//! directly, so the retry state machine is testable with an in-memory
//! transport and the production client stays swappable.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RelayError;

/// Everything needed for one outbound POST.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub body: Vec<u8>,
    /// Static endpoint headers plus the computed delivery headers, in
    /// insertion order.
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

/// What a worker needs to know about the response.
#[derive(Debug, Clone, Copy)]
pub struct WebhookResponse {
    pub status: u16,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Perform the POST. `Err` means the request never produced a
    /// status line (timeout, connect failure, protocol error).
    async fn send(&self, request: WebhookRequest) -> Result<WebhookResponse, RelayError>;
}

/// Production transport over a shared, pooling [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stellwerk-relay/", env!("CARGO_PKG_VERSION")))
            // Receivers get the URL the operator registered, nothing else.
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn send(&self, request: WebhookRequest) -> Result<WebhookResponse, RelayError> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .body(request.body);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        Ok(WebhookResponse {
            status: response.status().as_u16(),
        })
    }
}

/// Human-readable classification of a send failure for attempt records.
pub fn describe_send_error(err: &RelayError, timeout: Duration) -> String {
    if let RelayError::Http(http) = err {
        if http.is_timeout() {
            return format!("timeout after {}ms", timeout.as_millis());
        }
        if http.is_connect() {
            return format!("connection error: {http}");
        }
    }
    err.to_string()
}
