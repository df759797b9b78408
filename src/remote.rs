//! Remote order service client.
//!
//! The reconciler only needs two calls, create and update, expressed by the
//! `OrderService` trait. `HttpOrderService` implements them against a
//! WooCommerce-style REST API (`POST /orders`, `PUT /orders/{id}`).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::sync_loop::Connectivity;

/// Line with a server-assigned id, as echoed back by the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteLine {
    pub id: i64,
}

/// The subset of the remote order representation the engine reads.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteOrder {
    pub id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub line_items: Vec<RemoteLine>,
    #[serde(default)]
    pub shipping_lines: Vec<RemoteLine>,
    #[serde(default)]
    pub coupon_lines: Vec<RemoteLine>,
}

#[async_trait]
pub trait OrderService: Send + Sync {
    /// Create an order; the response carries the server id.
    ///
    /// `idempotency_key` is stable per local order so a service that honours
    /// it can collapse a retried create whose first response was lost.
    async fn create_order(
        &self,
        payload: &Value,
        idempotency_key: &str,
    ) -> Result<RemoteOrder, RemoteError>;

    async fn update_order(&self, server_id: i64, payload: &Value)
        -> Result<RemoteOrder, RemoteError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpOrderService {
    client: Client,
    config: RemoteConfig,
}

impl HttpOrderService {
    pub fn new(config: RemoteConfig, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.consumer_key.is_empty() {
            req
        } else {
            req.basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<RemoteOrder, RemoteError> {
        let resp = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| classify_transport_error(&self.config.base_url, &e))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(RemoteError::Http {
                status: status.as_u16(),
                message: failure_detail(status, &body),
            });
        }
        parse_order(&body)
    }
}

#[async_trait]
impl OrderService for HttpOrderService {
    async fn create_order(
        &self,
        payload: &Value,
        idempotency_key: &str,
    ) -> Result<RemoteOrder, RemoteError> {
        let url = format!("{}/orders", self.config.base_url);
        debug!(url = %url, "Creating remote order");
        let order = self
            .send(
                self.client
                    .post(&url)
                    .header("Idempotency-Key", idempotency_key)
                    .json(payload),
            )
            .await?;
        info!(server_id = order.id, "Remote order created");
        Ok(order)
    }

    async fn update_order(
        &self,
        server_id: i64,
        payload: &Value,
    ) -> Result<RemoteOrder, RemoteError> {
        let url = format!("{}/orders/{server_id}", self.config.base_url);
        debug!(url = %url, "Updating remote order");
        self.send(self.client.put(&url).json(payload)).await
    }
}

/// Connectivity probe: a HEAD request against the service base URL. Any HTTP
/// answer, even an error status, means the network path is up.
pub struct HttpConnectivity {
    client: Option<Client>,
    url: String,
}

impl HttpConnectivity {
    pub fn new(config: &RemoteConfig, timeout: Duration) -> Self {
        Self {
            client: Client::builder().timeout(timeout).build().ok(),
            url: config.base_url.clone(),
        }
    }
}

#[async_trait]
impl Connectivity for HttpConnectivity {
    async fn is_online(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        client.head(&self.url).send().await.is_ok()
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn classify_transport_error(url: &str, err: &reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        return RemoteError::Timeout(url.to_string());
    }
    if err.is_connect() {
        return RemoteError::Network(url.to_string());
    }
    RemoteError::Network(format!("{url}: {err}"))
}

fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        400 => "Order rejected by service".to_string(),
        401 => "Credentials are invalid or expired".to_string(),
        403 => "Not authorized to modify orders".to_string(),
        404 => "Order service endpoint not found".to_string(),
        s if s >= 500 => "Order service error".to_string(),
        _ => "Unexpected response from order service".to_string(),
    }
}

/// Build a message from an error response, keeping the service's own
/// `message`/`code` when the body is JSON.
fn failure_detail(status: StatusCode, body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        let message = json
            .get("message")
            .or_else(|| json.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| status_message(status));
        return match json.get("code").and_then(Value::as_str) {
            Some(code) => format!("{message} [{code}]"),
            None => message,
        };
    }
    if trimmed.is_empty() {
        status_message(status)
    } else {
        format!("{}: {trimmed}", status_message(status))
    }
}

fn parse_order(body: &str) -> Result<RemoteOrder, RemoteError> {
    serde_json::from_str(body).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
}
