//! Model Provider Island
//!
//! HTTP access to remote AI model endpoints, behind the
//! [`ModelInvoker`] seam so the routing engine never touches the wire
//! directly. Responses are decoded tolerantly: unknown fields are
//! ignored and a missing or malformed `usage` block degrades to zero
//! token counts instead of an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::service_islands::layer5_business_logic::shared::error::{
    GatewayError, GatewayResult,
};

pub mod circuit_breaker;

/// Network identity of one model endpoint, as the invoker needs it
#[derive(Debug, Clone)]
pub struct EndpointTarget {
    pub id: String,
    pub url: String,
    /// Auth and other provider-required headers
    pub headers: HashMap<String, String>,
}

/// The AI payload sent to a provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub request_type: String,
}

/// Token accounting from the provider; tolerated when absent
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Usage {
    #[serde(alias = "promptTokens")]
    pub prompt_tokens: u64,
    #[serde(alias = "completionTokens")]
    pub completion_tokens: u64,
    #[serde(alias = "totalTokens")]
    pub total_tokens: u64,
}

/// Provider response body
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, deserialize_with = "tolerant_usage")]
    pub usage: Usage,
}

/// A malformed `usage` object becomes the zero default; cost is then
/// recorded as 0 rather than failing the whole response.
fn tolerant_usage<'de, D>(deserializer: D) -> Result<Usage, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Invocation seam between the router and provider transports
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Call the endpoint; the deadline bounds the whole round trip
    async fn invoke(
        &self,
        endpoint: &EndpointTarget,
        request: &ProviderRequest,
        deadline: Option<Duration>,
    ) -> GatewayResult<ProviderResponse>;
}

/// Production invoker over a pooled HTTP client
pub struct HttpProviderClient {
    http: reqwest::Client,
}

impl HttpProviderClient {
    /// Build the client with pooled connections and conservative
    /// timeouts suited to model providers.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying HTTP client cannot be built.
    pub fn new() -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .user_agent("redis-ai-gateway/0.1")
            .build()
            .map_err(|e| GatewayError::Provider(format!("HTTP client build failed: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ModelInvoker for HttpProviderClient {
    async fn invoke(
        &self,
        endpoint: &EndpointTarget,
        request: &ProviderRequest,
        deadline: Option<Duration>,
    ) -> GatewayResult<ProviderResponse> {
        let mut builder = self
            .http
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .json(request);
        for (name, value) in &endpoint.headers {
            builder = builder.header(name, value);
        }
        if let Some(limit) = deadline {
            builder = builder.timeout(limit);
        }

        debug!(endpoint = %endpoint.id, url = %endpoint.url, "Invoking model provider");
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(format!("provider {} call", endpoint.id))
            } else {
                GatewayError::Provider(format!("request to {} failed: {e}", endpoint.id))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            warn!(endpoint = %endpoint.id, status = %status, "Provider returned error status");
            return Err(GatewayError::Provider(format!(
                "{} returned {status}: {snippet}",
                endpoint.id
            )));
        }

        response
            .json::<ProviderResponse>()
            .await
            .map_err(|e| GatewayError::Provider(format!("malformed response body: {e}")))
    }
}
