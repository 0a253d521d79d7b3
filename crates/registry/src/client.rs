//! Versioned-RPC client for tool registries and agent services.
//!
//! Every call wraps a JSON envelope `{protocolVersion, method, params, id}`
//! POSTed to the resolved base URL. The server may hand back an opaque
//! session token on first contact; it is echoed on subsequent calls.

use async_trait::async_trait;
use queryflow_common::{PipelineError, Result, ToolDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::resolver::{EndpointResolver, ServiceKind};

pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SESSION_TOKEN_HEADER: &str = "X-Session-Token";

/// Per-request transport bound; a timed-out call surfaces as unavailable.
const CALL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Serialize)]
struct RpcEnvelope<'a> {
    #[serde(rename = "protocolVersion")]
    protocol_version: &'a str,
    method: &'a str,
    params: Value,
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

impl RpcResponse {
    fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(PipelineError::ToolInvocation {
                code: error.code,
                message: error.message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// One RPC conversation with a resolved service: envelope plumbing,
/// session-token affinity, and the single failover retry.
pub struct RpcChannel {
    http: reqwest::Client,
    resolver: Arc<EndpointResolver>,
    kind: ServiceKind,
    session_token: Mutex<Option<String>>,
}

impl RpcChannel {
    pub fn new(resolver: Arc<EndpointResolver>, kind: ServiceKind) -> Self {
        Self {
            http: reqwest::Client::new(),
            resolver,
            kind,
            session_token: Mutex::new(None),
        }
    }

    /// Send one request; on a transport failure the cached endpoint is
    /// invalidated and the call retried once against a fresh resolution.
    /// A second consecutive transport failure surfaces to the caller.
    #[instrument(skip(self, params), fields(service = %self.kind, method = method))]
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        match self.send_once(method, params.clone()).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_transport() => {
                warn!("Call to {} failed ({}); retrying after re-resolution", self.kind, e);
                self.resolver.invalidate(self.kind).await;
                self.send_once(method, params).await
            }
            Err(e) => Err(e),
        }
    }

    async fn send_once(&self, method: &str, params: Value) -> Result<Value> {
        let base_url = self.resolver.resolve(self.kind).await?;
        let envelope = RpcEnvelope {
            protocol_version: PROTOCOL_VERSION,
            method,
            params,
            id: Uuid::new_v4().to_string(),
        };

        let mut request = self
            .http
            .post(&base_url)
            .timeout(CALL_TIMEOUT)
            .json(&envelope);
        if let Some(token) = self.session_token.lock().await.as_deref() {
            request = request.header(SESSION_TOKEN_HEADER, token);
        }

        let response = request.send().await.map_err(|e| {
            PipelineError::tool_unavailable(format!("{} transport error: {}", self.kind, e))
        })?;

        if let Some(token) = response
            .headers()
            .get(SESSION_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            debug!("Captured session token from {}", self.kind);
            *self.session_token.lock().await = Some(token.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::tool_unavailable(format!(
                "{} returned HTTP {}",
                self.kind, status
            )));
        }

        let parsed: RpcResponse = response.json().await.map_err(|e| {
            PipelineError::tool_unavailable(format!("{} sent malformed response: {}", self.kind, e))
        })?;
        parsed.into_result()
    }
}

/// Seam the executor and pipeline call through; tests supply mocks.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;
}

/// Client for a remote tool registry speaking the versioned envelope.
pub struct RegistryClient {
    channel: RpcChannel,
}

impl RegistryClient {
    pub fn new(resolver: Arc<EndpointResolver>) -> Self {
        Self {
            channel: RpcChannel::new(resolver, ServiceKind::ToolRegistry),
        }
    }
}

#[async_trait]
impl ToolInvoker for RegistryClient {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.channel.call("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let descriptors: Vec<ToolDescriptor> = serde_json::from_value(tools)?;
        debug!("Registry advertised {} tools", descriptors.len());
        Ok(descriptors)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.channel
            .call(
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_camel_case_version_field() {
        let envelope = RpcEnvelope {
            protocol_version: PROTOCOL_VERSION,
            method: "tools/list",
            params: json!({}),
            id: "42".to_string(),
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(value["method"], "tools/list");
        assert_eq!(value["id"], "42");
        assert!(value["params"].is_object());
    }

    #[test]
    fn response_error_maps_to_tool_invocation() {
        let parsed: RpcResponse = serde_json::from_value(json!({
            "error": { "code": -32601, "message": "method not found" }
        }))
        .unwrap();

        let err = parsed.into_result().unwrap_err();
        match err {
            PipelineError::ToolInvocation { code, message } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "method not found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn response_result_passes_through_verbatim() {
        let parsed: RpcResponse = serde_json::from_value(json!({
            "result": { "tools": [{ "name": "search" }] }
        }))
        .unwrap();

        let value = parsed.into_result().unwrap();
        assert_eq!(value["tools"][0]["name"], "search");
    }

    #[test]
    fn tool_invocation_error_is_not_transport() {
        let err = PipelineError::ToolInvocation {
            code: 1,
            message: "bad arguments".to_string(),
        };
        // Application errors never trigger the failover retry.
        assert!(!err.is_transport());
        assert!(PipelineError::tool_unavailable("boom").is_transport());
    }
}
