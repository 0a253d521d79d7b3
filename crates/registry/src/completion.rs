//! Bounded completion calls against the agent service.
//!
//! The agent service speaks the same versioned envelope as the tool
//! registry; a completion is a single request carrying the prompt and a
//! single text response.

use async_trait::async_trait;
use queryflow_common::{PipelineError, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::client::RpcChannel;
use crate::resolver::{EndpointResolver, ServiceKind};

/// Seam for the two bounded model calls each turn performs.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Completion client backed by a remote agent service.
pub struct AgentServiceClient {
    channel: RpcChannel,
}

impl AgentServiceClient {
    pub fn new(resolver: Arc<EndpointResolver>) -> Self {
        Self {
            channel: RpcChannel::new(resolver, ServiceKind::AgentService),
        }
    }
}

#[async_trait]
impl CompletionClient for AgentServiceClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let result = self
            .channel
            .call("agent/complete", json!({ "prompt": prompt }))
            .await?;

        let content = extract_content(&result).ok_or_else(|| {
            PipelineError::tool_unavailable("agent service response carried no content")
        })?;
        debug!("Completion returned {} chars", content.len());
        Ok(content)
    }
}

/// Accept both `{"content": "..."}` results and bare string results.
fn extract_content(result: &Value) -> Option<String> {
    if let Some(content) = result.get("content").and_then(Value::as_str) {
        return Some(content.to_string());
    }
    result.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_content_field() {
        let result = json!({ "content": "plan goes here" });
        assert_eq!(extract_content(&result).unwrap(), "plan goes here");
    }

    #[test]
    fn accepts_bare_string_result() {
        let result = json!("just text");
        assert_eq!(extract_content(&result).unwrap(), "just text");
    }

    #[test]
    fn rejects_contentless_result() {
        assert!(extract_content(&json!({ "status": "ok" })).is_none());
    }
}
