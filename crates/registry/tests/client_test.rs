//! Registry client integration tests against a mock HTTP registry.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use queryflow_common::PipelineError;
use queryflow_registry::{
    EndpointProbe, EndpointResolver, RegistryClient, ServiceKind, ToolInvoker,
    SESSION_TOKEN_HEADER,
};

/// Accepts every candidate without touching the network.
struct AcceptAll;

#[async_trait]
impl EndpointProbe for AcceptAll {
    async fn probe(&self, _base_url: &str, _kind: ServiceKind) -> bool {
        true
    }
}

/// Accepts whatever is probed first, then rejects the dead candidate;
/// models an endpoint dying after it was cached.
struct FirstThenSecond {
    probes: AtomicUsize,
}

#[async_trait]
impl EndpointProbe for FirstThenSecond {
    async fn probe(&self, base_url: &str, _kind: ServiceKind) -> bool {
        if self.probes.fetch_add(1, Ordering::SeqCst) == 0 {
            true
        } else {
            base_url != "http://127.0.0.1:1"
        }
    }
}

fn resolver_for(candidates: Vec<String>, probe: Arc<dyn EndpointProbe>) -> Arc<EndpointResolver> {
    let mut map = HashMap::new();
    map.insert(ServiceKind::ToolRegistry, candidates);
    Arc::new(EndpointResolver::new(map, probe))
}

#[tokio::test]
async fn list_tools_sends_the_versioned_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "protocolVersion": "2025-03-26",
            "method": "tools/list"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "tools": [
                { "name": "search", "description": "Full text search",
                  "inputSchema": { "type": "object" } }
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(vec![server.uri()], Arc::new(AcceptAll));
    let client = RegistryClient::new(resolver);

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "search");
    assert_eq!(tools[0].input_schema["type"], "object");
}

#[tokio::test]
async fn session_token_is_echoed_on_subsequent_calls() {
    let server = MockServer::start().await;

    // First call: no token yet; the registry hands one back.
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(SESSION_TOKEN_HEADER, "tok-1")
                .set_body_json(json!({ "result": { "tools": [] } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(vec![server.uri()], Arc::new(AcceptAll));
    let client = RegistryClient::new(resolver);
    client.list_tools().await.unwrap();

    // Second call must carry the token; only a token-bearing request matches.
    server.reset().await;
    Mock::given(method("POST"))
        .and(header(SESSION_TOKEN_HEADER, "tok-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "result": { "hits": 0 } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let result = client
        .call_tool("search", json!({ "query": "X" }))
        .await
        .unwrap();
    assert_eq!(result["hits"], 0);
}

#[tokio::test]
async fn transport_failure_fails_over_to_the_next_candidate_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "result": { "tools": [] } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    // Candidate 0 accepts the probe but refuses connections; the retry
    // re-resolves to the live server.
    let probe = Arc::new(FirstThenSecond {
        probes: AtomicUsize::new(0),
    });
    let resolver = resolver_for(
        vec!["http://127.0.0.1:1".to_string(), server.uri()],
        probe,
    );
    let client = RegistryClient::new(resolver);

    let tools = client.list_tools().await.unwrap();
    assert!(tools.is_empty());
}

#[tokio::test]
async fn application_error_maps_to_tool_invocation_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": { "code": -32000, "message": "index offline" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(vec![server.uri()], Arc::new(AcceptAll));
    let client = RegistryClient::new(resolver);

    let err = client.call_tool("search", json!({})).await.unwrap_err();
    match err {
        PipelineError::ToolInvocation { code, message } => {
            assert_eq!(code, -32000);
            assert_eq!(message, "index offline");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn call_tool_wraps_name_and_arguments_in_params() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "tools/call",
            "params": { "name": "search", "arguments": { "query": "X" } }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "result": { "hits": 3 } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(vec![server.uri()], Arc::new(AcceptAll));
    let client = RegistryClient::new(resolver);

    let result = client.call_tool("search", json!({ "query": "X" })).await.unwrap();
    assert_eq!(result["hits"], 3);
}
