use anyhow::Result;
use futures::StreamExt;
use serde::Serialize;

use queryflow_common::{StreamAssemblyState, StreamDecoder, StreamEvent, TurnEntry};
use queryflow_orchestrator::EditedStep;

/// Client for the queryflow streaming API
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct QueryBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    query: &'a str,
}

#[derive(Serialize)]
struct PlanBody<'a> {
    session_id: &'a str,
    edited_plan: &'a [EditedStep],
    original_query: &'a str,
    conversation_history: &'a [TurnEntry],
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Submit a query and decode its event stream incrementally.
    pub async fn stream_query(
        &self,
        query: &str,
        session_id: Option<&str>,
        on_event: impl FnMut(&StreamEvent),
    ) -> Result<StreamAssemblyState> {
        let url = format!("{}/query", self.base_url);
        let body = QueryBody { session_id, query };
        self.stream_request(self.client.post(&url).json(&body), on_event)
            .await
    }

    /// Submit a reviewed (possibly edited, possibly empty) plan and decode
    /// the execution stream.
    pub async fn submit_plan(
        &self,
        session_id: &str,
        edited_plan: &[EditedStep],
        original_query: &str,
        on_event: impl FnMut(&StreamEvent),
    ) -> Result<StreamAssemblyState> {
        let url = format!("{}/plan", self.base_url);
        let body = PlanBody {
            session_id,
            edited_plan,
            original_query,
            conversation_history: &[],
        };
        self.stream_request(self.client.post(&url).json(&body), on_event)
            .await
    }

    async fn stream_request(
        &self,
        request: reqwest::RequestBuilder,
        mut on_event: impl FnMut(&StreamEvent),
    ) -> Result<StreamAssemblyState> {
        let response = request.send().await?;
        if !response.status().is_success() {
            anyhow::bail!("API request failed: {}", response.status());
        }

        let mut decoder = StreamDecoder::new();
        let mut state = StreamAssemblyState::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in decoder.push(&chunk) {
                on_event(&event);
                state.apply(event);
            }
        }
        if let Some(event) = decoder.finish() {
            on_event(&event);
            state.apply(event);
        }

        Ok(state)
    }
}
