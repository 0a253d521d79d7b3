pub mod plan;
pub mod query;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use queryflow_common::StreamEvent;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "server": "queryflow" }))
}

/// Bridge a turn's event channel into a chunked response body, one
/// encoded event line per chunk.
pub(crate) fn event_stream_response(mut rx: mpsc::Receiver<StreamEvent>) -> Response {
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok::<_, Infallible>(Bytes::from(event.encode()));
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
