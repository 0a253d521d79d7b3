use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use queryflow_common::{EventSink, SessionId};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::server::AppState;
use crate::types::{ErrorResponse, QueryRequest};

/// Start a turn and stream its progress events over one chunked response.
///
/// The stream ends either at the terminal marker (direct completion or a
/// fatal error) or after `PLAN_READY:`, in which case the client resumes
/// via `POST /plan`.
#[instrument(skip(state, req), fields(query_len = req.query.len()))]
pub async fn query_stream(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Response {
    if req.query.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new(
                "Query cannot be empty. Please provide a query string.",
                "EMPTY_QUERY",
            )),
        )
            .into_response();
    }

    info!(
        query_preview = %req.query.chars().take(100).collect::<String>(),
        session_id = ?req.session_id,
        "Starting query turn"
    );

    let (tx, rx) = mpsc::channel(64);
    let sink = EventSink::new(tx);
    let pipeline = state.pipeline.clone();
    let session_id = req.session_id.map(SessionId::from_string);
    let query = req.query;

    // The turn runs detached so a slow consumer never blocks other
    // sessions; events drain through the channel into the body.
    tokio::spawn(async move {
        pipeline.run_query(session_id, &query, sink).await;
    });

    crate::routes::event_stream_response(rx)
}
