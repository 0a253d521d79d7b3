use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use queryflow_common::{EventSink, SessionId};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use crate::server::AppState;
use crate::types::{ErrorResponse, PlanSubmission};

/// Resume a turn after plan review and stream execution and synthesis
/// events to the terminal marker. An empty `edited_plan` cancels the turn.
#[instrument(skip(state, req), fields(session_id = %req.session_id, steps = req.edited_plan.len()))]
pub async fn plan_stream(
    State(state): State<AppState>,
    Json(req): Json<PlanSubmission>,
) -> Response {
    if req.session_id.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new(
                "Missing required field 'session_id'.",
                "MISSING_FIELD_SESSION_ID",
            )),
        )
            .into_response();
    }

    info!(
        steps = req.edited_plan.len(),
        "Plan submission received; resuming turn"
    );

    let (tx, rx) = mpsc::channel(64);
    let sink = EventSink::new(tx);
    let pipeline = state.pipeline.clone();
    let session_id = SessionId::from_string(req.session_id);

    tokio::spawn(async move {
        pipeline
            .run_plan_submission(
                session_id,
                req.edited_plan,
                &req.original_query,
                req.conversation_history,
                sink,
            )
            .await;
    });

    crate::routes::event_stream_response(rx)
}
