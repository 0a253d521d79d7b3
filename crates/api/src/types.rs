use chrono::{DateTime, Utc};
use queryflow_common::TurnEntry;
use queryflow_orchestrator::EditedStep;
use serde::{Deserialize, Serialize};

/// Body of `POST /query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    /// Omit to start a new conversation.
    #[serde(default)]
    pub session_id: Option<String>,
    pub query: String,
}

/// Body of `POST /plan`: resume a turn after plan review.
///
/// An empty `edited_plan` is a user cancellation. `conversation_history`
/// lets a client resume against an instance that does not hold the session.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanSubmission {
    pub session_id: String,
    #[serde(default)]
    pub edited_plan: Vec<EditedStep>,
    pub original_query: String,
    #[serde(default)]
    pub conversation_history: Vec<TurnEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            timestamp: Utc::now(),
        }
    }
}
