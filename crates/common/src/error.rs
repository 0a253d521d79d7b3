use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No reachable endpoint for service '{service}': {detail}")]
    NoReachableEndpoint { service: String, detail: String },

    #[error("Tool registry unavailable: {0}")]
    ToolUnavailable(String),

    #[error("Tool invocation failed (code {code}): {message}")]
    ToolInvocation { code: i64, message: String },

    #[error("Plan output could not be parsed: {0}")]
    PlanParse(String),

    #[error("Synthesis output could not be parsed: {0}")]
    SynthesisParse(String),

    #[error("Plan rejected by user")]
    UserRejected,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn no_reachable_endpoint(service: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::NoReachableEndpoint {
            service: service.into(),
            detail: detail.into(),
        }
    }

    pub fn tool_unavailable(msg: impl Into<String>) -> Self {
        Self::ToolUnavailable(msg.into())
    }

    /// True when the failure is transport-level and a resolver failover
    /// retry may still help.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ToolUnavailable(_) | Self::NoReachableEndpoint { .. }
        )
    }
}

/// Convert anyhow errors produced at the edges into pipeline errors
impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::ToolUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
