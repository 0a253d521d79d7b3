use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use strum_macros::Display;
use uuid::Uuid;

/// How many conversation turns a session retains; oldest are evicted first.
pub const MAX_RETAINED_TURNS: usize = 10;

/// Unique identifier for sessions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One entry in a session's conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEntry {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TurnEntry {
    pub fn new_user(content: String) -> Self {
        Self {
            role: TurnRole::User,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn new_assistant(content: String) -> Self {
        Self {
            role: TurnRole::Assistant,
            content,
            timestamp: Utc::now(),
        }
    }
}

/// Per-conversation record keyed by session id. Mutated after every
/// completed turn; never deleted automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub history: Vec<TurnEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_plan: Option<ExecutionPlan>,
    #[serde(default)]
    pub final_response_generated: bool,
    #[serde(default)]
    pub iteration: u32,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            history: Vec::new(),
            current_plan: None,
            final_response_generated: false,
            iteration: 0,
        }
    }

    /// Number of retained turns (a turn starts at a user entry).
    pub fn turn_count(&self) -> usize {
        self.history
            .iter()
            .filter(|e| e.role == TurnRole::User)
            .count()
    }

    /// Append one completed user/assistant exchange, evicting the oldest
    /// turns beyond [`MAX_RETAINED_TURNS`].
    pub fn record_turn(&mut self, user: String, assistant: String) {
        self.history.push(TurnEntry::new_user(user));
        self.history.push(TurnEntry::new_assistant(assistant));
        self.retain_recent_turns(MAX_RETAINED_TURNS);
    }

    /// Entries belonging to the last `max` turns, oldest first.
    pub fn recent_turns(&self, max: usize) -> &[TurnEntry] {
        if max == 0 {
            return &[];
        }
        let mut seen = 0usize;
        for (idx, entry) in self.history.iter().enumerate().rev() {
            if entry.role == TurnRole::User {
                seen += 1;
                if seen == max {
                    return &self.history[idx..];
                }
            }
        }
        &self.history
    }

    fn retain_recent_turns(&mut self, max: usize) {
        while self.turn_count() > max {
            let Some(first_user) = self
                .history
                .iter()
                .position(|e| e.role == TurnRole::User)
            else {
                break;
            };
            let next_user = self.history[first_user + 1..]
                .iter()
                .position(|e| e.role == TurnRole::User)
                .map(|i| first_user + 1 + i)
                .unwrap_or(self.history.len());
            self.history.drain(..next_user);
        }
    }
}

/// A tool argument: either a concrete value or a reference to the output
/// of an earlier task, resolved by the executor before the call is issued.
///
/// Wire form: a literal serializes as itself; a deferred reference
/// serializes as `{"$fromTask": <taskNumber>}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    Literal(Value),
    DeferredFromTask(u32),
}

impl ArgumentValue {
    pub fn from_raw(value: Value) -> Self {
        if let Some(obj) = value.as_object() {
            if obj.len() == 1 {
                if let Some(n) = obj.get("$fromTask").and_then(Value::as_u64) {
                    return Self::DeferredFromTask(n as u32);
                }
            }
        }
        Self::Literal(value)
    }

    pub fn to_raw(&self) -> Value {
        match self {
            Self::Literal(v) => v.clone(),
            Self::DeferredFromTask(n) => serde_json::json!({ "$fromTask": n }),
        }
    }
}

impl Serialize for ArgumentValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ArgumentValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Self::from_raw(Value::deserialize(deserializer)?))
    }
}

/// Task execution status; transitions are monotonic and never revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
}

/// A single planned tool invocation and its execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_number: u32,
    pub tool_name: String,
    #[serde(default)]
    pub tool_arguments: BTreeMap<String, ArgumentValue>,
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Task {
    pub fn new(
        task_number: u32,
        tool_name: impl Into<String>,
        tool_arguments: BTreeMap<String, ArgumentValue>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            task_number,
            tool_name: tool_name.into(),
            tool_arguments,
            description: description.into(),
            status: TaskStatus::Pending,
            result: None,
        }
    }

    pub fn mark_executing(&mut self) {
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Executing;
        }
    }

    pub fn mark_completed(&mut self, result: Value) {
        if self.status == TaskStatus::Executing {
            self.status = TaskStatus::Completed;
            self.result = Some(result);
        }
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        if matches!(self.status, TaskStatus::Pending | TaskStatus::Executing) {
            self.status = TaskStatus::Failed;
            self.result = Some(serde_json::json!({ "error": error.into() }));
        }
    }
}

/// Ordered task list produced once per turn by the plan builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub reasoning: String,
    pub tasks: Vec<Task>,
}

impl ExecutionPlan {
    pub fn new(reasoning: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            reasoning: reasoning.into(),
            tasks,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Completed result of task `n`, if any.
    pub fn completed_result(&self, task_number: u32) -> Option<&Value> {
        self.tasks
            .iter()
            .find(|t| t.task_number == task_number && t.status == TaskStatus::Completed)
            .and_then(|t| t.result.as_ref())
    }
}

/// Read-only projection of completed task results fed to the synthesizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatheredItem {
    pub tool_name: String,
    pub result_excerpt: String,
}

/// Citation attached to a final response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// Opaque chart specification passed through to the client renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChartSpec(pub Value);

/// The synthesized, user-facing result of one turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResponse {
    pub reasoning: String,
    pub response_content: String,
    #[serde(default)]
    pub turn_sources: Vec<SourceRef>,
    #[serde(default)]
    pub chart_options: Vec<ChartSpec>,
}

impl FinalResponse {
    pub fn plain(reasoning: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            response_content: content.into(),
            turn_sources: Vec::new(),
            chart_options: Vec::new(),
        }
    }
}

/// Callable tool as advertised by a tool registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// One input field of a tool-argument form, derived from a parameter schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub kind: String,
    pub required: bool,
}
