//! Plan construction: one bounded model call per turn.
//!
//! The model receives the query, the enabled tools, and a slice of recent
//! history, and must answer with a structured plan. Anything that fails
//! strict parsing degrades to a deterministic single-task fallback so the
//! pipeline always has a plan to execute.

use queryflow_common::{
    ArgumentValue, ExecutionPlan, PipelineError, PlannerConfig, Result, Task, ToolDescriptor,
    TurnEntry,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use queryflow_registry::CompletionClient;

/// What planning produced for this turn.
#[derive(Debug)]
pub enum PlannerOutcome {
    /// An ordered task list awaiting review and execution.
    Plan(ExecutionPlan),
    /// The model judged no tools are needed; the content is the answer.
    Direct(String),
}

#[derive(Debug, Deserialize)]
struct RawPlannerOutput {
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    tasks: Vec<RawTask>,
    #[serde(default)]
    direct_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(rename = "taskNumber")]
    task_number: u32,
    #[serde(rename = "toolName")]
    tool_name: String,
    #[serde(rename = "toolArguments", default)]
    tool_arguments: serde_json::Map<String, Value>,
    #[serde(default)]
    description: String,
}

pub struct PlanBuilder {
    completion: Arc<dyn CompletionClient>,
    config: PlannerConfig,
}

impl PlanBuilder {
    pub fn new(completion: Arc<dyn CompletionClient>, config: PlannerConfig) -> Self {
        Self { completion, config }
    }

    /// Build the turn's plan with exactly one model call.
    ///
    /// Fails only when no tools are enabled; every other problem (model
    /// unreachable, malformed output, unknown tool names) falls back to a
    /// deterministic single-task plan.
    #[instrument(skip(self, tools, history), fields(tools = tools.len()))]
    pub async fn build(
        &self,
        query: &str,
        tools: &[ToolDescriptor],
        history: &[TurnEntry],
    ) -> Result<PlannerOutcome> {
        if tools.is_empty() {
            return Err(PipelineError::PlanParse(
                "no enabled tools to plan against".to_string(),
            ));
        }

        let prompt = self.build_prompt(query, tools, history);
        let raw = match self.completion.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Planning model call failed ({}); using fallback plan", e);
                return Ok(PlannerOutcome::Plan(Self::fallback_plan(query, tools)));
            }
        };

        match self.parse(&raw, tools) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Plan output rejected ({}); using fallback plan", e);
                Ok(PlannerOutcome::Plan(Self::fallback_plan(query, tools)))
            }
        }
    }

    fn build_prompt(&self, query: &str, tools: &[ToolDescriptor], history: &[TurnEntry]) -> String {
        let mut prompt = String::from(
            "You are a research planner. Break the user's question into an ordered list of \
             tool invocations.\n\nRespond with strict JSON only, no prose, in this shape:\n\
             {\"reasoning\": \"...\", \"tasks\": [{\"taskNumber\": 1, \"toolName\": \"...\", \
             \"toolArguments\": {...}, \"description\": \"...\"}]}\n\
             An argument may reference an earlier task's output as {\"$fromTask\": N}.\n\
             If the question needs no tools at all, respond instead with \
             {\"reasoning\": \"...\", \"direct_response\": \"...\"}.\n",
        );

        prompt.push_str("\n# AVAILABLE TOOLS:\n");
        for tool in tools {
            prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            if !tool.input_schema.is_null() {
                prompt.push_str(&format!("  parameters: {}\n", tool.input_schema));
            }
        }

        if !history.is_empty() {
            prompt.push_str("\n# CONVERSATION HISTORY:\n");
            for entry in history {
                prompt.push_str(&format!("{}: {}\n", entry.role, entry.content));
            }
        }

        prompt.push_str(&format!("\n# USER QUERY:\n{}\n", query));
        prompt
    }

    /// Strict parse of the model output into a validated outcome.
    fn parse(&self, raw: &str, tools: &[ToolDescriptor]) -> Result<PlannerOutcome> {
        let parsed: RawPlannerOutput = serde_json::from_str(raw.trim())
            .map_err(|e| PipelineError::PlanParse(e.to_string()))?;

        if let Some(direct) = parsed.direct_response {
            if self.config.allow_direct_completion {
                debug!("Planner signalled direct completion");
                return Ok(PlannerOutcome::Direct(direct));
            }
            if parsed.tasks.is_empty() {
                return Err(PipelineError::PlanParse(
                    "direct completion disabled and no tasks planned".to_string(),
                ));
            }
        }

        if parsed.tasks.is_empty() {
            return Err(PipelineError::PlanParse("empty task list".to_string()));
        }

        let mut tasks = Vec::with_capacity(parsed.tasks.len());
        for raw_task in parsed.tasks {
            if !tools.iter().any(|t| t.name == raw_task.tool_name) {
                return Err(PipelineError::PlanParse(format!(
                    "unknown tool '{}'",
                    raw_task.tool_name
                )));
            }
            let arguments: BTreeMap<String, ArgumentValue> = raw_task
                .tool_arguments
                .into_iter()
                .map(|(k, v)| (k, ArgumentValue::from_raw(v)))
                .collect();
            tasks.push(Task::new(
                raw_task.task_number,
                raw_task.tool_name,
                arguments,
                raw_task.description,
            ));
        }
        tasks.sort_by_key(|t| t.task_number);

        Ok(PlannerOutcome::Plan(ExecutionPlan::new(
            parsed.reasoning,
            tasks,
        )))
    }

    /// Deterministic fallback: one task against the first enabled tool,
    /// with minimal arguments derived from the raw query.
    fn fallback_plan(query: &str, tools: &[ToolDescriptor]) -> ExecutionPlan {
        let tool = &tools[0];
        let mut arguments = BTreeMap::new();
        arguments.insert(
            "query".to_string(),
            ArgumentValue::Literal(Value::String(query.to_string())),
        );
        ExecutionPlan::new(
            "The model output could not be used as a plan; running a single lookup instead.",
            vec![Task::new(
                1,
                tool.name.clone(),
                arguments,
                format!("Look up information for: {}", query),
            )],
        )
    }
}
