//! Human-in-the-loop plan review.
//!
//! A drafted plan is surfaced for edit or approval before anything runs.
//! The gate's states are `PlanDrafted -> {Approved, Edited, Rejected}`;
//! rejection is terminal for the turn. Argument forms are produced through
//! the `FormRenderer` capability interface so the core never depends on
//! how fields are drawn.

use queryflow_common::{
    ArgumentValue, ExecutionPlan, FormField, PlanReadyPayload, PlanReviewStep, SessionId, Task,
    ToolDescriptor,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Renders an editable field set for a tool's parameters.
pub trait FormRenderer: Send + Sync {
    fn render(&self, tool_name: &str, parameter_schema: &Value) -> Vec<FormField>;
}

/// Default renderer: derives fields straight from a JSON schema's
/// `properties` and `required` sections.
pub struct SchemaFormRenderer;

impl FormRenderer for SchemaFormRenderer {
    fn render(&self, _tool_name: &str, parameter_schema: &Value) -> Vec<FormField> {
        let Some(properties) = parameter_schema
            .get("properties")
            .and_then(Value::as_object)
        else {
            return Vec::new();
        };
        let required: Vec<&str> = parameter_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        properties
            .iter()
            .map(|(name, schema)| FormField {
                name: name.clone(),
                kind: schema
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("string")
                    .to_string(),
                required: required.contains(&name.as_str()),
            })
            .collect()
    }
}

/// One element of a submitted `edited_plan`: either a structured step or
/// a bare replacement description for the task at the same position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EditedStep {
    Structured {
        #[serde(default)]
        task_number: Option<u32>,
        tool_name: String,
        #[serde(default)]
        tool_arguments: BTreeMap<String, ArgumentValue>,
        #[serde(default)]
        description: String,
    },
    Text(String),
}

/// Outcome of review for a drafted plan.
#[derive(Debug)]
pub enum ReviewDecision {
    /// The submission matches the drafted plan unchanged.
    Approved(Vec<Task>),
    /// The user rewrote steps or argument payloads.
    Edited(Vec<Task>),
    /// Empty submission: terminal, nothing executes.
    Rejected,
}

pub struct PlanReviewGate {
    renderer: Arc<dyn FormRenderer>,
}

impl PlanReviewGate {
    pub fn new(renderer: Arc<dyn FormRenderer>) -> Self {
        Self { renderer }
    }

    /// Surface a drafted plan for review, annotating each step with the
    /// argument form for its tool.
    pub fn draft(
        &self,
        session_id: &SessionId,
        plan: &ExecutionPlan,
        tools: &[ToolDescriptor],
    ) -> PlanReadyPayload {
        let steps = plan
            .tasks
            .iter()
            .map(|task| {
                let schema = tools
                    .iter()
                    .find(|t| t.name == task.tool_name)
                    .map(|t| t.input_schema.clone())
                    .unwrap_or(Value::Null);
                PlanReviewStep {
                    task_number: task.task_number,
                    tool_name: task.tool_name.clone(),
                    tool_arguments: task.tool_arguments.clone(),
                    description: task.description.clone(),
                    fields: self.renderer.render(&task.tool_name, &schema),
                }
            })
            .collect();

        PlanReadyPayload {
            session_id: session_id.to_string(),
            plan_to_review: steps,
            task_description: format!(
                "{} task(s) planned. {}",
                plan.tasks.len(),
                plan.reasoning
            ),
        }
    }

    /// Turn a submitted `edited_plan` into the task list that re-enters
    /// the executor. An empty submission is a rejection.
    pub fn resolve_submission(
        &self,
        original: Option<&ExecutionPlan>,
        edited: &[EditedStep],
        tools: &[ToolDescriptor],
    ) -> ReviewDecision {
        if edited.is_empty() {
            info!("Empty edited plan received; treating as rejection");
            return ReviewDecision::Rejected;
        }

        let mut tasks = Vec::with_capacity(edited.len());
        for (idx, step) in edited.iter().enumerate() {
            let position = idx as u32 + 1;
            match step {
                EditedStep::Structured {
                    task_number,
                    tool_name,
                    tool_arguments,
                    description,
                } => {
                    tasks.push(Task::new(
                        task_number.unwrap_or(position),
                        tool_name.clone(),
                        tool_arguments.clone(),
                        description.clone(),
                    ));
                }
                EditedStep::Text(text) => {
                    // A bare description keeps the original step's tool and
                    // arguments when one exists at this position.
                    if let Some(task) = original.and_then(|p| p.tasks.get(idx)) {
                        tasks.push(Task::new(
                            position,
                            task.tool_name.clone(),
                            task.tool_arguments.clone(),
                            text.clone(),
                        ));
                    } else if let Some(tool) = tools.first() {
                        let mut arguments = BTreeMap::new();
                        arguments.insert(
                            "query".to_string(),
                            ArgumentValue::Literal(Value::String(text.clone())),
                        );
                        tasks.push(Task::new(position, tool.name.clone(), arguments, text.clone()));
                    } else {
                        debug!("Dropping unmappable edited step: {}", text);
                    }
                }
            }
        }

        if tasks.is_empty() {
            return ReviewDecision::Rejected;
        }

        if Self::matches_original(original, &tasks) {
            ReviewDecision::Approved(tasks)
        } else {
            ReviewDecision::Edited(tasks)
        }
    }

    fn matches_original(original: Option<&ExecutionPlan>, tasks: &[Task]) -> bool {
        let Some(plan) = original else {
            return false;
        };
        plan.tasks.len() == tasks.len()
            && plan.tasks.iter().zip(tasks).all(|(a, b)| {
                a.tool_name == b.tool_name
                    && a.tool_arguments == b.tool_arguments
                    && a.description == b.description
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate() -> PlanReviewGate {
        PlanReviewGate::new(Arc::new(SchemaFormRenderer))
    }

    fn search_tool() -> ToolDescriptor {
        ToolDescriptor {
            name: "search".to_string(),
            description: "Full text search".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer" }
                },
                "required": ["query"]
            }),
        }
    }

    fn original_plan() -> ExecutionPlan {
        let mut arguments = BTreeMap::new();
        arguments.insert(
            "query".to_string(),
            ArgumentValue::Literal(json!("X")),
        );
        ExecutionPlan::new(
            "single lookup",
            vec![Task::new(1, "search", arguments, "find X")],
        )
    }

    #[test]
    fn draft_annotates_steps_with_schema_fields() {
        let payload = gate().draft(
            &SessionId::from_string("s-1".to_string()),
            &original_plan(),
            &[search_tool()],
        );

        assert_eq!(payload.session_id, "s-1");
        assert_eq!(payload.plan_to_review.len(), 1);
        let fields = &payload.plan_to_review[0].fields;
        assert_eq!(fields.len(), 2);
        let query = fields.iter().find(|f| f.name == "query").unwrap();
        assert!(query.required);
        assert_eq!(query.kind, "string");
        let limit = fields.iter().find(|f| f.name == "limit").unwrap();
        assert!(!limit.required);
    }

    #[test]
    fn empty_submission_is_rejection() {
        let decision = gate().resolve_submission(Some(&original_plan()), &[], &[search_tool()]);
        assert!(matches!(decision, ReviewDecision::Rejected));
    }

    #[test]
    fn unchanged_submission_is_approval() {
        let plan = original_plan();
        let edited = vec![EditedStep::Structured {
            task_number: Some(1),
            tool_name: "search".to_string(),
            tool_arguments: plan.tasks[0].tool_arguments.clone(),
            description: "find X".to_string(),
        }];

        let decision = gate().resolve_submission(Some(&plan), &edited, &[search_tool()]);
        assert!(matches!(decision, ReviewDecision::Approved(ref t) if t.len() == 1));
    }

    #[test]
    fn rewritten_arguments_are_an_edit() {
        let plan = original_plan();
        let mut arguments = BTreeMap::new();
        arguments.insert(
            "query".to_string(),
            ArgumentValue::Literal(json!("Y instead")),
        );
        let edited = vec![EditedStep::Structured {
            task_number: None,
            tool_name: "search".to_string(),
            tool_arguments: arguments,
            description: "find Y".to_string(),
        }];

        let decision = gate().resolve_submission(Some(&plan), &edited, &[search_tool()]);
        let ReviewDecision::Edited(tasks) = decision else {
            panic!("expected an edit");
        };
        assert_eq!(
            tasks[0].tool_arguments["query"],
            ArgumentValue::Literal(json!("Y instead"))
        );
    }

    #[test]
    fn bare_text_step_keeps_original_tooling() {
        let plan = original_plan();
        let edited = vec![EditedStep::Text("narrow the search to 2024".to_string())];

        let decision = gate().resolve_submission(Some(&plan), &edited, &[search_tool()]);
        let ReviewDecision::Edited(tasks) = decision else {
            panic!("expected an edit");
        };
        assert_eq!(tasks[0].tool_name, "search");
        assert_eq!(tasks[0].description, "narrow the search to 2024");
        assert_eq!(
            tasks[0].tool_arguments["query"],
            ArgumentValue::Literal(json!("X"))
        );
    }

    #[test]
    fn edited_step_deserializes_from_string_or_object() {
        let steps: Vec<EditedStep> = serde_json::from_value(json!([
            "just a description",
            { "tool_name": "search", "tool_arguments": { "query": "X" }, "description": "d" }
        ]))
        .unwrap();

        assert!(matches!(steps[0], EditedStep::Text(_)));
        assert!(matches!(steps[1], EditedStep::Structured { .. }));
    }
}
