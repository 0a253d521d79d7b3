//! Sequential task execution.
//!
//! Tasks run strictly in `task_number` order because later tasks may
//! reference earlier results through deferred arguments. A failing task is
//! recorded and the loop continues; partial results are acceptable
//! synthesis input.

use queryflow_common::{
    ArgumentValue, EventSink, ExecutionPlan, PipelineError, Result, Task, TaskStatus,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use queryflow_registry::ToolInvoker;

pub struct TaskExecutor {
    tools: Arc<dyn ToolInvoker>,
}

impl TaskExecutor {
    pub fn new(tools: Arc<dyn ToolInvoker>) -> Self {
        Self { tools }
    }

    /// Run every task of the plan, mutating each task's status and result
    /// in place.
    ///
    /// Per-task failures are recorded and the loop continues. The only
    /// fatal outcome is resolver exhaustion: with no reachable registry
    /// left, the remaining tasks cannot run and the turn aborts.
    #[instrument(skip(self, plan, events), fields(tasks = plan.tasks.len()))]
    pub async fn execute(&self, plan: &mut ExecutionPlan, events: &EventSink) -> Result<()> {
        plan.tasks.sort_by_key(|t| t.task_number);
        let total = plan.tasks.len();

        for idx in 0..total {
            let resolved = resolve_arguments(&plan.tasks[idx].tool_arguments, &plan.tasks[..idx]);
            let task = &mut plan.tasks[idx];
            task.mark_executing();
            events
                .thinking(format!(
                    "Running task {}/{}: {}",
                    idx + 1,
                    total,
                    task.description
                ))
                .await;

            let arguments = match resolved {
                Ok(arguments) => arguments,
                Err(reason) => {
                    warn!("Task {} arguments unresolvable: {}", task.task_number, reason);
                    task.mark_failed(reason.clone());
                    events
                        .thinking(format!(
                            "Task {} could not run: {}",
                            task.task_number, reason
                        ))
                        .await;
                    continue;
                }
            };

            match self
                .tools
                .call_tool(&task.tool_name, Value::Object(arguments))
                .await
            {
                Ok(result) => {
                    debug!("Task {} completed", task.task_number);
                    task.mark_completed(result);
                }
                Err(e @ PipelineError::NoReachableEndpoint { .. }) => {
                    error!("Registry unreachable at task {}: {}", task.task_number, e);
                    task.mark_failed(e.to_string());
                    return Err(e);
                }
                Err(e) => {
                    warn!("Task {} failed: {}", task.task_number, e);
                    let reason = e.to_string();
                    task.mark_failed(reason.clone());
                    events
                        .thinking(format!("Task {} failed: {}", task.task_number, reason))
                        .await;
                }
            }
        }
        Ok(())
    }
}

/// Materialize a task's arguments, substituting each deferred reference
/// with the completed result of the earlier task it names.
fn resolve_arguments(
    arguments: &BTreeMap<String, ArgumentValue>,
    earlier: &[Task],
) -> std::result::Result<Map<String, Value>, String> {
    let mut resolved = Map::new();
    for (key, value) in arguments {
        let concrete = match value {
            ArgumentValue::Literal(v) => v.clone(),
            ArgumentValue::DeferredFromTask(n) => earlier
                .iter()
                .find(|t| t.task_number == *n && t.status == TaskStatus::Completed)
                .and_then(|t| t.result.clone())
                .ok_or_else(|| {
                    format!(
                        "argument '{}' depends on task {}, which has no completed result",
                        key, n
                    )
                })?,
        };
        resolved.insert(key.clone(), concrete);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn completed(n: u32, result: Value) -> Task {
        let mut task = Task::new(n, "search", BTreeMap::new(), "earlier");
        task.mark_executing();
        task.mark_completed(result);
        task
    }

    #[test]
    fn resolves_deferred_argument_from_completed_task() {
        let earlier = vec![completed(1, json!(["a", "b"]))];
        let mut arguments = BTreeMap::new();
        arguments.insert("items".to_string(), ArgumentValue::DeferredFromTask(1));
        arguments.insert(
            "mode".to_string(),
            ArgumentValue::Literal(json!("strict")),
        );

        let resolved = resolve_arguments(&arguments, &earlier).unwrap();
        assert_eq!(resolved["items"], json!(["a", "b"]));
        assert_eq!(resolved["mode"], json!("strict"));
    }

    #[test]
    fn deferred_reference_to_failed_task_is_an_error() {
        let mut failed = Task::new(1, "search", BTreeMap::new(), "earlier");
        failed.mark_executing();
        failed.mark_failed("boom");

        let mut arguments = BTreeMap::new();
        arguments.insert("items".to_string(), ArgumentValue::DeferredFromTask(1));

        let err = resolve_arguments(&arguments, &[failed]).unwrap_err();
        assert!(err.contains("task 1"));
    }

    #[test]
    fn deferred_reference_to_unknown_task_is_an_error() {
        let mut arguments = BTreeMap::new();
        arguments.insert("items".to_string(), ArgumentValue::DeferredFromTask(7));

        assert!(resolve_arguments(&arguments, &[]).is_err());
    }
}
