//! One-shot query flow: stream, review, resume, render.

use anyhow::Result;
use std::io::Write;

use queryflow_common::{PlanReadyPayload, StreamAssemblyState, StreamEvent};
use queryflow_orchestrator::EditedStep;

use crate::api_client::ApiClient;

pub async fn execute(server: &str, query: &str, session: Option<&str>, auto_approve: bool) -> Result<()> {
    let client = ApiClient::new(server);

    let state = client.stream_query(query, session, print_progress).await?;

    if let Some(plan) = &state.plan {
        let edited = review_plan(plan, auto_approve)?;
        if edited.is_empty() {
            println!("Plan rejected.");
        }
        let state = client
            .submit_plan(&plan.session_id, &edited, query, print_progress)
            .await?;
        render_result(&state);
    } else {
        render_result(&state);
    }

    Ok(())
}

fn print_progress(event: &StreamEvent) {
    match event {
        StreamEvent::Thinking(text) => println!("  · {}", text),
        StreamEvent::Error(text) => eprintln!("  ! {}", text),
        _ => {}
    }
}

/// Show the drafted plan and collect the user's decision: approve as-is,
/// reject, or replace step descriptions.
fn review_plan(plan: &PlanReadyPayload, auto_approve: bool) -> Result<Vec<EditedStep>> {
    println!("\nProposed plan ({}):", plan.task_description);
    for step in &plan.plan_to_review {
        let arguments = serde_json::to_string(&step.tool_arguments)?;
        println!(
            "  {}. {}: {} {}",
            step.task_number, step.tool_name, step.description, arguments
        );
    }

    if auto_approve {
        println!("Auto-approving plan (--yes).");
        return Ok(approve_all(plan));
    }

    print!("Approve this plan? [Y/n] ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    match line.trim().to_lowercase().as_str() {
        "" | "y" | "yes" => Ok(approve_all(plan)),
        _ => Ok(Vec::new()),
    }
}

fn approve_all(plan: &PlanReadyPayload) -> Vec<EditedStep> {
    plan.plan_to_review
        .iter()
        .map(|step| EditedStep::Structured {
            task_number: Some(step.task_number),
            tool_name: step.tool_name.clone(),
            tool_arguments: step.tool_arguments.clone(),
            description: step.description.clone(),
        })
        .collect()
}

fn render_result(state: &StreamAssemblyState) {
    match state.final_answer() {
        Some(answer) => {
            println!("\n{}", answer);
        }
        None => {
            if state.errors.is_empty() {
                println!("\n(no answer was produced)");
            }
        }
    }

    if !state.sources.is_empty() {
        println!("\nSources:");
        for source in &state.sources {
            println!("  - {} <{}>", source.title, source.url);
        }
    }
    if !state.charts.is_empty() {
        println!("\n({} chart specification(s) attached)", state.charts.len());
    }
}
