//! The turn pipeline.
//!
//! Control flow per turn: discover tools -> build plan -> review gate ->
//! execute tasks -> synthesize -> finalize. Events are emitted in strict
//! causal order into the turn's sink. Each session's turn is linear; turns
//! of different sessions run concurrently against the shared backends.

use queryflow_common::{
    EventSink, ExecutionPlan, ResearchCompletePayload, Session, SessionId, StreamEvent,
    SystemConfig, TurnEntry,
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use queryflow_history::SessionStore;
use queryflow_registry::{CompletionClient, ToolInvoker};

use crate::executor::TaskExecutor;
use crate::planner::{PlanBuilder, PlannerOutcome};
use crate::review::{EditedStep, FormRenderer, PlanReviewGate, ReviewDecision, SchemaFormRenderer};
use crate::synthesizer::Synthesizer;

const CANCELLED_MESSAGE: &str =
    "Plan review was cancelled. No tools were run and no answer was generated.";

pub struct Pipeline {
    store: Arc<SessionStore>,
    tools: Arc<dyn ToolInvoker>,
    planner: PlanBuilder,
    executor: TaskExecutor,
    synthesizer: Synthesizer,
    gate: PlanReviewGate,
    config: SystemConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<SessionStore>,
        tools: Arc<dyn ToolInvoker>,
        completion: Arc<dyn CompletionClient>,
        config: SystemConfig,
    ) -> Self {
        Self {
            store,
            planner: PlanBuilder::new(completion.clone(), config.planner.clone()),
            executor: TaskExecutor::new(tools.clone()),
            synthesizer: Synthesizer::new(completion, config.synthesizer.clone()),
            gate: PlanReviewGate::new(Arc::new(SchemaFormRenderer)),
            tools,
            config,
        }
    }

    /// Swap the form renderer used to annotate plans for review.
    pub fn with_form_renderer(mut self, renderer: Arc<dyn FormRenderer>) -> Self {
        self.gate = PlanReviewGate::new(renderer);
        self
    }

    /// First half of a turn: plan the query and either complete directly
    /// or pause at `PLAN_READY:` for review.
    #[instrument(skip(self, events, query), fields(query_len = query.len()))]
    pub async fn run_query(
        &self,
        session_id: Option<SessionId>,
        query: &str,
        events: EventSink,
    ) -> SessionId {
        let mut session = self.store.get_or_create(session_id).await;
        let id = session.id.clone();
        session.iteration += 1;
        session.final_response_generated = false;
        info!("Turn {} started for session {}", session.iteration, id);

        events
            .thinking("Analyzing the question and discovering available tools")
            .await;

        let tools = match self.tools.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                error!("Tool discovery failed: {}", e);
                events
                    .error("The tool registry is unreachable right now. Please try again shortly.")
                    .await;
                events.ended().await;
                self.store.save(session).await;
                return id;
            }
        };
        events
            .thinking(format!(
                "Found {} available tool(s); building an execution plan",
                tools.len()
            ))
            .await;

        let history = session
            .recent_turns(self.config.planner.max_history_turns)
            .to_vec();
        match self.planner.build(query, &tools, &history).await {
            Err(e) => {
                error!("No plan could be produced: {}", e);
                events
                    .error("No execution plan could be built for this request.")
                    .await;
                events.ended().await;
                self.store.save(session).await;
            }
            Ok(PlannerOutcome::Direct(content)) => {
                info!("Direct completion fast path taken for session {}", id);
                events
                    .thinking("No plan review needed; answering directly")
                    .await;
                let response = self
                    .synthesizer
                    .finalize_direct(query, content, &mut session);
                events
                    .emit(StreamEvent::ResearchComplete(ResearchCompletePayload {
                        final_report_direct: response.response_content,
                    }))
                    .await;
                events.ended().await;
                self.store.save(session).await;
            }
            Ok(PlannerOutcome::Plan(plan)) => {
                info!(
                    "Plan with {} task(s) drafted for session {}; awaiting review",
                    plan.tasks.len(),
                    id
                );
                events
                    .thinking(format!(
                        "Planned {} task(s); waiting for plan review",
                        plan.tasks.len()
                    ))
                    .await;
                let payload = self.gate.draft(&id, &plan, &tools);
                session.current_plan = Some(plan);
                self.store.save(session).await;
                events.emit(StreamEvent::PlanReady(payload)).await;
                // The stream ends here; execution resumes on plan submission.
            }
        }
        id
    }

    /// Second half of a turn: run the reviewed plan and synthesize the
    /// answer, or cancel on an empty submission.
    #[instrument(skip(self, events, edited_plan, original_query, fallback_history), fields(session_id = %session_id))]
    pub async fn run_plan_submission(
        &self,
        session_id: SessionId,
        edited_plan: Vec<EditedStep>,
        original_query: &str,
        fallback_history: Vec<TurnEntry>,
        events: EventSink,
    ) {
        let mut session = match self.store.get(&session_id).await {
            Some(session) => session,
            None => {
                // A submission from another process instance: rebuild the
                // session from the history the client carried along.
                warn!("Session {} unknown; rebuilding from submitted history", session_id);
                let mut session = Session::new(session_id.clone());
                session.history = fallback_history;
                session
            }
        };

        let tools = match self.tools.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                error!("Tool discovery failed during plan submission: {}", e);
                events
                    .error("The tool registry is unreachable right now. Please try again shortly.")
                    .await;
                events.ended().await;
                return;
            }
        };

        match self
            .gate
            .resolve_submission(session.current_plan.as_ref(), &edited_plan, &tools)
        {
            ReviewDecision::Rejected => {
                info!("Plan rejected for session {}; turn cancelled", session_id);
                session.current_plan = None;
                self.store.save(session).await;
                events.thinking("Plan rejected; nothing was executed").await;
                events
                    .emit(StreamEvent::AnswerData(CANCELLED_MESSAGE.to_string()))
                    .await;
                events.ended().await;
            }
            ReviewDecision::Approved(tasks) | ReviewDecision::Edited(tasks) => {
                let reasoning = session
                    .current_plan
                    .as_ref()
                    .map(|p| p.reasoning.clone())
                    .unwrap_or_else(|| "Reviewed plan".to_string());
                let mut plan = ExecutionPlan::new(reasoning, tasks);

                events
                    .thinking(format!("Executing {} task(s)", plan.tasks.len()))
                    .await;
                if let Err(e) = self.executor.execute(&mut plan, &events).await {
                    error!("Turn aborted: {}", e);
                    events
                        .error("Every known endpoint for the tool registry is unreachable; the turn was aborted.")
                        .await;
                    events.ended().await;
                    self.store.save(session).await;
                    return;
                }
                events
                    .thinking("All tasks finished; synthesizing the answer")
                    .await;

                let response = self
                    .synthesizer
                    .synthesize_turn(original_query, &plan, &mut session)
                    .await;

                if !response.turn_sources.is_empty() {
                    events
                        .emit(StreamEvent::SourcesData(response.turn_sources.clone()))
                        .await;
                }
                if !response.chart_options.is_empty() {
                    events
                        .emit(StreamEvent::ChartData(queryflow_common::ChartDataPayload {
                            chart_options: response.chart_options.clone(),
                        }))
                        .await;
                }
                events
                    .answer_chunks(
                        &response.response_content,
                        self.synthesizer.answer_chunk_size(),
                    )
                    .await;
                events.ended().await;
                self.store.save(session).await;
            }
        }
    }
}
