//! Multi-task orchestration pipeline
//!
//! Turns a user query into a reviewed execution plan, runs the plan's
//! tasks sequentially against a tool registry, and synthesizes the final
//! answer, streaming typed progress events throughout.

pub mod executor;
pub mod pipeline;
pub mod planner;
pub mod review;
pub mod synthesizer;

pub use executor::TaskExecutor;
pub use pipeline::Pipeline;
pub use planner::{PlanBuilder, PlannerOutcome};
pub use review::{EditedStep, FormRenderer, PlanReviewGate, ReviewDecision, SchemaFormRenderer};
pub use synthesizer::Synthesizer;
