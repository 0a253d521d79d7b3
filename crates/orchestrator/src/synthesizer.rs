//! Answer synthesis: the second and final model call of a turn.
//!
//! The fallback chain is total. Structured parsing is tried first, then a
//! recognizable content region is recovered from the raw output, and as a
//! last resort a fixed error message becomes the response. A turn always
//! ends with a `FinalResponse`.

use queryflow_common::{
    ExecutionPlan, FinalResponse, GatheredItem, Session, SynthesizerConfig, TaskStatus,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use queryflow_registry::CompletionClient;

pub struct Synthesizer {
    completion: Arc<dyn CompletionClient>,
    config: SynthesizerConfig,
}

impl Synthesizer {
    pub fn new(completion: Arc<dyn CompletionClient>, config: SynthesizerConfig) -> Self {
        Self { completion, config }
    }

    pub fn answer_chunk_size(&self) -> usize {
        self.config.answer_chunk_size
    }

    /// Project completed task results into bounded excerpts for the
    /// synthesis prompt. Stored results stay untouched.
    pub fn gather(plan: &ExecutionPlan, excerpt_limit: usize) -> Vec<GatheredItem> {
        plan.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .filter_map(|t| {
                t.result.as_ref().map(|result| GatheredItem {
                    tool_name: t.tool_name.clone(),
                    result_excerpt: excerpt(result, excerpt_limit),
                })
            })
            .collect()
    }

    /// Synthesize the turn's answer and finalize the session: this is the
    /// single point that sets `final_response_generated` and appends the
    /// turn to history.
    #[instrument(skip(self, plan, session), fields(completed = plan.tasks.iter().filter(|t| t.status == TaskStatus::Completed).count()))]
    pub async fn synthesize_turn(
        &self,
        query: &str,
        plan: &ExecutionPlan,
        session: &mut Session,
    ) -> FinalResponse {
        let gathered = Self::gather(plan, self.config.excerpt_limit);
        debug!("Synthesizing from {} gathered results", gathered.len());

        let prompt = self.build_prompt(query, &gathered);
        let response = match self.completion.complete(&prompt).await {
            Ok(raw) => self.parse_with_fallbacks(&raw),
            Err(e) => {
                warn!("Synthesis model call failed: {}", e);
                FinalResponse::plain(
                    "The synthesis call did not complete.",
                    self.config.fallback_message.clone(),
                )
            }
        };

        self.finalize(query, response, session)
    }

    /// Finalize a direct-completion turn without a second model call.
    pub fn finalize_direct(
        &self,
        query: &str,
        content: String,
        session: &mut Session,
    ) -> FinalResponse {
        let response = FinalResponse::plain("Direct completion; no tools were required.", content);
        self.finalize(query, response, session)
    }

    fn finalize(
        &self,
        query: &str,
        response: FinalResponse,
        session: &mut Session,
    ) -> FinalResponse {
        session.final_response_generated = true;
        session.record_turn(query.to_string(), response.response_content.clone());
        // The plan is consumed once; it does not outlive synthesis.
        session.current_plan = None;
        response
    }

    fn build_prompt(&self, query: &str, gathered: &[GatheredItem]) -> String {
        let mut prompt = String::from(
            "You are writing the final answer for a research assistant.\n\
             Respond with strict JSON only: {\"reasoning\": \"...\", \"response_content\": \"...\"}.\n\
             \"response_content\" is an HTML fragment. Optionally include \"turn_sources\" \
             ([{\"title\", \"url\", \"snippet\"}]) and \"chart_options\" (a list of chart specs).\n",
        );

        if gathered.is_empty() {
            prompt.push_str("\n# GATHERED INFORMATION:\n(no tool produced a result)\n");
        } else {
            prompt.push_str(&format!(
                "\n# GATHERED INFORMATION ({} results):\n",
                gathered.len()
            ));
            for item in gathered {
                prompt.push_str(&format!("## {}\n{}\n", item.tool_name, item.result_excerpt));
            }
        }

        prompt.push_str(&format!("\n# USER QUERY:\n{}\n", query));
        prompt
    }

    /// Three-tier parse: strict JSON, then structural extraction, then the
    /// fixed fallback message.
    fn parse_with_fallbacks(&self, raw: &str) -> FinalResponse {
        match serde_json::from_str::<FinalResponse>(raw.trim()) {
            Ok(response) => return response,
            Err(e) => debug!("Structured synthesis parse failed: {}", e),
        }

        if let Some(fragment) = extract_fragment(raw) {
            warn!("Recovered answer fragment from unstructured synthesis output");
            return FinalResponse::plain(
                "Recovered from unstructured model output.",
                fragment,
            );
        }

        warn!("Synthesis output unusable; emitting fallback message");
        FinalResponse::plain(
            "The model output could not be parsed.",
            self.config.fallback_message.clone(),
        )
    }
}

fn excerpt(result: &Value, limit: usize) -> String {
    let text = match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= limit {
        text
    } else {
        text.chars().take(limit).collect()
    }
}

/// Recover a renderable region from malformed model output: either the
/// value of a `response_content` key or the outermost markup-looking span.
fn extract_fragment(raw: &str) -> Option<String> {
    if let Some(content) = extract_json_string_field(raw, "response_content") {
        return Some(content);
    }

    let start = raw.find('<')?;
    let end = raw.rfind('>')?;
    if end > start && raw[start..=end].contains("</") {
        return Some(raw[start..=end].to_string());
    }
    None
}

/// Pull a JSON string value for `field` out of text that is not valid
/// JSON as a whole, honoring backslash escapes.
fn extract_json_string_field(raw: &str, field: &str) -> Option<String> {
    let key = format!("\"{}\"", field);
    let key_pos = raw.find(&key)?;
    let after = &raw[key_pos + key.len()..];
    let colon = after.find(':')?;
    let after = after[colon + 1..].trim_start();
    if !after.starts_with('"') {
        return None;
    }

    let bytes = after.as_bytes();
    let mut escaped = false;
    for i in 1..bytes.len() {
        match bytes[i] {
            b'\\' if !escaped => escaped = true,
            b'"' if !escaped => return serde_json::from_str::<String>(&after[..=i]).ok(),
            _ => escaped = false,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn excerpt_bounds_long_results() {
        let result = json!("x".repeat(50));
        assert_eq!(excerpt(&result, 10).chars().count(), 10);
        assert_eq!(excerpt(&json!("short"), 10), "short");
    }

    #[test]
    fn gather_only_includes_completed_tasks() {
        use queryflow_common::Task;
        use std::collections::BTreeMap;

        let mut done = Task::new(1, "search", BTreeMap::new(), "d");
        done.mark_executing();
        done.mark_completed(json!("result one"));
        let mut failed = Task::new(2, "count", BTreeMap::new(), "d");
        failed.mark_executing();
        failed.mark_failed("no");

        let plan = ExecutionPlan::new("r", vec![done, failed]);
        let gathered = Synthesizer::gather(&plan, 100);

        assert_eq!(gathered.len(), 1);
        assert_eq!(gathered[0].tool_name, "search");
        assert_eq!(gathered[0].result_excerpt, "result one");
    }

    #[test]
    fn extracts_response_content_from_truncated_json() {
        let raw = r#"{"reasoning": "...", "response_content": "<p>the \"answer\"</p>", "turn_so"#;
        assert_eq!(
            extract_fragment(raw).unwrap(),
            "<p>the \"answer\"</p>"
        );
    }

    #[test]
    fn extracts_markup_region_from_prose() {
        let raw = "Sure! Here is the answer:\n<div><b>42</b></div>\nHope that helps.";
        assert_eq!(extract_fragment(raw).unwrap(), "<div><b>42</b></div>");
    }

    #[test]
    fn plain_prose_yields_no_fragment() {
        assert!(extract_fragment("no structure here at all").is_none());
    }
}
