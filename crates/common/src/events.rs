//! Typed event stream between the pipeline and its client.
//!
//! A turn's progress is serialized one event per line, `TYPE:` prefix
//! followed by the payload. The decoder buffers partial lines across
//! arbitrary chunk boundaries and dispatches on complete lines only, so
//! the same byte stream split at any point decodes to the same events.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::types::{ArgumentValue, ChartSpec, FormField, SourceRef};

/// Payload of `PLAN_READY:`, the drafted plan surfaced for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReadyPayload {
    pub session_id: String,
    pub plan_to_review: Vec<PlanReviewStep>,
    pub task_description: String,
}

/// One reviewable step, annotated with the argument form for editing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanReviewStep {
    pub task_number: u32,
    pub tool_name: String,
    pub tool_arguments: BTreeMap<String, ArgumentValue>,
    pub description: String,
    #[serde(default)]
    pub fields: Vec<FormField>,
}

/// Payload of `RESEARCH_COMPLETE:`, the direct-completion fast path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchCompletePayload {
    pub final_report_direct: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartDataPayload {
    pub chart_options: Vec<ChartSpec>,
}

/// Events emitted by the pipeline, in causal order within a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Thinking(String),
    PlanReady(PlanReadyPayload),
    ResearchComplete(ResearchCompletePayload),
    SourcesData(Vec<SourceRef>),
    ChartData(ChartDataPayload),
    AnswerData(String),
    Error(String),
    StreamEnded,
}

const THINKING: &str = "THINKING:";
const PLAN_READY: &str = "PLAN_READY:";
const RESEARCH_COMPLETE: &str = "RESEARCH_COMPLETE:";
const SOURCES_DATA: &str = "SOURCES_DATA:";
const CHART_DATA: &str = "CHART_DATA:";
const ANSWER_DATA: &str = "ANSWER_DATA:";
const ANSWER_DATA_ENCODED: &str = "ANSWER_DATA_ENCODED:";
const ERROR: &str = "ERROR:";
const STREAM_ENDED: &str = "STREAM_ENDED_SESSION_DONE";

impl StreamEvent {
    /// Serialize as one newline-terminated line.
    ///
    /// Answer fragments containing a line break cannot travel raw on a
    /// line-delimited wire; those switch to the base64 form.
    pub fn encode(&self) -> String {
        match self {
            Self::Thinking(text) => format!("{}{}\n", THINKING, sanitize_line(text)),
            Self::PlanReady(payload) => {
                format!("{}{}\n", PLAN_READY, to_json_line(payload))
            }
            Self::ResearchComplete(payload) => {
                format!("{}{}\n", RESEARCH_COMPLETE, to_json_line(payload))
            }
            Self::SourcesData(sources) => {
                format!("{}{}\n", SOURCES_DATA, to_json_line(sources))
            }
            Self::ChartData(payload) => format!("{}{}\n", CHART_DATA, to_json_line(payload)),
            Self::AnswerData(fragment) => {
                if fragment.contains('\n') || fragment.contains('\r') {
                    format!("{}{}\n", ANSWER_DATA_ENCODED, BASE64.encode(fragment))
                } else {
                    format!("{}{}\n", ANSWER_DATA, fragment)
                }
            }
            Self::Error(text) => format!("{}{}\n", ERROR, sanitize_line(text)),
            Self::StreamEnded => format!("{}\n", STREAM_ENDED),
        }
    }

    /// Decode one complete line; `None` for blank or unrecognized input.
    pub fn decode_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            return None;
        }
        if line == STREAM_ENDED {
            return Some(Self::StreamEnded);
        }
        if let Some(rest) = line.strip_prefix(THINKING) {
            return Some(Self::Thinking(rest.to_string()));
        }
        if let Some(rest) = line.strip_prefix(PLAN_READY) {
            return from_json_line(rest).map(Self::PlanReady);
        }
        if let Some(rest) = line.strip_prefix(RESEARCH_COMPLETE) {
            return from_json_line(rest).map(Self::ResearchComplete);
        }
        if let Some(rest) = line.strip_prefix(SOURCES_DATA) {
            return from_json_line(rest).map(Self::SourcesData);
        }
        if let Some(rest) = line.strip_prefix(CHART_DATA) {
            return from_json_line(rest).map(Self::ChartData);
        }
        // The encoded prefix shares a stem with ANSWER_DATA: and must be
        // matched first.
        if let Some(rest) = line.strip_prefix(ANSWER_DATA_ENCODED) {
            return match BASE64.decode(rest) {
                Ok(bytes) => Some(Self::AnswerData(
                    String::from_utf8_lossy(&bytes).into_owned(),
                )),
                Err(e) => {
                    warn!("Discarding undecodable answer chunk: {}", e);
                    None
                }
            };
        }
        if let Some(rest) = line.strip_prefix(ANSWER_DATA) {
            return Some(Self::AnswerData(rest.to_string()));
        }
        if let Some(rest) = line.strip_prefix(ERROR) {
            return Some(Self::Error(rest.to_string()));
        }
        warn!("Skipping unrecognized stream line: {}", truncate(line, 80));
        None
    }
}

fn to_json_line<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        warn!("Failed to serialize stream payload: {}", e);
        "{}".to_string()
    })
}

fn from_json_line<T: for<'de> Deserialize<'de>>(raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to parse stream payload: {}", e);
            None
        }
    }
}

fn sanitize_line(text: &str) -> String {
    if text.contains('\n') || text.contains('\r') {
        text.replace(['\n', '\r'], " ")
    } else {
        text.to_string()
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Incremental line decoder; feed it chunks as they arrive.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk and return every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = StreamEvent::decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
        StreamEvent::decode_line(&line)
    }
}

/// Per-turn client-side state reconstructed from the event stream.
#[derive(Debug, Default)]
pub struct StreamAssemblyState {
    pub thinking_trail: Vec<String>,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub charts: Vec<ChartSpec>,
    pub plan: Option<PlanReadyPayload>,
    pub direct_report: Option<String>,
    pub errors: Vec<String>,
    pub done: bool,
}

impl StreamAssemblyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event; each event fully describes one state change.
    pub fn apply(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Thinking(text) => self.thinking_trail.push(text),
            StreamEvent::PlanReady(payload) => self.plan = Some(payload),
            StreamEvent::ResearchComplete(payload) => {
                self.direct_report = Some(payload.final_report_direct)
            }
            StreamEvent::SourcesData(sources) => self.sources.extend(sources),
            StreamEvent::ChartData(payload) => self.charts.extend(payload.chart_options),
            StreamEvent::AnswerData(fragment) => self.answer.push_str(&fragment),
            StreamEvent::Error(text) => self.errors.push(text),
            StreamEvent::StreamEnded => self.done = true,
        }
    }

    /// The assembled answer: a direct report wins over accumulated chunks.
    pub fn final_answer(&self) -> Option<&str> {
        self.direct_report
            .as_deref()
            .or(if self.answer.is_empty() {
                None
            } else {
                Some(self.answer.as_str())
            })
    }
}

/// Sending half of a turn's event channel.
///
/// Send errors are ignored: a consumer that went away must not fail the
/// pipeline, mirroring how status broadcasts drop events with no receivers.
#[derive(Clone)]
pub struct EventSink {
    sender: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    pub fn new(sender: mpsc::Sender<StreamEvent>) -> Self {
        Self { sender }
    }

    pub async fn emit(&self, event: StreamEvent) {
        if self.sender.send(event).await.is_err() {
            warn!("Event receiver dropped; discarding stream event");
        }
    }

    pub async fn thinking(&self, text: impl Into<String>) {
        self.emit(StreamEvent::Thinking(text.into())).await;
    }

    pub async fn error(&self, text: impl Into<String>) {
        self.emit(StreamEvent::Error(text.into())).await;
    }

    pub async fn answer_chunks(&self, content: &str, chunk_size: usize) {
        let chunk_size = chunk_size.max(1);
        let chars: Vec<char> = content.chars().collect();
        for chunk in chars.chunks(chunk_size) {
            self.emit(StreamEvent::AnswerData(chunk.iter().collect()))
                .await;
        }
    }

    pub async fn ended(&self) {
        self.emit(StreamEvent::StreamEnded).await;
    }
}
