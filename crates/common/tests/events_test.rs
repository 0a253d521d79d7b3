use queryflow_common::events::*;
use queryflow_common::types::{ChartSpec, SourceRef};
use serde_json::json;

fn sample_events() -> Vec<StreamEvent> {
    vec![
        StreamEvent::Thinking("Building execution plan".to_string()),
        StreamEvent::SourcesData(vec![SourceRef {
            title: "Archive".to_string(),
            url: "https://example.com/a".to_string(),
            snippet: "an excerpt".to_string(),
        }]),
        StreamEvent::ChartData(ChartDataPayload {
            chart_options: vec![ChartSpec(json!({ "type": "bar", "series": [1, 2, 3] }))],
        }),
        StreamEvent::AnswerData("<p>part one ".to_string()),
        StreamEvent::AnswerData("with\nnewlines</p>".to_string()),
        StreamEvent::Error("tool 'search' failed; continuing".to_string()),
        StreamEvent::StreamEnded,
    ]
}

fn encode_all(events: &[StreamEvent]) -> Vec<u8> {
    events.iter().map(|e| e.encode()).collect::<String>().into_bytes()
}

#[test]
fn test_roundtrip_all_event_types() {
    let events = sample_events();
    let bytes = encode_all(&events);

    let mut decoder = StreamDecoder::new();
    let decoded = decoder.push(&bytes);

    assert_eq!(decoded, events);
    assert!(decoder.finish().is_none());
}

#[test]
fn test_decoding_is_stable_under_any_chunk_boundary() {
    let events = sample_events();
    let bytes = encode_all(&events);

    for split in 0..=bytes.len() {
        let mut decoder = StreamDecoder::new();
        let mut decoded = decoder.push(&bytes[..split]);
        decoded.extend(decoder.push(&bytes[split..]));

        assert_eq!(decoded, events, "split at byte {}", split);
    }
}

#[test]
fn test_byte_at_a_time_decoding() {
    let events = sample_events();
    let bytes = encode_all(&events);

    let mut decoder = StreamDecoder::new();
    let mut decoded = Vec::new();
    for b in &bytes {
        decoded.extend(decoder.push(std::slice::from_ref(b)));
    }

    assert_eq!(decoded, events);
}

#[test]
fn test_multiline_answer_uses_encoded_form() {
    let event = StreamEvent::AnswerData("a\nb".to_string());
    let line = event.encode();

    assert!(line.starts_with("ANSWER_DATA_ENCODED:"));
    assert_eq!(line.matches('\n').count(), 1);
    assert_eq!(StreamEvent::decode_line(line.trim_end()), Some(event));
}

#[test]
fn test_single_line_answer_stays_raw() {
    let event = StreamEvent::AnswerData("plain fragment".to_string());
    let line = event.encode();

    assert!(line.starts_with("ANSWER_DATA:plain fragment"));
}

#[test]
fn test_unknown_and_blank_lines_are_skipped() {
    let mut decoder = StreamDecoder::new();
    let decoded = decoder.push(b"\nBOGUS:payload\nTHINKING:still here\n");

    assert_eq!(
        decoded,
        vec![StreamEvent::Thinking("still here".to_string())]
    );
}

#[test]
fn test_plan_ready_roundtrip() {
    let payload = PlanReadyPayload {
        session_id: "s-1".to_string(),
        plan_to_review: vec![PlanReviewStep {
            task_number: 1,
            tool_name: "search".to_string(),
            tool_arguments: [(
                "query".to_string(),
                queryflow_common::types::ArgumentValue::Literal(json!("X")),
            )]
            .into(),
            description: "search for X".to_string(),
            fields: vec![],
        }],
        task_description: "1 task planned".to_string(),
    };
    let event = StreamEvent::PlanReady(payload);

    let decoded = StreamEvent::decode_line(event.encode().trim_end());
    assert_eq!(decoded, Some(event));
}

#[test]
fn test_assembly_state_accumulates_in_order() {
    let mut state = StreamAssemblyState::new();
    for event in sample_events() {
        state.apply(event);
    }

    assert_eq!(state.thinking_trail.len(), 1);
    assert_eq!(state.sources.len(), 1);
    assert_eq!(state.charts.len(), 1);
    assert_eq!(state.errors.len(), 1);
    assert!(state.done);
    assert_eq!(
        state.final_answer(),
        Some("<p>part one with\nnewlines</p>")
    );
}

#[test]
fn test_assembly_state_direct_report_wins() {
    let mut state = StreamAssemblyState::new();
    state.apply(StreamEvent::AnswerData("chunked".to_string()));
    state.apply(StreamEvent::ResearchComplete(ResearchCompletePayload {
        final_report_direct: "direct".to_string(),
    }));

    assert_eq!(state.final_answer(), Some("direct"));
}

#[test]
fn test_finish_flushes_unterminated_line() {
    let mut decoder = StreamDecoder::new();
    assert!(decoder.push(b"THINKING:half a line").is_empty());

    assert_eq!(
        decoder.finish(),
        Some(StreamEvent::Thinking("half a line".to_string()))
    );
    assert!(decoder.finish().is_none());
}
