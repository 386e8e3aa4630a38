//! End-to-end task loop tests against a scripted generation client.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use redraft_core::ai::types::AiTool;
use redraft_core::task::{DispatchedToolResult, TaskError, ToolDispatcher};
use redraft_core::{
    CallOptions, GenerationClient, GenerationRequest, StreamPart, TaskConfig, TaskEvent, TaskInput,
    TaskKind, TaskOrchestrator, TaskOutcome, TaskPrompt, TaskReport, TaskServices, TaskStatus,
    ToolBudgets, Unit,
};

// ── Scripted collaborators ─────────────────────────────────────────────

/// Plays back one prepared fragment list per turn, in order.
struct ScriptedClient {
    turns: Mutex<VecDeque<Vec<StreamPart>>>,
}

impl ScriptedClient {
    fn new(turns: Vec<Vec<StreamPart>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
        })
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn call_streaming(
        &self,
        _request: GenerationRequest,
        _options: &CallOptions,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>> {
        let parts = self.turns.lock().unwrap().pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::unbounded_channel();
        for part in parts {
            let _ = tx.send(part);
        }
        Ok(rx)
    }
}

/// Never produces output; the stream stays open until cancelled.
struct HangingClient {
    keep_alive: Mutex<Vec<mpsc::UnboundedSender<StreamPart>>>,
}

impl HangingClient {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            keep_alive: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl GenerationClient for HangingClient {
    async fn call_streaming(
        &self,
        _request: GenerationRequest,
        _options: &CallOptions,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.keep_alive.lock().unwrap().push(tx);
        Ok(rx)
    }
}

struct RecordingDispatcher {
    invoked: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            invoked: Mutex::new(Vec::new()),
        })
    }

    fn invocations(&self) -> Vec<String> {
        self.invoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolDispatcher for RecordingDispatcher {
    async fn invoke(&self, call: &redraft_core::ai::types::AiToolCall) -> DispatchedToolResult {
        self.invoked.lock().unwrap().push(call.name.clone());
        DispatchedToolResult {
            content: format!("looked up: {}", call.arguments),
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

fn text(s: &str) -> Vec<StreamPart> {
    vec![StreamPart::TextDelta { delta: s.into() }]
}

fn tool_turn(status_json: &str, id: &str, name: &str) -> Vec<StreamPart> {
    vec![
        StreamPart::TextDelta {
            delta: status_json.into(),
        },
        StreamPart::ToolCallComplete {
            tool_call: redraft_core::ai::types::AiToolCall {
                id: id.into(),
                name: name.into(),
                arguments: json!({"term": "fox"}),
            },
        },
    ]
}

fn lookup_tool() -> AiTool {
    AiTool {
        name: "glossary_lookup".into(),
        description: "Look up a term in the project glossary".into(),
        input_schema: json!({"type": "object"}),
    }
}

fn prompt() -> TaskPrompt {
    TaskPrompt {
        system: "You translate English paragraphs into German.".into(),
        instructions: "Translate every paragraph below.".into(),
    }
}

fn units(n: usize) -> Vec<Unit> {
    (1..=n)
        .map(|i| Unit::new(format!("p{i}"), format!("Paragraph number {i}.")))
        .collect()
}

async fn run_task(
    client: Arc<dyn GenerationClient>,
    dispatcher: Arc<RecordingDispatcher>,
    config: TaskConfig,
    units: Vec<Unit>,
) -> (TaskReport, Vec<TaskEvent>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("redraft_core=debug")
        .try_init();

    let services = TaskServices {
        generation: client,
        tools: dispatcher,
        granted_tools: vec![lookup_tool()],
        budgets: ToolBudgets::new(),
    };
    let mut handle = TaskOrchestrator::new(services, config).run(units);
    let report = handle.report.await.expect("task panicked");

    let mut events = Vec::new();
    while let Some(event) = handle.events.recv().await {
        events.push(event);
    }
    (report, events)
}

fn config(kind: TaskKind) -> TaskConfig {
    TaskConfig::new(kind, prompt())
}

fn assert_success(report: &TaskReport) {
    assert!(
        report.outcome.is_success(),
        "expected success, got {:?}",
        report.outcome
    );
    assert_eq!(report.last_status, TaskStatus::End);
}

// ── Tests ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_with_planning_tools_and_review() {
    let client = ScriptedClient::new(vec![
        tool_turn(r#"{"status":"planning"}"#, "c1", "glossary_lookup"),
        text(
            r#"{"status":"working","paragraphs":[{"id":"p1","text":"Absatz eins."},{"id":"p2","text":"Absatz zwei."}],"title":"Die Probe"}"#,
        ),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);
    let dispatcher = RecordingDispatcher::new();

    let (report, events) = run_task(
        client,
        dispatcher.clone(),
        config(TaskKind::translation()),
        units(2),
    )
    .await;

    assert_success(&report);
    assert_eq!(report.paragraphs.len(), 2);
    assert_eq!(
        report.paragraphs.get("p1").map(String::as_str),
        Some("Absatz eins.")
    );
    assert_eq!(report.title.as_deref(), Some("Die Probe"));
    assert_eq!(report.turns, 4);
    assert_eq!(dispatcher.invocations(), vec!["glossary_lookup"]);
    assert!(events
        .iter()
        .any(|e| matches!(e, TaskEvent::TitleRecorded { .. })));
    assert_eq!(report.transcript.len(), 4);
}

#[tokio::test]
async fn incomplete_review_is_bounced_with_missing_ids() {
    // Scenario: 3 units, model delivers only p1 then tries to review.
    let client = ScriptedClient::new(vec![
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"x"}]}"#),
        text(r#"{"status":"review"}"#),
        text(
            r#"{"status":"working","paragraphs":[{"id":"p2","text":"y"},{"id":"p3","text":"z"}]}"#,
        ),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);

    let (report, events) = run_task(
        client,
        RecordingDispatcher::new(),
        config(TaskKind::translation()),
        units(3),
    )
    .await;

    assert_success(&report);
    assert_eq!(report.paragraphs.len(), 3);

    let bounce = events.iter().find_map(|e| match e {
        TaskEvent::ProtocolCorrection { detail, .. } if detail.contains("missing") => Some(detail),
        _ => None,
    });
    let bounce = bounce.expect("review should have been bounced");
    assert!(bounce.contains("p2") && bounce.contains("p3"));
}

#[tokio::test]
async fn empty_working_turns_trigger_progress_directive() {
    // Scenario: two consecutive zero-content working turns.
    let client = ScriptedClient::new(vec![
        text(r#"{"status":"working"}"#),
        text(r#"{"status":"working"}"#),
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"endlich"}]}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);

    let (report, events) = run_task(
        client,
        RecordingDispatcher::new(),
        config(TaskKind::translation()),
        units(1),
    )
    .await;

    assert_success(&report);
    let directive = events.iter().find_map(|e| match e {
        TaskEvent::ProgressDirective { status, .. } => Some(status.clone()),
        _ => None,
    });
    assert_eq!(directive.as_deref(), Some("working"));
}

#[tokio::test]
async fn skipping_review_is_rejected_and_corrected() {
    let client = ScriptedClient::new(vec![
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"fertig"}]}"#),
        // Illegal: the verification-enabled kind has no working→end edge.
        text(r#"{"status":"end"}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);

    let (report, events) = run_task(
        client,
        RecordingDispatcher::new(),
        config(TaskKind::translation()),
        units(1),
    )
    .await;

    assert_success(&report);
    assert!(events.iter().any(|e| matches!(
        e,
        TaskEvent::ProtocolCorrection { detail, .. } if detail.contains("\"end\"")
    )));
    // The rejected turn stays in the transcript.
    assert!(report
        .transcript
        .turns()
        .iter()
        .any(|t| t.rejection.is_some()));
}

#[tokio::test]
async fn backwards_transition_is_rejected() {
    let client = ScriptedClient::new(vec![
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"eins"}]}"#),
        text(r#"{"status":"planning"}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);

    let (report, events) = run_task(
        client,
        RecordingDispatcher::new(),
        config(TaskKind::translation()),
        units(1),
    )
    .await;

    assert_success(&report);
    assert!(events.iter().any(|e| matches!(
        e,
        TaskEvent::ProtocolCorrection { detail, .. } if detail.contains("planning")
    )));
}

#[tokio::test]
async fn ungranted_tool_is_refused_without_dispatch() {
    // Scenario: the model asks for a tool outside the granted set.
    let client = ScriptedClient::new(vec![
        tool_turn(r#"{"status":"planning"}"#, "c1", "entity_delete"),
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"eins"}]}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);
    let dispatcher = RecordingDispatcher::new();

    let (report, events) = run_task(
        client,
        dispatcher.clone(),
        config(TaskKind::translation()),
        units(1),
    )
    .await;

    assert_success(&report);
    assert!(dispatcher.invocations().is_empty());
    assert!(events.iter().any(|e| matches!(
        e,
        TaskEvent::ToolRefused { name, .. } if name == "entity_delete"
    )));
}

#[tokio::test]
async fn proofread_kind_ends_straight_from_working() {
    let client = ScriptedClient::new(vec![
        text(r#"{"status":"working","paragraphs":[{"id":"p2","text":"nur diese"}]}"#),
        text(r#"{"status":"end"}"#),
    ]);

    let (report, _) = run_task(
        client,
        RecordingDispatcher::new(),
        config(TaskKind::proofread()),
        units(3),
    )
    .await;

    assert_success(&report);
    // Changed-only kinds finish without covering every unit.
    assert_eq!(report.paragraphs.len(), 1);
    assert_eq!(report.turns, 2);
}

#[tokio::test]
async fn review_is_rejected_entirely_for_proofread_kind() {
    let client = ScriptedClient::new(vec![
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"anders"}]}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);

    let (report, events) = run_task(
        client,
        RecordingDispatcher::new(),
        config(TaskKind::proofread()),
        units(1),
    )
    .await;

    assert_success(&report);
    assert!(events.iter().any(|e| matches!(
        e,
        TaskEvent::ProtocolCorrection { detail, .. } if detail.contains("review")
    )));
}

#[tokio::test]
async fn content_outside_working_is_a_violation() {
    let client = ScriptedClient::new(vec![
        // Content in a planning turn. Kept under the validator's scan
        // threshold so the full parser is the one that catches it.
        text(r#"{"status":"planning","title":"zu früh"}"#),
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"eins"}]}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);

    let (report, events) = run_task(
        client,
        RecordingDispatcher::new(),
        config(TaskKind::translation()),
        units(1),
    )
    .await;

    assert_success(&report);
    assert!(report.title.is_none(), "early title must not be recorded");
    assert!(events.iter().any(|e| matches!(
        e,
        TaskEvent::ProtocolCorrection { detail, .. } if detail.contains("content")
    )));
}

#[tokio::test]
async fn midstream_violation_aborts_the_turn() {
    // Long enough for the stream validator to scan before the text ends;
    // the backwards status gets the turn cancelled mid-flight.
    let padded = format!(
        r#"{{"status":"planning","note":"{}"}}"#,
        "reconsidering everything ".repeat(8)
    );
    let client = ScriptedClient::new(vec![
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"eins"}]}"#),
        text(&padded),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);

    let (report, events) = run_task(
        client,
        RecordingDispatcher::new(),
        config(TaskKind::translation()),
        units(1),
    )
    .await;

    assert_success(&report);
    assert!(events.iter().any(|e| matches!(
        e,
        TaskEvent::ProtocolCorrection { detail, .. } if detail.contains("not reachable")
    )));
}

#[tokio::test]
async fn unparseable_turn_requests_wellformed_output() {
    let client = ScriptedClient::new(vec![
        text("I think I will start with the second paragraph."),
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"eins"}]}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);

    let (report, events) = run_task(
        client,
        RecordingDispatcher::new(),
        config(TaskKind::translation()),
        units(1),
    )
    .await;

    assert_success(&report);
    assert!(events.iter().any(|e| matches!(
        e,
        TaskEvent::ProtocolCorrection { detail, .. } if detail.contains("envelope")
    )));
}

#[tokio::test]
async fn identical_resubmission_notifies_once_overwrite_twice() {
    let client = ScriptedClient::new(vec![
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"A"}]}"#),
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"A"}]}"#),
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"B"}]}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);

    let (report, events) = run_task(
        client,
        RecordingDispatcher::new(),
        config(TaskKind::translation()),
        units(1),
    )
    .await;

    assert_success(&report);
    assert_eq!(report.paragraphs.get("p1").map(String::as_str), Some("B"));

    let notifications: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            TaskEvent::ParagraphRecorded { unit_id, text } if unit_id == "p1" => {
                Some(text.as_str())
            }
            _ => None,
        })
        .collect();
    assert_eq!(notifications, vec!["A", "B"]);
}

#[tokio::test]
async fn degenerated_output_retries_the_whole_chunk() {
    let garbage = format!(
        r#"{{"status":"working","paragraphs":[{{"id":"p1","text":"{}"}}]}}"#,
        "!".repeat(200)
    );
    let client = ScriptedClient::new(vec![
        text(&garbage),
        // Fresh attempt after the retry.
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"sauber"}]}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);

    let (report, events) = run_task(
        client,
        RecordingDispatcher::new(),
        config(TaskKind::translation()),
        units(1),
    )
    .await;

    assert_success(&report);
    assert_eq!(
        report.paragraphs.get("p1").map(String::as_str),
        Some("sauber")
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, TaskEvent::DegradationDetected { chunk_index: 0, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, TaskEvent::ChunkRetried { index: 0, attempt: 1 })));
}

#[tokio::test]
async fn degradation_beyond_retry_budget_is_fatal() {
    let garbage = format!(
        r#"{{"status":"working","paragraphs":[{{"id":"p1","text":"{}"}}]}}"#,
        "!".repeat(200)
    );
    let client = ScriptedClient::new(vec![text(&garbage)]);

    let mut cfg = config(TaskKind::translation());
    cfg.max_chunk_retries = 0;

    let (report, _) = run_task(client, RecordingDispatcher::new(), cfg, units(1)).await;

    match report.outcome {
        TaskOutcome::FatalError(TaskError::Degradation {
            chunk_index,
            attempts,
            ..
        }) => {
            assert_eq!(chunk_index, 0);
            assert_eq!(attempts, 1);
        }
        other => panic!("expected degradation error, got {other:?}"),
    }
}

#[tokio::test]
async fn turn_budget_exhaustion_is_fatal_with_position() {
    let client = ScriptedClient::new(vec![
        text(r#"{"status":"planning"}"#),
        text(r#"{"status":"planning"}"#),
    ]);

    let mut cfg = config(TaskKind::translation());
    cfg.max_turns_per_chunk = 2;

    let (report, _) = run_task(client, RecordingDispatcher::new(), cfg, units(1)).await;

    match report.outcome {
        TaskOutcome::FatalError(TaskError::TurnBudgetExhausted {
            chunk_index,
            last_status,
        }) => {
            assert_eq!(chunk_index, 0);
            assert_eq!(last_status, TaskStatus::Planning);
        }
        other => panic!("expected turn budget error, got {other:?}"),
    }
}

#[tokio::test]
async fn repeated_violations_exhaust_the_correction_budget() {
    let client = ScriptedClient::new(vec![
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"eins"}]}"#),
        text(r#"{"status":"planning"}"#),
        text(r#"{"status":"planning"}"#),
    ]);

    let mut cfg = config(TaskKind::translation());
    cfg.max_protocol_violations = 1;

    let (report, _) = run_task(client, RecordingDispatcher::new(), cfg, units(1)).await;

    assert!(matches!(
        report.outcome,
        TaskOutcome::FatalError(TaskError::Protocol { chunk_index: 0, .. })
    ));
}

#[tokio::test]
async fn cancellation_is_a_distinct_outcome() {
    let client = HangingClient::new();
    let services = TaskServices {
        generation: client,
        tools: RecordingDispatcher::new(),
        granted_tools: vec![lookup_tool()],
        budgets: ToolBudgets::new(),
    };
    let handle = TaskOrchestrator::new(services, config(TaskKind::translation())).run(units(1));

    handle.inputs.send(TaskInput::Cancel).unwrap();
    let report = handle.report.await.expect("task panicked");

    assert!(matches!(report.outcome, TaskOutcome::Cancelled));
}

#[tokio::test]
async fn multiple_chunks_run_in_order() {
    // Budget fits exactly one unit per chunk: "[p1] Paragraph number 1.\n"
    let client = ScriptedClient::new(vec![
        text(r#"{"status":"working","paragraphs":[{"index":0,"text":"erster"}]}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
        text(r#"{"status":"working","paragraphs":[{"id":"p2","text":"zweiter"}]}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);

    let mut cfg = config(TaskKind::translation());
    cfg.chunk_budget = 30;

    let (report, events) = run_task(client, RecordingDispatcher::new(), cfg, units(2)).await;

    assert_success(&report);
    assert_eq!(
        report.paragraphs.get("p1").map(String::as_str),
        Some("erster")
    );
    assert_eq!(
        report.paragraphs.get("p2").map(String::as_str),
        Some("zweiter")
    );

    let completed: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            TaskEvent::ChunkCompleted { index } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![0, 1]);
}

#[tokio::test]
async fn tool_budget_is_per_task_across_chunks() {
    let client = ScriptedClient::new(vec![
        // Chunk 0 spends the single allowed lookup.
        tool_turn(r#"{"status":"planning"}"#, "c1", "glossary_lookup"),
        text(r#"{"status":"working","paragraphs":[{"id":"p1","text":"eins"}]}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
        // Chunk 1 tries again and must be refused.
        tool_turn(r#"{"status":"planning"}"#, "c2", "glossary_lookup"),
        text(r#"{"status":"working","paragraphs":[{"id":"p2","text":"zwei"}]}"#),
        text(r#"{"status":"review"}"#),
        text(r#"{"status":"end"}"#),
    ]);
    let dispatcher = RecordingDispatcher::new();

    let _ = tracing_subscriber::fmt()
        .with_env_filter("redraft_core=debug")
        .try_init();

    let services = TaskServices {
        generation: client,
        tools: dispatcher.clone(),
        granted_tools: vec![lookup_tool()],
        budgets: ToolBudgets::new().with_ceiling("glossary_lookup", 1),
    };
    let mut cfg = config(TaskKind::translation());
    cfg.chunk_budget = 30;

    let mut handle = TaskOrchestrator::new(services, cfg).run(units(2));
    let report = handle.report.await.expect("task panicked");
    let mut events = Vec::new();
    while let Some(event) = handle.events.recv().await {
        events.push(event);
    }

    assert_success(&report);
    assert_eq!(dispatcher.invocations(), vec!["glossary_lookup"]);
    assert!(events.iter().any(|e| matches!(
        e,
        TaskEvent::ToolRefused { id, .. } if id == "c2"
    )));
}
