//! Task orchestrator — the single canonical transformation loop.
//!
//! `TaskOrchestrator` encapsulates the complete multi-turn protocol for one
//! document: chunking, streaming with mid-flight validation, envelope
//! parsing, transition enforcement, tool governance, degradation recovery,
//! and result accounting.
//!
//! Presentation layers are thin consumers that:
//! - Create an orchestrator from their own state
//! - Call `run()` to get an event stream, an input channel and the report
//! - Map `TaskEvent` to their display format
//! - Send `TaskInput::Cancel` to stop the task
//!
//! ```text
//!  ┌──────────────┐        TaskEvent         ┌─────────────┐
//!  │ Orchestrator │ ─────────────────────►   │  Consumer   │
//!  │   (core)     │                          │ (TUI/batch) │
//!  │              │ ◄─────────────────────   │             │
//!  └──────────────┘        TaskInput         └─────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ai::client::{CallOptions, GenerationClient, GenerationRequest};
use crate::ai::retry::{with_retry, RetryConfig};
use crate::ai::types::{AiTool, Content, ModelMessage, Role, Usage};
use crate::document::{build_chunks, Chunk, Unit};
use crate::protocol::{parse_envelope, ParseOutcome, StreamValidator, StreamViolation, TaskKind, TaskStatus};
use crate::task::context::{self, TaskPrompt};
use crate::task::degradation::detect_degeneration;
use crate::task::error::{TaskError, TaskOutcome, TaskReport};
use crate::task::events::{TaskEvent, TaskInput};
use crate::task::executor::{execute_tools, ToolDispatcher};
use crate::task::governor::{ToolBudgets, ToolGovernor};
use crate::task::state::{LedgerWrite, ResultLedger, TaskState};
use crate::task::stream::{process_stream, StreamEnd, StreamTurn};
use crate::task::transcript::{Transcript, TurnRecord};

const DEFAULT_CHUNK_BUDGET: usize = 4_000;
const DEFAULT_MAX_TURNS_PER_CHUNK: usize = 16;
const DEFAULT_MAX_PROTOCOL_VIOLATIONS: usize = 3;
const DEFAULT_MAX_CHUNK_RETRIES: usize = 2;
const DEFAULT_STALL_THRESHOLD: usize = 1;
const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for one task run.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub task_id: String,
    pub kind: TaskKind,
    pub prompt: TaskPrompt,
    /// Chunk budget in formatted chars.
    pub chunk_budget: usize,
    /// Turn budget per chunk attempt.
    pub max_turns_per_chunk: usize,
    /// Protocol violations tolerated per chunk before the task is fatal.
    pub max_protocol_violations: usize,
    /// Whole-chunk retries after degenerated output.
    pub max_chunk_retries: usize,
    /// Consecutive unproductive same-status turns before a forward-progress
    /// directive is injected.
    pub stall_threshold: usize,
    pub stream_timeout: Duration,
    pub retry: RetryConfig,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl TaskConfig {
    pub fn new(kind: TaskKind, prompt: TaskPrompt) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            kind,
            prompt,
            chunk_budget: DEFAULT_CHUNK_BUDGET,
            max_turns_per_chunk: DEFAULT_MAX_TURNS_PER_CHUNK,
            max_protocol_violations: DEFAULT_MAX_PROTOCOL_VIOLATIONS,
            max_chunk_retries: DEFAULT_MAX_CHUNK_RETRIES,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            retry: RetryConfig::default(),
            temperature: None,
            max_tokens: None,
        }
    }
}

/// External collaborators the orchestrator drives.
pub struct TaskServices {
    pub generation: Arc<dyn GenerationClient>,
    pub tools: Arc<dyn ToolDispatcher>,
    /// Tool definitions granted for this task; names outside this set are
    /// refused by the governor.
    pub granted_tools: Vec<AiTool>,
    pub budgets: ToolBudgets,
}

/// Handle to a running task.
pub struct TaskHandle {
    pub events: mpsc::UnboundedReceiver<TaskEvent>,
    pub inputs: mpsc::UnboundedSender<TaskInput>,
    pub report: JoinHandle<TaskReport>,
}

/// The transformation orchestrator — runs the complete task loop.
pub struct TaskOrchestrator {
    services: TaskServices,
    config: TaskConfig,
}

/// How one chunk attempt ended.
enum ChunkRun {
    Completed,
    Degraded { reason: String, status: TaskStatus },
    Cancelled { status: TaskStatus },
    Fatal(TaskError),
}

/// Mutable task-wide accounting threaded through the chunk loop.
struct TaskBook {
    ledger: ResultLedger,
    transcript: Transcript,
    governor: ToolGovernor,
    usage: Usage,
    turns: usize,
}

impl TaskOrchestrator {
    pub fn new(services: TaskServices, config: TaskConfig) -> Self {
        Self { services, config }
    }

    /// Start the task loop over `units`.
    ///
    /// The loop runs as a spawned tokio task. It emits `TaskEvent`s for
    /// every state change; the caller sends `TaskInput::Cancel` to stop it.
    /// The final `TaskReport` resolves through `TaskHandle::report`.
    pub fn run(self, units: Vec<Unit>) -> TaskHandle {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<TaskInput>();
        let cancel = CancellationToken::new();

        let watcher_cancel = cancel.clone();
        tokio::spawn(async move {
            while let Some(input) = input_rx.recv().await {
                match input {
                    TaskInput::Cancel => {
                        watcher_cancel.cancel();
                        break;
                    }
                }
            }
        });

        let report = tokio::spawn(async move { self.run_inner(units, event_tx, cancel).await });

        TaskHandle {
            events: event_rx,
            inputs: input_tx,
            report,
        }
    }

    async fn run_inner(
        self,
        units: Vec<Unit>,
        event_tx: mpsc::UnboundedSender<TaskEvent>,
        cancel: CancellationToken,
    ) -> TaskReport {
        let chunks = build_chunks(&units, self.config.chunk_budget);
        tracing::info!(
            task_id = %self.config.task_id,
            chunks = chunks.len(),
            units = units.len(),
            "Task started"
        );

        // Deterministic tool ordering keeps request prefixes stable.
        let mut granted = self.services.granted_tools.clone();
        granted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut book = TaskBook {
            ledger: ResultLedger::new(),
            transcript: Transcript::new(),
            governor: ToolGovernor::new(
                granted.iter().map(|t| t.name.clone()),
                self.services.budgets.clone(),
            ),
            usage: Usage::default(),
            turns: 0,
        };
        let mut last_status = TaskStatus::Planning;

        for (chunk_index, chunk) in chunks.iter().enumerate() {
            let _ = event_tx.send(TaskEvent::ChunkStarted {
                index: chunk_index,
                unit_count: chunk.len(),
            });

            let mut attempt = 0;
            loop {
                let run = self
                    .run_chunk(chunk_index, chunk, &granted, &mut book, &event_tx, &cancel)
                    .await;
                match run {
                    ChunkRun::Completed => {
                        last_status = TaskStatus::End;
                        let _ = event_tx.send(TaskEvent::ChunkCompleted { index: chunk_index });
                        break;
                    }
                    ChunkRun::Degraded { reason, status } => {
                        last_status = status;
                        attempt += 1;
                        if attempt > self.config.max_chunk_retries {
                            return self.finish(
                                book,
                                last_status,
                                TaskOutcome::FatalError(TaskError::Degradation {
                                    chunk_index,
                                    last_status,
                                    attempts: attempt,
                                    reason,
                                }),
                                &event_tx,
                            );
                        }
                        tracing::warn!(chunk_index, attempt, "Retrying chunk after degradation");
                        let _ = event_tx.send(TaskEvent::ChunkRetried {
                            index: chunk_index,
                            attempt,
                        });
                    }
                    ChunkRun::Cancelled { status } => {
                        return self.finish(book, status, TaskOutcome::Cancelled, &event_tx);
                    }
                    ChunkRun::Fatal(error) => {
                        return self.finish(
                            book,
                            last_status_of(&error),
                            TaskOutcome::FatalError(error),
                            &event_tx,
                        );
                    }
                }
            }
        }

        self.finish(book, last_status, TaskOutcome::Success, &event_tx)
    }

    fn finish(
        &self,
        book: TaskBook,
        last_status: TaskStatus,
        outcome: TaskOutcome,
        event_tx: &mpsc::UnboundedSender<TaskEvent>,
    ) -> TaskReport {
        if let TaskOutcome::FatalError(error) = &outcome {
            tracing::error!(task_id = %self.config.task_id, %error, "Task failed");
            let _ = event_tx.send(TaskEvent::Error {
                error: error.to_string(),
            });
        } else {
            tracing::info!(
                task_id = %self.config.task_id,
                outcome = outcome.as_str(),
                turns = book.turns,
                "Task finished"
            );
        }
        let _ = event_tx.send(TaskEvent::Finished {
            task_id: self.config.task_id.clone(),
            outcome: outcome.as_str().to_string(),
        });

        let (paragraphs, title) = book.ledger.into_parts();
        TaskReport {
            paragraphs,
            title,
            last_status,
            outcome,
            usage: book.usage,
            turns: book.turns,
            transcript: book.transcript,
        }
    }

    /// Run one chunk attempt to `end`, degradation, cancellation or a fatal
    /// error. Ledger writes survive the attempt — a retry overwrites rather
    /// than resets, so each unit keeps exactly one authoritative result.
    async fn run_chunk(
        &self,
        chunk_index: usize,
        chunk: &Chunk,
        granted: &[AiTool],
        book: &mut TaskBook,
        event_tx: &mpsc::UnboundedSender<TaskEvent>,
        cancel: &CancellationToken,
    ) -> ChunkRun {
        let mut state = TaskState::new();
        let unit_ids = chunk.unit_ids();
        let source_text = chunk.source_text();
        let mut conversation = context::initial_messages(&self.config.prompt, chunk, self.config.kind);
        let mut generated = String::new();

        for _ in 0..self.config.max_turns_per_chunk {
            if cancel.is_cancelled() {
                return ChunkRun::Cancelled {
                    status: state.status,
                };
            }

            book.turns += 1;
            let turn = book.turns;
            let turn_cancel = cancel.child_token();
            let mut validator = StreamValidator::new(self.config.kind, state.status);

            let request = GenerationRequest {
                messages: conversation.clone(),
                tools: granted.to_vec(),
            };
            let options = CallOptions {
                cancel: turn_cancel.clone(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            };

            let generation = self.services.generation.clone();
            let rx = match with_retry(
                &self.config.retry,
                |e| generation.is_retryable(e),
                || {
                    let request = request.clone();
                    let options = options.clone();
                    let generation = generation.clone();
                    async move { generation.call_streaming(request, &options).await }
                },
            )
            .await
            {
                Ok(rx) => rx,
                Err(source) => {
                    return ChunkRun::Fatal(TaskError::Generation {
                        chunk_index,
                        last_status: state.status,
                        source,
                    })
                }
            };

            let turn_result = match process_stream(
                rx,
                &mut validator,
                &turn_cancel,
                cancel,
                event_tx,
                self.config.stream_timeout,
            )
            .await
            {
                StreamEnd::TaskCancelled => {
                    return ChunkRun::Cancelled {
                        status: state.status,
                    }
                }
                StreamEnd::Completed(result) => result,
            };

            if let Some(usage) = turn_result.usage {
                book.usage.add(&usage);
            }

            // The offending turn stays in the conversation and transcript
            // even when rejected below.
            let assistant_msg = assistant_message(&turn_result);
            if !assistant_msg.content.is_empty() {
                conversation.push(assistant_msg);
            }

            generated.push_str(&turn_result.text);
            if let Some(signal) = detect_degeneration(&generated, &source_text) {
                record_turn(book, turn, chunk_index, &turn_result, None, Some(&signal.reason));
                let _ = event_tx.send(TaskEvent::DegradationDetected {
                    chunk_index,
                    reason: signal.reason.clone(),
                });
                return ChunkRun::Degraded {
                    reason: signal.reason,
                    status: state.status,
                };
            }

            // Violations caught mid-stream skip the parse entirely: the
            // output was cut off and is not worth interpreting.
            if let Some(violation) = &turn_result.violation {
                record_turn(book, turn, chunk_index, &turn_result, None, Some(&violation.detail()));
                let correction = match violation {
                    StreamViolation::InvalidStatus { found } => context::parse_correction(
                        &format!("\"{found}\" is not a valid status"),
                    ),
                    StreamViolation::IllegalTransition { from, to } => {
                        context::transition_correction(*to, *from, self.config.kind)
                    }
                    StreamViolation::ContentOutsideWorking { status } => {
                        context::content_correction(*status)
                    }
                };
                if let Some(fatal) = self.note_violation(
                    &mut state,
                    chunk_index,
                    &violation.detail(),
                    turn,
                    &correction,
                    &mut conversation,
                    event_tx,
                ) {
                    return ChunkRun::Fatal(fatal);
                }
                let _ = event_tx.send(TaskEvent::TurnComplete {
                    turn,
                    status: state.status.as_str().to_string(),
                });
                continue;
            }

            if let Some(error) = turn_result.transport_error.clone() {
                record_turn(book, turn, chunk_index, &turn_result, None, Some(&error));
                return ChunkRun::Fatal(TaskError::Generation {
                    chunk_index,
                    last_status: state.status,
                    source: anyhow::anyhow!(error),
                });
            }

            // Parse the envelope; a tool-call-only turn legally carries no
            // text and keeps the current status.
            let envelope = if turn_result.text.trim().is_empty() {
                None
            } else {
                match parse_envelope(&turn_result.text, &unit_ids) {
                    ParseOutcome::Parsed(envelope) => Some(envelope),
                    ParseOutcome::Failed { reason } => {
                        record_turn(book, turn, chunk_index, &turn_result, None, Some(&reason));
                        tracing::warn!(turn, %reason, "Unparseable turn");
                        let _ = event_tx.send(TaskEvent::ProtocolCorrection {
                            turn,
                            detail: reason.clone(),
                        });
                        conversation.push(ModelMessage::user(context::parse_correction(&reason)));
                        let _ = event_tx.send(TaskEvent::TurnComplete {
                            turn,
                            status: state.status.as_str().to_string(),
                        });
                        continue;
                    }
                }
            };

            let declared = envelope.as_ref().map(|e| e.status).unwrap_or(state.status);

            if !self.config.kind.permits(state.status, declared) {
                let detail = format!(
                    "declared status \"{declared}\" which is not reachable from \"{}\"",
                    state.status
                );
                record_turn(book, turn, chunk_index, &turn_result, Some(declared), Some(&detail));
                let correction =
                    context::transition_correction(declared, state.status, self.config.kind);
                if let Some(fatal) = self.note_violation(
                    &mut state,
                    chunk_index,
                    &detail,
                    turn,
                    &correction,
                    &mut conversation,
                    event_tx,
                ) {
                    return ChunkRun::Fatal(fatal);
                }
                let _ = event_tx.send(TaskEvent::TurnComplete {
                    turn,
                    status: state.status.as_str().to_string(),
                });
                continue;
            }

            if let Some(envelope) = envelope.as_ref() {
                if envelope.has_content() && envelope.status != TaskStatus::Working {
                    let detail = format!(
                        "included paragraph or title content in a \"{}\" turn",
                        envelope.status
                    );
                    record_turn(book, turn, chunk_index, &turn_result, Some(declared), Some(&detail));
                    let correction = context::content_correction(envelope.status);
                    if let Some(fatal) = self.note_violation(
                        &mut state,
                        chunk_index,
                        &detail,
                        turn,
                        &correction,
                        &mut conversation,
                        event_tx,
                    ) {
                        return ChunkRun::Fatal(fatal);
                    }
                    let _ = event_tx.send(TaskEvent::TurnComplete {
                        turn,
                        status: state.status.as_str().to_string(),
                    });
                    continue;
                }
            }

            // Accepted turn: apply content, dispatch tools, advance state.
            record_turn(book, turn, chunk_index, &turn_result, Some(declared), None);

            let mut recorded = 0usize;
            if let Some(envelope) = envelope.as_ref() {
                if envelope.status == TaskStatus::Working {
                    for patch in &envelope.paragraphs {
                        if book.ledger.record_paragraph(&patch.unit_id, &patch.text)
                            == LedgerWrite::Recorded
                        {
                            recorded += 1;
                            let _ = event_tx.send(TaskEvent::ParagraphRecorded {
                                unit_id: patch.unit_id.clone(),
                                text: patch.text.clone(),
                            });
                        }
                    }
                    if let Some(title) = envelope.title.as_deref() {
                        if book.ledger.record_title(title) == LedgerWrite::Recorded {
                            recorded += 1;
                            let _ = event_tx.send(TaskEvent::TitleRecorded {
                                title: title.to_string(),
                            });
                        }
                    }
                }
            }

            let mut dispatched = 0usize;
            if !turn_result.tool_calls.is_empty() {
                let Some(batch) = execute_tools(
                    &turn_result.tool_calls,
                    &mut book.governor,
                    self.services.tools.as_ref(),
                    cancel,
                    event_tx,
                )
                .await
                else {
                    return ChunkRun::Cancelled {
                        status: state.status,
                    };
                };
                dispatched = batch.dispatched;
                conversation.push(ModelMessage {
                    role: Role::User,
                    content: batch.results,
                });
            }

            // Completeness gate on entering review: every unit in the chunk
            // needs a result unless the kind reports changed units only.
            let mut review_bounced = false;
            if declared == TaskStatus::Review && !self.config.kind.changed_only {
                let missing = book.ledger.missing_from(&unit_ids);
                if !missing.is_empty() {
                    tracing::warn!(turn, missing = missing.len(), "Review rejected: incomplete");
                    let _ = event_tx.send(TaskEvent::ProtocolCorrection {
                        turn,
                        detail: format!("review rejected, missing: {}", missing.join(", ")),
                    });
                    conversation.push(ModelMessage::user(context::missing_units_correction(&missing)));
                    state.status = TaskStatus::Working;
                    review_bounced = true;
                }
            }

            if !review_bounced {
                let transitioned = declared != state.status;
                state.status = declared;

                if declared == TaskStatus::End {
                    let _ = event_tx.send(TaskEvent::TurnComplete {
                        turn,
                        status: state.status.as_str().to_string(),
                    });
                    return ChunkRun::Completed;
                }

                if transitioned || recorded > 0 || dispatched > 0 {
                    state.note_progress();
                } else {
                    let streak = state.note_stall(declared);
                    if streak >= self.config.stall_threshold {
                        let directive = context::stall_directive(declared, self.config.kind);
                        tracing::warn!(turn, status = %declared, "Stalled; forcing progress");
                        let _ = event_tx.send(TaskEvent::ProgressDirective {
                            status: declared.as_str().to_string(),
                            directive: directive.clone(),
                        });
                        conversation.push(ModelMessage::user(directive));
                        state.note_progress();
                    }
                }
            } else {
                state.note_progress();
            }

            let _ = event_tx.send(TaskEvent::TurnComplete {
                turn,
                status: state.status.as_str().to_string(),
            });
        }

        ChunkRun::Fatal(TaskError::TurnBudgetExhausted {
            chunk_index,
            last_status: state.status,
        })
    }

    /// Count a protocol violation, append the corrective instruction, and
    /// escalate to a fatal error once the budget is exceeded.
    #[allow(clippy::too_many_arguments)]
    fn note_violation(
        &self,
        state: &mut TaskState,
        chunk_index: usize,
        detail: &str,
        turn: usize,
        correction: &str,
        conversation: &mut Vec<ModelMessage>,
        event_tx: &mpsc::UnboundedSender<TaskEvent>,
    ) -> Option<TaskError> {
        state.protocol_violations += 1;
        tracing::warn!(
            turn,
            violations = state.protocol_violations,
            %detail,
            "Protocol violation"
        );
        if state.protocol_violations > self.config.max_protocol_violations {
            return Some(TaskError::Protocol {
                chunk_index,
                last_status: state.status,
                detail: detail.to_string(),
            });
        }
        let _ = event_tx.send(TaskEvent::ProtocolCorrection {
            turn,
            detail: detail.to_string(),
        });
        conversation.push(ModelMessage::user(correction.to_string()));
        None
    }
}

fn assistant_message(turn: &StreamTurn) -> ModelMessage {
    let mut content =
        Vec::with_capacity(turn.tool_calls.len() + usize::from(!turn.text.is_empty()));
    if !turn.text.is_empty() {
        content.push(Content::Text {
            text: turn.text.clone(),
        });
    }
    for call in &turn.tool_calls {
        content.push(Content::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        });
    }
    ModelMessage {
        role: Role::Assistant,
        content,
    }
}

fn record_turn(
    book: &mut TaskBook,
    turn: usize,
    chunk_index: usize,
    result: &StreamTurn,
    declared_status: Option<TaskStatus>,
    rejection: Option<&str>,
) {
    book.transcript.append(TurnRecord {
        turn,
        chunk_index,
        recorded_at: chrono::Utc::now(),
        declared_status,
        response_text: result.text.clone(),
        tool_calls: result.tool_calls.clone(),
        rejection: rejection.map(str::to_string),
    });
}

fn last_status_of(error: &TaskError) -> TaskStatus {
    match error {
        TaskError::Protocol { last_status, .. }
        | TaskError::Degradation { last_status, .. }
        | TaskError::TurnBudgetExhausted { last_status, .. }
        | TaskError::Generation { last_status, .. } => *last_status,
    }
}
