//! Stream processing for the task loop.
//!
//! Consumes `StreamPart` fragments from `GenerationClient::call_streaming`
//! and:
//! - Accumulates text and tool calls for the turn
//! - Feeds every text fragment to the `StreamValidator` and cancels the
//!   in-flight call on the first violation
//! - Emits `TaskEvent`s for reasoning/output deltas
//! - Enforces the stream inactivity timeout

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::streaming::StreamPart;
use crate::ai::types::{AiToolCall, Usage};
use crate::protocol::{StreamValidator, StreamViolation};
use crate::task::events::TaskEvent;

/// Accumulated result of one streamed turn.
pub(crate) struct StreamTurn {
    pub text: String,
    pub tool_calls: Vec<AiToolCall>,
    pub usage: Option<Usage>,
    /// Violation that aborted the stream early, if any.
    pub violation: Option<StreamViolation>,
    /// Transport failure (provider error or inactivity timeout).
    pub transport_error: Option<String>,
}

pub(crate) enum StreamEnd {
    Completed(StreamTurn),
    /// The whole-task token fired mid-stream.
    TaskCancelled,
}

/// Drain one streaming response. The per-turn token is cancelled as soon as
/// the validator flags a violation; the remainder of the stream is drained
/// so the provider connection shuts down cleanly.
pub(crate) async fn process_stream(
    mut rx: mpsc::UnboundedReceiver<StreamPart>,
    validator: &mut StreamValidator,
    turn_cancel: &CancellationToken,
    task_cancel: &CancellationToken,
    event_tx: &mpsc::UnboundedSender<TaskEvent>,
    inactivity_timeout: Duration,
) -> StreamEnd {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut usage = None;
    let mut violation: Option<StreamViolation> = None;
    let mut transport_error = None;

    loop {
        let part = tokio::select! {
            _ = task_cancel.cancelled() => return StreamEnd::TaskCancelled,
            part = tokio::time::timeout(inactivity_timeout, rx.recv()) => match part {
                Ok(Some(part)) => part,
                Ok(None) => break,
                Err(_) => {
                    transport_error = Some(format!(
                        "generation stream produced no data for {}s",
                        inactivity_timeout.as_secs()
                    ));
                    break;
                }
            },
        };

        match part {
            StreamPart::TextDelta { delta } => {
                text.push_str(&delta);
                let _ = event_tx.send(TaskEvent::OutputDelta {
                    delta: delta.clone(),
                });
                if violation.is_none() {
                    if let Some(found) = validator.feed(&delta) {
                        violation = Some(found.clone());
                        tracing::warn!(detail = %found.detail(), "Aborting turn mid-stream");
                        turn_cancel.cancel();
                    }
                }
            }
            StreamPart::ReasoningDelta { delta } => {
                let _ = event_tx.send(TaskEvent::ReasoningDelta { delta });
            }
            StreamPart::ToolCallStart { id, name } => {
                tracing::debug!(%id, %name, "Tool call streaming");
            }
            StreamPart::ToolCallComplete { tool_call } => {
                tool_calls.push(tool_call);
            }
            StreamPart::Usage { usage: reported } => {
                usage = Some(reported);
                let _ = event_tx.send(TaskEvent::Usage {
                    prompt_tokens: reported.prompt_tokens,
                    completion_tokens: reported.completion_tokens,
                });
            }
            StreamPart::Error { error } => {
                transport_error = Some(error);
                break;
            }
        }
    }

    StreamEnd::Completed(StreamTurn {
        text,
        tool_calls,
        usage,
        violation,
        transport_error,
    })
}
