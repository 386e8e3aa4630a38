//! Tool execution for the task loop.
//!
//! Handles:
//! - Governor authorization (grant set + per-tool budgets)
//! - Synthetic refusal results for unauthorized calls
//! - Sequential dispatch to the external `ToolDispatcher`
//! - Output truncation before results enter the conversation

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::types::{AiToolCall, Content};
use crate::task::events::TaskEvent;
use crate::task::governor::{ToolDecision, ToolGovernor};

const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

/// Result of one dispatched tool call. Dispatchers never error — failures
/// are encoded into `content` so the conversation continues.
#[derive(Debug, Clone)]
pub struct DispatchedToolResult {
    pub content: String,
}

/// External tool executor. Concrete implementations (glossary lookup, term
/// search, entity CRUD) live outside this crate.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn invoke(&self, call: &AiToolCall) -> DispatchedToolResult;
}

/// Outcome of a batch of tool calls.
pub(crate) struct ToolBatch {
    pub results: Vec<Content>,
    /// Number of calls that actually reached the dispatcher.
    pub dispatched: usize,
}

/// Execute a batch of tool calls strictly in order, emitting events along
/// the way. Returns `None` when the task was cancelled mid-batch.
pub(crate) async fn execute_tools(
    tool_calls: &[AiToolCall],
    governor: &mut ToolGovernor,
    dispatcher: &dyn ToolDispatcher,
    cancel: &CancellationToken,
    event_tx: &mpsc::UnboundedSender<TaskEvent>,
) -> Option<ToolBatch> {
    let mut results = Vec::with_capacity(tool_calls.len());
    let mut dispatched = 0;

    for call in tool_calls {
        if cancel.is_cancelled() {
            return None;
        }

        let _ = event_tx.send(TaskEvent::ToolCallRequested {
            id: call.id.clone(),
            name: call.name.clone(),
        });

        let decision = governor.authorize(&call.name);
        if decision != ToolDecision::Dispatch {
            let content = ToolGovernor::refusal_content(&call.name, &decision);
            tracing::warn!(tool = %call.name, ?decision, "Tool call refused");
            let _ = event_tx.send(TaskEvent::ToolRefused {
                id: call.id.clone(),
                name: call.name.clone(),
                reason: content.clone(),
            });
            results.push(tool_result(&call.id, content, true));
            continue;
        }

        let _ = event_tx.send(TaskEvent::ToolExecuting {
            id: call.id.clone(),
            name: call.name.clone(),
        });

        let result = tokio::select! {
            result = dispatcher.invoke(call) => result,
            _ = cancel.cancelled() => return None,
        };

        dispatched += 1;
        let content = truncate_output(&result.content);
        let _ = event_tx.send(TaskEvent::ToolResult {
            id: call.id.clone(),
            content: content.clone(),
        });
        results.push(tool_result(&call.id, content, false));
    }

    Some(ToolBatch {
        results,
        dispatched,
    })
}

fn tool_result(id: &str, content: String, is_error: bool) -> Content {
    Content::ToolResult {
        tool_use_id: id.to_string(),
        output: serde_json::Value::String(content),
        is_error: if is_error { Some(true) } else { None },
    }
}

pub(crate) fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let truncated_len = floor_char_boundary(output, MAX_TOOL_OUTPUT_CHARS);
    let truncated = &output[..truncated_len];
    let break_point = truncated.rfind('\n').unwrap_or(truncated_len);
    let clean = &output[..break_point];
    format!(
        "{}\n\n[... OUTPUT TRUNCATED: {} chars -> {} chars ...]",
        clean,
        output.len(),
        clean.len()
    )
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}
