//! Canonical event protocol for the task loop.
//!
//! `TaskEvent` is the single source of truth for everything the loop emits.
//! Consumers (a TUI, an HTTP layer, a batch driver) receive these on the
//! channel returned by `TaskOrchestrator::run` and map them to their own
//! presentation. Sends are fire-and-forget: a gone consumer never aborts
//! the task.
//!
//! `TaskInput` carries external inputs back into the running loop.

use serde::Serialize;

/// Events emitted by the task loop.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    // ── Streaming ──────────────────────────────────────────────────────
    /// Model reasoning delta.
    ReasoningDelta { delta: String },

    /// Raw output text delta.
    OutputDelta { delta: String },

    // ── Results ────────────────────────────────────────────────────────
    /// A unit's authoritative text was recorded or overwritten.
    ParagraphRecorded { unit_id: String, text: String },

    /// The document title was recorded or overwritten.
    TitleRecorded { title: String },

    // ── Tool lifecycle ─────────────────────────────────────────────────
    /// The model requested a tool call.
    ToolCallRequested { id: String, name: String },

    /// The governor refused the call; a synthetic result was appended.
    ToolRefused {
        id: String,
        name: String,
        reason: String,
    },

    /// Tool dispatched to the executor.
    ToolExecuting { id: String, name: String },

    /// Tool execution completed.
    ToolResult { id: String, content: String },

    // ── Protocol recovery ──────────────────────────────────────────────
    /// A turn was rejected and a corrective instruction appended.
    ProtocolCorrection { turn: usize, detail: String },

    /// A stalled status triggered a forward-progress directive.
    ProgressDirective { status: String, directive: String },

    /// Generated output degenerated; the chunk will be retried.
    DegradationDetected { chunk_index: usize, reason: String },

    // ── Chunk lifecycle ────────────────────────────────────────────────
    ChunkStarted { index: usize, unit_count: usize },

    ChunkRetried { index: usize, attempt: usize },

    ChunkCompleted { index: usize },

    // ── Turn lifecycle ─────────────────────────────────────────────────
    /// One turn finished (accepted or rejected).
    TurnComplete { turn: usize, status: String },

    /// Token usage for one turn.
    Usage {
        prompt_tokens: usize,
        completion_tokens: usize,
    },

    /// The task finished; the report is returned from the join handle.
    Finished { task_id: String, outcome: String },

    /// Fatal error detail (also carried by the report).
    Error { error: String },
}

/// External inputs the caller provides back to the running loop.
#[derive(Debug, Clone)]
pub enum TaskInput {
    /// Cancel the whole task at the next suspension point.
    Cancel,
}
