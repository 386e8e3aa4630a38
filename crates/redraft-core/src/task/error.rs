//! Task failure taxonomy and the final report.
//!
//! Fatal errors always carry the chunk index and the last confirmed status
//! so a failed run can be located without replaying the transcript.
//! Cancellation is an outcome, not an error.

use std::collections::HashMap;

use crate::ai::types::Usage;
use crate::protocol::TaskStatus;
use crate::task::transcript::Transcript;

/// Fatal task failures.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The model kept violating the protocol beyond the correction budget.
    #[error("protocol violation in chunk {chunk_index} (last status {last_status}): {detail}")]
    Protocol {
        chunk_index: usize,
        last_status: TaskStatus,
        detail: String,
    },

    /// Output degenerated and the chunk retry budget ran out.
    #[error(
        "degenerated output in chunk {chunk_index} (last status {last_status}) after {attempts} attempts: {reason}"
    )]
    Degradation {
        chunk_index: usize,
        last_status: TaskStatus,
        attempts: usize,
        reason: String,
    },

    /// The turn budget ran out before the chunk reached `end`.
    #[error("turn budget exhausted in chunk {chunk_index} (last status {last_status})")]
    TurnBudgetExhausted {
        chunk_index: usize,
        last_status: TaskStatus,
    },

    /// The generation client failed after retries.
    #[error("generation failed in chunk {chunk_index} (last status {last_status}): {source}")]
    Generation {
        chunk_index: usize,
        last_status: TaskStatus,
        source: anyhow::Error,
    },
}

/// Terminal outcome tag.
#[derive(Debug)]
pub enum TaskOutcome {
    Success,
    Cancelled,
    FatalError(TaskError),
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Success => "success",
            TaskOutcome::Cancelled => "cancelled",
            TaskOutcome::FatalError(_) => "fatal_error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success)
    }
}

/// Everything a task run produced.
#[derive(Debug)]
pub struct TaskReport {
    /// Unit id → final authoritative text.
    pub paragraphs: HashMap<String, String>,
    pub title: Option<String>,
    /// Last confirmed protocol status when the run ended.
    pub last_status: TaskStatus,
    pub outcome: TaskOutcome,
    pub usage: Usage,
    /// Total turns spent across all chunks and retries.
    pub turns: usize,
    /// Append-only record of every exchange, kept for replay and diagnosis.
    pub transcript: Transcript,
}
