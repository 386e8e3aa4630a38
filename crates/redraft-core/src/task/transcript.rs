//! Append-only task transcript.
//!
//! Records every turn of every chunk attempt — including turns the loop
//! rejected — so a task run can be replayed and diagnosed after the fact.
//! Entries are only ever appended.

use chrono::{DateTime, Utc};

use crate::ai::types::AiToolCall;
use crate::protocol::TaskStatus;

/// One request/response exchange with the generation client.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    /// 1-based turn counter across the whole task.
    pub turn: usize,
    pub chunk_index: usize,
    pub recorded_at: DateTime<Utc>,
    /// Status the model declared, when the envelope parsed.
    pub declared_status: Option<TaskStatus>,
    pub response_text: String,
    pub tool_calls: Vec<AiToolCall>,
    /// Why the turn was rejected, when it was.
    pub rejection: Option<String>,
}

#[derive(Debug, Default)]
pub struct Transcript {
    turns: Vec<TurnRecord>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: TurnRecord) {
        self.turns.push(record);
    }

    pub fn turns(&self) -> &[TurnRecord] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
