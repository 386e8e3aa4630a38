//! Streaming fragments emitted by a generation client.
//!
//! A call resolves into an `mpsc` receiver of `StreamPart`s; channel close
//! marks the end of the response. Fragments may arrive zero or more times
//! before the call resolves.

use crate::ai::types::{AiToolCall, Usage};

/// One fragment of a streaming generation response.
#[derive(Debug, Clone)]
pub enum StreamPart {
    /// Visible output text delta.
    TextDelta { delta: String },

    /// Model reasoning delta (never part of the authoritative output).
    ReasoningDelta { delta: String },

    /// A tool call started streaming (arguments not yet complete).
    ToolCallStart { id: String, name: String },

    /// Tool call arguments fully received.
    ToolCallComplete { tool_call: AiToolCall },

    /// Token usage for the call.
    Usage { usage: Usage },

    /// Transport or provider error; the stream ends after this.
    Error { error: String },
}
