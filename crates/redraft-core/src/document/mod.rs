//! Document model
//!
//! A document is an ordered list of [`Unit`]s (paragraphs, headings). The
//! chunk builder groups them into size-bounded [`Chunk`]s that the task loop
//! processes one at a time.

pub mod chunk;

pub use chunk::{build_chunks, Chunk};

use serde::{Deserialize, Serialize};

/// Smallest addressable content item routed through the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub text: String,
}

impl Unit {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    /// Whether the unit carries any content worth transforming. Blank units
    /// are dropped before chunking and never appear in completeness checks.
    pub fn is_includable(&self) -> bool {
        !self.text.trim().is_empty()
    }

    /// The unit as rendered into a chunk payload; the same rendering is used
    /// for budget accounting so a chunk's measured size matches what the
    /// model sees.
    pub fn formatted(&self) -> String {
        format!("[{}] {}\n", self.id, self.text)
    }

    pub fn formatted_len(&self) -> usize {
        self.formatted().chars().count()
    }
}
