//! Turn protocol
//!
//! Every model turn must declare a status; the status constrains what the
//! turn may legally contain and which statuses may follow. The protocol is a
//! single shared state machine; task kinds toggle the review leg instead of
//! duplicating the graph.

pub mod parser;
pub mod validator;

pub use parser::{parse_envelope, Envelope, ParagraphPatch, ParseOutcome};
pub use validator::{StreamValidator, StreamViolation};

use serde::{Deserialize, Serialize};

/// Protocol phase marker carried by every turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Planning,
    Working,
    Review,
    End,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Planning => "planning",
            TaskStatus::Working => "working",
            TaskStatus::Review => "review",
            TaskStatus::End => "end",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "planning" => Some(TaskStatus::Planning),
            "working" => Some(TaskStatus::Working),
            "review" => Some(TaskStatus::Review),
            "end" => Some(TaskStatus::End),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-task-kind protocol configuration.
///
/// `review` toggles the verification leg: when false, `working` goes
/// straight to `end` and a `review` turn is a violation. `changed_only`
/// marks kinds that report only modified units, which skips the
/// completeness check on entering review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskKind {
    pub review: bool,
    pub changed_only: bool,
}

impl TaskKind {
    /// Full rewrite of every unit, verified for completeness.
    pub fn translation() -> Self {
        Self {
            review: true,
            changed_only: false,
        }
    }

    /// Light-touch editing that reports only the units it changed.
    pub fn proofread() -> Self {
        Self {
            review: false,
            changed_only: true,
        }
    }

    /// Statuses a turn may legally declare after `from`. Re-declaring the
    /// current status is always legal short of `end`; forward edges depend
    /// on the kind.
    pub fn permits(&self, from: TaskStatus, to: TaskStatus) -> bool {
        if from == to {
            return from != TaskStatus::End;
        }
        match (from, to) {
            (TaskStatus::Planning, TaskStatus::Working) => true,
            (TaskStatus::Working, TaskStatus::Review) => self.review,
            (TaskStatus::Working, TaskStatus::End) => !self.review,
            (TaskStatus::Review, TaskStatus::Working) => self.review,
            (TaskStatus::Review, TaskStatus::End) => self.review,
            _ => false,
        }
    }

    /// The forward statuses reachable from `from`, used to phrase
    /// corrective instructions.
    pub fn next_statuses(&self, from: TaskStatus) -> Vec<TaskStatus> {
        [
            TaskStatus::Planning,
            TaskStatus::Working,
            TaskStatus::Review,
            TaskStatus::End,
        ]
        .into_iter()
        .filter(|to| *to != from && self.permits(from, *to))
        .collect()
    }
}
