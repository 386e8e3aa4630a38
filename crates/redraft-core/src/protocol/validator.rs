//! In-flight stream validation
//!
//! Watches the raw text of a streaming turn as fragments arrive and aborts
//! the generation call as soon as the output is provably invalid: a bad
//! status value, a transition the protocol forbids, or content fields on a
//! non-working turn. Checks are anchor-based (regex over the accumulated
//! text), not structural parsing — the full parser still runs on the
//! complete turn. Scans are throttled to fixed growth steps so long outputs
//! are not rescanned per fragment.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::protocol::{TaskKind, TaskStatus};

/// Minimum buffer growth (chars) between scans.
const GROWTH_STEP: usize = 48;

static STATUS_ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""status"\s*:\s*"([A-Za-z_\-]*)""#).expect("status anchor regex"));

static CONTENT_ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(?:paragraphs|title)"\s*:"#).expect("content anchor regex"));

/// A protocol violation detected mid-stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamViolation {
    InvalidStatus { found: String },
    IllegalTransition { from: TaskStatus, to: TaskStatus },
    ContentOutsideWorking { status: TaskStatus },
}

impl StreamViolation {
    pub fn detail(&self) -> String {
        match self {
            StreamViolation::InvalidStatus { found } => {
                format!("declared invalid status \"{found}\"")
            }
            StreamViolation::IllegalTransition { from, to } => {
                format!("declared status \"{to}\" which is not reachable from \"{from}\"")
            }
            StreamViolation::ContentOutsideWorking { status } => {
                format!("included paragraph or title content in a \"{status}\" turn")
            }
        }
    }
}

/// Validates one turn's output as it streams.
///
/// Create a fresh validator per turn with the last confirmed status; feed it
/// every text fragment. The first violation is sticky: the caller cancels
/// the per-turn token and drains the rest of the stream.
pub struct StreamValidator {
    kind: TaskKind,
    from: TaskStatus,
    buffer: String,
    scanned_len: usize,
    confirmed: Option<TaskStatus>,
    content_seen: bool,
    settled: bool,
    violation: Option<StreamViolation>,
}

impl StreamValidator {
    pub fn new(kind: TaskKind, from: TaskStatus) -> Self {
        Self {
            kind,
            from,
            buffer: String::new(),
            scanned_len: 0,
            confirmed: None,
            content_seen: false,
            settled: false,
            violation: None,
        }
    }

    /// Append a fragment and re-check once enough new text accumulated.
    /// Returns the violation as soon as one is known.
    pub fn feed(&mut self, fragment: &str) -> Option<&StreamViolation> {
        if self.violation.is_none() && !self.settled {
            self.buffer.push_str(fragment);
            if self.buffer.len() - self.scanned_len >= GROWTH_STEP {
                self.scan();
            }
        }
        self.violation.as_ref()
    }

    pub fn violation(&self) -> Option<&StreamViolation> {
        self.violation.as_ref()
    }

    fn scan(&mut self) {
        self.scanned_len = self.buffer.len();

        if self.confirmed.is_none() {
            if let Some(cap) = STATUS_ANCHOR.captures(&self.buffer) {
                let found = cap[1].to_string();
                let Some(declared) = TaskStatus::parse(&found) else {
                    self.violation = Some(StreamViolation::InvalidStatus { found });
                    return;
                };
                if !self.kind.permits(self.from, declared) {
                    self.violation = Some(StreamViolation::IllegalTransition {
                        from: self.from,
                        to: declared,
                    });
                    return;
                }
                self.confirmed = Some(declared);
                if declared == TaskStatus::Working {
                    // Content is legal from here on; nothing left to catch.
                    self.settled = true;
                    return;
                }
            }
        }

        if !self.content_seen && CONTENT_ANCHOR.is_match(&self.buffer) {
            self.content_seen = true;
        }

        if self.content_seen {
            if let Some(status) = self.confirmed {
                if status != TaskStatus::Working {
                    self.violation = Some(StreamViolation::ContentOutsideWorking { status });
                }
            }
        }
    }
}
