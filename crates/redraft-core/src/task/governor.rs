//! Tool invocation governor
//!
//! Decides, per tool call the model requests, whether the call is dispatched
//! to the external executor or refused. Refusals are well-formed tool
//! results — the conversation always continues. The governor owns only the
//! authorization decision and the per-task counters; execution belongs to
//! the dispatcher.

use std::collections::{BTreeSet, HashMap};

/// Per-tool-name invocation ceilings. Unlisted tools are unbounded.
#[derive(Debug, Clone, Default)]
pub struct ToolBudgets {
    ceilings: HashMap<String, usize>,
}

impl ToolBudgets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ceiling(mut self, name: impl Into<String>, ceiling: usize) -> Self {
        self.ceilings.insert(name.into(), ceiling);
        self
    }

    fn ceiling(&self, name: &str) -> Option<usize> {
        self.ceilings.get(name).copied()
    }
}

/// Authorization decision for one requested call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolDecision {
    Dispatch,
    NotGranted,
    BudgetExceeded { ceiling: usize },
}

/// Per-task authorization state.
#[derive(Debug)]
pub struct ToolGovernor {
    granted: BTreeSet<String>,
    budgets: ToolBudgets,
    used: HashMap<String, usize>,
}

impl ToolGovernor {
    pub fn new(granted: impl IntoIterator<Item = String>, budgets: ToolBudgets) -> Self {
        Self {
            granted: granted.into_iter().collect(),
            budgets,
            used: HashMap::new(),
        }
    }

    /// Authorize one call. Counts the invocation only when it dispatches.
    pub fn authorize(&mut self, name: &str) -> ToolDecision {
        if !self.granted.contains(name) {
            return ToolDecision::NotGranted;
        }
        let used = self.used.entry(name.to_string()).or_insert(0);
        if let Some(ceiling) = self.budgets.ceiling(name) {
            if *used >= ceiling {
                return ToolDecision::BudgetExceeded { ceiling };
            }
        }
        *used += 1;
        ToolDecision::Dispatch
    }

    /// Refusal text returned to the model as the tool result body.
    pub fn refusal_content(name: &str, decision: &ToolDecision) -> String {
        match decision {
            ToolDecision::NotGranted => format!(
                "Tool \"{name}\" is not available for this task. Continue with the tools you were given."
            ),
            ToolDecision::BudgetExceeded { ceiling } => format!(
                "Tool \"{name}\" has reached its limit of {ceiling} calls for this task. Proceed with the information you already have."
            ),
            ToolDecision::Dispatch => unreachable!("dispatch is not a refusal"),
        }
    }

    pub fn invocations(&self, name: &str) -> usize {
        self.used.get(name).copied().unwrap_or(0)
    }
}
