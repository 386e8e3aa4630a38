//! Task loop
//!
//! ## Orchestrator (the canonical transformation loop)
//! - `TaskOrchestrator` - Unified loop: streaming, validation, tools,
//!   degradation recovery, result accounting
//! - `TaskEvent` / `TaskInput` - Event protocol between loop and consumers
//! - `TaskConfig` / `TaskServices` - Configuration and dependencies
//!
//! ## Core Components
//! - `ToolGovernor` / `ToolBudgets` - Tool authorization and budgets
//! - `ResultLedger` - Last-write-wins result accounting
//! - `Transcript` - Append-only turn record
//! - `detect_degeneration` - Runaway-output guard

pub mod context;
pub mod degradation;
pub mod error;
pub mod events;
pub mod executor;
pub mod governor;
pub mod state;
pub mod stream;
pub mod transcript;

mod orchestrator;

pub use context::TaskPrompt;
pub use degradation::{detect_degeneration, DegenerationSignal};
pub use error::{TaskError, TaskOutcome, TaskReport};
pub use events::{TaskEvent, TaskInput};
pub use executor::{DispatchedToolResult, ToolDispatcher};
pub use governor::{ToolBudgets, ToolDecision, ToolGovernor};
pub use orchestrator::{TaskConfig, TaskHandle, TaskOrchestrator, TaskServices};
pub use state::{LedgerWrite, ResultLedger, TaskState};
pub use transcript::{Transcript, TurnRecord};
