//! Core library for Redraft — bulk AI-driven transformation of long,
//! paragraph-structured documents.
//!
//! The engine drives an external text-generation model through a
//! finite-state turn protocol: a document is split into size-bounded chunks,
//! each chunk runs through a planning/working/review loop with governed tool
//! access, in-flight stream validation, degradation recovery and
//! last-write-wins result accounting. Providers, tool implementations,
//! storage and presentation all live outside this crate and are injected
//! through the traits in [`ai`] and [`task`].

pub mod ai;
pub mod document;
pub mod protocol;
pub mod task;

pub use ai::{CallOptions, GenerationClient, GenerationRequest, StreamPart};
pub use document::{build_chunks, Chunk, Unit};
pub use protocol::{TaskKind, TaskStatus};
pub use task::{
    TaskConfig, TaskEvent, TaskHandle, TaskInput, TaskOrchestrator, TaskOutcome, TaskPrompt,
    TaskReport, TaskServices, ToolBudgets, ToolDispatcher,
};
