//! Generation provider layer
//!
//! Defines the conversation wire types, the streaming fragment protocol, and
//! the `GenerationClient` trait the task loop drives. Concrete provider
//! clients live outside this crate.

pub mod client;
pub mod retry;
pub mod streaming;
pub mod types;

pub use client::{CallOptions, GenerationClient, GenerationRequest};
pub use streaming::StreamPart;
pub use types::{AiTool, AiToolCall, Content, ModelMessage, Role, Usage};
