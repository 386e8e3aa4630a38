//! Generation client interface
//!
//! The concrete provider client (HTTP/SSE plumbing, auth, model routing)
//! lives outside this crate. The task loop consumes it through
//! `GenerationClient`: one streaming call per turn, resolved into an `mpsc`
//! receiver of [`StreamPart`]s.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::streaming::StreamPart;
use crate::ai::types::{AiTool, ModelMessage};

/// One generation request: the conversation so far plus the tools the model
/// may call this turn.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<ModelMessage>,
    pub tools: Vec<AiTool>,
}

/// Per-call options.
///
/// `cancel` is the per-turn token: the implementation must stop producing
/// fragments and close the stream promptly once it is cancelled. It is a
/// child of the whole-task token, so aborting one turn never tears down the
/// task.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub cancel: CancellationToken,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl CallOptions {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// A streaming text-generation provider.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Start a streaming call. Fragments arrive on the returned receiver;
    /// channel close marks the end of the response.
    async fn call_streaming(
        &self,
        request: GenerationRequest,
        options: &CallOptions,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>>;

    /// Whether a call error is worth retrying (rate limit, transient
    /// transport failure). Drives the backoff loop in [`crate::ai::retry`].
    fn is_retryable(&self, _error: &anyhow::Error) -> bool {
        false
    }
}
