//! ModelBackend trait — the abstraction over LLM backends.
//!
//! A backend knows how to send a message list (plus the currently visible
//! tool schemas) to a model and return what the model decided: final text,
//! a structured object, or one or more tool-call requests.
//!
//! The backend owns its own retry policy for transient network failures;
//! the step loop never retries. The cancellation token is threaded into
//! the call so an in-flight request can be abandoned immediately.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;
use crate::message::{Message, ToolCallRequest};

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// The tool name
    pub name: String,

    /// Description of what the tool does (the model uses this to decide
    /// whether to invoke it)
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A request to the model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRequest {
    /// The message list for this round-trip
    pub messages: Vec<Message>,

    /// Tools visible to the model for this round-trip
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
}

/// What the model produced for one round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelOutput {
    /// A final text answer
    Text(String),

    /// A final structured object
    Structured(serde_json::Value),

    /// One or more tool-call requests, optionally with accompanying
    /// thought text
    ToolCalls {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
}

impl ModelOutput {
    /// The final text of this output, if it is final.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ModelOutput::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Whether this output ends the loop (no further tool calls requested).
    pub fn is_final(&self) -> bool {
        !matches!(self, ModelOutput::ToolCalls { .. })
    }
}

/// Token usage statistics for one model call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete response from a model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendResponse {
    /// What the model produced
    pub output: ModelOutput,

    /// Token usage, when the backend reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded
    pub model: String,
}

/// The core ModelBackend trait.
///
/// Every model integration implements this trait. The step loop calls
/// `invoke()` without knowing which backend is configured.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    ///
    /// Implementations must observe `cancel` and return
    /// [`BackendError::Interrupted`] promptly once it fires.
    async fn invoke(
        &self,
        request: BackendRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<BackendResponse, BackendError>;
}
