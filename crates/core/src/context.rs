//! Operation context — per-operation state shared across the call tree.
//!
//! One `OperationContext` exists per top-level operation. Delegation hands
//! sub-agents a *handle* onto the same shared state (cancellation signal,
//! attribute bag, step log) tagged with the supervisor's identity, so a
//! supervisor's trace and its sub-agents' traces merge into one observable
//! log and a cancellation fired anywhere is seen everywhere.
//!
//! The attribute bag and step log are behind sync locks: hooks run
//! synchronously in the calling flow, and parallel tool executions within
//! one step may touch them concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::Usage;
use crate::error::Error;

/// Identifies the supervisor step that spawned a delegated invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    /// Name of the supervising agent
    pub agent: String,

    /// The supervisor's 1-based step number that requested the delegation
    pub step: usize,
}

/// Status of a recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Error,
    Aborted,
}

/// What a step produced, summarized for the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepOutput {
    /// Final text answer
    Text(String),

    /// Final structured object
    Structured(serde_json::Value),

    /// Tool-call requests by tool name
    ToolCalls(Vec<String>),
}

/// Outcome of one tool execution within a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub tool: String,
    pub ok: bool,
    pub summary: String,
    pub duration_ms: u64,
}

/// One entry in the operation's step log: a model round-trip plus any
/// tool executions it triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Which agent's loop produced this step
    pub agent: String,

    /// 1-based step number within that agent's loop
    pub step: u32,

    /// Number of messages in the input snapshot for this round-trip
    pub input_messages: usize,

    /// What the model produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StepOutput>,

    /// Results of tool executions triggered by this step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultRecord>,

    /// Token usage reported by the backend, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    pub status: StepStatus,

    /// Delegation parentage of the loop that wrote this record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// The final reply of one agent operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReply {
    pub content: ReplyContent,

    /// Model round-trips the agent's own loop used
    pub steps: u32,

    /// True when the reply is a best-effort partial result forced by the
    /// step budget or a stop predicate
    pub partial: bool,
}

/// Final reply content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplyContent {
    Text(String),
    Structured(serde_json::Value),
}

impl AgentReply {
    /// Render the reply as text: structured replies are JSON-encoded.
    pub fn render(&self) -> String {
        match &self.content {
            ReplyContent::Text(t) => t.clone(),
            ReplyContent::Structured(v) => v.to_string(),
        }
    }

    /// The text content, if this reply is text.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            ReplyContent::Text(t) => Some(t),
            ReplyContent::Structured(_) => None,
        }
    }
}

/// State shared by every context handle in one operation tree.
struct SharedState {
    cancellation: CancellationToken,
    cancel_reason: Mutex<Option<String>>,
    attributes: RwLock<HashMap<String, serde_json::Value>>,
    step_log: Mutex<Vec<StepRecord>>,
}

/// Per-operation mutable state, shared by reference across the call tree.
///
/// Cloning a context (or calling [`child_for`](Self::child_for)) produces a
/// handle onto the *same* cancellation signal, attributes and step log —
/// state is never copied.
#[derive(Clone)]
pub struct OperationContext {
    operation_id: Arc<str>,
    shared: Arc<SharedState>,
    parent: Option<ParentRef>,
}

impl OperationContext {
    /// Create a fresh context for a new top-level operation.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Create a context with a caller-assigned operation id.
    pub fn with_id(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: Arc::from(operation_id.into()),
            shared: Arc::new(SharedState {
                cancellation: CancellationToken::new(),
                cancel_reason: Mutex::new(None),
                attributes: RwLock::new(HashMap::new()),
                step_log: Mutex::new(Vec::new()),
            }),
            parent: None,
        }
    }

    /// The immutable operation id.
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// Create a handle for a delegated invocation. Shares all state;
    /// only the parent tag differs.
    pub fn child_for(&self, supervisor: impl Into<String>, step: usize) -> Self {
        Self {
            operation_id: self.operation_id.clone(),
            shared: self.shared.clone(),
            parent: Some(ParentRef {
                agent: supervisor.into(),
                step,
            }),
        }
    }

    /// Delegation parentage of this handle, if it was created for a
    /// delegated invocation.
    pub fn parent(&self) -> Option<&ParentRef> {
        self.parent.as_ref()
    }

    // ── Cancellation ──

    /// Request cancellation of the entire operation tree.
    ///
    /// The first caller's reason wins; later calls are no-ops.
    pub fn cancel(&self, reason: impl Into<String>) {
        {
            let mut slot = self.shared.cancel_reason.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.shared.cancellation.cancel();
    }

    /// Whether cancellation has been requested anywhere in the tree.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancellation.is_cancelled()
    }

    /// The recorded cancellation reason, if cancellation was requested.
    pub fn cancel_reason(&self) -> Option<String> {
        self.shared
            .cancel_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// A clone of the shared cancellation token, for `select!`-style racing.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancellation.clone()
    }

    /// Build the structured cancellation error for this operation.
    pub fn cancelled_error(&self) -> Error {
        Error::Cancelled {
            reason: self
                .cancel_reason()
                .unwrap_or_else(|| "cancelled".to_string()),
        }
    }

    // ── Attributes ──

    /// Set an attribute. Last write wins.
    pub fn set_attribute(&self, key: impl Into<String>, value: serde_json::Value) {
        self.shared
            .attributes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value);
    }

    /// Read a single attribute.
    pub fn attribute(&self, key: &str) -> Option<serde_json::Value> {
        self.shared
            .attributes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Snapshot of all attributes.
    pub fn attributes(&self) -> HashMap<String, serde_json::Value> {
        self.shared
            .attributes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ── Step log ──

    /// Append a step record. Returns its index in the shared log.
    pub fn record_step(&self, record: StepRecord) -> usize {
        let mut log = self.shared.step_log.lock().unwrap_or_else(|e| e.into_inner());
        log.push(record);
        log.len() - 1
    }

    /// Number of records in the shared log (across the whole tree).
    pub fn step_count(&self) -> usize {
        self.shared
            .step_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Snapshot of the shared step log.
    pub fn step_log(&self) -> Vec<StepRecord> {
        self.shared
            .step_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("operation_id", &self.operation_id)
            .field("parent", &self.parent)
            .field("cancelled", &self.is_cancelled())
            .field("steps", &self.step_count())
            .finish()
    }
}
