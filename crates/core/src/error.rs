//! Error types for the Taskweave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant. Cancellation is a
//! first-class top-level variant so callers receive a structured notice
//! with the reason string instead of an opaque failure.

use thiserror::Error;

/// The top-level error type for all Taskweave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model backend errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Lifecycle hook errors ---
    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    // --- Cooperative cancellation ---
    #[error("Operation cancelled: {reason}")]
    Cancelled { reason: String },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is a cancellation (fatal to everything sharing
    /// the operation context).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("Model call interrupted: {0}")]
    Interrupted(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Unknown delegation target: {0}")]
    UnknownTarget(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool aborted by cancellation: {0}")]
    Cancelled(String),
}

impl ToolError {
    /// Whether this error carries a cancellation signal. Unlike every
    /// other tool error, cancellation is fatal to the whole operation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ToolError::Cancelled(_))
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Semantic recall is not supported by this store")]
    RecallUnsupported,

    #[error("Working memory schema mismatch: {0}")]
    SchemaMismatch(String),
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("Lifecycle hook '{hook}' failed: {reason}")]
    Failed { hook: String, reason: String },
}

impl HookError {
    pub fn failed(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            hook: hook.into(),
            reason: reason.into(),
        }
    }
}
