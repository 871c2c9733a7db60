//! MemoryStore trait — the consumed contract for structured memory.
//!
//! The execution core depends on three capabilities: conversation history
//! (append + filtered chronological retrieval), working-memory records
//! keyed by scope, and — optionally — semantic recall of prior messages.
//! Semantic recall is a defaulted trait method reporting the capability
//! absent, so the engine degrades gracefully to recency-only retrieval
//! against stores that cannot search by similarity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::message::{Message, Role};

/// Filter for retrieving conversation messages.
///
/// Results are always chronological (non-decreasing timestamps); `limit`
/// keeps the *most recent* matching messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageFilter {
    /// Keep at most this many of the most recent matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Only these roles (empty = all roles)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<Role>,

    /// Only messages at or after this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,

    /// Only messages at or before this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl MessageFilter {
    /// The `limit` most recent messages, any role.
    pub fn recent(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Whether a message passes the role/time predicates.
    pub fn matches(&self, message: &Message) -> bool {
        if !self.roles.is_empty() && !self.roles.contains(&message.role) {
            return false;
        }
        if let Some(since) = self.since
            && message.timestamp < since
        {
            return false;
        }
        if let Some(until) = self.until
            && message.timestamp > until
        {
            return false;
        }
        true
    }
}

/// Scope of a working-memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkingMemoryScope {
    /// One record per conversation
    Conversation,
    /// One record per user, shared across conversations
    User,
}

/// Key of a working-memory record: at most one record exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub scope: WorkingMemoryScope,
    pub scope_id: String,
}

impl ScopeKey {
    pub fn conversation(id: impl Into<String>) -> Self {
        Self {
            scope: WorkingMemoryScope::Conversation,
            scope_id: id.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            scope: WorkingMemoryScope::User,
            scope_id: id.into(),
        }
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scope = match self.scope {
            WorkingMemoryScope::Conversation => "conversation",
            WorkingMemoryScope::User => "user",
        };
        write!(f, "{}:{}", scope, self.scope_id)
    }
}

/// A working-memory record: a single string payload per scope key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryRecord {
    pub content: String,
    pub updated_at: DateTime<Utc>,
}

impl WorkingMemoryRecord {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            updated_at: Utc::now(),
        }
    }
}

// ── Configuration ──

/// How semantically recalled messages are merged with recent history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecallStrategy {
    /// Recalled messages before recent history (default)
    #[default]
    Prepend,
    /// Recalled messages after recent history
    Append,
    /// Merge by timestamp
    Interleave,
}

/// Semantic recall knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticRecallConfig {
    /// How many similar messages to recall
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Similarity threshold
    #[serde(default)]
    pub min_score: f32,

    /// Merge strategy against recent history
    #[serde(default)]
    pub strategy: RecallStrategy,
}

fn default_top_k() -> usize {
    4
}

impl Default for SemanticRecallConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
            strategy: RecallStrategy::default(),
        }
    }
}

/// Memory configuration for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// How many recent messages to load at loop start
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    /// Semantic recall, when configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_recall: Option<SemanticRecallConfig>,
}

fn default_recent_limit() -> usize {
    20
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
            semantic_recall: None,
        }
    }
}

/// Working-memory mode: exactly one is active per configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WorkingMemoryMode {
    /// Unconstrained free text
    FreeText,
    /// A fixed markdown template the model is instructed to fill in
    Template { template: String },
    /// A schema-constrained structured object
    Schema { schema: serde_json::Value },
}

/// Working-memory configuration for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryConfig {
    #[serde(default = "default_wm_scope")]
    pub scope: WorkingMemoryScope,

    #[serde(flatten)]
    pub mode: WorkingMemoryMode,
}

fn default_wm_scope() -> WorkingMemoryScope {
    WorkingMemoryScope::Conversation
}

impl WorkingMemoryConfig {
    pub fn free_text() -> Self {
        Self {
            scope: WorkingMemoryScope::Conversation,
            mode: WorkingMemoryMode::FreeText,
        }
    }

    pub fn template(template: impl Into<String>) -> Self {
        Self {
            scope: WorkingMemoryScope::Conversation,
            mode: WorkingMemoryMode::Template {
                template: template.into(),
            },
        }
    }

    pub fn schema(schema: serde_json::Value) -> Self {
        Self {
            scope: WorkingMemoryScope::Conversation,
            mode: WorkingMemoryMode::Schema { schema },
        }
    }

    pub fn with_scope(mut self, scope: WorkingMemoryScope) -> Self {
        self.scope = scope;
        self
    }
}

/// The core MemoryStore trait.
///
/// Implementations: in-memory (testing/ephemeral), file-backed (JSONL),
/// no-op (memory disabled). All operations are idempotent-safe to retry at
/// the caller's discretion; the core never retries automatically.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The store name (e.g., "in_memory", "file", "none").
    fn name(&self) -> &str;

    /// Append messages to a conversation, in order.
    async fn append(
        &self,
        conversation_id: &str,
        messages: Vec<Message>,
    ) -> std::result::Result<(), MemoryError>;

    /// Retrieve messages in chronological order, filtered.
    async fn messages(
        &self,
        conversation_id: &str,
        filter: &MessageFilter,
    ) -> std::result::Result<Vec<Message>, MemoryError>;

    /// Return the top-K prior messages most similar to `query`, above
    /// `min_score`, newest-last.
    ///
    /// Default: the capability is absent. Callers must degrade to
    /// recency-only retrieval.
    async fn semantic_recall(
        &self,
        _conversation_id: &str,
        _query: &str,
        _top_k: usize,
        _min_score: f32,
    ) -> std::result::Result<Vec<Message>, MemoryError> {
        Err(MemoryError::RecallUnsupported)
    }

    /// Get the working-memory record for a scope key.
    async fn working_memory(
        &self,
        key: &ScopeKey,
    ) -> std::result::Result<Option<WorkingMemoryRecord>, MemoryError>;

    /// Overwrite the working-memory record for a scope key.
    async fn set_working_memory(
        &self,
        key: &ScopeKey,
        record: WorkingMemoryRecord,
    ) -> std::result::Result<(), MemoryError>;

    /// Remove the working-memory record for a scope key.
    async fn clear_working_memory(&self, key: &ScopeKey)
        -> std::result::Result<(), MemoryError>;
}
