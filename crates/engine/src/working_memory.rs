//! Working-memory manager — a compact, explicitly-scoped context blob.
//!
//! Working memory is distinct from full conversation history: a single
//! record per `(scope, scope_id)` that the model reads at every loop start
//! and updates through dedicated tools. Three modes exist — free text, a
//! fixed markdown template the model fills in, and a schema-constrained
//! structured object. Schema-mode writes are validated structurally before
//! the stored value is overwritten; a failed validation rejects the write
//! and keeps the previous value.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use taskweave_core::context::OperationContext;
use taskweave_core::error::{MemoryError, ToolError};
use taskweave_core::memory::{
    MemoryStore, ScopeKey, WorkingMemoryConfig, WorkingMemoryMode, WorkingMemoryRecord,
    WorkingMemoryScope,
};
use taskweave_core::schema;
use taskweave_core::tool::{Tool, ToolOutput};

/// Mediates all working-memory reads and writes for one agent.
pub struct WorkingMemoryManager {
    store: Arc<dyn MemoryStore>,
    config: WorkingMemoryConfig,
}

impl WorkingMemoryManager {
    pub fn new(store: Arc<dyn MemoryStore>, config: WorkingMemoryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &WorkingMemoryConfig {
        &self.config
    }

    /// Resolve the scope key for this operation, if the relevant identifier
    /// is present.
    pub fn scope_key(
        &self,
        conversation_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Option<ScopeKey> {
        match self.config.scope {
            WorkingMemoryScope::Conversation => conversation_id.map(ScopeKey::conversation),
            WorkingMemoryScope::User => user_id.map(ScopeKey::user),
        }
    }

    /// The current record, if any.
    pub async fn get(&self, key: &ScopeKey) -> Result<Option<WorkingMemoryRecord>, MemoryError> {
        self.store.working_memory(key).await
    }

    /// Render the working-memory section for the system instructions:
    /// usage guidance, the active shape (template or schema), and the
    /// current content.
    pub async fn render_section(&self, key: &ScopeKey) -> Result<String, MemoryError> {
        let record = self.store.working_memory(key).await?;

        let mut section = String::from("## Working Memory\n");
        section.push_str(
            "A persistent scratchpad, separate from the conversation. \
             Use the update_working_memory tool to keep it current and \
             get_working_memory to re-read it.\n",
        );

        match &self.config.mode {
            WorkingMemoryMode::FreeText => {}
            WorkingMemoryMode::Template { template } => {
                section.push_str("Fill in this template:\n");
                section.push_str(template);
                section.push('\n');
            }
            WorkingMemoryMode::Schema { schema } => {
                section.push_str("Updates must be JSON matching this schema:\n");
                section.push_str(&schema.to_string());
                section.push('\n');
            }
        }

        section.push_str("\nCurrent content:\n");
        match record {
            Some(r) => section.push_str(&r.content),
            None => section.push_str("(empty)"),
        }
        section.push('\n');

        Ok(section)
    }

    /// Overwrite the record, validating schema-mode content first.
    ///
    /// A schema-mode payload that does not parse as JSON or does not match
    /// the configured shape is rejected with
    /// [`MemoryError::SchemaMismatch`]; the stored value is untouched.
    pub async fn update(&self, key: &ScopeKey, content: &str) -> Result<(), MemoryError> {
        if let WorkingMemoryMode::Schema { schema: shape } = &self.config.mode {
            let value: serde_json::Value = serde_json::from_str(content)
                .map_err(|e| MemoryError::SchemaMismatch(format!("not valid JSON: {e}")))?;
            schema::validate(&value, shape).map_err(MemoryError::SchemaMismatch)?;
        }

        debug!(key = %key, bytes = content.len(), "Working memory updated");
        self.store
            .set_working_memory(key, WorkingMemoryRecord::new(content))
            .await
    }

    /// Remove the record.
    pub async fn clear(&self, key: &ScopeKey) -> Result<(), MemoryError> {
        self.store.clear_working_memory(key).await
    }
}

// ── Built-in tools ────────────────────────────────────────────────────────

fn memory_tool_error(name: &str, err: MemoryError) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: name.into(),
        reason: err.to_string(),
    }
}

/// Built-in `get_working_memory` tool.
pub struct GetWorkingMemoryTool {
    manager: Arc<WorkingMemoryManager>,
    key: ScopeKey,
}

impl GetWorkingMemoryTool {
    pub fn new(manager: Arc<WorkingMemoryManager>, key: ScopeKey) -> Self {
        Self { manager, key }
    }
}

#[async_trait]
impl Tool for GetWorkingMemoryTool {
    fn name(&self) -> &str {
        "get_working_memory"
    }

    fn description(&self) -> &str {
        "Read the current working-memory content for this scope"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _ctx: &OperationContext,
    ) -> Result<ToolOutput, ToolError> {
        let record = self
            .manager
            .get(&self.key)
            .await
            .map_err(|e| memory_tool_error("get_working_memory", e))?;

        Ok(match record {
            Some(r) => ToolOutput::text(r.content),
            None => ToolOutput::text("Working memory is empty."),
        })
    }
}

/// Built-in `update_working_memory` tool.
pub struct UpdateWorkingMemoryTool {
    manager: Arc<WorkingMemoryManager>,
    key: ScopeKey,
}

impl UpdateWorkingMemoryTool {
    pub fn new(manager: Arc<WorkingMemoryManager>, key: ScopeKey) -> Self {
        Self { manager, key }
    }
}

#[async_trait]
impl Tool for UpdateWorkingMemoryTool {
    fn name(&self) -> &str {
        "update_working_memory"
    }

    fn description(&self) -> &str {
        "Overwrite the working-memory content for this scope"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The full new working-memory content"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &OperationContext,
    ) -> Result<ToolOutput, ToolError> {
        let content = arguments["content"].as_str().unwrap_or_default();
        self.manager
            .update(&self.key, content)
            .await
            .map_err(|e| memory_tool_error("update_working_memory", e))?;
        Ok(ToolOutput::text("Working memory updated."))
    }
}

/// Built-in `clear_working_memory` tool.
pub struct ClearWorkingMemoryTool {
    manager: Arc<WorkingMemoryManager>,
    key: ScopeKey,
}

impl ClearWorkingMemoryTool {
    pub fn new(manager: Arc<WorkingMemoryManager>, key: ScopeKey) -> Self {
        Self { manager, key }
    }
}

#[async_trait]
impl Tool for ClearWorkingMemoryTool {
    fn name(&self) -> &str {
        "clear_working_memory"
    }

    fn description(&self) -> &str {
        "Erase the working-memory content for this scope"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _ctx: &OperationContext,
    ) -> Result<ToolOutput, ToolError> {
        self.manager
            .clear(&self.key)
            .await
            .map_err(|e| memory_tool_error("clear_working_memory", e))?;
        Ok(ToolOutput::text("Working memory cleared."))
    }
}
