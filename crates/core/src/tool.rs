//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what let the model act: query systems, mutate working memory,
//! delegate to sub-agents. Each tool declares a JSON parameter schema;
//! arguments are validated against it before the handler runs. Handlers
//! receive the operation context, so they can read/write shared attributes
//! and request cancellation of the whole operation.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::ToolSchema;
use crate::context::OperationContext;
use crate::error::ToolError;
use crate::message::ToolCallRequest;
use crate::schema;

/// The result of a successful tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text fed back to the model as the tool result
    pub content: String,

    /// Optional structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    /// A plain-text tool result.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: None,
        }
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool within one operation's visible set.
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with validated arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &OperationContext,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a schema for sending to the model.
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The set of tools visible to one agent.
///
/// Name uniqueness is an invariant: registering a second tool under an
/// existing name is a configuration error, surfaced at registration time
/// rather than silently replacing. The set appends during an in-flight
/// operation but never removes, so a `BTreeMap` behind a lock keeps
/// iteration order stable for schema lists.
pub struct ToolSet {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a tool. Duplicate names are a configuration error.
    pub fn register(&self, tool: Arc<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        if tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// All tool schemas, for sending to the model.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|t| t.schema())
            .collect()
    }

    /// All registered tool names.
    pub fn names(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of the registered tools.
    pub fn all(&self) -> Vec<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Execute a tool call: look up by name, validate arguments against the
    /// declared schema, dispatch.
    pub async fn execute(
        &self,
        call: &ToolCallRequest,
        ctx: &OperationContext,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        schema::validate(&call.arguments, &tool.parameters_schema())
            .map_err(ToolError::InvalidArguments)?;

        tool.execute(call.arguments.clone(), ctx).await
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet").field("names", &self.names()).finish()
    }
}
