//! Agent descriptor — configuration for one agent.
//!
//! An `Agent` is constructed once and reused across many operations. It is
//! immutable except for dynamically added tools and sub-agents, which
//! append and never remove during an in-flight operation. Construction
//! validates the configuration: duplicate tool names, duplicate sub-agent
//! names, and delegation cycles over the static sub-agent graph are all
//! rejected up front rather than surfacing as runtime surprises.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::backend::ModelBackend;
use crate::context::OperationContext;
use crate::error::{Error, Result};
use crate::memory::{MemoryConfig, WorkingMemoryConfig};
use crate::tool::{Tool, ToolSet};

/// Default step budget for an agent with no sub-agents.
pub const DEFAULT_STEP_BUDGET: u32 = 10;

/// Budget granted per sub-agent when computing the default for a
/// supervising agent.
pub const BUDGET_PER_SUB_AGENT: u32 = 10;

/// Static or context-derived system instructions.
#[derive(Clone)]
pub enum Instructions {
    /// A fixed instruction string
    Static(String),

    /// Instructions computed from the operation context at loop start
    Dynamic(Arc<dyn Fn(&OperationContext) -> String + Send + Sync>),
}

impl Instructions {
    /// Resolve the instructions for this operation.
    pub fn resolve(&self, ctx: &OperationContext) -> String {
        match self {
            Instructions::Static(s) => s.clone(),
            Instructions::Dynamic(f) => f(ctx),
        }
    }
}

impl From<&str> for Instructions {
    fn from(s: &str) -> Self {
        Instructions::Static(s.to_string())
    }
}

impl From<String> for Instructions {
    fn from(s: String) -> Self {
        Instructions::Static(s)
    }
}

impl std::fmt::Debug for Instructions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instructions::Static(s) => f.debug_tuple("Static").field(s).finish(),
            Instructions::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Configuration for one agent: identity, model backend, tools, optional
/// sub-agents it may delegate to, and memory settings.
pub struct Agent {
    name: String,
    instructions: Instructions,
    backend: Arc<dyn ModelBackend>,
    step_budget: Option<u32>,
    tools: ToolSet,
    sub_agents: RwLock<Vec<Arc<Agent>>>,
    memory: Option<MemoryConfig>,
    working_memory: Option<WorkingMemoryConfig>,
}

impl Agent {
    /// Start building an agent.
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder {
            name: name.into(),
            instructions: None,
            backend: None,
            step_budget: None,
            tools: Vec::new(),
            sub_agents: Vec::new(),
            memory: None,
            working_memory: None,
        }
    }

    /// The agent's globally unique handle (used for delegation targeting).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &Instructions {
        &self.instructions
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    /// The agent-level step budget, if one was configured.
    pub fn step_budget(&self) -> Option<u32> {
        self.step_budget
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Snapshot of the sub-agents this agent may delegate to.
    pub fn sub_agents(&self) -> Vec<Arc<Agent>> {
        self.sub_agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Look up a sub-agent by name.
    pub fn sub_agent(&self, name: &str) -> Option<Arc<Agent>> {
        self.sub_agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|a| a.name() == name)
            .cloned()
    }

    pub fn memory(&self) -> Option<&MemoryConfig> {
        self.memory.as_ref()
    }

    pub fn working_memory(&self) -> Option<&WorkingMemoryConfig> {
        self.working_memory.as_ref()
    }

    /// Resolve the effective step budget for one invocation:
    /// explicit per-call override > agent-level value > computed default
    /// (10 per sub-agent when the agent can delegate, else 10).
    pub fn resolved_step_budget(&self, call_override: Option<u32>) -> u32 {
        if let Some(budget) = call_override {
            return budget;
        }
        if let Some(budget) = self.step_budget {
            return budget;
        }
        let subs = self
            .sub_agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len() as u32;
        if subs > 0 {
            BUDGET_PER_SUB_AGENT * subs
        } else {
            DEFAULT_STEP_BUDGET
        }
    }

    /// Dynamically add a tool. Appends only; duplicate names are a
    /// configuration error.
    pub fn add_tool(&self, tool: Arc<dyn Tool>) -> Result<()> {
        self.tools.register(tool)?;
        Ok(())
    }

    /// Dynamically add a sub-agent. Appends only; duplicate names and
    /// cycles through the static sub-agent graph are configuration errors.
    pub fn add_sub_agent(&self, agent: Arc<Agent>) -> Result<()> {
        if agent.reaches(&self.name) || agent.name() == self.name {
            return Err(Error::Config {
                message: format!(
                    "delegation cycle: adding '{}' under '{}' would make '{}' reachable from itself",
                    agent.name(),
                    self.name,
                    self.name
                ),
            });
        }
        let mut subs = self.sub_agents.write().unwrap_or_else(|e| e.into_inner());
        if subs.iter().any(|a| a.name() == agent.name()) {
            return Err(Error::Config {
                message: format!("duplicate sub-agent name: {}", agent.name()),
            });
        }
        subs.push(agent);
        Ok(())
    }

    /// Whether `name` is reachable through this agent's sub-agent graph
    /// (including this agent itself).
    fn reaches(&self, name: &str) -> bool {
        if self.name == name {
            return true;
        }
        self.sub_agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|a| a.reaches(name))
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("step_budget", &self.step_budget)
            .field("tools", &self.tools.names())
            .field(
                "sub_agents",
                &self
                    .sub_agents()
                    .iter()
                    .map(|a| a.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`Agent`]. Validation happens in [`build`](Self::build).
pub struct AgentBuilder {
    name: String,
    instructions: Option<Instructions>,
    backend: Option<Arc<dyn ModelBackend>>,
    step_budget: Option<u32>,
    tools: Vec<Arc<dyn Tool>>,
    sub_agents: Vec<Arc<Agent>>,
    memory: Option<MemoryConfig>,
    working_memory: Option<WorkingMemoryConfig>,
}

impl AgentBuilder {
    pub fn instructions(mut self, instructions: impl Into<Instructions>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Instructions computed from the operation context at loop start.
    pub fn dynamic_instructions(
        mut self,
        f: impl Fn(&OperationContext) -> String + Send + Sync + 'static,
    ) -> Self {
        self.instructions = Some(Instructions::Dynamic(Arc::new(f)));
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn step_budget(mut self, budget: u32) -> Self {
        self.step_budget = Some(budget);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn sub_agent(mut self, agent: Arc<Agent>) -> Self {
        self.sub_agents.push(agent);
        self
    }

    pub fn memory(mut self, config: MemoryConfig) -> Self {
        self.memory = Some(config);
        self
    }

    pub fn working_memory(mut self, config: WorkingMemoryConfig) -> Self {
        self.working_memory = Some(config);
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<Arc<Agent>> {
        let backend = self.backend.ok_or_else(|| Error::Config {
            message: format!("agent '{}' has no model backend", self.name),
        })?;

        let tools = ToolSet::new();
        for tool in self.tools {
            tools.register(tool)?;
        }

        let mut seen = HashSet::new();
        for sub in &self.sub_agents {
            if !seen.insert(sub.name().to_string()) {
                return Err(Error::Config {
                    message: format!(
                        "agent '{}': duplicate sub-agent name: {}",
                        self.name,
                        sub.name()
                    ),
                });
            }
            if sub.reaches(&self.name) {
                return Err(Error::Config {
                    message: format!(
                        "agent '{}': delegation cycle through sub-agent '{}'",
                        self.name,
                        sub.name()
                    ),
                });
            }
        }

        Ok(Arc::new(Agent {
            name: self.name,
            instructions: self
                .instructions
                .unwrap_or_else(|| Instructions::Static(String::new())),
            backend,
            step_budget: self.step_budget,
            tools,
            sub_agents: RwLock::new(self.sub_agents),
            memory: self.memory,
            working_memory: self.working_memory,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendRequest, BackendResponse, ModelOutput};
    use crate::error::{BackendError, ToolError};
    use crate::tool::ToolOutput;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct StubBackend;

    #[async_trait]
    impl ModelBackend for StubBackend {
        fn name(&self) -> &str {
            "stub"
        }

        async fn invoke(
            &self,
            _request: BackendRequest,
            _cancel: &CancellationToken,
        ) -> std::result::Result<BackendResponse, BackendError> {
            Ok(BackendResponse {
                output: ModelOutput::Text("ok".into()),
                usage: None,
                model: "stub".into(),
            })
        }
    }

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &OperationContext,
        ) -> std::result::Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text("ok"))
        }
    }

    fn simple_agent(name: &str) -> Arc<Agent> {
        Agent::builder(name)
            .instructions("You are a test agent.")
            .backend(Arc::new(StubBackend))
            .build()
            .unwrap()
    }

    #[test]
    fn build_requires_backend() {
        let err = Agent::builder("orphan").build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn duplicate_tool_names_rejected_at_build() {
        let err = Agent::builder("dup")
            .backend(Arc::new(StubBackend))
            .tool(Arc::new(NamedTool("same")))
            .tool(Arc::new(NamedTool("same")))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Tool(ToolError::DuplicateName(_))));
    }

    #[test]
    fn duplicate_sub_agent_names_rejected() {
        let worker_a = simple_agent("worker");
        let worker_b = simple_agent("worker");
        let err = Agent::builder("supervisor")
            .backend(Arc::new(StubBackend))
            .sub_agent(worker_a)
            .sub_agent(worker_b)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn cycle_rejected_on_dynamic_add() {
        let worker = simple_agent("worker");
        let supervisor = Agent::builder("supervisor")
            .backend(Arc::new(StubBackend))
            .sub_agent(worker.clone())
            .build()
            .unwrap();

        // worker -> supervisor would close the loop supervisor -> worker
        let err = worker.add_sub_agent(supervisor).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn self_delegation_rejected() {
        let agent = simple_agent("narcissist");
        let err = agent.add_sub_agent(agent.clone()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn dynamic_add_appends() {
        let supervisor = simple_agent("supervisor");
        assert!(supervisor.sub_agents().is_empty());

        supervisor.add_sub_agent(simple_agent("worker")).unwrap();
        assert_eq!(supervisor.sub_agents().len(), 1);
        assert!(supervisor.sub_agent("worker").is_some());

        supervisor.add_tool(Arc::new(NamedTool("extra"))).unwrap();
        assert!(supervisor.tools().get("extra").is_some());
    }

    #[test]
    fn budget_resolution_order() {
        let plain = simple_agent("plain");
        assert_eq!(plain.resolved_step_budget(None), DEFAULT_STEP_BUDGET);
        assert_eq!(plain.resolved_step_budget(Some(3)), 3);

        let configured = Agent::builder("configured")
            .backend(Arc::new(StubBackend))
            .step_budget(7)
            .build()
            .unwrap();
        assert_eq!(configured.resolved_step_budget(None), 7);
        assert_eq!(configured.resolved_step_budget(Some(2)), 2);

        let supervisor = Agent::builder("supervisor")
            .backend(Arc::new(StubBackend))
            .sub_agent(simple_agent("a"))
            .sub_agent(simple_agent("b"))
            .build()
            .unwrap();
        assert_eq!(
            supervisor.resolved_step_budget(None),
            2 * BUDGET_PER_SUB_AGENT
        );
    }

    #[test]
    fn dynamic_instructions_resolve_from_context() {
        let agent = Agent::builder("dyn")
            .backend(Arc::new(StubBackend))
            .dynamic_instructions(|ctx| format!("operation {}", ctx.operation_id()))
            .build()
            .unwrap();

        let ctx = OperationContext::with_id("op-1");
        assert_eq!(agent.instructions().resolve(&ctx), "operation op-1");
    }
}
