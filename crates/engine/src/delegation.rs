//! Delegation protocol — the built-in `delegate_task` tool.
//!
//! A supervising agent hands a described task to one or more of its named
//! sub-agents. Each resolved target runs its own step loop on a child
//! handle of the *same* operation context, so cancellation, attributes and
//! the step log are common across the whole tree; only the parent tags
//! differ, which is what makes the merged trace reconstructible.
//!
//! Targets run concurrently and their results are joined into one list of
//! `{agent, ok, response}` entries. A failed target is an entry, not a
//! failure of the supervisor — except cancellation, which is fatal to
//! everything sharing the context.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use taskweave_core::agent::Agent;
use taskweave_core::context::OperationContext;
use taskweave_core::error::{Error, ToolError};
use taskweave_core::memory::MessageFilter;
use taskweave_core::message::Role;
use taskweave_core::tool::{Tool, ToolOutput};

use crate::step_loop::{RunOptions, StepLoop};

/// Tool name the model sees.
pub const DELEGATE_TOOL_NAME: &str = "delegate_task";

/// How many of the supervisor's recent messages are included in the seed
/// when supervisor context sharing is enabled.
const SUPERVISOR_CONTEXT_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
struct DelegateArgs {
    task: String,
    targets: Vec<String>,
    #[serde(default)]
    context: Option<String>,
}

/// One entry in the delegation result list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationOutcome {
    /// The target agent's name
    pub agent: String,

    /// Whether the target completed (partial completion counts)
    pub ok: bool,

    /// The target's rendered reply, or its failure description
    pub response: String,
}

/// The built-in delegation tool, constructed per operation for agents
/// that have sub-agents.
pub struct DelegateTool {
    engine: StepLoop,
    supervisor: Arc<Agent>,
    conversation_id: Option<String>,
    user_id: Option<String>,
    include_supervisor_context: bool,
    current_step: Arc<AtomicU32>,
}

impl DelegateTool {
    pub(crate) fn new(
        engine: StepLoop,
        supervisor: Arc<Agent>,
        options: &RunOptions,
        current_step: Arc<AtomicU32>,
    ) -> Self {
        Self {
            engine,
            supervisor,
            conversation_id: options.conversation_id.clone(),
            user_id: options.user_id.clone(),
            include_supervisor_context: options.include_supervisor_context,
            current_step,
        }
    }

    /// Build the seed input for the targets: the task description, any
    /// extra context, and (by default) the supervisor's recent memory.
    async fn seed_input(&self, args: &DelegateArgs) -> String {
        let mut task = args.task.clone();

        if let Some(extra) = &args.context
            && !extra.is_empty()
        {
            task.push_str("\n\nAdditional context:\n");
            task.push_str(extra);
        }

        if self.include_supervisor_context
            && let Some(conversation_id) = &self.conversation_id
        {
            match self
                .engine
                .store
                .messages(
                    conversation_id,
                    &MessageFilter::recent(SUPERVISOR_CONTEXT_LIMIT),
                )
                .await
            {
                Ok(recent) if !recent.is_empty() => {
                    task.push_str("\n\nRecent conversation context:\n");
                    for msg in recent {
                        let role = match msg.role {
                            Role::User => "user",
                            Role::Assistant => "assistant",
                            Role::System => "system",
                            Role::Tool => "tool",
                        };
                        task.push_str(&format!("{role}: {}\n", msg.content));
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Could not load supervisor context for delegation");
                }
            }
        }

        task
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        DELEGATE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Hand a described sub-task to one or more named sub-agents and \
         collect their answers. Targets run independently; each entry in \
         the result reports whether that agent succeeded."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        let targets: Vec<String> = self
            .supervisor
            .sub_agents()
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Free-text description of the sub-task"
                },
                "targets": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": format!("Sub-agent names to delegate to. Available: {}", targets.join(", "))
                },
                "context": {
                    "type": "string",
                    "description": "Optional extra context for the targets"
                }
            },
            "required": ["task", "targets"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &OperationContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: DelegateArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        if args.targets.is_empty() {
            return Err(ToolError::InvalidArguments(
                "targets must not be empty".into(),
            ));
        }

        // Every target must resolve against the supervisor's sub-agent set.
        let mut resolved: Vec<Arc<Agent>> = Vec::with_capacity(args.targets.len());
        for name in &args.targets {
            match self.supervisor.sub_agent(name) {
                Some(agent) => resolved.push(agent),
                None => return Err(ToolError::UnknownTarget(name.clone())),
            }
        }

        let task = self.seed_input(&args).await;
        let parent_step = self.current_step.load(Ordering::Relaxed) as usize;

        // Handoff hooks fire synchronously, before the fan-out.
        for target in &resolved {
            self.engine
                .fire_hook(
                    self.engine
                        .hooks
                        .on_handoff(ctx, self.supervisor.name(), target.name()),
                    "on_handoff",
                )
                .map_err(|e| ToolError::ExecutionFailed {
                    tool_name: DELEGATE_TOOL_NAME.into(),
                    reason: e.to_string(),
                })?;
        }

        info!(
            operation_id = ctx.operation_id(),
            supervisor = self.supervisor.name(),
            targets = resolved.len(),
            "Delegating task"
        );

        let futures = resolved.iter().map(|target| {
            let child_ctx = ctx.child_for(self.supervisor.name(), parent_step);
            let sub_options = RunOptions {
                // Independently resolved budget; never propagated.
                step_budget: None,
                stop_when: None,
                conversation_id: self
                    .conversation_id
                    .as_ref()
                    .map(|c| format!("{c}/{}", target.name())),
                user_id: self.user_id.clone(),
                include_supervisor_context: self.include_supervisor_context,
            };
            let engine = self.engine.clone();
            let task = task.clone();
            let target = target.clone();
            async move {
                let result = engine.run(&target, task, &child_ctx, sub_options).await;
                (target.name().to_string(), result)
            }
        });

        let results = futures::future::join_all(futures).await;

        let mut entries: Vec<DelegationOutcome> = Vec::with_capacity(results.len());
        for (agent, result) in results {
            match result {
                Ok(reply) => {
                    debug!(agent = %agent, steps = reply.steps, "Delegated agent completed");
                    entries.push(DelegationOutcome {
                        agent,
                        ok: true,
                        response: reply.render(),
                    });
                }
                Err(Error::Cancelled { reason }) => {
                    return Err(ToolError::Cancelled(reason));
                }
                Err(err) => {
                    warn!(agent = %agent, error = %err, "Delegated agent failed");
                    entries.push(DelegationOutcome {
                        agent,
                        ok: false,
                        response: err.to_string(),
                    });
                }
            }
        }

        let data = serde_json::to_value(&entries).map_err(|e| ToolError::ExecutionFailed {
            tool_name: DELEGATE_TOOL_NAME.into(),
            reason: e.to_string(),
        })?;

        Ok(ToolOutput::text(data.to_string()).with_data(data))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
