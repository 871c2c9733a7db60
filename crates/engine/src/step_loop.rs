//! The step loop — the heart of the execution core.
//!
//! Drives one agent's portion of an operation to completion within a
//! bounded number of steps: `Idle → Running → {Completed, Failed,
//! Aborted}`.
//!
//! 1. **Start** — load recent history (plus semantic recall when the store
//!    supports it), render working memory into the system instructions,
//!    fire the start hook.
//! 2. **Step** — invoke the model backend, raced against the shared
//!    cancellation token. A final text/structured output completes the
//!    loop; tool-call requests fan out concurrently and their results are
//!    joined before the next round-trip. Tool failures are fed back to the
//!    model as error-shaped results; only cancellation is fatal.
//! 3. **Bound** — the step budget (per-call override > agent value >
//!    computed default) and an optional stop predicate force completion
//!    with a best-effort partial result, never an error.
//!
//! The cancellation signal is observed at model-call entry, at each tool
//! execution entry, and before the final memory commit.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use taskweave_core::agent::Agent;
use taskweave_core::backend::{BackendRequest, ModelOutput};
use taskweave_core::context::{
    AgentReply, OperationContext, ReplyContent, StepOutput, StepRecord, StepStatus,
    ToolResultRecord,
};
use taskweave_core::error::{Error, HookError, MemoryError, Result};
use taskweave_core::hooks::{HookFailurePolicy, LifecycleHooks, NoopHooks};
use taskweave_core::memory::{MemoryStore, MessageFilter, RecallStrategy};
use taskweave_core::message::Message;
use taskweave_core::tool::ToolSet;

use crate::delegation::DelegateTool;
use crate::working_memory::{
    ClearWorkingMemoryTool, GetWorkingMemoryTool, UpdateWorkingMemoryTool, WorkingMemoryManager,
};

/// Returned when the budget or a stop predicate forces completion and no
/// assistant text was produced yet.
const PARTIAL_NOTICE: &str =
    "Reached the configured step limit before producing a final answer.";

/// Per-invocation stop predicate: `(context, steps_used) -> stop?`.
pub type StopPredicate = Arc<dyn Fn(&OperationContext, u32) -> bool + Send + Sync>;

/// Per-invocation options, overriding agent-level defaults.
#[derive(Clone)]
pub struct RunOptions {
    /// Explicit step budget; overrides the agent's configured value
    pub step_budget: Option<u32>,

    /// Custom stop predicate, evaluated after every step
    pub stop_when: Option<StopPredicate>,

    /// Conversation identifier for history and conversation-scoped
    /// working memory
    pub conversation_id: Option<String>,

    /// User identifier for user-scoped working memory
    pub user_id: Option<String>,

    /// Whether delegated sub-agents are seeded with the supervisor's
    /// recent messages
    pub include_supervisor_context: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            step_budget: None,
            stop_when: None,
            conversation_id: None,
            user_id: None,
            include_supervisor_context: true,
        }
    }
}

impl RunOptions {
    pub fn with_step_budget(mut self, budget: u32) -> Self {
        self.step_budget = Some(budget);
        self
    }

    pub fn with_stop_when(
        mut self,
        predicate: impl Fn(&OperationContext, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.stop_when = Some(Arc::new(predicate));
        self
    }

    pub fn with_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_user(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn without_supervisor_context(mut self) -> Self {
        self.include_supervisor_context = false;
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("step_budget", &self.step_budget)
            .field("stop_when", &self.stop_when.is_some())
            .field("conversation_id", &self.conversation_id)
            .field("user_id", &self.user_id)
            .field(
                "include_supervisor_context",
                &self.include_supervisor_context,
            )
            .finish()
    }
}

/// The agent engine. Cheap to clone; delegation clones it into sub-agent
/// invocations so the whole tree shares one store and one hook set.
#[derive(Clone)]
pub struct StepLoop {
    pub(crate) store: Arc<dyn MemoryStore>,
    pub(crate) hooks: Arc<dyn LifecycleHooks>,
    pub(crate) hook_policy: HookFailurePolicy,
}

impl StepLoop {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            hooks: Arc::new(NoopHooks),
            hook_policy: HookFailurePolicy::default(),
        }
    }

    /// Attach lifecycle hooks.
    pub fn with_hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Set how hook failures are handled.
    pub fn with_hook_policy(mut self, policy: HookFailurePolicy) -> Self {
        self.hook_policy = policy;
        self
    }

    /// Apply the hook failure policy to a hook result.
    pub(crate) fn fire_hook(
        &self,
        outcome: std::result::Result<(), HookError>,
        hook: &str,
    ) -> Result<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(e) => match self.hook_policy {
                HookFailurePolicy::Fatal => Err(Error::Hook(e)),
                HookFailurePolicy::LogAndContinue => {
                    warn!(hook, error = %e, "Lifecycle hook failed, continuing");
                    Ok(())
                }
            },
        }
    }

    /// Fire `on_end` with a terminal error and return that error.
    /// Hook failures on this path are logged; the original error wins.
    fn fail(&self, ctx: &OperationContext, agent: &str, err: Error) -> Error {
        if let Err(hook_err) = self.hooks.on_end(ctx, agent, Err(&err)) {
            warn!(error = %hook_err, "on_end hook failed on the failure path");
        }
        err
    }

    /// Transition to `Aborted`: build the structured cancellation error,
    /// fire `on_end` once, return the error.
    fn abort(&self, ctx: &OperationContext, agent: &str) -> Error {
        warn!(
            operation_id = ctx.operation_id(),
            agent, "Agent loop aborted by cancellation"
        );
        self.fail(ctx, agent, ctx.cancelled_error())
    }

    /// Run one agent's loop to completion.
    ///
    /// This is the main entry point. Delegated sub-agents recurse into it
    /// through the `delegate_task` tool, sharing `ctx` by reference.
    pub async fn run(
        &self,
        agent: &Arc<Agent>,
        input: impl Into<String>,
        ctx: &OperationContext,
        options: RunOptions,
    ) -> Result<AgentReply> {
        let agent_name = agent.name().to_string();
        let input = input.into();
        let budget = agent.resolved_step_budget(options.step_budget).max(1);
        let token = ctx.cancellation_token();

        info!(
            operation_id = ctx.operation_id(),
            agent = %agent_name,
            budget,
            "Agent loop starting"
        );

        self.fire_hook(self.hooks.on_start(ctx, &agent_name), "on_start")?;

        // ── Working memory ──
        let working_memory = agent.working_memory().map(|config| {
            Arc::new(WorkingMemoryManager::new(
                self.store.clone(),
                config.clone(),
            ))
        });
        let scope_key = working_memory.as_ref().and_then(|m| {
            m.scope_key(
                options.conversation_id.as_deref(),
                options.user_id.as_deref(),
            )
        });

        // ── Message list: system + history + new input ──
        // The system message is re-rendered before every round-trip when
        // working memory is active, so mid-operation updates are visible
        // to the next model call.
        let base_instructions = agent.instructions().resolve(ctx);
        let mut convo: Vec<Message> = Vec::new();
        let mut has_system = false;
        if !base_instructions.is_empty() {
            convo.push(Message::system(&base_instructions));
            has_system = true;
        }
        convo.extend(self.load_history(agent, &options, &input).await);

        let input_msg = Message::user(&input);
        convo.push(input_msg.clone());

        // New messages to commit to the store at completion.
        let mut pending: Vec<Message> = vec![input_msg];

        // ── Visible tool set for this operation ──
        let current_step = Arc::new(AtomicU32::new(0));
        let op_tools = self.build_op_tools(
            agent,
            &options,
            working_memory.clone(),
            scope_key.clone(),
            &current_step,
        )?;
        let tool_schemas = op_tools.schemas();

        let mut steps_used: u32 = 0;
        let mut last_text: Option<String> = None;

        loop {
            if steps_used >= budget {
                warn!(
                    agent = %agent_name,
                    budget,
                    "Step budget exhausted, forcing completion"
                );
                break;
            }

            // (a) cancellation at model-call entry
            if ctx.is_cancelled() {
                return Err(self.abort(ctx, &agent_name));
            }

            // Inject the current working-memory snapshot.
            if let (Some(manager), Some(key)) = (&working_memory, &scope_key) {
                match manager.render_section(key).await {
                    Ok(section) => {
                        let content = if base_instructions.is_empty() {
                            section
                        } else {
                            format!("{base_instructions}\n\n{section}")
                        };
                        if has_system {
                            convo[0] = Message::system(content);
                        } else {
                            convo.insert(0, Message::system(content));
                            has_system = true;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Working memory load failed, continuing without it");
                    }
                }
            }

            steps_used += 1;
            current_step.store(steps_used, Ordering::Relaxed);
            let started_at = Utc::now();
            let input_messages = convo.len();

            debug!(agent = %agent_name, step = steps_used, "Model round-trip");

            let request = BackendRequest {
                messages: convo.clone(),
                tools: tool_schemas.clone(),
            };

            let invoke_result = tokio::select! {
                _ = token.cancelled() => None,
                result = agent.backend().invoke(request, &token) => Some(result),
            };
            let Some(invoke_result) = invoke_result else {
                return Err(self.abort(ctx, &agent_name));
            };

            let response = match invoke_result {
                Ok(response) => response,
                Err(e) => {
                    ctx.record_step(StepRecord {
                        agent: agent_name.clone(),
                        step: steps_used,
                        input_messages,
                        output: None,
                        tool_results: vec![],
                        usage: None,
                        status: StepStatus::Error,
                        parent: ctx.parent().cloned(),
                        started_at,
                        finished_at: Some(Utc::now()),
                    });
                    return Err(self.fail(ctx, &agent_name, Error::Backend(e)));
                }
            };
            let usage = response.usage;

            match response.output {
                // ── Final output: complete ──
                output @ (ModelOutput::Text(_) | ModelOutput::Structured(_)) => {
                    let (step_output, content, rendered) = match &output {
                        ModelOutput::Text(t) => (
                            StepOutput::Text(t.clone()),
                            ReplyContent::Text(t.clone()),
                            t.clone(),
                        ),
                        ModelOutput::Structured(v) => (
                            StepOutput::Structured(v.clone()),
                            ReplyContent::Structured(v.clone()),
                            v.to_string(),
                        ),
                        ModelOutput::ToolCalls { .. } => unreachable!(),
                    };

                    ctx.record_step(StepRecord {
                        agent: agent_name.clone(),
                        step: steps_used,
                        input_messages,
                        output: Some(step_output),
                        tool_results: vec![],
                        usage,
                        status: StepStatus::Ok,
                        parent: ctx.parent().cloned(),
                        started_at,
                        finished_at: Some(Utc::now()),
                    });

                    // (c) cancellation before committing final results
                    if ctx.is_cancelled() {
                        return Err(self.abort(ctx, &agent_name));
                    }

                    pending.push(Message::assistant(&rendered));
                    self.persist(agent, &options, &pending).await;

                    self.fire_hook(
                        self.hooks.on_end(ctx, &agent_name, Ok(&output)),
                        "on_end",
                    )?;

                    info!(
                        operation_id = ctx.operation_id(),
                        agent = %agent_name,
                        steps = steps_used,
                        "Agent loop completed"
                    );

                    return Ok(AgentReply {
                        content,
                        steps: steps_used,
                        partial: false,
                    });
                }

                // ── Tool calls: fan out, join, feed results back ──
                ModelOutput::ToolCalls { thought, calls } => {
                    if let Some(t) = &thought
                        && !t.is_empty()
                    {
                        last_text = Some(t.clone());
                    }

                    let names: Vec<String> = calls.iter().map(|c| c.name.clone()).collect();
                    let assistant_msg = Message::assistant_with_tool_calls(
                        thought.clone().unwrap_or_default(),
                        calls.clone(),
                    );
                    convo.push(assistant_msg.clone());
                    pending.push(assistant_msg);

                    debug!(
                        agent = %agent_name,
                        step = steps_used,
                        tools = ?names,
                        "Executing tool calls"
                    );

                    let make_record = |status: StepStatus, tool_results: Vec<ToolResultRecord>| {
                        StepRecord {
                            agent: agent_name.clone(),
                            step: steps_used,
                            input_messages,
                            output: Some(StepOutput::ToolCalls(names.clone())),
                            tool_results,
                            usage,
                            status,
                            parent: ctx.parent().cloned(),
                            started_at,
                            finished_at: Some(Utc::now()),
                        }
                    };

                    // Tool-start hooks run synchronously, in request order.
                    for call in &calls {
                        if let Err(e) = self
                            .fire_hook(self.hooks.on_tool_start(ctx, &call.name), "on_tool_start")
                        {
                            ctx.record_step(make_record(StepStatus::Error, vec![]));
                            return Err(self.fail(ctx, &agent_name, e));
                        }
                    }

                    // Independent calls run concurrently and are joined
                    // before the loop continues.
                    let exec_futures: Vec<_> = calls
                        .iter()
                        .map(|call| {
                            let tools = &op_tools;
                            async move {
                                // (b) cancellation at tool-execution entry
                                if ctx.is_cancelled() {
                                    let reason = ctx
                                        .cancel_reason()
                                        .unwrap_or_else(|| "cancelled".to_string());
                                    return (
                                        call,
                                        Err(taskweave_core::error::ToolError::Cancelled(reason)),
                                        0u64,
                                    );
                                }
                                let started = std::time::Instant::now();
                                let result = tools.execute(call, ctx).await;
                                (call, result, started.elapsed().as_millis() as u64)
                            }
                        })
                        .collect();

                    let joined = tokio::select! {
                        _ = token.cancelled() => None,
                        results = futures::future::join_all(exec_futures) => Some(results),
                    };
                    let Some(results) = joined else {
                        ctx.record_step(make_record(StepStatus::Aborted, vec![]));
                        return Err(self.abort(ctx, &agent_name));
                    };

                    let mut tool_records: Vec<ToolResultRecord> = Vec::with_capacity(results.len());
                    for (call, result, duration_ms) in results {
                        if let Err(e) = self.fire_hook(
                            self.hooks.on_tool_end(ctx, &call.name, result.as_ref()),
                            "on_tool_end",
                        ) {
                            ctx.record_step(make_record(StepStatus::Error, tool_records));
                            return Err(self.fail(ctx, &agent_name, e));
                        }

                        match result {
                            Ok(output) => {
                                tool_records.push(ToolResultRecord {
                                    tool: call.name.clone(),
                                    ok: true,
                                    summary: truncate(&output.content, 200),
                                    duration_ms,
                                });
                                let msg = Message::tool_result(&call.id, &output.content);
                                convo.push(msg.clone());
                                pending.push(msg);
                            }
                            Err(e) if e.is_cancellation() => {
                                ctx.record_step(make_record(StepStatus::Aborted, tool_records));
                                return Err(self.abort(ctx, &agent_name));
                            }
                            Err(e) => {
                                warn!(
                                    agent = %agent_name,
                                    tool = %call.name,
                                    error = %e,
                                    "Tool execution failed"
                                );
                                tool_records.push(ToolResultRecord {
                                    tool: call.name.clone(),
                                    ok: false,
                                    summary: truncate(&e.to_string(), 200),
                                    duration_ms,
                                });
                                // Error-shaped result: the model sees the
                                // failure and decides how to proceed.
                                let msg =
                                    Message::tool_result(&call.id, format!("Error: {e}"));
                                convo.push(msg.clone());
                                pending.push(msg);
                            }
                        }
                    }

                    // A tool may have triggered cancellation even if the
                    // token race above resolved in favor of the join.
                    if ctx.is_cancelled() {
                        ctx.record_step(make_record(StepStatus::Aborted, tool_records));
                        return Err(self.abort(ctx, &agent_name));
                    }

                    ctx.record_step(make_record(StepStatus::Ok, tool_records));

                    if let Some(stop) = &options.stop_when
                        && stop(ctx, steps_used)
                    {
                        debug!(agent = %agent_name, steps = steps_used, "Stop predicate fired");
                        break;
                    }
                }
            }
        }

        // ── Budget / stop predicate: best-effort partial completion ──
        let content = last_text.unwrap_or_else(|| PARTIAL_NOTICE.to_string());

        if ctx.is_cancelled() {
            return Err(self.abort(ctx, &agent_name));
        }

        pending.push(Message::assistant(&content));
        self.persist(agent, &options, &pending).await;

        let output = ModelOutput::Text(content.clone());
        self.fire_hook(self.hooks.on_end(ctx, &agent_name, Ok(&output)), "on_end")?;

        info!(
            operation_id = ctx.operation_id(),
            agent = %agent_name,
            steps = steps_used,
            "Agent loop completed with partial result"
        );

        Ok(AgentReply {
            content: ReplyContent::Text(content),
            steps: steps_used,
            partial: true,
        })
    }

    /// Assemble the per-operation tool set: the agent's own tools, the
    /// delegation tool when sub-agents exist, and the working-memory tools
    /// when working memory is active for this operation.
    fn build_op_tools(
        &self,
        agent: &Arc<Agent>,
        options: &RunOptions,
        working_memory: Option<Arc<WorkingMemoryManager>>,
        scope_key: Option<taskweave_core::memory::ScopeKey>,
        current_step: &Arc<AtomicU32>,
    ) -> Result<ToolSet> {
        let tools = ToolSet::new();
        for tool in agent.tools().all() {
            tools.register(tool)?;
        }

        if !agent.sub_agents().is_empty() {
            tools.register(Arc::new(DelegateTool::new(
                self.clone(),
                agent.clone(),
                options,
                current_step.clone(),
            )))?;
        }

        if let (Some(manager), Some(key)) = (working_memory, scope_key) {
            tools.register(Arc::new(GetWorkingMemoryTool::new(
                manager.clone(),
                key.clone(),
            )))?;
            tools.register(Arc::new(UpdateWorkingMemoryTool::new(
                manager.clone(),
                key.clone(),
            )))?;
            tools.register(Arc::new(ClearWorkingMemoryTool::new(manager, key)))?;
        }

        Ok(tools)
    }

    /// Load recent history and merge in semantic recall when configured.
    /// Store failures degrade to an empty (or recency-only) history.
    async fn load_history(
        &self,
        agent: &Agent,
        options: &RunOptions,
        query: &str,
    ) -> Vec<Message> {
        let (Some(config), Some(conversation_id)) =
            (agent.memory(), options.conversation_id.as_deref())
        else {
            return Vec::new();
        };

        let recent = match self
            .store
            .messages(conversation_id, &MessageFilter::recent(config.recent_limit))
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "History load failed, continuing without history");
                return Vec::new();
            }
        };

        let Some(recall) = &config.semantic_recall else {
            return recent;
        };

        match self
            .store
            .semantic_recall(conversation_id, query, recall.top_k, recall.min_score)
            .await
        {
            Ok(recalled) => merge_recall(recent, recalled, recall.strategy),
            Err(MemoryError::RecallUnsupported) => {
                debug!(
                    store = self.store.name(),
                    "Semantic recall unsupported, using recency only"
                );
                recent
            }
            Err(e) => {
                warn!(error = %e, "Semantic recall failed, using recency only");
                recent
            }
        }
    }

    /// Commit the operation's new messages. Failures are logged — the
    /// result is already computed and is returned regardless.
    async fn persist(&self, agent: &Agent, options: &RunOptions, pending: &[Message]) {
        if agent.memory().is_none() {
            return;
        }
        let Some(conversation_id) = options.conversation_id.as_deref() else {
            return;
        };
        if pending.is_empty() {
            return;
        }
        if let Err(e) = self.store.append(conversation_id, pending.to_vec()).await {
            warn!(error = %e, conversation_id, "Failed to persist conversation messages");
        }
    }
}

/// Merge semantically recalled messages into recent history, dropping
/// recalled messages already present.
fn merge_recall(
    recent: Vec<Message>,
    recalled: Vec<Message>,
    strategy: RecallStrategy,
) -> Vec<Message> {
    let known: HashSet<String> = recent.iter().map(|m| m.id.clone()).collect();
    let fresh: Vec<Message> = recalled
        .into_iter()
        .filter(|m| !known.contains(&m.id))
        .collect();

    match strategy {
        RecallStrategy::Prepend => fresh.into_iter().chain(recent).collect(),
        RecallStrategy::Append => recent.into_iter().chain(fresh).collect(),
        RecallStrategy::Interleave => {
            let mut merged: Vec<Message> = recent.into_iter().chain(fresh).collect();
            merged.sort_by_key(|m| m.timestamp);
            merged
        }
    }
}

/// Char-safe prefix for trace summaries.
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
