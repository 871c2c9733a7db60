//! The agent execution engine — the heart of Taskweave.
//!
//! One operation follows a **plan → act → observe** cycle:
//!
//! 1. **Start** — assemble the message list (instructions + injected
//!    memory + working memory + new input)
//! 2. **Call the model** via the configured backend
//! 3. **If tool calls**: execute them concurrently (possibly delegating to
//!    sub-agents, which recurse into the same engine on the shared
//!    operation context), append the results, loop back to step 2
//! 4. **If final text/structured output**: persist and return
//!
//! The loop continues until the model produces a final answer, the step
//! budget or stop predicate forces a best-effort partial completion, or
//! the shared cancellation signal aborts the whole tree.

pub mod delegation;
pub mod step_loop;
pub mod working_memory;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use delegation::{DelegateTool, DelegationOutcome, DELEGATE_TOOL_NAME};
pub use step_loop::{RunOptions, StepLoop, StopPredicate};
pub use working_memory::{
    ClearWorkingMemoryTool, GetWorkingMemoryTool, UpdateWorkingMemoryTool, WorkingMemoryManager,
};
