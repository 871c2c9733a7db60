//! Lifecycle hooks — observer slots for the execution core.
//!
//! A fixed set of named callback slots invoked synchronously in the
//! calling flow: operation start/end, tool start/end, and delegation
//! handoff. Hooks may mutate the context's attribute bag or request
//! cancellation. A hook that fails is operation-fatal by default; the
//! policy can downgrade failures to a warning.

use crate::backend::ModelOutput;
use crate::context::OperationContext;
use crate::error::{Error, HookError, ToolError};
use crate::tool::ToolOutput;

/// How the engine reacts to a hook returning an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HookFailurePolicy {
    /// A failing hook fails the operation (default).
    #[default]
    Fatal,

    /// A failing hook is logged and execution continues.
    LogAndContinue,
}

/// The lifecycle hook contract.
///
/// All methods default to no-ops, so implementors override only the slots
/// they care about.
pub trait LifecycleHooks: Send + Sync {
    /// Invoked once when an agent's loop starts.
    fn on_start(
        &self,
        _ctx: &OperationContext,
        _agent: &str,
    ) -> std::result::Result<(), HookError> {
        Ok(())
    }

    /// Invoked once when an agent's loop ends, with the final output or
    /// the terminal error.
    fn on_end(
        &self,
        _ctx: &OperationContext,
        _agent: &str,
        _result: std::result::Result<&ModelOutput, &Error>,
    ) -> std::result::Result<(), HookError> {
        Ok(())
    }

    /// Invoked before each tool execution.
    fn on_tool_start(
        &self,
        _ctx: &OperationContext,
        _tool: &str,
    ) -> std::result::Result<(), HookError> {
        Ok(())
    }

    /// Invoked after each tool execution, with the result or the error.
    fn on_tool_end(
        &self,
        _ctx: &OperationContext,
        _tool: &str,
        _result: std::result::Result<&ToolOutput, &ToolError>,
    ) -> std::result::Result<(), HookError> {
        Ok(())
    }

    /// Invoked when a supervisor hands a task off to a sub-agent.
    fn on_handoff(
        &self,
        _ctx: &OperationContext,
        _source: &str,
        _target: &str,
    ) -> std::result::Result<(), HookError> {
        Ok(())
    }
}

/// A hook implementation that observes nothing.
pub struct NoopHooks;

impl LifecycleHooks for NoopHooks {}
