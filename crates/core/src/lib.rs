//! # Taskweave Core
//!
//! Domain types, traits, and error definitions for the Taskweave agent
//! execution runtime. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here: the model backend, the
//! memory store, tools, lifecycle hooks. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)
//!
//! There is no ambient state: the registries (tool sets, sub-agent lists)
//! are explicit values owned by agents, and the per-operation
//! [`OperationContext`] is passed as a parameter through every call
//! boundary.

pub mod agent;
pub mod backend;
pub mod context;
pub mod error;
pub mod hooks;
pub mod memory;
pub mod message;
pub mod schema;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{Agent, AgentBuilder, Instructions};
pub use backend::{BackendRequest, BackendResponse, ModelBackend, ModelOutput, ToolSchema, Usage};
pub use context::{
    AgentReply, OperationContext, ParentRef, ReplyContent, StepOutput, StepRecord, StepStatus,
    ToolResultRecord,
};
pub use error::{BackendError, Error, HookError, MemoryError, Result, ToolError};
pub use hooks::{HookFailurePolicy, LifecycleHooks, NoopHooks};
pub use memory::{
    MemoryConfig, MemoryStore, MessageFilter, RecallStrategy, ScopeKey, SemanticRecallConfig,
    WorkingMemoryConfig, WorkingMemoryMode, WorkingMemoryRecord, WorkingMemoryScope,
};
pub use message::{Message, Role, ToolCallRequest};
pub use tool::{Tool, ToolOutput, ToolSet};
