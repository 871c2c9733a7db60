//! Shared test helpers for engine tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use taskweave_core::backend::{
    BackendRequest, BackendResponse, ModelBackend, ModelOutput, Usage,
};
use taskweave_core::context::OperationContext;
use taskweave_core::error::{BackendError, ToolError};
use taskweave_core::message::ToolCallRequest;
use taskweave_core::tool::{Tool, ToolOutput};

/// A mock backend that returns a sequence of scripted responses.
///
/// Each call to `invoke` returns the next response in the queue. Panics if
/// more calls are made than responses provided, unless constructed with
/// [`cycling`](Self::cycling), which wraps around forever.
pub(crate) struct SequentialMockBackend {
    responses: Mutex<Vec<BackendResponse>>,
    requests: Mutex<Vec<BackendRequest>>,
    call_count: Mutex<usize>,
    cycle: bool,
    delay: Option<Duration>,
}

impl SequentialMockBackend {
    pub fn new(responses: Vec<BackendResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            call_count: Mutex::new(0),
            cycle: false,
            delay: None,
        }
    }

    /// A backend that returns a single text response.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    /// A backend that cycles through `responses` forever.
    pub fn cycling(responses: Vec<BackendResponse>) -> Self {
        let mut backend = Self::new(responses);
        backend.cycle = true;
        backend
    }

    /// Delay each call, observing cancellation while waiting. Useful for
    /// racing cancellation against an in-flight model call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// The requests seen so far, in order.
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for SequentialMockBackend {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn invoke(
        &self,
        request: BackendRequest,
        cancel: &CancellationToken,
    ) -> Result<BackendResponse, BackendError> {
        self.requests.lock().unwrap().push(request);

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(BackendError::Interrupted("cancelled while waiting".into()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();

        let index = if self.cycle {
            *count % responses.len()
        } else if *count >= responses.len() {
            panic!(
                "SequentialMockBackend: no more responses (call #{}, have {})",
                *count,
                responses.len()
            );
        } else {
            *count
        };

        let response = responses[index].clone();
        *count += 1;
        Ok(response)
    }
}

/// Create a simple text response.
pub(crate) fn make_text_response(text: &str) -> BackendResponse {
    BackendResponse {
        output: ModelOutput::Text(text.into()),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a structured-output response.
pub(crate) fn make_structured_response(value: serde_json::Value) -> BackendResponse {
    BackendResponse {
        output: ModelOutput::Structured(value),
        usage: None,
        model: "mock-model".into(),
    }
}

/// Create a response requesting tool calls, with optional thought text.
pub(crate) fn make_tool_calls_response(
    thought: Option<&str>,
    calls: Vec<ToolCallRequest>,
) -> BackendResponse {
    BackendResponse {
        output: ModelOutput::ToolCalls {
            thought: thought.map(String::from),
            calls,
        },
        usage: None,
        model: "mock-model".into(),
    }
}

/// Helper to create a tool-call request.
pub(crate) fn make_call(name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new(name, args)
}

/// A tool that echoes its "text" argument.
pub(crate) struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &OperationContext,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(
            arguments["text"].as_str().unwrap_or("").to_string(),
        ))
    }
}

/// A tool that always fails.
pub(crate) struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _ctx: &OperationContext,
    ) -> Result<ToolOutput, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "failing".into(),
            reason: "intentional test failure".into(),
        })
    }
}

/// A tool that cancels the whole operation.
pub(crate) struct CancellingTool;

#[async_trait]
impl Tool for CancellingTool {
    fn name(&self) -> &str {
        "halt_operation"
    }
    fn description(&self) -> &str {
        "Cancels the entire operation"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(
        &self,
        _arguments: serde_json::Value,
        ctx: &OperationContext,
    ) -> Result<ToolOutput, ToolError> {
        ctx.cancel("halted by tool");
        Ok(ToolOutput::text("operation halted"))
    }
}

/// A tool that sleeps until cancelled (or a long timeout).
pub(crate) struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Takes a long time"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(
        &self,
        _arguments: serde_json::Value,
        ctx: &OperationContext,
    ) -> Result<ToolOutput, ToolError> {
        let token = ctx.cancellation_token();
        tokio::select! {
            _ = token.cancelled() => Err(ToolError::Cancelled(
                ctx.cancel_reason().unwrap_or_else(|| "cancelled".into()),
            )),
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                Ok(ToolOutput::text("finally done"))
            }
        }
    }
}
