//! Agent invocation boundary.
//!
//! The language-model engine is an external collaborator: given a
//! conversation transcript it eventually returns a text answer, performing
//! zero or more tool calls along the way. This module defines the seam
//! (`AgentInvoker`), the instrumented tool wrappers the engine calls
//! through, and the capture harness that mines the engine's narration for
//! reasoning events.

mod remote;
mod tools;

use std::sync::Arc;

pub use remote::RemoteAgent;
pub use tools::{builtin_tool_specs, ToolError, ToolSpec, Toolbox};

use crate::capture::OutputCapture;
use crate::execution::ExecutionContext;

/// The opaque long-running agent call.
///
/// `run` blocks, potentially for tens of seconds; it is always dispatched
/// on a worker thread, never on the async scheduler. Progress is published
/// through `ctx` (tool wrappers) and `output` (free-form narration).
pub trait AgentInvoker: Send + Sync {
    fn run(
        &self,
        conversation: &str,
        ctx: &ExecutionContext,
        output: &mut OutputCapture,
    ) -> anyhow::Result<String>;
}

/// Run the agent with its narration routed through an [`OutputCapture`].
///
/// The capture is flushed on both the success and failure path so a
/// trailing partial line is never lost.
pub fn run_captured(
    invoker: &dyn AgentInvoker,
    conversation: &str,
    ctx: &Arc<ExecutionContext>,
) -> anyhow::Result<String> {
    let mut output = OutputCapture::new(Arc::clone(ctx));
    let result = invoker.run(conversation, ctx, &mut output);
    output.flush();
    match &result {
        Ok(answer) => {
            tracing::info!(chars = answer.len(), "Agent call completed");
        }
        Err(error) => {
            tracing::error!("Agent call failed: {error:#}");
        }
    }
    result
}
