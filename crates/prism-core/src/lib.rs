//! Core engine for the prism analytics agent.
//!
//! Wraps a blocking language-model agent so its progress can be observed
//! live from async code. Tool calls, issued queries, and mined reasoning
//! lines are appended to a per-request [`execution::ExecutionLog`] and
//! broadcast to any listeners subscribed to that request.

pub mod agent;
pub mod capture;
pub mod config;
pub mod execution;
pub mod internals;
pub mod query;

pub use agent::{
    builtin_tool_specs, run_captured, AgentInvoker, RemoteAgent, ToolError, ToolSpec, Toolbox,
};
pub use capture::{classify_line, Classification, LineClassifier, OutputCapture};
pub use config::AgentConfig;
pub use execution::{
    ContextId, EventReceiver, EventSender, ExecutionContext, ExecutionEvent, ExecutionLog,
    ListenerId, ListenerRegistry, LogSnapshot,
};
pub use internals::AgentInternals;
pub use query::{QueryError, QueryServiceClient};
