//! Per-request execution context.
//!
//! An `ExecutionContext` is created at the start of each chat request and
//! passed explicitly into everything that runs on the request's behalf:
//! tool wrappers, the output capture, and the agent invoker. It owns the
//! request's [`ExecutionLog`] and broadcasts every recorded event to the
//! listeners registered for this context, so progress tracking never goes
//! through ambient global state and concurrent requests cannot interleave.

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::listeners::{ContextId, EventReceiver, ListenerId, ListenerRegistry};
use super::{ExecutionEvent, ExecutionLog, LogSnapshot};

pub struct ExecutionContext {
    id: ContextId,
    log: ExecutionLog,
    listeners: Arc<ListenerRegistry>,
}

impl ExecutionContext {
    pub fn new(listeners: Arc<ListenerRegistry>) -> Self {
        Self {
            id: Uuid::new_v4(),
            log: ExecutionLog::new(),
            listeners,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    /// Register a fresh delivery queue for this context and return the
    /// receiving half. The caller must [`unsubscribe`](Self::unsubscribe)
    /// on every exit path.
    pub fn subscribe(&self) -> (ListenerId, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.listeners.register(self.id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.unregister(id);
    }

    /// Listeners currently registered for this context.
    pub fn listener_count(&self) -> usize {
        self.listeners.listener_count(self.id)
    }

    pub fn snapshot(&self) -> LogSnapshot {
        self.log.snapshot()
    }

    /// Record a tool invocation; returns the 1-based attempt number.
    pub fn record_tool_call(&self, tool_name: &str, args: serde_json::Value) -> u32 {
        let stored = self.emit(ExecutionEvent::tool_call(tool_name, args));
        let call_number = match &stored {
            ExecutionEvent::ToolCall { call_number, .. } => *call_number,
            _ => 0,
        };
        tracing::info!(
            target: "prism::tools",
            tool = tool_name,
            attempt = call_number,
            "Calling tool"
        );
        call_number
    }

    /// Record a tool outcome; `error = None` means success.
    pub fn record_tool_result(&self, tool_name: &str, error: Option<&str>) {
        match error {
            Some(message) => {
                tracing::error!(target: "prism::tools", tool = tool_name, error = message, "Tool failed");
            }
            None => {
                tracing::info!(target: "prism::tools", tool = tool_name, "Tool completed");
            }
        }
        self.emit(ExecutionEvent::tool_result(
            tool_name,
            error.map(str::to_string),
        ));
    }

    /// Record a reasoning fragment mined from agent output.
    pub fn record_reasoning(&self, line: &str) {
        tracing::info!(target: "prism::chain_of_thought", "Agent reasoning: {line}");
        self.emit(ExecutionEvent::reasoning_step(line));
    }

    /// Record a query issued against the query service.
    pub fn record_query(&self, query: &str) {
        self.emit(ExecutionEvent::query_issued(query));
    }

    /// Append to the log, then fan the stored event out to this context's
    /// listeners. Appending never fails; broadcast failures are swallowed
    /// inside the registry so observability cannot disturb the agent call.
    fn emit(&self, event: ExecutionEvent) -> ExecutionEvent {
        let stored = self.log.append(event);
        self.listeners.broadcast(self.id, &stored);
        stored
    }
}
