//! Execution event records.
//!
//! `ExecutionEvent` is the single source of truth for everything the agent
//! does while a request is in flight: tool invocations, their outcomes,
//! queries issued against the metrics warehouse, and reasoning fragments
//! mined from the agent's free-form output. Events are immutable once
//! appended; the only ordering guarantee is append order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry in the per-request execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// The agent invoked a tool.
    ToolCall {
        tool_name: String,
        args: serde_json::Value,
        /// 1-based attempt number for this tool, assigned by the log.
        call_number: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool invocation finished.
    ToolResult {
        tool_name: String,
        success: bool,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A reasoning fragment extracted from agent output.
    ReasoningStep {
        description: String,
        reasoning_text: String,
        timestamp: DateTime<Utc>,
    },

    /// A SELECT query was issued against the query service.
    QueryIssued {
        query: String,
        description: String,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// Build a `tool_call` event. The call number is assigned when the event
    /// is appended to an [`ExecutionLog`](super::ExecutionLog).
    pub fn tool_call(tool_name: impl Into<String>, args: serde_json::Value) -> Self {
        Self::ToolCall {
            tool_name: tool_name.into(),
            args,
            call_number: 0,
            timestamp: Utc::now(),
        }
    }

    /// Build a `tool_result` event; `error = None` means success.
    pub fn tool_result(tool_name: impl Into<String>, error: Option<String>) -> Self {
        Self::ToolResult {
            tool_name: tool_name.into(),
            success: error.is_none(),
            error,
            timestamp: Utc::now(),
        }
    }

    /// Build a `reasoning_step` event from a line of agent output.
    pub fn reasoning_step(line: &str) -> Self {
        Self::ReasoningStep {
            description: format!("Agent reasoning: {line}"),
            reasoning_text: line.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Build a `query_issued` event; the description embeds a truncated
    /// preview of the query text.
    pub fn query_issued(query: &str) -> Self {
        let preview: String = query.chars().take(100).collect();
        let description = if query.chars().count() > 100 {
            format!("Query: {preview}...")
        } else {
            format!("Query: {preview}")
        };
        Self::QueryIssued {
            query: query.to_string(),
            description,
            timestamp: Utc::now(),
        }
    }

    /// Wire-level kind tag for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::ReasoningStep { .. } => "reasoning_step",
            Self::QueryIssued { .. } => "query_issued",
        }
    }

    /// Tool name, for the tool lifecycle kinds.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::ToolCall { tool_name, .. } | Self::ToolResult { tool_name, .. } => {
                Some(tool_name)
            }
            _ => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ToolCall { timestamp, .. }
            | Self::ToolResult { timestamp, .. }
            | Self::ReasoningStep { timestamp, .. }
            | Self::QueryIssued { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_snake_case_type_tag() {
        let event = ExecutionEvent::tool_call("list_tables", json!({"database": "metrics"}));
        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["tool_name"], "list_tables");
        assert_eq!(value["args"]["database"], "metrics");
    }

    #[test]
    fn tool_result_success_tracks_error_presence() {
        let ok = ExecutionEvent::tool_result("run_select_query", None);
        let failed = ExecutionEvent::tool_result("run_select_query", Some("timeout".into()));
        match (ok, failed) {
            (
                ExecutionEvent::ToolResult { success: true, error: None, .. },
                ExecutionEvent::ToolResult { success: false, error: Some(e), .. },
            ) => assert_eq!(e, "timeout"),
            _ => panic!("unexpected event shapes"),
        }
    }

    #[test]
    fn query_description_truncates_long_queries() {
        let long = "SELECT ".repeat(40);
        let event = ExecutionEvent::query_issued(&long);
        match event {
            ExecutionEvent::QueryIssued { description, query, .. } => {
                assert!(description.ends_with("..."));
                assert_eq!(query, long);
            }
            _ => panic!("expected query event"),
        }
    }
}
