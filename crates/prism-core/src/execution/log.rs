//! Per-request execution log.
//!
//! One `ExecutionLog` lives inside each request's
//! [`ExecutionContext`](super::ExecutionContext), so concurrent requests
//! never interleave their events. Appends happen from the blocking worker
//! thread while snapshots are taken from the async stream task; a single
//! mutex guards both the event sequence and the tool counters so call
//! numbers stay consistent with the recorded events.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use super::ExecutionEvent;

/// Ordered, mutex-protected sequence of execution events plus per-tool
/// invocation counters.
#[derive(Debug, Default)]
pub struct ExecutionLog {
    inner: Mutex<LogInner>,
}

#[derive(Debug, Default)]
struct LogInner {
    events: Vec<ExecutionEvent>,
    tool_call_counts: HashMap<String, u32>,
}

/// Point-in-time copy of the log, safe to hand to a formatting routine
/// while the worker keeps appending.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogSnapshot {
    pub events: Vec<ExecutionEvent>,
    pub tool_call_counts: HashMap<String, u32>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the event sequence and counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        if !inner.events.is_empty() {
            tracing::debug!(
                events = inner.events.len(),
                tool_calls = inner.tool_call_counts.values().sum::<u32>(),
                "Discarding previous execution log"
            );
        }
        inner.events.clear();
        inner.tool_call_counts.clear();
    }

    /// Append an event to the tail. For `tool_call` events the per-tool
    /// counter is bumped under the same lock and the event's `call_number`
    /// is stamped with the new value. Returns the event as stored, so the
    /// caller can broadcast the exact record.
    pub fn append(&self, mut event: ExecutionEvent) -> ExecutionEvent {
        let mut inner = self.inner.lock();
        if let ExecutionEvent::ToolCall {
            tool_name,
            call_number,
            ..
        } = &mut event
        {
            let count = inner
                .tool_call_counts
                .entry(tool_name.clone())
                .or_insert(0);
            *count += 1;
            *call_number = *count;
        }
        inner.events.push(event.clone());
        event
    }

    /// Point-in-time copy of the full sequence and counters.
    pub fn snapshot(&self) -> LogSnapshot {
        let inner = self.inner.lock();
        LogSnapshot {
            events: inner.events.clone(),
            tool_call_counts: inner.tool_call_counts.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_preserves_append_order_and_counters() {
        let log = ExecutionLog::new();
        log.append(ExecutionEvent::tool_call("list_databases", json!({})));
        log.append(ExecutionEvent::tool_result("list_databases", None));
        log.append(ExecutionEvent::tool_call("run_select_query", json!({"query": "SELECT 1"})));
        log.append(ExecutionEvent::tool_call("list_databases", json!({})));

        let snapshot = log.snapshot();
        assert_eq!(snapshot.events.len(), 4);
        assert_eq!(snapshot.events[0].kind(), "tool_call");
        assert_eq!(snapshot.events[1].kind(), "tool_result");
        assert_eq!(snapshot.tool_call_counts["list_databases"], 2);
        assert_eq!(snapshot.tool_call_counts["run_select_query"], 1);
    }

    #[test]
    fn append_assigns_sequential_call_numbers_per_tool() {
        let log = ExecutionLog::new();
        let first = log.append(ExecutionEvent::tool_call("list_tables", json!({})));
        let other = log.append(ExecutionEvent::tool_call("run_select_query", json!({})));
        let second = log.append(ExecutionEvent::tool_call("list_tables", json!({})));

        let number = |event: &ExecutionEvent| match event {
            ExecutionEvent::ToolCall { call_number, .. } => *call_number,
            _ => panic!("expected tool_call"),
        };
        assert_eq!(number(&first), 1);
        assert_eq!(number(&other), 1);
        assert_eq!(number(&second), 2);
    }

    #[test]
    fn reset_clears_events_and_counters() {
        let log = ExecutionLog::new();
        log.append(ExecutionEvent::tool_call("list_tables", json!({})));
        log.reset();
        let snapshot = log.snapshot();
        assert!(snapshot.events.is_empty());
        assert!(snapshot.tool_call_counts.is_empty());

        // Counters restart from 1 after a reset.
        let event = log.append(ExecutionEvent::tool_call("list_tables", json!({})));
        match event {
            ExecutionEvent::ToolCall { call_number, .. } => assert_eq!(call_number, 1),
            _ => panic!("expected tool_call"),
        }

        log.reset();
        log.reset();
        assert!(log.snapshot().events.is_empty());
    }

    #[test]
    fn non_tool_events_do_not_touch_counters() {
        let log = ExecutionLog::new();
        log.append(ExecutionEvent::reasoning_step("Let me check the schema."));
        log.append(ExecutionEvent::query_issued("SELECT 1"));
        assert!(log.snapshot().tool_call_counts.is_empty());
    }
}
