//! Line-buffered capture of free-form agent output.
//!
//! The agent engine narrates while it works ("Let me check the schema
//! first...", "Tool #1: run_select_query", ...). `OutputCapture` receives
//! that text incrementally, re-logs complete lines through `tracing`, and
//! runs each line through a classifier to mine reasoning fragments for the
//! chain of thought. Classification is a best-effort heuristic filter, not
//! a parser: lines that match neither the tool marker nor a reasoning
//! keyword are logged and otherwise ignored.

use std::fmt;
use std::sync::Arc;

use crate::execution::ExecutionContext;

/// Prefix the agent engine prints when it dispatches a tool.
pub const TOOL_MARKER: &str = "Tool #";

/// Case-insensitive indicators that a line is reasoning rather than noise.
const REASONING_KEYWORDS: &[&str] = &[
    "let me",
    "now let me",
    "i'll",
    "i will",
    "let's",
    "first",
    "next",
    "then",
    "now i",
    "i need to",
    "to analyze",
    "to check",
    "to find",
    "excellent",
    "perfect",
    "good",
    "great",
    "based on",
    "looking at",
    "the analysis",
    "from the",
    "this shows",
    "we can see",
    "it appears",
];

/// Outcome of classifying one line of agent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Tool-dispatch noise ("Tool #1: run_select_query"); never reasoning.
    ToolNoise { tool_name: Option<String> },
    /// The line reads like agent reasoning.
    Reasoning,
    /// Neither; logged for diagnostics only.
    Diagnostic,
}

/// Pluggable line classifier; [`classify_line`] is the default.
pub type LineClassifier = fn(&str) -> Classification;

/// Default heuristic classifier.
pub fn classify_line(line: &str) -> Classification {
    if let Some(rest) = line.strip_prefix(TOOL_MARKER) {
        let tool_name = rest
            .split_once(':')
            .map(|(_, name)| name.trim().to_string())
            .filter(|name| !name.is_empty());
        return Classification::ToolNoise { tool_name };
    }

    let lowered = line.to_lowercase();
    if REASONING_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
    {
        Classification::Reasoning
    } else {
        Classification::Diagnostic
    }
}

/// Buffering interceptor for incidental agent output.
pub struct OutputCapture {
    ctx: Arc<ExecutionContext>,
    classifier: LineClassifier,
    buffer: String,
}

impl OutputCapture {
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self::with_classifier(ctx, classify_line)
    }

    pub fn with_classifier(ctx: Arc<ExecutionContext>, classifier: LineClassifier) -> Self {
        Self {
            ctx,
            classifier,
            buffer: String::new(),
        }
    }

    /// Append text to the buffer and process every complete line found.
    pub fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.buffer.push_str(text);
        while let Some(newline) = self.buffer.find('\n') {
            let line = self.buffer[..newline].trim().to_string();
            self.buffer.drain(..=newline);
            if !line.is_empty() {
                self.process_line(&line);
            }
        }
    }

    /// Push any buffered partial line through the same classification path.
    /// Must be called after the agent returns, on success and on failure,
    /// so a trailing fragment without a newline is not lost.
    pub fn flush(&mut self) {
        let line = self.buffer.trim().to_string();
        self.buffer.clear();
        if !line.is_empty() {
            self.process_line(&line);
        }
    }

    /// Log first, classify second: a classification problem never stops the
    /// line from reaching the log.
    fn process_line(&self, line: &str) {
        tracing::info!(target: "prism::agent_output", "{line}");
        match (self.classifier)(line) {
            Classification::ToolNoise { tool_name } => {
                if let Some(name) = tool_name {
                    tracing::info!(target: "prism::tools", tool = %name, "Tool call detected in output");
                }
            }
            Classification::Reasoning => self.ctx.record_reasoning(line),
            Classification::Diagnostic => {}
        }
    }
}

impl fmt::Write for OutputCapture {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionEvent, ListenerRegistry};

    fn context() -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new(Arc::new(ListenerRegistry::new())))
    }

    fn reasoning_events(ctx: &ExecutionContext) -> Vec<String> {
        ctx.snapshot()
            .events
            .into_iter()
            .filter_map(|event| match event {
                ExecutionEvent::ReasoningStep { reasoning_text, .. } => Some(reasoning_text),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn classifies_tool_marker_lines_as_noise() {
        assert_eq!(
            classify_line("Tool #1: run_select_query"),
            Classification::ToolNoise {
                tool_name: Some("run_select_query".to_string())
            }
        );
        assert_eq!(
            classify_line("Tool #2"),
            Classification::ToolNoise { tool_name: None }
        );
    }

    #[test]
    fn classifies_keyword_lines_as_reasoning_case_insensitively() {
        assert_eq!(classify_line("LET ME look at the data"), Classification::Reasoning);
        assert_eq!(classify_line("Based on the results, CPU is fine"), Classification::Reasoning);
        assert_eq!(classify_line("xyzzy 42"), Classification::Diagnostic);
    }

    #[test]
    fn reasoning_line_followed_by_tool_marker_yields_one_event() {
        let ctx = context();
        let mut capture = OutputCapture::new(Arc::clone(&ctx));
        capture.write("Let me check the schema.\n");
        capture.write("Tool #1: run_select_query\n");
        capture.flush();

        let reasoning = reasoning_events(&ctx);
        assert_eq!(reasoning, vec!["Let me check the schema.".to_string()]);
    }

    #[test]
    fn reassembles_lines_split_across_writes() {
        let ctx = context();
        let mut capture = OutputCapture::new(Arc::clone(&ctx));
        capture.write("Let me che");
        capture.write("ck the sch");
        capture.write("ema.\n");

        assert_eq!(reasoning_events(&ctx).len(), 1);
    }

    #[test]
    fn flush_processes_trailing_partial_line() {
        let ctx = context();
        let mut capture = OutputCapture::new(Arc::clone(&ctx));
        capture.write("Looking at the latency distribution");
        assert!(reasoning_events(&ctx).is_empty());

        capture.flush();
        assert_eq!(reasoning_events(&ctx).len(), 1);

        // A second flush finds nothing new.
        capture.flush();
        assert_eq!(reasoning_events(&ctx).len(), 1);
    }

    #[test]
    fn blank_and_diagnostic_lines_produce_no_events() {
        let ctx = context();
        let mut capture = OutputCapture::new(Arc::clone(&ctx));
        capture.write("\n\n  \nrows=1204 cols=7\n");
        capture.flush();
        assert!(ctx.snapshot().events.is_empty());
    }

    #[test]
    fn custom_classifier_is_honored() {
        fn everything_is_reasoning(_line: &str) -> Classification {
            Classification::Reasoning
        }
        let ctx = context();
        let mut capture = OutputCapture::with_classifier(Arc::clone(&ctx), everything_is_reasoning);
        capture.write("rows=3\n");
        assert_eq!(reasoning_events(&ctx).len(), 1);
    }
}
