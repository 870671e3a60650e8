//! Internals snapshot: tool usage, chain of thought, and metrics for one
//! request, used for debugging and visualization.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agent::builtin_tool_specs;
use crate::config::AgentConfig;
use crate::execution::{ExecutionEvent, LogSnapshot};

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub call_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThoughtStep {
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub tool_calls: u32,
    pub thinking_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_endpoint: Option<String>,
    pub query_service_url: String,
    pub max_tokens: u32,
}

/// Structured summary of one request's execution.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInternals {
    pub tools: Vec<ToolInfo>,
    pub system_prompt: String,
    pub model_info: ModelInfo,
    pub chain_of_thought: Vec<ThoughtStep>,
    pub execution_log: Vec<ExecutionEvent>,
    pub metrics: Metrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
}

impl AgentInternals {
    /// Build a snapshot from the request's log and the active config.
    pub fn from_snapshot(snapshot: &LogSnapshot, config: &AgentConfig) -> Self {
        let tools = builtin_tool_specs()
            .iter()
            .map(|spec| ToolInfo {
                name: spec.name.to_string(),
                description: spec.description.to_string(),
                parameters: spec.parameters_json(),
                call_count: snapshot
                    .tool_call_counts
                    .get(spec.name)
                    .copied()
                    .unwrap_or(0),
            })
            .collect();

        let chain_of_thought: Vec<ThoughtStep> = snapshot
            .events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::ReasoningStep {
                    description,
                    reasoning_text,
                    timestamp,
                } => Some(ThoughtStep {
                    description: description.clone(),
                    timestamp: *timestamp,
                    reasoning: reasoning_text.clone(),
                }),
                _ => None,
            })
            .collect();

        let metrics = Metrics {
            tool_calls: snapshot.tool_call_counts.values().sum(),
            thinking_steps: chain_of_thought.len(),
            execution_time: None,
            total_tokens: None,
        };

        Self {
            tools,
            system_prompt: config.system_prompt.clone(),
            model_info: ModelInfo {
                model_id: config.model_id.clone(),
                agent_endpoint: config.agent_endpoint.clone(),
                query_service_url: config.query_service_url.clone(),
                max_tokens: config.max_tokens,
            },
            chain_of_thought,
            execution_log: snapshot.events.clone(),
            metrics,
            streaming: None,
        }
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = Some(streaming);
        self
    }

    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.metrics.execution_time = Some((seconds * 100.0).round() / 100.0);
        self
    }

    pub fn with_total_tokens(mut self, tokens: usize) -> Self {
        self.metrics.total_tokens = Some(tokens);
        self
    }
}
