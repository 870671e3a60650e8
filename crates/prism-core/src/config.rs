//! Agent configuration.
//!
//! Loaded from the environment at startup and updatable at runtime through
//! the server's config endpoints. Nothing here is persisted.

use serde::{Deserialize, Serialize};

/// Default instructions for the performance-analyst agent.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a system performance analyst working against a ClickHouse metrics \
warehouse. Answer questions about CPU, memory, disk I/O, and network \
activity using the data in the warehouse, and write SELECT queries to \
extract what you need. Explore the schema before assuming table layouts. \
Do not make up information; if the data does not support an answer, say so.

Available tools:
- list_databases: list available databases
- list_tables: list tables in a database, including schema and row counts
- run_select_query: run a SELECT query";

/// Runtime configuration for the agent and its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model identifier reported in responses.
    pub model_id: String,
    /// Base URL of the agent engine; `None` disables the chat API.
    pub agent_endpoint: Option<String>,
    /// Base URL of the query service the tools talk to.
    pub query_service_url: String,
    /// System prompt handed to the agent engine.
    pub system_prompt: String,
    /// Output token ceiling reported in model info.
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model_id: "prism-analyst".to_string(),
            agent_endpoint: None,
            query_service_url: "http://127.0.0.1:7070".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 64000,
        }
    }
}

impl AgentConfig {
    /// Build a config from `PRISM_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model_id: std::env::var("PRISM_MODEL_ID").unwrap_or(defaults.model_id),
            agent_endpoint: std::env::var("PRISM_AGENT_ENDPOINT").ok(),
            query_service_url: std::env::var("PRISM_QUERY_SERVICE_URL")
                .unwrap_or(defaults.query_service_url),
            system_prompt: std::env::var("PRISM_SYSTEM_PROMPT").unwrap_or(defaults.system_prompt),
            max_tokens: defaults.max_tokens,
        }
    }

    /// Copy of this config with the system prompt replaced, used when a
    /// model record carries a prompt override.
    pub fn with_system_prompt(&self, system_prompt: Option<String>) -> Self {
        let mut config = self.clone();
        if let Some(prompt) = system_prompt {
            config.system_prompt = prompt;
        }
        config
    }
}
