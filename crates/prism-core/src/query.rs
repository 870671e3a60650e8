//! Thin client for the query service.
//!
//! A blocking request/response wrapper around the service's HTTP endpoints,
//! called from the agent worker thread. The service sometimes returns a
//! bare JSON list instead of the documented object shape, so each method
//! normalizes list responses into the object form callers expect.

use std::time::Duration;

use serde_json::{json, Value};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("query service error: {0}")]
    Service(String),
}

/// HTTP client for the query service.
pub struct QueryServiceClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl QueryServiceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List available databases.
    pub fn list_databases(&self) -> Result<Value, QueryError> {
        let result = self.post("list_databases", None)?;
        Ok(normalize(result, "databases"))
    }

    /// List tables in a database, with optional LIKE / NOT LIKE filters.
    pub fn list_tables(
        &self,
        database: &str,
        like: Option<&str>,
        not_like: Option<&str>,
    ) -> Result<Value, QueryError> {
        let mut payload = json!({ "database": database });
        if let Some(like) = like {
            payload["like"] = json!(like);
        }
        if let Some(not_like) = not_like {
            payload["not_like"] = json!(not_like);
        }
        let result = self.post("list_tables", Some(payload))?;
        Ok(normalize(result, "tables"))
    }

    /// Run a SELECT query.
    pub fn run_select_query(&self, query: &str) -> Result<Value, QueryError> {
        let result = self.post("run_select_query", Some(json!({ "query": query })))?;
        if result.is_array() {
            // Bare rows; wrap in the expected shape.
            return Ok(json!({ "rows": result, "columns": [] }));
        }
        Ok(result)
    }

    fn post(&self, endpoint: &str, payload: Option<Value>) -> Result<Value, QueryError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut request = self.client.post(&url);
        if let Some(payload) = &payload {
            request = request.json(payload);
        }
        let value: Value = request.send()?.error_for_status()?.json()?;

        if let Some(error) = value.get("error").and_then(Value::as_str) {
            return Err(QueryError::Service(error.to_string()));
        }
        Ok(value)
    }
}

/// Wrap a bare list response under the given key.
fn normalize(value: Value, key: &str) -> Value {
    if value.is_array() {
        tracing::debug!(key, "Normalized list response from query service");
        return json!({ key: value });
    }
    value
}
