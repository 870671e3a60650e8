//! Instrumented tool wrappers.
//!
//! Each tool records a `tool_call` event before and a `tool_result` event
//! after its external side effect, then re-raises any error to the agent so
//! it can decide how to recover. The wrappers never retry.

use serde_json::{json, Value};

use crate::execution::ExecutionContext;
use crate::query::{QueryError, QueryServiceClient};

/// Failure modes for an engine-requested tool dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("{tool}: {message}")]
    BadArgs { tool: String, message: String },
}

/// Static description of a tool, surfaced in the internals snapshot.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Parameter name → type, mirroring the tool signature.
    pub parameters: &'static [(&'static str, &'static str)],
}

impl ToolSpec {
    pub fn parameters_json(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .parameters
            .iter()
            .map(|(name, ty)| ((*name).to_string(), json!(ty)))
            .collect();
        Value::Object(map)
    }
}

/// The tools available to the agent.
pub fn builtin_tool_specs() -> &'static [ToolSpec] {
    &[
        ToolSpec {
            name: "list_databases",
            description: "List available databases",
            parameters: &[],
        },
        ToolSpec {
            name: "list_tables",
            description: "List tables in a database, including schema, comment, row count, and column count",
            parameters: &[("database", "str"), ("like", "Option<str>"), ("not_like", "Option<str>")],
        },
        ToolSpec {
            name: "run_select_query",
            description: "Run a SELECT query against the metrics warehouse",
            parameters: &[("query", "str")],
        },
    ]
}

/// Query tools bound to a [`QueryServiceClient`], instrumented through the
/// request's [`ExecutionContext`].
pub struct Toolbox {
    client: QueryServiceClient,
}

impl Toolbox {
    pub fn new(client: QueryServiceClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &QueryServiceClient {
        &self.client
    }

    pub fn list_databases(&self, ctx: &ExecutionContext) -> Result<Value, QueryError> {
        self.instrumented(ctx, "list_databases", json!({}), || {
            self.client.list_databases()
        })
    }

    pub fn list_tables(
        &self,
        ctx: &ExecutionContext,
        database: &str,
        like: Option<&str>,
        not_like: Option<&str>,
    ) -> Result<Value, QueryError> {
        let args = json!({ "database": database, "like": like, "not_like": not_like });
        self.instrumented(ctx, "list_tables", args, || {
            self.client.list_tables(database, like, not_like)
        })
    }

    pub fn run_select_query(&self, ctx: &ExecutionContext, query: &str) -> Result<Value, QueryError> {
        // Only a preview of the query goes into the tool args; the full text
        // is carried by the query_issued event.
        let preview: String = query.chars().take(100).collect();
        ctx.record_query(query);
        self.instrumented(ctx, "run_select_query", json!({ "query": preview }), || {
            self.client.run_select_query(query)
        })
    }

    /// Execute a tool the engine asked for by name, with JSON args.
    ///
    /// Rejected dispatches (unknown tool, missing argument) are still
    /// recorded as a failed call so the stream shows what the engine
    /// attempted.
    pub fn dispatch(
        &self,
        ctx: &ExecutionContext,
        name: &str,
        args: &Value,
    ) -> Result<Value, ToolError> {
        match name {
            "list_databases" => Ok(self.list_databases(ctx)?),
            "list_tables" => {
                let Some(database) = args.get("database").and_then(Value::as_str) else {
                    return Err(self.reject(ctx, name, args, "database parameter is required"));
                };
                let like = args.get("like").and_then(Value::as_str);
                let not_like = args.get("not_like").and_then(Value::as_str);
                Ok(self.list_tables(ctx, database, like, not_like)?)
            }
            "run_select_query" => {
                let Some(query) = args.get("query").and_then(Value::as_str) else {
                    return Err(self.reject(ctx, name, args, "query parameter is required"));
                };
                Ok(self.run_select_query(ctx, query)?)
            }
            other => {
                ctx.record_tool_call(other, args.clone());
                let message = format!("unknown tool: {other}");
                ctx.record_tool_result(other, Some(&message));
                Err(ToolError::UnknownTool(other.to_string()))
            }
        }
    }

    fn reject(&self, ctx: &ExecutionContext, name: &str, args: &Value, message: &str) -> ToolError {
        ctx.record_tool_call(name, args.clone());
        ctx.record_tool_result(name, Some(message));
        ToolError::BadArgs {
            tool: name.to_string(),
            message: message.to_string(),
        }
    }

    fn instrumented<F>(
        &self,
        ctx: &ExecutionContext,
        name: &str,
        args: Value,
        call: F,
    ) -> Result<Value, QueryError>
    where
        F: FnOnce() -> Result<Value, QueryError>,
    {
        ctx.record_tool_call(name, args);
        match call() {
            Ok(result) => {
                ctx.record_tool_result(name, None);
                Ok(result)
            }
            Err(error) => {
                ctx.record_tool_result(name, Some(&error.to_string()));
                Err(error)
            }
        }
    }
}
