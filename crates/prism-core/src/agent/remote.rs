//! HTTP wrapper for a sidecar agent engine.
//!
//! The engine only reasons; the tools run here. Each `/invoke` round trip
//! carries the conversation, the tool catalog, and the outcomes gathered so
//! far; the engine replies with either a final answer or a batch of tool
//! calls to execute. Requested tools are dispatched through the request's
//! instrumented [`Toolbox`], so every invocation lands in the execution log
//! and reaches stream listeners while the call is still in flight.
//! Transcript lines are replayed through [`OutputCapture`] so reasoning
//! mining works the same as for an in-process engine.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capture::OutputCapture;
use crate::execution::ExecutionContext;

use super::tools::{builtin_tool_specs, Toolbox};
use super::AgentInvoker;

/// Agent calls can run for tens of seconds; allow for long tool chains.
const INVOKE_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound on engine round trips for a single request.
const MAX_TOOL_ROUNDS: usize = 50;

pub struct RemoteAgent {
    endpoint: String,
    system_prompt: String,
    toolbox: Arc<Toolbox>,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    system_prompt: &'a str,
    prompt: &'a str,
    tools: Vec<Value>,
    tool_results: &'a [ToolOutcome],
}

/// Outcome of one executed tool call, echoed back to the engine.
#[derive(Serialize)]
struct ToolOutcome {
    tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    tool_calls: Vec<EngineToolCall>,
    #[serde(default)]
    transcript: Vec<String>,
}

#[derive(Deserialize)]
struct EngineToolCall {
    name: String,
    #[serde(default)]
    args: Value,
}

impl RemoteAgent {
    pub fn new(
        endpoint: impl Into<String>,
        system_prompt: impl Into<String>,
        toolbox: Arc<Toolbox>,
    ) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(INVOKE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            system_prompt: system_prompt.into(),
            toolbox,
            client,
        }
    }

    fn exchange(&self, prompt: &str, tool_results: &[ToolOutcome]) -> anyhow::Result<InvokeResponse> {
        let tools = builtin_tool_specs()
            .iter()
            .map(|spec| {
                serde_json::json!({
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": spec.parameters_json(),
                })
            })
            .collect();

        let response = self
            .client
            .post(format!("{}/invoke", self.endpoint))
            .json(&InvokeRequest {
                system_prompt: &self.system_prompt,
                prompt,
                tools,
                tool_results,
            })
            .send()?
            .error_for_status()?
            .json()?;
        Ok(response)
    }
}

impl AgentInvoker for RemoteAgent {
    fn run(
        &self,
        conversation: &str,
        ctx: &ExecutionContext,
        output: &mut OutputCapture,
    ) -> anyhow::Result<String> {
        tracing::info!(endpoint = %self.endpoint, chars = conversation.len(), "Invoking agent engine");
        drive_engine(
            |results| self.exchange(conversation, results),
            &self.toolbox,
            ctx,
            output,
        )
    }
}

/// Run the engine's request/tool loop to completion.
///
/// Each round the engine either answers or requests tool calls. Requested
/// tools run through the instrumented toolbox, and their outcomes
/// accumulate in the next round's request. Failed tool calls are reported
/// back to the engine rather than aborting the run.
fn drive_engine<F>(
    mut exchange: F,
    toolbox: &Toolbox,
    ctx: &ExecutionContext,
    output: &mut OutputCapture,
) -> anyhow::Result<String>
where
    F: FnMut(&[ToolOutcome]) -> anyhow::Result<InvokeResponse>,
{
    let mut tool_results: Vec<ToolOutcome> = Vec::new();
    for _ in 0..MAX_TOOL_ROUNDS {
        let response = exchange(&tool_results)?;

        for line in &response.transcript {
            output.write(line);
            output.write("\n");
        }

        if response.tool_calls.is_empty() {
            return response
                .answer
                .ok_or_else(|| anyhow::anyhow!("engine returned neither an answer nor tool calls"));
        }

        for call in response.tool_calls {
            let outcome = match toolbox.dispatch(ctx, &call.name, &call.args) {
                Ok(value) => ToolOutcome {
                    tool_name: call.name,
                    result: Some(value),
                    error: None,
                },
                Err(error) => ToolOutcome {
                    tool_name: call.name,
                    result: None,
                    error: Some(error.to_string()),
                },
            };
            tool_results.push(outcome);
        }
    }

    anyhow::bail!("engine exceeded {MAX_TOOL_ROUNDS} tool rounds without answering")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ListenerRegistry;
    use crate::query::QueryServiceClient;
    use serde_json::json;

    fn context() -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new(Arc::new(ListenerRegistry::new())))
    }

    fn toolbox() -> Toolbox {
        Toolbox::new(QueryServiceClient::new("http://127.0.0.1:1"))
    }

    #[test]
    fn engine_tool_requests_are_executed_recorded_and_fed_back() {
        let ctx = context();
        let toolbox = toolbox();
        let mut capture = OutputCapture::new(Arc::clone(&ctx));

        let mut round = 0;
        let answer = drive_engine(
            |results| {
                round += 1;
                if round == 1 {
                    assert!(results.is_empty());
                    Ok(InvokeResponse {
                        answer: None,
                        tool_calls: vec![EngineToolCall {
                            name: "list_databases".to_string(),
                            args: json!({}),
                        }],
                        transcript: vec!["Let me check the available databases".to_string()],
                    })
                } else {
                    // The query service is unreachable in this test, so the
                    // outcome carries the error back to the engine.
                    assert_eq!(results.len(), 1);
                    assert_eq!(results[0].tool_name, "list_databases");
                    assert!(results[0].error.is_some());
                    Ok(InvokeResponse {
                        answer: Some("No databases reachable.".to_string()),
                        tool_calls: vec![],
                        transcript: vec![],
                    })
                }
            },
            &toolbox,
            &ctx,
            &mut capture,
        )
        .expect("loop should complete");
        capture.flush();

        assert_eq!(answer, "No databases reachable.");
        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.tool_call_counts["list_databases"], 1);
        let kinds: Vec<_> = snapshot.events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["reasoning_step", "tool_call", "tool_result"]);
    }

    #[test]
    fn an_engine_that_never_answers_exhausts_the_round_budget() {
        let ctx = context();
        let toolbox = toolbox();
        let mut capture = OutputCapture::new(Arc::clone(&ctx));

        let result = drive_engine(
            |_results| {
                Ok(InvokeResponse {
                    answer: None,
                    tool_calls: vec![EngineToolCall {
                        name: "not_a_tool".to_string(),
                        args: Value::Null,
                    }],
                    transcript: vec![],
                })
            },
            &toolbox,
            &ctx,
            &mut capture,
        );

        let error = result.expect_err("loop must stop").to_string();
        assert!(error.contains("tool rounds"), "unexpected error: {error}");
        assert_eq!(ctx.snapshot().tool_call_counts["not_a_tool"], MAX_TOOL_ROUNDS as u32);
    }

    #[test]
    fn an_empty_engine_reply_is_an_error() {
        let ctx = context();
        let toolbox = toolbox();
        let mut capture = OutputCapture::new(Arc::clone(&ctx));

        let result = drive_engine(
            |_results| {
                Ok(InvokeResponse {
                    answer: None,
                    tool_calls: vec![],
                    transcript: vec![],
                })
            },
            &toolbox,
            &ctx,
            &mut capture,
        );
        assert!(result.is_err());
    }
}
