//! Chat completions with SSE progress streaming.
//!
//! The agent call is blocking and can run for tens of seconds, so it is
//! dispatched to a worker thread while this task polls the request's event
//! queue and forwards progress to the client. Once the worker finishes,
//! any events that raced with completion detection are drained, then the
//! answer is streamed in fixed-size pieces.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::{wrappers::ReceiverStream, StreamExt as _};

use prism_core::{
    run_captured, AgentConfig, AgentInternals, AgentInvoker, ExecutionContext, ExecutionEvent,
    RemoteAgent,
};

use crate::error::AppError;
use crate::types::{
    whitespace_tokens, ChatRequest, ChatResponse, CompletionChunk, StatusPayload, StreamFrame,
    Usage,
};
use crate::AppState;

/// Bound on the wait for the next execution event, so worker completion is
/// noticed promptly even when the agent goes quiet.
const EVENT_POLL_TIMEOUT: Duration = Duration::from_millis(200);
/// Characters per answer piece.
const ANSWER_CHUNK_SIZE: usize = 50;
/// Pacing delay between answer pieces for a typing-like cadence.
const ANSWER_CHUNK_DELAY: Duration = Duration::from_millis(50);
const SSE_CHANNEL_BUFFER: usize = 256;

pub fn router() -> Router<AppState> {
    Router::new().route("/completions", post(chat_completions))
}

/// Everything one request needs, detached from shared state so the
/// orchestrator keeps running if the client disconnects.
struct StreamJob {
    ctx: Arc<ExecutionContext>,
    invoker: Arc<dyn AgentInvoker>,
    conversation: String,
    question: String,
    request_id: String,
    model: String,
    created: i64,
    started_at: DateTime<Utc>,
    include_internals: bool,
    config: AgentConfig,
    last_internals: Arc<RwLock<Option<AgentInternals>>>,
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let started_at = Utc::now();
    let created = started_at.timestamp();
    let request_id = format!("prism-{created}");

    tracing::info!(
        request_id = %request_id,
        model = %req.model,
        messages = req.messages.len(),
        stream = req.stream,
        include_internals = req.include_internals,
        "New chat completion request"
    );

    let prompt_override = state.models.system_prompt_for(&req.model).await;
    let config = state
        .config
        .read()
        .await
        .with_system_prompt(prompt_override.clone());

    // A model-level prompt override needs its own invoker; otherwise reuse
    // the shared one.
    let invoker: Option<Arc<dyn AgentInvoker>> = if prompt_override.is_some() {
        let toolbox = Arc::clone(&*state.toolbox.read().await);
        config
            .agent_endpoint
            .as_ref()
            .map(|endpoint| {
                Arc::new(RemoteAgent::new(endpoint, &config.system_prompt, toolbox))
                    as Arc<dyn AgentInvoker>
            })
    } else {
        state.invoker.read().await.clone()
    };
    let invoker = invoker
        .ok_or_else(|| AppError::Internal("Agent engine not configured".to_string()))?;

    let Some(question) = req.user_question().map(str::to_string) else {
        tracing::warn!(request_id = %request_id, "No user content found in messages");
        return Ok(Json(ChatResponse::text(
            &request_id,
            created,
            &req.model,
            "No user content found.",
        ))
        .into_response());
    };

    let job = StreamJob {
        ctx: Arc::new(ExecutionContext::new(Arc::clone(&state.listeners))),
        invoker,
        conversation: req.conversation_context(),
        question,
        request_id,
        model: req.model.clone(),
        created,
        started_at,
        include_internals: req.include_internals,
        config,
        last_internals: Arc::clone(&state.last_internals),
    };

    if req.stream {
        let (tx, rx) = mpsc::channel(SSE_CHANNEL_BUFFER);
        tokio::spawn(run_chat_stream(job, tx));

        let stream = ReceiverStream::new(rx)
            .map(|frame: StreamFrame| Ok::<Event, Infallible>(frame.into_sse_event()));
        Ok(Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response())
    } else {
        Ok(Json(run_chat_blocking(job).await).into_response())
    }
}

/// Drive one streaming request end to end.
async fn run_chat_stream(job: StreamJob, tx: mpsc::Sender<StreamFrame>) {
    let (listener, mut rx) = job.ctx.subscribe();
    // Release the listener on every exit path, panics included.
    let _cleanup = scopeguard::guard(
        (Arc::clone(&job.ctx), listener),
        |(ctx, listener)| ctx.unsubscribe(listener),
    );

    send(
        &tx,
        StreamFrame::Status(StatusPayload::new("Initializing analysis agent...", true)),
    )
    .await;

    let worker = {
        let invoker = Arc::clone(&job.invoker);
        let conversation = job.conversation.clone();
        let ctx = Arc::clone(&job.ctx);
        tokio::task::spawn_blocking(move || run_captured(invoker.as_ref(), &conversation, &ctx))
    };

    send(
        &tx,
        StreamFrame::Status(StatusPayload::new(
            "Analyzing request with query tools...",
            true,
        )),
    )
    .await;

    if job.include_internals {
        send_internals(&tx, &job).await;
    }

    let mut event_count = 0usize;
    while !worker.is_finished() {
        match tokio::time::timeout(EVENT_POLL_TIMEOUT, rx.recv()).await {
            Ok(Some(event)) => {
                event_count += 1;
                if let Some(status) = format_execution_status(&event) {
                    send(&tx, StreamFrame::Status(status)).await;
                }
                if job.include_internals {
                    send_internals(&tx, &job).await;
                }
            }
            Ok(None) => break,
            Err(_) => continue,
        }
    }

    // Events can land between the last poll and completion detection;
    // drain them so nothing recorded goes unreported.
    while let Ok(event) = rx.try_recv() {
        event_count += 1;
        if let Some(status) = format_execution_status(&event) {
            send(&tx, StreamFrame::Status(status)).await;
        }
    }
    tracing::debug!(request_id = %job.request_id, events = event_count, "Agent task completed");

    let answer = match worker.await {
        Ok(Ok(answer)) => answer,
        Ok(Err(e)) => return fail(&tx, &job, &format!("{e:#}")).await,
        Err(e) => return fail(&tx, &job, &format!("agent task failed: {e}")).await,
    };

    send(
        &tx,
        StreamFrame::Status(StatusPayload::new("Generating final response...", false)),
    )
    .await;

    let chars: Vec<char> = answer.chars().collect();
    for (index, piece) in chars.chunks(ANSWER_CHUNK_SIZE).enumerate() {
        let text: String = piece.iter().collect();
        send(
            &tx,
            StreamFrame::Chunk(CompletionChunk::content(
                &job.request_id,
                job.created,
                &job.model,
                &text,
                index == 0,
            )),
        )
        .await;
        tokio::time::sleep(ANSWER_CHUNK_DELAY).await;
    }

    let elapsed = elapsed_seconds(job.started_at);
    let internals = AgentInternals::from_snapshot(&job.ctx.snapshot(), &job.config)
        .with_execution_time(elapsed);
    if job.include_internals {
        match serde_json::to_value(internals.clone().with_streaming(false)) {
            Ok(value) => {
                send(
                    &tx,
                    StreamFrame::Chunk(CompletionChunk::internals(
                        &job.request_id,
                        job.created,
                        &job.model,
                        value,
                    )),
                )
                .await;
            }
            Err(e) => tracing::error!("Failed to serialize internals: {}", e),
        }
    }
    *job.last_internals.write().await = Some(internals);

    send(
        &tx,
        StreamFrame::Chunk(CompletionChunk::finish(
            &job.request_id,
            job.created,
            &job.model,
        )),
    )
    .await;
    send(
        &tx,
        StreamFrame::Status(StatusPayload::new("Analysis complete", true)),
    )
    .await;
    send(&tx, StreamFrame::Done).await;

    tracing::info!(request_id = %job.request_id, seconds = elapsed, "Streaming completed");
}

/// Non-streaming path: await the worker, return one assembled response.
async fn run_chat_blocking(job: StreamJob) -> ChatResponse {
    let worker = {
        let invoker = Arc::clone(&job.invoker);
        let conversation = job.conversation.clone();
        let ctx = Arc::clone(&job.ctx);
        tokio::task::spawn_blocking(move || run_captured(invoker.as_ref(), &conversation, &ctx))
    };

    let answer = match worker.await {
        Ok(Ok(answer)) => answer,
        Ok(Err(e)) => {
            tracing::error!(request_id = %job.request_id, "Error processing request: {e:#}");
            return ChatResponse::text(
                &job.request_id,
                job.created,
                &job.model,
                format!("Error processing request: {e}"),
            );
        }
        Err(e) => {
            tracing::error!(request_id = %job.request_id, "Agent task failed: {e}");
            return ChatResponse::text(
                &job.request_id,
                job.created,
                &job.model,
                format!("Error processing request: {e}"),
            );
        }
    };

    let elapsed = elapsed_seconds(job.started_at);
    let internals = AgentInternals::from_snapshot(&job.ctx.snapshot(), &job.config)
        .with_execution_time(elapsed)
        .with_total_tokens(whitespace_tokens(&job.question) + whitespace_tokens(&answer));
    *job.last_internals.write().await = Some(internals.clone());

    let usage = Usage::from_texts(&job.conversation, &answer);
    tracing::info!(
        request_id = %job.request_id,
        seconds = elapsed,
        tokens = usage.total_tokens,
        "Request completed"
    );

    let internals_value = serde_json::to_value(&internals).ok();
    ChatResponse::new(
        &job.request_id,
        job.created,
        &job.model,
        answer,
        Some(usage),
        internals_value,
    )
}

/// Translate a recorded event into a progress status, if it has one.
fn format_execution_status(event: &ExecutionEvent) -> Option<StatusPayload> {
    match event {
        ExecutionEvent::ToolCall {
            tool_name,
            call_number,
            timestamp,
            ..
        } => Some(
            StatusPayload::new(
                format!("Running tool '{tool_name}' (attempt {call_number})"),
                false,
            )
            .with_timestamp(timestamp.to_rfc3339())
            .with_extra("tool_name", json!(tool_name))
            .with_extra("call_number", json!(call_number)),
        ),
        ExecutionEvent::ToolResult {
            tool_name,
            success,
            error,
            timestamp,
        } => {
            let description = if *success {
                format!("Tool '{tool_name}' completed successfully")
            } else {
                format!("Tool '{tool_name}' failed")
            };
            Some(
                StatusPayload::new(description, true)
                    .with_timestamp(timestamp.to_rfc3339())
                    .with_extra("tool_name", json!(tool_name))
                    .with_extra("success", json!(success))
                    .with_extra("error", json!(error)),
            )
        }
        _ => None,
    }
}

async fn send_internals(tx: &mpsc::Sender<StreamFrame>, job: &StreamJob) {
    let internals =
        AgentInternals::from_snapshot(&job.ctx.snapshot(), &job.config).with_streaming(true);
    match serde_json::to_value(&internals) {
        Ok(value) => {
            send(
                tx,
                StreamFrame::Chunk(CompletionChunk::internals(
                    &job.request_id,
                    job.created,
                    &job.model,
                    value,
                )),
            )
            .await;
        }
        Err(e) => tracing::error!("Failed to serialize internals: {}", e),
    }
}

/// Error path: one error status, one error content chunk, the sentinel.
async fn fail(tx: &mpsc::Sender<StreamFrame>, job: &StreamJob, message: &str) {
    tracing::error!(request_id = %job.request_id, "Streaming error: {message}");
    send(
        tx,
        StreamFrame::Status(
            StatusPayload::new(format!("Agent encountered an error: {message}"), true)
                .with_extra("error", json!(message)),
        ),
    )
    .await;
    send(
        tx,
        StreamFrame::Chunk(CompletionChunk::error(
            &job.request_id,
            job.created,
            &job.model,
            message,
        )),
    )
    .await;
    send(tx, StreamFrame::Done).await;
}

/// A closed receiver just means the client went away; the worker still
/// runs to completion and its log is kept.
async fn send(tx: &mpsc::Sender<StreamFrame>, frame: StreamFrame) -> bool {
    tx.send(frame).await.is_ok()
}

fn elapsed_seconds(started_at: DateTime<Utc>) -> f64 {
    (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::{ListenerRegistry, OutputCapture};
    use serde_json::Value;

    struct ScriptedAgent {
        tools: Vec<&'static str>,
        answer: String,
    }

    impl AgentInvoker for ScriptedAgent {
        fn run(
            &self,
            _conversation: &str,
            ctx: &ExecutionContext,
            _output: &mut OutputCapture,
        ) -> anyhow::Result<String> {
            for name in &self.tools {
                ctx.record_tool_call(name, json!({}));
                ctx.record_tool_result(name, None);
            }
            Ok(self.answer.clone())
        }
    }

    struct FailingAgent;

    impl AgentInvoker for FailingAgent {
        fn run(
            &self,
            _conversation: &str,
            _ctx: &ExecutionContext,
            _output: &mut OutputCapture,
        ) -> anyhow::Result<String> {
            anyhow::bail!("engine exploded")
        }
    }

    fn job(invoker: Arc<dyn AgentInvoker>, include_internals: bool) -> StreamJob {
        StreamJob {
            ctx: Arc::new(ExecutionContext::new(Arc::new(ListenerRegistry::new()))),
            invoker,
            conversation: "USER: how busy is the cluster?".to_string(),
            question: "how busy is the cluster?".to_string(),
            request_id: "prism-test".to_string(),
            model: "prism-analyst".to_string(),
            created: 0,
            started_at: Utc::now(),
            include_internals,
            config: AgentConfig::default(),
            last_internals: Arc::new(RwLock::new(None)),
        }
    }

    async fn collect_frames(job: StreamJob) -> Vec<StreamFrame> {
        let (tx, mut rx) = mpsc::channel(SSE_CHANNEL_BUFFER);
        let handle = tokio::spawn(run_chat_stream(job, tx));
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        handle.await.expect("stream task should not panic");
        frames
    }

    fn content_pieces(frames: &[StreamFrame]) -> Vec<&str> {
        frames
            .iter()
            .filter_map(|frame| match frame {
                StreamFrame::Chunk(chunk) => chunk.choices[0].delta.content.as_deref(),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn tool_statuses_precede_answer_content_and_done_is_last() {
        let invoker = Arc::new(ScriptedAgent {
            tools: vec!["alpha", "beta", "alpha"],
            answer: "done".to_string(),
        });
        let frames = collect_frames(job(invoker, false)).await;

        let running: Vec<String> = frames
            .iter()
            .filter_map(|frame| match frame {
                StreamFrame::Status(status) if status.description.starts_with("Running tool") => {
                    Some(status.description.clone())
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            running,
            vec![
                "Running tool 'alpha' (attempt 1)",
                "Running tool 'beta' (attempt 1)",
                "Running tool 'alpha' (attempt 2)",
            ]
        );

        let first_content = frames
            .iter()
            .position(|frame| {
                matches!(frame, StreamFrame::Chunk(chunk) if chunk.choices[0].delta.content.is_some())
            })
            .expect("answer content should be streamed");
        let last_running = frames
            .iter()
            .rposition(|frame| {
                matches!(frame, StreamFrame::Status(status) if status.description.starts_with("Running tool"))
            })
            .expect("tool statuses should be streamed");
        assert!(last_running < first_content);
        assert!(matches!(frames.last(), Some(StreamFrame::Done)));
    }

    #[tokio::test]
    async fn failing_agent_yields_error_status_error_chunk_and_done() {
        let j = job(Arc::new(FailingAgent), false);
        let ctx = Arc::clone(&j.ctx);
        let frames = collect_frames(j).await;

        assert!(frames.iter().any(|frame| matches!(
            frame,
            StreamFrame::Status(status)
                if status.done && status.description.contains("engine exploded")
        )));

        let error_chunk = frames
            .iter()
            .find_map(|frame| match frame {
                StreamFrame::Chunk(chunk) => Some(chunk),
                _ => None,
            })
            .expect("error chunk should be streamed");
        let content = error_chunk.choices[0]
            .delta
            .content
            .as_deref()
            .expect("error chunk carries content");
        assert!(content.contains("engine exploded"));
        assert_eq!(error_chunk.choices[0].finish_reason.as_deref(), Some("stop"));

        assert!(matches!(frames.last(), Some(StreamFrame::Done)));
        assert_eq!(ctx.listener_count(), 0);
    }

    #[tokio::test]
    async fn answer_pieces_reassemble_exactly() {
        let answer = format!("{}tail", "abcdefghij".repeat(12));
        let invoker = Arc::new(ScriptedAgent {
            tools: vec![],
            answer: answer.clone(),
        });
        let frames = collect_frames(job(invoker, false)).await;

        let pieces = content_pieces(&frames);
        assert_eq!(pieces.len(), answer.len().div_ceil(ANSWER_CHUNK_SIZE));
        assert_eq!(pieces.concat(), answer);

        let roles: Vec<bool> = frames
            .iter()
            .filter_map(|frame| match frame {
                StreamFrame::Chunk(chunk) if chunk.choices[0].delta.content.is_some() => {
                    Some(chunk.choices[0].delta.role.is_some())
                }
                _ => None,
            })
            .collect();
        assert!(roles[0]);
        assert!(roles[1..].iter().all(|has_role| !has_role));
    }

    #[tokio::test]
    async fn internals_chunks_bracket_the_stream_when_requested() {
        let invoker = Arc::new(ScriptedAgent {
            tools: vec!["alpha"],
            answer: "done".to_string(),
        });
        let j = job(invoker, true);
        let last_internals = Arc::clone(&j.last_internals);
        let frames = collect_frames(j).await;

        let internals: Vec<&Value> = frames
            .iter()
            .filter_map(|frame| match frame {
                StreamFrame::Chunk(chunk) => chunk.choices[0].delta.internals.as_ref(),
                _ => None,
            })
            .collect();
        assert!(internals.len() >= 2);
        assert_eq!(internals.first().expect("initial internals")["streaming"], true);
        assert_eq!(internals.last().expect("final internals")["streaming"], false);
        assert!(last_internals.read().await.is_some());
    }

    #[tokio::test]
    async fn blocking_mode_reports_whitespace_token_usage() {
        let invoker = Arc::new(ScriptedAgent {
            tools: vec!["alpha"],
            answer: "all systems nominal".to_string(),
        });
        let response = run_chat_blocking(job(invoker, false)).await;

        let usage = response.usage.expect("usage should be reported");
        assert_eq!(usage.prompt_tokens, 6);
        assert_eq!(usage.completion_tokens, 3);
        assert_eq!(usage.total_tokens, 9);
        assert_eq!(response.choices[0].message.content, "all systems nominal");

        let internals = response.internals.expect("internals should be attached");
        assert_eq!(internals["metrics"]["tool_calls"], 1);
        assert_eq!(internals["metrics"]["total_tokens"], 8);
    }

    #[tokio::test]
    async fn blocking_mode_embeds_agent_failure_in_the_message() {
        let response = run_chat_blocking(job(Arc::new(FailingAgent), false)).await;
        let content = &response.choices[0].message.content;
        assert!(content.starts_with("Error processing request:"));
        assert!(content.contains("engine exploded"));
        assert!(response.usage.is_none());
    }
}
