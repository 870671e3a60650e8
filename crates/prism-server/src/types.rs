//! Wire types for the chat completion API.
//!
//! The completion shapes follow the OpenAI chat format so existing chat
//! frontends can consume the stream unchanged. Internals payloads ride
//! along under the `strands_internals` delta key that deployed clients
//! already look for.

use axum::response::sse::Event;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status payloads use this stage marker so clients can route them to the
/// progress indicator.
const STATUS_STAGE: &str = "strands_thinking";

/// Delta key carrying internals snapshots.
pub const INTERNALS_KEY: &str = "strands_internals";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub include_internals: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

fn default_stream() -> bool {
    true
}

impl ChatRequest {
    /// The question to answer: content of the most recent user message.
    pub fn user_question(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == "user" && !message.content.trim().is_empty())
            .map(|message| message.content.as_str())
    }

    /// Full conversation transcript handed to the agent, history included.
    pub fn conversation_context(&self) -> String {
        self.messages
            .iter()
            .map(|message| format!("{}: {}", message.role.to_uppercase(), message.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Progress message sent ahead of the final answer.
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub action: String,
    pub description: String,
    pub done: bool,
    pub timestamp: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl StatusPayload {
    pub fn new(description: impl Into<String>, done: bool) -> Self {
        Self {
            action: STATUS_STAGE.to_string(),
            description: description.into(),
            done,
            timestamp: Utc::now().to_rfc3339(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Replace the payload timestamp, used when relaying a recorded event
    /// whose own timestamp should win.
    pub fn with_timestamp(mut self, timestamp: String) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "strands_internals", skip_serializing_if = "Option::is_none")]
    pub internals: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkChoice {
    pub index: usize,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

/// One streamed piece of the response.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(rename = "strands_internals", skip_serializing_if = "Option::is_none")]
    pub internals: Option<Value>,
}

impl CompletionChunk {
    fn base(id: &str, created: i64, model: &str, delta: Delta, finish_reason: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            internals: None,
        }
    }

    /// Answer content piece. The first piece also carries the role marker.
    pub fn content(id: &str, created: i64, model: &str, text: &str, first: bool) -> Self {
        Self::base(
            id,
            created,
            model,
            Delta {
                role: first.then(|| "assistant".to_string()),
                content: Some(text.to_string()),
                internals: None,
            },
            None,
        )
    }

    /// Internals snapshot piece, duplicated at the top level for clients
    /// that read it there.
    pub fn internals(id: &str, created: i64, model: &str, internals: Value) -> Self {
        let mut chunk = Self::base(
            id,
            created,
            model,
            Delta {
                internals: Some(internals.clone()),
                ..Delta::default()
            },
            None,
        );
        chunk.internals = Some(internals);
        chunk
    }

    /// Error surfaced as content, closing the choice.
    pub fn error(id: &str, created: i64, model: &str, message: &str) -> Self {
        Self::base(
            id,
            created,
            model,
            Delta {
                content: Some(format!("\n\nError: {message}")),
                ..Delta::default()
            },
            Some("stop".to_string()),
        )
    }

    /// Empty closing piece with the finish reason.
    pub fn finish(id: &str, created: i64, model: &str) -> Self {
        Self::base(id, created, model, Delta::default(), Some("stop".to_string()))
    }
}

/// One frame of the response stream, before SSE encoding.
///
/// Kept separate from [`Event`] so the streaming logic can be tested
/// against structured frames instead of re-parsing wire text.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    Status(StatusPayload),
    Chunk(CompletionChunk),
    Done,
}

impl StreamFrame {
    pub fn into_sse_event(self) -> Event {
        match self {
            StreamFrame::Status(payload) => Event::default()
                .json_data(serde_json::json!({ "type": "status", "data": payload }))
                .unwrap_or_else(|_| Event::default().data("error")),
            StreamFrame::Chunk(chunk) => Event::default()
                .json_data(&chunk)
                .unwrap_or_else(|_| Event::default().data("error")),
            StreamFrame::Done => Event::default().data("[DONE]"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
    #[serde(rename = "strands_internals", skip_serializing_if = "Option::is_none")]
    pub internals: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageChoice {
    pub index: usize,
    pub message: AssistantMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    /// Whitespace-token approximation, not a real tokenizer count.
    pub fn from_texts(prompt: &str, completion: &str) -> Self {
        let prompt_tokens = whitespace_tokens(prompt);
        let completion_tokens = whitespace_tokens(completion);
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

pub fn whitespace_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Non-streaming completion response.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<MessageChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(rename = "strands_internals", skip_serializing_if = "Option::is_none")]
    pub internals: Option<Value>,
}

impl ChatResponse {
    pub fn new(
        id: &str,
        created: i64,
        model: &str,
        content: String,
        usage: Option<Usage>,
        internals: Option<Value>,
    ) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion".to_string(),
            created,
            model: model.to_string(),
            choices: vec![MessageChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content,
                    internals: internals.clone(),
                },
                finish_reason: "stop".to_string(),
            }],
            usage,
            internals,
        }
    }

    /// Bare assistant message with no usage or internals.
    pub fn text(id: &str, created: i64, model: &str, content: impl Into<String>) -> Self {
        Self::new(id, created, model, content.into(), None, None)
    }
}
