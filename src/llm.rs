//! OpenAI-compatible chat completion client.
//!
//! Replies are consumed as a stream of text fragments decoded from the
//! server-sent events body. The stream ends at `data: [DONE]` or when the
//! body closes and cannot be restarted.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::debug;

use crate::config::LlmConfig;

pub type FragmentStream = BoxStream<'static, Result<String, LlmError>>;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("completion API error {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed stream event: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Backend that answers a message history with a streamed reply.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn stream_reply(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, LlmError>;
}

/// Drains a reply stream into a single string.
pub async fn collect_reply(mut fragments: FragmentStream) -> Result<String, LlmError> {
    let mut content = String::new();
    while let Some(fragment) = fragments.next().await {
        content.push_str(&fragment?);
    }
    Ok(content)
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Incremental decoder for `text/event-stream` completion bodies.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Feeds raw body bytes, returning every complete text fragment.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, LlmError> {
        let mut fragments = Vec::new();
        if self.done {
            return Ok(fragments);
        }

        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(payload) = line.strip_prefix("data:") else {
                continue;
            };
            let payload = payload.trim();

            if payload == "[DONE]" {
                self.finish();
                break;
            }
            if payload.is_empty() {
                continue;
            }

            let chunk: StreamChunk = serde_json::from_str(payload)?;
            fragments.extend(
                chunk
                    .choices
                    .into_iter()
                    .filter_map(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty()),
            );
        }

        Ok(fragments)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn finish(&mut self) {
        self.done = true;
        self.buffer.clear();
    }
}

struct StreamState {
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(http: reqwest::Client, config: LlmConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn stream_reply(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, LlmError> {
        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: &messages,
            stream: true,
        };

        let mut req = self.http.post(&url).json(&request);

        // Local backends run without a key
        if !self.config.api_key.is_empty() {
            req = req.bearer_auth(&self.config.api_key);
        }

        debug!("Requesting completion for {} messages", messages.len());
        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let state = StreamState {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
        };

        let fragments = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(fragment) = state.pending.pop_front() {
                    return Some((Ok(fragment), state));
                }
                if state.decoder.is_done() {
                    return None;
                }

                match state.body.next().await {
                    Some(Ok(bytes)) => match state.decoder.push(&bytes) {
                        Ok(decoded) => state.pending.extend(decoded),
                        Err(e) => {
                            state.decoder.finish();
                            return Some((Err(e), state));
                        }
                    },
                    Some(Err(e)) => {
                        state.decoder.finish();
                        return Some((Err(e.into()), state));
                    }
                    None => return None,
                }
            }
        });

        Ok(fragments.boxed())
    }
}
