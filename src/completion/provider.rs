//! Direct client for OpenAI-compatible chat completion endpoints.
//!
//! Every [`ModelVariant`] resolves to its own `[models.<variant>]` endpoint
//! (or the built-in default): base URL, model name, API key environment
//! variable, `max_tokens` and `temperature`. Streaming responses arrive as
//! server-sent `data:` lines carrying `choices[0].delta.content`; each delta
//! becomes a [`StreamFrame::Chunk`], and the provider's finish marker
//! (`finish_reason` or `data: [DONE]`) becomes [`StreamFrame::Complete`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::frame::{LineBuffer, StreamFrame, DATA_PREFIX};
use super::retry::send_with_retry;
use super::{CompletionClient, FrameStream};
use crate::config::{Config, ModelConfig};
use crate::error::BackendError;
use crate::models::{ModelVariant, RewriteRequest, RewriteResult};

const SYSTEM_PROMPT: &str = "You rewrite one section of a longer document. \
Follow the user's instructions exactly. Reply with the rewritten section only: \
no preamble, no commentary, no notes about what you changed.";

pub struct ProviderClient {
    client: reqwest::Client,
    endpoints: HashMap<ModelVariant, ModelConfig>,
    timeout: Duration,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

impl ProviderClient {
    pub fn new(config: &Config) -> Result<Self, BackendError> {
        let timeout = Duration::from_secs(config.backend.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| BackendError::Configuration(e.to_string()))?;

        let endpoints = ModelVariant::ALL
            .into_iter()
            .map(|variant| (variant, config.model(variant)))
            .collect();

        Ok(Self {
            client,
            endpoints,
            timeout,
            max_retries: config.backend.max_retries,
        })
    }

    fn endpoint(&self, variant: ModelVariant) -> Result<&ModelConfig, BackendError> {
        self.endpoints.get(&variant).ok_or_else(|| {
            BackendError::Configuration(format!("no endpoint configured for model '{}'", variant))
        })
    }

    async fn send(
        &self,
        request: &RewriteRequest,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let endpoint = self.endpoint(request.model)?;
        let api_key = api_key(endpoint)?;
        let url = format!("{}/chat/completions", endpoint.base_url.trim_end_matches('/'));
        let body = ChatCompletionRequest {
            model: &endpoint.model,
            messages: build_messages(request),
            max_tokens: endpoint.max_tokens,
            temperature: endpoint.temperature,
            stream: stream.then_some(true),
        };

        tracing::debug!(
            model = %request.model,
            endpoint = %url,
            chunk = request.chunk_index,
            stream,
            "calling provider"
        );

        send_with_retry(request.model.as_str(), self.max_retries, self.timeout, || {
            let builder = self.client.post(&url).json(&body);
            match &api_key {
                Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
                None => builder,
            }
        })
        .await
    }
}

/// Read the endpoint's API key. An empty `api_key_env` means the endpoint
/// needs no authentication (e.g. a local server).
fn api_key(endpoint: &ModelConfig) -> Result<Option<String>, BackendError> {
    if endpoint.api_key_env.is_empty() {
        return Ok(None);
    }
    std::env::var(&endpoint.api_key_env)
        .map(Some)
        .map_err(|_| BackendError::Configuration(format!("{} not set", endpoint.api_key_env)))
}

fn build_messages(request: &RewriteRequest) -> Vec<ChatMessage> {
    let mut prompt = format!("Instructions:\n{}\n\n", request.instructions.trim());
    if let Some(context) = request.chat_context.as_deref().filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!("Context:\n{}\n\n", context.trim()));
    }
    prompt.push_str(&format!(
        "Section {} of {}:\n\n{}",
        request.chunk_index + 1,
        request.total_chunks.max(1),
        request.content
    ));

    vec![
        ChatMessage {
            role: "system".to_string(),
            content: SYSTEM_PROMPT.to_string(),
        },
        ChatMessage {
            role: "user".to_string(),
            content: prompt,
        },
    ]
}

/// Parse one SSE line of a provider stream into its text delta and whether
/// it ends the response.
fn parse_sse_line(line: &str) -> (Option<String>, bool) {
    let Some(payload) = line.strip_prefix(DATA_PREFIX).map(str::trim) else {
        return (None, false);
    };
    if payload == "[DONE]" {
        return (None, true);
    }
    if payload.is_empty() {
        return (None, false);
    }
    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => match chunk.choices.into_iter().next() {
            Some(choice) => (
                choice.delta.content.filter(|c| !c.is_empty()),
                choice.finish_reason.is_some(),
            ),
            None => (None, false),
        },
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed provider event");
            (None, false)
        }
    }
}

#[async_trait]
impl CompletionClient for ProviderClient {
    fn name(&self) -> &str {
        "provider"
    }

    async fn complete(&self, request: &RewriteRequest) -> Result<RewriteResult, BackendError> {
        let response = self.send(request, false).await?;
        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| RewriteResult {
                content: choice.message.content,
                explanation: None,
            })
            .ok_or_else(|| BackendError::InvalidResponse("empty choices".to_string()))
    }

    async fn stream(&self, request: &RewriteRequest) -> Result<FrameStream, BackendError> {
        let response = self.send(request, true).await?;
        let mut bytes = response.bytes_stream();

        let frames = async_stream::stream! {
            let mut lines = LineBuffer::default();
            let mut finished = false;
            let mut failed = false;

            'read: while let Some(chunk) = bytes.next().await {
                let data = match chunk {
                    Ok(data) => data,
                    Err(e) => {
                        failed = true;
                        yield Err(BackendError::Transport(e.to_string()));
                        break 'read;
                    }
                };
                for line in lines.push(&data) {
                    let (delta, done) = parse_sse_line(&line);
                    if let Some(content) = delta {
                        yield Ok(StreamFrame::Chunk { content });
                    }
                    if done {
                        finished = true;
                        break 'read;
                    }
                }
            }

            if !failed && !finished {
                if let Some(line) = lines.finish() {
                    let (delta, done) = parse_sse_line(&line);
                    if let Some(content) = delta {
                        yield Ok(StreamFrame::Chunk { content });
                    }
                    finished = done;
                }
            }

            // Without a finish marker the reader reports an unexpected end.
            if finished {
                yield Ok(StreamFrame::Complete {
                    rewritten_content: None,
                    explanation: None,
                });
            }
        };

        Ok(Box::pin(frames))
    }
}
