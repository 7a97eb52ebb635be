//! Completion backends.
//!
//! A [`CompletionClient`] turns a [`RewriteRequest`] into either a finished
//! [`RewriteResult`] or a [`FrameStream`] of protocol frames. The
//! orchestrator only ever sees this trait; which endpoint a
//! [`ModelVariant`](crate::models::ModelVariant) maps to is decided inside
//! the implementation.
//!
//! # Implementations
//!
//! - **[`ProviderClient`]**: calls OpenAI-compatible `/chat/completions`
//!   endpoints directly, one per model variant.
//! - **[`RemoteClient`]**: calls a rewrite service that speaks the frame
//!   protocol (for example another `redraft serve`).
//! - **[`TruncatingClient`]**: decorator that retries once with a shorter
//!   payload when the backend rejects a request as too large.
//!
//! Both HTTP clients retry 429, 5xx and network errors with exponential
//! backoff (1s, 2s, 4s, … capped at 32s) before any response body is read.

pub mod fallback;
pub mod frame;
mod retry;
pub mod provider;
pub mod remote;

use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::config::{BackendKind, Config};
use crate::error::{BackendError, StreamProtocolError};
use crate::models::{RewriteRequest, RewriteResult};

pub use fallback::TruncatingClient;
pub use frame::{FrameDecoder, StreamFrame};
pub use provider::ProviderClient;
pub use remote::RemoteClient;

/// Pull-based sequence of frames for one streaming request.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, BackendError>> + Send>>;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// One-shot request; resolves once the whole result is available.
    async fn complete(&self, request: &RewriteRequest) -> Result<RewriteResult, BackendError>;

    /// Streaming request. Errors returned here happen before the first frame;
    /// later failures arrive as items of the stream.
    async fn stream(&self, request: &RewriteRequest) -> Result<FrameStream, BackendError>;
}

#[async_trait]
impl<T: CompletionClient + ?Sized> CompletionClient for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn complete(&self, request: &RewriteRequest) -> Result<RewriteResult, BackendError> {
        (**self).complete(request).await
    }

    async fn stream(&self, request: &RewriteRequest) -> Result<FrameStream, BackendError> {
        (**self).stream(request).await
    }
}

/// Drain a frame stream into a final result.
///
/// Each `chunk` frame is appended to a live buffer and `on_snapshot` is
/// called with the buffer so far. A `complete` frame ends the stream and its
/// text replaces the buffer; if it carries no text the buffer is the result.
/// An `error` frame, or a stream that ends without `complete`, is an error.
pub async fn read_frames<F>(
    mut frames: FrameStream,
    mut on_snapshot: F,
) -> Result<RewriteResult, BackendError>
where
    F: FnMut(&str) + Send,
{
    let mut buffer = String::new();
    while let Some(frame) = frames.next().await {
        match frame? {
            StreamFrame::Chunk { content } => {
                buffer.push_str(&content);
                on_snapshot(&buffer);
            }
            StreamFrame::Complete {
                rewritten_content,
                explanation,
            } => {
                tracing::debug!(
                    streamed_len = buffer.len(),
                    authoritative = rewritten_content.is_some(),
                    "stream complete"
                );
                return Ok(RewriteResult {
                    content: rewritten_content.unwrap_or(buffer),
                    explanation,
                });
            }
            StreamFrame::Error { error } => {
                return Err(StreamProtocolError::ErrorFrame(error).into());
            }
        }
    }
    Err(StreamProtocolError::UnexpectedEnd.into())
}

/// Build the completion client described by `config.backend`.
///
/// The result is wrapped in a [`TruncatingClient`] when
/// `run.truncate_on_oversize` is set.
pub fn create_client(config: &Config) -> Result<Arc<dyn CompletionClient>> {
    let base: Arc<dyn CompletionClient> = match config.backend.kind {
        BackendKind::Provider => Arc::new(ProviderClient::new(config)?),
        BackendKind::Remote => {
            let url = config
                .backend
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("backend.url required for remote backend"))?;
            Arc::new(RemoteClient::new(url, &config.backend)?)
        }
    };

    if config.run.truncate_on_oversize {
        Ok(Arc::new(TruncatingClient::new(base)))
    } else {
        Ok(base)
    }
}
