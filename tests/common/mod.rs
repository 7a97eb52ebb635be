#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;

use redraft::chunk::word_count;
use redraft::completion::{CompletionClient, FrameStream, StreamFrame};
use redraft::config::Config;
use redraft::error::BackendError;
use redraft::models::{RewriteRequest, RewriteResult};
use redraft::server::{router, AppState};
use redraft::store::FsDocumentStore;

/// Backend that upper-cases its input. Content longer than `max_words` is
/// rejected as too large.
pub struct Shouting {
    pub max_words: usize,
}

impl Default for Shouting {
    fn default() -> Self {
        Self {
            max_words: usize::MAX,
        }
    }
}

impl Shouting {
    fn check(&self, request: &RewriteRequest) -> Result<(), BackendError> {
        let words = word_count(&request.content);
        if words > self.max_words {
            return Err(BackendError::PayloadTooLarge(format!(
                "{} words exceeds {}",
                words, self.max_words
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CompletionClient for Shouting {
    fn name(&self) -> &str {
        "shouting"
    }

    async fn complete(&self, request: &RewriteRequest) -> Result<RewriteResult, BackendError> {
        self.check(request)?;
        Ok(RewriteResult {
            content: request.content.to_uppercase(),
            explanation: Some("shouted".into()),
        })
    }

    async fn stream(&self, request: &RewriteRequest) -> Result<FrameStream, BackendError> {
        self.check(request)?;
        let mut frames: Vec<Result<StreamFrame, BackendError>> = request
            .content
            .to_uppercase()
            .split_inclusive(' ')
            .map(|piece| {
                Ok(StreamFrame::Chunk {
                    content: piece.to_string(),
                })
            })
            .collect();
        frames.push(Ok(StreamFrame::Complete {
            rewritten_content: None,
            explanation: None,
        }));
        Ok(Box::pin(stream::iter(frames)))
    }
}

/// Serve the router on an ephemeral port and return its base URL.
pub async fn spawn_server(
    config: Config,
    client: Arc<dyn CompletionClient>,
    documents: &std::path::Path,
) -> String {
    let state = AppState::new(config, client, Arc::new(FsDocumentStore::new(documents)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}
