//! Client for a rewrite service speaking the frame protocol.
//!
//! Requests go to `POST {base_url}/api/rewrite` with the [`RewriteRequest`]
//! JSON body. With `stream = false` the service answers with a
//! [`RewriteResponse`]; with `stream = true` it answers with `data:` frame
//! lines, decoded here by a [`FrameDecoder`].

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::frame::{FrameDecoder, RewriteResponse};
use super::retry::send_with_retry;
use super::{CompletionClient, FrameStream};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::models::{RewriteRequest, RewriteResult};

pub struct RemoteClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    max_retries: u32,
}

impl RemoteClient {
    pub fn new(base_url: &str, config: &BackendConfig) -> Result<Self, BackendError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        // Only the connection phase is bounded here. The whole exchange is
        // bounded by the caller's per-chunk timeout.
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| BackendError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/rewrite", base_url.trim_end_matches('/')),
            timeout,
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(
        &self,
        request: &RewriteRequest,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let body = RewriteRequest {
            stream,
            ..request.clone()
        };
        send_with_retry(self.name(), self.max_retries, self.timeout, || {
            self.client.post(&self.endpoint).json(&body)
        })
        .await
    }
}

#[async_trait]
impl CompletionClient for RemoteClient {
    fn name(&self) -> &str {
        "remote"
    }

    async fn complete(&self, request: &RewriteRequest) -> Result<RewriteResult, BackendError> {
        let response = self.send(request, false).await?;
        let body: RewriteResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(RewriteResult {
            content: body.rewritten_content,
            explanation: body.explanation,
        })
    }

    async fn stream(&self, request: &RewriteRequest) -> Result<FrameStream, BackendError> {
        let response = self.send(request, true).await?;
        let mut bytes = response.bytes_stream();

        let frames = async_stream::stream! {
            let mut decoder = FrameDecoder::default();
            let mut failed = false;

            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(data) => {
                        for frame in decoder.push(&data) {
                            yield Ok(frame);
                        }
                    }
                    Err(e) => {
                        failed = true;
                        yield Err(BackendError::Transport(e.to_string()));
                        break;
                    }
                }
            }

            if !failed {
                for frame in decoder.finish() {
                    yield Ok(frame);
                }
            }
        };

        Ok(Box::pin(frames))
    }
}
