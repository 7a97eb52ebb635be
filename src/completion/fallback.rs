//! Truncate-and-retry-once decorator.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{CompletionClient, FrameStream};
use crate::error::BackendError;
use crate::models::{RewriteRequest, RewriteResult};

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+").unwrap());

/// Wraps a client so that a [`BackendError::PayloadTooLarge`] rejection is
/// retried exactly once with the content cut to half its words. Any other
/// error, and a second failure, is returned unchanged.
pub struct TruncatingClient<C> {
    inner: C,
}

impl<C> TruncatingClient<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

/// Copy of `request` whose content keeps only the first half of its words.
/// `None` when there is nothing left to cut.
pub fn truncated(request: &RewriteRequest) -> Option<RewriteRequest> {
    let words: Vec<_> = WORD.find_iter(&request.content).collect();
    let keep = words.len() / 2;
    if keep == 0 {
        return None;
    }
    let end = words[keep - 1].end();
    Some(RewriteRequest {
        content: request.content[..end].to_string(),
        ..request.clone()
    })
}

#[async_trait]
impl<C: CompletionClient> CompletionClient for TruncatingClient<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: &RewriteRequest) -> Result<RewriteResult, BackendError> {
        match self.inner.complete(request).await {
            Err(BackendError::PayloadTooLarge(reason)) => match truncated(request) {
                Some(shorter) => {
                    log_retry(request, &shorter, &reason);
                    self.inner.complete(&shorter).await
                }
                None => Err(BackendError::PayloadTooLarge(reason)),
            },
            other => other,
        }
    }

    async fn stream(&self, request: &RewriteRequest) -> Result<FrameStream, BackendError> {
        match self.inner.stream(request).await {
            Err(BackendError::PayloadTooLarge(reason)) => match truncated(request) {
                Some(shorter) => {
                    log_retry(request, &shorter, &reason);
                    self.inner.stream(&shorter).await
                }
                None => Err(BackendError::PayloadTooLarge(reason)),
            },
            other => other,
        }
    }
}

fn log_retry(original: &RewriteRequest, shorter: &RewriteRequest, reason: &str) {
    tracing::warn!(
        chunk = original.chunk_index,
        original_bytes = original.content.len(),
        truncated_bytes = shorter.content.len(),
        reason,
        "payload too large; retrying once with truncated content"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelVariant;
    use std::sync::Mutex;

    /// Rejects any request longer than `limit` bytes and records what it saw.
    struct SizeLimited {
        limit: usize,
        seen: Mutex<Vec<String>>,
    }

    impl SizeLimited {
        fn new(limit: usize) -> Self {
            Self {
                limit,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for SizeLimited {
        fn name(&self) -> &str {
            "size-limited"
        }

        async fn complete(
            &self,
            request: &RewriteRequest,
        ) -> Result<RewriteResult, BackendError> {
            self.seen.lock().unwrap().push(request.content.clone());
            if request.content.len() > self.limit {
                return Err(BackendError::PayloadTooLarge("too long".into()));
            }
            Ok(RewriteResult {
                content: request.content.to_uppercase(),
                explanation: None,
            })
        }

        async fn stream(&self, _request: &RewriteRequest) -> Result<FrameStream, BackendError> {
            Err(BackendError::Status {
                status: 400,
                message: "streaming unsupported".into(),
            })
        }
    }

    fn request(content: &str) -> RewriteRequest {
        RewriteRequest {
            content: content.into(),
            instructions: "shout".into(),
            model: ModelVariant::Claude,
            chat_context: None,
            chunk_index: 0,
            total_chunks: 1,
            stream: false,
        }
    }

    #[test]
    fn truncation_keeps_first_half_of_words() {
        let cut = truncated(&request("one two\n\nthree four five")).unwrap();
        assert_eq!(cut.content, "one two");
        assert!(truncated(&request("single")).is_none());
        assert!(truncated(&request("  ")).is_none());
    }

    #[tokio::test]
    async fn retries_once_with_truncated_content() {
        let client = TruncatingClient::new(SizeLimited::new(10));
        let result = client.complete(&request("alpha beta gamma delta")).await.unwrap();
        assert_eq!(result.content, "ALPHA BETA");
        assert_eq!(
            *client.inner.seen.lock().unwrap(),
            vec!["alpha beta gamma delta".to_string(), "alpha beta".to_string()]
        );
    }

    #[tokio::test]
    async fn second_rejection_is_returned() {
        let client = TruncatingClient::new(SizeLimited::new(3));
        let err = client.complete(&request("alpha beta gamma delta")).await.unwrap_err();
        assert!(matches!(err, BackendError::PayloadTooLarge(_)));
        assert_eq!(client.into_inner().seen.into_inner().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let client = TruncatingClient::new(SizeLimited::new(100));
        let err = client.stream(&request("alpha beta")).await.err().unwrap();
        assert!(matches!(err, BackendError::Status { status: 400, .. }));
    }
}
