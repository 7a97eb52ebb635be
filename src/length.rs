//! Minimum output length policy.
//!
//! A rewrite must have at least `ceil(min_ratio × original_words)` words.
//! When the candidate falls short, exactly one non-streaming expansion
//! request is made and its normalized result is accepted whatever its
//! length. A remaining gap is reported as a [`LengthShortfall`], never as an
//! error, and a backend failure during expansion keeps the candidate.

use serde::Serialize;

use crate::chunk::word_count;
use crate::completion::CompletionClient;
use crate::models::RewriteRequest;
use crate::normalize::normalize;

/// Absorbs float error in `ratio × words` (1.1 × 100 is 110.00000000000001).
const RATIO_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LengthShortfall {
    pub required: usize,
    pub actual: usize,
}

/// Outcome of [`LengthEnforcer::enforce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enforced {
    pub text: String,
    pub expansion_attempted: bool,
    pub shortfall: Option<LengthShortfall>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthEnforcer {
    pub min_ratio: f64,
}

impl Default for LengthEnforcer {
    fn default() -> Self {
        Self { min_ratio: 1.1 }
    }
}

impl LengthEnforcer {
    pub fn new(min_ratio: f64) -> Self {
        Self { min_ratio }
    }

    /// Minimum word count for a rewrite of `original`.
    pub fn required_words(&self, original: &str) -> usize {
        let exact = self.min_ratio * word_count(original) as f64;
        (exact - RATIO_EPSILON).ceil().max(0.0) as usize
    }

    /// Apply the policy to `candidate`, the normalized rewrite of `original`.
    ///
    /// `request` is the request that produced the candidate; the expansion
    /// request reuses its model, context and position.
    pub async fn enforce<C>(
        &self,
        client: &C,
        request: &RewriteRequest,
        original: &str,
        candidate: String,
    ) -> Enforced
    where
        C: CompletionClient + ?Sized,
    {
        let required = self.required_words(original);
        let actual = word_count(&candidate);
        if actual >= required {
            return Enforced {
                text: candidate,
                expansion_attempted: false,
                shortfall: None,
            };
        }

        tracing::info!(
            chunk = request.chunk_index,
            required,
            actual,
            "rewrite shorter than required; requesting expansion"
        );

        let expansion = expansion_request(request, &candidate, required);
        let text = match client.complete(&expansion).await {
            Ok(result) => normalize(&result.content),
            Err(e) => {
                tracing::warn!(
                    chunk = request.chunk_index,
                    error = %e,
                    "expansion request failed; keeping shorter rewrite"
                );
                candidate
            }
        };

        let actual = word_count(&text);
        let shortfall = (actual < required).then_some(LengthShortfall { required, actual });
        if let Some(gap) = &shortfall {
            tracing::warn!(
                chunk = request.chunk_index,
                required = gap.required,
                actual = gap.actual,
                "accepting rewrite below length target"
            );
        }

        Enforced {
            text,
            expansion_attempted: true,
            shortfall,
        }
    }
}

fn expansion_request(request: &RewriteRequest, candidate: &str, required: usize) -> RewriteRequest {
    RewriteRequest {
        content: candidate.to_string(),
        instructions: format!(
            "Expand the following text to at least {} words. Keep its style, voice and \
             meaning; add depth and detail rather than repetition. The original instructions \
             were: {}",
            required,
            request.instructions.trim()
        ),
        stream: false,
        ..request.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::FrameStream;
    use crate::error::BackendError;
    use crate::models::{ModelVariant, RewriteResult};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns a fixed reply (or error) and records every request.
    struct Scripted {
        reply: Result<String, BackendError>,
        calls: Mutex<Vec<RewriteRequest>>,
    }

    impl Scripted {
        fn new(reply: Result<String, BackendError>) -> Self {
            Self {
                reply,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<RewriteRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: &RewriteRequest,
        ) -> Result<RewriteResult, BackendError> {
            self.calls.lock().unwrap().push(request.clone());
            self.reply.clone().map(|content| RewriteResult {
                content,
                explanation: None,
            })
        }

        async fn stream(&self, _request: &RewriteRequest) -> Result<FrameStream, BackendError> {
            unreachable!("expansion never streams")
        }
    }

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    fn request() -> RewriteRequest {
        RewriteRequest {
            content: words(100),
            instructions: "Make it vivid.".into(),
            model: ModelVariant::Gpt4,
            chat_context: Some("ctx".into()),
            chunk_index: 3,
            total_chunks: 7,
            stream: true,
        }
    }

    #[test]
    fn required_words_rounds_up() {
        let enforcer = LengthEnforcer::default();
        assert_eq!(enforcer.required_words(&words(100)), 110);
        assert_eq!(enforcer.required_words(&words(95)), 105);
        assert_eq!(enforcer.required_words(&words(1)), 2);
        assert_eq!(enforcer.required_words(""), 0);
        assert_eq!(LengthEnforcer::new(1.0).required_words(&words(7)), 7);
    }

    #[tokio::test]
    async fn long_enough_candidate_is_untouched() {
        let client = Scripted::new(Ok(String::new()));
        let out = LengthEnforcer::default()
            .enforce(&client, &request(), &words(100), words(110))
            .await;
        assert_eq!(out.text, words(110));
        assert!(!out.expansion_attempted);
        assert!(out.shortfall.is_none());
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn short_candidate_is_expanded_once() {
        let client = Scripted::new(Ok(words(112)));
        let out = LengthEnforcer::default()
            .enforce(&client, &request(), &words(100), words(95))
            .await;
        assert_eq!(out.text, words(112));
        assert!(out.expansion_attempted);
        assert!(out.shortfall.is_none());

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].content, words(95));
        assert!(!calls[0].stream);
        assert!(calls[0].instructions.contains("at least 110 words"));
        assert!(calls[0].instructions.contains("Make it vivid."));
        assert_eq!(calls[0].chunk_index, 3);
        assert_eq!(calls[0].chat_context.as_deref(), Some("ctx"));
    }

    #[tokio::test]
    async fn expansion_is_normalized() {
        let expansion = format!("## Expanded\n\n**{}**", words(120));
        let client = Scripted::new(Ok(expansion));
        let out = LengthEnforcer::default()
            .enforce(&client, &request(), &words(100), words(95))
            .await;
        assert_eq!(out.text, normalize(&format!("Expanded\n\n{}", words(120))));
    }

    #[tokio::test]
    async fn short_expansion_is_accepted_with_shortfall() {
        let client = Scripted::new(Ok(words(98)));
        let out = LengthEnforcer::default()
            .enforce(&client, &request(), &words(100), words(95))
            .await;
        assert_eq!(out.text, words(98));
        assert_eq!(
            out.shortfall,
            Some(LengthShortfall {
                required: 110,
                actual: 98
            })
        );
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn expansion_failure_keeps_candidate() {
        let client = Scripted::new(Err(BackendError::RateLimited));
        let out = LengthEnforcer::default()
            .enforce(&client, &request(), &words(100), words(95))
            .await;
        assert_eq!(out.text, words(95));
        assert!(out.expansion_attempted);
        assert_eq!(
            out.shortfall,
            Some(LengthShortfall {
                required: 110,
                actual: 95
            })
        );
    }
}
