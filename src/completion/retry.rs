//! Shared HTTP send loop with exponential backoff.

use std::time::Duration;

use crate::error::BackendError;

/// Backoff doubles per attempt up to `2^MAX_BACKOFF_EXPONENT` seconds.
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Send the request produced by `build` until it succeeds or fails for good.
///
/// Retry strategy:
/// - HTTP 429 or 5xx → retry with exponential backoff
/// - HTTP 4xx (not 429) → fail immediately
/// - Network error → retry
/// - Timeout → fail immediately with [`BackendError::Timeout`]
///
/// Only the status line is inspected on success; the body is left for the
/// caller so streaming responses can be consumed incrementally.
pub(crate) async fn send_with_retry<F>(
    label: &str,
    max_retries: u32,
    timeout: Duration,
    mut build: F,
) -> Result<reqwest::Response, BackendError>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(MAX_BACKOFF_EXPONENT));
            tracing::warn!(
                backend = label,
                attempt,
                delay_secs = delay.as_secs(),
                error = ?last_err,
                "retrying backend request"
            );
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status().as_u16();
                let err = BackendError::from_status(status, error_message(response).await);
                if !err.is_transient() {
                    return Err(err);
                }
                last_err = Some(err);
            }
            Err(e) if e.is_timeout() => return Err(BackendError::Timeout(timeout)),
            Err(e) => last_err = Some(BackendError::Transport(e.to_string())),
        }
    }

    Err(last_err
        .unwrap_or_else(|| BackendError::Transport("request failed after retries".to_string())))
}

/// Extract a readable message from an error response body.
///
/// Understands `{"error": {"message": ...}}` and `{"error": "..."}`; anything
/// else is returned verbatim.
pub(crate) async fn error_message(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    message_from_body(body)
}

fn message_from_body(body: String) -> String {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) else {
        return body;
    };
    json.pointer("/error/message")
        .or_else(|| json.get("error"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or(body)
}
