//! Error taxonomy for the rewrite pipeline.
//!
//! Library code returns these typed errors; the CLI and config layer wrap
//! them in `anyhow` at the edge.
//!
//! | Type | Raised by | Effect on a run |
//! |------|-----------|-----------------|
//! | [`ValidationError`] | [`Orchestrator::start_run`](crate::orchestrator::Orchestrator::start_run) | rejected before any backend call |
//! | [`BackendError`] | every [`CompletionClient`](crate::completion::CompletionClient) | aborts the remainder of the run |
//! | [`StreamProtocolError`] | [`read_frames`](crate::completion::read_frames) | wrapped in [`BackendError::Stream`] |
//! | [`StoreError`] | [`DocumentStore`](crate::store::DocumentStore) | surfaced to the caller |
//!
//! A length-policy shortfall is not an error: see
//! [`LengthShortfall`](crate::length::LengthShortfall). Cancellation is not an
//! error either: see [`RunOutcome::Cancelled`](crate::orchestrator::RunOutcome).

use std::time::Duration;

use thiserror::Error;

/// Missing or invalid request fields, reported before the backend is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no chunks selected and no new content requested")]
    NothingSelected,
    #[error("instructions must not be empty")]
    MissingInstructions,
    #[error("append request must ask for at least one section with non-empty instructions")]
    EmptyAppend,
    #[error("a run is already active for this session")]
    RunActive,
    #[error("chunk position {position} is out of range (document has {total} chunks)")]
    UnknownChunk { position: usize, total: usize },
}

/// Failure of the completion backend for a single request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("backend rate limit exceeded")]
    RateLimited,
    #[error("request payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Stream(#[from] StreamProtocolError),
    #[error("backend misconfigured: {0}")]
    Configuration(String),
}

impl BackendError {
    /// Whether a retry with the same payload could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::RateLimited | BackendError::Transport(_) => true,
            BackendError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Map an HTTP error status and body to the matching variant.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            413 => BackendError::PayloadTooLarge(message),
            429 => BackendError::RateLimited,
            _ => BackendError::Status { status, message },
        }
    }
}

/// Violations of the streaming frame protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamProtocolError {
    #[error("backend sent an error frame: {0}")]
    ErrorFrame(String),
    #[error("stream ended without a complete frame")]
    UnexpectedEnd,
}

/// Failures of the document store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("invalid document id: {0}")]
    InvalidId(String),
    #[error("failed to read document {id}: {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },
}
