//! Core data models shared by the chunker, orchestrator, and clients.
//!
//! These types represent the documents, chunks, requests, and run state that
//! flow through the rewrite pipeline.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Source document. Immutable once chunked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    /// Build a document whose id is derived from its content, so the same
    /// text always gets the same id.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Self {
            id: digest[..16].to_string(),
            text,
        }
    }

    /// Build a document with an externally assigned id (e.g. from a store).
    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Processing state of a single chunk within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    Streaming,
    Complete,
    Failed,
    Cancelled,
}

impl ChunkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkState::Pending => "pending",
            ChunkState::Streaming => "streaming",
            ChunkState::Complete => "complete",
            ChunkState::Failed => "failed",
            ChunkState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bounded, paragraph-aligned slice of a document.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    /// 0-based position in the document.
    pub index: usize,
    pub title: String,
    /// Exactly `source[start_offset..end_offset]`.
    pub content: String,
    pub preview: String,
    /// Byte offset of the first character of `content` in the source.
    pub start_offset: usize,
    /// Byte offset one past the last character of `content`.
    pub end_offset: usize,
    pub words: usize,
    pub selected: bool,
    pub state: ChunkState,
    pub rewritten: Option<String>,
    pub explanation: Option<String>,
}

impl Chunk {
    pub fn is_complete(&self) -> bool {
        self.state == ChunkState::Complete
    }

    /// Clear any result of a previous run.
    pub fn reset(&mut self) {
        self.state = ChunkState::Pending;
        self.rewritten = None;
        self.explanation = None;
    }
}

/// External view of a chunk: what chunking endpoints and `redraft chunk
/// --json` return. Positions are byte offsets into the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSummary {
    pub title: String,
    pub content: String,
    pub start_position: usize,
    pub end_position: usize,
    pub words: usize,
}

impl From<&Chunk> for ChunkSummary {
    fn from(chunk: &Chunk) -> Self {
        Self {
            title: chunk.title.clone(),
            content: chunk.content.clone(),
            start_position: chunk.start_offset,
            end_position: chunk.end_offset,
            words: chunk.words,
        }
    }
}

/// Backend variant selected for a run.
///
/// Resolved to a concrete endpoint only inside a
/// [`CompletionClient`](crate::completion::CompletionClient).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    #[default]
    Claude,
    Gpt4,
    Perplexity,
    Deepseek,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 4] = [
        ModelVariant::Claude,
        ModelVariant::Gpt4,
        ModelVariant::Perplexity,
        ModelVariant::Deepseek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelVariant::Claude => "claude",
            ModelVariant::Gpt4 => "gpt4",
            ModelVariant::Perplexity => "perplexity",
            ModelVariant::Deepseek => "deepseek",
        }
    }
}

impl FromStr for ModelVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(ModelVariant::Claude),
            "gpt4" | "gpt-4" | "openai" => Ok(ModelVariant::Gpt4),
            "perplexity" => Ok(ModelVariant::Perplexity),
            "deepseek" => Ok(ModelVariant::Deepseek),
            other => Err(format!(
                "unknown model '{}': expected claude, gpt4, perplexity, or deepseek",
                other
            )),
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One request to the completion backend. Serialized in the wire format
/// (`chatContext`, `chunkIndex`, `totalChunks`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteRequest {
    pub content: String,
    pub instructions: String,
    pub model: ModelVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_context: Option<String>,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default = "default_total_chunks")]
    pub total_chunks: usize,
    #[serde(default)]
    pub stream: bool,
}

fn default_total_chunks() -> usize {
    1
}

/// Final text for one request, from a one-shot response or an accumulated
/// stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteResult {
    pub content: String,
    pub explanation: Option<String>,
}

/// Display state for one requested operation of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEntry {
    pub title: String,
    pub content: String,
    pub completed: bool,
}

impl ProgressEntry {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: String::new(),
            completed: false,
        }
    }
}

/// Global status of a session's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    CancelRequested,
}

/// Run-level state as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct RunState {
    pub status: RunStatus,
    /// Position (within the run's operations) currently being processed.
    pub current_index: Option<usize>,
    pub progress_percent: u8,
}
