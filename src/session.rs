//! Per-user document state.
//!
//! A [`Session`] owns the loaded document, its chunks (with selection and
//! per-chunk results), the progress tracker and the cancellation slot. The
//! orchestrator takes it by `&mut`, so a run is the only mutator while it is
//! active; everyone else observes through [`Session::subscribe`] and cancels
//! through a [`CancelHandle`].

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::chunk::chunk_document;
use crate::config::ChunkingConfig;
use crate::error::ValidationError;
use crate::models::{Chunk, Document, RunState};
use crate::progress::{ProgressSnapshot, ProgressTracker};

type CancelSlot = Arc<Mutex<CancellationToken>>;

pub struct Session {
    chunking: ChunkingConfig,
    document: Option<Document>,
    chunks: Vec<Chunk>,
    tracker: ProgressTracker,
    cancel: CancelSlot,
}

/// Requests cancellation of whatever run the session is executing.
///
/// Takes effect at the next chunk boundary or during the inter-chunk delay;
/// a request that is already in flight runs to completion.
#[derive(Clone)]
pub struct CancelHandle {
    slot: CancelSlot,
    tracker: ProgressTracker,
}

impl CancelHandle {
    pub fn cancel(&self) {
        lock(&self.slot).cancel();
        self.tracker.request_cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.slot).is_cancelled()
    }
}

fn lock(slot: &CancelSlot) -> MutexGuard<'_, CancellationToken> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Session {
    pub fn new(chunking: ChunkingConfig) -> Self {
        Self {
            chunking,
            document: None,
            chunks: Vec::new(),
            tracker: ProgressTracker::new(),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    /// Chunk `document` and make it the session's document. Replaces any
    /// previous chunks and progress.
    pub fn load(&mut self, document: Document) -> &[Chunk] {
        self.chunks = chunk_document(&document.text, &self.chunking);
        tracing::info!(
            document = %document.id,
            chunks = self.chunks.len(),
            "document chunked"
        );
        self.document = Some(document);
        self.tracker.reset();
        &self.chunks
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub(crate) fn chunks_mut(&mut self) -> &mut [Chunk] {
        &mut self.chunks
    }

    /// Select exactly the chunks at `positions` (0-based).
    pub fn select(&mut self, positions: &[usize]) -> Result<(), ValidationError> {
        let total = self.chunks.len();
        if let Some(&position) = positions.iter().find(|&&p| p >= total) {
            return Err(ValidationError::UnknownChunk { position, total });
        }
        for (i, chunk) in self.chunks.iter_mut().enumerate() {
            chunk.selected = positions.contains(&i);
        }
        Ok(())
    }

    pub fn select_all(&mut self) {
        for chunk in &mut self.chunks {
            chunk.selected = true;
        }
    }

    pub fn selected_positions(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|c| c.selected)
            .map(|c| c.index)
            .collect()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            slot: Arc::clone(&self.cancel),
            tracker: self.tracker.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tracker.subscribe()
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.tracker
    }

    pub fn run_state(&self) -> RunState {
        self.tracker.run_state()
    }

    /// Drop the document, chunks and progress ("nuke").
    pub fn reset(&mut self) {
        self.document = None;
        self.chunks.clear();
        self.tracker.reset();
        self.disarm_cancellation();
    }

    /// Install a fresh token for a new run and return it. Cancellations
    /// requested while idle are discarded.
    fn arm_cancellation(&mut self) -> CancellationToken {
        let token = CancellationToken::new();
        *lock(&self.cancel) = token.clone();
        token
    }

    /// Arm a fresh token and publish the run's entries. A cancel landing
    /// between the two still shows as `CancelRequested`.
    pub(crate) fn begin_run(&mut self, titles: Vec<String>) -> CancellationToken {
        let token = self.arm_cancellation();
        self.begin_tracking(&token, titles);
        token
    }

    fn begin_tracking(&self, token: &CancellationToken, titles: Vec<String>) {
        self.tracker.begin(titles);
        if token.is_cancelled() {
            self.tracker.request_cancel();
        }
    }

    /// Clear any pending cancellation once a run has ended.
    pub(crate) fn disarm_cancellation(&mut self) {
        *lock(&self.cancel) = CancellationToken::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunStatus;

    fn session_with(text: &str) -> Session {
        // Three-word paragraphs never fit two to a chunk.
        let mut session = Session::new(ChunkingConfig {
            target_words: 3,
            min_words: 2,
            max_words: 4,
        });
        session.load(Document::new(text));
        session
    }

    #[test]
    fn load_chunks_the_document() {
        let session = session_with("one two three\n\nfour five six\n\nseven eight nine");
        assert_eq!(session.chunks().len(), 3);
        assert!(session.document().is_some());
        assert!(session.selected_positions().is_empty());
    }

    #[test]
    fn selection_replaces_previous_selection() {
        let mut session = session_with("one two three\n\nfour five six\n\nseven eight nine");
        session.select(&[0, 2]).unwrap();
        assert_eq!(session.selected_positions(), vec![0, 2]);
        session.select(&[1]).unwrap();
        assert_eq!(session.selected_positions(), vec![1]);
        session.select_all();
        assert_eq!(session.selected_positions(), vec![0, 1, 2]);
    }

    #[test]
    fn unknown_position_is_rejected_without_changes() {
        let mut session = session_with("one two three\n\nfour five six");
        session.select(&[0]).unwrap();
        assert_eq!(
            session.select(&[1, 5]),
            Err(ValidationError::UnknownChunk {
                position: 5,
                total: 2
            })
        );
        assert_eq!(session.selected_positions(), vec![0]);
    }

    #[test]
    fn cancel_handle_tracks_the_armed_token() {
        let mut session = session_with("one two three");
        let handle = session.cancel_handle();

        // Cancelling while idle does not leak into the next run.
        handle.cancel();
        let token = session.arm_cancellation();
        assert!(!token.is_cancelled());

        session.progress().begin(vec!["Introduction".into()]);
        handle.cancel();
        assert!(token.is_cancelled());
        assert_eq!(session.run_state().status, RunStatus::CancelRequested);

        session.disarm_cancellation();
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn cancel_before_tracking_starts_is_reported() {
        let mut session = session_with("one two three");
        let handle = session.cancel_handle();

        let token = session.arm_cancellation();
        handle.cancel();
        assert_eq!(session.run_state().status, RunStatus::Idle);

        session.begin_tracking(&token, vec!["Introduction".into()]);
        assert!(token.is_cancelled());
        assert_eq!(session.run_state().status, RunStatus::CancelRequested);
    }

    #[test]
    fn begin_run_starts_uncancelled() {
        let mut session = session_with("one two three");
        session.cancel_handle().cancel();

        let token = session.begin_run(vec!["Introduction".into()]);
        assert!(!token.is_cancelled());
        assert_eq!(session.run_state().status, RunStatus::Running);
    }

    #[test]
    fn reset_clears_everything() {
        let mut session = session_with("one two three\n\nfour five six");
        session.select_all();
        session.progress().begin(vec!["a".into()]);
        session.reset();
        assert!(session.document().is_none());
        assert!(session.chunks().is_empty());
        assert_eq!(session.subscribe().borrow().clone(), ProgressSnapshot::default());
    }
}
