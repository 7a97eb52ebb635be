//! Rewrite run state machine.
//!
//! # Chunk lifecycle
//!
//! ```text
//! Pending ──► Streaming ──► Complete
//!    │            │
//!    │            └──► Failed        (backend error, stream error, timeout)
//!    └──► Cancelled                  (cancellation before dispatch)
//! ```
//!
//! # Run
//!
//! 1. Validate the request; nothing is touched on error.
//! 2. Reset the selected chunks and create one progress entry per operation
//!    (every selected chunk, then every requested new section).
//! 3. Dispatch operations one at a time in document order. Before each
//!    dispatch, and during the optional inter-chunk delay, the cancellation
//!    token is checked.
//! 4. Each rewrite is normalized, then length-enforced, then stored.
//! 5. The first backend error ends the run: the chunk is marked `Failed`,
//!    later chunks stay `Pending`, completed chunks keep their results.
//! 6. On success, the results are assembled in document order.
//!
//! At most one backend request is in flight at any time. A streaming read
//! that has started is not interrupted by cancellation, so cancellation
//! latency is bounded by one chunk.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::chunk::word_count;
use crate::completion::{read_frames, CompletionClient};
use crate::config::RunConfig;
use crate::error::{BackendError, ValidationError};
use crate::length::{Enforced, LengthEnforcer, LengthShortfall};
use crate::models::{ChunkState, ModelVariant, RewriteRequest, RewriteResult, RunStatus};
use crate::normalize::normalize;
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter, ProgressTracker};
use crate::session::Session;

/// Words of finalized text passed as context when generating new sections.
const APPEND_CONTEXT_WORDS: usize = 600;

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub inter_chunk_delay: Option<Duration>,
    pub chunk_timeout: Option<Duration>,
    pub min_length_ratio: f64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&RunConfig::default())
    }
}

impl RunOptions {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            inter_chunk_delay: config.inter_chunk_delay(),
            chunk_timeout: config.chunk_timeout(),
            min_length_ratio: config.min_length_ratio,
        }
    }
}

/// What a run should do.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub instructions: String,
    pub model: ModelVariant,
    pub context: Option<String>,
    pub stream: bool,
    pub append: Option<AppendRequest>,
}

/// Generate `count` new sections after the rewritten ones.
#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub instructions: String,
    pub count: usize,
}

/// Word counts before and after one chunk's rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkDelta {
    pub index: usize,
    pub chunk_id: String,
    pub title: String,
    pub words_before: usize,
    pub words_after: usize,
    pub expansion_attempted: bool,
    pub shortfall: Option<LengthShortfall>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub document_id: Option<String>,
    pub model: ModelVariant,
    pub instructions: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub chunks: Vec<ChunkDelta>,
    pub generated_sections: usize,
}

/// Final text of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledOutput {
    /// Rewritten chunks in document order, then generated sections,
    /// separated by blank lines.
    pub text: String,
    pub generated: Vec<String>,
    pub metadata: RunMetadata,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(AssembledOutput),
    Cancelled {
        run_id: String,
        completed: usize,
        total: usize,
    },
    Failed {
        run_id: String,
        /// Operation position within the run.
        position: usize,
        /// `None` when a generated section failed.
        chunk_id: Option<String>,
        title: String,
        error: BackendError,
        completed: usize,
    },
}

impl RunOutcome {
    pub fn run_id(&self) -> &str {
        match self {
            RunOutcome::Completed(output) => &output.metadata.run_id,
            RunOutcome::Cancelled { run_id, .. } | RunOutcome::Failed { run_id, .. } => run_id,
        }
    }
}

/// Drives rewrite runs against one completion client.
pub struct Orchestrator<C: CompletionClient + ?Sized> {
    client: Arc<C>,
    enforcer: LengthEnforcer,
    options: RunOptions,
    reporter: Arc<dyn ProgressReporter>,
}

/// Per-run context shared by every operation.
struct RunContext {
    run_id: String,
    token: CancellationToken,
    tracker: ProgressTracker,
    total_ops: usize,
    completed: usize,
}

/// How an operation loop ended early.
enum Stop {
    Cancelled,
    Failed {
        position: usize,
        chunk_id: Option<String>,
        title: String,
        error: BackendError,
    },
}

impl<C: CompletionClient + ?Sized> Orchestrator<C> {
    pub fn new(client: Arc<C>, options: RunOptions) -> Self {
        Self {
            client,
            enforcer: LengthEnforcer::new(options.min_length_ratio),
            options,
            reporter: Arc::new(NoProgress),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Execute a run over the session's selected chunks.
    ///
    /// Returns `Err` only for invalid requests, before any state changes.
    /// Backend failures and cancellation are reported through [`RunOutcome`].
    pub async fn start_run(
        &self,
        session: &mut Session,
        request: RunRequest,
    ) -> Result<RunOutcome, ValidationError> {
        let selected = validate(session, &request)?;
        let append_count = request.append.as_ref().map_or(0, |a| a.count);

        for &i in &selected {
            session.chunks_mut()[i].reset();
        }

        let mut titles: Vec<String> = selected
            .iter()
            .map(|&i| session.chunks()[i].title.clone())
            .collect();
        titles.extend((1..=append_count).map(|n| format!("New Section {}", n)));

        let total_ops = titles.len();
        let mut ctx = RunContext {
            run_id: Uuid::new_v4().to_string(),
            token: session.begin_run(titles),
            tracker: session.progress().clone(),
            total_ops,
            completed: 0,
        };
        self.reporter.report(ProgressEvent::RunStarted {
            operations: ctx.total_ops,
        });

        let span = tracing::info_span!(
            "run",
            run_id = %ctx.run_id,
            model = %request.model,
            operations = ctx.total_ops
        );
        let outcome = self
            .execute(session, &request, &selected, &mut ctx)
            .instrument(span)
            .await;

        ctx.tracker.finish();
        session.disarm_cancellation();
        Ok(outcome)
    }

    async fn execute(
        &self,
        session: &mut Session,
        request: &RunRequest,
        selected: &[usize],
        ctx: &mut RunContext,
    ) -> RunOutcome {
        let started_at = Utc::now();
        tracing::info!("run started");

        let deltas = match self.rewrite_selected(session, request, selected, ctx).await {
            Ok(deltas) => deltas,
            Err(stop) => return self.stopped(session, selected, ctx, stop),
        };

        let generated = match &request.append {
            Some(append) => match self.append_sections(session, request, append, selected, ctx).await {
                Ok(generated) => generated,
                Err(stop) => return self.stopped(session, selected, ctx, stop),
            },
            None => Vec::new(),
        };

        let text = session
            .chunks()
            .iter()
            .filter(|c| c.selected)
            .filter_map(|c| c.rewritten.as_deref())
            .chain(generated.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n\n");

        self.reporter.report(ProgressEvent::RunFinished {
            completed: ctx.completed,
            total: ctx.total_ops,
        });
        tracing::info!(words = word_count(&text), "run finished");

        RunOutcome::Completed(AssembledOutput {
            text,
            metadata: RunMetadata {
                run_id: ctx.run_id.clone(),
                document_id: session.document().map(|d| d.id.clone()),
                model: request.model,
                instructions: request.instructions.clone(),
                started_at,
                finished_at: Utc::now(),
                chunks: deltas,
                generated_sections: generated.len(),
            },
            generated,
        })
    }

    async fn rewrite_selected(
        &self,
        session: &mut Session,
        request: &RunRequest,
        selected: &[usize],
        ctx: &mut RunContext,
    ) -> Result<Vec<ChunkDelta>, Stop> {
        let total_chunks = session.chunks().len();
        let mut deltas = Vec::with_capacity(selected.len());

        for (position, &index) in selected.iter().enumerate() {
            self.checkpoint(position, ctx).await?;

            let chunk = &mut session.chunks_mut()[index];
            chunk.state = ChunkState::Streaming;
            let original = chunk.content.clone();
            let chunk_id = chunk.id.clone();
            let title = chunk.title.clone();

            self.begin_operation(position, &title, ctx);
            let rewrite = RewriteRequest {
                content: original.clone(),
                instructions: request.instructions.clone(),
                model: request.model,
                chat_context: request.context.clone(),
                chunk_index: index,
                total_chunks,
                stream: request.stream,
            };

            let result = match self.dispatch(&rewrite, &ctx.tracker, position).await {
                Ok(result) => result,
                Err(error) => {
                    session.chunks_mut()[index].state = ChunkState::Failed;
                    return Err(Stop::Failed {
                        position,
                        chunk_id: Some(chunk_id),
                        title,
                        error,
                    });
                }
            };

            let enforced = self
                .enforce_length(&rewrite, &original, normalize(&result.content))
                .await;
            let words_after = word_count(&enforced.text);

            let chunk = &mut session.chunks_mut()[index];
            chunk.rewritten = Some(enforced.text.clone());
            chunk.explanation = result.explanation;
            chunk.state = ChunkState::Complete;

            deltas.push(ChunkDelta {
                index,
                chunk_id,
                title: title.clone(),
                words_before: word_count(&original),
                words_after,
                expansion_attempted: enforced.expansion_attempted,
                shortfall: enforced.shortfall,
            });
            self.finish_operation(position, title, enforced.text, ctx);
        }

        Ok(deltas)
    }

    async fn append_sections(
        &self,
        session: &Session,
        request: &RunRequest,
        append: &AppendRequest,
        selected: &[usize],
        ctx: &mut RunContext,
    ) -> Result<Vec<String>, Stop> {
        let total_chunks = session.chunks().len();
        let mut finalized: String = session
            .chunks()
            .iter()
            .map(|c| c.rewritten.as_deref().unwrap_or(&c.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let mut generated = Vec::with_capacity(append.count);

        for n in 0..append.count {
            let position = selected.len() + n;
            self.checkpoint(position, ctx).await?;

            let title = format!("New Section {}", n + 1);
            self.begin_operation(position, &title, ctx);
            let section = RewriteRequest {
                content: tail_words(&finalized, APPEND_CONTEXT_WORDS).to_string(),
                instructions: format!(
                    "Write a new section that continues the document from where this \
                     excerpt ends. Return only the new section. {}",
                    append.instructions.trim()
                ),
                model: request.model,
                chat_context: request.context.clone(),
                chunk_index: total_chunks + n,
                total_chunks: total_chunks + append.count,
                stream: request.stream,
            };

            let text = match self.dispatch(&section, &ctx.tracker, position).await {
                Ok(result) => normalize(&result.content),
                Err(error) => {
                    return Err(Stop::Failed {
                        position,
                        chunk_id: None,
                        title,
                        error,
                    })
                }
            };

            finalized.push_str("\n\n");
            finalized.push_str(&text);
            generated.push(text.clone());
            self.finish_operation(position, title, text, ctx);
        }

        Ok(generated)
    }

    /// Cancellation point before dispatching operation `position`. Waits out
    /// the inter-chunk delay first, unless cancellation arrives during it.
    async fn checkpoint(&self, position: usize, ctx: &RunContext) -> Result<(), Stop> {
        if position > 0 {
            if let Some(delay) = self.options.inter_chunk_delay {
                tracing::debug!(delay_secs = delay.as_secs(), "waiting before next dispatch");
                tokio::select! {
                    _ = ctx.token.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        if ctx.token.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        Ok(())
    }

    /// One backend exchange, bounded by the per-chunk timeout.
    async fn dispatch(
        &self,
        request: &RewriteRequest,
        tracker: &ProgressTracker,
        position: usize,
    ) -> Result<RewriteResult, BackendError> {
        let exchange = async {
            if request.stream {
                match self.client.stream(request).await {
                    Ok(frames) => {
                        read_frames(frames, |snapshot| tracker.update_content(position, snapshot))
                            .await
                    }
                    Err(e) => Err(e),
                }
            } else {
                self.client.complete(request).await
            }
        };

        match self.options.chunk_timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| BackendError::Timeout(limit))?,
            None => exchange.await,
        }
    }

    /// Length policy, with the expansion request bounded by the per-chunk
    /// timeout like any other exchange.
    async fn enforce_length(
        &self,
        request: &RewriteRequest,
        original: &str,
        candidate: String,
    ) -> Enforced {
        let Some(limit) = self.options.chunk_timeout else {
            return self
                .enforcer
                .enforce(&*self.client, request, original, candidate)
                .await;
        };

        let fallback = candidate.clone();
        let enforce = self
            .enforcer
            .enforce(&*self.client, request, original, candidate);
        match tokio::time::timeout(limit, enforce).await {
            Ok(enforced) => enforced,
            Err(_) => {
                tracing::warn!(
                    chunk = request.chunk_index,
                    "expansion timed out; keeping shorter rewrite"
                );
                let required = self.enforcer.required_words(original);
                let actual = word_count(&fallback);
                Enforced {
                    text: fallback,
                    expansion_attempted: true,
                    shortfall: (actual < required).then_some(LengthShortfall { required, actual }),
                }
            }
        }
    }

    fn begin_operation(&self, position: usize, title: &str, ctx: &RunContext) {
        ctx.tracker.set_current(position);
        tracing::info!(position, title, "dispatching");
        self.reporter.report(ProgressEvent::OperationStarted {
            position,
            total: ctx.total_ops,
            title: title.to_string(),
        });
    }

    fn finish_operation(&self, position: usize, title: String, text: String, ctx: &mut RunContext) {
        let words = word_count(&text);
        ctx.tracker.complete_entry(position, text);
        ctx.completed += 1;
        tracing::info!(position, words, "operation complete");
        self.reporter.report(ProgressEvent::OperationCompleted {
            position,
            total: ctx.total_ops,
            title,
            words,
        });
    }

    fn stopped(
        &self,
        session: &mut Session,
        selected: &[usize],
        ctx: &RunContext,
        stop: Stop,
    ) -> RunOutcome {
        match stop {
            Stop::Cancelled => {
                for &i in selected {
                    let chunk = &mut session.chunks_mut()[i];
                    if chunk.state == ChunkState::Pending {
                        chunk.state = ChunkState::Cancelled;
                    }
                }
                tracing::info!(completed = ctx.completed, "run cancelled");
                self.reporter.report(ProgressEvent::RunCancelled {
                    completed: ctx.completed,
                    total: ctx.total_ops,
                });
                RunOutcome::Cancelled {
                    run_id: ctx.run_id.clone(),
                    completed: ctx.completed,
                    total: ctx.total_ops,
                }
            }
            Stop::Failed {
                position,
                chunk_id,
                title,
                error,
            } => {
                tracing::error!(position, title = %title, error = %error, "run failed");
                self.reporter.report(ProgressEvent::RunFailed {
                    position,
                    title: title.clone(),
                    error: error.to_string(),
                });
                RunOutcome::Failed {
                    run_id: ctx.run_id.clone(),
                    position,
                    chunk_id,
                    title,
                    error,
                    completed: ctx.completed,
                }
            }
        }
    }
}

/// Check a request against the session. Returns the selected positions.
fn validate(session: &Session, request: &RunRequest) -> Result<Vec<usize>, ValidationError> {
    if session.run_state().status != RunStatus::Idle {
        return Err(ValidationError::RunActive);
    }

    if let Some(append) = &request.append {
        if append.count == 0 || append.instructions.trim().is_empty() {
            return Err(ValidationError::EmptyAppend);
        }
    }

    let selected = session.selected_positions();
    if selected.is_empty() && request.append.is_none() {
        return Err(ValidationError::NothingSelected);
    }
    if !selected.is_empty() && request.instructions.trim().is_empty() {
        return Err(ValidationError::MissingInstructions);
    }
    Ok(selected)
}

/// The last `n` words of `text`, as a slice of the original.
fn tail_words(text: &str, n: usize) -> &str {
    let trimmed = text.trim_end();
    let mut seen = 0;
    let mut in_word = false;
    for (i, c) in trimmed.char_indices().rev() {
        if c.is_whitespace() {
            if in_word {
                seen += 1;
                if seen == n {
                    return &trimmed[i + c.len_utf8()..];
                }
            }
            in_word = false;
        } else {
            in_word = true;
        }
    }
    trimmed.trim_start()
}
