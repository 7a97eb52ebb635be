//! Run progress: observable snapshots and stderr reporters.
//!
//! Two views of the same run:
//!
//! - [`ProgressTracker`] publishes a [`ProgressSnapshot`] (run state plus one
//!   [`ProgressEntry`] per requested operation) over a `tokio::sync::watch`
//!   channel. Observers hold a receiver and always read a whole, consistent
//!   snapshot; only the orchestrator writes.
//! - [`ProgressReporter`] implementations turn lifecycle events into lines
//!   on **stderr** (human or JSON) so stdout stays parseable for scripts.

use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::models::{ProgressEntry, RunState, RunStatus};

/// Everything an observer may display about the current run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub run: RunState,
    pub entries: Vec<ProgressEntry>,
}

impl ProgressSnapshot {
    pub fn completed(&self) -> usize {
        self.entries.iter().filter(|e| e.completed).count()
    }
}

/// Single-writer publisher of [`ProgressSnapshot`]s.
///
/// Cloning shares the channel; the orchestrator and the session's cancel
/// handle are the only writers.
#[derive(Clone)]
pub struct ProgressTracker {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    pub fn run_state(&self) -> RunState {
        self.tx.borrow().run.clone()
    }

    /// Start a run: one fresh entry per operation, status `Running`.
    pub fn begin(&self, titles: Vec<String>) {
        self.tx.send_modify(|s| {
            s.entries = titles.into_iter().map(ProgressEntry::new).collect();
            s.run = RunState {
                status: RunStatus::Running,
                current_index: None,
                progress_percent: 0,
            };
        });
    }

    pub fn set_current(&self, position: usize) {
        self.tx.send_modify(|s| s.run.current_index = Some(position));
    }

    /// Replace the live display content of an entry.
    pub fn update_content(&self, position: usize, content: &str) {
        self.tx.send_modify(|s| {
            if let Some(entry) = s.entries.get_mut(position) {
                entry.content.clear();
                entry.content.push_str(content);
            }
        });
    }

    /// Store the final content of an entry and mark it completed.
    pub fn complete_entry(&self, position: usize, content: String) {
        self.tx.send_modify(|s| {
            if let Some(entry) = s.entries.get_mut(position) {
                entry.content = content;
                entry.completed = true;
            }
            s.run.progress_percent = percent(s.completed(), s.entries.len());
        });
    }

    /// Record that cancellation was requested. No effect when idle.
    pub fn request_cancel(&self) {
        self.tx.send_modify(|s| {
            if s.run.status == RunStatus::Running {
                s.run.status = RunStatus::CancelRequested;
            }
        });
    }

    /// Return to `Idle`. Entries stay visible until the next run or reset.
    pub fn finish(&self) {
        self.tx.send_modify(|s| {
            s.run.status = RunStatus::Idle;
            s.run.current_index = None;
        });
    }

    /// Drop all entries and run state.
    pub fn reset(&self) {
        self.tx.send_replace(ProgressSnapshot::default());
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done.min(total) * 100) / total) as u8
}

/// A run lifecycle event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    RunStarted {
        operations: usize,
    },
    OperationStarted {
        position: usize,
        total: usize,
        title: String,
    },
    OperationCompleted {
        position: usize,
        total: usize,
        title: String,
        words: usize,
    },
    RunFailed {
        position: usize,
        title: String,
        error: String,
    },
    RunCancelled {
        completed: usize,
        total: usize,
    },
    RunFinished {
        completed: usize,
        total: usize,
    },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "rewrite [2/5] Methods  done (1,204 words)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::RunStarted { operations } => {
                format!("rewrite  starting  {} operations\n", operations)
            }
            ProgressEvent::OperationStarted {
                position,
                total,
                title,
            } => format!("rewrite [{}/{}] {}  ...\n", position + 1, total, title),
            ProgressEvent::OperationCompleted {
                position,
                total,
                title,
                words,
            } => format!(
                "rewrite [{}/{}] {}  done ({} words)\n",
                position + 1,
                total,
                title,
                format_number(*words as u64)
            ),
            ProgressEvent::RunFailed {
                position,
                title,
                error,
            } => format!("rewrite [{}] {}  failed: {}\n", position + 1, title, error),
            ProgressEvent::RunCancelled { completed, total } => {
                format!("rewrite  cancelled after {} / {}\n", completed, total)
            }
            ProgressEvent::RunFinished { completed, total } => {
                format!("rewrite  finished  {} / {}\n", completed, total)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn event_json(event: &ProgressEvent) -> serde_json::Value {
    match event {
        ProgressEvent::RunStarted { operations } => serde_json::json!({
            "event": "run_started",
            "operations": operations
        }),
        ProgressEvent::OperationStarted {
            position,
            total,
            title,
        } => serde_json::json!({
            "event": "operation_started",
            "position": position,
            "total": total,
            "title": title
        }),
        ProgressEvent::OperationCompleted {
            position,
            total,
            title,
            words,
        } => serde_json::json!({
            "event": "operation_completed",
            "position": position,
            "total": total,
            "title": title,
            "words": words
        }),
        ProgressEvent::RunFailed {
            position,
            title,
            error,
        } => serde_json::json!({
            "event": "run_failed",
            "position": position,
            "title": title,
            "error": error
        }),
        ProgressEvent::RunCancelled { completed, total } => serde_json::json!({
            "event": "run_cancelled",
            "completed": completed,
            "total": total
        }),
        ProgressEvent::RunFinished { completed, total } => serde_json::json!({
            "event": "run_finished",
            "completed": completed,
            "total": total
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}': expected human, json, or off",
                other
            )),
        }
    }
}
