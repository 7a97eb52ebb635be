//! # redraft CLI
//!
//! The `redraft` binary chunks, cleans up and rewrites long documents, and
//! serves the same pipeline over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! redraft --config ./config/redraft.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `redraft chunk <file>` | Show how a document is split into chunks |
//! | `redraft normalize <file>` | Clean up text the way model output is cleaned |
//! | `redraft rewrite <file>` | Rewrite selected chunks through the backend |
//! | `redraft serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Inspect chunk boundaries as JSON
//! redraft chunk essay.md --json
//!
//! # Rewrite chunks 1, 3 and 4 with streaming, writing to a file
//! redraft rewrite essay.md --instructions "Make it more formal" \
//!     --select 1,3-4 --stream --output essay.formal.md
//!
//! # Rewrite everything and add two new sections at the end
//! redraft rewrite essay.md --instructions "Tighten" \
//!     --append 2 --append-instructions "Add a conclusion and next steps"
//! ```
//!
//! `chunk` and `normalize` work without a config file. Progress and logs go
//! to stderr; results go to stdout unless `--output` is given. Ctrl-C during
//! `rewrite` stops the run after the chunk in flight.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use redraft::chunk::chunk_document;
use redraft::completion::create_client;
use redraft::config::{self, Config};
use redraft::export::{ExportSink, FileExport, StdoutExport};
use redraft::logging::init_tracing;
use redraft::models::{ChunkSummary, Document, ModelVariant};
use redraft::normalize::normalize;
use redraft::orchestrator::{AppendRequest, Orchestrator, RunOptions, RunOutcome, RunRequest};
use redraft::progress::ProgressMode;
use redraft::server;
use redraft::session::Session;
use redraft::store::{DocumentStore, FsDocumentStore};

/// redraft — rewrite long documents chunk by chunk with a language model.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/redraft.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "redraft",
    about = "redraft — rewrite long documents chunk by chunk with a language model",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/redraft.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a document into chunks and print them.
    ///
    /// Reads FILE, or the document DOCUMENT_ID from `[documents].root`.
    Chunk {
        /// Document to chunk (`-` for stdin).
        #[arg(required_unless_present = "document_id", conflicts_with = "document_id")]
        file: Option<PathBuf>,

        /// Load the document from the document store instead of a file.
        #[arg(long)]
        document_id: Option<String>,

        /// Print chunks as a JSON array instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Normalize text and print the result.
    Normalize {
        /// Text file to normalize (`-` for stdin).
        file: PathBuf,
    },

    /// Rewrite a document chunk by chunk.
    ///
    /// Chunks are sent to the backend one at a time, in document order.
    /// Each result is normalized and held to the minimum length ratio
    /// before the document is reassembled.
    Rewrite {
        /// Document to rewrite (`-` for stdin).
        file: PathBuf,

        /// What the model should do with each chunk.
        #[arg(long, short)]
        instructions: String,

        /// Backend model: claude, gpt4, perplexity, or deepseek.
        #[arg(long, default_value = "claude")]
        model: ModelVariant,

        /// Chunks to rewrite, 1-based: `1,3-4`. Defaults to all chunks.
        #[arg(long)]
        select: Option<String>,

        /// Stream each chunk's rewrite instead of waiting for whole responses.
        #[arg(long)]
        stream: bool,

        /// Extra context passed with every request.
        #[arg(long)]
        context: Option<String>,

        /// Generate this many new sections after the rewritten text.
        #[arg(long, requires = "append_instructions")]
        append: Option<usize>,

        /// Instructions for generated sections.
        #[arg(long)]
        append_instructions: Option<String>,

        /// Seconds to wait between chunks (overrides `[run].inter_chunk_delay_secs`).
        #[arg(long)]
        delay_secs: Option<u64>,

        /// Write the result here (plus a `.meta.json` sidecar) instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Progress on stderr: human, json, or off. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.command {
        // Commands that don't need a backend run without a config file.
        Commands::Chunk { .. } | Commands::Normalize { .. } if !cli.config.exists() => {
            Config::minimal()
        }
        _ => config::load_config(&cli.config)?,
    };
    init_tracing(&cfg.log);

    match cli.command {
        Commands::Chunk {
            file,
            document_id,
            json,
        } => {
            let document = match (file, document_id) {
                (Some(path), _) => read_document(&path)?,
                (None, Some(id)) => FsDocumentStore::new(&cfg.documents.root)
                    .fetch(&id)
                    .await?,
                (None, None) => anyhow::bail!("a file or --document-id is required"),
            };
            run_chunk(&cfg, &document, json)?;
        }
        Commands::Normalize { file } => {
            let document = read_document(&file)?;
            println!("{}", normalize(&document.text));
        }
        Commands::Rewrite {
            file,
            instructions,
            model,
            select,
            stream,
            context,
            append,
            append_instructions,
            delay_secs,
            output,
            progress,
        } => {
            let document = read_document(&file)?;
            let request = RunRequest {
                instructions,
                model,
                context,
                stream,
                append: append.map(|count| AppendRequest {
                    instructions: append_instructions.unwrap_or_default(),
                    count,
                }),
            };
            let mut options = RunOptions::from_config(&cfg.run);
            if let Some(secs) = delay_secs {
                options.inter_chunk_delay = (secs > 0).then(|| Duration::from_secs(secs));
            }
            let sink: Box<dyn ExportSink> = match output {
                Some(path) => Box::new(FileExport::new(path)),
                None => Box::new(StdoutExport),
            };
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);

            run_rewrite(
                &cfg,
                document,
                select.as_deref(),
                request,
                options,
                progress,
                sink.as_ref(),
            )
            .await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

/// Read a document from a file, or from stdin when `path` is `-`. The id is
/// the file name, so it matches what the document store would use.
fn read_document(path: &Path) -> Result<Document> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(Document::new(text));
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let id = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Document::with_id(id, text))
}

fn run_chunk(cfg: &Config, document: &Document, json: bool) -> Result<()> {
    cfg.chunking.validate()?;
    let chunks = chunk_document(&document.text, &cfg.chunking);

    if json {
        let summaries: Vec<ChunkSummary> = chunks.iter().map(ChunkSummary::from).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!("{}: {} chunks", document.id, chunks.len());
    for chunk in &chunks {
        println!(
            "{:>4}  {:>6} words  {:>8}..{:<8}  {}",
            chunk.index + 1,
            chunk.words,
            chunk.start_offset,
            chunk.end_offset,
            chunk.title
        );
    }
    Ok(())
}

async fn run_rewrite(
    cfg: &Config,
    document: Document,
    select: Option<&str>,
    request: RunRequest,
    options: RunOptions,
    progress: ProgressMode,
    sink: &dyn ExportSink,
) -> Result<()> {
    let mut session = Session::new(cfg.chunking.clone());
    let total = session.load(document).len();
    match select {
        Some(spec) => {
            let positions = parse_selection(spec, total).map_err(anyhow::Error::msg)?;
            session.select(&positions)?;
        }
        None => session.select_all(),
    }

    let client = create_client(cfg)?;
    let orchestrator = Orchestrator::new(client, options).with_reporter(progress.reporter());

    let cancel = session.cancel_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current chunk...");
            cancel.cancel();
        }
    });

    let outcome = orchestrator.start_run(&mut session, request).await;
    ctrl_c.abort();

    let outcome = outcome?;
    let run_id = outcome.run_id().to_string();
    match outcome {
        RunOutcome::Completed(output) => sink.deliver(&output),
        RunOutcome::Cancelled {
            completed, total, ..
        } => anyhow::bail!(
            "run {} cancelled after {} of {} operations",
            run_id,
            completed,
            total
        ),
        RunOutcome::Failed {
            title,
            error,
            completed,
            ..
        } => Err(anyhow::Error::new(error).context(format!(
            "run {} failed at '{}' ({} operations completed)",
            run_id, title, completed
        ))),
    }
}

/// Parse a 1-based selection such as `1,3-4` into sorted 0-based positions.
fn parse_selection(spec: &str, total: usize) -> Result<Vec<usize>, String> {
    let mut positions = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (start, end) = match part.split_once('-') {
            Some((a, b)) => (parse_position(a)?, parse_position(b)?),
            None => {
                let n = parse_position(part)?;
                (n, n)
            }
        };
        if start > end {
            return Err(format!("invalid range '{}'", part));
        }
        if end > total {
            return Err(format!(
                "chunk {} does not exist (document has {} chunks)",
                end, total
            ));
        }
        positions.extend(start - 1..end);
    }
    positions.sort_unstable();
    positions.dedup();
    Ok(positions)
}

fn parse_position(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("invalid chunk number '{}': expected 1 or more", s.trim())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_is_one_based_and_sorted() {
        assert_eq!(parse_selection("1,3-4", 5), Ok(vec![0, 2, 3]));
        assert_eq!(parse_selection("4, 2,2-3", 5), Ok(vec![1, 2, 3]));
        assert_eq!(parse_selection("", 5), Ok(vec![]));
    }

    #[test]
    fn selection_rejects_bad_input() {
        assert!(parse_selection("0", 5).is_err());
        assert!(parse_selection("3-1", 5).is_err());
        assert!(parse_selection("6", 5).is_err());
        assert!(parse_selection("a-b", 5).is_err());
    }

    #[test]
    fn cli_parses_rewrite_flags() {
        let cli = Cli::try_parse_from([
            "redraft",
            "rewrite",
            "doc.md",
            "--instructions",
            "Tighten",
            "--model",
            "gpt4",
            "--select",
            "1-2",
            "--append",
            "2",
            "--append-instructions",
            "Conclude",
            "--progress",
            "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Rewrite {
                model,
                append,
                progress,
                ..
            } => {
                assert_eq!(model, ModelVariant::Gpt4);
                assert_eq!(append, Some(2));
                assert_eq!(progress, Some(ProgressMode::Json));
            }
            _ => panic!("expected rewrite"),
        }
    }

    #[test]
    fn append_requires_instructions() {
        assert!(Cli::try_parse_from([
            "redraft",
            "rewrite",
            "doc.md",
            "-i",
            "Tighten",
            "--append",
            "1"
        ])
        .is_err());
    }
}
