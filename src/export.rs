//! Delivery of assembled run output.
//!
//! [`FileExport`] writes the assembled text to a file and the run metadata
//! to a `.meta.json` sidecar next to it; [`StdoutExport`] prints the text
//! for piping and leaves metadata to the log.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::orchestrator::AssembledOutput;

pub trait ExportSink: Send + Sync {
    fn deliver(&self, output: &AssembledOutput) -> Result<()>;
}

pub struct FileExport {
    path: PathBuf,
}

impl FileExport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `report.txt` → `report.meta.json`.
    pub fn metadata_path(&self) -> PathBuf {
        self.path.with_extension("meta.json")
    }
}

impl ExportSink for FileExport {
    fn deliver(&self, output: &AssembledOutput) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        write_file(&self.path, &output.text)?;
        let meta = serde_json::to_string_pretty(&output.metadata)?;
        write_file(&self.metadata_path(), &meta)?;

        eprintln!(
            "Exported {} chunks and {} new sections to {}",
            output.metadata.chunks.len(),
            output.metadata.generated_sections,
            self.path.display()
        );
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

pub struct StdoutExport;

impl ExportSink for StdoutExport {
    fn deliver(&self, output: &AssembledOutput) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", output.text)?;
        stdout.flush()?;
        tracing::info!(
            run_id = %output.metadata.run_id,
            chunks = output.metadata.chunks.len(),
            "output written to stdout"
        );
        Ok(())
    }
}
