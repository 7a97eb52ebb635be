//! Document store: resolve a document id to its text.
//!
//! [`FsDocumentStore`] maps ids to files under a root directory. Ids are
//! plain file names (`[A-Za-z0-9._-]`, not starting with `.`); an id without
//! an extension also matches `<id>.txt` and `<id>.md`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::Document;

/// Extensions tried, in order, for an id given without one.
const EXTENSIONS: [&str; 2] = ["txt", "md"];

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Document, StoreError>;
}

pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn candidates(&self, id: &str) -> Vec<PathBuf> {
        let mut paths = vec![self.root.join(id)];
        if Path::new(id).extension().is_none() {
            paths.extend(
                EXTENSIONS
                    .iter()
                    .map(|ext| self.root.join(format!("{}.{}", id, ext))),
            );
        }
        paths
    }
}

fn validate_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn fetch(&self, id: &str) -> Result<Document, StoreError> {
        validate_id(id)?;

        for path in self.candidates(id) {
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    tracing::debug!(id, path = %path.display(), "document loaded");
                    return Ok(Document::with_id(id, text));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(StoreError::Io {
                        id: id.to_string(),
                        source,
                    })
                }
            }
        }

        Err(StoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_plain_file_names() {
        assert!(validate_id("report-2024_v2.md").is_ok());
        for bad in ["", "../etc/passwd", "a/b", ".hidden", "a\\b", "sp ace"] {
            assert!(
                matches!(validate_id(bad), Err(StoreError::InvalidId(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[tokio::test]
    async fn fetches_by_id_with_extension_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("essay.md"), "# Essay\n\nBody.").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "Notes.").unwrap();
        let store = FsDocumentStore::new(dir.path());

        let essay = store.fetch("essay").await.unwrap();
        assert_eq!(essay.id, "essay");
        assert_eq!(essay.text, "# Essay\n\nBody.");
        assert_eq!(store.fetch("notes.txt").await.unwrap().text, "Notes.");
    }

    #[tokio::test]
    async fn missing_and_invalid_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());
        assert!(matches!(
            store.fetch("absent").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.fetch("../secret").await,
            Err(StoreError::InvalidId(_))
        ));
    }
}
