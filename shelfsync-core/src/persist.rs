//! Library index persistence

use crate::error::PersistError;
use crate::types::BookRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Durable home for the book records of one library
#[async_trait]
pub trait LibraryPersistence: Send + Sync {
    /// Load all records in shelf order
    async fn load(&self) -> Result<Vec<BookRecord>, PersistError>;

    /// Replace the stored records
    async fn save(&self, records: &[BookRecord]) -> Result<(), PersistError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryDocument {
    books: Vec<BookRecord>,
}

/// Library index kept as a pretty-printed JSON file
#[derive(Debug, Clone)]
pub struct JsonLibraryFile {
    path: PathBuf,
}

impl JsonLibraryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LibraryPersistence for JsonLibraryFile {
    async fn load(&self) -> Result<Vec<BookRecord>, PersistError> {
        // A library that was never saved is empty
        match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => {
                let document: LibraryDocument = serde_json::from_str(&data)?;
                tracing::debug!(path = %self.path.display(), books = document.books.len(), "Library loaded");
                Ok(document.books)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, records: &[BookRecord]) -> Result<(), PersistError> {
        let document = LibraryDocument {
            books: records.to_vec(),
        };
        let data = serde_json::to_string_pretty(&document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Same directory keeps the rename on one filesystem
        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, &data).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        tracing::debug!(path = %self.path.display(), books = records.len(), "Library saved");
        Ok(())
    }
}
