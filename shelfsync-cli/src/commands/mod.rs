//! CLI command implementations

mod import;
mod list;
mod remove;
mod transfer;

pub use import::import;
pub use list::list;
pub use remove::remove;
pub use transfer::transfer;

use anyhow::{bail, Context, Result};
use shelfsync_core::persist::JsonLibraryFile;
use shelfsync_core::remote::ObjectRemoteStore;
use shelfsync_core::session::{Session, StaticSession};
use shelfsync_core::storage::LocalStorage;
use shelfsync_core::{BookHash, BookRecord, EngineConfig, SyncEngine};
use std::path::Path;
use std::sync::Arc;

/// Name of the library index inside the library directory
const LIBRARY_FILE: &str = "library.json";

/// Config file looked up in the library directory when none is given
const DEFAULT_CONFIG_FILE: &str = "shelfsync.toml";

/// An opened library: the engine plus where its index lives
pub struct Workspace {
    pub engine: SyncEngine,
    library_file: JsonLibraryFile,
}

impl Workspace {
    pub async fn open(
        library: &Path,
        remote: &Path,
        token: Option<&str>,
        config: Option<&Path>,
    ) -> Result<Self> {
        let config_path = config
            .map(Path::to_path_buf)
            .unwrap_or_else(|| library.join(DEFAULT_CONFIG_FILE));
        let config = EngineConfig::load(&config_path)
            .with_context(|| format!("Failed to load config: {}", config_path.display()))?;

        let session = match token {
            Some(token) if !token.is_empty() => {
                StaticSession::signed_in(Session::new("cli", token))
            }
            _ => StaticSession::signed_out(),
        };

        let remote_store =
            ObjectRemoteStore::new(Arc::new(LocalStorage::new(remote)), config.chunk_size);

        let engine = SyncEngine::new(
            config,
            Arc::new(LocalStorage::new(library)),
            Arc::new(remote_store),
            Arc::new(session),
        )?;

        let library_file = JsonLibraryFile::new(library.join(LIBRARY_FILE));
        let count = engine
            .load(&library_file)
            .await
            .with_context(|| format!("Failed to load library: {}", library_file.path().display()))?;
        tracing::debug!(books = count, "Opened library");

        Ok(Self {
            engine,
            library_file,
        })
    }

    /// Persist the library index and stop the engine
    pub async fn close(self) -> Result<()> {
        self.engine
            .save(&self.library_file)
            .await
            .context("Failed to save library")?;
        self.engine.shutdown().await;
        Ok(())
    }

    /// Resolve full hashes or unique hash prefixes to books on the shelf
    pub fn resolve(&self, inputs: &[String]) -> Result<Vec<BookHash>> {
        let records = self.engine.shelf().list_flat();
        inputs
            .iter()
            .map(|input| resolve_one(&records, input))
            .collect()
    }
}

fn resolve_one(records: &[BookRecord], input: &str) -> Result<BookHash> {
    let needle = input.trim().to_ascii_lowercase();
    if needle.is_empty() {
        bail!("Empty book hash");
    }

    let matches: Vec<&BookRecord> = records
        .iter()
        .filter(|r| r.hash.as_str().starts_with(&needle))
        .collect();

    match matches.as_slice() {
        [record] => Ok(record.hash.clone()),
        [] => bail!("No book matches '{}'", input),
        _ => bail!("'{}' is ambiguous ({} books match)", input, matches.len()),
    }
}

/// One-word transfer status for display
pub(crate) fn status(record: &BookRecord) -> &'static str {
    match (record.uploaded_at.is_some(), record.downloaded_at.is_some()) {
        (true, true) => "synced",
        (true, false) => "uploaded",
        (false, true) => "downloaded",
        (false, false) => "local",
    }
}
