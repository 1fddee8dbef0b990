//! Engine facade wiring the components together

use crate::config::EngineConfig;
use crate::document::{DocumentMetadataSource, MetadataSource};
use crate::error::{Result, TransferError};
use crate::identity::{hash_content, IdentityResolver};
use crate::persist::LibraryPersistence;
use crate::remote::RemoteStore;
use crate::selection::SelectionController;
use crate::session::SessionProvider;
use crate::shelf::Bookshelf;
use crate::storage::{book_content_path, StorageProvider};
use crate::transfer::Orchestrator;
use crate::types::{BookFormat, BookHash, BookRecord, Metadata, ReadingProgress};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A running synchronization engine for one library
pub struct SyncEngine {
    config: EngineConfig,
    shelf: Arc<Bookshelf>,
    local: Arc<dyn StorageProvider>,
    resolver: IdentityResolver,
    orchestrator: Arc<Orchestrator>,
    selection: SelectionController,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Build the engine and start its transfer dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: EngineConfig,
        local: Arc<dyn StorageProvider>,
        remote: Arc<dyn RemoteStore>,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self> {
        Self::with_metadata_source(
            config,
            local,
            remote,
            session,
            Arc::new(DocumentMetadataSource::new()),
        )
    }

    /// Like [`SyncEngine::new`], with a custom document collaborator
    pub fn with_metadata_source(
        config: EngineConfig,
        local: Arc<dyn StorageProvider>,
        remote: Arc<dyn RemoteStore>,
        session: Arc<dyn SessionProvider>,
        metadata: Arc<dyn MetadataSource>,
    ) -> Result<Self> {
        config.validate()?;

        let shelf = Arc::new(Bookshelf::new());
        let resolver =
            IdentityResolver::new(Arc::clone(&local), metadata, config.metadata_timeout());
        let orchestrator = Orchestrator::new(
            &config,
            Arc::clone(&shelf),
            Arc::clone(&local),
            remote,
            session,
        );
        let selection = SelectionController::new(Arc::clone(&shelf), Arc::clone(&orchestrator));
        let dispatcher = orchestrator.start();

        info!(
            max_concurrent = config.max_concurrent_transfers,
            "Sync engine started"
        );

        Ok(Self {
            config,
            shelf,
            local,
            resolver,
            orchestrator,
            selection,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shelf(&self) -> &Arc<Bookshelf> {
        &self.shelf
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Add a book to the library from its raw content.
    ///
    /// Stores the content locally under its hash and tries to resolve
    /// display metadata. Metadata failures are logged; the book is still
    /// imported. Re-importing an existing book keeps its record.
    pub async fn import(&self, content: Vec<u8>) -> Result<BookHash> {
        let hash = hash_content(&content)?;
        let format = BookFormat::sniff(&content);
        let path = book_content_path(&hash);

        if !self.local.exists(&path).await? {
            self.local.write(&path, content).await?;
        }

        if self.shelf.contains(&hash) {
            debug!(hash = %hash, "Book already on the shelf");
        } else {
            self.shelf
                .upsert(BookRecord::new(hash.clone()).with_format(format));
            info!(hash = %hash, ?format, "Book imported");
        }

        if let Err(err) = self.refresh_metadata(&hash).await {
            warn!(hash = %hash, error = %err, "Imported book without metadata");
        }

        Ok(hash)
    }

    /// Resolve metadata for a book and copy it onto its record
    pub async fn refresh_metadata(&self, hash: &BookHash) -> Result<Arc<Metadata>> {
        let metadata = self.resolver.fetch_metadata(hash).await?;
        self.shelf.apply_metadata(hash, &metadata);
        Ok(metadata)
    }

    /// Record a new reading position for a book
    pub fn set_reading_progress(
        &self,
        hash: &BookHash,
        location: impl Into<String>,
        percentage: f32,
    ) -> Result<BookRecord> {
        let progress = ReadingProgress::new(location, percentage);
        let record = self
            .shelf
            .update(hash, |record| {
                record.updated_at = Utc::now();
                record.progress = Some(progress);
            })
            .ok_or_else(|| TransferError::UnknownBook(hash.clone()))?;
        Ok(record)
    }

    /// Replace the shelf with persisted records. Returns the book count.
    pub async fn load(&self, persistence: &dyn LibraryPersistence) -> Result<usize> {
        let records = persistence.load().await?;
        let count = records.len();
        self.shelf.replace_all(records);
        info!(books = count, "Library loaded");
        Ok(count)
    }

    pub async fn save(&self, persistence: &dyn LibraryPersistence) -> Result<()> {
        persistence.save(&self.shelf.snapshot()).await?;
        Ok(())
    }

    /// Stop the dispatcher and cancel outstanding transfers, then wait for
    /// the dispatcher to exit
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown();
        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            if let Err(err) = handle.await {
                warn!(error = %err, "Transfer dispatcher ended abnormally");
            }
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.orchestrator.shutdown();
    }
}
