//! Remote store over any [`StorageProvider`]
//!
//! Layout per book:
//!
//! ```text
//! books/<hash>/chunk-000000 ... chunk-NNNNNN
//! books/<hash>/manifest.json     written last; its presence means "uploaded"
//! books/<hash>/progress.json     reading-progress sidecar
//! ```
//!
//! An interrupted upload never writes a manifest, so it never becomes visible
//! to `exists` or `get`. Its chunks are deleted when the upload fails, and any
//! survivors past the new chunk count are swept by the next `put`.

use super::{ProgressSink, RemoteObject, RemoteResult, RemoteStore};
use crate::error::{RemoteError, StorageError};
use crate::storage::StorageProvider;
use crate::types::{BookHash, ReadingProgress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Describes a committed upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub hash: BookHash,
    pub size: u64,
    pub chunks: usize,
    pub chunk_size: usize,
    pub uploaded_at: DateTime<Utc>,
}

/// Chunked, manifest-committed remote store
pub struct ObjectRemoteStore {
    storage: Arc<dyn StorageProvider>,
    chunk_size: usize,
}

impl ObjectRemoteStore {
    pub fn new(storage: Arc<dyn StorageProvider>, chunk_size: usize) -> Self {
        Self {
            storage,
            chunk_size: chunk_size.max(1),
        }
    }

    fn chunk_path(hash: &BookHash, index: usize) -> String {
        format!("books/{}/chunk-{:06}", hash, index)
    }

    fn manifest_path(hash: &BookHash) -> String {
        format!("books/{}/manifest.json", hash)
    }

    fn progress_path(hash: &BookHash) -> String {
        format!("books/{}/progress.json", hash)
    }

    fn chunk_index(key: &str) -> Option<usize> {
        key.rsplit('/').next()?.strip_prefix("chunk-")?.parse().ok()
    }

    /// Delete chunks of `hash` numbered `from` and up. Returns how many went.
    async fn sweep_chunks(&self, hash: &BookHash, from: usize) -> RemoteResult<usize> {
        let prefix = format!("books/{}", hash);
        let keys = match self.storage.list(&prefix).await {
            Ok(keys) => keys,
            Err(StorageError::NotFound(_)) => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut swept = 0;
        for index in keys.iter().filter_map(|key| Self::chunk_index(key)) {
            if index >= from {
                self.storage.delete(&Self::chunk_path(hash, index)).await?;
                swept += 1;
            }
        }
        if swept > 0 {
            tracing::debug!(hash = %hash, swept, "Swept orphaned chunks");
        }
        Ok(swept)
    }

    async fn write_chunks(
        &self,
        hash: &BookHash,
        content: &[u8],
        total: usize,
        sink: &ProgressSink,
    ) -> RemoteResult<()> {
        for (index, chunk) in content.chunks(self.chunk_size).enumerate() {
            sink.checkpoint()?;
            self.storage
                .write(&Self::chunk_path(hash, index), chunk.to_vec())
                .await?;
            // Leave the last percent for the manifest commit
            sink.report_fraction(index + 1, total, 99);
        }
        sink.checkpoint()
    }

    /// Read the manifest, `None` if the book was never committed
    pub async fn manifest(&self, hash: &BookHash) -> RemoteResult<Option<Manifest>> {
        let path = Self::manifest_path(hash);
        if !self.storage.exists(&path).await? {
            return Ok(None);
        }
        let data = self.storage.read(&path).await?;
        let manifest = serde_json::from_slice(&data)
            .map_err(|e| RemoteError::Integrity(format!("corrupt manifest for {}: {}", hash, e)))?;
        Ok(Some(manifest))
    }
}

#[async_trait]
impl RemoteStore for ObjectRemoteStore {
    async fn put(
        &self,
        hash: &BookHash,
        content: Vec<u8>,
        sink: &ProgressSink,
    ) -> RemoteResult<()> {
        sink.checkpoint()?;
        sink.report(0);

        let total = content.len().div_ceil(self.chunk_size);
        self.sweep_chunks(hash, total).await?;

        if let Err(err) = self.write_chunks(hash, &content, total, sink).await {
            // A committed manifest still references its chunks
            if !self.exists(hash).await.unwrap_or(true) {
                if let Err(cleanup) = self.sweep_chunks(hash, 0).await {
                    tracing::warn!(hash = %hash, error = %cleanup, "Failed to clean up partial upload");
                }
            }
            return Err(err);
        }

        let manifest = Manifest {
            hash: hash.clone(),
            size: content.len() as u64,
            chunks: total,
            chunk_size: self.chunk_size,
            uploaded_at: Utc::now(),
        };
        let data = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| RemoteError::Backend(e.to_string()))?;
        self.storage
            .write(&Self::manifest_path(hash), data)
            .await?;
        sink.report(100);

        tracing::debug!(hash = %hash, chunks = total, size = manifest.size, "Committed remote object");
        Ok(())
    }

    async fn get(&self, hash: &BookHash, sink: &ProgressSink) -> RemoteResult<RemoteObject> {
        sink.checkpoint()?;
        let manifest = self
            .manifest(hash)
            .await?
            .ok_or_else(|| RemoteError::NotFound(hash.to_string()))?;
        sink.report(0);

        let mut content = Vec::with_capacity(manifest.size as usize);
        for index in 0..manifest.chunks {
            sink.checkpoint()?;
            let chunk = self.storage.read(&Self::chunk_path(hash, index)).await?;
            content.extend_from_slice(&chunk);
            sink.report_fraction(index + 1, manifest.chunks, 100);
        }

        if content.len() as u64 != manifest.size {
            return Err(RemoteError::Integrity(format!(
                "{}: expected {} bytes, assembled {}",
                hash,
                manifest.size,
                content.len()
            )));
        }

        Ok(RemoteObject {
            content,
            last_modified: manifest.uploaded_at,
        })
    }

    async fn exists(&self, hash: &BookHash) -> RemoteResult<bool> {
        Ok(self.storage.exists(&Self::manifest_path(hash)).await?)
    }

    async fn last_modified(&self, hash: &BookHash) -> RemoteResult<Option<DateTime<Utc>>> {
        Ok(self.manifest(hash).await?.map(|m| m.uploaded_at))
    }

    async fn put_progress(
        &self,
        hash: &BookHash,
        progress: &ReadingProgress,
    ) -> RemoteResult<()> {
        let data =
            serde_json::to_vec_pretty(progress).map_err(|e| RemoteError::Backend(e.to_string()))?;
        self.storage
            .write(&Self::progress_path(hash), data)
            .await?;
        Ok(())
    }

    async fn get_progress(&self, hash: &BookHash) -> RemoteResult<Option<ReadingProgress>> {
        let path = Self::progress_path(hash);
        if !self.storage.exists(&path).await? {
            return Ok(None);
        }
        let data = self.storage.read(&path).await?;
        let progress = serde_json::from_slice(&data)
            .map_err(|e| RemoteError::Integrity(format!("corrupt progress for {}: {}", hash, e)))?;
        Ok(Some(progress))
    }
}
