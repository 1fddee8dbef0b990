//! Remote store contract
//!
//! The engine does not define a wire protocol. It needs a store that can put
//! and get book content by hash while reporting a monotonically increasing
//! percentage, and that stops at the next chunk boundary once cancelled.

mod object;

pub use object::{Manifest, ObjectRemoteStore};

use crate::error::RemoteError;
use crate::types::{BookHash, ReadingProgress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result type for remote operations
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Book content fetched from the remote store
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    pub content: Vec<u8>,

    /// Last-modified marker used to decide whether a local copy is stale
    pub last_modified: DateTime<Utc>,
}

/// Progress reporting and cancellation handle passed into a transfer
#[derive(Clone)]
pub struct ProgressSink {
    report: Arc<dyn Fn(u8) + Send + Sync>,
    cancel: CancellationToken,
}

impl ProgressSink {
    pub fn new(report: impl Fn(u8) + Send + Sync + 'static, cancel: CancellationToken) -> Self {
        Self {
            report: Arc::new(report),
            cancel,
        }
    }

    /// A sink that discards progress and is never cancelled
    pub fn detached() -> Self {
        Self::new(|_| {}, CancellationToken::new())
    }

    /// Report a percentage in `0..=100`
    pub fn report(&self, percent: u8) {
        (self.report)(percent.min(100));
    }

    /// Report `done` of `total` units, scaled into `0..=ceiling`
    pub fn report_fraction(&self, done: usize, total: usize, ceiling: u8) {
        let percent = if total == 0 {
            ceiling
        } else {
            ((done.min(total) as u64 * ceiling as u64) / total as u64) as u8
        };
        self.report(percent);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation point; stores call this between chunks
    pub fn checkpoint(&self) -> RemoteResult<()> {
        if self.cancel.is_cancelled() {
            Err(RemoteError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Content-addressed remote storage that books are synced against
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upload content for `hash`
    async fn put(&self, hash: &BookHash, content: Vec<u8>, sink: &ProgressSink)
        -> RemoteResult<()>;

    /// Download content for `hash`
    async fn get(&self, hash: &BookHash, sink: &ProgressSink) -> RemoteResult<RemoteObject>;

    /// Whether the remote holds complete content for `hash`
    async fn exists(&self, hash: &BookHash) -> RemoteResult<bool>;

    /// Last-modified marker of the remote content, if present
    async fn last_modified(&self, hash: &BookHash) -> RemoteResult<Option<DateTime<Utc>>>;

    /// Store the reading-progress sidecar
    async fn put_progress(&self, hash: &BookHash, progress: &ReadingProgress)
        -> RemoteResult<()>;

    /// Fetch the reading-progress sidecar
    async fn get_progress(&self, hash: &BookHash) -> RemoteResult<Option<ReadingProgress>>;
}
