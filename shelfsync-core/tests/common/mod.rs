//! Shared fixtures for shelfsync-core integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shelfsync_core::error::RemoteError;
use shelfsync_core::identity::hash_content;
use shelfsync_core::remote::{ObjectRemoteStore, ProgressSink, RemoteObject, RemoteStore};
use shelfsync_core::session::{Session, StaticSession};
use shelfsync_core::storage::{book_content_path, MemoryStorage, StorageProvider};
use shelfsync_core::transfer::{JobCounts, Orchestrator, TransferEvent, TransferEventKind};
use shelfsync_core::{BookHash, BookRecord, Bookshelf, EngineConfig, TransferOutcome};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use uuid::Uuid;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Generous upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Remote fakes
// =============================================================================

/// Remote whose `put`/`get` block until the test opens the gate.
///
/// A blocked call returns `Cancelled` as soon as its job is cancelled.
pub struct GatedRemote {
    inner: ObjectRemoteStore,
    gate: Semaphore,
    started: AtomicUsize,
}

impl GatedRemote {
    pub fn new() -> Self {
        Self {
            inner: ObjectRemoteStore::new(Arc::new(MemoryStorage::new()), 8),
            gate: Semaphore::new(0),
            started: AtomicUsize::new(0),
        }
    }

    /// Let `n` blocked or future calls through
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Number of calls that reached the gate
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// The ungated store underneath, for seeding remote content
    pub fn inner(&self) -> &ObjectRemoteStore {
        &self.inner
    }

    async fn pass(&self, sink: &ProgressSink) -> RemoteResult<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        loop {
            sink.checkpoint()?;
            match tokio::time::timeout(Duration::from_millis(5), self.gate.acquire()).await {
                Ok(Ok(permit)) => {
                    permit.forget();
                    return Ok(());
                }
                Ok(Err(_)) => return Err(RemoteError::Unavailable("gate closed".into())),
                Err(_) => continue,
            }
        }
    }
}

#[async_trait]
impl RemoteStore for GatedRemote {
    async fn put(&self, hash: &BookHash, content: Vec<u8>, sink: &ProgressSink) -> RemoteResult<()> {
        self.pass(sink).await?;
        self.inner.put(hash, content, sink).await
    }

    async fn get(&self, hash: &BookHash, sink: &ProgressSink) -> RemoteResult<RemoteObject> {
        self.pass(sink).await?;
        self.inner.get(hash, sink).await
    }

    async fn exists(&self, hash: &BookHash) -> RemoteResult<bool> {
        self.inner.exists(hash).await
    }

    async fn last_modified(&self, hash: &BookHash) -> RemoteResult<Option<DateTime<Utc>>> {
        self.inner.last_modified(hash).await
    }

    async fn put_progress(
        &self,
        hash: &BookHash,
        progress: &shelfsync_core::ReadingProgress,
    ) -> RemoteResult<()> {
        self.inner.put_progress(hash, progress).await
    }

    async fn get_progress(
        &self,
        hash: &BookHash,
    ) -> RemoteResult<Option<shelfsync_core::ReadingProgress>> {
        self.inner.get_progress(hash).await
    }
}

/// Remote whose uploads fail with a scripted sequence of errors first
pub struct FlakyRemote {
    inner: ObjectRemoteStore,
    failures: Mutex<VecDeque<RemoteError>>,
    puts: AtomicUsize,
}

impl FlakyRemote {
    pub fn new(failures: Vec<RemoteError>) -> Self {
        Self {
            inner: ObjectRemoteStore::new(Arc::new(MemoryStorage::new()), 8),
            failures: Mutex::new(failures.into()),
            puts: AtomicUsize::new(0),
        }
    }

    /// Number of upload attempts seen
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn put(&self, hash: &BookHash, content: Vec<u8>, sink: &ProgressSink) -> RemoteResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let scripted = self.failures.lock().pop_front();
        match scripted {
            Some(err) => Err(err),
            None => self.inner.put(hash, content, sink).await,
        }
    }

    async fn get(&self, hash: &BookHash, sink: &ProgressSink) -> RemoteResult<RemoteObject> {
        self.inner.get(hash, sink).await
    }

    async fn exists(&self, hash: &BookHash) -> RemoteResult<bool> {
        self.inner.exists(hash).await
    }

    async fn last_modified(&self, hash: &BookHash) -> RemoteResult<Option<DateTime<Utc>>> {
        self.inner.last_modified(hash).await
    }

    async fn put_progress(
        &self,
        hash: &BookHash,
        progress: &shelfsync_core::ReadingProgress,
    ) -> RemoteResult<()> {
        self.inner.put_progress(hash, progress).await
    }

    async fn get_progress(
        &self,
        hash: &BookHash,
    ) -> RemoteResult<Option<shelfsync_core::ReadingProgress>> {
        self.inner.get_progress(hash).await
    }
}

/// Remote whose freshness query takes a while to answer
pub struct SlowFreshnessRemote {
    inner: ObjectRemoteStore,
    delay: Duration,
}

impl SlowFreshnessRemote {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: ObjectRemoteStore::new(Arc::new(MemoryStorage::new()), 8),
            delay,
        }
    }

    pub fn inner(&self) -> &ObjectRemoteStore {
        &self.inner
    }
}

#[async_trait]
impl RemoteStore for SlowFreshnessRemote {
    async fn put(&self, hash: &BookHash, content: Vec<u8>, sink: &ProgressSink) -> RemoteResult<()> {
        self.inner.put(hash, content, sink).await
    }

    async fn get(&self, hash: &BookHash, sink: &ProgressSink) -> RemoteResult<RemoteObject> {
        self.inner.get(hash, sink).await
    }

    async fn exists(&self, hash: &BookHash) -> RemoteResult<bool> {
        self.inner.exists(hash).await
    }

    async fn last_modified(&self, hash: &BookHash) -> RemoteResult<Option<DateTime<Utc>>> {
        tokio::time::sleep(self.delay).await;
        self.inner.last_modified(hash).await
    }

    async fn put_progress(
        &self,
        hash: &BookHash,
        progress: &shelfsync_core::ReadingProgress,
    ) -> RemoteResult<()> {
        self.inner.put_progress(hash, progress).await
    }

    async fn get_progress(
        &self,
        hash: &BookHash,
    ) -> RemoteResult<Option<shelfsync_core::ReadingProgress>> {
        self.inner.get_progress(hash).await
    }
}

// =============================================================================
// Harness
// =============================================================================

pub fn fast_config(max_concurrent: usize) -> EngineConfig {
    EngineConfig {
        max_concurrent_transfers: max_concurrent,
        max_retries: 4,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        ..EngineConfig::default()
    }
}

/// Deterministic content for a named test book
pub fn book_content(name: &str) -> Vec<u8> {
    format!("contents of the book called {}", name).into_bytes()
}

pub struct Harness<R> {
    pub shelf: Arc<Bookshelf>,
    pub local: Arc<MemoryStorage>,
    pub remote: Arc<R>,
    pub session: Arc<StaticSession>,
    pub orchestrator: Arc<Orchestrator>,
}

impl<R: RemoteStore + 'static> Harness<R> {
    /// Build a signed-in orchestrator and start its dispatcher
    pub fn new(max_concurrent: usize, remote: R) -> Self {
        let shelf = Arc::new(Bookshelf::new());
        let local = Arc::new(MemoryStorage::new());
        let remote = Arc::new(remote);
        let session = Arc::new(StaticSession::signed_in(Session::new("reader", "token")));

        let orchestrator = Orchestrator::new(
            &fast_config(max_concurrent),
            Arc::clone(&shelf),
            local.clone(),
            remote.clone(),
            session.clone(),
        );
        orchestrator.start();

        Self {
            shelf,
            local,
            remote,
            session,
            orchestrator,
        }
    }

    /// Put a book on the shelf with local content only
    pub async fn add_local_book(&self, name: &str) -> BookHash {
        let content = book_content(name);
        let hash = hash_content(&content).unwrap();
        self.local
            .write(&book_content_path(&hash), content)
            .await
            .unwrap();
        self.shelf
            .upsert(BookRecord::new(hash.clone()).with_title(name));
        hash
    }

    /// Put a book on the shelf that exists only on the remote
    pub async fn add_remote_book(&self, name: &str, seed: &ObjectRemoteStore) -> BookHash {
        let content = book_content(name);
        let hash = hash_content(&content).unwrap();
        seed.put(&hash, content, &ProgressSink::detached())
            .await
            .unwrap();

        let mut record = BookRecord::new(hash.clone()).with_title(name);
        record.uploaded_at = Some(Utc::now());
        self.shelf.upsert(record);
        hash
    }

    pub fn counts(&self) -> JobCounts {
        self.orchestrator.counts()
    }

    /// Poll until `check` holds, panicking after [`WAIT`]
    pub async fn wait_until(&self, what: &str, check: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !check(self) {
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {}", what);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

/// Collect events for `job_id` until its terminal event
pub async fn events_until_finished(
    events: &mut broadcast::Receiver<TransferEvent>,
    job_id: Uuid,
) -> Vec<TransferEventKind> {
    let collect = async {
        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.expect("event stream closed or lagged");
            if event.job_id != job_id {
                continue;
            }
            let done = event.is_terminal();
            seen.push(event.kind);
            if done {
                return seen;
            }
        }
    };
    tokio::time::timeout(WAIT, collect)
        .await
        .expect("job did not finish in time")
}

/// Wait for the terminal outcome of `job_id`
pub async fn outcome_of(
    events: &mut broadcast::Receiver<TransferEvent>,
    job_id: Uuid,
) -> TransferOutcome {
    match events_until_finished(events, job_id).await.pop() {
        Some(TransferEventKind::Finished(outcome)) => outcome,
        other => panic!("expected a terminal event, got {:?}", other),
    }
}

/// Wait for the terminal outcomes of several jobs, in whatever order they finish
pub async fn outcomes_of(
    events: &mut broadcast::Receiver<TransferEvent>,
    job_ids: &[Uuid],
) -> HashMap<Uuid, TransferOutcome> {
    let collect = async {
        let mut outcomes = HashMap::new();
        while outcomes.len() < job_ids.len() {
            let event = events.recv().await.expect("event stream closed or lagged");
            if let TransferEventKind::Finished(outcome) = event.kind {
                if job_ids.contains(&event.job_id) {
                    outcomes.insert(event.job_id, outcome);
                }
            }
        }
        outcomes
    };
    tokio::time::timeout(WAIT, collect)
        .await
        .expect("jobs did not finish in time")
}
