//! Transfer orchestrator: the per-book state machine
//!
//! ```text
//! Idle -> Queued -> InProgress -> { Succeeded | Failed | Cancelled } -> Idle
//! ```
//!
//! Requests are validated synchronously and either rejected or admitted as
//! `Queued`. A single dispatcher task pulls `(job, slot)` pairs from the
//! [`TransferQueue`] and spawns one worker per job. The orchestrator is the
//! only writer of transfer timestamps on book records.
//!
//! Lock order: job table, then queue or bookshelf. Neither of the latter ever
//! calls back into the job table.

use super::job::{
    Direction, JobCounts, JobState, RequestOptions, TransferEvent, TransferEventKind,
    TransferJob, TransferOutcome,
};
use super::queue::{QueuedJob, TransferQueue};
use super::retry::RetryPolicy;
use crate::config::EngineConfig;
use crate::error::{RemoteError, TransferError};
use crate::identity::verify_identity;
use crate::remote::{ProgressSink, RemoteStore};
use crate::session::SessionProvider;
use crate::shelf::Bookshelf;
use crate::storage::{book_content_path, StorageProvider};
use crate::types::{BookHash, BookRecord, ReadingProgress};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What `cancel` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResult {
    /// No job was active for the book
    NotActive,
    /// The job was still waiting and has been dropped without side effects
    RemovedFromQueue,
    /// The running job will stop at its next checkpoint
    Signalled,
}

struct ActiveJob {
    job: TransferJob,
    cancel: CancellationToken,
}

#[derive(Default)]
struct JobTable {
    active: HashMap<BookHash, ActiveJob>,
    /// Last terminal snapshot per book, kept until acknowledged
    finished: HashMap<BookHash, TransferJob>,
}

pub struct Orchestrator {
    shelf: Arc<Bookshelf>,
    local: Arc<dyn StorageProvider>,
    remote: Arc<dyn RemoteStore>,
    session: Arc<dyn SessionProvider>,
    queue: TransferQueue,
    retry: RetryPolicy,
    jobs: Mutex<JobTable>,
    events: broadcast::Sender<TransferEvent>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: &EngineConfig,
        shelf: Arc<Bookshelf>,
        local: Arc<dyn StorageProvider>,
        remote: Arc<dyn RemoteStore>,
        session: Arc<dyn SessionProvider>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Arc::new(Self {
            shelf,
            local,
            remote,
            session,
            queue: TransferQueue::new(config.max_concurrent_transfers),
            retry: RetryPolicy::from_config(config),
            jobs: Mutex::new(JobTable::default()),
            events,
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawn the dispatcher task. Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.dispatch().await })
    }

    async fn dispatch(self: Arc<Self>) {
        debug!(max_concurrent = self.queue.capacity(), "Transfer dispatcher started");
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                next = self.queue.next() => next,
            };
            let Some((queued, permit)) = next else {
                break;
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.run_job(queued, permit).await });
        }
        debug!("Transfer dispatcher stopped");
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    fn require_session(&self) -> Result<(), TransferError> {
        if self.session.current_session().is_none() {
            return Err(TransferError::AuthenticationRequired);
        }
        if self.shutdown.is_cancelled() {
            return Err(TransferError::ShutDown);
        }
        Ok(())
    }

    fn ensure_idle(table: &JobTable, hash: &BookHash) -> Result<(), TransferError> {
        match table.active.get(hash) {
            Some(active) => Err(TransferError::TransferActive {
                hash: hash.clone(),
                direction: active.job.direction,
            }),
            None => Ok(()),
        }
    }

    fn record(&self, hash: &BookHash) -> Result<BookRecord, TransferError> {
        self.shelf
            .get(hash)
            .ok_or_else(|| TransferError::UnknownBook(hash.clone()))
    }

    /// Ask for a book to be uploaded. Returns the new job's id.
    pub fn request_upload(
        &self,
        hash: &BookHash,
        options: RequestOptions,
    ) -> Result<Uuid, TransferError> {
        self.require_session()?;

        let mut table = self.jobs.lock();
        let record = self.record(hash)?;
        Self::ensure_idle(&table, hash)?;
        if record.uploaded_at.is_some() && !options.force {
            return Err(TransferError::AlreadyUploaded(hash.clone()));
        }

        Ok(self.admit(&mut table, hash, Direction::Upload, options))
    }

    /// Ask for a book to be downloaded. Returns the new job's id.
    ///
    /// A book with a local copy is only eligible when the remote content is
    /// newer than that copy; `force` skips the freshness check.
    pub async fn request_download(
        &self,
        hash: &BookHash,
        options: RequestOptions,
    ) -> Result<Uuid, TransferError> {
        self.check_download(hash, options).await?;
        self.admit_download(hash, options)
    }

    /// Download preconditions, including the remote freshness query.
    /// Admits nothing.
    pub(crate) async fn check_download(
        &self,
        hash: &BookHash,
        options: RequestOptions,
    ) -> Result<(), TransferError> {
        self.require_session()?;

        let record = self.record(hash)?;
        Self::ensure_idle(&self.jobs.lock(), hash)?;
        if record.uploaded_at.is_none() {
            return Err(TransferError::NotUploadedYet(hash.clone()));
        }
        if let Some(downloaded_at) = record.downloaded_at {
            if !options.force {
                let remote_modified = self.remote.last_modified(hash).await?;
                let stale = remote_modified.is_some_and(|modified| modified > downloaded_at);
                if !stale {
                    return Err(TransferError::AlreadyDownloaded(hash.clone()));
                }
                debug!(hash = %hash, "Local copy is stale, download eligible");
            }
        }
        Ok(())
    }

    /// Queue a download whose preconditions passed `check_download`. The
    /// cheap checks are repeated under the lock since the remote query may
    /// have raced.
    pub(crate) fn admit_download(
        &self,
        hash: &BookHash,
        options: RequestOptions,
    ) -> Result<Uuid, TransferError> {
        self.require_session()?;

        let mut table = self.jobs.lock();
        if !self.shelf.contains(hash) {
            return Err(TransferError::UnknownBook(hash.clone()));
        }
        Self::ensure_idle(&table, hash)?;
        Ok(self.admit(&mut table, hash, Direction::Download, options))
    }

    fn admit(
        &self,
        table: &mut JobTable,
        hash: &BookHash,
        direction: Direction,
        options: RequestOptions,
    ) -> Uuid {
        let job = TransferJob::new(hash.clone(), direction, options);
        let id = job.id;

        table.finished.remove(hash);
        self.queue.enqueue(QueuedJob {
            id,
            hash: hash.clone(),
            direction,
            priority: options.priority,
        });
        self.emit(&job, TransferEventKind::Queued);
        table.active.insert(
            hash.clone(),
            ActiveJob {
                job,
                cancel: self.shutdown.child_token(),
            },
        );

        info!(hash = %hash, %direction, job_id = %id, "Transfer queued");
        id
    }

    /// Cancel the active job for a book, if any
    pub fn cancel(&self, hash: &BookHash) -> CancelResult {
        let mut table = self.jobs.lock();
        let Some(active) = table.active.get(hash) else {
            return CancelResult::NotActive;
        };

        if active.job.state == JobState::Queued && self.queue.remove(hash).is_some() {
            let id = active.job.id;
            self.retire(&mut table, hash, id, TransferOutcome::Cancelled);
            return CancelResult::RemovedFromQueue;
        }

        // Already handed to a worker (possibly still marked Queued for an instant)
        active.cancel.cancel();
        info!(hash = %hash, "Cancellation signalled to running transfer");
        CancelResult::Signalled
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    async fn run_job(self: Arc<Self>, queued: QueuedJob, _permit: OwnedSemaphorePermit) {
        let hash = queued.hash.clone();

        let cancel = {
            let mut table = self.jobs.lock();
            let Some(active) = table.active.get_mut(&hash).filter(|a| a.job.id == queued.id)
            else {
                return;
            };
            if active.cancel.is_cancelled() {
                self.retire(&mut table, &hash, queued.id, TransferOutcome::Cancelled);
                return;
            }
            active.job.state = JobState::InProgress;
            self.emit(&active.job, TransferEventKind::Started);
            active.cancel.clone()
        };

        debug!(hash = %hash, direction = %queued.direction, "Transfer started");

        if self.session.current_session().is_none() {
            self.finish(&hash, queued.id, TransferOutcome::Failed("authentication required".into()));
            return;
        }

        let sink = {
            let this = Arc::clone(&self);
            let hash = hash.clone();
            let id = queued.id;
            ProgressSink::new(move |percent| this.report_progress(&hash, id, percent), cancel.clone())
        };

        let result = match queued.direction {
            Direction::Upload => self.execute_upload(&hash, &sink, &cancel).await,
            Direction::Download => self.execute_download(&hash, &sink, &cancel).await,
        };

        let outcome = match result {
            Ok(()) if cancel.is_cancelled() => TransferOutcome::Cancelled,
            Ok(()) => {
                self.mark_transferred(&hash, queued.direction);
                TransferOutcome::Succeeded
            }
            Err(RemoteError::Cancelled) => TransferOutcome::Cancelled,
            Err(err) => TransferOutcome::Failed(err.to_string()),
        };

        self.finish(&hash, queued.id, outcome);
    }

    async fn execute_upload(
        &self,
        hash: &BookHash,
        sink: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), RemoteError> {
        let content = self
            .local
            .read(&book_content_path(hash))
            .await
            .map_err(|e| RemoteError::Backend(format!("local content unavailable: {}", e)))?;

        let remote = &*self.remote;
        self.retry
            .run("upload", hash, cancel, move || {
                remote.put(hash, content.clone(), sink)
            })
            .await?;

        let local_progress = self.shelf.get(hash).and_then(|r| r.progress);
        if let Some(progress) = local_progress {
            let progress = &progress;
            let pushed = self
                .retry
                .run("push progress", hash, cancel, move || {
                    remote.put_progress(hash, progress)
                })
                .await;
            if let Err(err) = pushed {
                warn!(hash = %hash, error = %err, "Failed to push reading progress");
            }
        }

        Ok(())
    }

    async fn execute_download(
        &self,
        hash: &BookHash,
        sink: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), RemoteError> {
        let remote = &*self.remote;
        let object = self
            .retry
            .run("download", hash, cancel, move || remote.get(hash, sink))
            .await?;

        if let Err(err) = verify_identity(hash, &object.content) {
            warn!(hash = %hash, error = %err, "Downloaded content does not match its identity");
            return Err(RemoteError::Integrity(err.to_string()));
        }

        sink.checkpoint()?;
        self.local
            .write(&book_content_path(hash), object.content)
            .await
            .map_err(|e| RemoteError::Backend(format!("failed to store local content: {}", e)))?;

        match self
            .retry
            .run("pull progress", hash, cancel, move || remote.get_progress(hash))
            .await
        {
            Ok(remote_progress) => {
                if let Some(merged) = self.merge_progress(hash, remote_progress) {
                    if let Err(err) = remote.put_progress(hash, &merged).await {
                        warn!(hash = %hash, error = %err, "Failed to push merged reading progress");
                    }
                }
            }
            Err(RemoteError::Cancelled) => return Err(RemoteError::Cancelled),
            Err(err) => warn!(hash = %hash, error = %err, "Failed to pull reading progress"),
        }

        Ok(())
    }

    /// Merge remote reading progress into the record. Returns the merged
    /// value when the remote copy needs updating.
    fn merge_progress(
        &self,
        hash: &BookHash,
        remote: Option<ReadingProgress>,
    ) -> Option<ReadingProgress> {
        let local = self.shelf.get(hash).and_then(|r| r.progress);
        let merged = ReadingProgress::merge(local.as_ref(), remote.as_ref());

        if merged != local {
            let value = merged.clone();
            self.shelf.update(hash, |record| record.progress = value);
        }
        merged.filter(|m| Some(m) != remote.as_ref())
    }

    fn mark_transferred(&self, hash: &BookHash, direction: Direction) {
        let now = Utc::now();
        self.shelf.update(hash, |record| {
            match direction {
                Direction::Upload => record.uploaded_at = Some(now),
                Direction::Download => record.downloaded_at = Some(now),
            }
            record.updated_at = now;
        });
    }

    fn report_progress(&self, hash: &BookHash, id: Uuid, percent: u8) {
        let mut table = self.jobs.lock();
        let Some(active) = table.active.get_mut(hash).filter(|a| a.job.id == id) else {
            return;
        };
        if active.job.state != JobState::InProgress {
            return;
        }

        let current = active.job.progress;
        match active.job.advance(percent) {
            Some(progress) => {
                let job = active.job.clone();
                self.emit(&job, TransferEventKind::Progress(progress));
            }
            None if percent < current => {
                warn!(hash = %hash, current, reported = percent, "Ignoring regressive progress update");
            }
            None => {}
        }
    }

    fn finish(&self, hash: &BookHash, id: Uuid, outcome: TransferOutcome) {
        let mut table = self.jobs.lock();
        self.retire(&mut table, hash, id, outcome);
    }

    /// Move a job to its terminal state and out of the active set
    fn retire(&self, table: &mut JobTable, hash: &BookHash, id: Uuid, outcome: TransferOutcome) {
        if !table.active.get(hash).is_some_and(|a| a.job.id == id) {
            return;
        }
        let Some(ActiveJob { mut job, .. }) = table.active.remove(hash) else {
            return;
        };

        if outcome.is_success() {
            if let Some(progress) = job.advance(100) {
                self.emit(&job, TransferEventKind::Progress(progress));
            }
        }
        job.state = outcome.state();
        job.outcome = Some(outcome.clone());
        self.emit(&job, TransferEventKind::Finished(outcome.clone()));

        match &outcome {
            TransferOutcome::Succeeded => {
                info!(hash = %hash, direction = %job.direction, job_id = %id, "Transfer succeeded")
            }
            TransferOutcome::Cancelled => {
                info!(hash = %hash, direction = %job.direction, job_id = %id, "Transfer cancelled")
            }
            TransferOutcome::Failed(reason) => {
                error!(hash = %hash, direction = %job.direction, job_id = %id, reason = %reason, "Transfer failed")
            }
        }

        table.finished.insert(hash.clone(), job);
    }

    fn emit(&self, job: &TransferJob, kind: TransferEventKind) {
        // No subscribers is fine
        let _ = self.events.send(TransferEvent {
            job_id: job.id,
            hash: job.hash.clone(),
            direction: job.direction,
            kind,
        });
    }

    // ------------------------------------------------------------------
    // Reading progress and removal
    // ------------------------------------------------------------------

    /// Reconcile a book's reading progress with the remote sidecar.
    ///
    /// Runs through a limiter slot so it shares the transfer bound.
    pub async fn sync_progress(
        &self,
        hash: &BookHash,
    ) -> Result<Option<ReadingProgress>, TransferError> {
        self.require_session()?;
        let record = self.record(hash)?;
        if record.uploaded_at.is_none() {
            return Err(TransferError::NotUploadedYet(hash.clone()));
        }

        let _slot = self
            .queue
            .acquire_slot()
            .await
            .ok_or(TransferError::ShutDown)?;

        let remote = &*self.remote;
        let remote_progress = self
            .retry
            .run("pull progress", hash, &self.shutdown, move || {
                remote.get_progress(hash)
            })
            .await?;

        if let Some(merged) = self.merge_progress(hash, remote_progress) {
            let merged = &merged;
            self.retry
                .run("push progress", hash, &self.shutdown, move || {
                    remote.put_progress(hash, merged)
                })
                .await?;
        }

        Ok(self.shelf.get(hash).and_then(|r| r.progress))
    }

    /// Remove a book and its local content. Refused while a transfer is active.
    pub async fn remove_book(&self, hash: &BookHash) -> Result<BookRecord, TransferError> {
        let removed = {
            let mut table = self.jobs.lock();
            Self::ensure_idle(&table, hash)?;
            table.finished.remove(hash);
            self.shelf
                .remove(hash)
                .ok_or_else(|| TransferError::UnknownBook(hash.clone()))?
        };

        if let Err(err) = self.local.delete(&book_content_path(hash)).await {
            debug!(hash = %hash, error = %err, "No local content to delete");
        }
        info!(hash = %hash, "Book removed");
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Snapshot of the active job for a book
    pub fn job(&self, hash: &BookHash) -> Option<TransferJob> {
        self.jobs.lock().active.get(hash).map(|a| a.job.clone())
    }

    /// Snapshots of all active jobs
    pub fn jobs(&self) -> Vec<TransferJob> {
        self.jobs
            .lock()
            .active
            .values()
            .map(|a| a.job.clone())
            .collect()
    }

    pub fn counts(&self) -> JobCounts {
        let table = self.jobs.lock();
        let mut counts = JobCounts::default();
        for active in table.active.values() {
            match active.job.state {
                JobState::Queued => counts.queued += 1,
                JobState::InProgress => counts.in_progress += 1,
                _ => {}
            }
        }
        counts
    }

    /// Progress to render for a book: the active job's percentage, or 100
    /// for a success not yet acknowledged
    pub fn transfer_progress(&self, hash: &BookHash) -> Option<u8> {
        let table = self.jobs.lock();
        if let Some(active) = table.active.get(hash) {
            return Some(active.job.progress);
        }
        table
            .finished
            .get(hash)
            .filter(|job| job.state == JobState::Succeeded)
            .map(|job| job.progress)
    }

    /// Terminal snapshot of the most recent job for a book, until acknowledged
    pub fn finished_job(&self, hash: &BookHash) -> Option<TransferJob> {
        self.jobs.lock().finished.get(hash).cloned()
    }

    pub fn last_outcome(&self, hash: &BookHash) -> Option<TransferOutcome> {
        self.jobs
            .lock()
            .finished
            .get(hash)
            .and_then(|job| job.outcome.clone())
    }

    /// Drop the retained terminal snapshot once the view has shown it
    pub fn acknowledge(&self, hash: &BookHash) -> Option<TransferJob> {
        self.jobs.lock().finished.remove(hash)
    }

    pub fn is_active(&self, hash: &BookHash) -> bool {
        self.jobs.lock().active.contains_key(hash)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    /// Stop dispatching, cancel running jobs and retire queued ones
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Shutting down transfer engine");
        self.shutdown.cancel();
        self.queue.close();

        let mut table = self.jobs.lock();
        for queued in self.queue.drain() {
            self.retire(&mut table, &queued.hash, queued.id, TransferOutcome::Cancelled);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
