//! Multi-book selection and bulk actions
//!
//! Bulk actions fan out to the orchestrator per book. Each item is admitted
//! or rejected independently and a rejection never aborts the batch.

use crate::error::TransferError;
use crate::shelf::Bookshelf;
use crate::transfer::{
    Direction, Orchestrator, RequestOptions, TransferEvent, TransferEventKind, TransferOutcome,
};
use crate::types::BookHash;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result for one book in a bulk action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BulkOutcome {
    /// Admitted to the transfer queue
    Queued,
    /// Deleted from the shelf
    Removed,
    /// Rejected by a per-book precondition
    Skipped(String),
    /// Rejected for an environmental reason
    Failed(String),
    /// An admitted transfer reached its terminal state
    Finished(TransferOutcome),
}

impl BulkOutcome {
    fn from_rejection(err: &TransferError) -> Self {
        if err.is_precondition() {
            BulkOutcome::Skipped(err.to_string())
        } else {
            BulkOutcome::Failed(err.to_string())
        }
    }

    /// Whether this item ended badly
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            BulkOutcome::Failed(_) | BulkOutcome::Finished(TransferOutcome::Failed(_))
        )
    }
}

impl fmt::Display for BulkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkOutcome::Queued => f.write_str("queued"),
            BulkOutcome::Removed => f.write_str("removed"),
            BulkOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            BulkOutcome::Failed(reason) => write!(f, "failed ({})", reason),
            BulkOutcome::Finished(outcome) => write!(f, "{}", outcome),
        }
    }
}

/// Admission report for a bulk transfer plus a handle to await its jobs
pub struct BulkBatch {
    direction: Direction,
    report: Vec<(BookHash, BulkOutcome)>,
    pending: HashMap<Uuid, BookHash>,
    events: broadcast::Receiver<TransferEvent>,
    orchestrator: Arc<Orchestrator>,
}

impl BulkBatch {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Per-item admission results, in selection order
    pub fn report(&self) -> &[(BookHash, BulkOutcome)] {
        &self.report
    }

    /// Job ids of admitted items
    pub fn job_ids(&self) -> Vec<Uuid> {
        self.pending.keys().copied().collect()
    }

    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    /// Subscribe to the same event stream the batch waits on
    pub fn events(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.resubscribe()
    }

    /// Wait until every admitted job is terminal and return the final
    /// per-item results
    pub async fn completion(mut self) -> Vec<(BookHash, BulkOutcome)> {
        let mut finished: HashMap<Uuid, TransferOutcome> = HashMap::new();

        while finished.len() < self.pending.len() {
            match self.events.recv().await {
                Ok(TransferEvent {
                    job_id,
                    kind: TransferEventKind::Finished(outcome),
                    ..
                }) if self.pending.contains_key(&job_id) => {
                    finished.insert(job_id, outcome);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Bulk batch lagged behind transfer events, reconciling");
                    self.reconcile(&mut finished);
                }
                Err(RecvError::Closed) => {
                    self.reconcile(&mut finished);
                    break;
                }
            }
        }

        let by_hash: HashMap<&BookHash, &Uuid> =
            self.pending.iter().map(|(id, hash)| (hash, id)).collect();

        self.report
            .iter()
            .map(|(hash, admission)| {
                let outcome = match by_hash.get(hash).and_then(|id| finished.get(*id)) {
                    Some(outcome) => BulkOutcome::Finished(outcome.clone()),
                    None if *admission == BulkOutcome::Queued => {
                        BulkOutcome::Failed("outcome unavailable".into())
                    }
                    None => admission.clone(),
                };
                (hash.clone(), outcome)
            })
            .collect()
    }

    /// Recover outcomes missed while lagging, from the orchestrator's
    /// retained terminal snapshots
    fn reconcile(&self, finished: &mut HashMap<Uuid, TransferOutcome>) {
        for (id, hash) in &self.pending {
            if finished.contains_key(id) {
                continue;
            }
            let still_active = self
                .orchestrator
                .job(hash)
                .is_some_and(|job| job.id == *id);
            if still_active {
                continue;
            }
            match self
                .orchestrator
                .finished_job(hash)
                .filter(|job| job.id == *id)
                .and_then(|job| job.outcome)
            {
                Some(outcome) => {
                    finished.insert(*id, outcome);
                }
                None => {
                    debug!(hash = %hash, job_id = %id, "Outcome already acknowledged");
                    finished.insert(*id, TransferOutcome::Failed("outcome unavailable".into()));
                }
            }
        }
    }
}

/// The user's current multi-book selection
pub struct SelectionController {
    shelf: Arc<Bookshelf>,
    orchestrator: Arc<Orchestrator>,
    selected: Mutex<Vec<BookHash>>,
    revision: watch::Sender<u64>,
}

impl SelectionController {
    pub fn new(shelf: Arc<Bookshelf>, orchestrator: Arc<Orchestrator>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shelf,
            orchestrator,
            selected: Mutex::new(Vec::new()),
            revision,
        }
    }

    fn changed(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Add a book to the selection. Unknown books are ignored.
    pub fn select(&self, hash: &BookHash) -> bool {
        if !self.shelf.contains(hash) {
            return false;
        }
        let added = {
            let mut selected = self.selected.lock();
            if selected.contains(hash) {
                false
            } else {
                selected.push(hash.clone());
                true
            }
        };
        if added {
            self.changed();
        }
        added
    }

    pub fn deselect(&self, hash: &BookHash) -> bool {
        let removed = {
            let mut selected = self.selected.lock();
            let before = selected.len();
            selected.retain(|h| h != hash);
            selected.len() != before
        };
        if removed {
            self.changed();
        }
        removed
    }

    /// Flip membership. Returns whether the book is now selected.
    pub fn toggle(&self, hash: &BookHash) -> bool {
        if self.is_selected(hash) {
            self.deselect(hash);
            false
        } else {
            self.select(hash)
        }
    }

    /// Select every given book that exists on the shelf
    pub fn select_all<'a>(&self, hashes: impl IntoIterator<Item = &'a BookHash>) -> usize {
        let added = {
            let mut selected = self.selected.lock();
            let mut added = 0;
            for hash in hashes {
                if self.shelf.contains(hash) && !selected.contains(hash) {
                    selected.push(hash.clone());
                    added += 1;
                }
            }
            added
        };
        if added > 0 {
            self.changed();
        }
        added
    }

    pub fn deselect_all(&self) {
        let had_any = {
            let mut selected = self.selected.lock();
            let had_any = !selected.is_empty();
            selected.clear();
            had_any
        };
        if had_any {
            self.changed();
        }
    }

    /// Selected books still on the shelf, in selection order
    pub fn selected(&self) -> Vec<BookHash> {
        self.selected
            .lock()
            .iter()
            .filter(|h| self.shelf.contains(h))
            .cloned()
            .collect()
    }

    pub fn is_selected(&self, hash: &BookHash) -> bool {
        self.selected.lock().contains(hash)
    }

    /// True when the shelf is non-empty and every book on it is selected
    pub fn is_all_selected(&self) -> bool {
        let books = self.shelf.list_flat();
        if books.is_empty() {
            return false;
        }
        let selected = self.selected.lock();
        books.iter().all(|record| selected.contains(&record.hash))
    }

    pub fn len(&self) -> usize {
        self.selected().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Revision counter, bumped whenever the selection changes
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn batch(&self, direction: Direction) -> BulkBatch {
        BulkBatch {
            direction,
            report: Vec::new(),
            pending: HashMap::new(),
            events: self.orchestrator.subscribe(),
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }

    fn admit(batch: &mut BulkBatch, hash: BookHash, result: Result<Uuid, TransferError>) {
        let outcome = match result {
            Ok(id) => {
                batch.pending.insert(id, hash.clone());
                BulkOutcome::Queued
            }
            Err(err) => {
                debug!(hash = %hash, error = %err, "Bulk item rejected");
                BulkOutcome::from_rejection(&err)
            }
        };
        batch.report.push((hash, outcome));
    }

    /// Request an upload for every selected book
    pub fn bulk_upload(&self, force: bool) -> BulkBatch {
        let mut batch = self.batch(Direction::Upload);
        let options = RequestOptions {
            force,
            ..RequestOptions::default()
        };
        for hash in self.selected() {
            let result = self.orchestrator.request_upload(&hash, options);
            Self::admit(&mut batch, hash, result);
        }
        info!(
            selected = batch.report.len(),
            queued = batch.queued(),
            "Bulk upload requested"
        );
        batch
    }

    /// Request a download for every selected book.
    ///
    /// Freshness checks against the remote run concurrently. Admission then
    /// happens in selection order, so the queue and the report both keep it.
    pub async fn bulk_download(&self, force: bool) -> BulkBatch {
        let mut batch = self.batch(Direction::Download);
        let options = RequestOptions {
            force,
            ..RequestOptions::default()
        };
        let selected = self.selected();
        let checks = join_all(
            selected
                .iter()
                .map(|hash| self.orchestrator.check_download(hash, options)),
        )
        .await;
        for (hash, check) in selected.into_iter().zip(checks) {
            let result = check.and_then(|()| self.orchestrator.admit_download(&hash, options));
            Self::admit(&mut batch, hash, result);
        }
        info!(
            selected = batch.report.len(),
            queued = batch.queued(),
            "Bulk download requested"
        );
        batch
    }

    /// Remove every selected book that has no active transfer
    pub async fn bulk_delete(&self) -> Vec<(BookHash, BulkOutcome)> {
        let mut report = Vec::new();
        for hash in self.selected() {
            let outcome = match self.orchestrator.remove_book(&hash).await {
                Ok(_) => {
                    self.deselect(&hash);
                    BulkOutcome::Removed
                }
                Err(err) => BulkOutcome::from_rejection(&err),
            };
            report.push((hash, outcome));
        }
        info!(count = report.len(), "Bulk delete finished");
        report
    }
}
