//! Transfer queue and concurrency limiter
//!
//! Pending jobs wait in a priority-ordered FIFO. A semaphore with `K` permits
//! bounds how many run at once. The dispatcher waits for a pending job, then
//! takes a permit, then pops: a job only leaves the queue when it can actually
//! start, and an idle dispatcher holds no slot. The permit travels with the
//! job and is released when its worker finishes.

use super::job::{Direction, Priority};
use crate::types::BookHash;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// A job waiting for a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: Uuid,
    pub hash: BookHash,
    pub direction: Direction,
    pub priority: Priority,
}

pub struct TransferQueue {
    pending: Mutex<VecDeque<QueuedJob>>,
    slots: Arc<Semaphore>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl TransferQueue {
    /// Create a queue allowing `max_concurrent` simultaneous transfers
    pub fn new(max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        tracing::debug!(max_concurrent = capacity, "Transfer queue initialized");

        Self {
            pending: Mutex::new(VecDeque::new()),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Add a job without blocking. It is placed after every job of equal or
    /// higher priority.
    pub fn enqueue(&self, job: QueuedJob) {
        {
            let mut pending = self.pending.lock();
            let position = pending
                .iter()
                .position(|queued| queued.priority < job.priority)
                .unwrap_or(pending.len());
            pending.insert(position, job);
        }
        self.notify.notify_one();
    }

    /// Remove a waiting job. Returns `None` if it already left the queue.
    pub fn remove(&self, hash: &BookHash) -> Option<QueuedJob> {
        let mut pending = self.pending.lock();
        let index = pending.iter().position(|queued| &queued.hash == hash)?;
        pending.remove(index)
    }

    /// Remove every waiting job
    pub fn drain(&self) -> Vec<QueuedJob> {
        self.pending.lock().drain(..).collect()
    }

    pub fn contains(&self, hash: &BookHash) -> bool {
        self.pending.lock().iter().any(|queued| &queued.hash == hash)
    }

    /// Snapshot of waiting jobs in dispatch order
    pub fn pending(&self) -> Vec<QueuedJob> {
        self.pending.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The concurrency bound `K`
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for the next job and a free slot. Returns `None` once closed.
    pub async fn next(&self) -> Option<(QueuedJob, OwnedSemaphorePermit)> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            if self.pending.lock().is_empty() {
                // notify_one stores a wakeup if it fires before we wait
                self.notify.notified().await;
                continue;
            }

            let permit = self.acquire_slot().await?;
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(job) = self.pending.lock().pop_front() {
                return Some((job, permit));
            }
            // Cancelled while we waited for the slot
            drop(permit);
        }
    }

    /// Take a slot for ad-hoc network work that should share the bound
    pub async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).acquire_owned().await.ok()
    }

    /// Stop handing out slots and wake the dispatcher
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.slots.close();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::hash_content;
    use std::time::Duration;

    fn queued(name: &str, priority: Priority) -> QueuedJob {
        QueuedJob {
            id: Uuid::new_v4(),
            hash: hash_content(name.as_bytes()).unwrap(),
            direction: Direction::Upload,
            priority,
        }
    }

    fn order(queue: &TransferQueue) -> Vec<BookHash> {
        queue.pending().into_iter().map(|q| q.hash).collect()
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = TransferQueue::new(2);
        let a = queued("a", Priority::Normal);
        let b = queued("b", Priority::Normal);
        let c = queued("c", Priority::High);
        let d = queued("d", Priority::Low);
        let e = queued("e", Priority::High);

        for job in [&a, &b, &c, &d, &e] {
            queue.enqueue(job.clone());
        }

        assert_eq!(
            order(&queue),
            vec![c.hash, e.hash, a.hash, b.hash, d.hash]
        );
    }

    #[test]
    fn test_remove_waiting_job() {
        let queue = TransferQueue::new(1);
        let a = queued("a", Priority::Normal);
        queue.enqueue(a.clone());

        assert!(queue.contains(&a.hash));
        assert_eq!(queue.remove(&a.hash), Some(a.clone()));
        assert!(queue.remove(&a.hash).is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_next_respects_bound() {
        let queue = TransferQueue::new(2);
        for name in ["a", "b", "c"] {
            queue.enqueue(queued(name, Priority::Normal));
        }

        let (_, first) = queue.next().await.unwrap();
        let (_, second) = queue.next().await.unwrap();
        assert_eq!(queue.available_slots(), 0);

        // Third job stays queued until a permit is released
        let blocked = tokio::time::timeout(Duration::from_millis(30), queue.next()).await;
        assert!(blocked.is_err());
        assert_eq!(queue.len(), 1);

        drop(first);
        let (third, _permit) = queue.next().await.unwrap();
        assert_eq!(third.hash, hash_content(b"c").unwrap());
        drop(second);
    }

    #[tokio::test]
    async fn test_next_wakes_on_enqueue() {
        let queue = Arc::new(TransferQueue::new(1));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await.map(|(job, _)| job.hash) })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let a = queued("late", Priority::Normal);
        queue.enqueue(a.clone());

        assert_eq!(waiter.await.unwrap(), Some(a.hash));
    }

    #[tokio::test]
    async fn test_idle_next_holds_no_slot() {
        let queue = Arc::new(TransferQueue::new(1));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await.map(|(job, _)| job.hash) })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.available_slots(), 1);
        let slot = tokio::time::timeout(Duration::from_secs(1), queue.acquire_slot())
            .await
            .expect("slot should be free while the queue is empty");
        assert!(slot.is_some());

        // The job waits for the ad-hoc slot to be released
        let a = queued("after-slot", Priority::Normal);
        queue.enqueue(a.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queue.len(), 1);

        drop(slot);
        assert_eq!(waiter.await.unwrap(), Some(a.hash));
    }

    #[tokio::test]
    async fn test_close_releases_waiter() {
        let queue = Arc::new(TransferQueue::new(1));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await.is_none() })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        assert!(waiter.await.unwrap());
        assert!(queue.acquire_slot().await.is_none());
    }
}
