//! Transfer job model and the typed event stream

use crate::types::BookHash;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Which way content moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => f.write_str("upload"),
            Direction::Download => f.write_str("download"),
        }
    }
}

/// Lifecycle state of a job. `Idle` is the absence of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_active(self) -> bool {
        matches!(self, JobState::Queued | JobState::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

/// Queue placement hint. Higher classes run first; equal classes are FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// How a job ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransferOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

impl TransferOutcome {
    pub fn state(&self) -> JobState {
        match self {
            TransferOutcome::Succeeded => JobState::Succeeded,
            TransferOutcome::Failed(_) => JobState::Failed,
            TransferOutcome::Cancelled => JobState::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Succeeded)
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Succeeded => f.write_str("succeeded"),
            TransferOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            TransferOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Caller options for a transfer request
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Re-upload an uploaded book, or re-download a fresh local copy
    pub force: bool,
    pub priority: Priority,
}

impl RequestOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }
}

/// One upload or download of one book
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferJob {
    pub id: Uuid,
    pub hash: BookHash,
    pub direction: Direction,
    /// Percentage, non-decreasing until terminal
    pub progress: u8,
    pub state: JobState,
    pub priority: Priority,
    pub force: bool,
    pub created_at: DateTime<Utc>,
    pub outcome: Option<TransferOutcome>,
}

impl TransferJob {
    pub fn new(hash: BookHash, direction: Direction, options: RequestOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            hash,
            direction,
            progress: 0,
            state: JobState::Queued,
            priority: options.priority,
            force: options.force,
            created_at: Utc::now(),
            outcome: None,
        }
    }

    /// Move progress forward. Returns the new value if it increased; values
    /// at or below the current one are ignored.
    pub fn advance(&mut self, percent: u8) -> Option<u8> {
        let percent = percent.min(100);
        if percent > self.progress {
            self.progress = percent;
            Some(percent)
        } else {
            None
        }
    }
}

/// Discrete lifecycle event for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TransferEventKind {
    Queued,
    Started,
    Progress(u8),
    Finished(TransferOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferEvent {
    pub job_id: Uuid,
    pub hash: BookHash,
    pub direction: Direction,
    pub kind: TransferEventKind,
}

impl TransferEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, TransferEventKind::Finished(_))
    }
}

/// Number of active jobs in each state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub queued: usize,
    pub in_progress: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::hash_content;
    use proptest::prelude::*;

    fn job() -> TransferJob {
        TransferJob::new(
            hash_content(b"job").unwrap(),
            Direction::Upload,
            RequestOptions::default(),
        )
    }

    #[test]
    fn test_advance_ignores_regressions() {
        let mut job = job();
        assert_eq!(job.advance(40), Some(40));
        assert_eq!(job.advance(20), None);
        assert_eq!(job.advance(40), None);
        assert_eq!(job.advance(180), Some(100));
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_outcome_states() {
        assert_eq!(TransferOutcome::Succeeded.state(), JobState::Succeeded);
        assert_eq!(TransferOutcome::Cancelled.state(), JobState::Cancelled);
        assert!(TransferOutcome::Failed("x".into()).state().is_terminal());
        assert!(JobState::Queued.is_active());
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    proptest! {
        #[test]
        fn advanced_progress_never_decreases(updates in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut job = job();
            let mut observed = vec![job.progress];
            for update in updates {
                if let Some(p) = job.advance(update) {
                    observed.push(p);
                }
            }
            prop_assert!(observed.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(job.progress <= 100);
        }
    }
}
