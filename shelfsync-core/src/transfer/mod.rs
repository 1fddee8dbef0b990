//! Transfer engine: job model, queue/limiter, retry policy and orchestrator

mod job;
mod orchestrator;
mod queue;
mod retry;

pub use job::{
    Direction, JobCounts, JobState, Priority, RequestOptions, TransferEvent, TransferEventKind,
    TransferJob, TransferOutcome,
};
pub use orchestrator::{CancelResult, Orchestrator};
pub use queue::{QueuedJob, TransferQueue};
pub use retry::RetryPolicy;
