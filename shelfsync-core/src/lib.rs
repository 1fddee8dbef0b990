//! Shelfsync Core Library
//!
//! This crate keeps a personal ebook library in sync with a remote store.
//! Books are identified by a SHA-256 hash of their content, listed on a
//! [`Bookshelf`] grouped by series, and moved in either direction by a
//! bounded, cancellable transfer engine.

pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod identity;
pub mod persist;
pub mod remote;
pub mod selection;
pub mod session;
pub mod shelf;
pub mod storage;
pub mod transfer;
pub mod types;

pub use config::EngineConfig;
pub use engine::SyncEngine;
pub use error::{
    IdentityError, MetadataError, RemoteError, Result, StorageError, SyncError, TransferError,
};
pub use selection::{BulkBatch, BulkOutcome, SelectionController};
pub use shelf::{Bookshelf, SeriesGroup, ShelfFilter, ShelfItem};
pub use transfer::{
    CancelResult, Direction, JobState, Orchestrator, RequestOptions, TransferEvent,
    TransferEventKind, TransferJob, TransferOutcome,
};
pub use types::{BookFormat, BookHash, BookRecord, Metadata, ReadingProgress, SeriesInfo};
