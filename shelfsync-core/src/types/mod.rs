//! Core types for the Shelfsync library model

mod book;
mod metadata;
mod progress;

pub use book::{BookFormat, BookHash, BookRecord};
pub use metadata::{Metadata, SeriesInfo};
pub use progress::ReadingProgress;
