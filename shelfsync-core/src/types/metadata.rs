//! Book metadata types (Dublin Core subset used for display and grouping)

use serde::{Deserialize, Serialize};

/// Display metadata resolved from a book's document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    /// Book title
    pub title: String,

    /// Authors/creators
    pub creator: Vec<String>,

    /// Subject/genre tags
    pub subject: Vec<String>,

    /// Book description/summary
    pub description: Option<String>,

    /// Publisher name
    pub publisher: Option<String>,

    /// Language code as declared by the document
    pub language: Option<String>,

    /// ISBN, UUID or other publisher identifier
    pub identifier: Option<String>,

    /// Series information
    pub series: Option<SeriesInfo>,
}

impl Metadata {
    /// Create new metadata with a title
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            creator: Vec::new(),
            subject: Vec::new(),
            description: None,
            publisher: None,
            language: None,
            identifier: None,
            series: None,
        }
    }

    /// Add an author/creator
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator.push(creator.into());
        self
    }

    /// Set language
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set series membership
    pub fn with_series(mut self, series: SeriesInfo) -> Self {
        self.series = Some(series);
        self
    }

    /// Get the primary author (first creator)
    pub fn primary_author(&self) -> Option<&str> {
        self.creator.first().map(|s| s.as_str())
    }
}

/// Series information for books that are part of a series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesInfo {
    /// Series name
    pub name: String,

    /// Position in series (can be fractional for novellas, etc.)
    pub position: Option<f32>,
}

impl SeriesInfo {
    pub fn new(name: impl Into<String>, position: Option<f32>) -> Self {
        Self {
            name: name.into(),
            position,
        }
    }
}
