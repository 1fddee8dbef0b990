//! The BookRecord type - one physical book in the user's collection

use super::{Metadata, ReadingProgress, SeriesInfo};
use crate::error::IdentityError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Content-derived identity of a book (lowercase hex SHA-256)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BookHash(String);

impl BookHash {
    /// Length of a hex-encoded SHA-256 digest
    pub const LEN: usize = 64;

    /// Wrap a raw digest
    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl FromStr for BookHash {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if lower.len() == Self::LEN && lower.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(lower))
        } else {
            Err(IdentityError::InvalidHash(s.to_string()))
        }
    }
}

impl TryFrom<String> for BookHash {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BookHash> for String {
    fn from(hash: BookHash) -> Self {
        hash.0
    }
}

impl fmt::Display for BookHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container format, sniffed from the content's magic bytes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    Epub,
    Mobi,
    #[default]
    Unknown,
}

impl BookFormat {
    /// Detect the format of raw book content
    pub fn sniff(content: &[u8]) -> Self {
        if content.starts_with(b"PK\x03\x04") {
            BookFormat::Epub
        } else if content.len() >= 68 && &content[60..68] == b"BOOKMOBI" {
            BookFormat::Mobi
        } else {
            BookFormat::Unknown
        }
    }
}

/// One book in the user's collection
///
/// `downloaded_at` set implies the device holds local content for `hash`;
/// `uploaded_at` set implies the remote store does. A record with neither is
/// local-only and has never round-tripped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookRecord {
    /// Content-derived identity, unique key
    pub hash: BookHash,

    pub title: Option<String>,

    pub author: Option<String>,

    pub primary_language: Option<String>,

    #[serde(default)]
    pub format: BookFormat,

    /// Series membership (a back-reference by name, not ownership)
    pub series: Option<SeriesInfo>,

    pub uploaded_at: Option<DateTime<Utc>>,

    pub downloaded_at: Option<DateTime<Utc>>,

    /// Reading position, carried through sync as opaque state
    pub progress: Option<ReadingProgress>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl BookRecord {
    /// Create a local-only record with no resolved metadata
    pub fn new(hash: BookHash) -> Self {
        let now = Utc::now();
        Self {
            hash,
            title: None,
            author: None,
            primary_language: None,
            format: BookFormat::Unknown,
            series: None,
            uploaded_at: None,
            downloaded_at: None,
            progress: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the container format
    pub fn with_format(mut self, format: BookFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set series membership
    pub fn with_series(mut self, series: SeriesInfo) -> Self {
        self.series = Some(series);
        self
    }

    /// Copy display metadata from a resolved document
    pub fn apply_metadata(&mut self, metadata: &Metadata) {
        self.title = Some(metadata.title.clone());
        self.author = metadata.primary_author().map(str::to_string);
        self.primary_language = metadata.language.clone();
        self.series = metadata.series.clone();
        self.updated_at = Utc::now();
    }

    /// Title for display, falling back to the abbreviated hash
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or_else(|| self.hash.short())
    }

    /// Never transferred in either direction
    pub fn is_local_only(&self) -> bool {
        self.uploaded_at.is_none() && self.downloaded_at.is_none()
    }
}
