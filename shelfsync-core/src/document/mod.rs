//! Document collaborator: opens book content far enough to read its metadata

mod epub;
mod mobi;

pub use self::epub::EpubMetadata;
pub use self::mobi::MobiMetadata;

use crate::error::DocumentError;
use crate::types::{BookFormat, Metadata};

/// Trait for extracting display metadata from raw book content
pub trait MetadataSource: Send + Sync {
    /// Open the document and read its metadata
    fn open_metadata(&self, content: &[u8]) -> Result<Metadata, DocumentError>;
}

/// Metadata source that sniffs the container format and delegates
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentMetadataSource;

impl DocumentMetadataSource {
    pub fn new() -> Self {
        Self
    }
}

impl MetadataSource for DocumentMetadataSource {
    fn open_metadata(&self, content: &[u8]) -> Result<Metadata, DocumentError> {
        match BookFormat::sniff(content) {
            BookFormat::Epub => EpubMetadata.open_metadata(content),
            BookFormat::Mobi => MobiMetadata.open_metadata(content),
            BookFormat::Unknown => Err(DocumentError::UnsupportedFormat),
        }
    }
}

/// Parse a series index such as "3" or "2.5"
pub(crate) fn parse_series_position(raw: &str) -> Option<f32> {
    raw.trim().parse::<f32>().ok().filter(|p| p.is_finite())
}
