//! EPUB metadata extraction

use super::{parse_series_position, MetadataSource};
use crate::error::DocumentError;
use crate::types::{Metadata, SeriesInfo};
use std::io::Cursor;

/// Reads the OPF metadata of EPUB 2/3 documents
#[derive(Debug, Default, Clone, Copy)]
pub struct EpubMetadata;

impl EpubMetadata {
    fn extract(&self, epub: &::epub::doc::EpubDoc<Cursor<Vec<u8>>>) -> Metadata {
        let get_meta =
            |key: &str| -> Option<String> { epub.mdata(key).map(|item| item.value.clone()) };

        let get_meta_all = |key: &str| -> Vec<String> {
            epub.metadata
                .iter()
                .filter(|item| item.property == key)
                .map(|item| item.value.clone())
                .collect()
        };

        let title = get_meta("title").unwrap_or_else(|| "Unknown Title".to_string());

        let mut metadata = Metadata::new(title);
        metadata.creator = get_meta_all("creator");
        metadata.subject = get_meta_all("subject");
        metadata.description = get_meta("description");
        metadata.publisher = get_meta("publisher");
        metadata.language = get_meta("language");
        metadata.identifier = get_meta("identifier");

        // Calibre writes EPUB2 <meta name="calibre:series">; EPUB3 uses collections
        let series_name =
            get_meta("calibre:series").or_else(|| get_meta("belongs-to-collection"));
        if let Some(name) = series_name.filter(|n| !n.trim().is_empty()) {
            let position = get_meta("calibre:series_index")
                .or_else(|| get_meta("group-position"))
                .and_then(|raw| parse_series_position(&raw));
            metadata.series = Some(SeriesInfo::new(name.trim(), position));
        }

        metadata
    }
}

impl MetadataSource for EpubMetadata {
    fn open_metadata(&self, content: &[u8]) -> Result<Metadata, DocumentError> {
        let cursor = Cursor::new(content.to_vec());
        let epub = ::epub::doc::EpubDoc::from_reader(cursor)
            .map_err(|e| DocumentError::InvalidEpub(e.to_string()))?;

        Ok(self.extract(&epub))
    }
}
