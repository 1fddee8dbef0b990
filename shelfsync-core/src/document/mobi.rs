//! MOBI/AZW metadata extraction

use super::MetadataSource;
use crate::error::DocumentError;
use crate::types::Metadata;
use ::mobi::headers::Language;
use ::mobi::Mobi;

/// Reads the EXTH header metadata of Mobipocket documents
#[derive(Debug, Default, Clone, Copy)]
pub struct MobiMetadata;

impl MetadataSource for MobiMetadata {
    fn open_metadata(&self, content: &[u8]) -> Result<Metadata, DocumentError> {
        let data = content.to_vec();
        let mobi = Mobi::new(&data)
            .map_err(|e| DocumentError::InvalidMobi(format!("{:?}", e)))?;

        let mut metadata = Metadata::new(mobi.title().to_string());
        if let Some(author) = mobi.author() {
            metadata.creator = vec![author.to_string()];
        }
        metadata.publisher = mobi.publisher().map(|s| s.to_string());
        metadata.language = language_code(mobi.language()).map(str::to_string);

        Ok(metadata)
    }
}

/// ISO 639-1 code for a MOBI header language, `None` when unspecified
fn language_code(language: Language) -> Option<&'static str> {
    use Language::*;
    let code = match language {
        Neutral | Unknown => return None,
        Afrikaans => "af",
        Albanian => "sq",
        Arabic => "ar",
        Armenian => "hy",
        Assamese => "as",
        Azeri => "az",
        Basque => "eu",
        Belarusian => "be",
        Bengali => "bn",
        Bulgarian => "bg",
        Catalan => "ca",
        Chinese => "zh",
        Czech => "cs",
        Danish => "da",
        Dutch => "nl",
        English => "en",
        Estonian => "et",
        Faeroese => "fo",
        Farsi => "fa",
        Finnish => "fi",
        French => "fr",
        Georgian => "ka",
        German => "de",
        Greek => "el",
        Gujarati => "gu",
        Hebrew => "he",
        Hindi => "hi",
        Hungarian => "hu",
        Icelandic => "is",
        Indonesian => "id",
        Italian => "it",
        Japanese => "ja",
        Kannada => "kn",
        Kazak => "kk",
        // No two-letter code
        Konkani => "kok",
        Korean => "ko",
        Latvian => "lv",
        Lithuanian => "lt",
        Macedonian => "mk",
        Malay => "ms",
        Malayalam => "ml",
        Maltese => "mt",
        Marathi => "mr",
        Nepali => "ne",
        Norwegian => "no",
        Oriya => "or",
        Polish => "pl",
        Portuguese => "pt",
        Punjabi => "pa",
        Rhaetoromanic => "rm",
        Romanian => "ro",
        Russian => "ru",
        Sami => "se",
        Sanskrit => "sa",
        Serbian => "sr",
        Slovak => "sk",
        Slovenian => "sl",
        Sorbian => "wen",
        Spanish => "es",
        Sutu => "st",
        Swahili => "sw",
        Swedish => "sv",
        Tamil => "ta",
        Tatar => "tt",
        Telugu => "te",
        Thai => "th",
        Tsonga => "ts",
        Tswana => "tn",
        Turkish => "tr",
        Ukrainian => "uk",
        Urdu => "ur",
        Uzbek => "uz",
        Vietnamese => "vi",
        Xhosa => "xh",
        Zulu => "zu",
    };
    Some(code)
}
