//! PDF metadata extraction over `lopdf`.
//!
//! Reads the document information dictionary (`/Info` in the trailer) and
//! the page tree. Every field is read independently; a field that is present
//! but unreadable is logged and dropped. Only a document that cannot be
//! parsed at all, or one over the size limit, fails the extraction.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use lopdf::{Dictionary, Document, Object};
use tracing::{debug, warn};

use baobab_core::extract::{ExtractError, ExtractedMetadata, MetadataExtractor};

/// Default input limit, matching `[upload].max_bytes`.
pub const DEFAULT_MAX_BYTES: usize = 100 * 1024 * 1024;

/// [`MetadataExtractor`] for PDF documents.
#[derive(Debug, Clone)]
pub struct PdfMetadataExtractor {
    max_bytes: usize,
}

impl PdfMetadataExtractor {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl Default for PdfMetadataExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

impl MetadataExtractor for PdfMetadataExtractor {
    fn extract(&self, bytes: &[u8], filename: &str) -> Result<ExtractedMetadata, ExtractError> {
        if bytes.len() > self.max_bytes {
            return Err(ExtractError::TooLarge {
                filename: filename.to_string(),
                size: bytes.len(),
                max: self.max_bytes,
            });
        }

        let doc = Document::load_mem(bytes).map_err(|e| ExtractError::Open {
            filename: filename.to_string(),
            reason: e.to_string(),
        })?;

        let mut extracted = ExtractedMetadata::default();

        match info_dict(&doc) {
            Some(info) => {
                let text = |key: &str| field(filename, key, text_entry(info, key));
                extracted.title = text("Title");
                extracted.author = text("Author");
                extracted.subject = text("Subject");
                extracted.creator = text("Creator");
                extracted.producer = text("Producer");
                extracted.keywords = text("Keywords")
                    .map(|raw| split_keywords(&raw))
                    .unwrap_or_default();
                extracted.creation_date =
                    field(filename, "CreationDate", date_entry(info, "CreationDate"));
                extracted.modification_date =
                    field(filename, "ModDate", date_entry(info, "ModDate"));
            }
            None => debug!(filename, "document has no info dictionary"),
        }

        let pages = doc.get_pages().len();
        extracted.page_count = match u32::try_from(pages) {
            Ok(0) => None,
            Ok(n) => Some(n),
            Err(_) => field::<u32>(filename, "Pages", Err(format!("{} pages", pages))),
        };

        debug!(
            filename,
            title = ?extracted.title,
            pages = ?extracted.page_count,
            "extracted metadata"
        );
        Ok(extracted)
    }
}

/// Collapses a per-field failure to `None` with a warning.
fn field<T>(filename: &str, key: &str, result: Result<Option<T>, String>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(reason) => {
            warn!(filename, field = key, reason = %reason, "unreadable metadata field");
            None
        }
    }
}

/// The trailer's `/Info` dictionary, following an indirect reference.
fn info_dict(doc: &Document) -> Option<&Dictionary> {
    let info = doc.trailer.get(b"Info").ok()?;
    let info = match info {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    info.as_dict().ok()
}

fn text_entry(dict: &Dictionary, key: &str) -> Result<Option<String>, String> {
    let value = match dict.get(key.as_bytes()) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    let text = match value {
        Object::String(bytes, _) => decode_pdf_text(bytes),
        Object::Name(name) => String::from_utf8_lossy(name).into_owned(),
        Object::Null => return Ok(None),
        other => return Err(format!("expected a string, found {:?}", other)),
    };
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text.to_string()))
    }
}

fn date_entry(dict: &Dictionary, key: &str) -> Result<Option<DateTime<Utc>>, String> {
    match text_entry(dict, key)? {
        Some(raw) => parse_pdf_date(&raw)
            .map(Some)
            .ok_or_else(|| format!("unrecognized date '{}'", raw)),
        None => Ok(None),
    }
}

/// Decodes a PDF text string: UTF-16BE with a byte order mark, UTF-8 with a
/// byte order mark, plain UTF-8, or PDFDocEncoding (read as Latin-1).
pub fn decode_pdf_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Parses `D:YYYYMMDDHHmmSSOHH'mm'` into UTC. Everything after the year is
/// optional; a missing offset is read as UTC.
pub fn parse_pdf_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    let s = s.strip_prefix("D:").unwrap_or(s);

    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits < 4 {
        return None;
    }
    let (stamp, zone) = s.split_at(digits);

    let part = |start: usize, len: usize, default: u32| -> Option<u32> {
        match stamp.get(start..start + len) {
            Some(chunk) => chunk.parse().ok(),
            None if start >= stamp.len() => Some(default),
            None => None,
        }
    };
    let year: i32 = stamp.get(0..4)?.parse().ok()?;
    let month = part(4, 2, 1)?;
    let day = part(6, 2, 1)?;
    let hour = part(8, 2, 0)?;
    let minute = part(10, 2, 0)?;
    let second = part(12, 2, 0)?;

    let offset = parse_pdf_offset(zone)?;
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `Z`, `+HH'mm'`, `-HH'mm`, `+HH`, or nothing.
fn parse_pdf_offset(zone: &str) -> Option<FixedOffset> {
    let zone = zone.trim();
    let sign = match zone.chars().next() {
        None | Some('Z') | Some('z') => return FixedOffset::east_opt(0),
        Some('+') => 1,
        Some('-') => -1,
        Some(_) => return None,
    };
    let rest: String = zone[1..].chars().filter(|c| *c != '\'').collect();
    let hours: i32 = rest.get(0..2)?.parse().ok()?;
    let minutes: i32 = match rest.get(2..4) {
        Some(m) => m.parse().ok()?,
        None => 0,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Splits a `/Keywords` value on commas or semicolons.
pub fn split_keywords(raw: &str) -> Vec<String> {
    baobab_core::models::normalize_tags(raw.split([',', ';']))
}
