//! Metadata extraction contract.
//!
//! An extractor turns raw document bytes into best-effort descriptive
//! fields. Each field is extracted independently: a field that cannot be
//! read degrades to `None` instead of failing the whole extraction. Only a
//! document that cannot be opened at all is an error.

use chrono::{DateTime, Utc};

use crate::models::{non_blank, Ebook, EbookMetadata};

/// Whole-document extraction failure.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("could not open document {filename}: {reason}")]
    Open { filename: String, reason: String },
    #[error("document {filename} is {size} bytes, limit is {max}")]
    TooLarge {
        filename: String,
        size: usize,
        max: usize,
    },
}

/// Fields recovered from a document. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub modification_date: Option<DateTime<Utc>>,
    pub page_count: Option<u32>,
}

impl ExtractedMetadata {
    /// Builds a fresh `pending` record for `filename` from these fields.
    pub fn into_ebook(self, filename: &str) -> Ebook {
        let mut ebook = Ebook::new(filename);
        ebook.title = non_blank(self.title);
        ebook.author = non_blank(self.author);
        let metadata = EbookMetadata {
            subject: non_blank(self.subject),
            keywords: self.keywords,
            page_count: self.page_count,
            creator: non_blank(self.creator),
            producer: non_blank(self.producer),
            creation_date: self.creation_date,
            modification_date: self.modification_date,
        };
        if !metadata.is_empty() {
            ebook.metadata = Some(metadata);
        }
        ebook
    }
}

/// Reads descriptive metadata out of document bytes.
///
/// Implementations never mutate `bytes` and never need write access to the
/// document.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], filename: &str) -> Result<ExtractedMetadata, ExtractError>;
}
