//! Ebook data model shared by the local cache, the server of record, and the
//! JSON wire format between them.
//!
//! An [`Ebook`] carries two identities: the client-generated external `id`
//! (stable before any server contact) and the server-assigned `internal_id`
//! (present only once the record has been persisted remotely).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Relationship between a local record and the remote store.
///
/// Describes reconciliation state only, never the validity of the data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Not yet pushed since the last local change.
    #[default]
    Pending,
    /// Matches the remote store as of the last successful sync.
    Synced,
    /// The last sync attempt failed.
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }

    /// Whether a catalog load should schedule a sync for this status.
    pub fn needs_sync(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Error)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "error" => Ok(SyncStatus::Error),
            other => Err(format!("unknown sync status: '{}'", other)),
        }
    }
}

/// Descriptive fields extracted from (or entered for) a document.
///
/// Every field is independently optional. An empty `keywords` list means
/// the document carried no keywords.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EbookMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification_date: Option<DateTime<Utc>>,
}

impl EbookMetadata {
    pub fn is_empty(&self) -> bool {
        self == &EbookMetadata::default()
    }
}

/// The unit of catalog data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ebook {
    /// External identity. Empty until the local store assigns one.
    #[serde(default)]
    pub id: String,
    /// Internal identity, assigned by the remote store on first persist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_id: Option<i64>,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EbookMetadata>,
    #[serde(default = "Utc::now")]
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl Ebook {
    /// A fresh, unsaved record: no identities, `pending`, stamped now.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            internal_id: None,
            filename: filename.into(),
            title: None,
            author: None,
            tags: Vec::new(),
            metadata: None,
            uploaded_at: Utc::now(),
            sync_status: SyncStatus::Pending,
        }
    }

    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Rejects records that no store may persist.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.filename.trim().is_empty() {
            return Err(StoreError::Invalid("filename must not be empty".to_string()));
        }
        Ok(())
    }

    /// Replaces `tags` with the normalized form of `tags`.
    pub fn set_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
    }

    /// Adopts the server's canonical view of this record after a successful
    /// sync. Tags and `uploaded_at` stay local.
    pub fn apply_canonical(&mut self, persisted: &Ebook) {
        self.internal_id = persisted.internal_id.or(self.internal_id);
        self.title = persisted.title.clone();
        self.author = persisted.author.clone();
        self.metadata = persisted.metadata.clone();
        self.filename = persisted.filename.clone();
        self.sync_status = SyncStatus::Synced;
    }

    /// Adopts only the internal id, leaving content and status alone.
    pub fn adopt_internal_id(&mut self, persisted: &Ebook) {
        self.internal_id = persisted.internal_id.or(self.internal_id);
    }

    /// True when the fields pushed to the remote store are the same.
    pub fn same_content(&self, other: &Ebook) -> bool {
        self.filename == other.filename
            && self.title == other.title
            && self.author == other.author
            && self.metadata == other.metadata
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(untitled)")
    }
}

/// Trims tags, drops blanks and duplicates, keeps first-appearance order.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Collapses a blank or whitespace-only string to `None`.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_round_trips_through_str() {
        for status in [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Error] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("done".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_needs_sync() {
        assert!(SyncStatus::Pending.needs_sync());
        assert!(SyncStatus::Error.needs_sync());
        assert!(!SyncStatus::Synced.needs_sync());
    }

    #[test]
    fn test_normalize_tags_dedups_and_trims() {
        let tags = normalize_tags(["  rust", "", "pdf ", "rust", "   "]);
        assert_eq!(tags, vec!["rust".to_string(), "pdf".to_string()]);
    }

    #[test]
    fn test_validate_rejects_blank_filename() {
        let ebook = Ebook::new("   ");
        assert!(matches!(ebook.validate(), Err(StoreError::Invalid(_))));
        assert!(Ebook::new("a.pdf").validate().is_ok());
    }

    #[test]
    fn test_apply_canonical_keeps_local_fields() {
        let mut local = Ebook::new("draft.pdf");
        local.id = "ext-1".to_string();
        local.title = Some("Draft".to_string());
        local.tags = vec!["keep".to_string()];
        let uploaded_at = local.uploaded_at;

        let mut persisted = local.clone();
        persisted.internal_id = Some(7);
        persisted.title = Some("Final".to_string());
        persisted.filename = "final.pdf".to_string();
        persisted.tags = Vec::new();

        local.apply_canonical(&persisted);
        assert_eq!(local.internal_id, Some(7));
        assert_eq!(local.title.as_deref(), Some("Final"));
        assert_eq!(local.filename, "final.pdf");
        assert_eq!(local.tags, vec!["keep".to_string()]);
        assert_eq!(local.uploaded_at, uploaded_at);
        assert_eq!(local.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let mut ebook = Ebook::new("a.pdf");
        ebook.id = "ext-1".to_string();
        ebook.internal_id = Some(3);
        ebook.metadata = Some(EbookMetadata {
            page_count: Some(12),
            ..Default::default()
        });
        let value = serde_json::to_value(&ebook).unwrap();
        assert_eq!(value["internalId"], 3);
        assert_eq!(value["syncStatus"], "pending");
        assert_eq!(value["metadata"]["pageCount"], 12);
        assert!(value.get("uploadedAt").is_some());
        assert!(value.get("title").is_none());
        assert!(value.get("author").is_none());

        ebook.title = Some("Report".to_string());
        let value = serde_json::to_value(&ebook).unwrap();
        assert_eq!(value["title"], "Report");
    }

    #[test]
    fn test_same_content_ignores_local_only_fields() {
        let mut a = Ebook::new("a.pdf");
        a.title = Some("Report".to_string());
        let mut b = a.clone();
        b.tags = vec!["x".to_string()];
        b.sync_status = SyncStatus::Synced;
        b.internal_id = Some(4);
        assert!(a.same_content(&b));

        b.title = Some("Annual Report".to_string());
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_minimal_json_fills_defaults() {
        let ebook: Ebook = serde_json::from_str(r#"{"filename":"x.pdf","title":null}"#).unwrap();
        assert!(!ebook.has_id());
        assert_eq!(ebook.internal_id, None);
        assert!(ebook.tags.is_empty());
        assert_eq!(ebook.sync_status, SyncStatus::Pending);
    }
}
