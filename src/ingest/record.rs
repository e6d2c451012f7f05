//! File records: immutable upload metadata plus extraction status.
//!
//! A [`FileRecord`] is created once by the upload handler and mutated only in
//! its `status` field by the extraction dispatcher. Bytes live in the blob
//! store; the record serializes to the sidecar `<id>.meta.json` and to the
//! `/api/v1/files` responses.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a file's extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionStatus {
    Pending,
    InProgress,
    Ready,
    Failed,
    Unsupported,
}

/// Immutable metadata about one uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Opaque collision-resistant id.
    pub id: String,
    /// Filename exactly as the client declared it.
    pub original_name: String,
    /// Filename with path separators and control characters stripped.
    pub sanitized_name: String,
    /// MIME type the client declared.
    pub declared_mime: String,
    /// MIME type sniffed from the leading bytes; authoritative.
    pub detected_mime: String,
    /// Whether declared and detected MIME disagreed.
    pub mime_mismatch: bool,
    /// Exact byte size.
    pub size_bytes: u64,
    /// Hex SHA-256 of the contents.
    pub sha256: String,
    /// Upload instant.
    pub uploaded_at: DateTime<Utc>,
    /// Retention expiry; the sweeper deletes the blob after this.
    pub expires_at: DateTime<Utc>,
    /// Final location inside the blob store.
    pub storage_path: PathBuf,
    /// Extraction lifecycle state.
    pub status: ExtractionStatus,
    /// Owner identity key; files are visible only to their owner.
    pub identity: String,
}

impl FileRecord {
    /// Generates a fresh opaque file id.
    pub fn new_id() -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Strips path separators and control characters from a client filename.
///
/// An empty result falls back to `"upload"`; the stored name is informational
/// only since the on-disk name is derived from the random id.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0') && !c.is_control())
        .collect();

    // A name like "..": nothing traversal-shaped may survive.
    let cleaned = cleaned.trim_matches('.').trim();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
