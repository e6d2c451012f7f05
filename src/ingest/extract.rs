//! Extraction types, the extractor contract, and the format registry.
//!
//! An extractor is registered for a set of MIME types and turns raw bytes into
//! an [`Extraction`]: bounded UTF-8 text plus per-kind metadata. Extractors
//! are pure with respect to their input (same bytes + same version ⇒ same
//! record), enforce their own byte caps, and never retain the input after
//! returning. Adding a format means registering one more extractor; nothing
//! else in the gateway changes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Semantic category of extracted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionKind {
    Text,
    Table,
    ImageCaption,
    Transcript,
    StructuredJson,
}

/// Canonical textual + metadata representation of an uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    /// File this extraction was produced for.
    pub file_id: String,
    /// Semantic category.
    pub kind: ExtractionKind,
    /// Bounded, normalized UTF-8 text.
    pub text: String,
    /// Whether the text was cut at the configured cap.
    pub truncated: bool,
    /// Per-kind metadata (page count, language, duration, dimensions…).
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Registry id of the producing extractor.
    pub extractor_id: String,
    /// Version of the producing extractor; part of the cache key.
    pub extractor_version: u32,
    /// Wall-clock extraction time.
    pub elapsed_ms: u64,
    /// Non-fatal oddities encountered while extracting.
    pub warnings: Vec<String>,
}

impl Extraction {
    /// Synthetic record for files no extractor handles.
    pub fn unsupported(file_id: String, mime: &str) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("mime".to_string(), mime.into());
        Self {
            file_id,
            kind: ExtractionKind::Text,
            text: String::new(),
            truncated: false,
            metadata,
            extractor_id: "none".to_string(),
            extractor_version: 0,
            elapsed_ms: 0,
            warnings: vec![format!("no extractor registered for {mime}")],
        }
    }
}

/// Typed extraction failures.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    #[error("malformed input: {0}")]
    Malformed(String),
    #[error("input is encrypted")]
    Encrypted,
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("input exceeds extractor byte cap")]
    TooLarge,
    #[error("extraction timed out")]
    Timeout,
    #[error("downstream service error {code}: {message}")]
    Downstream { code: String, message: String },
}

/// Input handed to an extractor: the full bytes plus context.
pub struct ExtractInput<'a> {
    /// Uploaded bytes (already bounded by the upload cap).
    pub bytes: &'a [u8],
    /// Detected MIME type.
    pub mime: &'a str,
    /// Declared size; extractors may refuse early on it.
    pub size_hint: u64,
    /// Cap on the produced text in bytes.
    pub text_cap: usize,
}

/// Contract every registered extractor fulfills.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Stable registry id; part of the extraction cache key.
    fn id(&self) -> &'static str;

    /// Version; bumping it invalidates cached extractions.
    fn version(&self) -> u32;

    /// Whether this extractor handles the given detected MIME.
    fn handles(&self, mime: &str) -> bool;

    /// CPU-bound extractors run on the bounded worker pool; extractors that
    /// mostly wait on I/O (transcription) stay on the reactor.
    fn cpu_bound(&self) -> bool {
        true
    }

    /// Produces an extraction or a typed failure.
    ///
    /// The returned record's `file_id` is filled in by the dispatcher.
    async fn extract(&self, input: ExtractInput<'_>) -> Result<Extraction, ExtractError>;
}

/// Ordered extractor registry; first match wins.
pub struct ExtractorRegistry {
    extractors: Vec<std::sync::Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new(extractors: Vec<std::sync::Arc<dyn Extractor>>) -> Self {
        Self { extractors }
    }

    /// Picks the extractor for a detected MIME, if any.
    pub fn pick(&self, mime: &str) -> Option<std::sync::Arc<dyn Extractor>> {
        self.extractors.iter().find(|e| e.handles(mime)).cloned()
    }
}

/// Normalizes raw bytes into bounded gateway text.
///
/// Invalid UTF-8 becomes U+FFFD; control characters below U+0020 other than
/// TAB and LF are stripped, CR included; output is cut at
/// `cap` bytes on a char boundary with the `truncated` flag set.
pub fn normalize_text(bytes: &[u8], cap: usize) -> (String, bool) {
    let raw = String::from_utf8_lossy(bytes);
    let mut out = String::with_capacity(raw.len().min(cap));
    let mut truncated = false;

    for c in raw.chars() {
        if c < '\u{20}' && c != '\t' && c != '\n' {
            continue;
        }
        if out.len() + c.len_utf8() > cap {
            truncated = true;
            break;
        }
        out.push(c);
    }

    (out, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_chars_are_stripped() {
        let (text, truncated) = normalize_text(b"a\x00b\x07c\td\ne\r", 1024);
        assert_eq!(text, "abc\td\ne");
        assert!(!truncated);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let (text, _) = normalize_text(&[b'o', b'k', 0xFF, 0xFE, b'!'], 1024);
        assert!(text.starts_with("ok"));
        assert!(text.contains('\u{FFFD}'));
        assert!(text.ends_with('!'));
    }

    #[test]
    fn cap_is_enforced_on_char_boundary() {
        let input = "é".repeat(100);
        let (text, truncated) = normalize_text(input.as_bytes(), 33);
        assert!(truncated);
        assert!(text.len() <= 33);
        assert!(text.chars().all(|c| c == 'é'));
    }

    #[test]
    fn normalized_text_is_always_valid_utf8() {
        let noisy: Vec<u8> = (0..=255u8).collect();
        let (text, _) = normalize_text(&noisy, 4096);
        assert!(std::str::from_utf8(text.as_bytes()).is_ok());
        assert!(!text.chars().any(|c| c < '\u{20}' && c != '\t' && c != '\n'));
    }

    #[test]
    fn unsupported_record_is_empty_text_kind() {
        let e = Extraction::unsupported("f1".into(), "application/zip");
        assert_eq!(e.kind, ExtractionKind::Text);
        assert!(e.text.is_empty());
        assert_eq!(e.extractor_id, "none");
    }
}
