//! Plain text, Markdown, and JSON extraction.
//!
//! The simplest extractors: normalize the bytes into bounded UTF-8. JSON
//! uploads are validated and tagged `structured-json` with a little shape
//! metadata; anything that fails to parse is malformed rather than silently
//! downgraded.

use std::time::Instant;

use async_trait::async_trait;

use crate::ingest::extract::{
    ExtractError, ExtractInput, Extraction, ExtractionKind, Extractor, normalize_text,
};

/// Extractor for `text/plain` and `text/markdown`.
pub struct PlainTextExtractor;

#[async_trait]
impl Extractor for PlainTextExtractor {
    fn id(&self) -> &'static str {
        "plain"
    }

    fn version(&self) -> u32 {
        1
    }

    fn handles(&self, mime: &str) -> bool {
        matches!(mime, "text/plain" | "text/markdown")
    }

    async fn extract(&self, input: ExtractInput<'_>) -> Result<Extraction, ExtractError> {
        let started = Instant::now();
        let (text, truncated) = normalize_text(input.bytes, input.text_cap);

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "line_count".to_string(),
            (text.lines().count() as u64).into(),
        );
        if input.mime == "text/markdown" {
            metadata.insert("markdown".to_string(), true.into());
        }

        Ok(Extraction {
            file_id: String::new(),
            kind: ExtractionKind::Text,
            text,
            truncated,
            metadata,
            extractor_id: self.id().to_string(),
            extractor_version: self.version(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            warnings: Vec::new(),
        })
    }
}

/// Extractor for `application/json`.
pub struct JsonExtractor;

#[async_trait]
impl Extractor for JsonExtractor {
    fn id(&self) -> &'static str {
        "json"
    }

    fn version(&self) -> u32 {
        1
    }

    fn handles(&self, mime: &str) -> bool {
        mime == "application/json"
    }

    async fn extract(&self, input: ExtractInput<'_>) -> Result<Extraction, ExtractError> {
        let started = Instant::now();

        let value: serde_json::Value = serde_json::from_slice(input.bytes)
            .map_err(|e| ExtractError::Malformed(format!("invalid JSON: {e}")))?;

        let mut metadata = serde_json::Map::new();
        let shape = match &value {
            serde_json::Value::Object(map) => {
                metadata.insert("key_count".to_string(), (map.len() as u64).into());
                "object"
            }
            serde_json::Value::Array(items) => {
                metadata.insert("item_count".to_string(), (items.len() as u64).into());
                "array"
            }
            serde_json::Value::String(_) => "string",
            serde_json::Value::Number(_) => "number",
            serde_json::Value::Bool(_) => "boolean",
            serde_json::Value::Null => "null",
        };
        metadata.insert("shape".to_string(), shape.into());

        let (text, truncated) = normalize_text(input.bytes, input.text_cap);

        Ok(Extraction {
            file_id: String::new(),
            kind: ExtractionKind::StructuredJson,
            text,
            truncated,
            metadata,
            extractor_id: self.id().to_string(),
            extractor_version: self.version(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            warnings: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(bytes: &'a [u8], mime: &'a str) -> ExtractInput<'a> {
        ExtractInput {
            bytes,
            mime,
            size_hint: bytes.len() as u64,
            text_cap: 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn plain_text_round_trips() {
        let e = PlainTextExtractor
            .extract(input(b"hello\nworld\n", "text/plain"))
            .await
            .unwrap();
        assert_eq!(e.kind, ExtractionKind::Text);
        assert_eq!(e.text, "hello\nworld\n");
        assert_eq!(e.metadata["line_count"], 2);
    }

    #[tokio::test]
    async fn json_shape_metadata() {
        let e = JsonExtractor
            .extract(input(br#"{"a": 1, "b": 2}"#, "application/json"))
            .await
            .unwrap();
        assert_eq!(e.kind, ExtractionKind::StructuredJson);
        assert_eq!(e.metadata["shape"], "object");
        assert_eq!(e.metadata["key_count"], 2);
    }

    #[tokio::test]
    async fn invalid_json_is_malformed() {
        let err = JsonExtractor
            .extract(input(b"{not json", "application/json"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }

    #[tokio::test]
    async fn same_bytes_same_extraction() {
        let a = PlainTextExtractor
            .extract(input(b"deterministic", "text/plain"))
            .await
            .unwrap();
        let b = PlainTextExtractor
            .extract(input(b"deterministic", "text/plain"))
            .await
            .unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.kind, b.kind);
        assert_eq!(a.metadata, b.metadata);
        assert_eq!(a.extractor_version, b.extractor_version);
    }
}
