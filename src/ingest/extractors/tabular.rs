//! CSV / TSV extraction.
//!
//! Delimited files become `table` extractions: the normalized raw content as
//! text plus row/column metadata. Parsing is deliberately shallow, a line
//! split with quote awareness, because the downstream consumer is a language
//! model, not a spreadsheet.

use std::time::Instant;

use async_trait::async_trait;

use crate::ingest::extract::{
    ExtractError, ExtractInput, Extraction, ExtractionKind, Extractor, normalize_text,
};

/// Extractor for `text/csv` and `text/tab-separated-values`.
pub struct TabularExtractor;

impl TabularExtractor {
    fn delimiter(mime: &str) -> char {
        if mime == "text/tab-separated-values" {
            '\t'
        } else {
            ','
        }
    }

    /// Counts fields in one record, respecting double-quoted cells.
    fn field_count(line: &str, delimiter: char) -> usize {
        let mut count = 1;
        let mut in_quotes = false;
        for c in line.chars() {
            match c {
                '"' => in_quotes = !in_quotes,
                c if c == delimiter && !in_quotes => count += 1,
                _ => {}
            }
        }
        count
    }
}

#[async_trait]
impl Extractor for TabularExtractor {
    fn id(&self) -> &'static str {
        "tabular"
    }

    fn version(&self) -> u32 {
        1
    }

    fn handles(&self, mime: &str) -> bool {
        matches!(mime, "text/csv" | "text/tab-separated-values")
    }

    async fn extract(&self, input: ExtractInput<'_>) -> Result<Extraction, ExtractError> {
        let started = Instant::now();
        let delimiter = Self::delimiter(input.mime);

        let (text, truncated) = normalize_text(input.bytes, input.text_cap);
        if text.trim().is_empty() {
            return Err(ExtractError::Malformed("empty delimited file".to_string()));
        }

        let mut warnings = Vec::new();
        let mut rows = 0u64;
        let mut columns = 0usize;
        let mut ragged = false;

        for (i, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            rows += 1;
            let fields = Self::field_count(line, delimiter);
            if i == 0 {
                columns = fields;
            } else if fields != columns {
                ragged = true;
            }
        }
        if ragged {
            warnings.push("inconsistent field counts across rows".to_string());
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("row_count".to_string(), rows.into());
        metadata.insert("column_count".to_string(), (columns as u64).into());
        metadata.insert(
            "delimiter".to_string(),
            delimiter.to_string().into(),
        );

        Ok(Extraction {
            file_id: String::new(),
            kind: ExtractionKind::Table,
            text,
            truncated,
            metadata,
            extractor_id: self.id().to_string(),
            extractor_version: self.version(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            warnings,
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
    async fn csv_rows_and_columns_counted() {
        let e = TabularExtractor
            .extract(input(b"name,age\nalice,30\nbob,41\n", "text/csv"))
            .await
            .unwrap();
        assert_eq!(e.kind, ExtractionKind::Table);
        assert_eq!(e.metadata["row_count"], 3);
        assert_eq!(e.metadata["column_count"], 2);
        assert!(e.warnings.is_empty());
    }

    #[tokio::test]
    async fn quoted_delimiters_do_not_split() {
        let e = TabularExtractor
            .extract(input(b"name,quote\nalice,\"a, b, c\"\n", "text/csv"))
            .await
            .unwrap();
        assert_eq!(e.metadata["column_count"], 2);
        assert!(e.warnings.is_empty());
    }

    #[tokio::test]
    async fn ragged_rows_warn() {
        let e = TabularExtractor
            .extract(input(b"a,b\n1,2,3\n", "text/csv"))
            .await
            .unwrap();
        assert_eq!(e.warnings.len(), 1);
    }

    #[tokio::test]
    async fn empty_file_is_malformed() {
        let err = TabularExtractor
            .extract(input(b"  \n", "text/csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }

    #[tokio::test]
    async fn tsv_uses_tab_delimiter() {
        let e = TabularExtractor
            .extract(input(b"a\tb\tc\n1\t2\t3\n", "text/tab-separated-values"))
            .await
            .unwrap();
        assert_eq!(e.metadata["column_count"], 3);
    }
}
