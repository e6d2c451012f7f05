//! Bounded PDF text extraction.
//!
//! A deliberately shallow reader: content streams are located by their
//! `stream`/`endstream` delimiters, FlateDecode streams are inflated with a
//! strict output budget, and text is collected from literal strings adjacent
//! to `Tj`/`TJ` show operators. That covers the text-dominant documents the
//! gateway actually sees; anything fancier (CID fonts, object streams,
//! incremental xref) surfaces as a warning, not a failure. Encrypted
//! documents are refused outright.

use std::io::Read;
use std::time::Instant;

use async_trait::async_trait;
use flate2::read::ZlibDecoder;

use crate::ingest::extract::{
    ExtractError, ExtractInput, Extraction, ExtractionKind, Extractor, normalize_text,
};

/// Per-stream inflate budget; a content stream expanding past this is skipped.
const INFLATE_BUDGET: u64 = 8 * 1024 * 1024;

/// Extractor for `application/pdf`.
pub struct PdfExtractor;

/// Finds `(start, end)` byte ranges of stream payloads.
fn stream_ranges(bytes: &[u8]) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut i = 0;
    while let Some(pos) = find(bytes, i, b"stream") {
        let mut start = pos + b"stream".len();
        // The keyword is followed by CRLF or LF before the payload.
        if bytes.get(start) == Some(&b'\r') {
            start += 1;
        }
        if bytes.get(start) == Some(&b'\n') {
            start += 1;
        }
        match find(bytes, start, b"endstream") {
            Some(end) => {
                ranges.push((start, end));
                i = end + b"endstream".len();
            }
            None => break,
        }
    }
    ranges
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Inflates a FlateDecode stream under the output budget.
fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data).take(INFLATE_BUDGET + 1);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).ok()?;
    if out.len() as u64 > INFLATE_BUDGET {
        return None;
    }
    Some(out)
}

/// Pulls literal strings out of a content stream that uses text-show operators.
fn collect_text(content: &[u8], out: &mut String, cap: usize) -> bool {
    if find(content, 0, b"Tj").is_none() && find(content, 0, b"TJ").is_none() {
        return false;
    }

    let mut i = 0;
    let mut wrote = false;
    while i < content.len() {
        if content[i] == b'(' {
            let mut depth = 1;
            let mut j = i + 1;
            let mut literal = Vec::new();
            while j < content.len() && depth > 0 {
                match content[j] {
                    b'\\' if j + 1 < content.len() => {
                        let esc = content[j + 1];
                        match esc {
                            b'n' => literal.push(b'\n'),
                            b't' => literal.push(b'\t'),
                            b'(' | b')' | b'\\' => literal.push(esc),
                            // Octal escapes and the rest contribute nothing useful.
                            _ => {}
                        }
                        j += 2;
                        continue;
                    }
                    b'(' => {
                        depth += 1;
                        literal.push(b'(');
                    }
                    b')' => {
                        depth -= 1;
                        if depth > 0 {
                            literal.push(b')');
                        }
                    }
                    c => literal.push(c),
                }
                j += 1;
            }
            if !literal.is_empty() {
                let (piece, _) = normalize_text(&literal, cap.saturating_sub(out.len()));
                if !piece.is_empty() {
                    if !out.is_empty() && !out.ends_with('\n') && !out.ends_with(' ') {
                        out.push(' ');
                    }
                    out.push_str(&piece);
                    wrote = true;
                }
            }
            if out.len() >= cap {
                return wrote;
            }
            i = j;
        } else {
            i += 1;
        }
    }
    wrote
}

#[async_trait]
impl Extractor for PdfExtractor {
    fn id(&self) -> &'static str {
        "pdf"
    }

    fn version(&self) -> u32 {
        1
    }

    fn handles(&self, mime: &str) -> bool {
        mime == "application/pdf"
    }

    async fn extract(&self, input: ExtractInput<'_>) -> Result<Extraction, ExtractError> {
        let started = Instant::now();
        let bytes = input.bytes;

        if !bytes.starts_with(b"%PDF-") {
            return Err(ExtractError::Malformed("missing %PDF header".to_string()));
        }
        if find(bytes, 0, b"/Encrypt").is_some() {
            return Err(ExtractError::Encrypted);
        }

        let mut text = String::new();
        let mut warnings = Vec::new();
        let mut skipped_streams = 0u32;
        let ranges = stream_ranges(bytes);

        for &(start, end) in &ranges {
            if text.len() >= input.text_cap {
                break;
            }
            let raw = &bytes[start..end];
            match inflate(raw) {
                Some(inflated) => {
                    collect_text(&inflated, &mut text, input.text_cap);
                }
                None => {
                    // Either not FlateDecode or past the inflate budget; try
                    // the raw bytes in case the stream is uncompressed.
                    if !collect_text(raw, &mut text, input.text_cap) {
                        skipped_streams += 1;
                    }
                }
            }
        }

        if skipped_streams > 0 {
            warnings.push(format!("{skipped_streams} content streams not decodable"));
        }
        if text.is_empty() {
            warnings.push("no text-show operators found".to_string());
        }

        let truncated = text.len() >= input.text_cap;
        let pages = count_pages(bytes);

        let mut metadata = serde_json::Map::new();
        metadata.insert("page_count".to_string(), pages.into());
        metadata.insert("stream_count".to_string(), (ranges.len() as u64).into());

        Ok(Extraction {
            file_id: String::new(),
            kind: ExtractionKind::Text,
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

/// Counts page objects; `/Type /Page` with or without the space.
fn count_pages(bytes: &[u8]) -> u64 {
    let mut count = 0u64;
    let mut i = 0;
    while let Some(pos) = find(bytes, i, b"/Type") {
        let tail = &bytes[pos + 5..(pos + 12).min(bytes.len())];
        let tail_trim: Vec<u8> = tail.iter().copied().filter(|b| *b != b' ').collect();
        if tail_trim.starts_with(b"/Page") && !tail_trim.starts_with(b"/Pages") {
            count += 1;
        }
        i = pos + 5;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pdf(content: &[u8]) -> Vec<u8> {
        let mut v = b"%PDF-1.4\n1 0 obj << /Type /Page >> endobj\n2 0 obj << /Length 99 >>\nstream\n"
            .to_vec();
        v.extend_from_slice(content);
        v.extend_from_slice(b"\nendstream\nendobj\n%%EOF");
        v
    }

    fn input(bytes: &[u8]) -> ExtractInput<'_> {
        ExtractInput {
            bytes,
            mime: "application/pdf",
            size_hint: bytes.len() as u64,
            text_cap: 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn uncompressed_text_stream_is_extracted() {
        let pdf = minimal_pdf(b"BT /F1 12 Tf (Hello) Tj (world) Tj ET");
        let e = PdfExtractor.extract(input(&pdf)).await.unwrap();
        assert_eq!(e.kind, ExtractionKind::Text);
        assert_eq!(e.text, "Hello world");
        assert_eq!(e.metadata["page_count"], 1);
    }

    #[tokio::test]
    async fn flate_stream_is_inflated() {
        use flate2::{Compression, write::ZlibEncoder};
        use std::io::Write;

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"BT (compressed text) Tj ET").unwrap();
        let compressed = enc.finish().unwrap();

        let pdf = minimal_pdf(&compressed);
        let e = PdfExtractor.extract(input(&pdf)).await.unwrap();
        assert_eq!(e.text, "compressed text");
    }

    #[tokio::test]
    async fn escaped_parens_are_unescaped() {
        let pdf = minimal_pdf(br"BT (a \(b\) c) Tj ET");
        let e = PdfExtractor.extract(input(&pdf)).await.unwrap();
        assert_eq!(e.text, "a (b) c");
    }

    #[tokio::test]
    async fn encrypted_pdf_is_refused() {
        let pdf = b"%PDF-1.4\n<< /Encrypt 5 0 R >>\n%%EOF".to_vec();
        let err = PdfExtractor.extract(input(&pdf)).await.unwrap_err();
        assert!(matches!(err, ExtractError::Encrypted));
    }

    #[tokio::test]
    async fn non_pdf_is_malformed() {
        let err = PdfExtractor.extract(input(b"not a pdf")).await.unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }

    #[tokio::test]
    async fn textless_pdf_warns_but_succeeds() {
        let pdf = minimal_pdf(&[0u8, 1, 2, 3]);
        let e = PdfExtractor.extract(input(&pdf)).await.unwrap();
        assert!(e.text.is_empty());
        assert!(!e.warnings.is_empty());
    }
}
