//! Image extraction: header-derived dimensions and a caption record.
//!
//! The gateway does not ship an OCR engine; image uploads produce an
//! `image-caption` extraction whose text is a short human-readable caption and
//! whose metadata carries the pixel dimensions parsed straight from the file
//! header. An OCR extractor can be registered ahead of this one later without
//! touching the pipeline.

use std::time::Instant;

use async_trait::async_trait;

use crate::ingest::extract::{
    ExtractError, ExtractInput, Extraction, ExtractionKind, Extractor,
};

/// Extractor for PNG, JPEG, WebP, and GIF uploads.
pub struct ImageCaptionExtractor;

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Parses `(width, height)` from a PNG IHDR chunk.
fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    // 8-byte signature, 4-byte length, "IHDR", then width/height.
    if bytes.len() < 24 || &bytes[12..16] != b"IHDR" {
        return None;
    }
    Some((be_u32(&bytes[16..20]), be_u32(&bytes[20..24])))
}

/// Walks JPEG segments until a SOF marker carrying the frame dimensions.
fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2usize;
    while i + 9 < bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        // Standalone markers without a length field.
        if (0xD0..=0xD9).contains(&marker) {
            i += 2;
            continue;
        }
        let len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        if matches!(marker, 0xC0 | 0xC1 | 0xC2 | 0xC3) {
            let h = u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]) as u32;
            let w = u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]) as u32;
            return Some((w, h));
        }
        i += 2 + len;
    }
    None
}

/// Parses dimensions from a GIF logical screen descriptor.
fn gif_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 10 {
        return None;
    }
    let w = u16::from_le_bytes([bytes[6], bytes[7]]) as u32;
    let h = u16::from_le_bytes([bytes[8], bytes[9]]) as u32;
    Some((w, h))
}

#[async_trait]
impl Extractor for ImageCaptionExtractor {
    fn id(&self) -> &'static str {
        "image-caption"
    }

    fn version(&self) -> u32 {
        1
    }

    fn handles(&self, mime: &str) -> bool {
        matches!(
            mime,
            "image/png" | "image/jpeg" | "image/webp" | "image/gif"
        )
    }

    async fn extract(&self, input: ExtractInput<'_>) -> Result<Extraction, ExtractError> {
        let started = Instant::now();
        let mut warnings = Vec::new();

        let format = match input.mime {
            "image/png" => "PNG",
            "image/jpeg" => "JPEG",
            "image/webp" => "WebP",
            "image/gif" => "GIF",
            other => return Err(ExtractError::UnsupportedFeature(other.to_string())),
        };

        let dims = match input.mime {
            "image/png" => png_dimensions(input.bytes),
            "image/jpeg" => jpeg_dimensions(input.bytes),
            "image/gif" => gif_dimensions(input.bytes),
            _ => None,
        };

        if input.bytes.len() < 16 {
            return Err(ExtractError::Malformed("image header too short".to_string()));
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("format".to_string(), format.into());
        metadata.insert("mode".to_string(), "caption".into());
        metadata.insert("bytes".to_string(), (input.size_hint).into());

        let caption = match dims {
            Some((w, h)) => {
                metadata.insert("width".to_string(), w.into());
                metadata.insert("height".to_string(), h.into());
                format!("{format} image, {w}x{h} pixels, {} bytes", input.size_hint)
            }
            None => {
                warnings.push("could not determine pixel dimensions".to_string());
                format!("{format} image, {} bytes", input.size_hint)
            }
        };

        Ok(Extraction {
            file_id: String::new(),
            kind: ExtractionKind::ImageCaption,
            text: caption,
            truncated: false,
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

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let mut v = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        v.extend_from_slice(&13u32.to_be_bytes());
        v.extend_from_slice(b"IHDR");
        v.extend_from_slice(&w.to_be_bytes());
        v.extend_from_slice(&h.to_be_bytes());
        v.extend_from_slice(&[8, 6, 0, 0, 0]);
        v
    }

    #[tokio::test]
    async fn png_caption_carries_dimensions() {
        let bytes = png_bytes(640, 480);
        let e = ImageCaptionExtractor
            .extract(ExtractInput {
                bytes: &bytes,
                mime: "image/png",
                size_hint: bytes.len() as u64,
                text_cap: 1024,
            })
            .await
            .unwrap();
        assert_eq!(e.kind, ExtractionKind::ImageCaption);
        assert_eq!(e.metadata["width"], 640);
        assert_eq!(e.metadata["height"], 480);
        assert!(e.text.contains("640x480"));
    }

    #[test]
    fn jpeg_sof_is_found() {
        // SOI, APP0 (len 4), SOF0 with 100x200.
        let bytes: Vec<u8> = vec![
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00, 0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00,
            0xC8, 0x00, 0x64, 0x03, 0x00, 0x00, 0x00,
        ];
        assert_eq!(jpeg_dimensions(&bytes), Some((100, 200)));
    }

    #[tokio::test]
    async fn missing_dimensions_degrade_to_warning() {
        let bytes = b"RIFF\x00\x00\x00\x00WEBPVP8 lots-of-webp-data".to_vec();
        let e = ImageCaptionExtractor
            .extract(ExtractInput {
                bytes: &bytes,
                mime: "image/webp",
                size_hint: bytes.len() as u64,
                text_cap: 1024,
            })
            .await
            .unwrap();
        assert_eq!(e.warnings.len(), 1);
        assert!(e.text.contains("WebP"));
    }

    #[tokio::test]
    async fn truncated_header_is_malformed() {
        let err = ImageCaptionExtractor
            .extract(ExtractInput {
                bytes: &[0xFF, 0xD8],
                mime: "image/jpeg",
                size_hint: 2,
                text_cap: 1024,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Malformed(_)));
    }
}
