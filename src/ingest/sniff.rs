//! Magic-number MIME detection for uploaded bytes.
//!
//! The detected MIME is derived from the leading bytes of the upload, never
//! from the client's declared type; the two are compared and a mismatch is
//! recorded on the file record. Text-family refinement trusts the declared
//! subtype (csv vs markdown vs plain) only when the bytes themselves look
//! like text.

/// How many leading bytes the sniffer inspects.
pub const SNIFF_LEN: usize = 512;

/// Sniffs a MIME type from the leading bytes of an upload.
///
/// `declared` refines generic text detection: bytes that look like UTF-8 text
/// adopt a declared `text/*` subtype, since `text/csv` and `text/markdown`
/// have no magic numbers of their own.
pub fn detect_mime(head: &[u8], declared: &str) -> String {
    if head.starts_with(b"%PDF-") {
        return "application/pdf".to_string();
    }
    if head.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return "image/png".to_string();
    }
    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg".to_string();
    }
    if head.len() >= 12 && head.starts_with(b"RIFF") {
        if &head[8..12] == b"WEBP" {
            return "image/webp".to_string();
        }
        if &head[8..12] == b"WAVE" {
            return "audio/wav".to_string();
        }
    }
    if head.starts_with(b"OggS") {
        return "audio/ogg".to_string();
    }
    if head.starts_with(b"ID3")
        || (head.len() >= 2 && head[0] == 0xFF && (head[1] & 0xE0) == 0xE0)
    {
        return "audio/mpeg".to_string();
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return "image/gif".to_string();
    }
    if head.starts_with(b"PK\x03\x04") {
        return "application/zip".to_string();
    }

    if looks_like_text(head) {
        let trimmed = head
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .map(|i| &head[i..])
            .unwrap_or(head);
        if trimmed.starts_with(b"{") || trimmed.starts_with(b"[") {
            return "application/json".to_string();
        }
        if declared.starts_with("text/") {
            return declared.to_string();
        }
        if declared == "application/json" {
            return declared.to_string();
        }
        return "text/plain".to_string();
    }

    "application/octet-stream".to_string()
}

/// Heuristic: valid UTF-8 with no embedded NUL and mostly printable bytes.
fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() {
        return false;
    }
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte sequence may be cut at the sniff boundary; tolerate a
        // trailing incomplete sequence but nothing else.
        Err(e) => e.valid_up_to() + 4 >= head.len() && e.error_len().is_none(),
    }
}

/// File extension used for the on-disk blob name.
pub fn extension_for(mime: &str) -> &'static str {
    match mime {
        "application/pdf" => "pdf",
        "application/json" => "json",
        "text/csv" => "csv",
        "text/tab-separated-values" => "tsv",
        "text/markdown" => "md",
        "text/plain" => "txt",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "audio/mpeg" => "mp3",
        "audio/wav" => "wav",
        "audio/ogg" => "ogg",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_signatures_win_over_declared() {
        assert_eq!(detect_mime(b"%PDF-1.7\n...", "text/plain"), "application/pdf");
        assert_eq!(
            detect_mime(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0], "image/jpeg"),
            "image/png"
        );
        assert_eq!(detect_mime(&[0xFF, 0xD8, 0xFF, 0xE0], "text/plain"), "image/jpeg");
    }

    #[test]
    fn riff_container_disambiguates() {
        let mut webp = b"RIFF\x00\x00\x00\x00WEBP".to_vec();
        webp.extend_from_slice(b"VP8 ");
        assert_eq!(detect_mime(&webp, ""), "image/webp");

        let wav = b"RIFF\x24\x00\x00\x00WAVEfmt ";
        assert_eq!(detect_mime(wav, ""), "audio/wav");
    }

    #[test]
    fn text_refines_by_declared_subtype() {
        assert_eq!(detect_mime(b"a,b,c\n1,2,3\n", "text/csv"), "text/csv");
        assert_eq!(detect_mime(b"# Title\n\nBody", "text/markdown"), "text/markdown");
        assert_eq!(detect_mime(b"hello world", "application/pdf"), "text/plain");
        assert_eq!(detect_mime(b"  {\"k\": 1}", "text/plain"), "application/json");
    }

    #[test]
    fn binary_noise_is_octet_stream() {
        assert_eq!(detect_mime(&[0x00, 0x01, 0x02, 0x03], "text/plain"), "application/octet-stream");
    }
}
