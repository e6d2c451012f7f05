//! Deterministic complexity scoring over request features.
//!
//! [`score`] is a pure function: no I/O, no clock, no randomness. The same
//! request plus the same extraction signals always produce the same
//! [`ComplexityScore`], which the router and the observability layer both
//! record. Weights saturate at 100.

use serde::Serialize;

use crate::{
    catalog::{Capability, CapabilitySet},
    chat::ChatRequest,
    ingest::extract::ExtractionKind,
    ingest::ResolvedFile,
};

/// Heuristic token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(chars: usize) -> u32 {
    chars.div_ceil(4) as u32
}

/// Default output ceiling when the client does not ask for one.
const DEFAULT_OUTPUT_CEILING: u32 = 1_024;

/// Per-file signals the scorer consumes.
#[derive(Debug, Clone, Copy)]
pub struct FileSignal {
    /// Stored byte size.
    pub bytes: u64,
    /// Extraction kind, when extraction succeeded.
    pub kind: Option<ExtractionKind>,
    /// Length of the extraction text in characters.
    pub text_chars: usize,
}

impl From<&ResolvedFile> for FileSignal {
    fn from(resolved: &ResolvedFile) -> Self {
        let (kind, text_chars) = match &resolved.outcome {
            Ok(extraction) => (Some(extraction.kind), extraction.text.chars().count()),
            Err(_) => (None, 0),
        };
        FileSignal {
            bytes: resolved.record.size_bytes,
            kind,
            text_chars,
        }
    }
}

/// Deterministic complexity verdict for one request.
#[derive(Debug, Clone, Serialize)]
pub struct ComplexityScore {
    /// Weighted score in [0, 100].
    pub score: u32,
    /// Capabilities the selected model must have.
    pub required_capabilities: CapabilitySet,
    /// Estimated input tokens (messages plus woven extractions).
    pub input_tokens: u32,
    /// Output token ceiling.
    pub output_tokens_ceiling: u32,
    /// Which signals contributed, for logs and route reasons.
    pub rationale: Vec<String>,
}

/// Punctuation density heuristic for code-like content.
fn looks_like_code(text: &str) -> bool {
    if text.contains("```") {
        return true;
    }
    let total = text.chars().count();
    if total < 20 {
        return false;
    }
    let punct = text
        .chars()
        .filter(|c| c.is_ascii_punctuation())
        .count();
    punct * 10 > total
}

/// Scores a request against its resolved file signals.
///
/// `fast_window` is the smallest context window among `fast`-tier models in
/// the catalog snapshot; crossing 75 % of it marks the request long-context.
pub fn score(
    request: &ChatRequest,
    files: &[FileSignal],
    fast_window: Option<u32>,
) -> ComplexityScore {
    let mut total = 0u32;
    let mut rationale = Vec::new();

    // Message payload: +1 per 800 chars of user content, capped at +25.
    let user_chars: usize = request.user_content().map(|c| c.chars().count()).sum();
    let payload_points = ((user_chars / 800) as u32).min(25);
    if payload_points > 0 {
        rationale.push(format!("payload:{payload_points}"));
    }
    total += payload_points;

    // Referenced files: +5 each, capped at +20.
    let file_points = ((files.len() as u32) * 5).min(20);
    if file_points > 0 {
        rationale.push(format!("files:{file_points}"));
    }
    total += file_points;

    // Accumulated file bytes: +1 per 200 KiB, capped at +15.
    let file_bytes: u64 = files.iter().map(|f| f.bytes).sum();
    let byte_points = ((file_bytes / (200 * 1024)) as u32).min(15);
    if byte_points > 0 {
        rationale.push(format!("file-bytes:{byte_points}"));
    }
    total += byte_points;

    // Extraction kinds.
    let has_image = files
        .iter()
        .any(|f| f.kind == Some(ExtractionKind::ImageCaption));
    let has_transcript = files
        .iter()
        .any(|f| f.kind == Some(ExtractionKind::Transcript));
    let has_table = files.iter().any(|f| f.kind == Some(ExtractionKind::Table));
    if has_image {
        total += 10;
        rationale.push("image:10".to_string());
    }
    if has_transcript {
        total += 15;
        rationale.push("audio:15".to_string());
    }
    if has_table {
        total += 5;
        rationale.push("tabular:5".to_string());
    }

    // Explicit capability hints: +10 per required-but-non-text capability.
    let hinted: u32 = request
        .capabilities
        .iter()
        .filter(|c| **c != Capability::Text)
        .count() as u32;
    if hinted > 0 {
        total += hinted * 10;
        rationale.push(format!("capability-hints:{}", hinted * 10));
    }

    // Code-like content.
    if request.user_content().any(looks_like_code) {
        total += 5;
        rationale.push("code:5".to_string());
    }

    let score = total.min(100);

    // Required capabilities.
    let mut required = CapabilitySet::text_only();
    if has_image {
        required.insert(Capability::Vision);
    }
    let transcript_chars: usize = files
        .iter()
        .filter(|f| f.kind == Some(ExtractionKind::Transcript))
        .map(|f| f.text_chars)
        .sum();
    if transcript_chars > 0 {
        required.insert(Capability::AudioUnderstanding);
    }
    for hint in &request.capabilities {
        required.insert(*hint);
    }

    let message_chars: usize = request.messages.iter().map(|m| m.content.chars().count()).sum();
    let woven_chars: usize = files.iter().map(|f| f.text_chars).sum();
    let input_tokens = estimate_tokens(message_chars + woven_chars);

    if let Some(window) = fast_window
        && input_tokens as u64 * 4 > window as u64 * 3
    {
        required.insert(Capability::LongContext);
        rationale.push("long-context".to_string());
    }

    ComplexityScore {
        score,
        required_capabilities: required,
        input_tokens,
        output_tokens_ceiling: request.max_tokens.unwrap_or(DEFAULT_OUTPUT_CEILING),
        rationale,
    }
}

impl ComplexityScore {
    /// Stable fingerprint used to memoize router decisions.
    pub fn fingerprint(&self) -> String {
        let caps: Vec<String> = self
            .required_capabilities
            .iter()
            .map(|c| format!("{c:?}"))
            .collect();
        format!(
            "{}:{}:{}:{}",
            self.score,
            caps.join("+"),
            self.input_tokens,
            self.output_tokens_ceiling
        )
    }
}
