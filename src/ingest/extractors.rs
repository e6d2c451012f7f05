//! Format-specific extractors.
//!
//! Each submodule registers one extractor with the
//! [`ExtractorRegistry`](crate::ingest::extract::ExtractorRegistry); the
//! dispatcher picks by detected MIME. Adding a format means adding one module
//! here and one line to [`default_registry`].

use std::sync::Arc;

use crate::ingest::extract::ExtractorRegistry;
use crate::ingest::extractors::audio::TranscriptionClient;

/// Audio transcription via the external service.
pub mod audio;

/// Image dimensions and captions.
pub mod image;

/// Bounded PDF text scanning.
pub mod pdf;

/// CSV / TSV tables.
pub mod tabular;

/// Plain text, Markdown, JSON.
pub mod text;

/// Builds the registry with every built-in extractor.
///
/// `transcription` is `None` when no transcription service is configured;
/// audio uploads then degrade to `unsupported`.
pub fn default_registry(transcription: Option<Arc<dyn TranscriptionClient>>) -> ExtractorRegistry {
    ExtractorRegistry::new(vec![
        Arc::new(text::PlainTextExtractor),
        Arc::new(text::JsonExtractor),
        Arc::new(tabular::TabularExtractor),
        Arc::new(pdf::PdfExtractor),
        Arc::new(image::ImageCaptionExtractor),
        Arc::new(audio::AudioExtractor::new(transcription)),
    ])
}
