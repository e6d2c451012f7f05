//! Audio transcription via the external transcription service.
//!
//! Audio uploads are not decoded in-process. The extractor ships the bytes to
//! the configured transcription service and turns the returned segments into a
//! `transcript` extraction with detected language and duration metadata.
//!
//! Failure posture per the pipeline contract: a service that returns no
//! segments yields a ready-but-empty transcript, not a failure; a missing
//! service configuration degrades the file to `unsupported`; transient
//! downstream errors are retried up to 3 times with exponential backoff
//! (500 ms base, ±20 % jitter) and a 30 s wall clock per attempt.

use std::{sync::Arc, time::Duration, time::Instant};

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;

use crate::ingest::extract::{
    ExtractError, ExtractInput, Extraction, ExtractionKind, Extractor, normalize_text,
};

/// One transcribed segment.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
}

/// Transcription service response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptResponse {
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

/// Transport to the transcription service; mocked in tests.
#[async_trait]
pub trait TranscriptionClient: Send + Sync {
    async fn transcribe(
        &self,
        bytes: &[u8],
        mime: &str,
    ) -> Result<TranscriptResponse, ExtractError>;
}

/// Base delay of the retry backoff.
const BACKOFF_BASE: Duration = Duration::from_millis(500);
/// Wall clock allowed per transcription attempt.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
/// Retries after the initial attempt.
const MAX_RETRIES: u32 = 3;

/// Extractor for audio uploads.
pub struct AudioExtractor {
    client: Option<Arc<dyn TranscriptionClient>>,
}

impl AudioExtractor {
    /// `client` is `None` when no transcription service is configured; the
    /// extractor then refuses with `unsupported-feature` and the pipeline
    /// records the file as unsupported rather than failed.
    pub fn new(client: Option<Arc<dyn TranscriptionClient>>) -> Self {
        Self { client }
    }

    async fn transcribe_with_retry(
        &self,
        client: &Arc<dyn TranscriptionClient>,
        bytes: &[u8],
        mime: &str,
    ) -> Result<TranscriptResponse, ExtractError> {
        let mut attempt = 0u32;
        loop {
            let outcome =
                tokio::time::timeout(ATTEMPT_TIMEOUT, client.transcribe(bytes, mime)).await;

            let err = match outcome {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e @ ExtractError::Downstream { .. })) => e,
                Ok(Err(other)) => return Err(other),
                Err(_) => ExtractError::Timeout,
            };

            if attempt >= MAX_RETRIES {
                return Err(err);
            }

            let base = BACKOFF_BASE * 2u32.pow(attempt);
            let jitter = rand::thread_rng().gen_range(0.8..=1.2);
            tokio::time::sleep(base.mul_f64(jitter)).await;
            attempt += 1;
            tracing::warn!(attempt, %err, "retrying transcription");
        }
    }
}

#[async_trait]
impl Extractor for AudioExtractor {
    fn id(&self) -> &'static str {
        "transcribe"
    }

    fn version(&self) -> u32 {
        1
    }

    fn handles(&self, mime: &str) -> bool {
        matches!(mime, "audio/mpeg" | "audio/wav" | "audio/ogg")
    }

    fn cpu_bound(&self) -> bool {
        false
    }

    async fn extract(&self, input: ExtractInput<'_>) -> Result<Extraction, ExtractError> {
        let started = Instant::now();

        let Some(client) = &self.client else {
            return Err(ExtractError::UnsupportedFeature(
                "no transcription service configured".to_string(),
            ));
        };

        let response = self
            .transcribe_with_retry(client, input.bytes, input.mime)
            .await?;

        let mut joined = String::new();
        for segment in &response.segments {
            if !joined.is_empty() {
                joined.push(' ');
            }
            joined.push_str(segment.text.trim());
        }
        if joined.is_empty()
            && let Some(text) = &response.text
        {
            joined = text.clone();
        }

        let (text, truncated) = normalize_text(joined.as_bytes(), input.text_cap);

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "segment_count".to_string(),
            (response.segments.len() as u64).into(),
        );
        if let Some(language) = response.language {
            metadata.insert("language".to_string(), language.into());
        }
        if let Some(duration) = response.duration {
            metadata.insert("duration_seconds".to_string(), duration.into());
        }
        if let Some(rate) = response.sample_rate {
            metadata.insert("sample_rate".to_string(), rate.into());
        }

        // Empty transcript is a valid outcome: silence transcribes to nothing.
        Ok(Extraction {
            file_id: String::new(),
            kind: ExtractionKind::Transcript,
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
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        failures: AtomicU32,
        response: TranscriptResponse,
    }

    #[async_trait]
    impl TranscriptionClient for FlakyClient {
        async fn transcribe(
            &self,
            _bytes: &[u8],
            _mime: &str,
        ) -> Result<TranscriptResponse, ExtractError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok()
            {
                return Err(ExtractError::Downstream {
                    code: "503".to_string(),
                    message: "overloaded".to_string(),
                });
            }
            Ok(self.response.clone())
        }
    }

    fn input(bytes: &[u8]) -> ExtractInput<'_> {
        ExtractInput {
            bytes,
            mime: "audio/wav",
            size_hint: bytes.len() as u64,
            text_cap: 1024,
        }
    }

    fn response(segments: &[&str]) -> TranscriptResponse {
        TranscriptResponse {
            segments: segments
                .iter()
                .map(|s| TranscriptSegment { text: s.to_string() })
                .collect(),
            text: None,
            language: Some("en".to_string()),
            duration: Some(12.5),
            sample_rate: Some(16_000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let client: Arc<dyn TranscriptionClient> = Arc::new(FlakyClient {
            failures: AtomicU32::new(2),
            response: response(&["hello", "there"]),
        });
        let e = AudioExtractor::new(Some(client))
            .extract(input(b"RIFFxxxxWAVE"))
            .await
            .unwrap();
        assert_eq!(e.kind, ExtractionKind::Transcript);
        assert_eq!(e.text, "hello there");
        assert_eq!(e.metadata["language"], "en");
        assert_eq!(e.metadata["duration_seconds"], 12.5);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_surfaces_downstream_error() {
        let client: Arc<dyn TranscriptionClient> = Arc::new(FlakyClient {
            failures: AtomicU32::new(100),
            response: TranscriptResponse::default(),
        });
        let err = AudioExtractor::new(Some(client))
            .extract(input(b"RIFFxxxxWAVE"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Downstream { .. }));
    }

    #[tokio::test]
    async fn empty_segments_yield_ready_but_empty() {
        let client: Arc<dyn TranscriptionClient> = Arc::new(FlakyClient {
            failures: AtomicU32::new(0),
            response: response(&[]),
        });
        let e = AudioExtractor::new(Some(client))
            .extract(input(b"RIFFxxxxWAVE"))
            .await
            .unwrap();
        assert!(e.text.is_empty());
        assert_eq!(e.metadata["segment_count"], 0);
    }

    #[tokio::test]
    async fn missing_service_is_unsupported() {
        let err = AudioExtractor::new(None)
            .extract(input(b"RIFFxxxxWAVE"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFeature(_)));
    }
}
