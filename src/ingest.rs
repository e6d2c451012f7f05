//! Ingestion and content extraction pipeline.
//!
//! The pipeline owns the blob store, the in-memory file index, and the
//! extractor registry. The flow for an upload: stream the bytes into a
//! temporary file while counting and hashing, sniff the MIME from the leading
//! bytes, enforce the size cap and the allow-list, then atomically commit the
//! blob plus its metadata sidecar. Extraction is idempotent and single-flight
//! per file id, memoized in the cache keyed by content hash so identical
//! re-uploads never re-extract.

use std::{collections::HashSet, sync::Arc};

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::{io::AsyncWriteExt, sync::OnceCell};

use crate::{
    cache::Cache,
    config::GatewayConfig,
    error::GatewayError,
    worker::CpuPool,
};

pub mod blob;
pub mod extract;
pub mod extractors;
pub mod record;
pub mod sniff;

use blob::BlobStore;
use extract::{ExtractError, ExtractInput, Extraction, ExtractorRegistry};
use record::{ExtractionStatus, FileRecord, sanitize_filename};

/// Non-blocking extraction lookup result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case", tag = "state")]
pub enum ExtractionLookup {
    Ready { extraction: Extraction },
    Pending { status: ExtractionStatus },
    NotFound,
}

/// A referenced file resolved for prompt weaving.
pub struct ResolvedFile {
    pub record: FileRecord,
    /// The extraction, or the reason it is unavailable.
    pub outcome: Result<Extraction, String>,
}

/// Ingestion pipeline facade.
pub struct IngestPipeline {
    blob: BlobStore,
    records: DashMap<String, FileRecord>,
    registry: ExtractorRegistry,
    cache: Arc<Cache>,
    worker: Arc<CpuPool>,
    extractions: DashMap<String, Extraction>,
    flights: DashMap<String, Arc<OnceCell<Result<Extraction, GatewayError>>>>,
    attempts: DashMap<String, u32>,
    failures: DashMap<String, String>,
    allowed: HashSet<String>,
    max_file_bytes: u64,
    text_cap: usize,
    retention: chrono::Duration,
}

impl IngestPipeline {
    /// Opens the blob store and rebuilds the file index from sidecars. An
    /// extraction that was in progress when the process died becomes pending
    /// again.
    pub async fn open(
        cfg: &GatewayConfig,
        registry: ExtractorRegistry,
        cache: Arc<Cache>,
        worker: Arc<CpuPool>,
    ) -> anyhow::Result<Self> {
        let blob = BlobStore::open(cfg.blob_root.clone()).await?;

        let records = DashMap::new();
        for mut record in blob.load_records().await? {
            if record.status == ExtractionStatus::InProgress {
                record.status = ExtractionStatus::Pending;
                let _ = blob.write_meta(&record).await;
            }
            records.insert(record.id.clone(), record);
        }

        Ok(Self {
            blob,
            records,
            registry,
            cache,
            worker,
            extractions: DashMap::new(),
            flights: DashMap::new(),
            attempts: DashMap::new(),
            failures: DashMap::new(),
            allowed: cfg.allowed_mime_types.iter().cloned().collect(),
            max_file_bytes: cfg.max_file_bytes,
            text_cap: cfg.extraction.text_cap_bytes,
            retention: chrono::Duration::seconds(cfg.extraction.retention_secs as i64),
        })
    }

    /// Consumes an upload stream into the blob store.
    ///
    /// The byte cap is enforced mid-stream: one byte over the limit aborts the
    /// write and discards the temporary, so no partial record is ever
    /// persisted. The detected MIME comes from the leading bytes, never from
    /// the declared type; a mismatch is recorded but allowed.
    pub async fn upload<S, E>(
        &self,
        identity: &str,
        declared_name: &str,
        declared_mime: &str,
        mut stream: S,
    ) -> Result<FileRecord, GatewayError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let (temp, mut file) = self.blob.create_temp().await.map_err(internal)?;

        let mut hasher = Sha256::new();
        let mut head: Vec<u8> = Vec::with_capacity(sniff::SNIFF_LEN);
        let mut size: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    self.blob.discard_temp(&temp).await;
                    return Err(GatewayError::Validation {
                        message: format!("upload stream failed: {err}"),
                    });
                }
            };

            size += chunk.len() as u64;
            if size > self.max_file_bytes {
                self.blob.discard_temp(&temp).await;
                return Err(GatewayError::PayloadTooLarge {
                    limit_bytes: self.max_file_bytes,
                });
            }

            if head.len() < sniff::SNIFF_LEN {
                let want = sniff::SNIFF_LEN - head.len();
                head.extend_from_slice(&chunk[..want.min(chunk.len())]);
            }
            hasher.update(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                self.blob.discard_temp(&temp).await;
                return Err(internal(err));
            }
        }

        if let Err(err) = file.flush().await {
            self.blob.discard_temp(&temp).await;
            return Err(internal(err));
        }
        drop(file);

        let detected = sniff::detect_mime(&head, declared_mime);
        if !self.allowed.contains(&detected) {
            self.blob.discard_temp(&temp).await;
            return Err(GatewayError::UnsupportedType { mime: detected });
        }

        let id = FileRecord::new_id();
        let ext = sniff::extension_for(&detected);
        let now = Utc::now();
        let record = FileRecord {
            storage_path: self.blob.blob_path(&id, ext),
            id: id.clone(),
            original_name: declared_name.to_string(),
            sanitized_name: sanitize_filename(declared_name),
            declared_mime: declared_mime.to_string(),
            mime_mismatch: declared_mime != detected,
            detected_mime: detected,
            size_bytes: size,
            sha256: format!("{:x}", hasher.finalize()),
            uploaded_at: now,
            expires_at: now + self.retention,
            status: ExtractionStatus::Pending,
            identity: identity.to_string(),
        };

        if let Err(err) = self.blob.commit(&temp, &record).await {
            self.blob.discard_temp(&temp).await;
            return Err(internal(err));
        }

        self.records.insert(id, record.clone());
        Ok(record)
    }

    /// Looks up a record, enforcing owner visibility.
    pub fn record(&self, id: &str, identity: &str) -> Result<FileRecord, GatewayError> {
        let record = self
            .records
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| GatewayError::NotFound {
                what: format!("file {id}"),
            })?;
        if record.identity != identity {
            return Err(GatewayError::Forbidden {
                what: format!("file {id}"),
            });
        }
        Ok(record)
    }

    /// All records owned by an identity, newest first.
    pub fn records_for(&self, identity: &str) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self
            .records
            .iter()
            .filter(|r| r.identity == identity)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        records
    }

    /// Explicitly evicts a file. The cached extraction is retained: it is
    /// keyed by content hash and identical bytes may be uploaded again.
    pub async fn delete(&self, id: &str, identity: &str) -> Result<(), GatewayError> {
        let record = self.record(id, identity)?;
        self.blob.delete(&record).await.map_err(internal)?;
        self.records.remove(id);
        self.extractions.remove(id);
        self.failures.remove(id);
        Ok(())
    }

    /// Non-blocking extraction read.
    pub fn get_extraction(&self, id: &str, identity: &str) -> ExtractionLookup {
        match self.record(id, identity) {
            Ok(record) => {
                if let Some(extraction) = self.extractions.get(id) {
                    ExtractionLookup::Ready {
                        extraction: extraction.clone(),
                    }
                } else {
                    ExtractionLookup::Pending {
                        status: record.status,
                    }
                }
            }
            Err(_) => ExtractionLookup::NotFound,
        }
    }

    /// Idempotent extraction with single-flight coalescing.
    ///
    /// Concurrent calls for one file share a single run; repeat calls return
    /// the memoized record. A file that previously failed stays failed; no
    /// retry for malformed input.
    pub async fn extract(&self, id: &str, identity: &str) -> Result<Extraction, GatewayError> {
        // Ownership first; a memoized extraction must not leak across tenants.
        let record = self.record(id, identity)?;

        if let Some(extraction) = self.extractions.get(id) {
            return Ok(extraction.clone());
        }

        if record.status == ExtractionStatus::Failed {
            let reason = self
                .failures
                .get(id)
                .map(|r| r.clone())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(GatewayError::Validation {
                message: format!("extraction failed: {reason}"),
            });
        }

        let cell = self
            .flights
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_init(|| self.run_extract(record))
            .await
            .clone();

        self.flights.remove(id);
        result
    }

    async fn run_extract(&self, record: FileRecord) -> Result<Extraction, GatewayError> {
        let id = record.id.clone();

        let Some(extractor) = self.registry.pick(&record.detected_mime) else {
            let extraction = Extraction::unsupported(id.clone(), &record.detected_mime);
            self.finish(&id, ExtractionStatus::Unsupported, Some(extraction.clone()))
                .await;
            return Ok(extraction);
        };

        let cache_key = format!(
            "extraction:{}:{}:v{}",
            record.sha256,
            extractor.id(),
            extractor.version()
        );

        if let Some(mut hit) = self.cache.get_json::<Extraction>(&cache_key).await {
            hit.file_id = id.clone();
            self.finish(&id, ExtractionStatus::Ready, Some(hit.clone())).await;
            return Ok(hit);
        }

        if let Some(raw) = self.blob.read_extraction(&record.sha256, extractor.id()).await
            && let Ok(mut stored) = serde_json::from_slice::<Extraction>(&raw)
            && stored.extractor_version == extractor.version()
        {
            stored.file_id = id.clone();
            self.cache.put_json(&cache_key, &stored, None);
            self.finish(&id, ExtractionStatus::Ready, Some(stored.clone())).await;
            return Ok(stored);
        }

        // An interrupted extraction is re-run at most once per process. The
        // map guard must not be held across the awaits below.
        let exhausted = {
            let mut attempts = self.attempts.entry(id.clone()).or_insert(0);
            if *attempts >= 2 {
                true
            } else {
                *attempts += 1;
                false
            }
        };
        if exhausted {
            self.record_failure(&id, "retry budget exhausted").await;
            return Err(GatewayError::Validation {
                message: "extraction retried too many times".to_string(),
            });
        }

        self.set_status(&id, ExtractionStatus::InProgress).await;

        let bytes = match self.blob.read(&record).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.record_failure(&id, "blob unreadable").await;
                return Err(internal(err));
            }
        };

        let outcome = if extractor.cpu_bound() {
            let extractor = extractor.clone();
            let mime = record.detected_mime.clone();
            let cap = self.text_cap;
            let handle = tokio::runtime::Handle::current();
            match self
                .worker
                .run(move || {
                    handle.block_on(extractor.extract(ExtractInput {
                        bytes: &bytes,
                        mime: &mime,
                        size_hint: bytes.len() as u64,
                        text_cap: cap,
                    }))
                })
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.set_status(&id, ExtractionStatus::Pending).await;
                    return Err(GatewayError::ServerBusy);
                }
            }
        } else {
            extractor
                .extract(ExtractInput {
                    bytes: &bytes,
                    mime: &record.detected_mime,
                    size_hint: bytes.len() as u64,
                    text_cap: self.text_cap,
                })
                .await
        };

        match outcome {
            Ok(mut extraction) => {
                extraction.file_id = id.clone();
                if let Ok(json) = serde_json::to_vec(&extraction) {
                    let _ = self
                        .blob
                        .write_extraction(&record.sha256, extractor.id(), &json)
                        .await;
                }
                self.cache.put_json(&cache_key, &extraction, None);
                self.finish(&id, ExtractionStatus::Ready, Some(extraction.clone()))
                    .await;
                Ok(extraction)
            }
            Err(ExtractError::UnsupportedFeature(feature)) => {
                tracing::info!(file = %id, %feature, "extraction unsupported");
                let extraction = Extraction::unsupported(id.clone(), &record.detected_mime);
                self.finish(&id, ExtractionStatus::Unsupported, Some(extraction.clone()))
                    .await;
                Ok(extraction)
            }
            Err(err) => {
                self.record_failure(&id, &err.to_string()).await;
                Err(GatewayError::Validation {
                    message: format!("extraction failed: {err}"),
                })
            }
        }
    }

    async fn set_status(&self, id: &str, status: ExtractionStatus) {
        if let Some(mut record) = self.records.get_mut(id) {
            record.status = status;
            let snapshot = record.clone();
            drop(record);
            let _ = self.blob.write_meta(&snapshot).await;
        }
    }

    async fn finish(&self, id: &str, status: ExtractionStatus, extraction: Option<Extraction>) {
        if let Some(extraction) = extraction {
            self.extractions.insert(id.to_string(), extraction);
        }
        self.set_status(id, status).await;
    }

    async fn record_failure(&self, id: &str, reason: &str) {
        self.failures.insert(id.to_string(), reason.to_string());
        self.set_status(id, ExtractionStatus::Failed).await;
    }

    /// Resolves referenced files for a chat request: ownership is enforced
    /// strictly, but extraction failures degrade to placeholder outcomes so
    /// the chat proceeds.
    pub async fn resolve(
        &self,
        file_ids: &[String],
        identity: &str,
    ) -> Result<Vec<ResolvedFile>, GatewayError> {
        let mut resolved = Vec::with_capacity(file_ids.len());
        for id in file_ids {
            let record = self.record(id, identity)?;
            let outcome = match self.extract(id, identity).await {
                Ok(extraction) => Ok(extraction),
                Err(err) => Err(err.to_string()),
            };
            resolved.push(ResolvedFile { record, outcome });
        }
        Ok(resolved)
    }

    /// Deletes blobs past their retention expiry. Returns the swept ids.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let snapshot: Vec<FileRecord> = self.records.iter().map(|r| r.clone()).collect();
        let swept = self.blob.sweep_expired(snapshot).await;
        for id in &swept {
            self.records.remove(id);
            self.extractions.remove(id);
        }
        if !swept.is_empty() {
            tracing::info!(count = swept.len(), "retention sweep removed blobs");
        }
        swept
    }

    /// Reads the stored bytes of an owned record; used to pass raw images to
    /// vision-capable targets.
    pub async fn read_bytes(&self, record: &FileRecord) -> Result<Vec<u8>, GatewayError> {
        self.blob.read(record).await.map_err(internal)
    }

    /// Blob store root, for the health snapshot's disk probe.
    pub fn blob_root(&self) -> &std::path::Path {
        self.blob.root()
    }
}

fn internal<E: std::fmt::Display>(err: E) -> GatewayError {
    tracing::error!(%err, "ingest internal failure");
    GatewayError::Internal {
        request_id: String::new(),
    }
}
