//! Content-addressed blob store for uploaded bytes.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/<2-char shard>/<file-id>.<ext>      uploaded bytes
//! <root>/<2-char shard>/<file-id>.meta.json  FileRecord sidecar
//! <root>/extractions/<sha256>/<extractor>.json
//! <root>/tmp/<uuid>                          in-flight uploads
//! ```
//!
//! Writers are append-then-move: bytes stream into `tmp/` and are renamed
//! into place only after the size cap, the hash, and the MIME allow-list have
//! all passed, so readers never observe partial files and a rejected upload
//! leaves no residue.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::{
    fs,
    io::AsyncWriteExt,
};
use uuid::Uuid;

use crate::ingest::record::FileRecord;

/// Filesystem-backed blob store.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Opens (and creates) the store under `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("tmp")).await?;
        fs::create_dir_all(root.join("extractions")).await?;
        Ok(Self { root })
    }

    /// Store root, exposed for the health snapshot's disk probe.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_dir(&self, id: &str) -> PathBuf {
        let shard = &id[..2.min(id.len())];
        self.root.join(shard)
    }

    /// Final path of a blob for `id` with extension `ext`.
    pub fn blob_path(&self, id: &str, ext: &str) -> PathBuf {
        self.shard_dir(id).join(format!("{id}.{ext}"))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.shard_dir(id).join(format!("{id}.meta.json"))
    }

    /// Creates a uniquely-named temporary file for an in-flight upload.
    pub async fn create_temp(&self) -> Result<(PathBuf, fs::File)> {
        let path = self.root.join("tmp").join(Uuid::new_v4().simple().to_string());
        let file = fs::File::create(&path)
            .await
            .with_context(|| format!("create temp {}", path.display()))?;
        Ok((path, file))
    }

    /// Discards an in-flight temporary file.
    pub async fn discard_temp(&self, path: &Path) {
        let _ = fs::remove_file(path).await;
    }

    /// Atomically moves a completed temporary into its final blob path and
    /// persists the record sidecar.
    pub async fn commit(&self, temp: &Path, record: &FileRecord) -> Result<()> {
        fs::create_dir_all(self.shard_dir(&record.id)).await?;
        fs::rename(temp, &record.storage_path)
            .await
            .with_context(|| format!("rename into {}", record.storage_path.display()))?;
        self.write_meta(record).await
    }

    /// Rewrites the record sidecar (status transitions).
    pub async fn write_meta(&self, record: &FileRecord) -> Result<()> {
        let path = self.meta_path(&record.id);
        let json = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp).await?;
        f.write_all(&json).await?;
        f.flush().await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Reads the stored bytes of a record.
    pub async fn read(&self, record: &FileRecord) -> Result<Vec<u8>> {
        fs::read(&record.storage_path)
            .await
            .with_context(|| format!("read blob {}", record.storage_path.display()))
    }

    /// Deletes a blob and its sidecar.
    pub async fn delete(&self, record: &FileRecord) -> Result<()> {
        let _ = fs::remove_file(&record.storage_path).await;
        let _ = fs::remove_file(self.meta_path(&record.id)).await;
        Ok(())
    }

    /// Loads every record sidecar found under the root; used on startup to
    /// rebuild the in-memory index after a restart.
    pub async fn load_records(&self) -> Result<Vec<FileRecord>> {
        let mut records = Vec::new();
        let mut dirs = fs::read_dir(&self.root).await?;
        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == "tmp" || name == "extractions" {
                continue;
            }
            let mut files = fs::read_dir(entry.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".meta.json"))
                    && let Ok(raw) = fs::read(&path).await
                    && let Ok(record) = serde_json::from_slice::<FileRecord>(&raw)
                {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }

    fn extraction_path(&self, sha256: &str, extractor_id: &str) -> PathBuf {
        self.root
            .join("extractions")
            .join(sha256)
            .join(format!("{extractor_id}.json"))
    }

    /// Persists an extraction keyed by content hash and extractor id.
    pub async fn write_extraction(
        &self,
        sha256: &str,
        extractor_id: &str,
        json: &[u8],
    ) -> Result<()> {
        let path = self.extraction_path(sha256, extractor_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Reads a persisted extraction, if any.
    pub async fn read_extraction(&self, sha256: &str, extractor_id: &str) -> Option<Vec<u8>> {
        fs::read(self.extraction_path(sha256, extractor_id)).await.ok()
    }

    /// Deletes blobs whose retention window has expired. Extractions are
    /// retained: they are keyed by content hash and may outlive the record.
    pub async fn sweep_expired(&self, records: Vec<FileRecord>) -> Vec<String> {
        let now = Utc::now();
        let mut swept = Vec::new();
        for record in records {
            if record.expires_at <= now {
                if self.delete(&record).await.is_ok() {
                    swept.push(record.id);
                }
            }
        }
        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::record::ExtractionStatus;
    use chrono::Duration;

    fn record(store: &BlobStore, id: &str, expired: bool) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: id.to_string(),
            original_name: "a.txt".into(),
            sanitized_name: "a.txt".into(),
            declared_mime: "text/plain".into(),
            detected_mime: "text/plain".into(),
            mime_mismatch: false,
            size_bytes: 5,
            sha256: "00".repeat(32),
            uploaded_at: now,
            expires_at: if expired {
                now - Duration::seconds(1)
            } else {
                now + Duration::hours(24)
            },
            storage_path: store.blob_path(id, "txt"),
            status: ExtractionStatus::Pending,
            identity: "ip:127.0.0.1".into(),
        }
    }

    #[tokio::test]
    async fn commit_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).await.unwrap();

        let (temp, mut file) = store.create_temp().await.unwrap();
        file.write_all(b"hello").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        let rec = record(&store, "ab12cd", false);
        store.commit(&temp, &rec).await.unwrap();

        assert_eq!(store.read(&rec).await.unwrap(), b"hello");
        let loaded = store.load_records().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "ab12cd");
    }

    #[tokio::test]
    async fn discarded_temp_leaves_no_residue() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).await.unwrap();

        let (temp, mut file) = store.create_temp().await.unwrap();
        file.write_all(b"partial").await.unwrap();
        drop(file);
        store.discard_temp(&temp).await;

        assert!(!temp.exists());
        assert!(store.load_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).await.unwrap();

        for (id, expired) in [("aa11", true), ("bb22", false)] {
            let (temp, mut file) = store.create_temp().await.unwrap();
            file.write_all(b"x").await.unwrap();
            drop(file);
            store.commit(&temp, &record(&store, id, expired)).await.unwrap();
        }

        let swept = store
            .sweep_expired(store.load_records().await.unwrap())
            .await;
        assert_eq!(swept, vec!["aa11".to_string()]);
        let left = store.load_records().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "bb22");
    }

    #[tokio::test]
    async fn extractions_survive_blob_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path()).await.unwrap();
        let hash = "cd".repeat(32);

        store
            .write_extraction(&hash, "plain", b"{\"kind\":\"text\"}")
            .await
            .unwrap();
        let rec = record(&store, "ee33", false);
        store.delete(&rec).await.unwrap();

        assert!(store.read_extraction(&hash, "plain").await.is_some());
    }
}
