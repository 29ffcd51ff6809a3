//! Model Store
//!
//! Durable persistence of task state: one JSON document per task in the
//! internal data folder, plus a sibling cookies file and thumbnail.
//! Writes are atomic (write-temp-then-rename) and serialised per id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::CoreResult;
use crate::model::record::TaskRecord;
use crate::net::cookies;

/// Suffix of the persisted task document
pub const MODEL_SUFFIX: &str = "_download.json";
/// Suffix of the sibling cookies file
pub const COOKIES_SUFFIX: &str = "_cookies.txt";
/// Suffix of the sibling thumbnail
pub const THUMBNAIL_SUFFIX: &str = "_download.jpg";

/// On-disk persistence for task records.
pub struct ModelStore {
    internal_dir: PathBuf,
    /// One writer per id at a time
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ModelStore {
    pub fn new(internal_dir: impl Into<PathBuf>) -> Self {
        Self {
            internal_dir: internal_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn internal_dir(&self) -> &Path {
        &self.internal_dir
    }

    pub fn model_path(&self, id: i64) -> PathBuf {
        self.internal_dir.join(format!("{}{}", id, MODEL_SUFFIX))
    }

    pub fn cookies_path(&self, id: i64) -> PathBuf {
        self.internal_dir.join(format!("{}{}", id, COOKIES_SUFFIX))
    }

    pub fn thumbnail_path(&self, id: i64) -> PathBuf {
        self.internal_dir.join(format!("{}{}", id, THUMBNAIL_SUFFIX))
    }

    async fn id_lock(&self, id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Persist the record atomically. Emits the Netscape cookies file when
    /// a cookie string is present and the file is missing.
    pub async fn update(&self, record: &TaskRecord) -> CoreResult<()> {
        self.update_with_cookie_override(record, false).await
    }

    /// Like [`update`](Self::update) but rewrites the cookies file even if
    /// one exists.
    pub async fn update_with_cookie_override(
        &self,
        record: &TaskRecord,
        override_cookies: bool,
    ) -> CoreResult<()> {
        // A task unwinding after a user clear/delete must not resurrect
        // the document it races against
        if record.is_deleted || record.is_removed {
            return Ok(());
        }

        let lock = self.id_lock(record.id).await;
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&self.internal_dir).await?;

        let path = self.model_path(record.id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        if let Some(cookie) = record.cookie_string.as_deref().filter(|c| !c.is_empty()) {
            let cookies_path = self.cookies_path(record.id);
            let missing = !cookies_path.exists();
            if missing || override_cookies {
                tokio::fs::write(&cookies_path, cookies::write_netscape(cookie)).await?;
            }
        }

        tracing::trace!("Persisted task {} ({} bytes)", record.id, json.len());
        Ok(())
    }

    /// Read and decode a single persisted record.
    pub async fn load(&self, id: i64) -> CoreResult<TaskRecord> {
        let bytes = tokio::fs::read(self.model_path(id)).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Remove every on-disk artifact of the task: model JSON, cookies,
    /// thumbnail, extractor temps, in-progress file. The downloaded file
    /// itself goes only when the snapshot points at the private area.
    /// Best-effort: a missing file is not an error.
    pub async fn delete(&self, record: &TaskRecord) -> CoreResult<()> {
        use crate::config::DownloadLocation;

        let lock = self.id_lock(record.id).await;
        let _guard = lock.lock().await;

        let _ = tokio::fs::remove_file(self.model_path(record.id)).await;
        let _ = tokio::fs::remove_file(self.cookies_path(record.id)).await;
        let _ = tokio::fs::remove_file(self.thumbnail_path(record.id)).await;

        if let Some(prefix) = record
            .extractor_temp_path
            .as_deref()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
        {
            self.remove_prefixed(prefix).await;
        }

        let _ = tokio::fs::remove_file(record.in_progress_path()).await;
        let mut split_dir = record.destination_path().into_os_string();
        split_dir.push(".temp");
        let _ = tokio::fs::remove_dir_all(PathBuf::from(split_dir)).await;

        if record.settings.default_download_location == DownloadLocation::PrivateFolder {
            let _ = tokio::fs::remove_file(record.destination_path()).await;
        }

        tracing::debug!("Deleted persisted artifacts for task {}", record.id);
        Ok(())
    }

    /// Remove the persisted model, cookies, thumbnail and extractor temps
    /// but keep whatever landed on disk (user "clear" semantics).
    pub async fn delete_keeping_file(&self, record: &TaskRecord) -> CoreResult<()> {
        let lock = self.id_lock(record.id).await;
        let _guard = lock.lock().await;

        let _ = tokio::fs::remove_file(self.model_path(record.id)).await;
        let _ = tokio::fs::remove_file(self.cookies_path(record.id)).await;
        let _ = tokio::fs::remove_file(self.thumbnail_path(record.id)).await;

        if let Some(prefix) = record
            .extractor_temp_path
            .as_deref()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
        {
            self.remove_prefixed(prefix).await;
        }

        tracing::debug!("Cleared persisted model for task {}", record.id);
        Ok(())
    }

    /// Remove internal files whose name starts with `prefix`.
    async fn remove_prefixed(&self, prefix: &str) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.internal_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(prefix) {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
    }

    /// Enumerate persisted model files as (id, path), excluding anything
    /// whose name mentions "temp".
    pub async fn list_model_files(&self) -> CoreResult<Vec<(i64, PathBuf)>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.internal_dir).await {
            Ok(e) => e,
            Err(_) => return Ok(out),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.ends_with(MODEL_SUFFIX) || name.contains("temp") {
                continue;
            }
            if let Ok(id) = name[..name.len() - MODEL_SUFFIX.len()].parse::<i64>() {
                out.push((id, entry.path()));
            }
        }
        Ok(out)
    }
}
