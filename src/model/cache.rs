//! Model Cache
//!
//! In-memory index of task records hydrated from the store. Load-all runs
//! in bounded parallel chunks with per-file fault isolation: a document
//! that fails to decode is deleted and its id parked in a cooldown map so
//! repeat failures do not thrash the startup path.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};

use crate::error::CoreResult;
use crate::model::record::TaskRecord;
use crate::model::store::ModelStore;

/// How long a failed id is skipped before another load is attempted
pub const FAILURE_COOLDOWN: Duration = Duration::from_secs(30);

/// Bound on concurrently decoded documents during load-all
const LOAD_CONCURRENCY: usize = 10;

/// Tracks ids whose documents recently failed to decode.
#[derive(Debug, Default)]
pub struct FailureCooldown {
    entries: HashMap<i64, Instant>,
}

impl FailureCooldown {
    pub fn record(&mut self, id: i64, now: Instant) {
        self.entries.insert(id, now);
    }

    /// Whether the id is still inside its cooldown window.
    pub fn is_cooling(&self, id: i64, now: Instant) -> bool {
        self.entries
            .get(&id)
            .map(|at| now.duration_since(*at) < FAILURE_COOLDOWN)
            .unwrap_or(false)
    }

    /// Drop entries whose window has elapsed, re-admitting their ids.
    pub fn expire(&mut self, now: Instant) {
        self.entries
            .retain(|_, at| now.duration_since(*at) < FAILURE_COOLDOWN);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-memory index of persisted task records.
#[derive(Default)]
pub struct ModelCache {
    records: HashMap<i64, TaskRecord>,
    failures: FailureCooldown,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: i64) -> Option<&TaskRecord> {
        self.records.get(&id)
    }

    pub fn insert(&mut self, record: TaskRecord) {
        self.records.insert(record.id, record);
    }

    pub fn remove(&mut self, id: i64) -> Option<TaskRecord> {
        self.records.remove(&id)
    }

    pub fn ids(&self) -> Vec<i64> {
        self.records.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Move every cached record out, leaving the cache empty.
    pub fn drain(&mut self) -> Vec<TaskRecord> {
        self.records.drain().map(|(_, r)| r).collect()
    }

    pub fn failures(&self) -> &FailureCooldown {
        &self.failures
    }

    /// Synchronise the cache with the store.
    ///
    /// Removes cached ids whose file no longer exists, re-admits expired
    /// cooldown entries, then loads every new document in bounded
    /// parallel chunks. Corrupt documents are deleted and parked in the
    /// cooldown map. Returns the number of newly loaded records.
    pub async fn refresh(&mut self, store: &ModelStore) -> CoreResult<usize> {
        let now = Instant::now();
        self.failures.expire(now);

        let files = store.list_model_files().await?;
        let present: HashMap<i64, PathBuf> = files.into_iter().collect();

        self.records.retain(|id, _| present.contains_key(id));

        let pending: Vec<(i64, PathBuf)> = present
            .into_iter()
            .filter(|(id, _)| !self.records.contains_key(id) && !self.failures.is_cooling(*id, now))
            .collect();

        let results: Vec<(i64, PathBuf, Option<TaskRecord>)> = stream::iter(pending)
            .map(|(id, path)| async move {
                let decoded = match tokio::fs::read(&path).await {
                    Ok(bytes) => serde_json::from_slice::<TaskRecord>(&bytes).ok(),
                    Err(_) => None,
                };
                (id, path, decoded)
            })
            .buffer_unordered(LOAD_CONCURRENCY)
            .collect()
            .await;

        let mut loaded = 0usize;
        for (id, path, decoded) in results {
            match decoded {
                Some(record) => {
                    self.records.insert(id, record);
                    loaded += 1;
                }
                None => {
                    tracing::warn!("Dropping corrupt task document {:?}", path);
                    let _ = tokio::fs::remove_file(&path).await;
                    self.failures.record(id, now);
                }
            }
        }

        tracing::debug!(
            "Model cache refreshed: {} cached, {} loaded, {} cooling",
            self.records.len(),
            loaded,
            self.failures.len()
        );
        Ok(loaded)
    }
}
