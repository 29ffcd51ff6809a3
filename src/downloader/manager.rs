//! Download Manager
//!
//! Global scheduler: admission, FIFO waiting queue, running set,
//! timer-driven promotion, listener fan-out and auto-cleanup of aged
//! completed entries. The manager exclusively owns the authoritative
//! in-memory map of task records; tasks receive shared handles.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::CoreContext;
use crate::downloader::events::{EventBus, TaskEvent};
use crate::downloader::extractor::MediaExtractorTask;
use crate::downloader::http_task::SegmentedHttpTask;
use crate::error::CoreResult;
use crate::model::cache::ModelCache;
use crate::model::record::{
    now_ms, status_text, MediaFormat, MediaInfo, TaskKind, TaskRecord, TaskStatus,
};
use crate::model::store::ModelStore;

/// Scheduler cadence
const TICK_INTERVAL: Duration = Duration::from_secs(1);

const MS_PER_DAY: i64 = 86_400_000;

/// Running task handle, dispatched by record kind.
enum TaskHandle {
    Http(Arc<SegmentedHttpTask>),
    Extractor(Arc<MediaExtractorTask>),
}

impl TaskHandle {
    fn cancel(&self, status: &str) {
        match self {
            TaskHandle::Http(t) => t.cancel(status),
            TaskHandle::Extractor(t) => t.cancel(status),
        }
    }
}

/// The global download scheduler.
pub struct DownloadManager {
    ctx: Arc<CoreContext>,
    store: Arc<ModelStore>,
    events: EventBus,
    /// Authoritative record map; tasks hold clones of the inner Arc
    records: Mutex<HashMap<i64, Arc<Mutex<TaskRecord>>>>,
    waiting: Mutex<VecDeque<i64>>,
    running: Mutex<HashMap<i64, TaskHandle>>,
    /// Completed ids, newest start first
    finished: Mutex<Vec<i64>>,
    next_id: AtomicI64,
    shutdown: CancellationToken,
    scheduler: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DownloadManager {
    pub fn new(ctx: Arc<CoreContext>) -> Arc<Self> {
        let store = Arc::new(ModelStore::new(ctx.paths.internal_dir.clone()));
        Arc::new(Self {
            ctx,
            store,
            events: EventBus::new(1024),
            records: Mutex::new(HashMap::new()),
            waiting: Mutex::new(VecDeque::new()),
            running: Mutex::new(HashMap::new()),
            finished: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            shutdown: CancellationToken::new(),
            scheduler: Mutex::new(None),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    /// Allocate the next process-wide unique task id.
    pub fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Build a plain HTTP record with the current settings snapshot.
    pub fn new_http_record(&self, url: impl Into<String>, file_name: impl Into<String>) -> TaskRecord {
        let settings = self.ctx.settings.clone();
        let directory = self
            .ctx
            .paths
            .location_dir(settings.default_download_location)
            .to_path_buf();
        TaskRecord::new(self.allocate_id(), url, directory, file_name, settings)
    }

    /// Build a media-extractor record with the current settings snapshot.
    pub fn new_media_record(&self, info: MediaInfo, format: MediaFormat) -> TaskRecord {
        let mut record = self.new_http_record(info.url.clone(), String::new());
        record.media_info = Some(info);
        record.media_format = Some(format);
        record
    }

    /// Admit a record: persist it, enqueue it, notify listeners. A record
    /// whose id is already known is treated as a resume.
    pub async fn add(&self, record: TaskRecord) -> CoreResult<()> {
        let id = record.id;
        let known = self.records.lock().unwrap().contains_key(&id);
        if known {
            tracing::debug!("add() for known task {}, treating as resume", id);
            return self.resume(id).await;
        }

        self.store.update(&record).await?;
        let shared = Arc::new(Mutex::new(record.clone()));
        self.records.lock().unwrap().insert(id, shared);
        self.waiting.lock().unwrap().push_back(id);
        self.events.publish(TaskEvent::Added { record });
        tracing::info!("Added task {} to waiting queue", id);
        Ok(())
    }

    /// Re-queue a known, non-running record. No-op when it is already
    /// waiting or running.
    pub async fn resume(&self, id: i64) -> CoreResult<()> {
        let Some(shared) = self.record_handle(id) else {
            tracing::debug!("resume() for unknown task {}", id);
            return Ok(());
        };
        if self.running.lock().unwrap().contains_key(&id) {
            return Ok(());
        }
        {
            let mut waiting = self.waiting.lock().unwrap();
            if waiting.contains(&id) {
                return Ok(());
            }
            waiting.push_back(id);
        }
        let snapshot = {
            let mut r = shared.lock().unwrap();
            r.apply_status(TaskStatus::Close, status_text::WAITING_TO_JOIN);
            r.clone()
        };
        self.store.update(&snapshot).await?;
        self.events.publish_status(&snapshot);
        tracing::info!("Task {} re-queued", id);
        Ok(())
    }

    /// Cooperatively cancel a task and move it out of running/waiting.
    pub async fn pause(&self, id: i64) -> CoreResult<()> {
        self.waiting.lock().unwrap().retain(|queued| *queued != id);

        let handle = self.running.lock().unwrap().remove(&id);
        if let Some(handle) = handle {
            // The task settles its own record once the workers unwind
            handle.cancel(status_text::PAUSED);
            tracing::info!("Paused running task {}", id);
            return Ok(());
        }

        let Some(shared) = self.record_handle(id) else {
            return Ok(());
        };
        let snapshot = {
            let mut r = shared.lock().unwrap();
            // Idempotent: a second pause leaves the record untouched
            if !r.is_running && r.status == TaskStatus::Close
                && r.status_info == status_text::PAUSED
            {
                return Ok(());
            }
            r.apply_status(TaskStatus::Close, status_text::PAUSED);
            r.clone()
        };
        self.store.update(&snapshot).await?;
        self.events.publish_status(&snapshot);
        Ok(())
    }

    /// Remove the task from the engine but keep the downloaded file.
    pub async fn clear(&self, id: i64) -> CoreResult<()> {
        let Some(shared) = self.remove_everywhere(id, status_text::PAUSED) else {
            return Ok(());
        };
        let snapshot = {
            let mut r = shared.lock().unwrap();
            r.is_removed = true;
            r.last_modified_ms = now_ms();
            r.clone()
        };
        self.store.delete_keeping_file(&snapshot).await?;
        self.events.publish(TaskEvent::Removed { id });
        tracing::info!("Cleared task {}", id);
        Ok(())
    }

    /// Remove the task and its artifacts; the downloaded file goes too
    /// when it lives in the private area.
    pub async fn delete(&self, id: i64) -> CoreResult<()> {
        let Some(shared) = self.remove_everywhere(id, status_text::PAUSED) else {
            return Ok(());
        };
        let snapshot = {
            let mut r = shared.lock().unwrap();
            r.is_deleted = true;
            r.last_modified_ms = now_ms();
            r.clone()
        };
        self.store.delete(&snapshot).await?;
        self.events.publish(TaskEvent::Removed { id });
        tracing::info!("Deleted task {}", id);
        Ok(())
    }

    /// Pause every active task.
    pub async fn pause_all(&self) -> CoreResult<()> {
        for id in self.active_ids() {
            self.pause(id).await?;
        }
        Ok(())
    }

    /// Re-queue every paused task.
    pub async fn resume_all(&self) -> CoreResult<()> {
        for id in self.active_ids() {
            self.resume(id).await?;
        }
        Ok(())
    }

    pub async fn clear_all(&self) -> CoreResult<()> {
        for id in self.all_ids() {
            self.clear(id).await?;
        }
        Ok(())
    }

    pub async fn delete_all(&self) -> CoreResult<()> {
        for id in self.all_ids() {
            self.delete(id).await?;
        }
        Ok(())
    }

    /// One scheduler step: reconcile the running set, then promote from
    /// the waiting queue up to the parallelism cap. Idempotent — with no
    /// state change it emits nothing and writes nothing.
    pub async fn tick(&self) {
        // Reconcile: drop entries whose record shows the task has settled
        let settled: Vec<i64> = {
            let running = self.running.lock().unwrap();
            running
                .keys()
                .copied()
                .filter(|id| {
                    self.record_handle(*id)
                        .map(|shared| {
                            let r = shared.lock().unwrap();
                            !r.is_running && r.status != TaskStatus::Downloading
                        })
                        .unwrap_or(true)
                })
                .collect()
        };
        for id in settled {
            self.running.lock().unwrap().remove(&id);
            let Some(shared) = self.record_handle(id) else {
                continue;
            };
            let snapshot = shared.lock().unwrap().clone();
            if snapshot.is_complete {
                self.on_task_complete(snapshot).await;
            } else {
                tracing::debug!("Task {} left the running set ({})", id, snapshot.status_info);
            }
        }

        // Promote
        let max_parallel = self.ctx.settings.max_parallel.max(1);
        loop {
            {
                let running = self.running.lock().unwrap();
                if running.len() >= max_parallel {
                    break;
                }
            }
            let Some(id) = self.waiting.lock().unwrap().pop_front() else {
                break;
            };
            if !self.start_task(id) {
                tracing::warn!("Task {} failed to start, dropping from queue", id);
            }
        }
    }

    /// Hydrate from the store: finished records go to the finished list
    /// (subject to the auto-remove policy), everything else becomes a
    /// paused active record. Interrupted tasks are settled to Close.
    pub async fn initialize(&self) -> CoreResult<()> {
        let mut cache = ModelCache::new();
        cache.refresh(&self.store).await?;

        let mut max_id = 0i64;
        let mut finished: Vec<(i64, i64)> = Vec::new();

        for mut record in cache.drain() {
            max_id = max_id.max(record.id);

            if record.is_complete {
                if should_auto_remove(&record) {
                    tracing::info!("Auto-removing aged completed task {}", record.id);
                    let _ = self.store.delete_keeping_file(&record).await;
                    continue;
                }
                finished.push((record.id, record.started_at_ms));
                self.records
                    .lock()
                    .unwrap()
                    .insert(record.id, Arc::new(Mutex::new(record)));
                continue;
            }

            // Crash recovery: a record that claims to be running was
            // interrupted; settle it to paused
            if record.is_running || record.status == TaskStatus::Downloading {
                record.apply_status(TaskStatus::Close, status_text::PAUSED);
                self.store.update(&record).await?;
            }
            self.records
                .lock()
                .unwrap()
                .insert(record.id, Arc::new(Mutex::new(record)));
        }

        finished.sort_by_key(|(_, started)| std::cmp::Reverse(*started));
        *self.finished.lock().unwrap() = finished.into_iter().map(|(id, _)| id).collect();
        self.next_id.store(max_id + 1, Ordering::SeqCst);

        tracing::info!(
            "Manager initialised: {} records ({} finished)",
            self.records.lock().unwrap().len(),
            self.finished.lock().unwrap().len()
        );
        Ok(())
    }

    /// Spawn the 1 s scheduler loop.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.scheduler.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = manager.shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                manager.tick().await;
            }
            tracing::debug!("Scheduler loop stopped");
        }));
        tracing::info!("Scheduler started (max parallel {})", self.ctx.settings.max_parallel);
    }

    /// Stop the scheduler and cooperatively cancel all running tasks.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.scheduler.lock().unwrap().take() {
            handle.abort();
        }
        let handles: Vec<TaskHandle> = {
            let mut running = self.running.lock().unwrap();
            running.drain().map(|(_, h)| h).collect()
        };
        for handle in &handles {
            handle.cancel(status_text::PAUSED);
        }
        tracing::info!("Manager shut down ({} tasks cancelled)", handles.len());
    }

    /// Snapshot of a single record.
    pub fn snapshot(&self, id: i64) -> Option<TaskRecord> {
        self.record_handle(id).map(|s| s.lock().unwrap().clone())
    }

    /// Snapshots of all non-finished records.
    pub fn active_records(&self) -> Vec<TaskRecord> {
        let records = self.records.lock().unwrap();
        records
            .values()
            .map(|s| s.lock().unwrap().clone())
            .filter(|r| !r.is_complete)
            .collect()
    }

    /// Snapshots of completed records, newest start first.
    pub fn finished_records(&self) -> Vec<TaskRecord> {
        let finished = self.finished.lock().unwrap().clone();
        finished.into_iter().filter_map(|id| self.snapshot(id)).collect()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.lock().unwrap().len()
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap().len()
    }

    fn record_handle(&self, id: i64) -> Option<Arc<Mutex<TaskRecord>>> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    fn active_ids(&self) -> Vec<i64> {
        let records = self.records.lock().unwrap();
        records
            .iter()
            .filter(|(_, s)| s.lock().unwrap().is_schedulable())
            .map(|(id, _)| *id)
            .collect()
    }

    fn all_ids(&self) -> Vec<i64> {
        self.records.lock().unwrap().keys().copied().collect()
    }

    /// Pull a task out of every scheduler structure, cancelling it if it
    /// was running. Returns the record handle if the id was known.
    fn remove_everywhere(&self, id: i64, cancel_status: &str) -> Option<Arc<Mutex<TaskRecord>>> {
        self.waiting.lock().unwrap().retain(|queued| *queued != id);
        self.finished.lock().unwrap().retain(|done| *done != id);
        if let Some(handle) = self.running.lock().unwrap().remove(&id) {
            handle.cancel(cancel_status);
        }
        self.records.lock().unwrap().remove(&id)
    }

    fn start_task(&self, id: i64) -> bool {
        let Some(shared) = self.record_handle(id) else {
            return false;
        };
        let kind = shared.lock().unwrap().kind();
        let handle = match kind {
            TaskKind::Http => {
                let task = SegmentedHttpTask::new(
                    Arc::clone(&self.ctx),
                    Arc::clone(&self.store),
                    self.events.clone(),
                    shared,
                );
                task.start();
                TaskHandle::Http(task)
            }
            TaskKind::MediaExtractor => {
                let task = MediaExtractorTask::new(
                    Arc::clone(&self.ctx),
                    Arc::clone(&self.store),
                    self.events.clone(),
                    shared,
                );
                task.start();
                TaskHandle::Extractor(task)
            }
        };
        self.running.lock().unwrap().insert(id, handle);
        tracing::info!("Task {} promoted to running", id);
        true
    }

    /// Post-completion bookkeeping: auto-remove policy, else the finished
    /// list sorted by start time descending.
    async fn on_task_complete(&self, snapshot: TaskRecord) {
        let id = snapshot.id;
        if should_auto_remove(&snapshot) {
            tracing::info!("Auto-removing completed task {}", id);
            let _ = self.store.delete_keeping_file(&snapshot).await;
            self.records.lock().unwrap().remove(&id);
            self.events.publish(TaskEvent::Removed { id });
            return;
        }

        let mut finished = self.finished.lock().unwrap();
        if !finished.contains(&id) {
            finished.push(id);
            let records = self.records.lock().unwrap();
            finished.sort_by_key(|fid| {
                records
                    .get(fid)
                    .map(|s| std::cmp::Reverse(s.lock().unwrap().started_at_ms))
                    .unwrap_or(std::cmp::Reverse(0))
            });
        }
    }
}

/// Completed-entry cleanup policy: immediate when `auto_remove_days` is
/// zero, otherwise once the record has not been touched for that many
/// days.
fn should_auto_remove(record: &TaskRecord) -> bool {
    if !record.settings.auto_remove_tasks {
        return false;
    }
    let days = record.settings.auto_remove_days;
    days == 0 || now_ms() - record.last_modified_ms > days * MS_PER_DAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorePaths, SettingsSnapshot};

    fn manager_with(settings: SettingsSnapshot) -> (Arc<DownloadManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = CorePaths::under_root(dir.path());
        paths.ensure().unwrap();
        let ctx = Arc::new(CoreContext::new(paths, settings));
        (DownloadManager::new(ctx), dir)
    }

    fn manager() -> (Arc<DownloadManager>, tempfile::TempDir) {
        manager_with(SettingsSnapshot::default())
    }

    #[tokio::test]
    async fn add_persists_and_enqueues() {
        let (m, _dir) = manager();
        let record = m.new_http_record("https://host.example/a.bin", "a.bin");
        let id = record.id;

        m.add(record).await.unwrap();
        assert_eq!(m.waiting_count(), 1);
        assert!(m.store().model_path(id).exists());
    }

    #[tokio::test]
    async fn add_of_known_id_is_resume() {
        let (m, _dir) = manager();
        let record = m.new_http_record("https://host.example/a.bin", "a.bin");
        let id = record.id;
        m.add(record.clone()).await.unwrap();

        // Second add neither duplicates the queue entry nor errors
        m.add(record).await.unwrap();
        assert_eq!(m.waiting_count(), 1);
        let _ = id;
    }

    #[tokio::test]
    async fn pause_is_idempotent() {
        let (m, _dir) = manager();
        let record = m.new_http_record("https://host.example/a.bin", "a.bin");
        let id = record.id;
        m.add(record).await.unwrap();

        m.pause(id).await.unwrap();
        let first = m.snapshot(id).unwrap();
        assert_eq!(first.status, TaskStatus::Close);
        assert_eq!(first.status_info, status_text::PAUSED);
        assert_eq!(m.waiting_count(), 0);

        let mut rx = m.subscribe();
        m.pause(id).await.unwrap();
        assert!(rx.try_recv().is_err(), "second pause must emit nothing");
        assert_eq!(m.snapshot(id).unwrap(), first);
    }

    #[tokio::test]
    async fn clear_keeps_file_delete_removes_private_file() {
        let (m, dir) = manager();
        let mut record = m.new_http_record("https://host.example/a.bin", "a.bin");
        record.file_size = 4;
        let id = record.id;
        std::fs::create_dir_all(&record.directory).unwrap();
        std::fs::write(record.destination_path(), b"data").unwrap();
        let destination = record.destination_path();
        m.add(record).await.unwrap();

        m.clear(id).await.unwrap();
        assert!(m.snapshot(id).is_none());
        assert!(!m.store().model_path(id).exists());
        assert!(destination.exists(), "clear keeps the disk file");

        // Second task, deleted outright: private-area file goes
        let mut record = m.new_http_record("https://host.example/b.bin", "b.bin");
        record.file_size = 4;
        let id = record.id;
        std::fs::write(record.destination_path(), b"data").unwrap();
        let destination = record.destination_path();
        m.add(record).await.unwrap();

        m.delete(id).await.unwrap();
        assert!(!destination.exists(), "delete removes the private-area file");
        let _ = dir;
    }

    #[tokio::test]
    async fn initialize_hydrates_and_settles_interrupted() {
        let (m, dir) = manager();
        let mut interrupted = m.new_http_record("https://host.example/a.bin", "a.bin");
        interrupted.apply_status(TaskStatus::Downloading, status_text::DOWNLOADING);
        let mut done = m.new_http_record("https://host.example/b.bin", "b.bin");
        done.apply_complete(Some(10));
        m.store().update(&interrupted).await.unwrap();
        m.store().update(&done).await.unwrap();

        let paths = CorePaths::under_root(dir.path());
        let fresh = DownloadManager::new(Arc::new(CoreContext::new(
            paths,
            SettingsSnapshot::default(),
        )));
        fresh.initialize().await.unwrap();

        let hydrated = fresh.snapshot(interrupted.id).unwrap();
        assert!(!hydrated.is_running);
        assert_eq!(hydrated.status, TaskStatus::Close);

        let finished = fresh.finished_records();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id, done.id);

        // Ids continue past the hydrated maximum
        assert!(fresh.allocate_id() > done.id.max(interrupted.id));
    }

    #[tokio::test]
    async fn initialize_enforces_auto_remove() {
        let mut settings = SettingsSnapshot::default();
        settings.auto_remove_tasks = true;
        settings.auto_remove_days = 0;
        let (m, dir) = manager_with(settings.clone());

        let mut done = m.new_http_record("https://host.example/b.bin", "b.bin");
        done.apply_complete(Some(10));
        m.store().update(&done).await.unwrap();

        let paths = CorePaths::under_root(dir.path());
        let fresh = DownloadManager::new(Arc::new(CoreContext::new(paths, settings)));
        fresh.initialize().await.unwrap();

        assert!(fresh.finished_records().is_empty());
        assert!(!fresh.store().model_path(done.id).exists());
    }

    #[tokio::test]
    async fn tick_with_no_change_is_silent() {
        let (m, _dir) = manager();
        let mut rx = m.subscribe();
        m.tick().await;
        m.tick().await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn auto_remove_policy_window() {
        let mut r = TaskRecord::new(
            1,
            "https://h/f",
            "/tmp",
            "f",
            SettingsSnapshot::default(),
        );
        r.settings.auto_remove_tasks = true;
        r.settings.auto_remove_days = 2;
        r.last_modified_ms = now_ms();
        assert!(!should_auto_remove(&r));

        r.last_modified_ms = now_ms() - 3 * MS_PER_DAY;
        assert!(should_auto_remove(&r));

        r.settings.auto_remove_days = 0;
        r.last_modified_ms = now_ms();
        assert!(should_auto_remove(&r));

        r.settings.auto_remove_tasks = false;
        assert!(!should_auto_remove(&r));
    }
}
