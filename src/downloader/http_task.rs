//! Segmented HTTP Task
//!
//! Owns the part workers for one download: plans byte ranges,
//! pre-allocates the in-progress file, drives workers with retry and the
//! waiting-for-network latch, aggregates progress on a 500 ms ticker and
//! validates completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::CoreContext;
use crate::downloader::events::{EventBus, TaskEvent};
use crate::downloader::part::{
    PartOutcome, PartShared, PartStatus, PartWorker, RequestContext,
};
use crate::downloader::ranges;
use crate::downloader::checksum;
use crate::error::{classify, CoreError, FaultKind};
use crate::model::record::{now_ms, status_text, TaskRecord, TaskStatus};
use crate::model::store::ModelStore;
use crate::net::probe::{self, ProbeContext, UNKNOWN_FILE_NAME};
use crate::net::speed::SpeedMeter;
use crate::net::watcher::gate_status;

/// Aggregation/watchdog cadence
const TICK: Duration = Duration::from_millis(500);
/// Re-check cadence while the network gate is closed
const GATE_RETRY: Duration = Duration::from_secs(5);

/// A segmented HTTP(S) download with resume and multi-part transfers.
pub struct SegmentedHttpTask {
    id: i64,
    ctx: Arc<CoreContext>,
    record: Arc<Mutex<TaskRecord>>,
    store: Arc<ModelStore>,
    events: EventBus,
    cancel: CancellationToken,
    cancel_status: Mutex<Option<String>>,
    parts: Mutex<Vec<Arc<PartShared>>>,
    speed: Mutex<SpeedMeter>,
    finished: AtomicBool,
}

impl SegmentedHttpTask {
    pub fn new(
        ctx: Arc<CoreContext>,
        store: Arc<ModelStore>,
        events: EventBus,
        record: Arc<Mutex<TaskRecord>>,
    ) -> Arc<Self> {
        let id = record.lock().unwrap().id;
        Arc::new(Self {
            id,
            ctx,
            record,
            store,
            events,
            cancel: CancellationToken::new(),
            cancel_status: Mutex::new(None),
            parts: Mutex::new(Vec::new()),
            speed: Mutex::new(SpeedMeter::new(0)),
            finished: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Whether the task has fully unwound (terminal state persisted).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Begin executing on the runtime.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let task = Arc::clone(self);
        tokio::spawn(async move { task.run().await })
    }

    /// Cooperative cancellation; the status text lands on the record once
    /// the workers have unwound.
    pub fn cancel(&self, status: &str) {
        *self.cancel_status.lock().unwrap() = Some(status.to_string());
        self.cancel.cancel();
    }

    async fn run(self: Arc<Self>) {
        {
            let mut r = self.record.lock().unwrap();
            r.reset_for_start();
        }
        self.persist_and_emit().await;

        match self.configure().await {
            Ok(true) => {}
            Ok(false) => {
                // configure already parked the task in a terminal state
                self.finished.store(true, Ordering::Release);
                return;
            }
            Err(e) => {
                self.handle_fault(e).await;
                self.finished.store(true, Ordering::Release);
                return;
            }
        }

        let shareds: Vec<Arc<PartShared>> = {
            let mut r = self.record.lock().unwrap();
            r.apply_status(TaskStatus::Downloading, status_text::DOWNLOADING);
            if r.started_at_ms == 0 {
                r.started_at_ms = now_ms();
            }
            *self.speed.lock().unwrap() = SpeedMeter::new(r.downloaded_bytes);
            r.parts
                .iter()
                .enumerate()
                .map(|(i, p)| PartShared::from_plan(i, p))
                .collect()
        };
        *self.parts.lock().unwrap() = shareds.clone();
        self.persist_and_emit().await;

        tracing::info!(
            "Task {}: starting {} part worker(s)",
            self.id,
            shareds.len()
        );

        let ticker = {
            let task = Arc::clone(&self);
            tokio::spawn(async move { task.progress_loop().await })
        };
        let workers: Vec<_> = shareds
            .iter()
            .map(|shared| {
                let task = Arc::clone(&self);
                let shared = Arc::clone(shared);
                tokio::spawn(async move { task.drive_part(shared).await })
            })
            .collect();
        for handle in workers {
            let _ = handle.await;
        }
        ticker.abort();

        self.finalize().await;
        self.finished.store(true, Ordering::Release);
    }

    /// Configuration phase, run once per start. Returns Ok(false) when the
    /// task was cancelled during configuration.
    async fn configure(&self) -> Result<bool, CoreError> {
        // Previous-data check: a resumed task needs its in-progress file
        let (resumed, in_progress, url, auto_redirect, needs_probe, probe_ctx) = {
            let mut r = self.record.lock().unwrap();
            if !r.settings.auto_resume {
                r.settings.auto_resume_max_errors = 0;
            }
            if !r.settings.auto_remove_tasks {
                r.settings.auto_remove_days = 0;
            }
            (
                r.downloaded_bytes > 0,
                r.in_progress_path(),
                r.url.clone(),
                r.settings.auto_link_redirection,
                r.file_size <= 1,
                ProbeContext {
                    browser_originated: r.browser_originated,
                    referer: r.referer.clone(),
                    cookie_string: r.cookie_string.clone(),
                    additional_headers: r.additional_headers.clone(),
                },
            )
        };

        if resumed && !in_progress.exists() {
            tracing::warn!("Task {}: resume data present but file missing", self.id);
            {
                let mut r = self.record.lock().unwrap();
                r.is_failed_to_access_file = true;
                r.apply_status(TaskStatus::Close, status_text::FAILED_DELETED_PAUSED);
            }
            self.persist_and_emit().await;
            return Ok(false);
        }

        if auto_redirect {
            let settings = self.record.lock().unwrap().settings.clone();
            let info = probe::probe_url(&settings, &url, Some(&probe_ctx)).await;
            if !info.is_file_forbidden && info.final_url != url {
                tracing::debug!("Task {}: redirect resolved to {}", self.id, info.final_url);
                self.record.lock().unwrap().url = info.final_url;
            }
        }

        if needs_probe {
            let (settings, url) = {
                let r = self.record.lock().unwrap();
                (r.settings.clone(), r.url.clone())
            };
            let info = probe::probe_url(&settings, &url, Some(&probe_ctx)).await;
            let mut r = self.record.lock().unwrap();
            if !info.is_file_forbidden {
                r.file_size = info.file_size;
                r.supports_resume = info.supports_resume;
                r.supports_multipart = info.supports_multipart;
                if r.file_name.is_empty() || r.file_name == UNKNOWN_FILE_NAME {
                    r.file_name = info.file_name;
                }
                if r.content_disposition.is_none() {
                    r.content_disposition = info.content_disposition;
                }
                if r.mime_type.is_none() {
                    r.mime_type = info.mime_type;
                }
            }
            if r.file_size <= 1 {
                r.is_unknown_size = true;
                r.file_size = -1;
            }
        }

        // Range planning; a resumed task keeps its persisted parts
        {
            let mut r = self.record.lock().unwrap();
            let threads = if !r.supports_multipart || r.is_unknown_size {
                1
            } else {
                r.settings.clamped_thread_connections()
            };
            if r.parts.is_empty() || !resumed {
                r.parts = ranges::plan_parts(r.file_size, threads);
            }
        }

        // Pre-allocate the in-progress file for random-access writes
        let (multipart, file_size, path) = {
            let r = self.record.lock().unwrap();
            (r.supports_multipart, r.file_size, r.in_progress_path())
        };
        if multipart && file_size > 0 && !path.exists() {
            if let Err(e) = preallocate(&path, file_size as u64).await {
                tracing::error!("Task {}: pre-allocation failed: {}", self.id, e);
                {
                    let mut r = self.record.lock().unwrap();
                    r.is_failed_to_access_file = true;
                    r.retry_count += 1;
                    r.user_dialog_message = Some(status_text::FAILED_TO_WRITE_FILE.to_string());
                    r.apply_status(TaskStatus::Close, status_text::DOWNLOAD_IO_FAILED);
                }
                self.persist_and_emit().await;
                return Ok(false);
            }
        }

        // Start-all gate
        let failed = self.record.lock().unwrap().is_failed_to_access_file;
        if failed {
            {
                let mut r = self.record.lock().unwrap();
                r.user_dialog_message = Some(status_text::FAILED_TO_WRITE_FILE.to_string());
                r.apply_status(TaskStatus::Close, status_text::DOWNLOAD_IO_FAILED);
            }
            self.persist_and_emit().await;
            return Ok(false);
        }

        Ok(true)
    }

    fn build_worker(&self, shared: Arc<PartShared>) -> PartWorker {
        let r = self.record.lock().unwrap();
        let single_thread = r.parts.len() == 1;
        PartWorker::new(
            shared,
            self.ctx.http.clone(),
            r.url.clone(),
            r.in_progress_path(),
            r.settings.clone(),
            RequestContext {
                browser_originated: r.browser_originated,
                referer: r.referer.clone(),
                cookie_string: r.cookie_string.clone(),
                content_disposition: r.content_disposition.clone(),
                additional_headers: r.additional_headers.clone(),
            },
            Arc::clone(&self.ctx.connectivity),
            self.cancel.clone(),
            single_thread,
            r.supports_resume,
            r.supports_multipart,
        )
    }

    async fn drive_part(self: Arc<Self>, shared: Arc<PartShared>) {
        let worker = self.build_worker(Arc::clone(&shared));
        loop {
            match worker.run().await {
                Ok(PartOutcome::Completed) => {
                    tracing::debug!("Task {}: part {} complete", self.id, shared.index);
                    self.on_part_settled().await;
                    break;
                }
                Ok(PartOutcome::Cancelled) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    // Watchdog stopped a stalled attempt; re-run resolves a
                    // filled part to Complete, anything else resumes
                    continue;
                }
                Ok(PartOutcome::GateClosed(text)) => {
                    if !self.wait_for_gate(text).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    if !self.handle_part_fault(shared.index, e).await {
                        break;
                    }
                    continue;
                }
            }
        }
    }

    /// Decide whether the failing part may retry. Critical faults cancel
    /// the task; transient ones consume the retry budget and wait out the
    /// network gate.
    async fn handle_part_fault(&self, part_index: usize, err: CoreError) -> bool {
        let kind = classify(&err);
        match kind {
            FaultKind::Cancelled => false,
            FaultKind::TransientNetwork => {
                let (running, may_retry, wifi_only) = {
                    let mut r = self.record.lock().unwrap();
                    let may = r.is_running && r.retry_count < r.settings.auto_resume_max_errors;
                    if may {
                        r.retry_count += 1;
                    }
                    (r.is_running, may, r.settings.wifi_only)
                };
                if !running {
                    return false;
                }
                if !may_retry {
                    tracing::warn!(
                        "Task {}: part {} out of retries: {}",
                        self.id,
                        part_index,
                        err
                    );
                    self.fail_task(status_text::DOWNLOAD_FAILED, |_| {}).await;
                    return false;
                }
                tracing::debug!(
                    "Task {}: retrying part {} after transient fault: {}",
                    self.id,
                    part_index,
                    err
                );
                self.persist_and_emit().await;
                if let Some(text) = gate_status(self.ctx.connectivity.as_ref(), wifi_only) {
                    if !self.wait_for_gate(text).await {
                        return false;
                    }
                }
                true
            }
            FaultKind::WriteIo => {
                self.fail_task(status_text::DOWNLOAD_IO_FAILED, |r| {
                    r.is_failed_to_access_file = true;
                    r.retry_count += 1;
                    r.user_dialog_message = Some(status_text::FAILED_TO_WRITE_FILE.to_string());
                })
                .await;
                false
            }
            FaultKind::UrlExpired => {
                self.fail_task(status_text::LINK_EXPIRED, |r| {
                    r.is_file_url_expired = true;
                })
                .await;
                false
            }
            FaultKind::DestinationMissing => {
                self.fail_task(status_text::FILE_DELETED, |r| {
                    r.is_destination_missing = true;
                })
                .await;
                false
            }
            FaultKind::Extractor | FaultKind::Fatal => {
                tracing::error!("Task {}: fatal fault on part {}: {}", self.id, part_index, err);
                self.fail_task(status_text::DOWNLOAD_FAILED, |_| {}).await;
                false
            }
        }
    }

    /// Latch the waiting state and poll the gate until it opens. Returns
    /// false when the task was cancelled while waiting.
    async fn wait_for_gate(&self, text: &'static str) -> bool {
        {
            let mut r = self.record.lock().unwrap();
            r.is_waiting_for_network = true;
            r.status_info = text.to_string();
            r.last_modified_ms = now_ms();
        }
        self.persist_and_emit().await;
        tracing::info!("Task {}: {}", self.id, text);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(GATE_RETRY) => {}
            }
            let wifi_only = self.record.lock().unwrap().settings.wifi_only;
            if gate_status(self.ctx.connectivity.as_ref(), wifi_only).is_none() {
                break;
            }
        }

        {
            let mut r = self.record.lock().unwrap();
            r.is_waiting_for_network = false;
            r.status_info = status_text::DOWNLOADING.to_string();
        }
        self.persist_and_emit().await;
        true
    }

    /// Cancel the whole task with a status text and extra flag mutations.
    async fn fail_task(&self, status: &str, mutate: impl FnOnce(&mut TaskRecord)) {
        *self.cancel_status.lock().unwrap() = Some(status.to_string());
        {
            let mut r = self.record.lock().unwrap();
            mutate(&mut r);
        }
        self.cancel.cancel();
    }

    async fn handle_fault(&self, err: CoreError) {
        tracing::error!("Task {}: start failed: {}", self.id, err);
        {
            let mut r = self.record.lock().unwrap();
            r.apply_status(TaskStatus::Close, status_text::DOWNLOAD_FAILED);
        }
        self.persist_and_emit().await;
    }

    async fn on_part_settled(&self) {
        self.sync_parts_into_record();
        self.persist_and_emit().await;
    }

    /// Copy worker atomics into the record and refresh derived counters.
    fn sync_parts_into_record(&self) {
        let parts = self.parts.lock().unwrap().clone();
        let mut r = self.record.lock().unwrap();
        for shared in &parts {
            if let Some(part) = r.parts.get_mut(shared.index) {
                part.downloaded_byte = shared.downloaded();
            }
        }
        r.recompute_progress();
        r.last_modified_ms = now_ms();
    }

    /// 500 ms aggregation tick: progress, speeds, ETA and the completion
    /// watchdog.
    async fn progress_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let parts = self.parts.lock().unwrap().clone();
            // Completion watchdog: a filled part whose attempt never
            // reported Complete is stopped; the supervisor resolves it
            for shared in &parts {
                if shared.is_filled() && shared.status() == PartStatus::Downloading {
                    tracing::debug!(
                        "Task {}: watchdog restarting stalled part {}",
                        self.id,
                        shared.index
                    );
                    shared.cancel_attempt();
                }
            }

            let snapshot = {
                let mut r = self.record.lock().unwrap();
                for shared in &parts {
                    if let Some(part) = r.parts.get_mut(shared.index) {
                        part.downloaded_byte = shared.downloaded();
                    }
                }
                r.recompute_progress();
                r.last_modified_ms = now_ms();

                let waiting = r.is_waiting_for_network;
                if r.is_running && !waiting {
                    r.elapsed_ms += TICK.as_millis() as i64;
                }

                let downloaded = r.downloaded_bytes;
                let mut speed = self.speed.lock().unwrap();
                speed.update(downloaded);
                r.realtime_bps = speed.current();
                if r.realtime_bps > r.max_bps {
                    r.max_bps = r.realtime_bps;
                }
                let elapsed_secs = r.elapsed_ms as f64 / 1000.0;
                r.average_bps = if elapsed_secs > 0.0 {
                    downloaded as f64 / elapsed_secs
                } else {
                    0.0
                };
                r.remaining_sec = if r.file_size > 0 && r.average_bps > 0.0 && !waiting {
                    ((r.file_size as u64).saturating_sub(downloaded) as f64 / r.average_bps) as i64
                } else {
                    0
                };
                r.clone()
            };

            if let Err(e) = self.store.update(&snapshot).await {
                tracing::warn!("Task {}: progress persist failed: {}", self.id, e);
            }
            self.events.publish(TaskEvent::ProgressUpdated {
                id: self.id,
                downloaded_bytes: snapshot.downloaded_bytes,
                total_bytes: snapshot.file_size,
                realtime_bps: snapshot.realtime_bps,
                percent: snapshot.progress_percent,
            });
        }
    }

    async fn finalize(&self) {
        self.sync_parts_into_record();

        let all_complete = {
            let parts = self.parts.lock().unwrap();
            !parts.is_empty() && parts.iter().all(|p| p.status() == PartStatus::Complete)
        };

        if all_complete && !self.cancel.is_cancelled() {
            let (in_progress, destination, unknown) = {
                let r = self.record.lock().unwrap();
                (r.in_progress_path(), r.destination_path(), r.is_unknown_size)
            };
            let observed = if unknown {
                tokio::fs::metadata(&in_progress).await.ok().map(|m| m.len())
            } else {
                None
            };
            if let Err(e) = adopt_file(&in_progress, &destination).await {
                tracing::error!("Task {}: completion move failed: {}", self.id, e);
                {
                    let mut r = self.record.lock().unwrap();
                    r.is_failed_to_access_file = true;
                    r.apply_status(TaskStatus::Close, status_text::DOWNLOAD_IO_FAILED);
                }
                self.persist_and_emit().await;
                return;
            }

            let digest = checksum::sha256_file(&destination).await.ok();
            let snapshot = {
                let mut r = self.record.lock().unwrap();
                if r.checksum.is_none() {
                    r.checksum = digest;
                }
                r.apply_complete(observed);
                r.clone()
            };
            if let Err(e) = self.store.update(&snapshot).await {
                tracing::warn!("Task {}: final persist failed: {}", self.id, e);
            }
            self.events.publish_status(&snapshot);
            self.events.publish_completed(&snapshot);
            tracing::info!(
                "Task {}: complete, {} bytes",
                self.id,
                snapshot.downloaded_bytes
            );
            return;
        }

        // Cancelled or failed: settle into Close with the requested text
        let status = self
            .cancel_status
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| status_text::PAUSED.to_string());
        {
            let mut r = self.record.lock().unwrap();
            if !r.is_complete {
                r.is_waiting_for_network = false;
                r.realtime_bps = 0.0;
                r.apply_status(TaskStatus::Close, &status);
            }
        }
        self.persist_and_emit().await;
        tracing::info!("Task {}: stopped ({})", self.id, status);
    }

    async fn persist_and_emit(&self) {
        let snapshot = self.record.lock().unwrap().clone();
        if let Err(e) = self.store.update(&snapshot).await {
            tracing::warn!("Task {}: persist failed: {}", self.id, e);
        }
        self.events.publish_status(&snapshot);
    }
}

/// Create a sparse file of the target length for random-access writes.
async fn preallocate(path: &std::path::Path, len: u64) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .await
        .map_err(|e| CoreError::FileAccess {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    file.set_len(len).await.map_err(|e| CoreError::FileAccess {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Move the finished in-progress file onto the destination, falling back
/// to copy+remove across devices.
async fn adopt_file(from: &std::path::Path, to: &std::path::Path) -> Result<(), CoreError> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await?;
            Ok(())
        }
    }
}
