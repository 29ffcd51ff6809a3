//! Media Extractor Task
//!
//! Wraps an external extractor invocation (yt-dlp style): synthesises the
//! format selector and argument list, streams progress lines from the
//! helper, and re-homes the finished artifact to the user destination.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::CoreContext;
use crate::downloader::events::EventBus;
use crate::error::{CoreError, CoreResult};
use crate::model::record::{now_ms, status_text, MediaFormat, TaskRecord, TaskStatus};
use crate::model::store::ModelStore;
use crate::net::probe;

/// Sentinel format id meaning "let the engine pick"
pub const AUTO_FORMAT_ID: &str = "auto";

/// Height ceiling applied to social-network sources
const SOCIAL_HEIGHT_CAP: u32 = 2400;

/// Restart cadence while the helper keeps failing transiently
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Persist throttle for streamed progress
const PROGRESS_PERSIST: Duration = Duration::from_millis(500);

/// Helper output lines kept for error mapping
const OUTPUT_TAIL: usize = 200;

/// Hosts whose audio-only formats short-circuit to `bestaudio`
const STREAMING_VIDEO_HOSTS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "music.youtube.com",
    "vimeo.com",
    "dailymotion.com",
    "twitch.tv",
];

// [download]  42.1% of ~10.00MiB at 1.20MiB/s ETA 00:05
static PROGRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<percent>\d+(?:\.\d+)?)%").unwrap());

static DIGIT_GROUP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Known helper failure substrings and the status they map to
const ERROR_MAP: &[(&str, &str)] = &[
    ("rate-limit reached or login required", status_text::LOGIN_REQUIRED),
    ("requested content is not available", status_text::CONTENT_NOT_AVAILABLE),
    ("requested format is not available", status_text::FORMAT_NOT_FOUND),
    ("restricted video", status_text::LOGIN_REQUIRED),
    ("--cookies for the authentication", status_text::LOGIN_REQUIRED),
    ("connection reset by peer", status_text::SITE_BANNED),
    ("youtubedlexception", status_text::SERVER_ISSUE),
];

/// Map captured helper output to a known error message, if any.
pub fn map_extractor_error(output: &str) -> Option<&'static str> {
    let lower = output.to_lowercase();
    ERROR_MAP
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, message)| *message)
}

/// Last all-digit group of a resolution label (`1920x1080`, `720p`, `480`).
pub fn resolution_height(resolution: &str) -> Option<u32> {
    DIGIT_GROUP_RE
        .find_iter(resolution)
        .last()
        .and_then(|m| m.as_str().parse().ok())
}

fn is_streaming_video_host(url: &str) -> bool {
    let Some(host) = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
    else {
        return false;
    };
    STREAMING_VIDEO_HOSTS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

fn is_audio_only(resolution: &str) -> bool {
    resolution.to_lowercase().contains("audio")
}

/// Synthesise the extractor format selector for the chosen media format.
pub fn format_selector(format: &MediaFormat, source_url: &str) -> String {
    if format.format_id != AUTO_FORMAT_ID {
        return format.format_id.clone();
    }
    if format.is_from_social {
        return format!(
            "bestvideo[height<={cap}]+bestaudio/best[height<={cap}]/best",
            cap = SOCIAL_HEIGHT_CAP
        );
    }
    if is_streaming_video_host(source_url) && is_audio_only(&format.resolution) {
        return "bestaudio".to_string();
    }
    match resolution_height(&format.resolution) {
        Some(height) => format!(
            "bestvideo[height<={h}]+bestaudio/best[height<={h}]/best",
            h = height
        ),
        None => "best".to_string(),
    }
}

/// Strip filesystem-hostile characters from a title.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Fallback sanitisation: ASCII alphanumerics, space, dash, underscore.
pub fn extreme_sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rate value for `--limit-rate` (`128K`, `2M`, or raw bytes).
pub fn limit_rate_value(bps: u64) -> Option<String> {
    if bps == 0 {
        return None;
    }
    if bps % (1024 * 1024) == 0 {
        Some(format!("{}M", bps / (1024 * 1024)))
    } else if bps % 1024 == 0 {
        Some(format!("{}K", bps / 1024))
    } else {
        Some(bps.to_string())
    }
}

/// Build the helper argument list, order preserved, URL last.
pub fn build_args(record: &TaskRecord, cookies_path: Option<&Path>) -> Vec<String> {
    let settings = &record.settings;
    let mut args: Vec<String> = vec![
        "--continue".into(),
        "-f".into(),
        record
            .extractor_command
            .clone()
            .unwrap_or_else(|| "best".into()),
        "-o".into(),
        record
            .extractor_temp_path
            .as_deref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default(),
        "--playlist-items".into(),
        "1".into(),
        "--user-agent".into(),
        settings.effective_user_agent().to_string(),
        "--retries".into(),
        settings.auto_resume_max_errors.to_string(),
        "--socket-timeout".into(),
        (settings.http_read_timeout_ms / 1000).max(1).to_string(),
        "--concurrent-fragments".into(),
        "10".into(),
        "--fragment-retries".into(),
        "10".into(),
        "--no-check-certificate".into(),
        "--force-ipv4".into(),
        "--socket-timeout".into(),
        "30".into(),
        "--source-address".into(),
        "0.0.0.0".into(),
    ];

    if let Some(path) = cookies_path {
        let usable = std::fs::metadata(path)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false);
        if usable {
            args.push("--cookies".into());
            args.push(path.to_string_lossy().into_owned());
        }
    }
    if let Some(rate) = limit_rate_value(settings.max_network_bps) {
        args.push("--limit-rate".into());
        args.push(rate);
    }

    let url = record
        .media_info
        .as_ref()
        .map(|m| m.url.clone())
        .unwrap_or_else(|| record.url.clone());
    args.push(url);
    args
}

enum HelperRun {
    Success,
    Cancelled,
    Failed { output_tail: String },
}

/// Extractor-driven download: one external helper process per attempt.
pub struct MediaExtractorTask {
    id: i64,
    ctx: Arc<CoreContext>,
    record: Arc<Mutex<TaskRecord>>,
    store: Arc<ModelStore>,
    events: EventBus,
    cancel: CancellationToken,
    cancel_status: Mutex<Option<String>>,
    finished: AtomicBool,
}

impl MediaExtractorTask {
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
            finished: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let task = Arc::clone(self);
        tokio::spawn(async move { task.run().await })
    }

    pub fn cancel(&self, status: &str) {
        *self.cancel_status.lock().unwrap() = Some(status.to_string());
        self.cancel.cancel();
    }

    async fn run(self: Arc<Self>) {
        {
            let mut r = self.record.lock().unwrap();
            r.reset_for_start();
        }
        if let Err(e) = self.prepare().await {
            tracing::error!("Task {}: extractor preparation failed: {}", self.id, e);
            {
                let mut r = self.record.lock().unwrap();
                r.is_failed_to_access_file = true;
                r.apply_status(TaskStatus::Close, status_text::DOWNLOAD_IO_FAILED);
            }
            self.persist_and_emit().await;
            self.finished.store(true, Ordering::Release);
            return;
        }

        {
            let mut r = self.record.lock().unwrap();
            r.apply_status(TaskStatus::Downloading, status_text::DOWNLOADING);
        }
        self.persist_and_emit().await;

        loop {
            match self.run_helper_once().await {
                Ok(HelperRun::Success) => {
                    if let Err(e) = self.complete().await {
                        tracing::error!("Task {}: output adoption failed: {}", self.id, e);
                        {
                            let mut r = self.record.lock().unwrap();
                            r.is_failed_to_access_file = true;
                            r.apply_status(TaskStatus::Close, status_text::DOWNLOAD_IO_FAILED);
                        }
                        self.persist_and_emit().await;
                    }
                    break;
                }
                Ok(HelperRun::Cancelled) => {
                    self.settle_cancelled().await;
                    break;
                }
                Ok(HelperRun::Failed { output_tail }) => {
                    if !self.handle_failure(&output_tail).await {
                        break;
                    }
                    // transient: helper restarts after the waiting delay
                }
                Err(e) => {
                    tracing::error!("Task {}: helper spawn failed: {}", self.id, e);
                    {
                        let mut r = self.record.lock().unwrap();
                        r.is_extractor_error = true;
                        r.extractor_error_message =
                            Some(status_text::DOWNLOAD_FAILED.to_string());
                        r.apply_status(TaskStatus::Close, status_text::DOWNLOAD_FAILED);
                    }
                    self.persist_and_emit().await;
                    break;
                }
            }
        }
        self.finished.store(true, Ordering::Release);
    }

    /// First-run planning: destination subdirectory, random temp filename,
    /// final name from the sanitised title, single-connection clamps.
    async fn prepare(&self) -> CoreResult<()> {
        let (directory, internal_dir, needs_plan) = {
            let r = self.record.lock().unwrap();
            (
                r.directory.clone(),
                self.store.internal_dir().to_path_buf(),
                !r.is_smart_category_dir_processed,
            )
        };

        tokio::fs::create_dir_all(&directory).await?;

        if needs_plan {
            let temp_path = fresh_temp_path(&internal_dir);
            let mut guard = self.record.lock().unwrap();
            let r = &mut *guard;

            if r.cookie_string.is_none() {
                r.cookie_string = r.media_info.as_ref().and_then(|m| m.cookie.clone());
            }

            let (source_url, title, resolution) = match (&r.media_info, &r.media_format) {
                (Some(info), Some(format)) => (
                    info.url.clone(),
                    info.title.clone(),
                    format.resolution.clone(),
                ),
                (Some(info), None) => (info.url.clone(), info.title.clone(), String::new()),
                _ => {
                    return Err(CoreError::InvalidState(
                        "extractor task without media info".into(),
                    ))
                }
            };

            if let Some(format) = &r.media_format {
                r.extractor_command = Some(format_selector(format, &source_url));
            } else {
                r.extractor_command = Some("best".to_string());
            }
            r.extractor_temp_path = Some(temp_path);

            let mut stem = sanitize_title(&title);
            if stem.is_empty() {
                stem = extreme_sanitize_title(&title);
            }
            if stem.is_empty() {
                stem = format!("media_{}", r.id);
            }
            let ext = if resolution.to_lowercase().contains("audio only") {
                ".mp3"
            } else {
                ".mp4"
            };
            r.file_name = format!("{}{}", stem, ext);

            r.supports_resume = true;
            r.supports_multipart = false;
            r.is_unknown_size = r.file_size <= 0;
            if r.started_at_ms == 0 {
                r.started_at_ms = now_ms();
            }
            r.is_smart_category_dir_processed = true;
        }

        // Cookies file must exist before the argument list references it
        let snapshot = self.record.lock().unwrap().clone();
        self.store.update_with_cookie_override(&snapshot, true).await?;
        self.events.publish_status(&snapshot);
        Ok(())
    }

    async fn run_helper_once(&self) -> CoreResult<HelperRun> {
        let (program, args) = {
            let r = self.record.lock().unwrap();
            let cookies_path = self.store.cookies_path(r.id);
            let cookies = cookies_path.exists().then_some(cookies_path);
            (
                r.settings.extractor_program.clone(),
                build_args(&r, cookies.as_deref()),
            )
        };

        tracing::info!("Task {}: running {} {:?}", self.id, program.display(), args);
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(OUTPUT_TAIL)));

        let stdout_reader = self.spawn_line_reader(stdout, Arc::clone(&tail), true);
        let stderr_reader = self.spawn_line_reader(stderr, Arc::clone(&tail), false);

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = self.cancel.cancelled() => None,
        };
        let exit = match waited {
            Some(status) => Some(status?),
            None => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                None
            }
        };
        if let Some(handle) = stdout_reader {
            let _ = handle.await;
        }
        if let Some(handle) = stderr_reader {
            let _ = handle.await;
        }

        let Some(exit) = exit else {
            return Ok(HelperRun::Cancelled);
        };
        if exit.success() {
            return Ok(HelperRun::Success);
        }

        let output_tail = {
            let tail = tail.lock().unwrap();
            tail.iter().cloned().collect::<Vec<_>>().join("\n")
        };
        tracing::warn!(
            "Task {}: helper exited with {:?}",
            self.id,
            exit.code()
        );
        Ok(HelperRun::Failed { output_tail })
    }

    fn spawn_line_reader<R>(
        &self,
        source: Option<R>,
        tail: Arc<Mutex<VecDeque<String>>>,
        parse_progress: bool,
    ) -> Option<tokio::task::JoinHandle<()>>
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let source = source?;
        let record = Arc::clone(&self.record);
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let id = self.id;
        Some(tokio::spawn(async move {
            let mut lines = BufReader::new(source).lines();
            let mut last_persist = Instant::now()
                .checked_sub(PROGRESS_PERSIST)
                .unwrap_or_else(Instant::now);
            while let Ok(Some(line)) = lines.next_line().await {
                {
                    let mut tail = tail.lock().unwrap();
                    if tail.len() == OUTPUT_TAIL {
                        tail.pop_front();
                    }
                    tail.push_back(line.clone());
                }
                if !parse_progress {
                    continue;
                }

                let percent = PROGRESS_RE
                    .captures(&line)
                    .and_then(|c| c.name("percent"))
                    .and_then(|m| m.as_str().parse::<f64>().ok());
                let status_line = normalize_status_line(&line);

                let snapshot = {
                    let mut r = record.lock().unwrap();
                    if let Some(p) = percent.filter(|p| *p > 0.0) {
                        r.progress_percent = (p.round() as i32).clamp(0, 100);
                    }
                    if let Some(text) = status_line {
                        r.extractor_status_text = Some(text);
                    }
                    if last_persist.elapsed() < PROGRESS_PERSIST {
                        None
                    } else {
                        r.last_modified_ms = now_ms();
                        Some(r.clone())
                    }
                };
                if let Some(snapshot) = snapshot {
                    last_persist = Instant::now();
                    if let Err(e) = store.update(&snapshot).await {
                        tracing::warn!("Task {}: progress persist failed: {}", id, e);
                    }
                    events.publish(crate::downloader::events::TaskEvent::ProgressUpdated {
                        id,
                        downloaded_bytes: snapshot.downloaded_bytes,
                        total_bytes: snapshot.file_size,
                        realtime_bps: snapshot.realtime_bps,
                        percent: snapshot.progress_percent,
                    });
                }
            }
        }))
    }

    /// Non-zero exit: map known substrings, then expired-link and missing
    /// destination checks; everything else restarts after the waiting
    /// delay while the retry budget lasts. Returns true to restart.
    async fn handle_failure(&self, output_tail: &str) -> bool {
        if let Some(message) = map_extractor_error(output_tail) {
            tracing::warn!("Task {}: helper failure mapped to {}", self.id, message);
            {
                let mut r = self.record.lock().unwrap();
                r.is_extractor_error = true;
                r.extractor_error_message = Some(message.to_string());
                r.apply_status(TaskStatus::Close, status_text::PAUSED);
            }
            self.persist_and_emit().await;
            return false;
        }

        let (settings, url, directory) = {
            let r = self.record.lock().unwrap();
            let url = r
                .media_info
                .as_ref()
                .map(|m| m.url.clone())
                .unwrap_or_else(|| r.url.clone());
            (r.settings.clone(), url, r.directory.clone())
        };

        if probe::url_is_expired(&settings, &url).await {
            {
                let mut r = self.record.lock().unwrap();
                r.is_file_url_expired = true;
                r.apply_status(TaskStatus::Close, status_text::LINK_EXPIRED);
            }
            self.persist_and_emit().await;
            return false;
        }

        if !directory.exists() {
            {
                let mut r = self.record.lock().unwrap();
                r.is_destination_missing = true;
                r.apply_status(TaskStatus::Close, status_text::FILE_DELETED);
            }
            self.persist_and_emit().await;
            return false;
        }

        let may_retry = {
            let mut r = self.record.lock().unwrap();
            let may = r.retry_count < r.settings.auto_resume_max_errors;
            if may {
                r.retry_count += 1;
                r.is_waiting_for_network = true;
                r.status_info = status_text::WAITING_FOR_NETWORK.to_string();
            }
            may
        };
        if !may_retry {
            {
                let mut r = self.record.lock().unwrap();
                r.is_extractor_error = true;
                r.extractor_error_message = Some(status_text::DOWNLOAD_FAILED.to_string());
                r.apply_status(TaskStatus::Close, status_text::DOWNLOAD_FAILED);
            }
            self.persist_and_emit().await;
            return false;
        }

        self.persist_and_emit().await;
        tokio::select! {
            _ = self.cancel.cancelled() => return false,
            _ = tokio::time::sleep(RESTART_DELAY) => {}
        }
        {
            let mut r = self.record.lock().unwrap();
            r.is_waiting_for_network = false;
            r.status_info = status_text::DOWNLOADING.to_string();
        }
        self.persist_and_emit().await;
        true
    }

    /// Exit 0: adopt the helper output into the user destination.
    async fn complete(&self) -> CoreResult<()> {
        let (temp_path, destination, id) = {
            let r = self.record.lock().unwrap();
            (
                r.extractor_temp_path.clone(),
                r.destination_path(),
                r.id,
            )
        };
        let temp_path = temp_path.ok_or_else(|| {
            CoreError::InvalidState("extractor finished without a temp path".into())
        })?;

        let produced = find_prefixed_output(&temp_path).await.ok_or_else(|| {
            CoreError::DestinationMissing(temp_path.clone())
        })?;

        let final_path = adopt_output(&produced, &destination).await?;
        let size = tokio::fs::metadata(&final_path).await?.len();

        // Thumbnail cache and the cookies temp are spent now
        let _ = tokio::fs::remove_file(self.store.thumbnail_path(id)).await;
        let _ = tokio::fs::remove_file(self.store.cookies_path(id)).await;

        let snapshot = {
            let mut r = self.record.lock().unwrap();
            if let Some(name) = final_path.file_name().and_then(|n| n.to_str()) {
                r.file_name = name.to_string();
            }
            r.extractor_status_text = Some(status_text::COMPLETE.to_string());
            r.apply_complete(Some(size));
            r.clone()
        };
        self.store.update(&snapshot).await?;
        self.events.publish_status(&snapshot);
        self.events.publish_completed(&snapshot);
        tracing::info!("Task {}: extractor complete, {} bytes", self.id, size);
        Ok(())
    }

    async fn settle_cancelled(&self) {
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
                r.apply_status(TaskStatus::Close, &status);
            }
        }
        self.persist_and_emit().await;
        tracing::info!("Task {}: extractor stopped ({})", self.id, status);
    }

    async fn persist_and_emit(&self) {
        let snapshot = self.record.lock().unwrap().clone();
        if let Err(e) = self.store.update(&snapshot).await {
            tracing::warn!("Task {}: persist failed: {}", self.id, e);
        }
        self.events.publish_status(&snapshot);
    }
}

/// Random 10-character name in the internal dir, retried on collision.
fn fresh_temp_path(internal_dir: &Path) -> PathBuf {
    loop {
        let name: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(10)
            .map(char::from)
            .collect();
        let candidate = internal_dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
    }
}

/// Strip the helper's `[tag]` prefix and collapse whitespace.
fn normalize_status_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let without_tag = if trimmed.starts_with('[') {
        trimmed
            .split_once(']')
            .map(|(_, rest)| rest.trim())
            .unwrap_or(trimmed)
    } else {
        trimmed
    };
    if without_tag.is_empty() {
        None
    } else {
        Some(without_tag.split_whitespace().collect::<Vec<_>>().join(" "))
    }
}

/// Find a file next to `temp_path` whose name starts with its basename
/// (the helper may have appended its own extension).
async fn find_prefixed_output(temp_path: &Path) -> Option<PathBuf> {
    if temp_path.exists() {
        return Some(temp_path.to_path_buf());
    }
    let dir = temp_path.parent()?;
    let prefix = temp_path.file_name()?.to_str()?.to_string();
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        // Fragment leftovers are not the finished artifact
        if name.starts_with(&prefix) && !name.ends_with(".part") {
            return Some(entry.path());
        }
    }
    None
}

/// Move the produced file to the destination, renaming on collision.
async fn adopt_output(produced: &Path, destination: &Path) -> CoreResult<PathBuf> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut target = destination.to_path_buf();
    if target.exists() {
        let stem = destination
            .file_stem()
            .and_then(|s| s.to_str())
            .map(extreme_sanitize_title)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "media".to_string());
        let ext = destination
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let dir = destination.parent().unwrap_or_else(|| Path::new("."));
        for n in 1.. {
            let candidate = dir.join(format!("{} ({}).{}", stem, n, ext));
            if !candidate.exists() {
                target = candidate;
                break;
            }
        }
    }

    match tokio::fs::rename(produced, &target).await {
        Ok(()) => Ok(target),
        Err(_) => {
            tokio::fs::copy(produced, &target).await?;
            tokio::fs::remove_file(produced).await?;
            Ok(target)
        }
    }
}
