//! Task Record
//!
//! The canonical, persisted state of a single download. One record per
//! task, uniquely identified by a process-wide integer id. Runtime
//! handles (cancellation tokens, worker state) never live here; tasks
//! reach their record through the manager.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::SettingsSnapshot;

/// Suffix of the in-progress sibling next to the destination file
pub const IN_PROGRESS_SUFFIX: &str = ".aio_download";

/// Canonical status triple. The boolean flags on the record mirror it for
/// the external UI; `apply_status` keeps them in lockstep.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Not running: initial, paused, failed
    Close,
    /// Actively transferring
    Downloading,
    /// Terminal success
    Complete,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Close
    }
}

/// Which engine drives the task. Derived from the record contents, never
/// persisted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Http,
    MediaExtractor,
}

/// Status texts surfaced to the external UI
pub mod status_text {
    pub const WAITING_TO_JOIN: &str = "waiting-to-join";
    pub const DOWNLOADING: &str = "downloading";
    pub const COMPLETE: &str = "complete";
    pub const PAUSED: &str = "paused";
    pub const FAILED_DELETED_PAUSED: &str = "failed-deleted-paused";
    pub const DOWNLOAD_IO_FAILED: &str = "download-io-failed";
    pub const FAILED_TO_WRITE_FILE: &str = "failed-to-write-file";
    pub const WAITING_FOR_NETWORK: &str = "waiting-for-network";
    pub const WAITING_FOR_WIFI: &str = "waiting-for-wifi";
    pub const WAITING_FOR_INTERNET: &str = "waiting-for-internet";
    pub const LINK_EXPIRED: &str = "link-expired";
    pub const FILE_DELETED: &str = "file-deleted";
    pub const DOWNLOAD_FAILED: &str = "download-failed";

    // Mapped extractor failures
    pub const LOGIN_REQUIRED: &str = "login-required";
    pub const CONTENT_NOT_AVAILABLE: &str = "content-not-available";
    pub const FORMAT_NOT_FOUND: &str = "format-not-found";
    pub const SITE_BANNED: &str = "site-banned";
    pub const SERVER_ISSUE: &str = "server-issue";
}

/// Progress of one byte-range segment
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PartProgress {
    pub start_byte: u64,
    pub end_byte: u64,
    pub chunk_size: u64,
    pub downloaded_byte: u64,
    pub percent: i32,
    /// Forward-compat: fields written by newer versions survive round-trips
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PartProgress {
    pub fn is_filled(&self) -> bool {
        self.chunk_size > 0 && self.downloaded_byte >= self.chunk_size
    }
}

/// Source metadata for extractor-driven tasks
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaInfo {
    pub url: String,
    pub title: String,
    pub referer: Option<String>,
    pub thumbnail_url: Option<String>,
    pub cookie: Option<String>,
}

/// Selected media format for extractor-driven tasks
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaFormat {
    pub format_id: String,
    pub resolution: String,
    pub vcodec: Option<String>,
    pub is_from_social: bool,
}

fn default_file_size() -> i64 {
    -1
}

/// The canonical, persisted state of a single download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Process-wide unique task id
    pub id: i64,

    /// Transfer URL (may be replaced by redirect resolution)
    pub url: String,

    #[serde(default)]
    pub referer: Option<String>,

    /// Verbatim HTTP-style cookie header; mirrored to a cookies file
    #[serde(default)]
    pub cookie_string: Option<String>,

    #[serde(default)]
    pub content_disposition: Option<String>,

    #[serde(default)]
    pub mime_type: Option<String>,

    #[serde(default)]
    pub additional_headers: HashMap<String, String>,

    /// Request originated from an embedded browser; transfer requests
    /// carry browser-style headers
    #[serde(default)]
    pub browser_originated: bool,

    /// Destination directory; final path is `directory/file_name`
    pub directory: PathBuf,

    pub file_name: String,

    #[serde(default)]
    pub category_name: Option<String>,

    /// Total size in bytes, -1 when unknown
    #[serde(default = "default_file_size")]
    pub file_size: i64,

    #[serde(default)]
    pub is_unknown_size: bool,

    #[serde(default)]
    pub downloaded_bytes: u64,

    #[serde(default)]
    pub supports_resume: bool,

    #[serde(default)]
    pub supports_multipart: bool,

    /// 0..=100
    #[serde(default)]
    pub progress_percent: i32,

    #[serde(default)]
    pub parts: Vec<PartProgress>,

    #[serde(default)]
    pub realtime_bps: f64,

    #[serde(default)]
    pub average_bps: f64,

    #[serde(default)]
    pub max_bps: f64,

    #[serde(default)]
    pub started_at_ms: i64,

    #[serde(default)]
    pub last_modified_ms: i64,

    /// Accumulates only while running and not waiting
    #[serde(default)]
    pub elapsed_ms: i64,

    #[serde(default)]
    pub remaining_sec: i64,

    #[serde(default)]
    pub status: TaskStatus,

    /// Last status text shown to the user
    #[serde(default)]
    pub status_info: String,

    #[serde(default)]
    pub is_running: bool,

    #[serde(default)]
    pub is_complete: bool,

    #[serde(default)]
    pub is_deleted: bool,

    #[serde(default)]
    pub is_removed: bool,

    #[serde(default)]
    pub is_waiting_for_network: bool,

    #[serde(default)]
    pub is_file_url_expired: bool,

    #[serde(default)]
    pub is_destination_missing: bool,

    #[serde(default)]
    pub is_failed_to_access_file: bool,

    #[serde(default)]
    pub is_extractor_error: bool,

    #[serde(default)]
    pub extractor_error_message: Option<String>,

    /// Modal message for the user; cleared externally on acknowledgement
    #[serde(default)]
    pub user_dialog_message: Option<String>,

    /// Deep copy of the settings at creation time
    #[serde(default)]
    pub settings: SettingsSnapshot,

    #[serde(default)]
    pub media_info: Option<MediaInfo>,

    #[serde(default)]
    pub media_format: Option<MediaFormat>,

    /// Extractor format selector, synthesised at start
    #[serde(default)]
    pub extractor_command: Option<String>,

    /// Random temp output path inside the internal dir
    #[serde(default)]
    pub extractor_temp_path: Option<PathBuf>,

    #[serde(default)]
    pub extractor_status_text: Option<String>,

    /// Filename/category planning already ran for this extractor task
    #[serde(default)]
    pub is_smart_category_dir_processed: bool,

    #[serde(default)]
    pub retry_count: u32,

    /// Opaque digest string (lowercase hex SHA-256 when populated)
    #[serde(default)]
    pub checksum: Option<String>,

    /// Forward-compat: unknown fields are preserved on round-trip
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl TaskRecord {
    /// Create a fresh record. The settings are copied, not shared.
    pub fn new(
        id: i64,
        url: impl Into<String>,
        directory: impl Into<PathBuf>,
        file_name: impl Into<String>,
        settings: SettingsSnapshot,
    ) -> Self {
        Self {
            id,
            url: url.into(),
            referer: None,
            cookie_string: None,
            content_disposition: None,
            mime_type: None,
            additional_headers: HashMap::new(),
            browser_originated: false,
            directory: directory.into(),
            file_name: file_name.into(),
            category_name: None,
            file_size: -1,
            is_unknown_size: false,
            downloaded_bytes: 0,
            supports_resume: false,
            supports_multipart: false,
            progress_percent: 0,
            parts: Vec::new(),
            realtime_bps: 0.0,
            average_bps: 0.0,
            max_bps: 0.0,
            started_at_ms: 0,
            last_modified_ms: now_ms(),
            elapsed_ms: 0,
            remaining_sec: 0,
            status: TaskStatus::Close,
            status_info: String::new(),
            is_running: false,
            is_complete: false,
            is_deleted: false,
            is_removed: false,
            is_waiting_for_network: false,
            is_file_url_expired: false,
            is_destination_missing: false,
            is_failed_to_access_file: false,
            is_extractor_error: false,
            extractor_error_message: None,
            user_dialog_message: None,
            settings,
            media_info: None,
            media_format: None,
            extractor_command: None,
            extractor_temp_path: None,
            extractor_status_text: None,
            is_smart_category_dir_processed: false,
            retry_count: 0,
            checksum: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Kind is inferred from the presence of media metadata.
    pub fn kind(&self) -> TaskKind {
        if self.media_info.is_some() {
            TaskKind::MediaExtractor
        } else {
            TaskKind::Http
        }
    }

    /// Final destination path.
    pub fn destination_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    /// In-progress sibling of the destination.
    pub fn in_progress_path(&self) -> PathBuf {
        let mut name = self.file_name.clone();
        name.push_str(IN_PROGRESS_SUFFIX);
        self.directory.join(name)
    }

    /// Set the status triple, keeping the mirrored flags consistent:
    /// Complete <=> is_complete && !is_running, Downloading <=> is_running.
    pub fn apply_status(&mut self, status: TaskStatus, info: &str) {
        self.status = status;
        self.status_info = info.to_string();
        match status {
            TaskStatus::Close => {
                self.is_running = false;
            }
            TaskStatus::Downloading => {
                self.is_running = true;
                self.is_complete = false;
            }
            TaskStatus::Complete => {
                self.is_running = false;
                self.is_complete = true;
            }
        }
        self.last_modified_ms = now_ms();
    }

    /// Terminal success: pin progress to 100% and settle the byte counts.
    ///
    /// When the size was unknown, `observed_size` (the final file length)
    /// becomes the authoritative size.
    pub fn apply_complete(&mut self, observed_size: Option<u64>) {
        if let Some(size) = observed_size {
            self.file_size = size as i64;
            self.is_unknown_size = false;
        }
        if self.file_size >= 0 {
            self.downloaded_bytes = self.file_size as u64;
        }
        for part in &mut self.parts {
            part.downloaded_byte = part.chunk_size;
            part.percent = 100;
        }
        self.progress_percent = 100;
        self.realtime_bps = 0.0;
        self.remaining_sec = 0;
        self.apply_status(TaskStatus::Complete, status_text::COMPLETE);
    }

    /// Reset per-start transient state: flags, retry budget, status text.
    pub fn reset_for_start(&mut self) {
        self.retry_count = 0;
        self.is_waiting_for_network = false;
        self.is_file_url_expired = false;
        self.is_destination_missing = false;
        self.is_failed_to_access_file = false;
        self.is_extractor_error = false;
        self.extractor_error_message = None;
        self.user_dialog_message = None;
        self.apply_status(TaskStatus::Close, status_text::WAITING_TO_JOIN);
    }

    /// Recompute aggregate byte counters from the parts.
    pub fn recompute_progress(&mut self) {
        let downloaded: u64 = self.parts.iter().map(|p| p.downloaded_byte).sum();
        self.downloaded_bytes = downloaded;
        if self.file_size > 0 {
            self.progress_percent =
                ((downloaded.saturating_mul(100)) / self.file_size as u64).min(100) as i32;
        } else {
            // Unknown size reports 0 until completion
            self.progress_percent = 0;
        }
        for part in &mut self.parts {
            part.percent = if part.chunk_size > 0 {
                ((part.downloaded_byte.saturating_mul(100)) / part.chunk_size).min(100) as i32
            } else {
                0
            };
        }
    }

    /// Whether the record still occupies a scheduler slot.
    pub fn is_schedulable(&self) -> bool {
        !self.is_complete && !self.is_deleted && !self.is_removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord::new(7, "https://host.example/f.bin", "/tmp/dl", "f.bin", SettingsSnapshot::default())
    }

    #[test]
    fn kind_follows_media_info() {
        let mut r = record();
        assert_eq!(r.kind(), TaskKind::Http);
        r.media_info = Some(MediaInfo::default());
        assert_eq!(r.kind(), TaskKind::MediaExtractor);
    }

    #[test]
    fn status_flags_stay_consistent() {
        let mut r = record();
        r.apply_status(TaskStatus::Downloading, status_text::DOWNLOADING);
        assert!(r.is_running && !r.is_complete);

        r.apply_complete(None);
        assert_eq!(r.status, TaskStatus::Complete);
        assert!(r.is_complete && !r.is_running);
        assert_eq!(r.progress_percent, 100);
    }

    #[test]
    fn complete_with_observed_size_settles_unknown() {
        let mut r = record();
        r.is_unknown_size = true;
        r.file_size = -1;
        r.apply_complete(Some(12_345));
        assert_eq!(r.file_size, 12_345);
        assert_eq!(r.downloaded_bytes, 12_345);
        assert!(!r.is_unknown_size);
    }

    #[test]
    fn recompute_sums_parts() {
        let mut r = record();
        r.file_size = 1000;
        r.parts = vec![
            PartProgress { start_byte: 0, end_byte: 499, chunk_size: 500, downloaded_byte: 500, ..Default::default() },
            PartProgress { start_byte: 500, end_byte: 999, chunk_size: 500, downloaded_byte: 250, ..Default::default() },
        ];
        r.recompute_progress();
        assert_eq!(r.downloaded_bytes, 750);
        assert_eq!(r.progress_percent, 75);
        assert_eq!(r.parts[0].percent, 100);
        assert_eq!(r.parts[1].percent, 50);
    }

    #[test]
    fn unknown_size_progress_pinned_to_zero() {
        let mut r = record();
        r.file_size = -1;
        r.is_unknown_size = true;
        r.parts = vec![PartProgress { chunk_size: 0, downloaded_byte: 9999, ..Default::default() }];
        r.recompute_progress();
        assert_eq!(r.progress_percent, 0);
    }

    #[test]
    fn json_round_trip_preserves_unknown_fields() {
        let mut r = record();
        r.extra.insert("futureField".to_string(), serde_json::json!({"nested": true}));

        let encoded = serde_json::to_string(&r).unwrap();
        let decoded: TaskRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, r);
        assert!(decoded.extra.contains_key("futureField"));
    }

    #[test]
    fn json_round_trip_identity() {
        let mut r = record();
        r.file_size = 4096;
        r.parts = vec![PartProgress { start_byte: 0, end_byte: 4095, chunk_size: 4096, ..Default::default() }];
        r.media_info = Some(MediaInfo { url: "https://v.example/w".into(), title: "clip".into(), ..Default::default() });
        r.media_format = Some(MediaFormat { format_id: "137".into(), resolution: "1920x1080".into(), ..Default::default() });

        let decoded: TaskRecord =
            serde_json::from_str(&serde_json::to_string(&r).unwrap()).unwrap();
        assert_eq!(decoded, r);
    }

    #[test]
    fn in_progress_path_uses_fixed_suffix() {
        let r = record();
        assert_eq!(
            r.in_progress_path(),
            PathBuf::from("/tmp/dl/f.bin.aio_download")
        );
    }
}
