//! Configuration module
//!
//! Settings snapshot, engine paths, and the explicit `CoreContext` handed
//! to the manager. Settings load through a figment chain (defaults ->
//! TOML file -> `AIODL_` environment variables).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use figment::providers::Format;
use serde::{Deserialize, Serialize};

use crate::net::watcher::{AlwaysOnline, Connectivity};

/// Hard cap on concurrent part workers per task
pub const MAX_THREAD_CONNECTIONS: usize = 18;

/// Where newly created tasks land by default
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DownloadLocation {
    /// Application-owned storage; files here are deleted on task delete
    PrivateFolder,
    /// Shared media area; files survive task delete
    SystemGallery,
}

impl Default for DownloadLocation {
    fn default() -> Self {
        Self::PrivateFolder
    }
}

/// Settings snapshot embedded in every task record.
///
/// A deep copy is taken at task creation so runtime settings changes never
/// mutate a running task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsSnapshot {
    /// Selects the initial destination directory
    pub default_download_location: DownloadLocation,

    /// Manager concurrency cap (simultaneous running tasks)
    pub max_parallel: usize,

    /// Per-task part count for segmented HTTP (1..=18)
    pub thread_connections: usize,

    /// Part read buffer size in bytes
    pub buffer_size: usize,

    /// Speed limit per part in bytes/sec (0 disables)
    pub max_network_bps: u64,

    /// Connect and read deadline in milliseconds
    pub http_read_timeout_ms: u64,

    /// Preferred request User-Agent; falls back to `browser_user_agent`
    pub user_agent: Option<String>,

    /// Browser-style User-Agent used for probes and as fallback
    pub browser_user_agent: String,

    /// Whether failed transfers are retried automatically
    pub auto_resume: bool,

    /// Retry budget per task when `auto_resume` is on
    pub auto_resume_max_errors: u32,

    /// Whether completed tasks are auto-removed
    pub auto_remove_tasks: bool,

    /// Days a completed task is kept (0 = removed immediately)
    pub auto_remove_days: i64,

    /// Gate transfers on Wi-Fi connectivity
    pub wifi_only: bool,

    /// Observer-only: suppress the progress notification
    pub hide_notification: bool,

    /// Observer-only: play a sound on completion
    pub play_notification_sound: bool,

    /// Resolve the final URL via probe before transfer
    pub auto_link_redirection: bool,

    /// Media extractor helper binary
    pub extractor_program: PathBuf,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            default_download_location: DownloadLocation::PrivateFolder,
            max_parallel: 3,
            thread_connections: 4,
            buffer_size: 64 * 1024,
            max_network_bps: 0,
            http_read_timeout_ms: 30_000,
            user_agent: None,
            browser_user_agent:
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            auto_resume: true,
            auto_resume_max_errors: 5,
            auto_remove_tasks: false,
            auto_remove_days: 0,
            wifi_only: false,
            hide_notification: false,
            play_notification_sound: true,
            auto_link_redirection: false,
            extractor_program: PathBuf::from("yt-dlp"),
        }
    }
}

impl SettingsSnapshot {
    /// Effective request User-Agent (`user_agent` wins over the browser one).
    pub fn effective_user_agent(&self) -> &str {
        self.user_agent
            .as_deref()
            .filter(|ua| !ua.is_empty())
            .unwrap_or(&self.browser_user_agent)
    }

    /// Part count clamped to the valid range.
    pub fn clamped_thread_connections(&self) -> usize {
        self.thread_connections.clamp(1, MAX_THREAD_CONNECTIONS)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_read_timeout_ms.max(1))
    }
}

/// Load settings from defaults, an optional TOML file and the environment.
pub fn load_settings(config_path: Option<&Path>) -> SettingsSnapshot {
    let mut figment = figment::Figment::new()
        .merge(figment::providers::Serialized::defaults(SettingsSnapshot::default()));
    if let Some(path) = config_path {
        figment = figment.merge(figment::providers::Toml::file(path));
    }
    figment
        .merge(figment::providers::Env::prefixed("AIODL_"))
        .extract()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            SettingsSnapshot::default()
        })
}

/// Filesystem layout of the engine
#[derive(Debug, Clone)]
pub struct CorePaths {
    /// Internal data folder: model JSONs, cookies files, thumbnails,
    /// extractor temp artifacts
    pub internal_dir: PathBuf,
    /// Private download area (deleted with the task)
    pub private_dir: PathBuf,
    /// Shared gallery download area
    pub gallery_dir: PathBuf,
}

impl CorePaths {
    /// Standard layout under a single root directory.
    pub fn under_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            internal_dir: root.join("data"),
            private_dir: root.join("downloads"),
            gallery_dir: root.join("gallery"),
        }
    }

    /// Create the directory structure if it does not exist.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.internal_dir)?;
        std::fs::create_dir_all(&self.private_dir)?;
        std::fs::create_dir_all(&self.gallery_dir)?;
        Ok(())
    }

    /// Destination directory for the given location choice.
    pub fn location_dir(&self, location: DownloadLocation) -> &Path {
        match location {
            DownloadLocation::PrivateFolder => &self.private_dir,
            DownloadLocation::SystemGallery => &self.gallery_dir,
        }
    }
}

/// Immutable context threaded through the engine: paths, settings, the
/// shared HTTP client, and the connectivity gate. No ambient globals.
pub struct CoreContext {
    pub paths: CorePaths,
    pub settings: SettingsSnapshot,
    pub http: reqwest::Client,
    pub connectivity: Arc<dyn Connectivity>,
}

impl CoreContext {
    pub fn new(paths: CorePaths, settings: SettingsSnapshot) -> Self {
        Self::with_connectivity(paths, settings, Arc::new(AlwaysOnline))
    }

    pub fn with_connectivity(
        paths: CorePaths,
        settings: SettingsSnapshot,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(settings.effective_user_agent().to_string())
            .pool_max_idle_per_host(10)
            .connect_timeout(settings.http_timeout())
            .build()
            .unwrap_or_default();

        Self {
            paths,
            settings,
            http,
            connectivity,
        }
    }
}

/// Install a tracing subscriber with env-filter support.
///
/// Offered for binaries and tests; the library itself never installs one.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "aiodl=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_user_agent_prefers_explicit() {
        let mut s = SettingsSnapshot::default();
        assert_eq!(s.effective_user_agent(), s.browser_user_agent);

        s.user_agent = Some("aiodl/1.0".into());
        assert_eq!(s.effective_user_agent(), "aiodl/1.0");

        s.user_agent = Some(String::new());
        assert_eq!(s.effective_user_agent(), s.browser_user_agent.clone());
    }

    #[test]
    fn thread_connections_clamped() {
        let mut s = SettingsSnapshot::default();
        s.thread_connections = 99;
        assert_eq!(s.clamped_thread_connections(), MAX_THREAD_CONNECTIONS);
        s.thread_connections = 0;
        assert_eq!(s.clamped_thread_connections(), 1);
    }

    #[test]
    fn location_dir_selection() {
        let paths = CorePaths::under_root("/tmp/aiodl-test");
        assert!(paths
            .location_dir(DownloadLocation::PrivateFolder)
            .ends_with("downloads"));
        assert!(paths
            .location_dir(DownloadLocation::SystemGallery)
            .ends_with("gallery"));
    }
}
