//! Aiodl — concurrent multi-source download engine.
//!
//! The engine drives two task kinds to completion: a segmented HTTP(S)
//! downloader with resume and multi-part range transfers, and a
//! media-extractor downloader that delegates transport to an external
//! helper process. Task state is persisted crash-safely as one JSON
//! document per task and re-hydrated on startup.
//!
//! External surfaces (UI, notifications, settings storage) consume the
//! engine through [`downloader::DownloadManager`] operations and the
//! [`downloader::events::EventBus`] broadcast.

pub mod config;
pub mod downloader;
pub mod error;
pub mod model;
pub mod net;

pub use config::{CoreContext, CorePaths, SettingsSnapshot};
pub use downloader::{DownloadManager, TaskEvent};
pub use error::{CoreError, CoreResult};
pub use model::{TaskKind, TaskRecord, TaskStatus};
