//! Persisted task model
//!
//! The canonical `TaskRecord`, its on-disk store and the in-memory cache
//! the manager hydrates from on startup.

pub mod cache;
pub mod record;
pub mod store;

pub use cache::ModelCache;
pub use record::{
    now_ms, status_text, MediaFormat, MediaInfo, PartProgress, TaskKind, TaskRecord, TaskStatus,
};
pub use store::ModelStore;
