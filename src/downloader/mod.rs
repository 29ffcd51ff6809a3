//! Download Engine Module
//!
//! Core download functionality: the global manager, the two task kinds,
//! range planning, part workers and the event bus.

pub mod checksum;
pub mod events;
pub mod extractor;
pub mod http_task;
pub mod manager;
pub mod part;
pub mod ranges;

// Re-export commonly used types
pub use events::{EventBus, TaskEvent};
pub use extractor::MediaExtractorTask;
pub use http_task::SegmentedHttpTask;
pub use manager::DownloadManager;
