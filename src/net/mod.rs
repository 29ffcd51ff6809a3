//! Network-facing helpers
//!
//! URL probing, cookie-file formatting, speed measurement and the
//! connectivity gate.

pub mod cookies;
pub mod probe;
pub mod speed;
pub mod watcher;

pub use probe::{probe_url, FileInfo};
pub use speed::SpeedMeter;
pub use watcher::Connectivity;
