//! Aiodl Domain Errors
//!
//! Typed error definitions for the engine core, plus the fault
//! classification that decides whether a transfer error is retried.

use std::path::PathBuf;

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Destination could not be opened or extended for writing
    #[error("cannot access file {path:?}: {reason}")]
    FileAccess { path: PathBuf, reason: String },

    /// The source URL no longer serves the file (4xx/5xx on resume)
    #[error("file URL expired (HTTP {status})")]
    UrlExpired { status: u16 },

    /// Resume found the in-progress file gone
    #[error("destination file missing: {0:?}")]
    DestinationMissing(PathBuf),

    /// Extractor helper failed with a recognised error
    #[error("extractor error: {message}")]
    Extractor { message: String },

    /// Cooperative cancellation observed mid-transfer
    #[error("cancelled")]
    Cancelled,

    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for engine operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Disposition of a transfer fault.
///
/// Transient faults latch the waiting-for-network state and are retried up
/// to the snapshot's error budget; critical faults cancel the task with a
/// matching status text and are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Timeout, reset, DNS — retry with the waiting latch
    TransientNetwork,
    /// Cannot open/extend the destination
    WriteIo,
    /// Source URL no longer valid
    UrlExpired,
    /// In-progress file disappeared
    DestinationMissing,
    /// Helper process failure with a mapped message
    Extractor,
    /// User cancellation, not an error
    Cancelled,
    /// Programming invariant or unclassifiable failure
    Fatal,
}

impl FaultKind {
    /// Whether the retry policy may act on this fault at all.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FaultKind::TransientNetwork)
    }
}

/// Classify an error into its retry disposition.
pub fn classify(err: &CoreError) -> FaultKind {
    match err {
        CoreError::Http(e) => classify_http(e),
        CoreError::Io(e) => classify_io(e),
        CoreError::FileAccess { .. } => FaultKind::WriteIo,
        CoreError::UrlExpired { .. } => FaultKind::UrlExpired,
        CoreError::DestinationMissing(_) => FaultKind::DestinationMissing,
        CoreError::Extractor { .. } => FaultKind::Extractor,
        CoreError::Cancelled => FaultKind::Cancelled,
        CoreError::Json(_) | CoreError::InvalidState(_) => FaultKind::Fatal,
    }
}

fn classify_http(err: &reqwest::Error) -> FaultKind {
    if err.is_timeout() || err.is_connect() {
        return FaultKind::TransientNetwork;
    }
    // Body/decode errors mid-stream are connection drops in practice
    if err.is_body() || err.is_decode() || err.is_request() {
        return FaultKind::TransientNetwork;
    }
    FaultKind::Fatal
}

fn classify_io(err: &std::io::Error) -> FaultKind {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::TimedOut
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => FaultKind::TransientNetwork,
        ErrorKind::NotFound => FaultKind::DestinationMissing,
        ErrorKind::PermissionDenied => FaultKind::WriteIo,
        _ => FaultKind::WriteIo,
    }
}
