//! Structured error types for tickscope
//!
//! Using thiserror for automatic Display implementation and error chaining.

use thiserror::Error;

/// Errors raised while decoding a recording.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Not a valid recording: {0}")]
    InvalidFormat(String),

    #[error("Unsupported recording version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Malformed encoding: {0}")]
    MalformedEncoding(String),

    /// The recording ends inside a chunk. Events read so far are usable.
    #[error("Incomplete chunk at offset {offset}")]
    IncompleteChunk { offset: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FormatError {
    /// Returns true for the partial-success condition callers may recover from.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, FormatError::IncompleteChunk { .. })
    }
}

/// Errors raised by the sampler lifecycle.
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("A sampler is already running")]
    AlreadyRunning,

    #[error("No sampler is running")]
    NotRunning,

    #[error("Tick counting is not supported without a tick hook")]
    TickCountingUnsupported,

    #[error("Native profiler engine unavailable: {0}")]
    NativeEngineUnsupported(String),

    #[error("Tick filtering needs monotonic sample timestamps, recorder uses {0}")]
    ClockMismatch(String),

    #[error("No capture source configured: {0}")]
    NoCaptureSource(String),

    #[error("Capture engine failed: {0}")]
    EngineFailed(String),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors delivered through a session's completion future.
///
/// Cloneable so the same outcome can be observed by the caller that ended
/// the session and by whoever awaits the handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("Sampler was cancelled")]
    Cancelled,

    #[error("Sampler failed: {0}")]
    Failed(String),

    #[error("Sampler was dropped before completing")]
    Dropped,
}

/// Errors raised by rolling statistics queries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("Percentile {0} is outside [0, 1]")]
    InvalidPercentile(f64),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to serialize report: {0}")]
    SerializationFailed(String),

    #[error("Failed to write report file: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
