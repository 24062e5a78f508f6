//! Domain model for tickscope
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{
    monotonic_now, unix_millis_now, ClockSource, Pid, ThreadId, Timestamp, WindowIndex,
};

pub use errors::{CompletionError, ExportError, FormatError, SamplerError, StatsError};
