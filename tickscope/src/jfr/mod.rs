//! Recording format support
//!
//! - `cursor`: buffered reads and varint/string decoding
//! - `metadata`: per-chunk type schema
//! - `constants`: constant pools (threads, classes, methods, stack traces)
//! - `events`: event payload layouts
//! - `reader`: chunk walking and event streaming
//! - `frames`: stack trace to [`StackFrame`](crate::trace_data::StackFrame) resolution

pub mod constants;
pub mod cursor;
pub mod events;
pub mod frames;
pub mod metadata;
pub mod reader;

#[cfg(test)]
pub(crate) mod fixture;

pub use events::{Event, EventClass, EventKind};
pub use frames::FrameResolver;
pub use reader::{ChunkHeader, JfrReader};
