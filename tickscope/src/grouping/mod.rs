//! Thread selection and grouping
//!
//! - [`ThreadDumper`]: which threads get sampled
//! - [`ThreadGrouper`]: which call tree a sampled thread lands in

pub mod thread_dumper;
pub mod thread_grouper;

pub use thread_dumper::{DumperDescription, ThreadDumper};
pub use thread_grouper::{GrouperKind, ThreadGrouper, ROOT_GROUP};
