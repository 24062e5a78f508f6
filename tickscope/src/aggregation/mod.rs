//! Sample aggregation
//!
//! - `call_tree`: per-group merged call trees with windowed weights
//! - `tick_filter`: keeps only samples taken during long ticks
//! - `window`: wall-clock window arithmetic

pub mod call_tree;
pub mod tick_filter;
pub mod window;

pub use call_tree::{CallTree, MergeMode, NodeDetail, NodeKey, NodeSnapshot, ThreadSnapshot};
pub use tick_filter::{TickInterval, TickWindowFilter};
pub use window::{window_for_unix_millis, DEFAULT_WINDOW_WIDTH};
