//! Analysis of finished reports
//!
//! Pure functions over [`Report`](crate::export::Report), used by the CLI
//! summary.

pub mod hotspot_analyzer;

pub use hotspot_analyzer::{analyze_hotspots, HotspotStats, MethodHotspot};
