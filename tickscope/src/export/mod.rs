//! Report export
//!
//! A finished session is exported as one immutable [`Report`], serialized
//! as JSON for upload or for later viewing.

pub mod report;
pub mod source_lookup;

pub use report::{CallNode, Report, ReportMetadata, SourceMaps, ThreadNode};
pub use source_lookup::{PackagePrefixLookup, SourceLookup};
