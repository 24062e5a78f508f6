//! Sampler report
//!
//! The immutable result of a finished session: metadata, the sorted list
//! of time windows, one merged call tree per thread group and the source
//! attribution maps. Every `times` array in the report lines up with
//! `windows`, so `times[i]` is the weight recorded during `windows[i]`.
//!
//! ```json
//! {
//!   "metadata": { "start_millis": 1700000000000, "engine": "thread-dump", ... },
//!   "windows": [28333333, 28333334],
//!   "threads": [
//!     { "name": "Worker-Pool (x2)", "group": "Worker-Pool", "times": [30, 10],
//!       "children": [
//!         { "class_name": "java.lang.Thread", "method_name": "run", "line": 840,
//!           "times": [30, 10], "children": [] } ] } ],
//!   "sources": { "classes": {}, "methods": {}, "lines": {} }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::aggregation::{CallTree, MergeMode, NodeDetail, NodeSnapshot};
use crate::domain::{ExportError, WindowIndex};
use crate::export::SourceLookup;
use crate::grouping::{DumperDescription, GrouperKind, ThreadGrouper};
use crate::sampler::{EndReason, ProcessorCounts, SamplerMode};
use crate::stats::{PlatformStatistics, SystemSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub start_millis: u64,
    pub end_millis: u64,
    pub interval_micros: u64,
    pub window_width_millis: u64,
    /// Capture engine name
    pub engine: String,
    pub mode: SamplerMode,
    pub merge_mode: MergeMode,
    pub dumper: DumperDescription,
    pub grouper: GrouperKind,
    pub end_reason: EndReason,
    /// Ticks observed during the session, when a tick hook was attached
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_count: Option<u64>,
    pub samples: ProcessorCounts,
    #[serde(default)]
    pub platform: PlatformStatistics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemSummary>,
    /// The recording ended inside a chunk; only part of it was read
    #[serde(default)]
    pub incomplete_recording: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallNode {
    pub class_name: String,
    pub method_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub times: Vec<u64>,
    #[serde(default)]
    pub children: Vec<CallNode>,
}

impl CallNode {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.times.iter().sum()
    }

    /// Weight not passed on to any child.
    #[must_use]
    pub fn self_time(&self) -> u64 {
        let children: u64 = self.children.iter().map(CallNode::total).sum();
        self.total().saturating_sub(children)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadNode {
    /// Display label from the grouper
    pub name: String,
    /// Group key
    pub group: String,
    pub times: Vec<u64>,
    #[serde(default)]
    pub children: Vec<CallNode>,
}

impl ThreadNode {
    #[must_use]
    pub fn total(&self) -> u64 {
        self.times.iter().sum()
    }
}

/// Source attribution, keyed by class name, `class.method descriptor`
/// and `class:line`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceMaps {
    #[serde(default)]
    pub classes: BTreeMap<String, String>,
    #[serde(default)]
    pub methods: BTreeMap<String, String>,
    #[serde(default)]
    pub lines: BTreeMap<String, String>,
}

impl SourceMaps {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.methods.is_empty() && self.lines.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub windows: Vec<u32>,
    pub threads: Vec<ThreadNode>,
    #[serde(default)]
    pub sources: SourceMaps,
}

impl Report {
    /// Snapshot a call tree into a report.
    #[must_use]
    pub fn build(
        metadata: ReportMetadata,
        tree: &CallTree,
        grouper: &ThreadGrouper,
        lookup: Option<&dyn SourceLookup>,
    ) -> Self {
        let windows = tree.windows();
        let columns: HashMap<WindowIndex, usize> =
            windows.iter().enumerate().map(|(i, w)| (*w, i)).collect();
        let align = |times: &BTreeMap<WindowIndex, u64>| {
            let mut out = vec![0; windows.len()];
            for (window, value) in times {
                if let Some(&i) = columns.get(window) {
                    out[i] = *value;
                }
            }
            out
        };

        let threads = tree
            .snapshot()
            .into_iter()
            .map(|thread| ThreadNode {
                name: grouper.label(&thread.group),
                times: align(&thread.times),
                children: thread.children.iter().map(|c| convert(c, &align)).collect(),
                group: thread.group,
            })
            .collect::<Vec<_>>();

        let sources = lookup.map_or_else(SourceMaps::default, |lookup| {
            let mut maps = SourceMaps::default();
            for thread in &threads {
                collect_sources(&thread.children, lookup, &mut maps);
            }
            maps
        });

        Self {
            metadata,
            windows: windows.into_iter().map(|w| w.0).collect(),
            threads,
            sources,
        }
    }

    /// Sum of every thread group's weight.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.threads.iter().map(ThreadNode::total).sum()
    }

    /// Serialize as JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails
    pub fn to_bytes(&self) -> Result<Vec<u8>, ExportError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a report produced by [`to_bytes`](Self::to_bytes) or
    /// [`write_json`](Self::write_json).
    ///
    /// # Errors
    /// Returns an error if the bytes are not a valid report
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ExportError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize as pretty JSON into any writer.
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| ExportError::SerializationFailed(e.to_string()))
    }

    /// Write pretty JSON to `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| ExportError::WriteFailed(format!("{}: {e}", path.display())))?;
        let mut writer = BufWriter::new(file);
        self.export(&mut writer)?;
        writer.flush()?;
        info!(
            "Wrote report with {} thread groups to {}",
            self.threads.len(),
            path.display()
        );
        Ok(())
    }
}

fn convert<F>(node: &NodeSnapshot, align: &F) -> CallNode
where
    F: Fn(&BTreeMap<WindowIndex, u64>) -> Vec<u64>,
{
    let (descriptor, line) = match &node.key.detail {
        NodeDetail::None => (None, None),
        NodeDetail::Descriptor(d) => (Some(d.clone()), None),
        NodeDetail::Line(l) => (None, Some(*l)),
    };
    CallNode {
        class_name: node.key.class_name.clone(),
        method_name: node.key.method_name.clone(),
        descriptor,
        line,
        times: align(&node.times),
        children: node.children.iter().map(|c| convert(c, align)).collect(),
    }
}

fn collect_sources(nodes: &[CallNode], lookup: &dyn SourceLookup, maps: &mut SourceMaps) {
    for node in nodes {
        if !maps.classes.contains_key(&node.class_name) {
            if let Some(source) = lookup.class_source(&node.class_name) {
                maps.classes.insert(node.class_name.clone(), source);
            }
        }
        if let Some(descriptor) = &node.descriptor {
            let key = format!("{}.{} {descriptor}", node.class_name, node.method_name);
            if !maps.methods.contains_key(&key) {
                if let Some(source) =
                    lookup.method_source(&node.class_name, &node.method_name, descriptor)
                {
                    maps.methods.insert(key, source);
                }
            }
        }
        if let Some(line) = node.line {
            let key = format!("{}:{line}", node.class_name);
            if !maps.lines.contains_key(&key) {
                if let Some(source) = lookup.line_source(&node.class_name, line) {
                    maps.lines.insert(key, source);
                }
            }
        }
        collect_sources(&node.children, lookup, maps);
    }
}
