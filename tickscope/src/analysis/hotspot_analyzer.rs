//! Hotspot analysis for sampler reports.
//!
//! Walks every thread group's call tree and attributes weight to methods:
//!
//! - **self time**: weight recorded at the node itself, not passed to a child
//! - **total time**: weight of every subtree the method roots, counted once
//!   per path so recursion is not double counted
//!
//! # Performance
//!
//! - `record_report()`: O(nodes × depth) for the recursion check
//! - `to_hotspots()`: O(n log n) where n = unique methods (sorting)

// Percentage calculations intentionally convert u64 to f64
#![allow(clippy::cast_precision_loss)]

use std::cmp::Reverse;
use std::collections::HashMap;

use crate::export::{CallNode, Report};

/// Call paths kept per hotspot.
const MAX_CALL_PATHS_PER_HOTSPOT: usize = 5;

/// A method with its aggregated weight.
///
/// ```text
/// HOTSPOTS                                  self   total
/// ────────────────────────────────────────────────────────
///   net.server.Level.tick                  42.3%   71.0%
///   java.util.HashMap.resize               18.7%   18.7%
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MethodHotspot {
    /// `class.method`
    pub name: String,

    pub self_time: u64,

    pub total_time: u64,

    /// Self time as a percentage of the report total (0.0 - 100.0).
    pub percentage: f64,

    /// Total time as a percentage of the report total.
    pub total_percentage: f64,

    /// Self time per thread group.
    pub groups: HashMap<String, u64>,

    /// Source attribution of the class, if the report carries one.
    pub source: Option<String>,

    /// Heaviest root-first call paths ending in this method.
    pub call_paths: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
struct MethodStats {
    self_time: u64,
    total_time: u64,
    groups: HashMap<String, u64>,
    source: Option<String>,
    call_paths: Vec<(Vec<String>, u64)>,
}

/// Incremental hotspot aggregator, fed one report at a time.
#[derive(Debug, Default)]
pub struct HotspotStats {
    methods: HashMap<String, MethodStats>,
    /// Denominator for percentages
    total: u64,
}

impl HotspotStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_report(&mut self, report: &Report) {
        for thread in &report.threads {
            self.total += thread.total();
            let mut path = Vec::new();
            for child in &thread.children {
                self.record_node(report, &thread.group, child, &mut path);
            }
        }
    }

    fn record_node(
        &mut self,
        report: &Report,
        group: &str,
        node: &CallNode,
        path: &mut Vec<String>,
    ) {
        let name = format!("{}.{}", node.class_name, node.method_name);
        let recursive = path.contains(&name);
        let self_time = node.self_time();

        let stats = self.methods.entry(name.clone()).or_insert_with(|| MethodStats {
            source: report.sources.classes.get(&node.class_name).cloned(),
            ..MethodStats::default()
        });
        if !recursive {
            stats.total_time += node.total();
        }

        path.push(name);
        if self_time > 0 {
            stats.self_time += self_time;
            *stats.groups.entry(group.to_string()).or_insert(0) += self_time;
            match stats.call_paths.iter_mut().find(|(p, _)| p.as_slice() == path.as_slice()) {
                Some((_, weight)) => *weight += self_time,
                None => stats.call_paths.push((path.clone(), self_time)),
            }
        }
        for child in &node.children {
            self.record_node(report, group, child, path);
        }
        path.pop();
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Hotspots sorted by self time, heaviest first.
    #[must_use]
    pub fn to_hotspots(&self) -> Vec<MethodHotspot> {
        let percent = |value: u64| {
            if self.total > 0 {
                (value as f64 / self.total as f64) * 100.0
            } else {
                0.0
            }
        };

        let mut hotspots: Vec<MethodHotspot> = self
            .methods
            .iter()
            .map(|(name, stats)| {
                let mut paths = stats.call_paths.clone();
                paths.sort_by_key(|(_, weight)| Reverse(*weight));
                paths.truncate(MAX_CALL_PATHS_PER_HOTSPOT);

                MethodHotspot {
                    name: name.clone(),
                    self_time: stats.self_time,
                    total_time: stats.total_time,
                    percentage: percent(stats.self_time),
                    total_percentage: percent(stats.total_time),
                    groups: stats.groups.clone(),
                    source: stats.source.clone(),
                    call_paths: paths.into_iter().map(|(path, _)| path).collect(),
                }
            })
            .collect();

        // Name breaks ties so output is stable
        hotspots.sort_by(|a, b| {
            b.self_time
                .cmp(&a.self_time)
                .then_with(|| b.total_time.cmp(&a.total_time))
                .then_with(|| a.name.cmp(&b.name))
        });
        hotspots
    }
}

/// Self-time hotspots of one report, heaviest first.
#[must_use]
pub fn analyze_hotspots(report: &Report) -> Vec<MethodHotspot> {
    let mut stats = HotspotStats::new();
    stats.record_report(report);
    stats.to_hotspots()
}
