//! CPU and GC statistics gathered from recording events

#![allow(clippy::cast_precision_loss)]

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::jfr::events::{CpuLoad, GcHeapSummary};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CpuSummary {
    /// Mean process load, user plus system, 0..1
    pub process_mean: f64,
    pub process_max: f64,
    /// Mean whole-machine load, 0..1
    pub machine_mean: f64,
    pub samples: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GcSummary {
    /// Distinct collections seen
    pub collections: u64,
    pub max_heap_used: u64,
    pub max_heap_committed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemSummary {
    pub cpu: CpuSummary,
    pub gc: GcSummary,
}

#[derive(Debug, Default)]
struct Accumulated {
    process_total: f64,
    process_max: f64,
    machine_total: f64,
    cpu_samples: u64,
    gc_ids: HashSet<u32>,
    max_heap_used: u64,
    max_heap_committed: u64,
}

/// Accumulates system events as the native engine reads them.
#[derive(Debug, Default)]
pub struct SystemStatistics {
    inner: Mutex<Accumulated>,
}

impl SystemStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cpu(&self, load: &CpuLoad) {
        let Ok(mut acc) = self.inner.lock() else {
            return;
        };
        let process = f64::from(load.jvm_user) + f64::from(load.jvm_system);
        acc.process_total += process;
        acc.process_max = acc.process_max.max(process);
        acc.machine_total += f64::from(load.machine_total);
        acc.cpu_samples += 1;
    }

    /// A collection shows up as a before/after pair with the same id.
    pub fn record_gc(&self, summary: &GcHeapSummary) {
        let Ok(mut acc) = self.inner.lock() else {
            return;
        };
        acc.gc_ids.insert(summary.gc_id);
        acc.max_heap_used = acc.max_heap_used.max(summary.heap_used);
        acc.max_heap_committed = acc.max_heap_committed.max(summary.committed_size);
    }

    #[must_use]
    pub fn summary(&self) -> SystemSummary {
        let Ok(acc) = self.inner.lock() else {
            return SystemSummary::default();
        };
        let n = acc.cpu_samples.max(1) as f64;
        SystemSummary {
            cpu: CpuSummary {
                process_mean: acc.process_total / n,
                process_max: acc.process_max,
                machine_mean: acc.machine_total / n,
                samples: acc.cpu_samples,
            },
            gc: GcSummary {
                collections: acc.gc_ids.len() as u64,
                max_heap_used: acc.max_heap_used,
                max_heap_committed: acc.max_heap_committed,
            },
        }
    }
}
