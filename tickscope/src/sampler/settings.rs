//! Sampler configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregation::{MergeMode, DEFAULT_WINDOW_WIDTH};
use crate::grouping::{GrouperKind, ThreadDumper};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(4);

/// What a sample measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerMode {
    /// On-CPU stacks, weighted by sampling interval
    #[default]
    Execution,
    /// Allocating stacks, weighted by bytes. Needs the native engine.
    Allocation {
        /// Only objects still alive when the recording ends
        live_only: bool,
    },
}

impl fmt::Display for SamplerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerMode::Execution => write!(f, "execution"),
            SamplerMode::Allocation { live_only: false } => write!(f, "allocation"),
            SamplerMode::Allocation { live_only: true } => write!(f, "allocation (live)"),
        }
    }
}

/// Which capture engine to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnginePreference {
    /// Native engine when available, otherwise thread dumps
    #[default]
    Auto,
    /// Native engine or fail
    Native,
    /// Thread dumps even when the native engine is available
    ThreadDump,
}

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub interval: Duration,
    pub mode: SamplerMode,
    pub engine: EnginePreference,
    pub dumper: Arc<ThreadDumper>,
    pub grouper: GrouperKind,
    pub merge_mode: MergeMode,
    pub window_width: Duration,
    /// Windows older than this (relative to the end) are dropped on export
    pub retain: Option<Duration>,
    /// End the session automatically after this long
    pub auto_end: Option<Duration>,
    /// Keep only samples taken during ticks longer than this
    pub only_ticks_over: Option<Duration>,
    pub ignore_sleeping: bool,
    pub ignore_native: bool,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            mode: SamplerMode::default(),
            engine: EnginePreference::default(),
            dumper: Arc::new(ThreadDumper::all()),
            grouper: GrouperKind::default(),
            merge_mode: MergeMode::default(),
            window_width: DEFAULT_WINDOW_WIDTH,
            retain: None,
            auto_end: None,
            only_ticks_over: None,
            ignore_sleeping: false,
            ignore_native: false,
        }
    }
}

impl SamplerSettings {
    #[must_use]
    pub fn interval_micros(&self) -> u64 {
        u64::try_from(self.interval.as_micros()).unwrap_or(u64::MAX)
    }
}
