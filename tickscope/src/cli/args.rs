//! CLI argument definitions

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

use crate::aggregation::MergeMode;
use crate::domain::{ClockSource, ThreadId};
use crate::grouping::{GrouperKind, ThreadDumper};
use crate::sampler::{SamplerMode, SamplerSettings};

#[derive(Parser)]
#[command(
    name = "tickscope",
    version,
    about = "Sample call stacks and aggregate them into a windowed call tree",
    after_help = "\
EXAMPLES:
    tickscope analyze app.jfr --top 20                 Hotspots of a recording
    tickscope analyze app.jfr --export report.json     Save the merged call tree
    tickscope sample --pid 1234 --duration 30          Poll thread states for 30s
    tickscope info app.jfr                             Chunk and event summary"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Aggregate the samples of a recording file
    Analyze {
        /// Recording to read
        #[arg(value_name = "RECORDING")]
        recording: PathBuf,

        /// What the samples measure
        #[arg(long, value_enum, default_value_t = ModeArg::Execution)]
        mode: ModeArg,

        /// Clock the recorder stamped events with
        #[arg(long, value_enum, default_value_t = ClockArg::Wall)]
        clock: ClockArg,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Poll the threads of a running process via /proc
    Sample {
        /// Process ID to sample
        #[arg(short, long)]
        pid: u32,

        /// Stop after N seconds (0 = until Ctrl+C)
        #[arg(long, default_value = "0")]
        duration: u64,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Print chunk and event counts of a recording file
    Info {
        #[arg(value_name = "RECORDING")]
        recording: PathBuf,
    },
}

/// Options shared by every sampling command.
#[derive(ClapArgs, Debug, Clone)]
pub struct SessionArgs {
    /// Sampling interval in milliseconds
    #[arg(long, default_value = "4")]
    pub interval_ms: u64,

    /// How threads are grouped into trees
    #[arg(long, value_enum, default_value_t = GrouperArg::ByPool)]
    pub grouper: GrouperArg,

    /// Whether calls from different lines of a parent stay separate
    #[arg(long, value_enum, default_value_t = MergeArg::SeparateParentCalls)]
    pub merge: MergeArg,

    /// Only sample threads whose name matches this regex (repeatable)
    #[arg(long = "thread", value_name = "PATTERN")]
    pub threads: Vec<String>,

    /// Only sample these thread ids (repeatable)
    #[arg(long = "tid", value_name = "TID")]
    pub thread_ids: Vec<u64>,

    /// Drop samples of sleeping, parked or waiting threads
    #[arg(long)]
    pub ignore_sleeping: bool,

    /// Drop native frames from stacks
    #[arg(long)]
    pub ignore_native: bool,

    /// Width of a time window in seconds
    #[arg(long, default_value = "60")]
    pub window_secs: u64,

    /// Export the report as JSON
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Number of hotspots to print
    #[arg(long, default_value = "10")]
    pub top: usize,
}

impl SessionArgs {
    /// Sampler settings for these options.
    ///
    /// # Errors
    /// Returns an error if a thread pattern is not a valid regex
    pub fn to_settings(&self, mode: SamplerMode) -> Result<SamplerSettings> {
        let dumper = if !self.thread_ids.is_empty() {
            ThreadDumper::specific(self.thread_ids.iter().copied().map(ThreadId), Vec::new())
        } else if self.threads.is_empty() {
            ThreadDumper::all()
        } else {
            ThreadDumper::regex(&self.threads).context("Invalid --thread pattern")?
        };
        Ok(SamplerSettings {
            interval: Duration::from_millis(self.interval_ms.max(1)),
            mode,
            dumper: Arc::new(dumper),
            grouper: self.grouper.into(),
            merge_mode: self.merge.into(),
            window_width: Duration::from_secs(self.window_secs.max(1)),
            ignore_sleeping: self.ignore_sleeping,
            ignore_native: self.ignore_native,
            ..SamplerSettings::default()
        })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Execution,
    Allocation,
    /// Allocations still alive at the end of the recording
    Live,
}

impl From<ModeArg> for SamplerMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Execution => SamplerMode::Execution,
            ModeArg::Allocation => SamplerMode::Allocation { live_only: false },
            ModeArg::Live => SamplerMode::Allocation { live_only: true },
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockArg {
    Monotonic,
    Tsc,
    Wall,
}

impl From<ClockArg> for ClockSource {
    fn from(clock: ClockArg) -> Self {
        match clock {
            ClockArg::Monotonic => ClockSource::Monotonic,
            ClockArg::Tsc => ClockSource::Tsc,
            ClockArg::Wall => ClockSource::WallClock,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrouperArg {
    ByName,
    ByPool,
    AsOne,
}

impl From<GrouperArg> for GrouperKind {
    fn from(grouper: GrouperArg) -> Self {
        match grouper {
            GrouperArg::ByName => GrouperKind::ByName,
            GrouperArg::ByPool => GrouperKind::ByPool,
            GrouperArg::AsOne => GrouperKind::AsOne,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeArg {
    SeparateParentCalls,
    SameMethod,
}

impl From<MergeArg> for MergeMode {
    fn from(merge: MergeArg) -> Self {
        match merge {
            MergeArg::SeparateParentCalls => MergeMode::SeparateParentCalls,
            MergeArg::SameMethod => MergeMode::SameMethod,
        }
    }
}
