//! Linux thread dumps from /proc
//!
//! Without an in-process stack walker, the best view of a foreign thread is
//! its scheduler state and the kernel function it is waiting in. Each pass
//! reads, for every task of the process:
//!
//! - `comm`: thread name
//! - `stat`: scheduler state letter
//! - `wchan`: kernel wait channel, `0` while running

use std::collections::HashSet;
use std::fs;

use crate::classification::FrameKind;
use crate::domain::{monotonic_now, unix_millis_now, Pid, SamplerError, ThreadId};
use crate::sampler::engine::ThreadSampleSource;
use crate::trace_data::{StackFrame, ThreadSample, ThreadState};

/// Frame name for a thread that is on a CPU.
pub const RUNNING_FRAME: &str = "[running]";

pub struct ProcThreadSource {
    pid: Pid,
    only: Option<HashSet<u64>>,
}

impl ProcThreadSource {
    #[must_use]
    pub fn new(pid: Pid) -> Self {
        Self { pid, only: None }
    }

    /// Read only these threads instead of listing the task directory.
    #[must_use]
    pub fn with_threads(mut self, threads: impl IntoIterator<Item = ThreadId>) -> Self {
        self.only = Some(threads.into_iter().map(|t| t.0).collect());
        self
    }

    fn task_ids(&self) -> Result<Vec<u64>, SamplerError> {
        if let Some(only) = &self.only {
            return Ok(only.iter().copied().collect());
        }
        let task_dir = format!("/proc/{}/task", self.pid.0);
        let entries = fs::read_dir(&task_dir).map_err(|e| {
            SamplerError::NoCaptureSource(format!("Failed to read {task_dir}: {e}"))
        })?;
        Ok(entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .collect())
    }

    fn read_task(&self, tid: u64) -> Option<ThreadSample> {
        let base = format!("/proc/{}/task/{tid}", self.pid.0);
        // A thread that exited between listing and reading is skipped
        let comm = fs::read_to_string(format!("{base}/comm")).ok()?;
        let stat = fs::read_to_string(format!("{base}/stat")).ok()?;
        let wchan = fs::read_to_string(format!("{base}/wchan")).unwrap_or_default();

        let state = parse_stat_state(&stat).map_or(ThreadState::Unknown, ThreadState::from_proc);
        Some(ThreadSample {
            thread_id: ThreadId(tid),
            thread_name: comm.trim().to_string(),
            state,
            frames: vec![wait_channel_frame(&wchan)],
            time: monotonic_now(),
            unix_millis: unix_millis_now(),
            value: 0,
        })
    }
}

impl ThreadSampleSource for ProcThreadSource {
    fn sample(&self) -> Result<Vec<ThreadSample>, SamplerError> {
        let mut tids = self.task_ids()?;
        tids.sort_unstable();
        let samples: Vec<ThreadSample> =
            tids.into_iter().filter_map(|tid| self.read_task(tid)).collect();
        if samples.is_empty() {
            return Err(SamplerError::NoCaptureSource(format!(
                "no readable threads for {}",
                self.pid
            )));
        }
        Ok(samples)
    }
}

/// State letter of a `stat` line. The name field may contain spaces and
/// parentheses, so the state is found after the last `)`.
#[must_use]
pub fn parse_stat_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.trim_start().chars().next()
}

#[must_use]
pub fn wait_channel_frame(wchan: &str) -> StackFrame {
    let wchan = wchan.trim();
    let name = if wchan.is_empty() || wchan == "0" {
        RUNNING_FRAME
    } else {
        wchan
    };
    StackFrame::native(name).with_kind(FrameKind::Kernel)
}
