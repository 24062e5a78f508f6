//! Long-tick filter
//!
//! When a sampler only records ticks over a threshold, the tick monitor
//! pushes the `(start, end)` of each long tick here and samples are kept
//! only if they fall inside one. Both streams move forward in time, so the
//! queue is consumed from the front:
//!
//! ```text
//!  intervals:   [100───200]      [300───400]
//!  samples:   50    150     250      350     450
//!             ✗      ✓       ✗        ✓       ✗
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;

use log::debug;

use crate::domain::Timestamp;

/// Closed interval of one long tick on the monotonic clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInterval {
    pub start: Timestamp,
    pub end: Timestamp,
}

#[derive(Debug, Default)]
pub struct TickWindowFilter {
    intervals: Mutex<VecDeque<TickInterval>>,
}

impl TickWindowFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a long tick. Intervals that would move time backwards are
    /// dropped.
    pub fn push(&self, interval: TickInterval) {
        if interval.end < interval.start {
            return;
        }
        let Ok(mut queue) = self.intervals.lock() else {
            return;
        };
        if queue.back().is_some_and(|last| interval.start < last.end) {
            debug!("Dropping out-of-order tick interval {interval:?}");
            return;
        }
        queue.push_back(interval);
    }

    /// Whether a sample taken at `time` lies inside a queued long tick.
    ///
    /// Intervals that end before `time` are discarded for good.
    pub fn accept(&self, time: Timestamp) -> bool {
        let Ok(mut queue) = self.intervals.lock() else {
            return false;
        };
        while let Some(front) = queue.front() {
            if time < front.start {
                return false;
            }
            if time <= front.end {
                return true;
            }
            queue.pop_front();
        }
        false
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.intervals.lock().map_or(0, |q| q.len())
    }
}
