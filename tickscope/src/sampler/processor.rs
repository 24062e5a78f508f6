//! Sample processing
//!
//! Every capture engine hands its samples to one [`SampleProcessor`],
//! which applies the session's filters in order and inserts survivors into
//! the call tree:
//!
//! ```text
//! sample ─▶ dumper ─▶ sleeping ─▶ long-tick gate ─▶ native strip ─▶ call tree
//! ```
//!
//! The long-tick gate cannot judge a sample until the tick it was taken in
//! has ended, so gated samples wait in a queue until the [`TickFeed`] has
//! seen a tick end at or after their timestamp.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::aggregation::{window_for_unix_millis, CallTree, TickInterval, TickWindowFilter};
use crate::classification::{is_sleeping, strip_native_frames};
use crate::domain::Timestamp;
use crate::grouping::{ThreadDumper, ThreadGrouper};
use crate::sampler::SamplerSettings;
use crate::tick::TickListener;
use crate::trace_data::ThreadSample;

/// Feeds long ticks from the tick hook into a [`TickWindowFilter`].
#[derive(Debug)]
pub struct TickFeed {
    threshold_nanos: u64,
    filter: TickWindowFilter,
    /// End of the latest finished tick
    completed_through: AtomicU64,
    long_ticks: AtomicU64,
}

impl TickFeed {
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold_nanos: u64::try_from(threshold.as_nanos()).unwrap_or(u64::MAX),
            filter: TickWindowFilter::new(),
            completed_through: AtomicU64::new(0),
            long_ticks: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn completed_through(&self) -> Timestamp {
        Timestamp(self.completed_through.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn long_ticks(&self) -> u64 {
        self.long_ticks.load(Ordering::Relaxed)
    }

    fn accept(&self, time: Timestamp) -> bool {
        self.filter.accept(time)
    }
}

impl TickListener for TickFeed {
    fn on_tick_end(&self, _tick: u64, start: Timestamp, end: Timestamp) {
        if end.saturating_since(start) > self.threshold_nanos {
            self.filter.push(TickInterval { start, end });
            self.long_ticks.fetch_add(1, Ordering::Relaxed);
        }
        self.completed_through.fetch_max(end.0, Ordering::AcqRel);
    }
}

/// Sample counts for report metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessorCounts {
    pub recorded: u64,
    pub dropped: u64,
}

pub struct SampleProcessor {
    tree: CallTree,
    grouper: ThreadGrouper,
    dumper: Arc<ThreadDumper>,
    ignore_sleeping: bool,
    ignore_native: bool,
    window_width: Duration,
    ticks: Option<Arc<TickFeed>>,
    pending: Mutex<VecDeque<ThreadSample>>,
    recorded: AtomicU64,
    dropped: AtomicU64,
}

impl SampleProcessor {
    #[must_use]
    pub fn new(settings: &SamplerSettings, ticks: Option<Arc<TickFeed>>) -> Self {
        Self {
            tree: CallTree::new(settings.merge_mode),
            grouper: ThreadGrouper::new(settings.grouper),
            dumper: Arc::clone(&settings.dumper),
            ignore_sleeping: settings.ignore_sleeping,
            ignore_native: settings.ignore_native,
            window_width: settings.window_width,
            ticks,
            pending: Mutex::new(VecDeque::new()),
            recorded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Filter one sample into the tree, or queue it until its tick ends.
    pub fn process(&self, sample: ThreadSample) {
        if !self.dumper.includes(sample.thread_id, &sample.thread_name)
            || (self.ignore_sleeping && is_sleeping(&sample))
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let Some(ticks) = &self.ticks else {
            self.record(sample);
            return;
        };
        if let Ok(mut pending) = self.pending.lock() {
            pending.push_back(sample);
        }
        self.drain(ticks, ticks.completed_through());
    }

    /// Samples must arrive in time order when a tick gate is active.
    pub fn process_all(&self, samples: impl IntoIterator<Item = ThreadSample>) {
        for sample in samples {
            self.process(sample);
        }
    }

    /// Judge every queued sample whose tick has ended. Samples taken after
    /// the last finished tick are dropped.
    pub fn flush(&self) {
        let Some(ticks) = &self.ticks else {
            return;
        };
        self.drain(ticks, ticks.completed_through());
        let left = self.pending.lock().map(|mut p| p.drain(..).count()).unwrap_or(0);
        if left > 0 {
            debug!("Dropping {left} samples taken after the last finished tick");
            self.dropped.fetch_add(left as u64, Ordering::Relaxed);
        }
    }

    /// The filter only moves forward, so samples are judged in queue order
    /// while the queue is locked.
    fn drain(&self, ticks: &TickFeed, through: Timestamp) {
        let accepted: Vec<ThreadSample> = {
            let Ok(mut pending) = self.pending.lock() else {
                return;
            };
            let n = pending.iter().take_while(|s| s.time <= through).count();
            let mut accepted = Vec::with_capacity(n);
            for sample in pending.drain(..n) {
                if ticks.accept(sample.time) {
                    accepted.push(sample);
                } else {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            accepted
        };
        for sample in accepted {
            self.record(sample);
        }
    }

    fn record(&self, mut sample: ThreadSample) {
        if self.ignore_native {
            strip_native_frames(&mut sample.frames);
        }
        let group = self.grouper.group(sample.thread_id, &sample.thread_name);
        let window = window_for_unix_millis(sample.unix_millis, self.window_width);
        self.tree.insert(&group, &sample.frames, sample.value, window);
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn tree(&self) -> &CallTree {
        &self.tree
    }

    #[must_use]
    pub fn grouper(&self) -> &ThreadGrouper {
        &self.grouper
    }

    #[must_use]
    pub fn window_width(&self) -> Duration {
        self.window_width
    }

    #[must_use]
    pub fn counts(&self) -> ProcessorCounts {
        ProcessorCounts {
            recorded: self.recorded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ThreadId;
    use crate::grouping::GrouperKind;
    use crate::trace_data::{StackFrame, ThreadState};

    fn sample(tid: u64, name: &str, time: u64, frames: Vec<StackFrame>) -> ThreadSample {
        ThreadSample {
            thread_id: ThreadId(tid),
            thread_name: name.to_string(),
            state: ThreadState::Runnable,
            frames,
            time: Timestamp(time),
            unix_millis: 120_000,
            value: 10,
        }
    }

    fn work() -> Vec<StackFrame> {
        vec![
            StackFrame::new("app.Codec", "encode").with_line(12),
            StackFrame::native("epoll_wait"),
            StackFrame::new("java.lang.Thread", "run").with_line(840),
        ]
    }

    #[test]
    fn test_records_into_group() {
        let settings = SamplerSettings {
            grouper: GrouperKind::ByPool,
            ..SamplerSettings::default()
        };
        let processor = SampleProcessor::new(&settings, None);
        processor.process(sample(1, "Worker-Pool-1", 0, work()));
        processor.process(sample(2, "Worker-Pool-2", 0, work()));

        assert_eq!(processor.tree().total("Worker-Pool"), 20);
        assert_eq!(processor.counts().recorded, 2);
        assert_eq!(processor.grouper().label("Worker-Pool"), "Worker-Pool (x2)");
    }

    #[test]
    fn test_dumper_and_sleeping_filters() {
        let settings = SamplerSettings {
            dumper: Arc::new(ThreadDumper::specific([ThreadId(1)], Vec::new())),
            ignore_sleeping: true,
            ..SamplerSettings::default()
        };
        let processor = SampleProcessor::new(&settings, None);
        processor.process(sample(2, "other", 0, work()));
        let mut idle = sample(1, "main", 0, work());
        idle.state = ThreadState::Waiting;
        processor.process(idle);
        processor.process(sample(1, "main", 0, work()));

        assert_eq!(processor.counts(), ProcessorCounts { recorded: 1, dropped: 2 });
    }

    #[test]
    fn test_native_frames_stripped() {
        let settings = SamplerSettings {
            grouper: GrouperKind::AsOne,
            ignore_native: true,
            ..SamplerSettings::default()
        };
        let processor = SampleProcessor::new(&settings, None);
        processor.process(sample(1, "main", 0, work()));
        // Thread.run and Codec.encode
        assert_eq!(processor.tree().node_count(), 2);
    }

    #[test]
    fn test_tick_gate_waits_for_tick_end() {
        let feed = Arc::new(TickFeed::new(Duration::from_nanos(50)));
        let settings = SamplerSettings {
            grouper: GrouperKind::AsOne,
            ..SamplerSettings::default()
        };
        let processor = SampleProcessor::new(&settings, Some(Arc::clone(&feed)));

        feed.on_tick_end(1, Timestamp(0), Timestamp(20));
        // Inside a long tick that has not ended yet
        processor.process(sample(1, "main", 120, work()));
        assert_eq!(processor.counts().recorded, 0);

        feed.on_tick_end(2, Timestamp(100), Timestamp(200));
        processor.process(sample(1, "main", 150, work()));
        processor.process(sample(1, "main", 250, work()));
        assert_eq!(processor.counts().recorded, 2);

        processor.flush();
        assert_eq!(processor.counts(), ProcessorCounts { recorded: 2, dropped: 1 });
        assert_eq!(feed.long_ticks(), 1);
    }

    #[test]
    fn test_concurrent_drains_keep_tick_order() {
        const TICKS: u64 = 200;
        const LATE_PER_THREAD: u64 = 500;

        let feed = Arc::new(TickFeed::new(Duration::from_nanos(100)));
        let settings = SamplerSettings {
            grouper: GrouperKind::AsOne,
            ..SamplerSettings::default()
        };
        let processor = Arc::new(SampleProcessor::new(&settings, Some(Arc::clone(&feed))));

        // One sample in the middle of every long tick, queued before any tick ends
        for i in 1..=TICKS {
            processor.process(sample(1, "main", i * 1_000 + 250, work()));
        }

        // Samples far in the future trigger drains from other threads while
        // ticks keep finishing
        let workers: Vec<_> = (0..4)
            .map(|t| {
                let processor = Arc::clone(&processor);
                std::thread::spawn(move || {
                    for _ in 0..LATE_PER_THREAD {
                        processor.process(sample(10 + t, "late", u64::MAX / 2, work()));
                    }
                })
            })
            .collect();
        for i in 1..=TICKS {
            feed.on_tick_end(i, Timestamp(i * 1_000), Timestamp(i * 1_000 + 500));
        }
        for worker in workers {
            worker.join().unwrap();
        }
        processor.flush();

        assert_eq!(
            processor.counts(),
            ProcessorCounts {
                recorded: TICKS,
                dropped: 4 * LATE_PER_THREAD,
            }
        );
    }
}
