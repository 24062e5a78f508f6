//! Long-tick detection
//!
//! The monitor first watches a warm-up of [`WARMUP_TICKS`] ticks to learn
//! the normal tick duration, then reports every tick that breaks the
//! configured predicate. Reports go to the log and to a bounded channel;
//! when nobody drains the channel, further reports are counted as dropped.

// Tick durations are far below 2^52 nanoseconds
#![allow(clippy::cast_precision_loss)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::domain::Timestamp;
use crate::tick::TickListener;

/// Ticks averaged before reporting starts.
pub const WARMUP_TICKS: u64 = 120;

/// Undrained reports kept before new ones are dropped.
pub const REPORT_BUFFER: usize = 1000;

/// When a finished tick is worth reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportPredicate {
    /// Duration exceeds the warm-up mean by more than this many percent
    PercentageChangeOver(f64),
    /// Duration exceeds a fixed value
    DurationOver(Duration),
}

impl ReportPredicate {
    #[must_use]
    pub fn should_report(&self, duration_ms: f64, percentage_change: f64) -> bool {
        match self {
            ReportPredicate::PercentageChangeOver(threshold) => percentage_change > *threshold,
            ReportPredicate::DurationOver(limit) => duration_ms > limit.as_secs_f64() * 1000.0,
        }
    }
}

/// One long tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub duration_ms: f64,
    pub baseline_ms: f64,
    pub increase_ms: f64,
    pub percentage_change: f64,
}

#[derive(Debug, Default)]
struct Baseline {
    count: u64,
    total_ms: f64,
}

impl Baseline {
    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

pub struct TickMonitor {
    predicate: ReportPredicate,
    baseline: Mutex<Baseline>,
    reported: AtomicU64,
    dropped: AtomicU64,
    reports: Sender<TickReport>,
}

impl TickMonitor {
    /// A monitor and the stream its reports are sent to.
    #[must_use]
    pub fn new(predicate: ReportPredicate) -> (Self, Receiver<TickReport>) {
        let (tx, rx) = crossbeam_channel::bounded(REPORT_BUFFER);
        (
            Self {
                predicate,
                baseline: Mutex::new(Baseline::default()),
                reported: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                reports: tx,
            },
            rx,
        )
    }

    #[must_use]
    pub fn predicate(&self) -> ReportPredicate {
        self.predicate
    }

    /// True once the warm-up is over.
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.baseline
            .lock()
            .map_or(false, |b| b.count >= WARMUP_TICKS)
    }

    #[must_use]
    pub fn baseline_ms(&self) -> f64 {
        self.baseline.lock().map_or(0.0, |b| b.mean())
    }

    #[must_use]
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }

    /// Reports that did not fit in the channel.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn observe(&self, tick: u64, start: Timestamp, end: Timestamp) {
        let duration_ms = end.saturating_since(start) as f64 / 1_000_000.0;
        let Ok(mut baseline) = self.baseline.lock() else {
            return;
        };

        if baseline.count < WARMUP_TICKS {
            baseline.count += 1;
            baseline.total_ms += duration_ms;
            if baseline.count == WARMUP_TICKS {
                info!(
                    "Tick monitor warm-up complete: mean tick {:.2} ms over {WARMUP_TICKS} ticks",
                    baseline.mean()
                );
            }
            return;
        }

        let baseline_ms = baseline.mean();
        drop(baseline);

        let increase_ms = duration_ms - baseline_ms;
        let percentage_change = if baseline_ms > 0.0 {
            increase_ms * 100.0 / baseline_ms
        } else {
            0.0
        };
        if !self.predicate.should_report(duration_ms, percentage_change) {
            return;
        }

        warn!(
            "Tick #{tick} lasted {duration_ms:.2} ms ({percentage_change:+.1}% vs {baseline_ms:.2} ms)"
        );
        self.reported.fetch_add(1, Ordering::Relaxed);
        let report = TickReport {
            tick,
            duration_ms,
            baseline_ms,
            increase_ms,
            percentage_change,
        };
        match self.reports.try_send(report) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Tick report channel full, {dropped} reports dropped");
            }
        }
    }
}

impl TickListener for TickMonitor {
    fn on_tick_end(&self, tick: u64, start: Timestamp, end: Timestamp) {
        self.observe(tick, start, end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;

    fn run_ticks(monitor: &TickMonitor, durations_ms: &[u64]) {
        let mut t = 0;
        for (i, d) in durations_ms.iter().enumerate() {
            monitor.on_tick_end(i as u64 + 1, Timestamp(t), Timestamp(t + d * MS));
            t += d * MS + MS;
        }
    }

    #[test]
    fn test_warmup_then_percentage_reports() {
        let (monitor, rx) = TickMonitor::new(ReportPredicate::PercentageChangeOver(100.0));
        run_ticks(&monitor, &[10; WARMUP_TICKS as usize]);
        assert!(monitor.is_monitoring());
        assert!((monitor.baseline_ms() - 10.0).abs() < 0.005);
        assert!(rx.try_recv().is_err());

        let mut t = 1_000 * MS * 1_000;
        for d in [15, 25, 9] {
            monitor.on_tick_end(200, Timestamp(t), Timestamp(t + d * MS));
            t += 100 * MS;
        }
        let report = rx.try_recv().unwrap();
        assert!((report.duration_ms - 25.0).abs() < 0.005);
        assert!((report.percentage_change - 150.0).abs() < 0.005);
        assert!(rx.try_recv().is_err());
        assert_eq!(monitor.reported(), 1);
    }

    #[test]
    fn test_no_reports_during_warmup() {
        let (monitor, rx) = TickMonitor::new(ReportPredicate::DurationOver(Duration::from_millis(1)));
        run_ticks(&monitor, &[500; 50]);
        assert!(!monitor.is_monitoring());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_duration_predicate() {
        let (monitor, rx) = TickMonitor::new(ReportPredicate::DurationOver(Duration::from_millis(50)));
        run_ticks(&monitor, &[5; WARMUP_TICKS as usize]);

        let start = 10_000 * MS;
        monitor.on_tick_end(121, Timestamp(start), Timestamp(start + 40 * MS));
        monitor.on_tick_end(122, Timestamp(start), Timestamp(start + 80 * MS));
        assert_eq!(rx.try_recv().unwrap().tick, 122);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_undrained_reports_are_bounded() {
        let (monitor, rx) = TickMonitor::new(ReportPredicate::DurationOver(Duration::from_millis(1)));
        run_ticks(&monitor, &[5; WARMUP_TICKS as usize]);

        let extra = 25;
        let mut t = 10_000 * MS;
        for tick in 0..(REPORT_BUFFER as u64 + extra) {
            monitor.on_tick_end(tick, Timestamp(t), Timestamp(t + 10 * MS));
            t += 20 * MS;
        }
        assert_eq!(rx.len(), REPORT_BUFFER);
        assert_eq!(monitor.reported(), REPORT_BUFFER as u64 + extra);
        assert_eq!(monitor.dropped(), extra);

        // Draining makes room again
        rx.try_recv().unwrap();
        monitor.on_tick_end(9_999, Timestamp(t), Timestamp(t + 10 * MS));
        assert_eq!(rx.len(), REPORT_BUFFER);
        assert_eq!(monitor.dropped(), extra);
    }
}
