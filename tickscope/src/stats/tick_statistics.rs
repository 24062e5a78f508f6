//! TPS and MSPT rolling statistics
//!
//! TPS is sampled once every [`TPS_SAMPLE_INTERVAL`] ticks: the elapsed
//! time since the previous sample gives the rate, weighted by that elapsed
//! time so a slow second counts for more than a fast one. At 20 TPS a
//! sample lands roughly once a second, so each window's capacity is its
//! length in seconds.
//!
//! MSPT is fed from every tick's duration, unweighted. Window capacities
//! are tick counts at the nominal 20 TPS.

#![allow(clippy::cast_precision_loss)]

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::domain::Timestamp;
use crate::stats::{RollingAverage, RollingSummary};
use crate::tick::TickListener;

/// Ticks between two TPS samples.
pub const TPS_SAMPLE_INTERVAL: u64 = 20;

const TPS_WINDOWS: [usize; 5] = [5, 10, 60, 300, 900];
const MSPT_WINDOWS: [usize; 3] = [200, 1200, 6000];

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TpsSnapshot {
    pub last_5s: f64,
    pub last_10s: f64,
    pub last_1m: f64,
    pub last_5m: f64,
    pub last_15m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MsptSnapshot {
    pub last_10s: RollingSummary,
    pub last_1m: RollingSummary,
    pub last_5m: RollingSummary,
}

#[derive(Debug, Default)]
struct TpsClock {
    last_sample: Option<Timestamp>,
    ticks_since: u64,
}

#[derive(Debug)]
pub struct TickStatistics {
    tps: [RollingAverage; 5],
    mspt: [RollingAverage; 3],
    clock: Mutex<TpsClock>,
}

impl Default for TickStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl TickStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tps: TPS_WINDOWS.map(RollingAverage::new),
            mspt: MSPT_WINDOWS.map(RollingAverage::new),
            clock: Mutex::new(TpsClock::default()),
        }
    }

    /// Count a tick starting at `start` towards TPS.
    pub fn record_tick_start(&self, start: Timestamp) {
        let Ok(mut clock) = self.clock.lock() else {
            return;
        };
        let Some(last) = clock.last_sample else {
            clock.last_sample = Some(start);
            return;
        };
        clock.ticks_since += 1;
        if clock.ticks_since < TPS_SAMPLE_INTERVAL {
            return;
        }
        let diff = start.saturating_since(last);
        clock.last_sample = Some(start);
        clock.ticks_since = 0;
        drop(clock);

        if diff == 0 {
            return;
        }
        let weight = diff as f64;
        let tps = 1_000_000_000.0 / weight * TPS_SAMPLE_INTERVAL as f64;
        for avg in &self.tps {
            avg.add(tps, weight);
        }
    }

    /// Record one tick's duration towards MSPT.
    pub fn record_tick_duration(&self, start: Timestamp, end: Timestamp) {
        let ms = end.saturating_since(start) as f64 / 1_000_000.0;
        for avg in &self.mspt {
            avg.push(ms);
        }
    }

    #[must_use]
    pub fn tps(&self) -> TpsSnapshot {
        let [a, b, c, d, e] = &self.tps;
        TpsSnapshot {
            last_5s: a.mean(),
            last_10s: b.mean(),
            last_1m: c.mean(),
            last_5m: d.mean(),
            last_15m: e.mean(),
        }
    }

    #[must_use]
    pub fn mspt(&self) -> MsptSnapshot {
        let [a, b, c] = &self.mspt;
        MsptSnapshot {
            last_10s: a.summary(),
            last_1m: b.summary(),
            last_5m: c.summary(),
        }
    }

    /// True once at least one TPS sample exists.
    #[must_use]
    pub fn has_tps(&self) -> bool {
        !self.tps[0].is_empty()
    }
}

impl TickListener for TickStatistics {
    fn on_tick_start(&self, _tick: u64, start: Timestamp) {
        self.record_tick_start(start);
    }

    fn on_tick_end(&self, _tick: u64, start: Timestamp, end: Timestamp) {
        self.record_tick_duration(start, end);
    }
}
