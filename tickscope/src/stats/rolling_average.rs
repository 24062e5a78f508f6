//! Weighted rolling average over a fixed number of samples
//!
//! A circular buffer of `(value, weight)` pairs with running sums, so
//! `mean` is O(1). Writing into a full buffer subtracts the evicted
//! sample's contribution before adding the new one.
//!
//! Invariants, for the samples currently buffered:
//! - `total == Σ value × weight`
//! - `weight == Σ weight`
//!
//! Every instance has its own mutex; readers and writers on different
//! averages never contend.

// Sample counts are small enough that usize -> f64 is exact
#![allow(clippy::cast_precision_loss)]

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::domain::StatsError;

#[derive(Debug)]
struct Ring {
    samples: Vec<(f64, f64)>,
    /// Next slot to write
    head: usize,
    total: f64,
    weight: f64,
}

#[derive(Debug)]
pub struct RollingAverage {
    capacity: usize,
    ring: Mutex<Ring>,
}

/// Point-in-time summary of a rolling average.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RollingSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub p95: f64,
}

impl RollingAverage {
    /// A window holding the last `capacity` samples (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: Mutex::new(Ring {
                samples: Vec::with_capacity(capacity),
                head: 0,
                total: 0.0,
                weight: 0.0,
            }),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add a sample with weight 1.
    pub fn push(&self, value: f64) {
        self.add(value, 1.0);
    }

    /// Add a weighted sample, evicting the oldest one when full.
    pub fn add(&self, value: f64, weight: f64) {
        let Ok(mut ring) = self.ring.lock() else {
            return;
        };
        if ring.samples.len() < self.capacity {
            ring.samples.push((value, weight));
        } else {
            let head = ring.head;
            let (old_value, old_weight) = ring.samples[head];
            ring.total -= old_value * old_weight;
            ring.weight -= old_weight;
            ring.samples[head] = (value, weight);
        }
        ring.total += value * weight;
        ring.weight += weight;
        ring.head = (ring.head + 1) % self.capacity;
    }

    /// Weighted mean, 0 when empty.
    #[must_use]
    pub fn mean(&self) -> f64 {
        self.ring.lock().map_or(0.0, |ring| {
            if ring.samples.is_empty() || ring.weight == 0.0 {
                0.0
            } else {
                ring.total / ring.weight
            }
        })
    }

    #[must_use]
    pub fn min(&self) -> f64 {
        self.values()
            .into_iter()
            .reduce(f64::min)
            .unwrap_or(0.0)
    }

    #[must_use]
    pub fn max(&self) -> f64 {
        self.values()
            .into_iter()
            .reduce(f64::max)
            .unwrap_or(0.0)
    }

    /// Value at percentile `p` of the buffered samples (unweighted).
    ///
    /// Picks index `ceil(p × (n - 1))` of the sorted values; 0 when empty.
    ///
    /// # Errors
    /// Returns [`StatsError::InvalidPercentile`] if `p` is outside `[0, 1]`
    pub fn percentile(&self, p: f64) -> Result<f64, StatsError> {
        if !(0.0..=1.0).contains(&p) {
            return Err(StatsError::InvalidPercentile(p));
        }
        let mut values = self.values();
        if values.is_empty() {
            return Ok(0.0);
        }
        values.sort_by(f64::total_cmp);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = (p * (values.len() - 1) as f64).ceil() as usize;
        Ok(values[index.min(values.len() - 1)])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().map_or(0, |r| r.samples.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn summary(&self) -> RollingSummary {
        RollingSummary {
            mean: self.mean(),
            min: self.min(),
            max: self.max(),
            median: self.percentile(0.5).unwrap_or(0.0),
            p95: self.percentile(0.95).unwrap_or(0.0),
        }
    }

    /// Copy of the buffered values.
    fn values(&self) -> Vec<f64> {
        self.ring
            .lock()
            .map(|r| r.samples.iter().map(|(v, _)| *v).collect())
            .unwrap_or_default()
    }
}
