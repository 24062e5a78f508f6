//! Player ping statistics
//!
//! Every [`PING_POLL_INTERVAL`] the poller asks a [`PingProvider`] for the
//! current latency of each connected player and folds the average into a
//! 15 minute rolling window.

#![allow(clippy::cast_precision_loss)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, tick, Sender};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::stats::{RollingAverage, RollingSummary};

pub const PING_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// 15 minutes of polls.
const PING_WINDOW: usize = 90;

/// Supplies current player latencies, in milliseconds, keyed by name.
pub trait PingProvider: Send + Sync {
    fn poll(&self) -> HashMap<String, u32>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPing {
    pub name: String,
    pub ping_ms: u32,
}

pub struct PingStatistics {
    provider: Arc<dyn PingProvider>,
    average: RollingAverage,
    last_poll: Mutex<HashMap<String, u32>>,
}

impl PingStatistics {
    #[must_use]
    pub fn new(provider: Arc<dyn PingProvider>) -> Self {
        Self {
            provider,
            average: RollingAverage::new(PING_WINDOW),
            last_poll: Mutex::new(HashMap::new()),
        }
    }

    /// Poll the provider once. Polls with no players are not recorded.
    pub fn poll_once(&self) {
        let pings = self.provider.poll();
        if !pings.is_empty() {
            let sum: f64 = pings.values().map(|p| f64::from(*p)).sum();
            self.average.push(sum / pings.len() as f64);
        }
        if let Ok(mut last) = self.last_poll.lock() {
            *last = pings;
        }
    }

    #[must_use]
    pub fn summary(&self) -> RollingSummary {
        self.average.summary()
    }

    /// Ping of one player from the latest poll, matched case-insensitively.
    #[must_use]
    pub fn query(&self, player: &str) -> Option<PlayerPing> {
        let last = self.last_poll.lock().ok()?;
        last.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(player))
            .map(|(name, ping)| PlayerPing {
                name: name.clone(),
                ping_ms: *ping,
            })
    }

    /// Start polling on a background thread.
    pub fn spawn_poller(self: &Arc<Self>) -> std::io::Result<PingPoller> {
        self.spawn_poller_every(PING_POLL_INTERVAL)
    }

    pub fn spawn_poller_every(self: &Arc<Self>, interval: Duration) -> std::io::Result<PingPoller> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let stats = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("tickscope-ping".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => stats.poll_once(),
                        recv(stop_rx) -> _ => break,
                    }
                }
                debug!("Ping poller stopped");
            })?;
        Ok(PingPoller {
            stop: stop_tx,
            handle: Some(handle),
        })
    }
}

/// Stops the poller thread when dropped.
pub struct PingPoller {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl PingPoller {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Ping poller thread panicked");
            }
        }
    }
}

impl Drop for PingPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPings(Mutex<HashMap<String, u32>>);

    impl PingProvider for FixedPings {
        fn poll(&self) -> HashMap<String, u32> {
            self.0.lock().unwrap().clone()
        }
    }

    fn provider(pings: &[(&str, u32)]) -> Arc<FixedPings> {
        Arc::new(FixedPings(Mutex::new(
            pings.iter().map(|(n, p)| ((*n).to_string(), *p)).collect(),
        )))
    }

    #[test]
    fn test_poll_averages_players() {
        let stats = PingStatistics::new(provider(&[("alice", 40), ("Bob", 80)]));
        stats.poll_once();
        assert!((stats.summary().mean - 60.0).abs() < 0.005);
    }

    #[test]
    fn test_query_is_case_insensitive() {
        let stats = PingStatistics::new(provider(&[("Bob", 80)]));
        stats.poll_once();
        let ping = stats.query("bob").unwrap();
        assert_eq!(ping.name, "Bob");
        assert_eq!(ping.ping_ms, 80);
        assert!(stats.query("carol").is_none());
    }

    #[test]
    fn test_empty_poll_is_not_recorded() {
        let stats = PingStatistics::new(provider(&[]));
        stats.poll_once();
        assert!(stats.average.is_empty());
    }

    #[test]
    fn test_poller_thread_polls_and_stops() {
        let stats = Arc::new(PingStatistics::new(provider(&[("alice", 25)])));
        let poller = stats.spawn_poller_every(Duration::from_millis(5)).unwrap();
        for _ in 0..200 {
            if !stats.average.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        poller.stop();
        assert!(!stats.average.is_empty());
        assert!((stats.summary().mean - 25.0).abs() < 0.005);
    }
}
