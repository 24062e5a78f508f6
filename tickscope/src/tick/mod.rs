//! Tick hook
//!
//! The embedding platform calls [`TickHook::tick_start`] and
//! [`TickHook::tick_end`] around every tick of its main loop. Each boundary
//! is stamped with the monotonic clock and fanned out to registered
//! [`TickListener`]s, which is how tick statistics, the tick monitor and
//! the long-tick sample filter learn about ticks.

pub mod tick_monitor;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::debug;

use crate::domain::{monotonic_now, Timestamp};

pub use tick_monitor::{ReportPredicate, TickMonitor, TickReport};

/// Receives tick boundaries. Called on the tick thread; keep it short.
pub trait TickListener: Send + Sync {
    fn on_tick_start(&self, _tick: u64, _start: Timestamp) {}

    fn on_tick_end(&self, _tick: u64, _start: Timestamp, _end: Timestamp) {}
}

/// Handle returned by [`TickHook::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct TickHook {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn TickListener>)>>,
    next_id: AtomicU64,
    /// Ticks started so far
    tick: AtomicU64,
    current_start: Mutex<Option<Timestamp>>,
}

impl TickHook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn TickListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push((id, listener));
        }
        id
    }

    /// Returns false if the listener was already removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let Ok(mut listeners) = self.listeners.write() else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().map_or(0, |l| l.len())
    }

    /// Number of the tick in progress (or last finished).
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    pub fn tick_start(&self) {
        self.tick_start_at(monotonic_now());
    }

    pub fn tick_end(&self) {
        self.tick_end_at(monotonic_now());
    }

    /// Start a tick at an explicit time.
    pub fn tick_start_at(&self, start: Timestamp) {
        let tick = self.tick.fetch_add(1, Ordering::AcqRel) + 1;
        if let Ok(mut current) = self.current_start.lock() {
            *current = Some(start);
        }
        for listener in self.snapshot() {
            listener.on_tick_start(tick, start);
        }
    }

    /// End the current tick at an explicit time. Ignored when no tick is
    /// in progress.
    pub fn tick_end_at(&self, end: Timestamp) {
        let start = self.current_start.lock().ok().and_then(|mut c| c.take());
        let Some(start) = start else {
            debug!("tick_end without tick_start");
            return;
        };
        let tick = self.current_tick();
        for listener in self.snapshot() {
            listener.on_tick_end(tick, start, end);
        }
    }

    /// Listeners are called outside the registry lock so that a listener
    /// may unregister itself.
    fn snapshot(&self) -> Vec<Arc<dyn TickListener>> {
        self.listeners
            .read()
            .map(|l| l.iter().map(|(_, listener)| Arc::clone(listener)).collect())
            .unwrap_or_default()
    }
}
