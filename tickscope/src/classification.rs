//! Frame classification and stack filters
//!
//! Two filters run on every sample before it reaches the call tree:
//!
//! 1. **Sleeping filter** - drops samples whose thread is idle, judged by the
//!    recorded thread state or by a leaf frame that is a known blocking call
//!    (parking, waiting on a monitor, socket polling, sleeping).
//! 2. **Native filter** - removes frames that have no managed class.
//!
//! The blocking-call tables are keyed by class, then by method, so a lookup
//! is one exact match followed by a short scan.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use log::debug;
use tickscope_common::{FRAME_CPP, FRAME_KERNEL, FRAME_NATIVE};

use crate::trace_data::{StackFrame, ThreadSample};

/// Where a frame executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameKind {
    /// Interpreted, compiled or inlined managed code
    #[default]
    Managed,
    /// Native library or VM-internal code
    Native,
    /// Kernel code
    Kernel,
}

impl FrameKind {
    /// Map a recorded frame type byte.
    #[must_use]
    pub fn from_recorded(frame_type: u8) -> Self {
        match frame_type {
            FRAME_KERNEL => FrameKind::Kernel,
            FRAME_NATIVE | FRAME_CPP => FrameKind::Native,
            _ => FrameKind::Managed,
        }
    }
}

// =============================================================================
// CLASSIFICATION TABLES
// =============================================================================

/// Leaf frames that mean the thread is waiting, not working.
const SLEEPING_METHODS: &[(&str, &[&str])] = &[
    ("java.lang.Thread", &["sleep", "sleep0", "yield", "onSpinWait"]),
    ("java.lang.Object", &["wait", "wait0"]),
    ("jdk.internal.misc.Unsafe", &["park"]),
    ("sun.misc.Unsafe", &["park"]),
    ("java.util.concurrent.locks.LockSupport", &["park", "parkNanos", "parkUntil"]),
    ("sun.nio.ch.EPoll", &["wait", "epollWait"]),
    ("sun.nio.ch.KQueue", &["poll", "keventPoll"]),
    ("sun.nio.ch.WEPoll", &["wait"]),
    ("sun.nio.ch.Net", &["poll", "accept"]),
    ("sun.nio.ch.SocketDispatcher", &["read", "read0"]),
    ("java.net.SocketInputStream", &["socketRead0"]),
    ("java.net.PlainSocketImpl", &["socketAccept"]),
    ("java.lang.ProcessImpl", &["waitForProcessExit"]),
];

/// Native leaf functions with the same meaning.
const SLEEPING_NATIVE_PREFIXES: &[&str] = &[
    "epoll_wait",
    "epoll_pwait",
    "futex",
    "__futex",
    "pthread_cond_wait",
    "pthread_cond_timedwait",
    "nanosleep",
    "clock_nanosleep",
    "poll",
    "select",
    "do_sys_poll",
    "do_epoll_wait",
    "futex_wait",
    "hrtimer_nanosleep",
];

// =============================================================================
// FILTERS
// =============================================================================

/// True if `frame` is a known blocking or waiting call.
#[must_use]
pub fn is_sleeping_frame(frame: &StackFrame) -> bool {
    if frame.class_name.is_empty() {
        return SLEEPING_NATIVE_PREFIXES
            .iter()
            .any(|p| frame.method_name.starts_with(p));
    }
    SLEEPING_METHODS
        .iter()
        .find(|(class, _)| *class == frame.class_name)
        .is_some_and(|(_, methods)| methods.contains(&frame.method_name.as_str()))
}

/// True if the sample shows an idle thread.
#[must_use]
pub fn is_sleeping(sample: &ThreadSample) -> bool {
    if sample.state.is_idle() {
        return true;
    }
    sample.leaf().is_some_and(|leaf| {
        let sleeping = is_sleeping_frame(leaf);
        if sleeping {
            diagnostics().record_sleeping(&leaf.method_name);
        }
        sleeping
    })
}

/// Remove frames without a managed class, keeping leaf-first order.
pub fn strip_native_frames(frames: &mut Vec<StackFrame>) {
    frames.retain(|f| !f.is_native());
}

// =============================================================================
// FILTER DIAGNOSTICS
// =============================================================================

/// Counts dropped samples so a run can explain why a tree came out thin.
pub struct FilterDiagnostics {
    /// Leaf methods already logged (to avoid log spam)
    logged_methods: Mutex<HashSet<String>>,
    sleeping_dropped: AtomicU64,
}

impl FilterDiagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            logged_methods: Mutex::new(HashSet::new()),
            sleeping_dropped: AtomicU64::new(0),
        }
    }

    pub fn record_sleeping(&self, method: &str) {
        self.sleeping_dropped.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut logged) = self.logged_methods.lock() {
            if logged.insert(method.to_owned()) {
                debug!("Treating leaf '{method}' as sleeping");
            }
        }
    }

    pub fn sleeping_dropped(&self) -> u64 {
        self.sleeping_dropped.load(Ordering::Relaxed)
    }
}

impl Default for FilterDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}

static DIAGNOSTICS: OnceLock<FilterDiagnostics> = OnceLock::new();

/// Process-wide filter diagnostics.
pub fn diagnostics() -> &'static FilterDiagnostics {
    DIAGNOSTICS.get_or_init(FilterDiagnostics::new)
}
