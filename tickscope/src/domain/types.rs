//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent common bugs like passing a window index
//! where a thread id is expected, and make function signatures more
//! expressive.

use std::fmt;

/// Native thread ID
///
/// The id assigned by the operating system or recorder, not a
/// language-level thread object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Time window index
///
/// Each call tree node accumulates weight per window so a profile can be
/// played back slice by slice. Index = unix millis / window width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowIndex(pub u32);

impl fmt::Display for WindowIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}

/// Timestamp in nanoseconds on the monotonic clock
///
/// Tick boundaries and thread-dump samples are both stamped with
/// [`monotonic_now`], which makes them comparable. Recording timestamps are
/// only comparable when the recorder used the same clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Convert to seconds (f64)
    #[allow(clippy::cast_precision_loss)]
    pub fn as_seconds(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    /// Convert to milliseconds (f64)
    #[allow(clippy::cast_precision_loss)]
    pub fn as_millis(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Nanoseconds elapsed since `earlier`, saturating at zero
    #[must_use]
    pub fn saturating_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_seconds())
    }
}

/// Which clock produced a set of timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    /// `CLOCK_MONOTONIC` nanoseconds, same as [`monotonic_now`]
    Monotonic,
    /// CPU timestamp counter ticks with a recording-specific frequency
    Tsc,
    /// Wall-clock time
    WallClock,
}

/// Read `CLOCK_MONOTONIC` in nanoseconds.
///
/// Uses the raw clock rather than `Instant` so that timestamps can be
/// compared with recordings made by an external profiler on the same host.
#[allow(unsafe_code, clippy::cast_sign_loss)]
#[must_use]
pub fn monotonic_now() -> Timestamp {
    // SAFETY: timespec is plain old data; all-zero is a valid value.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: `ts` is a valid, writable timespec and CLOCK_MONOTONIC is
    // always available on supported platforms.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if rc != 0 {
        return Timestamp(0);
    }
    Timestamp(ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64)
}

/// Current wall-clock time in unix milliseconds.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn unix_millis_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
