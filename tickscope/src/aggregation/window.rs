//! Time windows
//!
//! Weights are bucketed by wall-clock window so a profile can be sliced by
//! time after the fact. A window index is `unix_millis / width_millis`.

use std::time::Duration;

use crate::domain::WindowIndex;

/// Default window width.
pub const DEFAULT_WINDOW_WIDTH: Duration = Duration::from_secs(60);

/// Window containing `unix_millis`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn window_for_unix_millis(unix_millis: u64, width: Duration) -> WindowIndex {
    let width_ms = (width.as_millis() as u64).max(1);
    WindowIndex((unix_millis / width_ms).min(u64::from(u32::MAX)) as u32)
}

/// Unix millis at which `window` starts.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn window_start_millis(window: WindowIndex, width: Duration) -> u64 {
    u64::from(window.0) * (width.as_millis() as u64).max(1)
}

/// Oldest window to keep when retaining `keep` worth of history up to `now`.
#[must_use]
pub fn retention_cutoff(now_unix_millis: u64, keep: Duration, width: Duration) -> WindowIndex {
    #[allow(clippy::cast_possible_truncation)]
    let keep_ms = keep.as_millis() as u64;
    window_for_unix_millis(now_unix_millis.saturating_sub(keep_ms), width)
}
