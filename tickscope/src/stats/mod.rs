//! Rolling statistics
//!
//! - `rolling_average`: fixed-window weighted mean and percentiles
//! - `tick_statistics`: TPS and MSPT fed by the tick hook
//! - `ping`: polled player latency
//! - `system`: CPU load and GC summaries from recordings

pub mod ping;
pub mod rolling_average;
pub mod system;
pub mod tick_statistics;

use serde::{Deserialize, Serialize};

pub use ping::{PingPoller, PingProvider, PingStatistics, PlayerPing};
pub use rolling_average::{RollingAverage, RollingSummary};
pub use system::{CpuSummary, GcSummary, SystemStatistics, SystemSummary};
pub use tick_statistics::{MsptSnapshot, TickStatistics, TpsSnapshot};

/// Platform statistics attached to a report. Sources that were not
/// running are left out.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlatformStatistics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tps: Option<TpsSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mspt: Option<MsptSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping: Option<RollingSummary>,
}

impl PlatformStatistics {
    #[must_use]
    pub fn collect(ticks: Option<&TickStatistics>, ping: Option<&PingStatistics>) -> Self {
        Self {
            tps: ticks.filter(|t| t.has_tps()).map(TickStatistics::tps),
            mspt: ticks.map(TickStatistics::mspt),
            ping: ping.map(PingStatistics::summary),
        }
    }
}
