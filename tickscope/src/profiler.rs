//! Profiler facade
//!
//! The entry point an embedding platform (or the CLI) talks to. It owns the
//! sampler slot, picks a capture engine per session and wires the tick hook
//! into tick statistics, the tick monitor and the long-tick filter.
//!
//! Engine choice for a session:
//!
//! | preference   | native available        | result                     |
//! |--------------|-------------------------|----------------------------|
//! | `ThreadDump` | any                     | thread dumps               |
//! | `Auto`       | yes, clock compatible   | native                     |
//! | `Auto`       | no / clock incompatible | thread dumps               |
//! | `Native`     | yes, clock compatible   | native                     |
//! | `Native`     | no                      | `NativeEngineUnsupported`  |
//! | `Native`     | clock incompatible      | `ClockMismatch`            |
//!
//! Allocation sampling only exists on the native engine. A native clock is
//! incompatible only when the session filters by tick duration and the
//! recorder's clock is not monotonic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use log::debug;

use crate::domain::{ClockSource, SamplerError};
use crate::export::{Report, SourceLookup};
use crate::sampler::{
    CaptureEngine, EndReason, EnginePreference, NativeEngine, NativeProfiler, NativeRequest,
    SamplerContainer, SamplerMode, SamplerSettings, Session, SessionContext, SessionHandle,
    SessionInfo, ThreadDumpEngine, ThreadSampleSource, TickFeed,
};
use crate::stats::{PingStatistics, PlatformStatistics, TickStatistics};
use crate::tick::{ListenerId, ReportPredicate, TickHook, TickListener, TickMonitor, TickReport};

#[derive(Default)]
pub struct ProfilerBuilder {
    container: Option<Arc<SamplerContainer>>,
    tick_hook: Option<Arc<TickHook>>,
    ping: Option<Arc<PingStatistics>>,
    thread_source: Option<Arc<dyn ThreadSampleSource>>,
    native: Option<Arc<dyn NativeProfiler>>,
    lookup: Option<Arc<dyn SourceLookup>>,
}

impl ProfilerBuilder {
    /// Share a sampler slot with other profilers.
    #[must_use]
    pub fn container(mut self, container: Arc<SamplerContainer>) -> Self {
        self.container = Some(container);
        self
    }

    #[must_use]
    pub fn tick_hook(mut self, hook: Arc<TickHook>) -> Self {
        self.tick_hook = Some(hook);
        self
    }

    #[must_use]
    pub fn ping(mut self, ping: Arc<PingStatistics>) -> Self {
        self.ping = Some(ping);
        self
    }

    #[must_use]
    pub fn thread_source(mut self, source: Arc<dyn ThreadSampleSource>) -> Self {
        self.thread_source = Some(source);
        self
    }

    #[must_use]
    pub fn native(mut self, profiler: Arc<dyn NativeProfiler>) -> Self {
        self.native = Some(profiler);
        self
    }

    #[must_use]
    pub fn source_lookup(mut self, lookup: Arc<dyn SourceLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    #[must_use]
    pub fn build(self) -> Profiler {
        let tick_stats = self.tick_hook.as_ref().map(|hook| {
            let stats = Arc::new(TickStatistics::new());
            let id = hook.add_listener(Arc::clone(&stats) as Arc<dyn TickListener>);
            (stats, id)
        });
        Profiler {
            container: self.container.unwrap_or_default(),
            context: SessionContext {
                tick_hook: self.tick_hook,
                tick_stats: tick_stats.as_ref().map(|(s, _)| Arc::clone(s)),
                ping: self.ping,
                lookup: self.lookup,
            },
            tick_stats_listener: tick_stats.map(|(_, id)| id),
            thread_source: self.thread_source,
            native: self.native,
            next_id: AtomicU64::new(1),
        }
    }
}

/// A registered tick monitor and the stream of long ticks it reports.
pub struct TickMonitorHandle {
    id: ListenerId,
    monitor: Arc<TickMonitor>,
    reports: Receiver<TickReport>,
}

impl TickMonitorHandle {
    #[must_use]
    pub fn monitor(&self) -> &TickMonitor {
        &self.monitor
    }

    #[must_use]
    pub fn reports(&self) -> &Receiver<TickReport> {
        &self.reports
    }
}

pub struct Profiler {
    container: Arc<SamplerContainer>,
    context: SessionContext,
    tick_stats_listener: Option<ListenerId>,
    thread_source: Option<Arc<dyn ThreadSampleSource>>,
    native: Option<Arc<dyn NativeProfiler>>,
    next_id: AtomicU64,
}

impl Profiler {
    #[must_use]
    pub fn builder() -> ProfilerBuilder {
        ProfilerBuilder::default()
    }

    #[must_use]
    pub fn container(&self) -> &Arc<SamplerContainer> {
        &self.container
    }

    #[must_use]
    pub fn tick_statistics(&self) -> Option<&TickStatistics> {
        self.context.tick_stats.as_deref()
    }

    /// Current platform statistics, independent of any session.
    #[must_use]
    pub fn platform_statistics(&self) -> PlatformStatistics {
        PlatformStatistics::collect(
            self.context.tick_stats.as_deref(),
            self.context.ping.as_deref(),
        )
    }

    /// Start a session. The returned handle resolves when it ends.
    ///
    /// # Errors
    /// - [`SamplerError::AlreadyRunning`] if a session is active
    /// - [`SamplerError::TickCountingUnsupported`] for tick filtering
    ///   without a tick hook
    /// - engine selection errors, see the module docs
    pub fn start_sampling(&self, settings: SamplerSettings) -> Result<SessionHandle, SamplerError> {
        if settings.only_ticks_over.is_some() && self.context.tick_hook.is_none() {
            return Err(SamplerError::TickCountingUnsupported);
        }
        if self.container.is_active() {
            return Err(SamplerError::AlreadyRunning);
        }

        let engine = self.choose_engine(&settings)?;
        let feed = settings.only_ticks_over.map(|t| Arc::new(TickFeed::new(t)));
        let auto_end = settings.auto_end;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (session, handle) = Session::new(id, settings, engine, feed, self.context.clone());

        // The slot decides between concurrent starts
        self.container.install(Arc::clone(&session))?;
        if let Err(e) = session.start() {
            self.container.clear_if(&session);
            return Err(e);
        }
        if let Some(duration) = auto_end {
            if let Err(e) = session.arm_timer(Arc::clone(&self.container), duration) {
                let _ = session.finish(EndReason::Cancelled);
                self.container.clear_if(&session);
                return Err(e);
            }
        }
        Ok(handle)
    }

    #[must_use]
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.container.info()
    }

    /// Stop the active session and return its report.
    ///
    /// # Errors
    /// Returns [`SamplerError::NotRunning`] if no session is active
    pub fn stop_sampling(&self) -> Result<Arc<Report>, SamplerError> {
        self.container.stop()
    }

    /// Cancel the active session without exporting.
    ///
    /// # Errors
    /// Returns [`SamplerError::NotRunning`] if no session is active
    pub fn cancel_sampling(&self) -> Result<(), SamplerError> {
        self.container.cancel()
    }

    /// Report ticks longer than the warm-up mean by more than
    /// `threshold_percent`.
    ///
    /// # Errors
    /// Returns [`SamplerError::TickCountingUnsupported`] without a tick hook
    pub fn start_tick_monitoring(
        &self,
        threshold_percent: f64,
    ) -> Result<TickMonitorHandle, SamplerError> {
        self.start_tick_monitoring_with(ReportPredicate::PercentageChangeOver(threshold_percent))
    }

    /// # Errors
    /// Returns [`SamplerError::TickCountingUnsupported`] without a tick hook
    pub fn start_tick_monitoring_with(
        &self,
        predicate: ReportPredicate,
    ) -> Result<TickMonitorHandle, SamplerError> {
        let hook = self
            .context
            .tick_hook
            .as_ref()
            .ok_or(SamplerError::TickCountingUnsupported)?;
        let (monitor, reports) = TickMonitor::new(predicate);
        let monitor = Arc::new(monitor);
        let id = hook.add_listener(Arc::clone(&monitor) as Arc<dyn TickListener>);
        debug!("Tick monitor registered ({predicate:?})");
        Ok(TickMonitorHandle {
            id,
            monitor,
            reports,
        })
    }

    /// Returns false if the monitor was already removed.
    pub fn stop_tick_monitoring(&self, handle: TickMonitorHandle) -> bool {
        self.context
            .tick_hook
            .as_ref()
            .is_some_and(|hook| hook.remove_listener(handle.id))
    }

    fn choose_engine(&self, settings: &SamplerSettings) -> Result<Box<dyn CaptureEngine>, SamplerError> {
        let allocation = matches!(settings.mode, SamplerMode::Allocation { .. });
        let native = match settings.engine {
            EnginePreference::ThreadDump => None,
            EnginePreference::Auto | EnginePreference::Native => {
                self.native.as_ref().filter(|n| n.is_available())
            }
        };

        if let Some(native) = native {
            let clock = native.clock_source();
            if settings.only_ticks_over.is_none() || clock == ClockSource::Monotonic {
                return Ok(Box::new(NativeEngine::new(
                    Arc::clone(native),
                    NativeRequest {
                        mode: settings.mode,
                        interval: settings.interval,
                        threads: settings.dumper.explicit_ids(),
                    },
                )));
            }
            if settings.engine == EnginePreference::Native || allocation {
                return Err(SamplerError::ClockMismatch(format!("{clock:?}")));
            }
            debug!("Native profiler clock is {clock:?}, using thread dumps for tick filtering");
        } else if settings.engine == EnginePreference::Native || allocation {
            return Err(SamplerError::NativeEngineUnsupported(if allocation {
                format!("{} sampling needs the native profiler", settings.mode)
            } else {
                "native profiler is not available".to_string()
            }));
        }

        let source = self.thread_source.as_ref().ok_or_else(|| {
            SamplerError::NoCaptureSource("no thread source configured".to_string())
        })?;
        Ok(Box::new(ThreadDumpEngine::new(Arc::clone(source), settings.interval)))
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        if let (Some(hook), Some(id)) = (&self.context.tick_hook, self.tick_stats_listener) {
            hook.remove_listener(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::engine::tests::FakeThreads;
    use crate::sampler::RecordingFileProfiler;
    use std::time::Duration;

    fn thread_profiler() -> Profiler {
        Profiler::builder()
            .thread_source(Arc::new(FakeThreads::default()))
            .build()
    }

    fn settings() -> SamplerSettings {
        SamplerSettings {
            interval: Duration::from_millis(2),
            ..SamplerSettings::default()
        }
    }

    /// Native profiler that always claims to be available.
    struct ClockOnly(ClockSource);

    impl NativeProfiler for ClockOnly {
        fn is_available(&self) -> bool {
            true
        }

        fn clock_source(&self) -> ClockSource {
            self.0
        }

        fn start(&self, _request: &NativeRequest) -> Result<(), SamplerError> {
            Ok(())
        }

        fn stop(&self) -> Result<std::path::PathBuf, SamplerError> {
            Err(SamplerError::EngineFailed("nothing recorded".to_string()))
        }
    }

    #[test]
    fn test_start_stop_restart() {
        let profiler = thread_profiler();
        profiler.start_sampling(settings()).unwrap();
        assert!(matches!(
            profiler.start_sampling(settings()),
            Err(SamplerError::AlreadyRunning)
        ));
        let info = profiler.session_info().unwrap();
        assert_eq!(info.engine, "thread-dump");

        let report = profiler.stop_sampling().unwrap();
        assert_eq!(report.metadata.engine, "thread-dump");
        assert!(profiler.session_info().is_none());
        profiler.start_sampling(settings()).unwrap();
        profiler.cancel_sampling().unwrap();
    }

    #[test]
    fn test_no_source() {
        let profiler = Profiler::builder().build();
        assert!(matches!(
            profiler.start_sampling(settings()),
            Err(SamplerError::NoCaptureSource(_))
        ));
        assert!(matches!(profiler.stop_sampling(), Err(SamplerError::NotRunning)));
    }

    #[test]
    fn test_tick_filter_needs_hook() {
        let profiler = thread_profiler();
        let settings = SamplerSettings {
            only_ticks_over: Some(Duration::from_millis(50)),
            ..settings()
        };
        assert!(matches!(
            profiler.start_sampling(settings),
            Err(SamplerError::TickCountingUnsupported)
        ));
        assert!(matches!(
            profiler.start_tick_monitoring(50.0),
            Err(SamplerError::TickCountingUnsupported)
        ));
    }

    #[test]
    fn test_allocation_needs_native() {
        let profiler = thread_profiler();
        let settings = SamplerSettings {
            mode: SamplerMode::Allocation { live_only: false },
            ..settings()
        };
        assert!(matches!(
            profiler.start_sampling(settings),
            Err(SamplerError::NativeEngineUnsupported(_))
        ));
    }

    #[test]
    fn test_forced_native_clock_mismatch() {
        let profiler = Profiler::builder()
            .tick_hook(Arc::new(TickHook::new()))
            .thread_source(Arc::new(FakeThreads::default()))
            .native(Arc::new(ClockOnly(ClockSource::WallClock)))
            .build();
        let filtered = SamplerSettings {
            only_ticks_over: Some(Duration::from_millis(50)),
            ..settings()
        };
        assert!(matches!(
            profiler.start_sampling(SamplerSettings {
                engine: EnginePreference::Native,
                ..filtered.clone()
            }),
            Err(SamplerError::ClockMismatch(_))
        ));

        // Auto falls back to thread dumps
        profiler.start_sampling(filtered).unwrap();
        assert_eq!(profiler.session_info().unwrap().engine, "thread-dump");
        profiler.cancel_sampling().unwrap();
    }

    #[test]
    fn test_auto_prefers_native() {
        let profiler = Profiler::builder()
            .thread_source(Arc::new(FakeThreads::default()))
            .native(Arc::new(ClockOnly(ClockSource::Monotonic)))
            .build();
        profiler.start_sampling(settings()).unwrap();
        assert_eq!(profiler.session_info().unwrap().engine, "native");
        profiler.cancel_sampling().unwrap();

        let missing = Profiler::builder()
            .native(Arc::new(RecordingFileProfiler::new(
                "/nonexistent.jfr",
                ClockSource::Monotonic,
            )))
            .build();
        assert!(matches!(
            missing.start_sampling(SamplerSettings {
                engine: EnginePreference::Native,
                ..settings()
            }),
            Err(SamplerError::NativeEngineUnsupported(_))
        ));
    }

    #[test]
    fn test_tick_monitoring_lifecycle() {
        let hook = Arc::new(TickHook::new());
        let profiler = Profiler::builder().tick_hook(Arc::clone(&hook)).build();
        // Tick statistics
        assert_eq!(hook.listener_count(), 1);

        let handle = profiler
            .start_tick_monitoring_with(ReportPredicate::DurationOver(Duration::ZERO))
            .unwrap();
        assert_eq!(hook.listener_count(), 2);
        hook.tick_start();
        hook.tick_end();
        assert_eq!(hook.current_tick(), 1);
        assert!(profiler.tick_statistics().is_some());

        assert!(profiler.stop_tick_monitoring(handle));
        assert_eq!(hook.listener_count(), 1);
        drop(profiler);
        assert_eq!(hook.listener_count(), 0);
    }
}
