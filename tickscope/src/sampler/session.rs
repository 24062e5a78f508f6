//! Sampler session state machine
//!
//! ```text
//!            start()          stop()
//! Created ──────────▶ Running ──────▶ Completed
//!                        │  timer
//!                        ├──────────▶ TimedOut
//!                        │  cancel()
//!                        └──────────▶ Cancelled
//! ```
//!
//! The state lives in one `AtomicU8` and every transition out of `Running`
//! is a compare-and-swap, so exactly one of stop, timeout and cancel wins.
//! The winner stops the engine, builds the report (unless cancelled) and
//! resolves the completion channel; it resolves exactly once.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{after, select, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::aggregation::window::retention_cutoff;
use crate::domain::{unix_millis_now, CompletionError, SamplerError};
use crate::export::{Report, ReportMetadata, SourceLookup};
use crate::sampler::engine::{CaptureEngine, EngineSummary};
use crate::sampler::{ProcessorCounts, SampleProcessor, SamplerContainer, SamplerMode, SamplerSettings, TickFeed};
use crate::stats::{PingStatistics, PlatformStatistics, TickStatistics};
use crate::tick::{ListenerId, TickHook};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created = 0,
    Running = 1,
    Completed = 2,
    Cancelled = 3,
    TimedOut = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Running,
            2 => SessionState::Completed,
            3 => SessionState::Cancelled,
            4 => SessionState::TimedOut,
            _ => SessionState::Created,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::TimedOut
        )
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Stopped,
    TimedOut,
    Cancelled,
}

impl EndReason {
    fn state(self) -> SessionState {
        match self {
            EndReason::Stopped => SessionState::Completed,
            EndReason::TimedOut => SessionState::TimedOut,
            EndReason::Cancelled => SessionState::Cancelled,
        }
    }
}

/// Outcome delivered to the session handle.
pub type Completion = Result<Arc<Report>, CompletionError>;

/// Collaborators a session reads from while running and when exporting.
#[derive(Clone, Default)]
pub struct SessionContext {
    pub tick_hook: Option<Arc<TickHook>>,
    pub tick_stats: Option<Arc<TickStatistics>>,
    pub ping: Option<Arc<PingStatistics>>,
    pub lookup: Option<Arc<dyn SourceLookup>>,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: u64,
    pub state: SessionState,
    pub engine: String,
    pub mode: SamplerMode,
    pub start_millis: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_end_millis: Option<u64>,
    pub elapsed_millis: u64,
    pub samples: ProcessorCounts,
}

pub struct Session {
    id: u64,
    settings: SamplerSettings,
    state: AtomicU8,
    engine_name: &'static str,
    engine: Mutex<Box<dyn CaptureEngine>>,
    processor: Arc<SampleProcessor>,
    tick_feed: Option<Arc<TickFeed>>,
    tick_listener: Mutex<Option<ListenerId>>,
    context: SessionContext,
    start_millis: u64,
    start_tick: Option<u64>,
    completion: Mutex<Option<oneshot::Sender<Completion>>>,
    timer_stop: Mutex<Option<Sender<()>>>,
}

impl Session {
    /// A session in the `Created` state and the handle its outcome is
    /// delivered to.
    #[must_use]
    pub fn new(
        id: u64,
        settings: SamplerSettings,
        engine: Box<dyn CaptureEngine>,
        tick_feed: Option<Arc<TickFeed>>,
        context: SessionContext,
    ) -> (Arc<Self>, SessionHandle) {
        let (tx, rx) = oneshot::channel();
        let processor = Arc::new(SampleProcessor::new(&settings, tick_feed.clone()));
        let start_tick = context.tick_hook.as_ref().map(|h| h.current_tick());
        let session = Arc::new(Self {
            id,
            engine_name: engine.name(),
            engine: Mutex::new(engine),
            processor,
            tick_feed,
            tick_listener: Mutex::new(None),
            context,
            start_millis: unix_millis_now(),
            start_tick,
            settings,
            state: AtomicU8::new(SessionState::Created as u8),
            completion: Mutex::new(Some(tx)),
            timer_stop: Mutex::new(None),
        });
        (session, SessionHandle { id, receiver: rx })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    #[must_use]
    pub fn processor(&self) -> &Arc<SampleProcessor> {
        &self.processor
    }

    /// Start capturing. On failure the handle resolves with the error.
    ///
    /// # Errors
    /// Returns an error if the session was already started or the engine
    /// fails to start
    pub fn start(&self) -> Result<(), SamplerError> {
        if self.state() != SessionState::Created {
            return Err(SamplerError::AlreadyRunning);
        }
        if let (Some(hook), Some(feed)) = (&self.context.tick_hook, &self.tick_feed) {
            let id = hook.add_listener(Arc::clone(feed) as Arc<dyn crate::tick::TickListener>);
            if let Ok(mut listener) = self.tick_listener.lock() {
                *listener = Some(id);
            }
        }

        let started = self
            .engine
            .lock()
            .map_err(|_| SamplerError::EngineFailed("engine lock poisoned".to_string()))
            .and_then(|mut engine| engine.start(Arc::clone(&self.processor)));
        if let Err(e) = started {
            self.unregister_tick_feed();
            self.complete(Err(CompletionError::Failed(e.to_string())));
            return Err(e);
        }

        self.state
            .compare_exchange(
                SessionState::Created as u8,
                SessionState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| SamplerError::AlreadyRunning)?;
        info!(
            "Sampler #{} started: {} engine, {} mode, {:?} interval",
            self.id, self.engine_name, self.settings.mode, self.settings.interval
        );
        Ok(())
    }

    /// End a running session.
    ///
    /// Returns the report for `Stopped` and `TimedOut`, `None` for
    /// `Cancelled`.
    ///
    /// # Errors
    /// Returns [`SamplerError::NotRunning`] if another end already won, or
    /// the engine's error if the captured data could not be collected
    pub fn finish(&self, reason: EndReason) -> Result<Option<Arc<Report>>, SamplerError> {
        self.state
            .compare_exchange(
                SessionState::Running as u8,
                reason.state() as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| SamplerError::NotRunning)?;

        if let Some(timer) = self.timer_stop.lock().ok().and_then(|mut t| t.take()) {
            let _ = timer.try_send(());
        }
        self.unregister_tick_feed();

        let Ok(mut engine) = self.engine.lock() else {
            let msg = "engine lock poisoned".to_string();
            self.complete(Err(CompletionError::Failed(msg.clone())));
            return Err(SamplerError::EngineFailed(msg));
        };

        if reason == EndReason::Cancelled {
            engine.abort();
            drop(engine);
            info!("Sampler #{} cancelled", self.id);
            self.complete(Err(CompletionError::Cancelled));
            return Ok(None);
        }

        let summary = engine.stop();
        drop(engine);
        match summary {
            Ok(summary) => {
                let report = Arc::new(self.build_report(reason, summary));
                info!(
                    "Sampler #{} ended ({reason:?}): {} thread groups, {} samples",
                    self.id,
                    report.threads.len(),
                    report.metadata.samples.recorded
                );
                self.complete(Ok(Arc::clone(&report)));
                Ok(Some(report))
            }
            Err(e) => {
                warn!("Sampler #{} failed while stopping: {e}", self.id);
                self.complete(Err(CompletionError::Failed(e.to_string())));
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            state: self.state(),
            engine: self.engine_name.to_string(),
            mode: self.settings.mode,
            start_millis: self.start_millis,
            auto_end_millis: self.auto_end_millis(),
            elapsed_millis: unix_millis_now().saturating_sub(self.start_millis),
            samples: self.processor.counts(),
        }
    }

    fn auto_end_millis(&self) -> Option<u64> {
        self.settings.auto_end.map(|d| {
            self.start_millis
                .saturating_add(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        })
    }

    /// End the session as `TimedOut` after `duration` unless it ends first,
    /// then release the container slot if this session still holds it.
    ///
    /// # Errors
    /// Returns an error if the timer thread cannot be spawned
    pub fn arm_timer(
        self: &Arc<Self>,
        container: Arc<SamplerContainer>,
        duration: Duration,
    ) -> Result<(), SamplerError> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        if let Ok(mut timer) = self.timer_stop.lock() {
            *timer = Some(stop_tx);
        }
        let session = Arc::clone(self);
        thread::Builder::new()
            .name("tickscope-auto-end".to_string())
            .spawn(move || {
                select! {
                    recv(after(duration)) -> _ => {
                        match session.finish(EndReason::TimedOut) {
                            Ok(_) => info!("Sampler #{} timed out after {duration:?}", session.id),
                            Err(e) => debug!("Auto-end of sampler #{} skipped: {e}", session.id),
                        }
                        container.clear_if(&session);
                    }
                    recv(stop_rx) -> _ => {}
                }
            })?;
        Ok(())
    }

    fn build_report(&self, reason: EndReason, summary: EngineSummary) -> Report {
        let end_millis = unix_millis_now();
        let width = self.settings.window_width;
        if let Some(keep) = self.settings.retain {
            self.processor
                .tree()
                .prune_windows(retention_cutoff(end_millis, keep, width));
        }
        let tick_count = self
            .context
            .tick_hook
            .as_ref()
            .zip(self.start_tick)
            .map(|(hook, start)| hook.current_tick().saturating_sub(start));

        let metadata = ReportMetadata {
            start_millis: self.start_millis,
            end_millis,
            interval_micros: self.settings.interval_micros(),
            window_width_millis: u64::try_from(width.as_millis()).unwrap_or(u64::MAX),
            engine: self.engine_name.to_string(),
            mode: self.settings.mode,
            merge_mode: self.settings.merge_mode,
            dumper: self.settings.dumper.describe(),
            grouper: self.settings.grouper,
            end_reason: reason,
            tick_count,
            samples: self.processor.counts(),
            platform: PlatformStatistics::collect(
                self.context.tick_stats.as_deref(),
                self.context.ping.as_deref(),
            ),
            system: summary.system,
            incomplete_recording: summary.incomplete,
        };
        Report::build(
            metadata,
            self.processor.tree(),
            self.processor.grouper(),
            self.context.lookup.as_deref(),
        )
    }

    fn unregister_tick_feed(&self) {
        let id = self.tick_listener.lock().ok().and_then(|mut l| l.take());
        if let (Some(hook), Some(id)) = (&self.context.tick_hook, id) {
            hook.remove_listener(id);
        }
    }

    fn complete(&self, outcome: Completion) {
        if let Some(tx) = self.completion.lock().ok().and_then(|mut c| c.take()) {
            // The handle may have been dropped
            let _ = tx.send(outcome);
        }
    }
}

/// Resolves once when the session ends.
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    receiver: oneshot::Receiver<Completion>,
}

impl SessionHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the session to end.
    pub async fn wait(self) -> Completion {
        self.receiver
            .await
            .unwrap_or_else(|_| Err(CompletionError::Dropped))
    }

    /// Wait from a thread outside any async runtime.
    #[must_use]
    pub fn blocking_wait(self) -> Completion {
        self.receiver
            .blocking_recv()
            .unwrap_or_else(|_| Err(CompletionError::Dropped))
    }

    /// The outcome, if the session has already ended.
    pub fn try_result(&mut self) -> Option<Completion> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timestamp;
    use crate::grouping::GrouperKind;
    use crate::trace_data::ThreadSample;

    /// Engine that records a fixed sample on stop.
    struct ScriptedEngine {
        processor: Option<Arc<SampleProcessor>>,
        fail_start: bool,
    }

    impl ScriptedEngine {
        fn boxed(fail_start: bool) -> Box<dyn CaptureEngine> {
            Box::new(Self {
                processor: None,
                fail_start,
            })
        }
    }

    impl CaptureEngine for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn start(&mut self, processor: Arc<SampleProcessor>) -> Result<(), SamplerError> {
            if self.fail_start {
                return Err(SamplerError::EngineFailed("no threads".to_string()));
            }
            self.processor = Some(processor);
            Ok(())
        }

        fn stop(&mut self) -> Result<EngineSummary, SamplerError> {
            let processor = self.processor.take().ok_or(SamplerError::NotRunning)?;
            processor.process(ThreadSample {
                thread_id: crate::domain::ThreadId(1),
                thread_name: "main".to_string(),
                state: crate::trace_data::ThreadState::Runnable,
                frames: vec![crate::trace_data::StackFrame::new("app.Main", "main")],
                time: Timestamp(1),
                unix_millis: unix_millis_now(),
                value: 5,
            });
            Ok(EngineSummary::default())
        }
    }

    fn session(fail_start: bool) -> (Arc<Session>, SessionHandle) {
        let settings = SamplerSettings {
            grouper: GrouperKind::AsOne,
            ..SamplerSettings::default()
        };
        Session::new(7, settings, ScriptedEngine::boxed(fail_start), None, SessionContext::default())
    }

    #[test]
    fn test_stop_exports_and_resolves_handle() {
        let (session, handle) = session(false);
        assert_eq!(session.state(), SessionState::Created);
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Running);

        let report = session.finish(EndReason::Stopped).unwrap().unwrap();
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(report.total(), 5);
        assert_eq!(report.metadata.engine, "scripted");
        assert_eq!(report.metadata.end_reason, EndReason::Stopped);
        assert!(report.metadata.tick_count.is_none());

        let delivered = handle.blocking_wait().unwrap();
        assert!(Arc::ptr_eq(&delivered, &report));
    }

    #[test]
    fn test_only_first_end_wins() {
        let (session, handle) = session(false);
        session.start().unwrap();
        assert!(session.finish(EndReason::Cancelled).unwrap().is_none());
        assert!(matches!(
            session.finish(EndReason::Stopped),
            Err(SamplerError::NotRunning)
        ));
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(handle.blocking_wait(), Err(CompletionError::Cancelled));
    }

    #[test]
    fn test_engine_start_failure_resolves_handle() {
        let (session, mut handle) = session(true);
        assert!(session.start().is_err());
        assert_eq!(session.state(), SessionState::Created);
        assert!(matches!(
            handle.try_result(),
            Some(Err(CompletionError::Failed(_)))
        ));
    }

    #[test]
    fn test_dropped_session_resolves_as_dropped() {
        let (session, handle) = session(false);
        drop(session);
        assert_eq!(handle.blocking_wait(), Err(CompletionError::Dropped));
    }

    #[test]
    fn test_timer_times_out_and_clears_slot() {
        let container = Arc::new(SamplerContainer::new());
        let (session, handle) = session(false);
        container.install(Arc::clone(&session)).unwrap();
        session.start().unwrap();
        session
            .arm_timer(Arc::clone(&container), Duration::from_millis(10))
            .unwrap();

        let report = handle.blocking_wait().unwrap();
        assert_eq!(report.metadata.end_reason, EndReason::TimedOut);
        assert_eq!(session.state(), SessionState::TimedOut);
        for _ in 0..200 {
            if container.current().is_none() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(container.current().is_none());
    }

    #[test]
    fn test_info_reports_auto_end() {
        let settings = SamplerSettings {
            auto_end: Some(Duration::from_secs(30)),
            ..SamplerSettings::default()
        };
        let (session, _handle) = Session::new(
            1,
            settings,
            ScriptedEngine::boxed(false),
            None,
            SessionContext::default(),
        );
        let info = session.info();
        assert_eq!(info.auto_end_millis, Some(info.start_millis + 30_000));
        assert_eq!(info.engine, "scripted");
    }
}
