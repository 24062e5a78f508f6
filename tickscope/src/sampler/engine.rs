//! Capture engines
//!
//! An engine produces [`ThreadSample`]s and hands them to the session's
//! [`SampleProcessor`]. Two exist:
//!
//! - [`ThreadDumpEngine`]: polls a [`ThreadSampleSource`] on a fixed
//!   interval from a background thread
//! - [`NativeEngine`](super::native::NativeEngine): drives an external
//!   profiler and reads its recording when stopped

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, tick, Sender};
use log::{debug, info, warn};

use crate::domain::SamplerError;
use crate::sampler::SampleProcessor;
use crate::stats::SystemSummary;
use crate::trace_data::ThreadSample;

/// What an engine reports once stopped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineSummary {
    pub system: Option<SystemSummary>,
    /// The recording ended inside a chunk
    pub incomplete: bool,
}

pub trait CaptureEngine: Send {
    fn name(&self) -> &'static str;

    /// Begin capturing into `processor`.
    ///
    /// # Errors
    /// Returns an error if capture cannot start
    fn start(&mut self, processor: Arc<SampleProcessor>) -> Result<(), SamplerError>;

    /// Stop capturing. Every sample captured so far has reached the
    /// processor when this returns.
    ///
    /// # Errors
    /// Returns an error if the captured data cannot be collected
    fn stop(&mut self) -> Result<EngineSummary, SamplerError>;

    /// Stop capturing and discard whatever was captured.
    fn abort(&mut self) {
        if let Err(e) = self.stop() {
            debug!("Ignoring error while aborting {}: {e}", self.name());
        }
    }
}

/// One pass over the threads of a process.
pub trait ThreadSampleSource: Send + Sync {
    /// Current stack (leaf first) and state of every thread.
    ///
    /// # Errors
    /// Returns an error if the threads cannot be inspected
    fn sample(&self) -> Result<Vec<ThreadSample>, SamplerError>;
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Polls a thread source every interval.
///
/// Each sample weighs the interval in microseconds, so a tree's weights
/// approximate time spent.
pub struct ThreadDumpEngine {
    source: Arc<dyn ThreadSampleSource>,
    interval: Duration,
    worker: Option<Worker>,
}

impl ThreadDumpEngine {
    #[must_use]
    pub fn new(source: Arc<dyn ThreadSampleSource>, interval: Duration) -> Self {
        Self {
            source,
            interval: interval.max(Duration::from_millis(1)),
            worker: None,
        }
    }

    fn poll(source: &dyn ThreadSampleSource, processor: &SampleProcessor, weight: u64) -> bool {
        match source.sample() {
            Ok(samples) => {
                processor.process_all(samples.into_iter().map(|mut s| {
                    s.value = weight;
                    s
                }));
                true
            }
            Err(e) => {
                warn!("Thread dump failed, stopping sampler thread: {e}");
                false
            }
        }
    }
}

impl CaptureEngine for ThreadDumpEngine {
    fn name(&self) -> &'static str {
        "thread-dump"
    }

    fn start(&mut self, processor: Arc<SampleProcessor>) -> Result<(), SamplerError> {
        if self.worker.is_some() {
            return Err(SamplerError::AlreadyRunning);
        }
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let source = Arc::clone(&self.source);
        let interval = self.interval;
        let weight = u64::try_from(interval.as_micros()).unwrap_or(u64::MAX);

        let handle = thread::Builder::new()
            .name("tickscope-sampler".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            if !Self::poll(source.as_ref(), &processor, weight) {
                                break;
                            }
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
                processor.flush();
                debug!("Sampler thread stopped");
            })?;

        info!("Thread dump sampler started ({interval:?} interval)");
        self.worker = Some(Worker {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<EngineSummary, SamplerError> {
        let Some(worker) = self.worker.take() else {
            return Err(SamplerError::NotRunning);
        };
        let _ = worker.stop.try_send(());
        worker
            .handle
            .join()
            .map_err(|_| SamplerError::EngineFailed("sampler thread panicked".to_string()))?;
        Ok(EngineSummary::default())
    }
}

impl Drop for ThreadDumpEngine {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.abort();
        }
    }
}
