//! Native capture engine
//!
//! Drives an external sampling profiler that writes a recording file, then
//! reads the recording back when the session stops. Samples are resolved
//! to frames while their chunk is current, sorted by time and fed to the
//! processor; CPU load and GC events go to [`SystemStatistics`].
//!
//! Sample timestamps follow the recorder's clock. Only a
//! [`ClockSource::Monotonic`] recorder produces timestamps comparable with
//! tick boundaries.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use tickscope_common::types;

use crate::domain::{ClockSource, FormatError, SamplerError, ThreadId, Timestamp};
use crate::jfr::{Event, EventClass, FrameResolver, JfrReader};
use crate::sampler::engine::{CaptureEngine, EngineSummary};
use crate::sampler::{SampleProcessor, SamplerMode};
use crate::stats::SystemStatistics;
use crate::trace_data::{ThreadSample, ThreadState};

/// What to ask the native profiler for.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRequest {
    pub mode: SamplerMode,
    pub interval: Duration,
    /// Restrict sampling to these threads
    pub threads: Option<Vec<ThreadId>>,
}

/// An external profiler that records to a file.
pub trait NativeProfiler: Send + Sync {
    fn is_available(&self) -> bool;

    fn clock_source(&self) -> ClockSource;

    /// # Errors
    /// Returns an error if the profiler cannot start
    fn start(&self, request: &NativeRequest) -> Result<(), SamplerError>;

    /// Stop and return the finished recording.
    ///
    /// # Errors
    /// Returns an error if the profiler cannot stop or wrote nothing
    fn stop(&self) -> Result<PathBuf, SamplerError>;
}

/// Replays an existing recording file, for offline analysis.
#[derive(Debug)]
pub struct RecordingFileProfiler {
    path: PathBuf,
    clock: ClockSource,
    running: Mutex<bool>,
}

impl RecordingFileProfiler {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, clock: ClockSource) -> Self {
        Self {
            path: path.into(),
            clock,
            running: Mutex::new(false),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NativeProfiler for RecordingFileProfiler {
    fn is_available(&self) -> bool {
        self.path.is_file()
    }

    fn clock_source(&self) -> ClockSource {
        self.clock
    }

    fn start(&self, _request: &NativeRequest) -> Result<(), SamplerError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| SamplerError::EngineFailed("profiler state poisoned".to_string()))?;
        if *running {
            return Err(SamplerError::AlreadyRunning);
        }
        *running = true;
        Ok(())
    }

    fn stop(&self) -> Result<PathBuf, SamplerError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| SamplerError::EngineFailed("profiler state poisoned".to_string()))?;
        if !*running {
            return Err(SamplerError::NotRunning);
        }
        *running = false;
        Ok(self.path.clone())
    }
}

// =============================================================================
// RECORDING TO SAMPLES
// =============================================================================

/// Samples and statistics read from one recording.
#[derive(Debug, Default)]
pub struct RecordingSamples {
    /// Sorted by time
    pub samples: Vec<ThreadSample>,
    pub system: SystemStatistics,
    pub incomplete: bool,
}

/// Event class a sampler mode records.
#[must_use]
pub fn event_class_for(mode: SamplerMode) -> EventClass {
    match mode {
        SamplerMode::Execution => EventClass::Execution,
        SamplerMode::Allocation { live_only: false } => EventClass::Allocation,
        SamplerMode::Allocation { live_only: true } => EventClass::LiveObject,
    }
}

/// Read every sample of `mode` from a recording file.
///
/// # Errors
/// Returns an error if the recording cannot be opened or is malformed.
/// An incomplete trailing chunk is not an error.
pub fn read_recording(
    path: &Path,
    mode: SamplerMode,
    clock: ClockSource,
    execution_weight: u64,
) -> Result<RecordingSamples, FormatError> {
    let mut reader = JfrReader::open(path)?;
    read_samples(&mut reader, mode, clock, execution_weight)
}

/// Read the remaining samples of `mode` from an open reader.
///
/// Execution samples weigh `execution_weight` per coalesced sample;
/// allocation samples weigh their size in bytes.
///
/// # Errors
/// Returns an error on malformed records or I/O failure
pub fn read_samples<R: Read + Seek>(
    reader: &mut JfrReader<R>,
    mode: SamplerMode,
    clock: ClockSource,
    execution_weight: u64,
) -> Result<RecordingSamples, FormatError> {
    let wanted = event_class_for(mode);
    let mut resolver = FrameResolver::new();
    let mut out = RecordingSamples::default();

    loop {
        match reader.read_event() {
            Ok(Some(Event::CpuLoad(load))) => out.system.record_cpu(&load),
            Ok(Some(Event::GcHeapSummary(gc))) => out.system.record_gc(&gc),
            Ok(Some(event)) if event.class() == wanted => {
                if let Some(sample) =
                    to_sample(reader, &mut resolver, &event, clock, execution_weight)
                {
                    out.samples.push(sample);
                }
            }
            Ok(Some(_)) => {}
            Ok(None) if reader.eof() => break,
            Ok(None) => {}
            Err(e) if e.is_incomplete() => {
                warn!(
                    "Recording is incomplete, keeping {} samples: {e}",
                    out.samples.len()
                );
                out.incomplete = true;
                break;
            }
            Err(e) => return Err(e),
        }
    }

    out.samples.sort_by_key(|s| s.time);
    Ok(out)
}

#[allow(clippy::cast_possible_truncation)]
fn to_sample<R: Read + Seek>(
    reader: &JfrReader<R>,
    resolver: &mut FrameResolver,
    event: &Event,
    clock: ClockSource,
    execution_weight: u64,
) -> Option<ThreadSample> {
    let tid = event.tid()?;
    let frames = resolver
        .resolve(reader, event.stack_trace_id()?)
        .unwrap_or_default();
    let thread_name = reader
        .thread_name(tid)
        .map_or_else(|| format!("tid-{tid}"), str::to_string);

    let (state, value) = match event {
        Event::Execution(e) => (
            reader
                .enum_value(types::THREAD_STATE, u64::from(e.thread_state))
                .map_or(ThreadState::Unknown, ThreadState::from_recorded),
            u64::from(e.samples).saturating_mul(execution_weight),
        ),
        _ => (ThreadState::Runnable, event.value()),
    };

    let epoch_nanos = reader.ticks_to_nanos(event.time());
    let time = match clock {
        ClockSource::Monotonic => {
            let per_second = u128::from(reader.chunk().ticks_per_second.max(1));
            Timestamp((u128::from(event.time()) * 1_000_000_000 / per_second) as u64)
        }
        ClockSource::Tsc | ClockSource::WallClock => Timestamp(epoch_nanos),
    };

    Some(ThreadSample {
        thread_id: ThreadId(u64::from(tid)),
        thread_name,
        state,
        frames,
        time,
        unix_millis: epoch_nanos / 1_000_000,
        value,
    })
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct NativeEngine {
    profiler: Arc<dyn NativeProfiler>,
    request: NativeRequest,
    processor: Option<Arc<SampleProcessor>>,
}

impl NativeEngine {
    #[must_use]
    pub fn new(profiler: Arc<dyn NativeProfiler>, request: NativeRequest) -> Self {
        Self {
            profiler,
            request,
            processor: None,
        }
    }

    fn execution_weight(&self) -> u64 {
        u64::try_from(self.request.interval.as_micros()).unwrap_or(u64::MAX)
    }
}

impl CaptureEngine for NativeEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    fn start(&mut self, processor: Arc<SampleProcessor>) -> Result<(), SamplerError> {
        if self.processor.is_some() {
            return Err(SamplerError::AlreadyRunning);
        }
        if !self.profiler.is_available() {
            return Err(SamplerError::NativeEngineUnsupported(
                "profiler is not available".to_string(),
            ));
        }
        self.profiler.start(&self.request)?;
        info!("Native profiler started ({} mode)", self.request.mode);
        self.processor = Some(processor);
        Ok(())
    }

    fn stop(&mut self) -> Result<EngineSummary, SamplerError> {
        let Some(processor) = self.processor.take() else {
            return Err(SamplerError::NotRunning);
        };
        let path = self.profiler.stop()?;
        let recording = read_recording(
            &path,
            self.request.mode,
            self.profiler.clock_source(),
            self.execution_weight(),
        )?;
        info!(
            "Read {} samples from {}",
            recording.samples.len(),
            path.display()
        );
        processor.process_all(recording.samples);
        processor.flush();
        Ok(EngineSummary {
            system: Some(recording.system.summary()),
            incomplete: recording.incomplete,
        })
    }

    fn abort(&mut self) {
        if self.processor.take().is_some() {
            if let Err(e) = self.profiler.stop() {
                warn!("Failed to stop native profiler: {e}");
            }
        }
    }
}
