//! Sampling sessions
//!
//! A session owns one capture engine and one [`SampleProcessor`]. The
//! [`SamplerContainer`] keeps at most one session active.

pub mod container;
pub mod engine;
pub mod native;
pub mod proc_source;
pub mod processor;
pub mod session;
pub mod settings;

pub use container::SamplerContainer;
pub use engine::{CaptureEngine, EngineSummary, ThreadDumpEngine, ThreadSampleSource};
pub use native::{NativeEngine, NativeProfiler, NativeRequest, RecordingFileProfiler};
pub use proc_source::ProcThreadSource;
pub use processor::{ProcessorCounts, SampleProcessor, TickFeed};
pub use session::{
    Completion, EndReason, Session, SessionContext, SessionHandle, SessionInfo, SessionState,
};
pub use settings::{EnginePreference, SamplerMode, SamplerSettings, DEFAULT_INTERVAL};
