//! Decoded events
//!
//! Each record type the reader understands decodes into one variant of
//! [`Event`]. Field layouts are fixed per event kind; the record size, not
//! the fields, decides where the next record starts.

use std::io::{Read, Seek};

use tickscope_common::events;

use crate::domain::FormatError;
use crate::jfr::cursor::BinaryCursor;

/// What a record's type id dispatches to in the current chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ExecutionSample,
    NativeMethodSample,
    WallClockSample,
    AllocationInNewTlab,
    AllocationOutsideTlab,
    AllocationSample,
    LiveObject,
    MonitorEnter,
    ThreadPark,
    ActiveSetting,
    CpuLoad,
    GcHeapSummary,
    /// Registered by name; surfaces with its raw payload
    Custom(String),
}

impl EventKind {
    /// Built-in kinds with the type name that declares them.
    pub const BUILTIN: [(&'static str, EventKind); 12] = [
        (events::EXECUTION_SAMPLE, EventKind::ExecutionSample),
        (events::NATIVE_METHOD_SAMPLE, EventKind::NativeMethodSample),
        (events::WALL_CLOCK_SAMPLE, EventKind::WallClockSample),
        (events::ALLOCATION_IN_NEW_TLAB, EventKind::AllocationInNewTlab),
        (events::ALLOCATION_OUTSIDE_TLAB, EventKind::AllocationOutsideTlab),
        (events::ALLOCATION_SAMPLE, EventKind::AllocationSample),
        (events::LIVE_OBJECT, EventKind::LiveObject),
        (events::MONITOR_ENTER, EventKind::MonitorEnter),
        (events::THREAD_PARK, EventKind::ThreadPark),
        (events::ACTIVE_SETTING, EventKind::ActiveSetting),
        (events::CPU_LOAD, EventKind::CpuLoad),
        (events::GC_HEAP_SUMMARY, EventKind::GcHeapSummary),
    ];

    /// The filter class this kind decodes into.
    #[must_use]
    pub fn class(&self) -> EventClass {
        match self {
            EventKind::ExecutionSample
            | EventKind::NativeMethodSample
            | EventKind::WallClockSample => EventClass::Execution,
            EventKind::AllocationInNewTlab
            | EventKind::AllocationOutsideTlab
            | EventKind::AllocationSample => EventClass::Allocation,
            EventKind::LiveObject => EventClass::LiveObject,
            EventKind::MonitorEnter | EventKind::ThreadPark => EventClass::ContendedLock,
            EventKind::ActiveSetting => EventClass::ActiveSetting,
            EventKind::CpuLoad => EventClass::CpuLoad,
            EventKind::GcHeapSummary => EventClass::GcHeapSummary,
            EventKind::Custom(_) => EventClass::Custom,
        }
    }
}

/// Coarse event filter for [`JfrReader::read_event_of`](super::JfrReader::read_event_of).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    Execution,
    Allocation,
    LiveObject,
    ContendedLock,
    ActiveSetting,
    CpuLoad,
    GcHeapSummary,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSample {
    pub time: u64,
    pub tid: u32,
    pub stack_trace_id: u32,
    pub thread_state: u32,
    /// Coalesced sample count (wall clock), 1 otherwise
    pub samples: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationSample {
    pub time: u64,
    pub tid: u32,
    pub stack_trace_id: u32,
    pub class_id: u32,
    pub allocation_size: u64,
    /// Size of the new TLAB, 0 for allocations outside a TLAB
    pub tlab_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveObject {
    pub time: u64,
    pub tid: u32,
    pub stack_trace_id: u32,
    pub class_id: u32,
    pub allocation_size: u64,
    pub allocation_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContendedLock {
    pub time: u64,
    pub duration: u64,
    pub tid: u32,
    pub stack_trace_id: u32,
    pub class_id: u32,
    pub address: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSetting {
    pub time: u64,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CpuLoad {
    pub time: u64,
    pub jvm_user: f32,
    pub jvm_system: f32,
    pub machine_total: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcHeapSummary {
    pub time: u64,
    pub gc_id: u32,
    /// Key into the `jdk.types.GCWhen` enum
    pub when: u32,
    pub committed_size: u64,
    pub reserved_size: u64,
    pub heap_used: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Execution(ExecutionSample),
    Allocation(AllocationSample),
    LiveObject(LiveObject),
    ContendedLock(ContendedLock),
    ActiveSetting(ActiveSetting),
    CpuLoad(CpuLoad),
    GcHeapSummary(GcHeapSummary),
    Custom {
        type_name: String,
        /// First payload field, by convention the start time
        time: u64,
        payload: Vec<u8>,
    },
}

impl Event {
    #[must_use]
    pub fn class(&self) -> EventClass {
        match self {
            Event::Execution(_) => EventClass::Execution,
            Event::Allocation(_) => EventClass::Allocation,
            Event::LiveObject(_) => EventClass::LiveObject,
            Event::ContendedLock(_) => EventClass::ContendedLock,
            Event::ActiveSetting(_) => EventClass::ActiveSetting,
            Event::CpuLoad(_) => EventClass::CpuLoad,
            Event::GcHeapSummary(_) => EventClass::GcHeapSummary,
            Event::Custom { .. } => EventClass::Custom,
        }
    }

    /// Event time in ticks.
    #[must_use]
    pub fn time(&self) -> u64 {
        match self {
            Event::Execution(e) => e.time,
            Event::Allocation(e) => e.time,
            Event::LiveObject(e) => e.time,
            Event::ContendedLock(e) => e.time,
            Event::ActiveSetting(e) => e.time,
            Event::CpuLoad(e) => e.time,
            Event::GcHeapSummary(e) => e.time,
            Event::Custom { time, .. } => *time,
        }
    }

    /// Sampled thread, for events that have one.
    #[must_use]
    pub fn tid(&self) -> Option<u32> {
        match self {
            Event::Execution(e) => Some(e.tid),
            Event::Allocation(e) => Some(e.tid),
            Event::LiveObject(e) => Some(e.tid),
            Event::ContendedLock(e) => Some(e.tid),
            _ => None,
        }
    }

    #[must_use]
    pub fn stack_trace_id(&self) -> Option<u32> {
        match self {
            Event::Execution(e) => Some(e.stack_trace_id),
            Event::Allocation(e) => Some(e.stack_trace_id),
            Event::LiveObject(e) => Some(e.stack_trace_id),
            Event::ContendedLock(e) => Some(e.stack_trace_id),
            _ => None,
        }
    }

    /// Type-specific magnitude: sample count, bytes or nanoseconds.
    #[must_use]
    pub fn value(&self) -> u64 {
        match self {
            Event::Execution(e) => u64::from(e.samples),
            Event::Allocation(e) => {
                if e.tlab_size != 0 {
                    e.tlab_size
                } else {
                    e.allocation_size
                }
            }
            Event::LiveObject(e) => e.allocation_size,
            Event::ContendedLock(e) => e.duration,
            _ => 0,
        }
    }

    /// Number of samples this event stands for.
    #[must_use]
    pub fn samples(&self) -> u32 {
        match self {
            Event::Execution(e) => e.samples,
            Event::Allocation(_) | Event::LiveObject(_) | Event::ContendedLock(_) => 1,
            _ => 0,
        }
    }
}

// ============================================================================
// DECODING
// ============================================================================

/// Decode the payload of a record whose size and type were already read.
/// `active_setting_fields` is the number of leading varlong fields before
/// the setting name, taken from the chunk schema.
pub(crate) fn decode<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    kind: &EventKind,
    active_setting_fields: usize,
    strings: &std::collections::HashMap<u64, String>,
) -> Result<Event, FormatError> {
    let event = match kind {
        EventKind::ExecutionSample | EventKind::NativeMethodSample => {
            Event::Execution(execution(cursor, false)?)
        }
        EventKind::WallClockSample => Event::Execution(execution(cursor, true)?),
        EventKind::AllocationInNewTlab => Event::Allocation(allocation(cursor, true)?),
        EventKind::AllocationOutsideTlab | EventKind::AllocationSample => {
            Event::Allocation(allocation(cursor, false)?)
        }
        EventKind::LiveObject => Event::LiveObject(LiveObject {
            time: cursor.varlong()?,
            tid: cursor.varint()?,
            stack_trace_id: cursor.varint()?,
            class_id: cursor.varint()?,
            allocation_size: cursor.varlong()?,
            allocation_time: cursor.varlong()?,
        }),
        EventKind::MonitorEnter => Event::ContendedLock(contended_lock(cursor, false)?),
        EventKind::ThreadPark => Event::ContendedLock(contended_lock(cursor, true)?),
        EventKind::ActiveSetting => {
            let time = cursor.varlong()?;
            for _ in 1..active_setting_fields {
                cursor.varlong()?;
            }
            Event::ActiveSetting(ActiveSetting {
                time,
                name: cursor.string(strings)?.unwrap_or_default(),
                value: cursor.string(strings)?.unwrap_or_default(),
            })
        }
        EventKind::CpuLoad => Event::CpuLoad(CpuLoad {
            time: cursor.varlong()?,
            jvm_user: cursor.f32()?,
            jvm_system: cursor.f32()?,
            machine_total: cursor.f32()?,
        }),
        EventKind::GcHeapSummary => {
            let time = cursor.varlong()?;
            let gc_id = cursor.varint()?;
            let when = cursor.varint()?;
            cursor.varlong()?; // start
            cursor.varlong()?; // committed end
            let committed_size = cursor.varlong()?;
            cursor.varlong()?; // reserved end
            let reserved_size = cursor.varlong()?;
            let heap_used = cursor.varlong()?;
            Event::GcHeapSummary(GcHeapSummary {
                time,
                gc_id,
                when,
                committed_size,
                reserved_size,
                heap_used,
            })
        }
        EventKind::Custom(_) => {
            return Err(FormatError::InvalidFormat(
                "custom events are decoded from the raw record".to_string(),
            ))
        }
    };
    Ok(event)
}

fn execution<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    has_samples: bool,
) -> Result<ExecutionSample, FormatError> {
    Ok(ExecutionSample {
        time: cursor.varlong()?,
        tid: cursor.varint()?,
        stack_trace_id: cursor.varint()?,
        thread_state: cursor.varint()?,
        samples: if has_samples { cursor.varint()? } else { 1 },
    })
}

fn allocation<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    tlab: bool,
) -> Result<AllocationSample, FormatError> {
    Ok(AllocationSample {
        time: cursor.varlong()?,
        tid: cursor.varint()?,
        stack_trace_id: cursor.varint()?,
        class_id: cursor.varint()?,
        allocation_size: cursor.varlong()?,
        tlab_size: if tlab { cursor.varlong()? } else { 0 },
    })
}

fn contended_lock<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    has_timeout: bool,
) -> Result<ContendedLock, FormatError> {
    let time = cursor.varlong()?;
    let duration = cursor.varlong()?;
    let tid = cursor.varint()?;
    let stack_trace_id = cursor.varint()?;
    let class_id = cursor.varint()?;
    if has_timeout {
        cursor.varlong()?;
    }
    cursor.varlong()?; // until / previous owner
    let address = cursor.varlong()?;
    Ok(ContendedLock {
        time,
        duration,
        tid,
        stack_trace_id,
        class_id,
        address,
    })
}
