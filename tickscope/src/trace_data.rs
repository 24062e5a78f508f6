//! Sample data models shared by every capture engine
//!
//! Engines produce [`ThreadSample`]s: one thread's stack at one instant,
//! leaf frame first. The aggregator consumes them without caring whether
//! they came from a recording or a thread dump.

use std::fmt;

use crate::classification::FrameKind;
use crate::domain::{ThreadId, Timestamp};

/// Class name exported for frames that have none.
pub const NATIVE_CLASS: &str = "native";

/// One resolved stack frame
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackFrame {
    /// Fully qualified, dot separated. Empty for native frames.
    pub class_name: String,
    pub method_name: String,
    /// Method signature, when known
    pub descriptor: Option<String>,
    pub line_number: Option<u32>,
    pub kind: FrameKind,
}

impl StackFrame {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            descriptor: None,
            line_number: None,
            kind: FrameKind::Managed,
        }
    }

    /// A frame without a class.
    pub fn native(method_name: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Native,
            ..Self::new(String::new(), method_name)
        }
    }

    #[must_use]
    pub fn with_line(mut self, line: u32) -> Self {
        self.line_number = Some(line);
        self
    }

    #[must_use]
    pub fn with_descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptor = Some(descriptor.into());
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: FrameKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn is_native(&self) -> bool {
        self.class_name.is_empty() || self.kind != FrameKind::Managed
    }

    /// Class name as exported, with [`NATIVE_CLASS`] standing in for none.
    #[must_use]
    pub fn export_class_name(&self) -> &str {
        if self.class_name.is_empty() {
            NATIVE_CLASS
        } else {
            &self.class_name
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.export_class_name(), self.method_name)?;
        if let Some(line) = self.line_number {
            write!(f, ":{line}")?;
        }
        Ok(())
    }
}

/// Scheduler-level state of a sampled thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreadState {
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Sleeping,
    #[default]
    Unknown,
}

impl ThreadState {
    /// Parse a recorder state name such as `STATE_SLEEPING`.
    #[must_use]
    pub fn from_recorded(name: &str) -> Self {
        match name.trim_start_matches("STATE_") {
            "RUNNABLE" | "RUNNING" => ThreadState::Runnable,
            "BLOCKED" => ThreadState::Blocked,
            "WAITING" | "PARKED" => ThreadState::Waiting,
            "TIMED_WAITING" | "PARKED_TIMED" => ThreadState::TimedWaiting,
            "SLEEPING" => ThreadState::Sleeping,
            _ => ThreadState::Unknown,
        }
    }

    /// Parse the state letter of `/proc/<pid>/task/<tid>/stat`.
    #[must_use]
    pub fn from_proc(state: char) -> Self {
        match state {
            'R' => ThreadState::Runnable,
            'D' => ThreadState::Blocked,
            'S' | 'I' => ThreadState::Waiting,
            'T' | 't' => ThreadState::Sleeping,
            _ => ThreadState::Unknown,
        }
    }

    /// True for states where the thread is not doing work.
    #[must_use]
    pub fn is_idle(self) -> bool {
        matches!(
            self,
            ThreadState::Waiting | ThreadState::TimedWaiting | ThreadState::Sleeping
        )
    }
}

/// One thread's stack at one instant
#[derive(Debug, Clone)]
pub struct ThreadSample {
    pub thread_id: ThreadId,
    pub thread_name: String,
    pub state: ThreadState,
    /// Leaf frame first
    pub frames: Vec<StackFrame>,
    /// Monotonic capture time
    pub time: Timestamp,
    /// Unix millis, used to pick the aggregation window
    pub unix_millis: u64,
    /// Weight contributed to every frame of the stack
    pub value: u64,
}

impl ThreadSample {
    /// Innermost frame.
    #[must_use]
    pub fn leaf(&self) -> Option<&StackFrame> {
        self.frames.first()
    }

    /// Frames from the thread entry point down to the leaf.
    pub fn root_first(&self) -> impl Iterator<Item = &StackFrame> {
        self.frames.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_frame_exports_placeholder_class() {
        let frame = StackFrame::native("epoll_wait");
        assert!(frame.is_native());
        assert_eq!(frame.export_class_name(), "native");
        assert_eq!(frame.to_string(), "native.epoll_wait");
    }

    #[test]
    fn test_managed_frame_display() {
        let frame = StackFrame::new("net.server.Tick", "run").with_line(42);
        assert!(!frame.is_native());
        assert_eq!(frame.to_string(), "net.server.Tick.run:42");
    }

    #[test]
    fn test_thread_state_parsing() {
        assert_eq!(ThreadState::from_recorded("STATE_SLEEPING"), ThreadState::Sleeping);
        assert_eq!(ThreadState::from_recorded("STATE_RUNNABLE"), ThreadState::Runnable);
        assert_eq!(ThreadState::from_proc('D'), ThreadState::Blocked);
        assert!(ThreadState::from_proc('S').is_idle());
        assert!(!ThreadState::Runnable.is_idle());
    }

    #[test]
    fn test_root_first_reverses_leaf_first() {
        let sample = ThreadSample {
            thread_id: ThreadId(1),
            thread_name: "main".into(),
            state: ThreadState::Runnable,
            frames: vec![StackFrame::new("A", "leaf"), StackFrame::new("B", "root")],
            time: Timestamp(0),
            unix_millis: 0,
            value: 1,
        };
        let names: Vec<&str> = sample.root_first().map(|f| f.method_name.as_str()).collect();
        assert_eq!(names, vec!["root", "leaf"]);
        assert_eq!(sample.leaf().unwrap().method_name, "leaf");
    }
}
