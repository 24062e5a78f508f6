//! Stack trace resolution
//!
//! Turns a raw stack trace id into [`StackFrame`]s. Method ids are resolved
//! once per chunk: the cache is keyed by method id and dropped whenever the
//! reader loads a new chunk, since method and class pools are chunk scoped.

use std::collections::HashMap;
use std::io::{Read, Seek};

use crate::classification::FrameKind;
use crate::jfr::JfrReader;
use crate::trace_data::StackFrame;

/// Frame text for method ids missing from the pool.
const UNKNOWN: &str = "unknown";

#[derive(Debug, Default)]
pub struct FrameResolver {
    /// method id -> frame without line number
    cache: HashMap<u64, StackFrame>,
    generation: u64,
}

impl FrameResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a stack trace, leaf frame first.
    ///
    /// Returns `None` if the chunk does not define `stack_trace_id`.
    pub fn resolve<R: Read + Seek>(
        &mut self,
        reader: &JfrReader<R>,
        stack_trace_id: u32,
    ) -> Option<Vec<StackFrame>> {
        if reader.generation() != self.generation {
            self.cache.clear();
            self.generation = reader.generation();
        }

        let trace = reader.pools().stack_traces.get(&u64::from(stack_trace_id))?;
        let mut frames = Vec::with_capacity(trace.depth());
        for (i, &method_id) in trace.methods.iter().enumerate() {
            let base = self
                .cache
                .entry(method_id)
                .or_insert_with(|| resolve_method(reader, method_id));
            let mut frame = base.clone();
            frame.kind = match FrameKind::from_recorded(trace.types[i]) {
                // A recorded frame without a class is native whatever its type
                FrameKind::Managed if frame.class_name.is_empty() => FrameKind::Native,
                kind => kind,
            };
            frame.line_number = trace.line(i);
            frames.push(frame);
        }
        Some(frames)
    }

    /// Number of cached method frames.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

fn resolve_method<R: Read + Seek>(reader: &JfrReader<R>, method_id: u64) -> StackFrame {
    let pools = reader.pools();
    let Some(method) = pools.methods.get(&method_id) else {
        return StackFrame::native(UNKNOWN);
    };

    let class_name = pools
        .classes
        .get(&method.class)
        .and_then(|c| pools.symbol(c.name))
        .map(|s| s.replace('/', "."))
        .unwrap_or_default();
    let method_name = pools
        .symbol(method.name)
        .unwrap_or_else(|| UNKNOWN.to_string());
    let descriptor = pools.symbol(method.sig).filter(|s| !s.is_empty());

    StackFrame {
        kind: if class_name.is_empty() {
            FrameKind::Native
        } else {
            FrameKind::Managed
        },
        class_name,
        method_name,
        descriptor,
        line_number: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jfr::fixture::RecordingBuilder;
    use std::io::Cursor;
    use tickscope_common::{FRAME_JIT_COMPILED, FRAME_NATIVE};

    fn builder() -> RecordingBuilder {
        let mut b = RecordingBuilder::new();
        b.symbol(1, "net/server/Tick")
            .symbol(2, "run")
            .symbol(3, "()V")
            .symbol(4, "")
            .symbol(5, "epoll_wait")
            .class(10, 1)
            .class(11, 4)
            .method(20, 10, 2, 3)
            .method(21, 11, 5, 4)
            .stack_trace(1, &[(21, 0, 0, FRAME_NATIVE), (20, 42, 3, FRAME_JIT_COMPILED)]);
        b
    }

    #[test]
    fn test_resolves_leaf_first_with_lines() {
        let bytes = builder().build();
        let reader = JfrReader::from_source(Cursor::new(bytes)).unwrap();
        let mut resolver = FrameResolver::new();
        let frames = resolver.resolve(&reader, 1).unwrap();

        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_native());
        assert_eq!(frames[0].export_class_name(), "native");
        assert_eq!(frames[0].method_name, "epoll_wait");

        assert_eq!(frames[1].class_name, "net.server.Tick");
        assert_eq!(frames[1].method_name, "run");
        assert_eq!(frames[1].descriptor.as_deref(), Some("()V"));
        assert_eq!(frames[1].line_number, Some(42));
        assert_eq!(resolver.cached(), 2);
    }

    #[test]
    fn test_unknown_trace_is_none() {
        let reader = JfrReader::from_source(Cursor::new(builder().build())).unwrap();
        assert!(FrameResolver::new().resolve(&reader, 99).is_none());
    }

    #[test]
    fn test_cache_dropped_on_new_chunk() {
        let mut second = RecordingBuilder::new();
        second
            .symbol(1, "other/Cls")
            .symbol(2, "work")
            .class(10, 1)
            .method(20, 10, 2, 0)
            .stack_trace(1, &[(20, 7, 0, FRAME_JIT_COMPILED)])
            .execution_sample(5, 1, 1, 1);
        let mut first = builder();
        first.execution_sample(1, 1, 1, 1);

        let mut bytes = first.build();
        bytes.extend(second.build());
        let mut reader = JfrReader::from_source(Cursor::new(bytes)).unwrap();
        let mut resolver = FrameResolver::new();

        reader.read_event().unwrap().unwrap();
        let before = resolver.resolve(&reader, 1).unwrap();
        assert_eq!(before.last().unwrap().class_name, "net.server.Tick");

        reader.read_event().unwrap().unwrap();
        let after = resolver.resolve(&reader, 1).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].class_name, "other.Cls");
        assert_eq!(after[0].method_name, "work");
    }
}
