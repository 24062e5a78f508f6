//! Hand-built recordings for tests
//!
//! [`RecordingBuilder`] writes one chunk with a schema covering every event
//! the reader understands. Pools and events are added with small helpers;
//! `build` lays the chunk out as header, events, metadata, constant pool.

use std::collections::HashMap;

use tickscope_common::{
    encode_varint, encode_varlong, events, header, types, CHUNK_HEADER_SIZE, CHUNK_MAGIC,
    EMBEDDED_CHUNK_HEADER_SIZE, MAX_VARINT_LEN, MAX_VARLONG_LEN, RECORD_CONSTANT_POOL, RECORD_METADATA, STRING_EMPTY,
    STRING_NULL, STRING_UTF8,
};

pub const ID_LONG: u64 = 1;
pub const ID_INT: u64 = 2;
pub const ID_FLOAT: u64 = 3;
pub const ID_STRING: u64 = 20;
pub const ID_THREAD: u64 = 21;
pub const ID_CLASS: u64 = 22;
pub const ID_METHOD: u64 = 23;
pub const ID_SYMBOL: u64 = 24;
pub const ID_STACK_TRACE: u64 = 25;
pub const ID_THREAD_STATE: u64 = 26;
pub const ID_GC_WHEN: u64 = 27;
pub const ID_CHUNK_HEADER: u64 = 28;
pub const ID_FRAME_TYPE: u64 = 29;

pub const ID_EXECUTION_SAMPLE: u64 = 100;
pub const ID_WALL_CLOCK_SAMPLE: u64 = 101;
pub const ID_ALLOCATION_IN_NEW_TLAB: u64 = 102;
pub const ID_ALLOCATION_OUTSIDE_TLAB: u64 = 103;
pub const ID_LIVE_OBJECT: u64 = 104;
pub const ID_MONITOR_ENTER: u64 = 105;
pub const ID_THREAD_PARK: u64 = 106;
pub const ID_ACTIVE_SETTING: u64 = 107;
pub const ID_CPU_LOAD: u64 = 108;
pub const ID_GC_HEAP_SUMMARY: u64 = 109;
pub const ID_NATIVE_METHOD_SAMPLE: u64 = 110;
pub const ID_ALLOCATION_SAMPLE: u64 = 111;

pub fn put_varint(out: &mut Vec<u8>, value: u32) {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_varint(value, &mut buf);
    out.extend_from_slice(&buf[..len]);
}

pub fn put_varlong(out: &mut Vec<u8>, value: u64) {
    let mut buf = [0u8; MAX_VARLONG_LEN];
    let len = encode_varlong(value, &mut buf);
    out.extend_from_slice(&buf[..len]);
}

pub fn put_string(out: &mut Vec<u8>, value: Option<&str>) {
    match value {
        None => out.push(STRING_NULL),
        Some("") => out.push(STRING_EMPTY),
        Some(s) => {
            out.push(STRING_UTF8);
            put_varint(out, u32::try_from(s.len()).unwrap());
            out.extend_from_slice(s.as_bytes());
        }
    }
}

fn varint_len(value: usize) -> usize {
    let mut buf = [0u8; MAX_VARINT_LEN];
    encode_varint(u32::try_from(value).unwrap(), &mut buf)
}

/// Prefix a record body with its total size (the size varint included).
pub fn record(record_type: u64, body: &[u8], padding: usize) -> Vec<u8> {
    let mut inner = Vec::new();
    put_varlong(&mut inner, record_type);
    inner.extend_from_slice(body);
    inner.resize(inner.len() + padding, 0);

    let mut size = inner.len() + 1;
    loop {
        let next = inner.len() + varint_len(size);
        if next == size {
            break;
        }
        size = next;
    }
    let mut out = Vec::with_capacity(size);
    put_varint(&mut out, u32::try_from(size).unwrap());
    out.extend_from_slice(&inner);
    out
}

// ============================================================================
// METADATA
// ============================================================================

struct ClassDecl {
    id: u64,
    name: String,
    super_type: Option<String>,
    simple_type: bool,
    fields: Vec<(String, u64, bool)>,
}

#[derive(Default)]
pub struct MetadataBuilder {
    classes: Vec<ClassDecl>,
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(
        &mut self,
        id: u64,
        name: &str,
        super_type: Option<&str>,
        simple_type: bool,
        fields: &[(&str, u64, bool)],
    ) -> &mut Self {
        self.classes.push(ClassDecl {
            id,
            name: name.to_string(),
            super_type: super_type.map(ToString::to_string),
            simple_type,
            fields: fields
                .iter()
                .map(|(n, t, cp)| ((*n).to_string(), *t, *cp))
                .collect(),
        });
        self
    }

    /// Encode the metadata record, size prefix included.
    pub fn build(&self) -> Vec<u8> {
        let mut table: Vec<String> = Vec::new();
        let mut index: HashMap<String, u32> = HashMap::new();
        let mut intern = |s: &str| -> u32 {
            if let Some(&i) = index.get(s) {
                return i;
            }
            let i = u32::try_from(table.len()).unwrap();
            table.push(s.to_string());
            index.insert(s.to_string(), i);
            i
        };

        // Element tree: root -> metadata -> class* -> field*
        let mut tree = Vec::new();
        put_varint(&mut tree, intern("root"));
        put_varint(&mut tree, 0);
        put_varint(&mut tree, 2);

        put_varint(&mut tree, intern("metadata"));
        put_varint(&mut tree, 0);
        put_varint(&mut tree, u32::try_from(self.classes.len()).unwrap());
        for class in &self.classes {
            let mut attrs = vec![
                (intern("id"), intern(&class.id.to_string())),
                (intern("name"), intern(&class.name)),
            ];
            if let Some(super_type) = &class.super_type {
                attrs.push((intern("superType"), intern(super_type)));
            }
            if class.simple_type {
                attrs.push((intern("simpleType"), intern("true")));
            }
            put_varint(&mut tree, intern("class"));
            put_varint(&mut tree, u32::try_from(attrs.len()).unwrap());
            for (k, v) in attrs {
                put_varint(&mut tree, k);
                put_varint(&mut tree, v);
            }
            put_varint(&mut tree, u32::try_from(class.fields.len()).unwrap());
            for (name, type_id, constant_pool) in &class.fields {
                let mut attrs = vec![
                    (intern("name"), intern(name)),
                    (intern("class"), intern(&type_id.to_string())),
                ];
                if *constant_pool {
                    attrs.push((intern("constantPool"), intern("true")));
                }
                put_varint(&mut tree, intern("field"));
                put_varint(&mut tree, u32::try_from(attrs.len()).unwrap());
                for (k, v) in attrs {
                    put_varint(&mut tree, k);
                    put_varint(&mut tree, v);
                }
                // One annotation child, which the reader must walk past
                put_varint(&mut tree, intern("annotation"));
                put_varint(&mut tree, 1);
                put_varint(&mut tree, intern("class"));
                put_varint(&mut tree, intern("200"));
                put_varint(&mut tree, 0);
            }
        }

        put_varint(&mut tree, intern("region"));
        put_varint(&mut tree, 0);
        put_varint(&mut tree, 0);

        let mut body = Vec::new();
        put_varlong(&mut body, 0); // start
        put_varlong(&mut body, 0); // duration
        put_varlong(&mut body, 1); // metadata id
        put_varint(&mut body, u32::try_from(table.len()).unwrap());
        for s in &table {
            put_string(&mut body, Some(s));
        }
        body.extend_from_slice(&tree);
        record(u64::from(RECORD_METADATA), &body, 0)
    }
}

// ============================================================================
// RECORDING
// ============================================================================

/// Builds a single-chunk recording.
pub struct RecordingBuilder {
    pub meta: MetadataBuilder,
    events: Vec<u8>,
    pools: Vec<(u64, u32, Vec<u8>)>,
    pub version: u32,
    pub start_nanos: u64,
    pub duration_nanos: u64,
    pub start_ticks: u64,
    pub ticks_per_second: u64,
    /// Split the constant pool into two records linked by a delta offset
    pub chain_pools: bool,
    /// Zero bytes appended inside every event record
    pub padding: usize,
}

impl RecordingBuilder {
    pub fn new() -> Self {
        let mut meta = MetadataBuilder::new();
        meta.class(ID_LONG, "long", None, false, &[])
            .class(ID_INT, "int", None, false, &[])
            .class(ID_FLOAT, "float", None, false, &[])
            .class(ID_STRING, types::STRING, None, false, &[])
            .class(
                ID_THREAD,
                types::THREAD,
                None,
                false,
                &[
                    ("osName", ID_STRING, false),
                    ("osThreadId", ID_LONG, false),
                    ("javaName", ID_STRING, false),
                    ("javaThreadId", ID_LONG, false),
                    ("group", ID_LONG, true),
                ],
            )
            .class(
                ID_CLASS,
                types::CLASS,
                None,
                false,
                &[
                    ("classLoader", ID_LONG, true),
                    ("name", ID_SYMBOL, true),
                    ("package", ID_LONG, true),
                    ("modifiers", ID_INT, false),
                    ("hidden", ID_INT, false),
                ],
            )
            .class(ID_METHOD, types::METHOD, None, false, &[])
            .class(ID_SYMBOL, types::SYMBOL, None, false, &[])
            .class(ID_STACK_TRACE, types::STACK_TRACE, None, false, &[])
            .class(ID_CHUNK_HEADER, types::CHUNK_HEADER, None, false, &[])
            .class(
                ID_THREAD_STATE,
                "jdk.types.ThreadState",
                None,
                true,
                &[("name", ID_STRING, false)],
            )
            .class(ID_GC_WHEN, "jdk.types.GCWhen", None, true, &[("when", ID_STRING, false)])
            .class(
                ID_FRAME_TYPE,
                "jdk.types.FrameType",
                None,
                false,
                &[("description", ID_STRING, false), ("code", ID_LONG, false)],
            );

        let event = Some("jdk.jfr.Event");
        for (id, name) in [
            (ID_EXECUTION_SAMPLE, events::EXECUTION_SAMPLE),
            (ID_NATIVE_METHOD_SAMPLE, events::NATIVE_METHOD_SAMPLE),
            (ID_WALL_CLOCK_SAMPLE, events::WALL_CLOCK_SAMPLE),
            (ID_ALLOCATION_IN_NEW_TLAB, events::ALLOCATION_IN_NEW_TLAB),
            (ID_ALLOCATION_OUTSIDE_TLAB, events::ALLOCATION_OUTSIDE_TLAB),
            (ID_ALLOCATION_SAMPLE, events::ALLOCATION_SAMPLE),
            (ID_LIVE_OBJECT, events::LIVE_OBJECT),
            (ID_MONITOR_ENTER, events::MONITOR_ENTER),
            (ID_THREAD_PARK, events::THREAD_PARK),
            (ID_CPU_LOAD, events::CPU_LOAD),
            (ID_GC_HEAP_SUMMARY, events::GC_HEAP_SUMMARY),
        ] {
            meta.class(id, name, event, false, &[("startTime", ID_LONG, false)]);
        }
        meta.class(
            ID_ACTIVE_SETTING,
            events::ACTIVE_SETTING,
            event,
            false,
            &[
                ("startTime", ID_LONG, false),
                ("duration", ID_LONG, false),
                ("eventThread", ID_THREAD, true),
                ("id", ID_LONG, false),
                ("name", ID_STRING, false),
                ("value", ID_STRING, false),
            ],
        );

        Self {
            meta,
            events: Vec::new(),
            pools: Vec::new(),
            version: 0x0002_0000,
            start_nanos: 1_000_000_000,
            duration_nanos: 5_000_000_000,
            start_ticks: 0,
            ticks_per_second: 1_000_000_000,
            chain_pools: false,
            padding: 0,
        }
    }

    /// Declare an event type outside the built-in set.
    pub fn declare_event(&mut self, id: u64, name: &str) -> &mut Self {
        self.meta.class(id, name, Some("jdk.jfr.Event"), false, &[]);
        self
    }

    fn pool(&mut self, type_id: u64) -> &mut (u64, u32, Vec<u8>) {
        if let Some(i) = self.pools.iter().position(|(t, _, _)| *t == type_id) {
            return &mut self.pools[i];
        }
        self.pools.push((type_id, 0, Vec::new()));
        self.pools.last_mut().unwrap()
    }

    pub fn symbol(&mut self, id: u64, value: &str) -> &mut Self {
        let entry = self.pool(ID_SYMBOL);
        entry.1 += 1;
        put_varlong(&mut entry.2, id);
        // Symbols are always UTF-8 tagged, even when empty
        entry.2.push(STRING_UTF8);
        put_varint(&mut entry.2, u32::try_from(value.len()).unwrap());
        entry.2.extend_from_slice(value.as_bytes());
        self
    }

    pub fn string(&mut self, id: u64, value: &str) -> &mut Self {
        let entry = self.pool(ID_STRING);
        entry.1 += 1;
        put_varlong(&mut entry.2, id);
        put_string(&mut entry.2, Some(value));
        self
    }

    pub fn thread(&mut self, id: u64, os_name: &str, java_name: Option<&str>) -> &mut Self {
        let entry = self.pool(ID_THREAD);
        entry.1 += 1;
        put_varlong(&mut entry.2, id);
        put_string(&mut entry.2, Some(os_name));
        put_varint(&mut entry.2, u32::try_from(id).unwrap());
        put_string(&mut entry.2, java_name);
        put_varlong(&mut entry.2, id);
        put_varlong(&mut entry.2, 0); // group
        self
    }

    pub fn class(&mut self, id: u64, name_symbol: u64) -> &mut Self {
        let entry = self.pool(ID_CLASS);
        entry.1 += 1;
        put_varlong(&mut entry.2, id);
        put_varlong(&mut entry.2, 0); // loader
        put_varlong(&mut entry.2, name_symbol);
        put_varlong(&mut entry.2, 0); // package
        put_varint(&mut entry.2, 1); // modifiers
        put_varlong(&mut entry.2, 0); // hidden
        self
    }

    pub fn method(&mut self, id: u64, class_id: u64, name_symbol: u64, sig_symbol: u64) -> &mut Self {
        let entry = self.pool(ID_METHOD);
        entry.1 += 1;
        put_varlong(&mut entry.2, id);
        put_varlong(&mut entry.2, class_id);
        put_varlong(&mut entry.2, name_symbol);
        put_varlong(&mut entry.2, sig_symbol);
        put_varint(&mut entry.2, 1); // modifiers
        put_varint(&mut entry.2, 0); // hidden
        self
    }

    /// Frames are `(method_id, line, bci, frame_type)`, leaf first.
    pub fn stack_trace(&mut self, id: u64, frames: &[(u64, u32, u32, u8)]) -> &mut Self {
        let entry = self.pool(ID_STACK_TRACE);
        entry.1 += 1;
        put_varlong(&mut entry.2, id);
        put_varint(&mut entry.2, 0); // truncated
        put_varint(&mut entry.2, u32::try_from(frames.len()).unwrap());
        for &(method, line, bci, frame_type) in frames {
            put_varlong(&mut entry.2, method);
            put_varint(&mut entry.2, line);
            put_varint(&mut entry.2, bci);
            entry.2.push(frame_type);
        }
        self
    }

    pub fn thread_state(&mut self, key: u64, name: &str) -> &mut Self {
        let entry = self.pool(ID_THREAD_STATE);
        entry.1 += 1;
        put_varlong(&mut entry.2, key);
        put_string(&mut entry.2, Some(name));
        self
    }

    pub fn frame_type(&mut self, key: u64, description: &str) -> &mut Self {
        let entry = self.pool(ID_FRAME_TYPE);
        entry.1 += 1;
        put_varlong(&mut entry.2, key);
        put_string(&mut entry.2, Some(description));
        put_varlong(&mut entry.2, key);
        self
    }

    pub fn raw_event(&mut self, type_id: u64, body: &[u8]) -> &mut Self {
        let bytes = record(type_id, body, self.padding);
        self.events.extend_from_slice(&bytes);
        self
    }

    pub fn execution_sample(&mut self, time: u64, tid: u32, stack: u32, state: u32) -> &mut Self {
        let mut b = Vec::new();
        put_varlong(&mut b, time);
        put_varint(&mut b, tid);
        put_varint(&mut b, stack);
        put_varint(&mut b, state);
        self.raw_event(ID_EXECUTION_SAMPLE, &b)
    }

    pub fn wall_clock_sample(
        &mut self,
        time: u64,
        tid: u32,
        stack: u32,
        state: u32,
        samples: u32,
    ) -> &mut Self {
        let mut b = Vec::new();
        put_varlong(&mut b, time);
        put_varint(&mut b, tid);
        put_varint(&mut b, stack);
        put_varint(&mut b, state);
        put_varint(&mut b, samples);
        self.raw_event(ID_WALL_CLOCK_SAMPLE, &b)
    }

    pub fn allocation(
        &mut self,
        time: u64,
        tid: u32,
        stack: u32,
        class_id: u32,
        size: u64,
        tlab_size: Option<u64>,
    ) -> &mut Self {
        let mut b = Vec::new();
        put_varlong(&mut b, time);
        put_varint(&mut b, tid);
        put_varint(&mut b, stack);
        put_varint(&mut b, class_id);
        put_varlong(&mut b, size);
        let type_id = match tlab_size {
            Some(tlab) => {
                put_varlong(&mut b, tlab);
                ID_ALLOCATION_IN_NEW_TLAB
            }
            None => ID_ALLOCATION_OUTSIDE_TLAB,
        };
        self.raw_event(type_id, &b)
    }

    pub fn live_object(
        &mut self,
        time: u64,
        tid: u32,
        stack: u32,
        class_id: u32,
        size: u64,
        allocation_time: u64,
    ) -> &mut Self {
        let mut b = Vec::new();
        put_varlong(&mut b, time);
        put_varint(&mut b, tid);
        put_varint(&mut b, stack);
        put_varint(&mut b, class_id);
        put_varlong(&mut b, size);
        put_varlong(&mut b, allocation_time);
        self.raw_event(ID_LIVE_OBJECT, &b)
    }

    pub fn thread_park(
        &mut self,
        time: u64,
        duration: u64,
        tid: u32,
        stack: u32,
        class_id: u32,
    ) -> &mut Self {
        let mut b = Vec::new();
        put_varlong(&mut b, time);
        put_varlong(&mut b, duration);
        put_varint(&mut b, tid);
        put_varint(&mut b, stack);
        put_varint(&mut b, class_id);
        put_varlong(&mut b, 0); // timeout
        put_varlong(&mut b, 0); // until
        put_varlong(&mut b, 0xdead); // address
        self.raw_event(ID_THREAD_PARK, &b)
    }

    pub fn active_setting(&mut self, time: u64, name: &str, value: &str) -> &mut Self {
        let mut b = Vec::new();
        put_varlong(&mut b, time);
        put_varlong(&mut b, 0); // duration
        put_varlong(&mut b, 1); // thread
        put_varlong(&mut b, 100); // setting id
        put_string(&mut b, Some(name));
        put_string(&mut b, Some(value));
        self.raw_event(ID_ACTIVE_SETTING, &b)
    }

    pub fn cpu_load(&mut self, time: u64, user: f32, system: f32, machine: f32) -> &mut Self {
        let mut b = Vec::new();
        put_varlong(&mut b, time);
        b.extend_from_slice(&user.to_be_bytes());
        b.extend_from_slice(&system.to_be_bytes());
        b.extend_from_slice(&machine.to_be_bytes());
        self.raw_event(ID_CPU_LOAD, &b)
    }

    pub fn gc_heap_summary(&mut self, time: u64, gc_id: u32, when: u32, used: u64) -> &mut Self {
        let mut b = Vec::new();
        put_varlong(&mut b, time);
        put_varint(&mut b, gc_id);
        put_varint(&mut b, when);
        for value in [0, 0, 1 << 30, 0, 1 << 31] {
            put_varlong(&mut b, value);
        }
        put_varlong(&mut b, used);
        self.raw_event(ID_GC_HEAP_SUMMARY, &b)
    }

    fn pool_record(pools: &[(u64, u32, Vec<u8>)], delta: u64) -> Vec<u8> {
        let mut body = Vec::new();
        put_varlong(&mut body, 0); // start
        put_varlong(&mut body, 0); // duration
        put_varlong(&mut body, delta);
        put_varint(&mut body, 0); // flush
        put_varint(&mut body, u32::try_from(pools.len()).unwrap());
        for (type_id, count, entries) in pools {
            put_varint(&mut body, u32::try_from(*type_id).unwrap());
            // The chunk header pool is a fixed-size blob with no count
            if *type_id != ID_CHUNK_HEADER {
                put_varint(&mut body, *count);
            }
            body.extend_from_slice(entries);
        }
        record(u64::from(RECORD_CONSTANT_POOL), &body, 0)
    }

    /// Encode the chunk.
    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; CHUNK_HEADER_SIZE];
        out.extend_from_slice(&self.events);

        let metadata_offset = out.len() as u64;
        out.extend_from_slice(&self.meta.build());

        let header_pool = vec![0u8; EMBEDDED_CHUNK_HEADER_SIZE];
        let mut pools: Vec<(u64, u32, Vec<u8>)> = vec![(ID_CHUNK_HEADER, 1, header_pool)];
        pools.extend(self.pools.iter().cloned());

        let cp_offset = if self.chain_pools && pools.len() > 1 {
            let split = pools.len() / 2;
            let first_offset = out.len() as u64;
            out.extend_from_slice(&Self::pool_record(&pools[split..], 0));
            let second_offset = out.len() as u64;
            let delta = first_offset.wrapping_sub(second_offset);
            out.extend_from_slice(&Self::pool_record(&pools[..split], delta));
            second_offset
        } else {
            let offset = out.len() as u64;
            out.extend_from_slice(&Self::pool_record(&pools, 0));
            offset
        };

        let chunk_size = out.len() as u64;
        out[header::MAGIC..header::MAGIC + 4].copy_from_slice(&CHUNK_MAGIC);
        out[header::VERSION..header::VERSION + 4].copy_from_slice(&self.version.to_be_bytes());
        for (offset, value) in [
            (header::CHUNK_SIZE, chunk_size),
            (header::CONSTANT_POOL_OFFSET, cp_offset),
            (header::METADATA_OFFSET, metadata_offset),
            (header::START_NANOS, self.start_nanos),
            (header::DURATION_NANOS, self.duration_nanos),
            (header::START_TICKS, self.start_ticks),
            (header::TICKS_PER_SECOND, self.ticks_per_second),
        ] {
            out[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
        }
        out
    }
}
