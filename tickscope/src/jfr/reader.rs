//! Streaming reader for chunked recordings
//!
//! ```text
//!  file := chunk+
//!  chunk := header | event records ... | metadata | constant pools
//!                    ▲                    ▲           ▲
//!                    │                    │           └─ header.cp_offset
//!                    │                    └─ header.metadata_offset
//!                    └─ streaming starts at chunk_start + 68
//! ```
//!
//! Opening a reader parses the first chunk's schema and pools, then events
//! are pulled one at a time. When a record turns out to be the next chunk's
//! header, the reader either loads that chunk and keeps going or, with
//! `stop_at_new_chunk`, pauses so the caller can flush per-chunk state.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use log::{debug, info, warn};
use tickscope_common::{
    events as event_names, header, CHUNK_HEADER_SIZE, CHUNK_SIGNATURE, MAX_MAJOR_VERSION,
    MIN_MAJOR_VERSION, RECORD_CHUNK_BOUNDARY,
};

use crate::domain::FormatError;
use crate::jfr::constants::{read_constant_pools, ConstantPools};
use crate::jfr::cursor::{BinaryCursor, DEFAULT_BUFFER_SIZE};
use crate::jfr::events::{decode, Event, EventClass, EventKind};
use crate::jfr::metadata::{read_metadata, Schema};

/// Header of the chunk currently being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkHeader {
    /// File offset of the chunk
    pub start: u64,
    pub size: u64,
    pub major_version: u16,
    pub minor_version: u16,
    pub start_nanos: u64,
    pub duration_nanos: u64,
    pub start_ticks: u64,
    pub ticks_per_second: u64,
    pub features: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    /// Paused in front of the next chunk header
    NewChunk,
    Reading,
    Eof,
    /// The recording ends inside a chunk; reported once, then treated as EOF
    Incomplete,
}

enum ChunkLoad {
    Loaded,
    Incomplete,
}

pub struct JfrReader<R> {
    cursor: BinaryCursor<R>,
    schema: Schema,
    pools: ConstantPools,
    dispatch: HashMap<u64, EventKind>,
    custom_types: Vec<String>,
    settings: HashMap<String, String>,
    chunk: ChunkHeader,
    /// Bumped on every chunk load so caches can notice stale pools
    generation: u64,
    state: ReaderState,
    stop_at_new_chunk: bool,
    active_setting_fields: usize,

    start_nanos: u64,
    end_nanos: u64,
    start_ticks: u64,
}

impl JfrReader<File> {
    /// Open a recording file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or its first chunk is
    /// invalid or incomplete
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        info!("Opened recording {}", path.display());
        Self::from_source(file)
    }
}

impl<R: Read + Seek> JfrReader<R> {
    /// Read from any seekable source.
    ///
    /// # Errors
    /// Returns an error if the first chunk is invalid or incomplete
    pub fn from_source(source: R) -> Result<Self, FormatError> {
        Self::with_buffer_size(source, DEFAULT_BUFFER_SIZE)
    }

    /// Read with an explicit initial buffer size.
    ///
    /// # Errors
    /// Returns an error if the first chunk is invalid or incomplete
    pub fn with_buffer_size(source: R, buffer_size: usize) -> Result<Self, FormatError> {
        let mut reader = Self {
            cursor: BinaryCursor::with_capacity(source, buffer_size)?,
            schema: Schema::default(),
            pools: ConstantPools::default(),
            dispatch: HashMap::new(),
            custom_types: Vec::new(),
            settings: HashMap::new(),
            chunk: ChunkHeader::default(),
            generation: 0,
            state: ReaderState::Reading,
            stop_at_new_chunk: false,
            active_setting_fields: 0,
            start_nanos: u64::MAX,
            end_nanos: 0,
            start_ticks: u64::MAX,
        };

        reader.cursor.ensure(CHUNK_HEADER_SIZE)?;
        match reader.load_chunk()? {
            ChunkLoad::Loaded => Ok(reader),
            ChunkLoad::Incomplete => Err(FormatError::IncompleteChunk { offset: 0 }),
        }
    }

    /// Pause at chunk boundaries instead of reading through them.
    pub fn set_stop_at_new_chunk(&mut self, stop: bool) {
        self.stop_at_new_chunk = stop;
    }

    /// Surface records of `type_name` as [`Event::Custom`].
    ///
    /// Takes effect for the current chunk immediately and for every later
    /// chunk that declares the type.
    pub fn register_custom(&mut self, type_name: &str) {
        if !self.custom_types.iter().any(|t| t == type_name) {
            self.custom_types.push(type_name.to_string());
        }
        if let Some(id) = self.schema.type_id(type_name) {
            self.dispatch
                .insert(id, EventKind::Custom(type_name.to_string()));
        }
    }

    // ========================================================================
    // CHUNK LOADING
    // ========================================================================

    /// Parse the chunk header at the cursor, then its schema and pools.
    fn load_chunk(&mut self) -> Result<ChunkLoad, FormatError> {
        let pos = self.cursor.buffer_position();
        let chunk_start = self.cursor.position();

        if self.cursor.peek_u32_at(pos + header::MAGIC) != Some(CHUNK_SIGNATURE)
            && self.cursor.buffered_from(pos) >= 4
        {
            return Err(FormatError::InvalidFormat(format!(
                "bad chunk magic at offset {chunk_start}"
            )));
        }
        if self.cursor.buffered_from(pos) < CHUNK_HEADER_SIZE {
            if self.cursor.buffered_from(pos) < 4 {
                return Err(FormatError::InvalidFormat(format!(
                    "no chunk header at offset {chunk_start}"
                )));
            }
            debug!("Truncated chunk header at offset {chunk_start}");
            return Ok(ChunkLoad::Incomplete);
        }

        let field = |offset: usize| self.cursor.peek_u64_at(pos + offset).unwrap_or(0);
        let version = self.cursor.peek_u32_at(pos + header::VERSION).unwrap_or(0);
        #[allow(clippy::cast_possible_truncation)]
        let (major, minor) = ((version >> 16) as u16, (version & 0xffff) as u16);
        if !(MIN_MAJOR_VERSION..MAX_MAJOR_VERSION).contains(&major) {
            return Err(FormatError::UnsupportedVersion { major, minor });
        }

        let size = field(header::CHUNK_SIZE);
        let cp_offset = field(header::CONSTANT_POOL_OFFSET);
        let metadata_offset = field(header::METADATA_OFFSET);
        let next = ChunkHeader {
            start: chunk_start,
            size,
            major_version: major,
            minor_version: minor,
            start_nanos: field(header::START_NANOS),
            duration_nanos: field(header::DURATION_NANOS),
            start_ticks: field(header::START_TICKS),
            ticks_per_second: field(header::TICKS_PER_SECOND),
            features: self.cursor.peek_u32_at(pos + header::FEATURES).unwrap_or(0),
        };

        if chunk_start.saturating_add(size) > self.cursor.file_size() {
            debug!("Chunk at {chunk_start} claims {size} bytes, past end of file");
            return Ok(ChunkLoad::Incomplete);
        }
        if cp_offset == 0 || metadata_offset == 0 {
            debug!("Chunk at {chunk_start} was not finalized");
            return Ok(ChunkLoad::Incomplete);
        }

        self.chunk = next;
        self.start_nanos = self.start_nanos.min(next.start_nanos);
        self.end_nanos = self
            .end_nanos
            .max(next.start_nanos.saturating_add(next.duration_nanos));
        self.start_ticks = self.start_ticks.min(next.start_ticks);

        self.schema.clear();
        self.pools.clear_chunk_scoped();
        self.cursor.seek(chunk_start + metadata_offset)?;
        read_metadata(&mut self.cursor, &mut self.schema)?;
        read_constant_pools(
            &mut self.cursor,
            &self.schema,
            &mut self.pools,
            chunk_start..chunk_start + size,
            chunk_start + cp_offset,
        )?;
        self.cache_event_types();

        self.generation += 1;
        self.state = ReaderState::Reading;
        self.cursor.seek(chunk_start + CHUNK_HEADER_SIZE as u64)?;
        info!(
            "Loaded chunk at offset {chunk_start}: {} bytes, version {major}.{minor}, {} event types",
            size,
            self.dispatch.len()
        );
        Ok(ChunkLoad::Loaded)
    }

    fn cache_event_types(&mut self) {
        self.dispatch.clear();
        for (name, kind) in EventKind::BUILTIN {
            if let Some(id) = self.schema.type_id(name) {
                self.dispatch.insert(id, kind);
            }
        }
        for name in &self.custom_types {
            if let Some(id) = self.schema.type_id(name) {
                self.dispatch.insert(id, EventKind::Custom(name.clone()));
            }
        }
        self.active_setting_fields = self
            .schema
            .by_name(event_names::ACTIVE_SETTING)
            .and_then(|class| class.fields.iter().position(|f| f.name == "id"))
            .map_or(0, |i| i + 1);
    }

    // ========================================================================
    // EVENT STREAMING
    // ========================================================================

    /// Next event of any kind.
    ///
    /// Returns `Ok(None)` at the end of the recording, or at a chunk
    /// boundary when `stop_at_new_chunk` is set. A recording cut short
    /// yields `Err(IncompleteChunk)` once; later calls return `Ok(None)`.
    ///
    /// # Errors
    /// Returns an error on malformed records or I/O failure
    pub fn read_event(&mut self) -> Result<Option<Event>, FormatError> {
        self.read_matching(None)
    }

    /// Next event of one class, skipping all others.
    ///
    /// # Errors
    /// Same as [`read_event`](Self::read_event)
    pub fn read_event_of(&mut self, class: EventClass) -> Result<Option<Event>, FormatError> {
        self.read_matching(Some(class))
    }

    /// Drain every remaining event, sorted by time.
    ///
    /// An incomplete trailing chunk is logged and the events read up to that
    /// point are returned.
    ///
    /// # Errors
    /// Returns an error on malformed records or I/O failure
    pub fn read_all_events(&mut self) -> Result<Vec<Event>, FormatError> {
        let mut out = Vec::new();
        loop {
            match self.read_event() {
                Ok(Some(event)) => out.push(event),
                Ok(None) if self.state == ReaderState::NewChunk => {}
                Ok(None) => break,
                Err(e) if e.is_incomplete() => {
                    warn!("Recording is incomplete, keeping {} events: {e}", out.len());
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        out.sort_by_key(Event::time);
        Ok(out)
    }

    fn read_matching(&mut self, class: Option<EventClass>) -> Result<Option<Event>, FormatError> {
        if matches!(self.state, ReaderState::Eof | ReaderState::Incomplete) {
            return Ok(None);
        }

        while self.cursor.ensure(CHUNK_HEADER_SIZE)? {
            let pos = self.cursor.buffer_position();
            let record_start = self.cursor.position();
            let size = u64::from(self.cursor.varint()?);
            let record_type = self.cursor.varint()?;

            if record_type == RECORD_CHUNK_BOUNDARY
                && self.cursor.peek_u32_at(pos) == Some(CHUNK_SIGNATURE)
            {
                self.cursor.seek(record_start)?;
                if self.state == ReaderState::Reading && self.stop_at_new_chunk {
                    self.state = ReaderState::NewChunk;
                    return Ok(None);
                }
                match self.load_chunk()? {
                    ChunkLoad::Loaded => continue,
                    ChunkLoad::Incomplete => {
                        warn!("Recording ends inside the chunk at offset {record_start}");
                        self.state = ReaderState::Incomplete;
                        return Err(FormatError::IncompleteChunk {
                            offset: record_start,
                        });
                    }
                }
            }

            if size == 0 {
                return Err(FormatError::InvalidFormat(format!(
                    "zero-sized record at offset {record_start}"
                )));
            }

            let kind = self.dispatch.get(&u64::from(record_type)).cloned();
            // Settings are always collected, whatever the filter
            let wanted = kind.as_ref().is_some_and(|k| {
                class.map_or(true, |c| c == k.class()) || *k == EventKind::ActiveSetting
            });

            let event = match (wanted, kind) {
                (true, Some(EventKind::Custom(type_name))) => {
                    Some(self.read_custom(type_name, record_start, size)?)
                }
                (true, Some(kind)) => Some(decode(
                    &mut self.cursor,
                    &kind,
                    self.active_setting_fields,
                    &self.pools.strings,
                )?),
                _ => None,
            };

            // Always move by the declared size
            self.cursor.seek(record_start + size)?;

            match event {
                Some(Event::ActiveSetting(setting))
                    if class != Some(EventClass::ActiveSetting) =>
                {
                    self.settings.insert(setting.name, setting.value);
                }
                Some(Event::ActiveSetting(setting)) => {
                    self.settings
                        .insert(setting.name.clone(), setting.value.clone());
                    return Ok(Some(Event::ActiveSetting(setting)));
                }
                Some(event) => return Ok(Some(event)),
                None => {}
            }
        }

        self.state = ReaderState::Eof;
        Ok(None)
    }

    fn read_custom(
        &mut self,
        type_name: String,
        record_start: u64,
        size: u64,
    ) -> Result<Event, FormatError> {
        let header_len = self.cursor.position() - record_start;
        let payload_len = usize::try_from(size.saturating_sub(header_len)).map_err(|_| {
            FormatError::InvalidFormat(format!("record at {record_start} is too large"))
        })?;
        let payload = self.cursor.take(payload_len)?;
        let time = leading_varlong(&payload);
        Ok(Event::Custom {
            type_name,
            time,
            payload,
        })
    }

    // ========================================================================
    // LOOKUPS
    // ========================================================================

    /// Earliest chunk start seen, in epoch nanoseconds.
    #[must_use]
    pub fn start_nanos(&self) -> u64 {
        self.start_nanos
    }

    /// Latest chunk end seen, in epoch nanoseconds.
    #[must_use]
    pub fn end_nanos(&self) -> u64 {
        self.end_nanos
    }

    #[must_use]
    pub fn duration_nanos(&self) -> u64 {
        self.end_nanos.saturating_sub(self.start_nanos)
    }

    #[must_use]
    pub fn start_ticks(&self) -> u64 {
        self.start_ticks
    }

    #[must_use]
    pub fn chunk(&self) -> &ChunkHeader {
        &self.chunk
    }

    /// Changes whenever a new chunk replaces the chunk-scoped pools.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Convert a tick timestamp of the current chunk to epoch nanoseconds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn ticks_to_nanos(&self, ticks: u64) -> u64 {
        let per_second = self.chunk.ticks_per_second.max(1);
        let delta = i128::from(ticks) - i128::from(self.chunk.start_ticks);
        let nanos = delta * 1_000_000_000 / i128::from(per_second);
        (i128::from(self.chunk.start_nanos) + nanos).max(0) as u64
    }

    #[must_use]
    pub fn eof(&self) -> bool {
        matches!(self.state, ReaderState::Eof | ReaderState::Incomplete)
    }

    #[must_use]
    pub fn incomplete(&self) -> bool {
        self.state == ReaderState::Incomplete
    }

    /// Active settings seen so far.
    #[must_use]
    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    #[must_use]
    pub fn pools(&self) -> &ConstantPools {
        &self.pools
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn thread_name(&self, tid: u32) -> Option<&str> {
        self.pools.threads.get(&u64::from(tid)).map(String::as_str)
    }

    /// Value of an enum-typed constant.
    #[must_use]
    pub fn enum_value(&self, type_name: &str, key: u64) -> Option<&str> {
        self.pools
            .enums
            .get(type_name)?
            .get(&key)
            .map(String::as_str)
    }

    /// Key of an enum-typed constant by its value.
    #[must_use]
    pub fn enum_key(&self, type_name: &str, value: &str) -> Option<u64> {
        self.pools
            .enums
            .get(type_name)?
            .iter()
            .find(|(_, v)| v.as_str() == value)
            .map(|(k, _)| *k)
    }
}

/// First varlong of a payload, or 0 if it has none.
fn leading_varlong(bytes: &[u8]) -> u64 {
    let mut result = 0u64;
    for (i, &byte) in bytes.iter().take(9).enumerate() {
        if i == 8 {
            return result | (u64::from(byte) << 56);
        }
        result |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return result;
        }
    }
    result
}
