//! Constant pool decoding
//!
//! Pools resolve the ids that events carry (threads, stack traces) and the
//! ids that stack traces carry (methods, classes, symbols). Classes, methods,
//! strings and stack traces are only valid inside the chunk that declared
//! them; threads and symbols are kept for the lifetime of the reader.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek};
use std::ops::Range;

use log::debug;
use tickscope_common::{types, EMBEDDED_CHUNK_HEADER_SIZE, STRING_UTF8};

use crate::domain::FormatError;
use crate::jfr::cursor::BinaryCursor;
use crate::jfr::metadata::{JfrClass, JfrField, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassRef {
    pub name: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodRef {
    pub class: u64,
    pub name: u64,
    pub sig: u64,
}

/// Raw stack trace as recorded: leaf frame first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackTrace {
    pub methods: Vec<u64>,
    pub types: Vec<u8>,
    /// `line << 16 | bci & 0xffff`
    pub locations: Vec<u32>,
    pub truncated: bool,
}

impl StackTrace {
    #[must_use]
    pub fn depth(&self) -> usize {
        self.methods.len()
    }

    /// Line number of frame `i`, if the recorder captured one.
    #[must_use]
    pub fn line(&self, i: usize) -> Option<u32> {
        self.locations.get(i).map(|l| l >> 16).filter(|&l| l != 0)
    }
}

#[derive(Debug, Default)]
pub struct ConstantPools {
    pub threads: HashMap<u64, String>,
    pub symbols: HashMap<u64, Vec<u8>>,
    pub classes: HashMap<u64, ClassRef>,
    pub methods: HashMap<u64, MethodRef>,
    pub strings: HashMap<u64, String>,
    pub stack_traces: HashMap<u64, StackTrace>,
    /// Enum-like simple types: type name -> key -> value
    pub enums: HashMap<String, HashMap<u64, String>>,
}

impl ConstantPools {
    /// Drop the pools that are scoped to a single chunk.
    pub fn clear_chunk_scoped(&mut self) {
        self.classes.clear();
        self.methods.clear();
        self.strings.clear();
        self.stack_traces.clear();
    }

    /// Symbol bytes decoded as text.
    #[must_use]
    pub fn symbol(&self, id: u64) -> Option<String> {
        self.symbols
            .get(&id)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Read the constant pool chain starting at `offset`.
///
/// Each pool record carries a delta to the previous one; a zero delta ends
/// the chain. Every record must lie inside `chunk` and be visited once.
///
/// # Errors
/// Returns an error on an undeclared pool type, malformed entries, or a
/// chain that leaves the chunk or loops
pub fn read_constant_pools<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    schema: &Schema,
    pools: &mut ConstantPools,
    chunk: Range<u64>,
    mut offset: u64,
) -> Result<(), FormatError> {
    let mut visited = HashSet::new();
    loop {
        if !chunk.contains(&offset) {
            return Err(FormatError::InvalidFormat(format!(
                "constant pool offset {offset} outside chunk {}..{}",
                chunk.start, chunk.end
            )));
        }
        if !visited.insert(offset) {
            return Err(FormatError::InvalidFormat(format!(
                "constant pool chain loops back to offset {offset}"
            )));
        }
        cursor.seek(offset)?;
        cursor.varint()?; // size
        cursor.varint()?; // type
        cursor.varlong()?; // start
        cursor.varlong()?; // duration
        let delta = cursor.varlong()?;
        cursor.varint()?; // flush
        let pool_count = cursor.varint()?;
        for _ in 0..pool_count {
            let type_id = u64::from(cursor.varint()?);
            let class = schema.pool_type(type_id).ok_or_else(|| {
                FormatError::InvalidFormat(format!("constant pool for undeclared type {type_id}"))
            })?;
            read_constants(cursor, schema, pools, class)?;
        }
        if delta == 0 {
            return Ok(());
        }
        // Deltas are signed; two's complement addition walks backwards
        offset = offset.wrapping_add(delta);
    }
}

fn read_constants<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    schema: &Schema,
    pools: &mut ConstantPools,
    class: &JfrClass,
) -> Result<(), FormatError> {
    match class.name.as_str() {
        types::CHUNK_HEADER => cursor.skip(EMBEDDED_CHUNK_HEADER_SIZE as u64),
        types::THREAD => read_threads(cursor, pools, class.fields.len()),
        types::CLASS => read_classes(cursor, pools, class.fields.len()),
        types::STRING => read_strings(cursor, pools),
        types::SYMBOL => read_symbols(cursor, pools),
        types::METHOD => read_methods(cursor, pools),
        types::STACK_TRACE => read_stack_traces(cursor, pools),
        _ if class.simple_type && class.fields.len() == 1 => {
            read_enum_values(cursor, pools, &class.name)
        }
        _ => read_other_constants(cursor, schema, pools, &class.fields),
    }
}

fn skip_varlongs<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    count: usize,
) -> Result<(), FormatError> {
    for _ in 0..count {
        cursor.varlong()?;
    }
    Ok(())
}

fn read_threads<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    pools: &mut ConstantPools,
    field_count: usize,
) -> Result<(), FormatError> {
    let count = cursor.varint()?;
    for _ in 0..count {
        let id = cursor.varlong()?;
        let os_name = cursor.string(&pools.strings)?;
        cursor.varint()?; // os thread id
        let java_name = cursor.string(&pools.strings)?;
        cursor.varlong()?; // java thread id
        skip_varlongs(cursor, field_count.saturating_sub(4))?;
        let name = java_name.or(os_name).unwrap_or_default();
        pools.threads.insert(id, name);
    }
    Ok(())
}

fn read_classes<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    pools: &mut ConstantPools,
    field_count: usize,
) -> Result<(), FormatError> {
    let count = cursor.varint()?;
    for _ in 0..count {
        let id = cursor.varlong()?;
        cursor.varlong()?; // loader
        let name = cursor.varlong()?;
        cursor.varlong()?; // package
        cursor.varint()?; // modifiers
        skip_varlongs(cursor, field_count.saturating_sub(4))?;
        pools.classes.insert(id, ClassRef { name });
    }
    Ok(())
}

fn read_methods<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    pools: &mut ConstantPools,
) -> Result<(), FormatError> {
    let count = cursor.varint()?;
    for _ in 0..count {
        let id = cursor.varlong()?;
        let class = cursor.varlong()?;
        let name = cursor.varlong()?;
        let sig = cursor.varlong()?;
        cursor.varint()?; // modifiers
        cursor.varint()?; // hidden
        pools.methods.insert(id, MethodRef { class, name, sig });
    }
    Ok(())
}

fn read_stack_traces<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    pools: &mut ConstantPools,
) -> Result<(), FormatError> {
    let count = cursor.varint()?;
    for _ in 0..count {
        let id = cursor.varlong()?;
        let truncated = cursor.varint()? != 0;
        let depth = cursor.varint()?;
        let depth = cursor.bounded_count(u64::from(depth), "stack depth")?;
        let mut trace = StackTrace {
            methods: Vec::with_capacity(depth),
            types: Vec::with_capacity(depth),
            locations: Vec::with_capacity(depth),
            truncated,
        };
        for _ in 0..depth {
            trace.methods.push(cursor.varlong()?);
            let line = cursor.varint()?;
            let bci = cursor.varint()?;
            trace.locations.push((line << 16) | (bci & 0xffff));
            trace.types.push(cursor.u8()?);
        }
        pools.stack_traces.insert(id, trace);
    }
    Ok(())
}

fn read_strings<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    pools: &mut ConstantPools,
) -> Result<(), FormatError> {
    let count = cursor.varint()?;
    for _ in 0..count {
        let id = cursor.varlong()?;
        let value = cursor.string(&pools.strings)?.unwrap_or_default();
        pools.strings.insert(id, value);
    }
    Ok(())
}

fn read_symbols<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    pools: &mut ConstantPools,
) -> Result<(), FormatError> {
    let count = cursor.varint()?;
    for _ in 0..count {
        let id = cursor.varlong()?;
        let tag = cursor.u8()?;
        if tag != STRING_UTF8 {
            return Err(FormatError::MalformedEncoding(format!(
                "symbol {id} uses string encoding {tag}, expected UTF-8"
            )));
        }
        pools.symbols.insert(id, cursor.bytes()?);
    }
    Ok(())
}

fn read_enum_values<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    pools: &mut ConstantPools,
    type_name: &str,
) -> Result<(), FormatError> {
    let count = cursor.varint()?;
    let count = cursor.bounded_count(u64::from(count), "enum value count")?;
    let mut values = HashMap::with_capacity(count);
    for _ in 0..count {
        let key = cursor.varlong()?;
        let value = cursor.string(&pools.strings)?.unwrap_or_default();
        values.insert(key, value);
    }
    debug!("Enum {type_name}: {} values", values.len());
    pools.enums.entry(type_name.to_string()).or_default().extend(values);
    Ok(())
}

/// Walk past a pool the reader has no use for. String-typed inline fields
/// are read as strings, everything else as a varlong.
fn read_other_constants<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    schema: &Schema,
    pools: &ConstantPools,
    fields: &[JfrField],
) -> Result<(), FormatError> {
    let string_type = schema.type_id(types::STRING);
    let numeric: Vec<bool> = fields
        .iter()
        .map(|f| f.constant_pool || Some(f.type_id) != string_type)
        .collect();

    let count = cursor.varint()?;
    for _ in 0..count {
        cursor.varlong()?; // id
        for &is_numeric in &numeric {
            if is_numeric {
                cursor.varlong()?;
            } else {
                cursor.string(&pools.strings)?;
            }
        }
    }
    Ok(())
}
