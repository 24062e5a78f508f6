//! # Shared Recording Format Definitions
//!
//! Constants and primitive encoders for the chunked recording format read by
//! `tickscope`. Everything here is `no_std` so that recorders, fixtures and
//! the reader agree on the same byte-level definitions.
//!
//! ## Layout Summary
//!
//! ```text
//! chunk := header(68 bytes) record*
//! record := varint(size) varint(type) payload
//! ```
//!
//! - Type `0` is the metadata record (type schema), type `1` a constant pool.
//! - `size` covers the whole record, including the size varint itself.
//! - Header fields are big-endian; everything inside records is varint
//!   encoded unless noted otherwise.

#![no_std]

// ============================================================================
// Chunk Header
// ============================================================================

/// Magic signature at the start of every chunk (`FLR\0`).
pub const CHUNK_MAGIC: [u8; 4] = *b"FLR\0";

/// Chunk magic as a big-endian integer, for fast comparison.
pub const CHUNK_SIGNATURE: u32 = 0x464c_5200;

/// Fixed size of the chunk header in bytes.
pub const CHUNK_HEADER_SIZE: usize = 68;

/// Lowest accepted major version (inclusive).
pub const MIN_MAJOR_VERSION: u16 = 2;

/// First rejected major version (exclusive upper bound).
pub const MAX_MAJOR_VERSION: u16 = 3;

/// Byte offsets of the header fields, relative to the chunk start.
pub mod header {
    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 4;
    pub const CHUNK_SIZE: usize = 8;
    pub const CONSTANT_POOL_OFFSET: usize = 16;
    pub const METADATA_OFFSET: usize = 24;
    pub const START_NANOS: usize = 32;
    pub const DURATION_NANOS: usize = 40;
    pub const START_TICKS: usize = 48;
    pub const TICKS_PER_SECOND: usize = 56;
    pub const FEATURES: usize = 64;
}

/// Bytes occupied by an embedded chunk header inside the
/// `jdk.types.ChunkHeader` constant pool.
pub const EMBEDDED_CHUNK_HEADER_SIZE: usize = CHUNK_HEADER_SIZE + 3;

// ============================================================================
// Record Types
// ============================================================================

/// Record type of the metadata (schema) record.
pub const RECORD_METADATA: u32 = 0;

/// Record type of a constant pool record.
pub const RECORD_CONSTANT_POOL: u32 = 1;

/// Record type observed when a chunk header is read as if it were a record:
/// the size byte is `'F'` and the type byte is `'L'`.
pub const RECORD_CHUNK_BOUNDARY: u32 = b'L' as u32;

// ============================================================================
// String Encodings
// ============================================================================

pub const STRING_NULL: u8 = 0;
pub const STRING_EMPTY: u8 = 1;
pub const STRING_CONSTANT_POOL: u8 = 2;
pub const STRING_UTF8: u8 = 3;
pub const STRING_CHAR_ARRAY: u8 = 4;
pub const STRING_LATIN1: u8 = 5;

// ============================================================================
// Frame Types
// ============================================================================

pub const FRAME_INTERPRETED: u8 = 0;
pub const FRAME_JIT_COMPILED: u8 = 1;
pub const FRAME_INLINED: u8 = 2;
pub const FRAME_NATIVE: u8 = 3;
pub const FRAME_CPP: u8 = 4;
pub const FRAME_KERNEL: u8 = 5;

// ============================================================================
// Well-Known Type Names
// ============================================================================

pub mod types {
    pub const CHUNK_HEADER: &str = "jdk.types.ChunkHeader";
    pub const THREAD: &str = "java.lang.Thread";
    pub const CLASS: &str = "java.lang.Class";
    pub const STRING: &str = "java.lang.String";
    pub const SYMBOL: &str = "jdk.types.Symbol";
    pub const METHOD: &str = "jdk.types.Method";
    pub const STACK_TRACE: &str = "jdk.types.StackTrace";
    pub const THREAD_STATE: &str = "jdk.types.ThreadState";
}

pub mod events {
    pub const EXECUTION_SAMPLE: &str = "jdk.ExecutionSample";
    pub const NATIVE_METHOD_SAMPLE: &str = "jdk.NativeMethodSample";
    pub const WALL_CLOCK_SAMPLE: &str = "profiler.WallClockSample";
    pub const ALLOCATION_IN_NEW_TLAB: &str = "jdk.ObjectAllocationInNewTLAB";
    pub const ALLOCATION_OUTSIDE_TLAB: &str = "jdk.ObjectAllocationOutsideTLAB";
    pub const ALLOCATION_SAMPLE: &str = "jdk.ObjectAllocationSample";
    pub const LIVE_OBJECT: &str = "profiler.LiveObject";
    pub const MONITOR_ENTER: &str = "jdk.JavaMonitorEnter";
    pub const THREAD_PARK: &str = "jdk.ThreadPark";
    pub const ACTIVE_SETTING: &str = "jdk.ActiveSetting";
    pub const CPU_LOAD: &str = "jdk.CPULoad";
    pub const GC_HEAP_SUMMARY: &str = "jdk.GCHeapSummary";
}

// ============================================================================
// Varint Encoding
// ============================================================================

/// Maximum encoded length of a varint (u32).
pub const MAX_VARINT_LEN: usize = 5;

/// Maximum encoded length of a varlong (u64): eight 7-bit groups plus one
/// full byte.
pub const MAX_VARLONG_LEN: usize = 9;

/// Encode a u32 as little-endian 7-bit groups with MSB continuation.
///
/// Returns the number of bytes written to `out`.
#[must_use]
pub fn encode_varint(mut value: u32, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut len = 0;
    loop {
        // Truncation intended: only the low 7 bits survive the mask
        #[allow(clippy::cast_possible_truncation)]
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out[len] = byte;
            return len + 1;
        }
        out[len] = byte | 0x80;
        len += 1;
    }
}

/// Encode a u64 in the varlong layout understood by the reader.
///
/// The first eight groups carry 7 bits each; if bits remain after that, the
/// ninth byte carries the top 8 bits verbatim.
#[must_use]
pub fn encode_varlong(mut value: u64, out: &mut [u8; MAX_VARLONG_LEN]) -> usize {
    for (len, slot) in out.iter_mut().enumerate().take(8) {
        #[allow(clippy::cast_possible_truncation)]
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            *slot = byte;
            return len + 1;
        }
        *slot = byte | 0x80;
    }
    #[allow(clippy::cast_possible_truncation)]
    let top = value as u8;
    out[8] = top;
    MAX_VARLONG_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_single_byte() {
        let mut out = [0u8; MAX_VARINT_LEN];
        assert_eq!(encode_varint(127, &mut out), 1);
        assert_eq!(out[0], 0x7f);
    }

    #[test]
    fn test_varint_two_bytes() {
        let mut out = [0u8; MAX_VARINT_LEN];
        assert_eq!(encode_varint(128, &mut out), 2);
        assert_eq!(&out[..2], &[0x80, 0x01]);
    }

    #[test]
    fn test_varlong_uses_full_ninth_byte() {
        let mut out = [0u8; MAX_VARLONG_LEN];
        assert_eq!(encode_varlong(u64::MAX, &mut out), MAX_VARLONG_LEN);
        assert_eq!(out[8], 0xff);
    }

    #[test]
    fn test_chunk_signature_matches_magic() {
        assert_eq!(u32::from_be_bytes(CHUNK_MAGIC), CHUNK_SIGNATURE);
    }
}
