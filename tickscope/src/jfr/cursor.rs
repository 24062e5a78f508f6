//! Buffered binary cursor with varint decoding
//!
//! The cursor reads a seekable source through a growable buffer and keeps
//! two positions apart:
//!
//! ```text
//!   file_position          file_position + pos     file_position + limit
//!        │                          │                        │
//!        ▼                          ▼                        ▼
//!  buf: [ already consumed bytes    | unread bytes            ]
//! ```
//!
//! `seek` inside the buffered window only moves `pos`. Seeking elsewhere
//! drops the buffer and repositions the source. `ensure` compacts unread
//! bytes to the front and refills until enough bytes are buffered or the
//! source reaches EOF.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use tickscope_common::{
    STRING_CHAR_ARRAY, STRING_CONSTANT_POOL, STRING_EMPTY, STRING_LATIN1, STRING_NULL, STRING_UTF8,
};

use crate::domain::FormatError;

/// Default buffer capacity (2 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 2 * 1024 * 1024;

pub struct BinaryCursor<R> {
    source: R,
    buf: Vec<u8>,
    /// Read position inside `buf`
    pos: usize,
    /// Number of valid bytes in `buf`
    limit: usize,
    /// File offset of `buf[0]`
    file_position: u64,
    file_size: u64,
}

impl<R: Read + Seek> BinaryCursor<R> {
    /// Wrap a source with the default buffer size.
    ///
    /// # Errors
    /// Returns an error if the source size cannot be determined
    pub fn new(source: R) -> Result<Self, FormatError> {
        Self::with_capacity(source, DEFAULT_BUFFER_SIZE)
    }

    /// Wrap a source with an explicit initial buffer size.
    ///
    /// # Errors
    /// Returns an error if the source size cannot be determined
    pub fn with_capacity(mut source: R, capacity: usize) -> Result<Self, FormatError> {
        let file_size = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        Ok(Self {
            source,
            buf: vec![0; capacity.max(1)],
            pos: 0,
            limit: 0,
            file_position: 0,
            file_size,
        })
    }

    /// Total size of the underlying source in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Logical file offset of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.file_position + self.pos as u64
    }

    /// Offset of the read position inside the buffer.
    pub fn buffer_position(&self) -> usize {
        self.pos
    }

    /// Number of buffered bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }

    /// Current buffer capacity (grows, never shrinks).
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Move the read position to an absolute file offset.
    ///
    /// # Errors
    /// Returns an error if the source cannot be repositioned
    pub fn seek(&mut self, offset: u64) -> Result<(), FormatError> {
        if offset >= self.file_position && offset - self.file_position <= self.limit as u64 {
            #[allow(clippy::cast_possible_truncation)]
            {
                self.pos = (offset - self.file_position) as usize;
            }
            return Ok(());
        }
        self.source.seek(SeekFrom::Start(offset))?;
        self.file_position = offset;
        self.pos = 0;
        self.limit = 0;
        Ok(())
    }

    /// Make sure at least `needed` unread bytes are buffered.
    ///
    /// Returns `Ok(false)` only when nothing at all is left to read; a short
    /// buffer at the end of the source still returns `Ok(true)`.
    ///
    /// # Errors
    /// Returns an error if the source read fails
    pub fn ensure(&mut self, needed: usize) -> Result<bool, FormatError> {
        if self.remaining() >= needed {
            return Ok(true);
        }

        // Compact unread bytes to the front
        self.file_position += self.pos as u64;
        self.buf.copy_within(self.pos..self.limit, 0);
        self.limit -= self.pos;
        self.pos = 0;

        // Never grow past what the source can still deliver
        let available = usize::try_from(self.file_size.saturating_sub(self.file_position))
            .unwrap_or(usize::MAX);
        let wanted = needed.min(available);
        if self.buf.len() < wanted {
            self.buf.resize(wanted, 0);
        }

        while self.limit < wanted {
            let read = self.source.read(&mut self.buf[self.limit..])?;
            if read == 0 {
                break;
            }
            self.limit += read;
        }

        Ok(self.limit > 0)
    }

    /// Like [`ensure`](Self::ensure) but fails when fewer than `needed`
    /// bytes exist.
    fn require(&mut self, needed: usize) -> Result<(), FormatError> {
        self.ensure(needed)?;
        if self.remaining() < needed {
            return Err(FormatError::InvalidFormat(format!(
                "unexpected end of data at offset {} (needed {needed} bytes)",
                self.position()
            )));
        }
        Ok(())
    }

    /// Validate a count or length read from the data before anything is
    /// allocated for it. Every counted item takes at least one byte, so a
    /// count larger than the bytes left in the source cannot be genuine.
    ///
    /// # Errors
    /// Returns [`FormatError::InvalidFormat`] when `count` exceeds the
    /// remaining bytes
    pub fn bounded_count(&self, count: u64, what: &str) -> Result<usize, FormatError> {
        let left = self.file_size.saturating_sub(self.position());
        if count > left {
            return Err(FormatError::InvalidFormat(format!(
                "{what} {count} at offset {} exceeds the {left} bytes left",
                self.position()
            )));
        }
        usize::try_from(count).map_err(|_| {
            FormatError::InvalidFormat(format!("{what} {count} does not fit in memory"))
        })
    }

    /// Peek a big-endian u32 at a buffer offset without moving.
    pub fn peek_u32_at(&self, buf_offset: usize) -> Option<u32> {
        let bytes = self.buf.get(buf_offset..buf_offset + 4)?;
        if buf_offset + 4 > self.limit {
            return None;
        }
        Some(u32::from_be_bytes(bytes.try_into().ok()?))
    }

    /// Peek a big-endian u64 at a buffer offset without moving.
    pub fn peek_u64_at(&self, buf_offset: usize) -> Option<u64> {
        let bytes = self.buf.get(buf_offset..buf_offset + 8)?;
        if buf_offset + 8 > self.limit {
            return None;
        }
        Some(u64::from_be_bytes(bytes.try_into().ok()?))
    }

    /// Number of valid buffered bytes from a buffer offset to the limit.
    pub fn buffered_from(&self, buf_offset: usize) -> usize {
        self.limit.saturating_sub(buf_offset)
    }

    /// Read one raw byte.
    ///
    /// # Errors
    /// Returns an error at end of data
    pub fn u8(&mut self) -> Result<u8, FormatError> {
        self.require(1)?;
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Skip `count` bytes.
    ///
    /// # Errors
    /// Returns an error if the source cannot be repositioned
    pub fn skip(&mut self, count: u64) -> Result<(), FormatError> {
        let target = self.position() + count;
        self.seek(target)
    }

    /// Decode an unsigned 32-bit varint.
    ///
    /// # Errors
    /// Returns an error at end of data
    pub fn varint(&mut self) -> Result<u32, FormatError> {
        let mut result: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.u8()?;
            if shift < 32 {
                result |= u32::from(byte & 0x7f) << shift;
            }
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Decode an unsigned 64-bit varlong (at most nine bytes).
    ///
    /// # Errors
    /// Returns an error at end of data
    pub fn varlong(&mut self) -> Result<u64, FormatError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        while shift < 56 {
            let byte = self.u8()?;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Ok(result | u64::from(self.u8()?) << 56)
    }

    /// Read a big-endian f32.
    ///
    /// # Errors
    /// Returns an error at end of data
    pub fn f32(&mut self) -> Result<f32, FormatError> {
        self.require(4)?;
        let bytes: [u8; 4] = self.buf[self.pos..self.pos + 4].try_into().map_err(|_| {
            FormatError::InvalidFormat("short f32".to_string())
        })?;
        self.pos += 4;
        Ok(f32::from_be_bytes(bytes))
    }

    /// Read a big-endian f64.
    ///
    /// # Errors
    /// Returns an error at end of data
    pub fn f64(&mut self) -> Result<f64, FormatError> {
        self.require(8)?;
        let bytes: [u8; 8] = self.buf[self.pos..self.pos + 8].try_into().map_err(|_| {
            FormatError::InvalidFormat("short f64".to_string())
        })?;
        self.pos += 8;
        Ok(f64::from_be_bytes(bytes))
    }

    /// Read a varint length followed by that many raw bytes.
    ///
    /// # Errors
    /// Returns an error at end of data
    pub fn bytes(&mut self) -> Result<Vec<u8>, FormatError> {
        let len = self.varint()?;
        let len = self.bounded_count(u64::from(len), "byte length")?;
        self.take(len)
    }

    /// Read exactly `len` raw bytes.
    ///
    /// # Errors
    /// Returns an error at end of data
    pub fn take(&mut self, len: usize) -> Result<Vec<u8>, FormatError> {
        self.require(len)?;
        let bytes = self.buf[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(bytes)
    }

    /// Decode a tagged string.
    ///
    /// Tag `2` looks the id up in `interned`; an unknown id decodes as
    /// `None`, like a null string.
    ///
    /// # Errors
    /// Returns [`FormatError::MalformedEncoding`] for unknown tags
    pub fn string(&mut self, interned: &HashMap<u64, String>) -> Result<Option<String>, FormatError> {
        let tag = self.u8()?;
        match tag {
            STRING_NULL => Ok(None),
            STRING_EMPTY => Ok(Some(String::new())),
            STRING_CONSTANT_POOL => {
                let id = self.varlong()?;
                Ok(interned.get(&id).cloned())
            }
            STRING_UTF8 => {
                let bytes = self.bytes()?;
                String::from_utf8(bytes)
                    .map(Some)
                    .map_err(|e| FormatError::MalformedEncoding(format!("invalid UTF-8: {e}")))
            }
            STRING_CHAR_ARRAY => {
                let len = self.varint()?;
                let len = self.bounded_count(u64::from(len), "char array length")?;
                let mut units = Vec::with_capacity(len);
                for _ in 0..len {
                    // Code units are 16 bits wide; higher bits are dropped
                    #[allow(clippy::cast_possible_truncation)]
                    units.push(self.varint()? as u16);
                }
                Ok(Some(String::from_utf16_lossy(&units)))
            }
            STRING_LATIN1 => {
                let bytes = self.bytes()?;
                Ok(Some(bytes.iter().map(|&b| char::from(b)).collect()))
            }
            other => Err(FormatError::MalformedEncoding(format!(
                "unknown string encoding tag {other} at offset {}",
                self.position() - 1
            ))),
        }
    }
}
