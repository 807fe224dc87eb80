//! Bounds-checked, endian-aware access to raw image bytes.
//!
//! [`ByteStream`] reads fixed-width fields at absolute offsets and never
//! panics: every read past the end yields [`OutOfBounds`], which parsers tag
//! with the stage they were in via [`StageExt::stage`]. [`ByteWriter`] is the
//! mirror image used by builders; writes past the end grow the buffer.

use crate::core::binary::Endianness;
use crate::error::{ParseError, ParseStage};
use std::ops::Range;
use thiserror::Error;

/// A read that does not fit in the underlying buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("read of {length} bytes at {offset:#x} exceeds buffer of {size} bytes")]
pub struct OutOfBounds {
    pub offset: u64,
    pub length: u64,
    pub size: u64,
}

impl OutOfBounds {
    pub fn during(self, stage: ParseStage) -> ParseError {
        ParseError::TruncatedData {
            stage,
            offset: self.offset,
            needed: self.length,
        }
    }
}

pub type StreamResult<T> = std::result::Result<T, OutOfBounds>;

/// Attach a parse stage to a stream failure.
pub trait StageExt<T> {
    fn stage(self, stage: ParseStage) -> Result<T, ParseError>;
}

impl<T> StageExt<T> for StreamResult<T> {
    fn stage(self, stage: ParseStage) -> Result<T, ParseError> {
        self.map_err(|e| e.during(stage))
    }
}

/// Read-only view over an input buffer.
#[derive(Debug, Clone, Copy)]
pub struct ByteStream<'a> {
    data: &'a [u8],
}

macro_rules! read_int {
    ($name:ident, $ty:ty, $n:expr) => {
        pub fn $name(&self, offset: u64, endian: Endianness) -> StreamResult<$ty> {
            let bytes = self.read(offset, $n)?;
            let mut raw = [0u8; $n];
            raw.copy_from_slice(bytes);
            Ok(match endian {
                Endianness::Little => <$ty>::from_le_bytes(raw),
                Endianness::Big => <$ty>::from_be_bytes(raw),
            })
        }
    };
}

impl<'a> ByteStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &'a [u8] {
        self.data
    }

    fn range(&self, offset: u64, length: u64) -> StreamResult<Range<usize>> {
        let err = OutOfBounds {
            offset,
            length,
            size: self.len(),
        };
        let end = offset.checked_add(length).ok_or(err)?;
        if end > self.len() {
            return Err(err);
        }
        Ok(offset as usize..end as usize)
    }

    /// Borrow `length` bytes starting at `offset`.
    pub fn read(&self, offset: u64, length: u64) -> StreamResult<&'a [u8]> {
        let range = self.range(offset, length)?;
        Ok(&self.data[range])
    }

    /// Same as [`read`](Self::read) but yields a sub-stream whose offsets start at zero.
    pub fn slice(&self, offset: u64, length: u64) -> StreamResult<ByteStream<'a>> {
        self.read(offset, length).map(ByteStream::new)
    }

    pub fn read_u8(&self, offset: u64) -> StreamResult<u8> {
        Ok(self.read(offset, 1)?[0])
    }

    read_int!(read_u16, u16, 2);
    read_int!(read_u32, u32, 4);
    read_int!(read_u64, u64, 8);
    read_int!(read_i32, i32, 4);
    read_int!(read_i64, i64, 8);

    /// Read a pointer-sized field: 8 bytes when `wide`, otherwise 4 zero-extended.
    pub fn read_word(&self, offset: u64, wide: bool, endian: Endianness) -> StreamResult<u64> {
        if wide {
            self.read_u64(offset, endian)
        } else {
            self.read_u32(offset, endian).map(u64::from)
        }
    }

    /// Bytes from `offset` up to (not including) the next NUL, scanning at most
    /// `max_len` bytes. An unterminated run stops at `max_len` or the end.
    pub fn read_cstr(&self, offset: u64, max_len: u64) -> StreamResult<&'a [u8]> {
        if offset >= self.len() {
            return Err(OutOfBounds {
                offset,
                length: 1,
                size: self.len(),
            });
        }
        let available = (self.len() - offset).min(max_len);
        let window = self.read(offset, available)?;
        let end = memchr::memchr(0, window).unwrap_or(window.len());
        Ok(&window[..end])
    }
}

/// Growable output buffer with positioned, endian-aware writes.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

macro_rules! write_int {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, offset: u64, value: $ty, endian: Endianness) {
            let bytes = match endian {
                Endianness::Little => value.to_le_bytes(),
                Endianness::Big => value.to_be_bytes(),
            };
            self.write_bytes(offset, &bytes);
        }
    };
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing bytes, typically a copy of the parsed input.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    pub fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Truncate or zero-extend to exactly `len` bytes.
    pub fn resize(&mut self, len: u64) {
        self.buf.resize(len as usize, 0);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_bytes(&mut self, offset: u64, bytes: &[u8]) {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[start..end].copy_from_slice(bytes);
    }

    pub fn write_u8(&mut self, offset: u64, value: u8) {
        self.write_bytes(offset, &[value]);
    }

    write_int!(write_u16, u16);
    write_int!(write_u32, u32);
    write_int!(write_u64, u64);
    write_int!(write_i32, i32);
    write_int!(write_i64, i64);

    pub fn write_word(&mut self, offset: u64, value: u64, wide: bool, endian: Endianness) {
        if wide {
            self.write_u64(offset, value, endian);
        } else {
            self.write_u32(offset, value as u32, endian);
        }
    }

    /// Overwrite `range` with `byte`, clamped to the current length.
    pub fn fill(&mut self, range: Range<u64>, byte: u8) {
        let end = (range.end as usize).min(self.buf.len());
        let start = (range.start as usize).min(end);
        self.buf[start..end].fill(byte);
    }

    /// Append bytes at the end, returning the offset they landed at.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> u64 {
        let at = self.len();
        self.buf.extend_from_slice(bytes);
        at
    }
}
