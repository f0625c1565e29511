//! Sequential little-endian reader over an immutable byte slice.
//!
//! [`ByteCursor`] owns nothing but a borrowed buffer and an offset.  Every
//! primitive read advances the offset by the primitive's width; running off
//! the end is a [`DecodeError::UnexpectedEof`] and leaves the offset where it
//! was.
//!
//! # Strings
//!
//! Strings are `i32 length | utf8 bytes`.  A length that is negative or above
//! [`StringLimits::max_length`] means the stream is out of step: the cursor
//! moves one byte past where the bogus length started and tries again.  The
//! retry count is capped by [`StringLimits::max_resync`].
//!
//! The player name field has its own reader, [`ByteCursor::read_name`], which
//! tolerates an old writer bug where the name's length prefix undercounts.

use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

use crate::error::DecodeError;

/// Largest string length accepted before the cursor assumes it is out of step.
pub const STRING_LENGTH_LIMIT: i32 = 300;
/// Default cap on one-byte resync steps for a single string.
pub const DEFAULT_MAX_RESYNC: usize = 1024;
/// Values that end the player-name scan.
pub const NAME_SENTINELS: [i32; 3] = [5, 6, 8];

/// Bounds applied by [`ByteCursor::read_string`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringLimits {
    pub max_length: i32,
    pub max_resync: usize,
}

impl Default for StringLimits {
    fn default() -> Self {
        Self {
            max_length: STRING_LENGTH_LIMIT,
            max_resync: DEFAULT_MAX_RESYNC,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf:    &'a [u8],
    offset: usize,
    limits: StringLimits,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_limits(buf, StringLimits::default())
    }

    pub fn with_limits(buf: &'a [u8], limits: StringLimits) -> Self {
        Self { buf, offset: 0, limits }
    }

    pub fn offset(&self) -> usize { self.offset }
    pub fn len(&self) -> usize { self.buf.len() }
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }
    pub fn remaining(&self) -> usize { self.buf.len().saturating_sub(self.offset) }
    pub fn is_exhausted(&self) -> bool { self.remaining() == 0 }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.offset.checked_add(n).filter(|&end| end <= self.buf.len());
        match end {
            Some(end) => {
                let out = &self.buf[self.offset..end];
                self.offset = end;
                Ok(out)
            }
            None => Err(DecodeError::UnexpectedEof {
                offset: self.offset,
                needed: n,
                len:    self.buf.len(),
            }),
        }
    }

    /// Read an `i32` at an absolute position without moving.
    fn peek_i32_at(&self, pos: usize) -> Option<i32> {
        let end = pos.checked_add(4)?;
        self.buf.get(pos..end).map(LittleEndian::read_i32)
    }

    // ── Fixed width ─────────────────────────────────────────────────────────

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Read an `i32` element count; negative counts are rejected.
    pub fn read_count(&mut self, what: &'static str) -> Result<usize, DecodeError> {
        let offset = self.offset;
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| DecodeError::NegativeLength { what, len, offset })
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.take(n)
    }

    // ── Variable width ──────────────────────────────────────────────────────

    /// Read a length-prefixed string, resynchronising one byte at a time past
    /// implausible length prefixes.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.offset;
        for attempt in 0..=self.limits.max_resync {
            let len_at = self.offset;
            let len = self.read_i32()?;
            if (0..=self.limits.max_length).contains(&len) {
                if attempt > 0 {
                    warn!(start, resumed_at = len_at, skipped = attempt, "string length resynchronised");
                }
                let bytes = self.take(len as usize)?;
                return Ok(String::from_utf8_lossy(bytes).into_owned());
            }
            self.offset = len_at + 1;
        }
        Err(DecodeError::StringResyncExhausted {
            offset:   start,
            attempts: self.limits.max_resync + 1,
        })
    }

    /// Read the player name.
    ///
    /// The nominal length may be short.  Starting at the nominal end, each
    /// following 4-byte window is read as an `i32` until one equals a value in
    /// [`NAME_SENTINELS`]; the name runs up to that window.  If no sentinel is
    /// found before the buffer ends, the nominal length is used.
    pub fn read_name(&mut self) -> Result<String, DecodeError> {
        let len = self.read_count("name")?;
        let body = self.offset;
        let mut extra = 0usize;
        if len > 0 {
            loop {
                match self.peek_i32_at(body + len + extra) {
                    Some(v) if NAME_SENTINELS.contains(&v) => break,
                    Some(_) => extra += 1,
                    None => {
                        warn!(offset = body, len, "no sentinel after player name, using nominal length");
                        extra = 0;
                        break;
                    }
                }
            }
        }
        let bytes = self.take(len + extra)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}
