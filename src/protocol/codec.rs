//! Wire protocol encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers. Every
//! message carries a single leading code byte followed by a 4-byte length
//! inclusive of the length field itself; the startup message is the sole
//! message without a code byte.

use zerocopy::FromBytes;

use crate::error::{Error, Result};

use super::types::{I16Be, I32Be, U16Be, U32Be};

/// Read a 1-byte unsigned integer.
#[inline]
pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    if data.is_empty() {
        return Err(Error::Protocol("read_u8: empty buffer".into()));
    }
    Ok((data[0], &data[1..]))
}

/// Read a 2-byte big-endian signed integer.
#[inline]
pub fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    if data.len() < 2 {
        return Err(Error::Protocol(format!(
            "read_i16: buffer too short: {} < 2",
            data.len()
        )));
    }
    let value = I16Be::ref_from_bytes(&data[..2])
        .map_err(|e| Error::Protocol(format!("read_i16: {e:?}")))?
        .get();
    Ok((value, &data[2..]))
}

/// Read a 2-byte big-endian unsigned integer.
#[inline]
pub fn read_u16(data: &[u8]) -> Result<(u16, &[u8])> {
    if data.len() < 2 {
        return Err(Error::Protocol(format!(
            "read_u16: buffer too short: {} < 2",
            data.len()
        )));
    }
    let value = U16Be::ref_from_bytes(&data[..2])
        .map_err(|e| Error::Protocol(format!("read_u16: {e:?}")))?
        .get();
    Ok((value, &data[2..]))
}

/// Read a 4-byte big-endian signed integer.
#[inline]
pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    if data.len() < 4 {
        return Err(Error::Protocol(format!(
            "read_i32: buffer too short: {} < 4",
            data.len()
        )));
    }
    let value = I32Be::ref_from_bytes(&data[..4])
        .map_err(|e| Error::Protocol(format!("read_i32: {e:?}")))?
        .get();
    Ok((value, &data[4..]))
}

/// Read a 4-byte big-endian unsigned integer.
#[inline]
pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < 4 {
        return Err(Error::Protocol(format!(
            "read_u32: buffer too short: {} < 4",
            data.len()
        )));
    }
    let value = U32Be::ref_from_bytes(&data[..4])
        .map_err(|e| Error::Protocol(format!("read_u32: {e:?}")))?
        .get();
    Ok((value, &data[4..]))
}

/// Read a fixed number of raw bytes.
#[inline]
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::Protocol(format!(
            "read_bytes: buffer too short: {} < {}",
            data.len(),
            len
        )));
    }
    Ok((&data[..len], &data[len..]))
}

/// Read a null-terminated string (PostgreSQL String type).
/// Returns the bytes without the terminator and the remaining data.
#[inline]
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    match memchr::memchr(0, data) {
        Some(pos) => Ok((&data[..pos], &data[pos + 1..])),
        None => Err(Error::Protocol(
            "read_cstring: no null terminator found".into(),
        )),
    }
}

/// Read a null-terminated string as &str.
#[inline]
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::basic::from_utf8(bytes)
        .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Message builder that handles the length field.
///
/// Message format:
/// - Code byte (1 byte), not included in the length
/// - Length (4 bytes), includes itself
/// - Payload (length - 4 bytes)
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start building a message with a code byte.
    pub fn new(buf: &'a mut Vec<u8>, code: u8) -> Self {
        buf.push(code);
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]); // length placeholder
        Self { buf, start }
    }

    /// Start building the startup message (no code byte).
    pub fn new_startup(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]); // length placeholder
        Self { buf, start }
    }

    /// Write a u8.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write a big-endian i16.
    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a big-endian i32.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Write a null-terminated string.
    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Finish the message and backpatch the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}
