//! Error and notice response messages.

use crate::error::{Result, ServerError};
use crate::protocol::codec::read_cstr;

/// Parse error/notice fields from payload into a ServerError.
///
/// Unknown field types are skipped; the server may add new ones.
fn parse_fields(payload: &[u8]) -> Result<ServerError> {
    let mut err = ServerError::default();
    let mut data = payload;

    while !data.is_empty() && data[0] != 0 {
        let field_type = data[0];
        data = &data[1..];

        let (value, rest) = read_cstr(data)?;
        data = rest;

        let value = value.to_string();
        match field_type {
            b'S' => err.severity = Some(value),
            b'C' => err.code = Some(value),
            b'M' => err.message = Some(value),
            b'D' => err.detail = Some(value),
            b'H' => err.hint = Some(value),
            b'P' => err.position = Some(value),
            b'p' => err.internal_position = Some(value),
            b'q' => err.internal_query = Some(value),
            b'W' => err.where_ = Some(value),
            b'F' => err.file = Some(value),
            b'L' => err.line = Some(value),
            b'R' => err.routine = Some(value),
            _ => {}
        }
    }

    Ok(err)
}

/// ErrorResponse message: the current command failed.
#[derive(Debug, Clone)]
pub struct ErrorResponse(pub ServerError);

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(parse_fields(payload)?))
    }
}

/// NoticeResponse message: a non-fatal warning/info from the server.
#[derive(Debug, Clone)]
pub struct NoticeResponse(pub ServerError);

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self(parse_fields(payload)?))
    }
}
