//! Extended query protocol messages.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};

/// Write a Parse message to create a prepared statement.
///
/// - `name`: statement name (empty for the unnamed statement)
/// - `query`: SQL with $1, $2, ... placeholders
/// - `param_oids`: parameter type OIDs (0 = let the server infer)
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_i32(oid as i32);
    }
    msg.finish();
}

/// Write a Bind message carrying text-format parameter values.
///
/// One format code covers all parameters (text) and one covers all result
/// columns (text). `None` values are encoded with length -1 and no payload.
pub fn write_bind(buf: &mut Vec<u8>, portal: &str, statement: &str, values: &[Option<Vec<u8>>]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);

    msg.write_cstr(portal);
    msg.write_cstr(statement);

    // One parameter format code applying to all parameters: text.
    msg.write_i16(1);
    msg.write_i16(FormatCode::Text as i16);

    msg.write_i16(values.len() as i16);
    for value in values {
        match value {
            Some(bytes) => {
                msg.write_i32(bytes.len() as i32);
                msg.write_bytes(bytes);
            }
            None => msg.write_i32(-1),
        }
    }

    // One result format code applying to all columns: text.
    msg.write_i16(1);
    msg.write_i16(FormatCode::Text as i16);

    msg.finish();
}

/// Write an Execute message to run a portal.
///
/// `max_rows` of 0 means all rows.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: i32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows);
    msg.finish();
}

/// Write a Describe message: `describe_type` is b'S' or b'P'.
pub fn write_describe(buf: &mut Vec<u8>, describe_type: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(describe_type);
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Describe message for a portal.
pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    write_describe(buf, b'P', name);
}

/// Write a Close message: `close_type` is b'S' or b'P'.
pub fn write_close(buf: &mut Vec<u8>, close_type: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::CLOSE);
    msg.write_u8(close_type);
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Close message for a prepared statement.
pub fn write_close_statement(buf: &mut Vec<u8>, name: &str) {
    write_close(buf, b'S', name);
}

/// Write a Close message for a portal.
pub fn write_close_portal(buf: &mut Vec<u8>, name: &str) {
    write_close(buf, b'P', name);
}

/// Write a Sync message.
///
/// Ends an extended-protocol operation; the server replies with
/// ReadyForQuery once it has processed everything up to this point.
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::SYNC);
    msg.finish();
}

/// Write a Flush message, forcing the server to deliver pending responses
/// without ending the operation.
pub fn write_flush(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, super::msg_type::FLUSH);
    msg.finish();
}
