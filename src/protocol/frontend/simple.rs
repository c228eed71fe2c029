//! Simple query protocol messages.

use crate::protocol::codec::MessageBuilder;

/// Write a Query message.
///
/// The query string may contain multiple SQL statements separated by
/// semicolons; each produces its own result.
pub fn write_query(buf: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(query);
    msg.finish();
}
