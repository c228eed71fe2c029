//! Query response backend messages.

use zerocopy::FromBytes;

use crate::error::{Error, Result};
use crate::protocol::codec::{read_cstr, read_i16, read_i32, read_u16, read_u32};
use crate::protocol::types::{FormatCode, Oid, U16Be};

/// One field within a RowDescription.
#[derive(Debug, Clone)]
pub struct FieldDescription<'a> {
    /// Field name
    pub name: &'a str,
    /// Data type OID
    pub type_oid: Oid,
    /// Wire format of values in this column
    pub format: FormatCode,
}

/// RowDescription message: the columns of the result that follows.
#[derive(Debug)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    /// Parse a RowDescription message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(Error::Protocol("RowDescription: truncated header".into()));
        }
        let head = U16Be::ref_from_bytes(&payload[..2])
            .map_err(|e| Error::Protocol(format!("RowDescription header: {e:?}")))?;

        let num_fields = head.get() as usize;
        let mut fields = Vec::with_capacity(num_fields);
        let mut data = &payload[2..];

        for _ in 0..num_fields {
            let (name, rest) = read_cstr(data)?;
            let (_table_oid, rest) = read_u32(rest)?;
            let (_column_id, rest) = read_i16(rest)?;
            let (type_oid, rest) = read_u32(rest)?;
            let (_type_size, rest) = read_i16(rest)?;
            let (_type_modifier, rest) = read_i32(rest)?;
            let (format_code, rest) = read_u16(rest)?;

            let format = FormatCode::from_u16(format_code).ok_or_else(|| {
                Error::Protocol(format!("unsupported field format: {format_code}"))
            })?;

            fields.push(FieldDescription {
                name,
                type_oid,
                format,
            });

            data = rest;
        }

        Ok(Self { fields })
    }

    /// Get the field descriptions.
    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }
}

/// DataRow message: a single row of column values.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    num_columns: u16,
    columns_data: &'a [u8],
}

impl<'a> DataRow<'a> {
    /// Parse a DataRow message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(Error::Protocol("DataRow: truncated header".into()));
        }
        let head = U16Be::ref_from_bytes(&payload[..2])
            .map_err(|e| Error::Protocol(format!("DataRow header: {e:?}")))?;

        Ok(Self {
            num_columns: head.get(),
            columns_data: &payload[2..],
        })
    }

    /// Number of columns in the row.
    pub fn len(&self) -> usize {
        self.num_columns as usize
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.num_columns == 0
    }

    /// Iterate over column values; `None` is SQL NULL.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining: self.columns_data,
        }
    }
}

/// Iterator over the column values of a DataRow.
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Option<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.len() < 4 {
            return None;
        }

        let len = i32::from_be_bytes([
            self.remaining[0],
            self.remaining[1],
            self.remaining[2],
            self.remaining[3],
        ]);
        self.remaining = &self.remaining[4..];

        if len == -1 {
            Some(None)
        } else {
            let len = len as usize;
            if self.remaining.len() < len {
                return None;
            }
            let value = &self.remaining[..len];
            self.remaining = &self.remaining[len..];
            Some(Some(value))
        }
    }
}

/// CommandComplete message: a command finished, with its tag.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    /// Command tag, e.g. "SELECT 5", "INSERT 0 1", "COPY 3"
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    /// Parse a CommandComplete message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Rows affected, taken from the last whitespace token of the tag.
    ///
    /// Returns `None` for tags that carry no count (e.g. "BEGIN").
    pub fn rows_affected(&self) -> Option<u64> {
        self.tag.split_whitespace().next_back()?.parse().ok()
    }
}

/// EmptyQueryResponse message: response to an empty query string.
#[derive(Debug, Clone, Copy)]
pub struct EmptyQueryResponse;

impl EmptyQueryResponse {
    /// Parse an EmptyQueryResponse message from payload bytes.
    pub fn parse(_payload: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_description_payload(fields: &[(&str, u32, u16)]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(fields.len() as u16).to_be_bytes());
        for (name, oid, format) in fields {
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            buf.extend_from_slice(&0u32.to_be_bytes()); // table oid
            buf.extend_from_slice(&0i16.to_be_bytes()); // column id
            buf.extend_from_slice(&oid.to_be_bytes());
            buf.extend_from_slice(&(-1i16).to_be_bytes()); // size
            buf.extend_from_slice(&(-1i32).to_be_bytes()); // modifier
            buf.extend_from_slice(&format.to_be_bytes());
        }
        buf
    }

    #[test]
    fn test_row_description() {
        let payload = row_description_payload(&[("id", 23, 0), ("name", 25, 1)]);
        let desc = RowDescription::parse(&payload).unwrap();

        assert_eq!(desc.fields().len(), 2);
        assert_eq!(desc.fields()[0].name, "id");
        assert_eq!(desc.fields()[0].type_oid, 23);
        assert_eq!(desc.fields()[0].format, FormatCode::Text);
        assert_eq!(desc.fields()[1].format, FormatCode::Binary);
    }

    #[test]
    fn test_row_description_bad_format() {
        let payload = row_description_payload(&[("id", 23, 7)]);
        assert!(RowDescription::parse(&payload).is_err());
    }

    #[test]
    fn test_data_row_null_and_values() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&3u16.to_be_bytes());
        payload.extend_from_slice(&1i32.to_be_bytes());
        payload.push(b'7');
        payload.extend_from_slice(&(-1i32).to_be_bytes());
        payload.extend_from_slice(&0i32.to_be_bytes());

        let row = DataRow::parse(&payload).unwrap();
        assert_eq!(row.len(), 3);
        let values: Vec<_> = row.iter().collect();
        assert_eq!(values[0], Some(&b"7"[..]));
        assert_eq!(values[1], None);
        assert_eq!(values[2], Some(&b""[..]));
    }

    #[test]
    fn test_command_complete_tags() {
        assert_eq!(
            CommandComplete { tag: "SELECT 5" }.rows_affected(),
            Some(5)
        );
        assert_eq!(
            CommandComplete { tag: "INSERT 0 1" }.rows_affected(),
            Some(1)
        );
        assert_eq!(CommandComplete { tag: "BEGIN" }.rows_affected(), None);
    }
}
