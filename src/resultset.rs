//! Result sets: row streaming and typed field access.

use chrono::{DateTime, Utc};
use num_rational::BigRational;
use num_traits::Zero;

use crate::conn::{BackendEvent, Conn};
use crate::datestyle;
use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, PgType};
use crate::statement::Statement;
use crate::value::{self, Value};

/// The results of a query, streamed row by row.
///
/// A `ResultSet` mutably borrows its connection for its whole life, so the
/// connection cannot serve anything else until the result set is closed.
/// Field access is by 0-based ordinal.
///
/// Temporal values carry whole-second resolution: fractional seconds sent by
/// the server are dropped by the text decoder.
pub struct ResultSet<'a> {
    conn: &'a mut Conn,
    portal: Option<String>,
    owned_stmt: Option<Statement>,
    closed: bool,
}

impl std::fmt::Debug for ResultSet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("portal", &self.portal)
            .field("closed", &self.closed)
            .finish()
    }
}

/// A scan destination: a mutable reference tagged with the host type to
/// store into.
///
/// SQL NULL stores the type's zero value; use [`ResultSet::is_null`] to
/// distinguish NULL from a genuine zero.
pub enum ScanTarget<'a> {
    Bool(&'a mut bool),
    Int16(&'a mut i16),
    Int32(&'a mut i32),
    Int64(&'a mut i64),
    UInt16(&'a mut u16),
    UInt32(&'a mut u32),
    UInt64(&'a mut u64),
    Float32(&'a mut f32),
    Float64(&'a mut f64),
    String(&'a mut String),
    Numeric(&'a mut BigRational),
    Time(&'a mut DateTime<Utc>),
    Any(&'a mut Value),
}

impl<'a> ResultSet<'a> {
    pub(crate) fn new(conn: &'a mut Conn, portal: Option<String>) -> Self {
        Self {
            conn,
            portal,
            owned_stmt: None,
            closed: false,
        }
    }

    pub(crate) fn own_statement(&mut self, stmt: Statement) {
        self.owned_stmt = Some(stmt);
    }

    /// Read the next row of the current result. Returns false once the
    /// current result is exhausted.
    pub fn fetch_next(&mut self) -> Result<bool> {
        if self.conn.result.current_result_complete {
            return Ok(false);
        }

        match self.conn.process_backend_messages()? {
            BackendEvent::Row => Ok(true),
            BackendEvent::CommandComplete | BackendEvent::ReadyForQuery => Ok(false),
            event => Err(Error::Protocol(format!(
                "unexpected message while fetching rows: {event:?}"
            ))),
        }
    }

    /// Advance to the next result of a multi-statement simple query,
    /// discarding unread rows of the current one. Returns false once all
    /// results are consumed. Statements expose a single result, so this is
    /// only meaningful for [`Conn::query`].
    pub fn next_result(&mut self) -> Result<bool> {
        while self.fetch_next()? {}

        if !self.conn.result.all_results_complete {
            match self.conn.process_backend_messages()? {
                // A rowless statement contributes only its CommandComplete.
                BackendEvent::RowDescription
                | BackendEvent::CommandComplete
                | BackendEvent::ReadyForQuery => {}
                event => {
                    return Err(Error::Protocol(format!(
                        "unexpected message between results: {event:?}"
                    )))
                }
            }
        }

        Ok(!self.conn.result.all_results_complete)
    }

    /// Close the result set, returning the rows-affected count of the last
    /// completed command. The connection is ready for the next operation
    /// afterwards.
    pub fn close(mut self) -> Result<u64> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<u64> {
        if self.closed {
            return Err(Error::InvalidUsage("result set already closed".into()));
        }
        self.closed = true;

        while self.next_result()? {}

        self.conn.mark_ready();

        if let Some(portal) = self.portal.take() {
            self.conn.close_portal(&portal)?;
        }
        if let Some(mut stmt) = self.owned_stmt.take() {
            self.conn.close_statement(stmt.wire_name())?;
            stmt.mark_closed();
        }

        Ok(self.conn.result.rows_affected)
    }

    /// The number of fields in the current result.
    pub fn field_count(&self) -> usize {
        self.conn.result.fields.len()
    }

    /// The name of the field with the given ordinal.
    pub fn name(&self, ord: usize) -> Result<&str> {
        Ok(&self.field(ord)?.name)
    }

    /// The PostgreSQL type of the field with the given ordinal.
    pub fn field_type(&self, ord: usize) -> Result<PgType> {
        Ok(self.field(ord)?.pg_type())
    }

    /// The 0-based ordinal of the field with the given name, if any.
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.conn.result.name_index.get(name).copied()
    }

    /// Whether the field with the given ordinal is NULL in the current row.
    pub fn is_null(&self, ord: usize) -> Result<bool> {
        Ok(self.raw(ord)?.is_none())
    }

    /// The field value as bool.
    pub fn bool(&self, ord: usize) -> Result<Option<bool>> {
        let Some(val) = self.raw(ord)? else {
            return Ok(None);
        };
        if val.is_empty() {
            return Err(Error::Decode("empty boolean value".into()));
        }
        let value = match self.field(ord)?.format {
            FormatCode::Text => val[0] == b't',
            FormatCode::Binary => val[0] != 0,
        };
        Ok(Some(value))
    }

    /// The field value as i16.
    pub fn int16(&self, ord: usize) -> Result<Option<i16>> {
        self.decode_int(ord)?
            .map(|v| {
                i16::try_from(v).map_err(|_| Error::Decode(format!("{v} overflows int16")))
            })
            .transpose()
    }

    /// The field value as i32.
    pub fn int32(&self, ord: usize) -> Result<Option<i32>> {
        self.decode_int(ord)?
            .map(|v| {
                i32::try_from(v).map_err(|_| Error::Decode(format!("{v} overflows int32")))
            })
            .transpose()
    }

    /// The field value as i64. Temporal fields are not converted here; use
    /// [`ResultSet::time_seconds`] for those.
    pub fn int64(&self, ord: usize) -> Result<Option<i64>> {
        self.decode_int(ord)
    }

    /// The field value as i32 (the natural host integer).
    pub fn int(&self, ord: usize) -> Result<Option<i32>> {
        self.int32(ord)
    }

    /// The field value as u16.
    pub fn uint16(&self, ord: usize) -> Result<Option<u16>> {
        Ok(self.int16(ord)?.map(|v| v as u16))
    }

    /// The field value as u32.
    pub fn uint32(&self, ord: usize) -> Result<Option<u32>> {
        Ok(self.int32(ord)?.map(|v| v as u32))
    }

    /// The field value as u64.
    pub fn uint64(&self, ord: usize) -> Result<Option<u64>> {
        Ok(self.int64(ord)?.map(|v| v as u64))
    }

    /// The field value as u32 (the natural host unsigned integer).
    pub fn uint(&self, ord: usize) -> Result<Option<u32>> {
        self.uint32(ord)
    }

    /// The field value as f32.
    pub fn float32(&self, ord: usize) -> Result<Option<f32>> {
        Ok(self.decode_float(ord)?.map(|v| v as f32))
    }

    /// The field value as f64.
    pub fn float64(&self, ord: usize) -> Result<Option<f64>> {
        self.decode_float(ord)
    }

    /// The field value as a string.
    pub fn string(&self, ord: usize) -> Result<Option<String>> {
        let Some(val) = self.raw(ord)? else {
            return Ok(None);
        };
        let s = simdutf8::basic::from_utf8(val)
            .map_err(|e| Error::Decode(format!("invalid UTF-8 in field: {e}")))?;
        Ok(Some(s.to_string()))
    }

    /// The field value as an arbitrary-precision rational (NUMERIC).
    pub fn rat(&self, ord: usize) -> Result<Option<BigRational>> {
        let Some(val) = self.raw(ord)? else {
            return Ok(None);
        };
        match self.field(ord)?.format {
            FormatCode::Text => {
                let s = self.text(ord, val)?;
                Ok(Some(value::parse_numeric(s)?))
            }
            FormatCode::Binary => Err(Error::DecodingNotImplemented("binary NUMERIC")),
        }
    }

    /// The field value as Unix seconds in UTC. Fractional seconds are
    /// dropped.
    pub fn time_seconds(&self, ord: usize) -> Result<Option<i64>> {
        let Some(val) = self.raw(ord)? else {
            return Ok(None);
        };
        let field = self.field(ord)?;
        let typ = field.pg_type();
        if !typ.is_temporal() {
            return Err(Error::Decode(format!("{typ} is not a temporal type")));
        }
        match field.format {
            FormatCode::Text => {
                let s = self.text(ord, val)?;
                Ok(Some(datestyle::decode_temporal(
                    s,
                    typ,
                    self.conn.time_formats(),
                )?))
            }
            FormatCode::Binary => Err(Error::DecodingNotImplemented("binary temporal value")),
        }
    }

    /// The field value as a UTC timestamp, at whole-second resolution.
    pub fn time(&self, ord: usize) -> Result<Option<DateTime<Utc>>> {
        self.time_seconds(ord)?
            .map(|secs| {
                DateTime::from_timestamp(secs, 0)
                    .ok_or_else(|| Error::Decode(format!("{secs} is out of timestamp range")))
            })
            .transpose()
    }

    /// The field value as the natural host value for its column type.
    pub fn any(&self, ord: usize) -> Result<Option<Value>> {
        if self.raw(ord)?.is_none() {
            return Ok(None);
        }

        let value = match self.field(ord)?.pg_type() {
            PgType::Boolean => self.bool(ord)?.map(Value::Bool),
            PgType::Char | PgType::Varchar | PgType::Text => {
                self.string(ord)?.map(Value::String)
            }
            PgType::Date | PgType::Time | PgType::TimeTz | PgType::Timestamp
            | PgType::TimestampTz => self.time_seconds(ord)?.map(Value::TimeSeconds),
            PgType::Real => self.float32(ord)?.map(Value::Float32),
            PgType::Double => self.float64(ord)?.map(Value::Float64),
            PgType::Smallint => self.int16(ord)?.map(Value::Int16),
            PgType::Integer => self.int32(ord)?.map(Value::Int32),
            PgType::Bigint => self.int64(ord)?.map(Value::Int64),
            PgType::Numeric => self.rat(ord)?.map(Value::Numeric),
            PgType::Custom => self
                .raw(ord)?
                .map(|bytes| Value::Bytes(bytes.to_vec())),
        };
        Ok(value)
    }

    /// Scan the fields of the current row into `targets`, dispatching on
    /// each target's type tag. The target count must equal the field count.
    ///
    /// For i64/u64 targets whose column is a temporal type, the value is
    /// the Unix-seconds interpretation.
    pub fn scan(&mut self, targets: &mut [ScanTarget<'_>]) -> Result<()> {
        if targets.len() != self.field_count() {
            return Err(Error::WrongArgumentCount {
                expected: self.field_count(),
                actual: targets.len(),
            });
        }

        for (ord, target) in targets.iter_mut().enumerate() {
            match target {
                ScanTarget::Bool(out) => **out = self.bool(ord)?.unwrap_or_default(),
                ScanTarget::Int16(out) => **out = self.int16(ord)?.unwrap_or_default(),
                ScanTarget::Int32(out) => **out = self.int32(ord)?.unwrap_or_default(),
                ScanTarget::Int64(out) => {
                    **out = if self.field_type(ord)?.is_temporal() {
                        self.time_seconds(ord)?.unwrap_or_default()
                    } else {
                        self.int64(ord)?.unwrap_or_default()
                    }
                }
                ScanTarget::UInt16(out) => **out = self.uint16(ord)?.unwrap_or_default(),
                ScanTarget::UInt32(out) => **out = self.uint32(ord)?.unwrap_or_default(),
                ScanTarget::UInt64(out) => {
                    **out = if self.field_type(ord)?.is_temporal() {
                        self.time_seconds(ord)?.unwrap_or_default() as u64
                    } else {
                        self.uint64(ord)?.unwrap_or_default()
                    }
                }
                ScanTarget::Float32(out) => **out = self.float32(ord)?.unwrap_or_default(),
                ScanTarget::Float64(out) => **out = self.float64(ord)?.unwrap_or_default(),
                ScanTarget::String(out) => **out = self.string(ord)?.unwrap_or_default(),
                ScanTarget::Numeric(out) => {
                    **out = self.rat(ord)?.unwrap_or_else(BigRational::zero)
                }
                ScanTarget::Time(out) => {
                    **out = self.time(ord)?.unwrap_or(DateTime::UNIX_EPOCH)
                }
                ScanTarget::Any(out) => **out = self.any(ord)?.unwrap_or(Value::Null),
            }
        }

        Ok(())
    }

    /// Fetch the next row and scan it into `targets`. Returns false if no
    /// row was fetched.
    pub fn scan_next(&mut self, targets: &mut [ScanTarget<'_>]) -> Result<bool> {
        if !self.fetch_next()? {
            return Ok(false);
        }
        self.scan(targets)?;
        Ok(true)
    }

    fn field(&self, ord: usize) -> Result<&crate::conn::Field> {
        self.conn
            .result
            .fields
            .get(ord)
            .ok_or_else(|| Error::InvalidUsage(format!("no field with ordinal {ord}")))
    }

    /// The raw bytes of a field in the current row; `None` is SQL NULL.
    fn raw(&self, ord: usize) -> Result<Option<&[u8]>> {
        if !self.conn.result.has_current_row {
            return Err(Error::InvalidUsage("no current row".into()));
        }
        self.field(ord)?;
        Ok(self.conn.result.values[ord].as_deref())
    }

    fn text<'v>(&self, ord: usize, val: &'v [u8]) -> Result<&'v str> {
        simdutf8::basic::from_utf8(val).map_err(|e| {
            Error::Decode(format!(
                "invalid UTF-8 in field {:?}: {e}",
                self.conn.result.fields[ord].name
            ))
        })
    }

    fn decode_int(&self, ord: usize) -> Result<Option<i64>> {
        let Some(val) = self.raw(ord)? else {
            return Ok(None);
        };
        let value = match self.field(ord)?.format {
            FormatCode::Text => {
                let s = self.text(ord, val)?;
                s.parse()
                    .map_err(|e| Error::Decode(format!("invalid integer {s:?}: {e}")))?
            }
            FormatCode::Binary => match val.len() {
                2 => i16::from_be_bytes([val[0], val[1]]) as i64,
                4 => i32::from_be_bytes([val[0], val[1], val[2], val[3]]) as i64,
                8 => i64::from_be_bytes([
                    val[0], val[1], val[2], val[3], val[4], val[5], val[6], val[7],
                ]),
                n => {
                    return Err(Error::Decode(format!(
                        "invalid binary integer width: {n} bytes"
                    )))
                }
            },
        };
        Ok(Some(value))
    }

    fn decode_float(&self, ord: usize) -> Result<Option<f64>> {
        let Some(val) = self.raw(ord)? else {
            return Ok(None);
        };
        let value = match self.field(ord)?.format {
            FormatCode::Text => {
                let s = self.text(ord, val)?;
                match s {
                    "NaN" => f64::NAN,
                    "Infinity" => f64::INFINITY,
                    "-Infinity" => f64::NEG_INFINITY,
                    _ => s
                        .parse()
                        .map_err(|e| Error::Decode(format!("invalid float {s:?}: {e}")))?,
                }
            }
            FormatCode::Binary => match val.len() {
                4 => f32::from_be_bytes([val[0], val[1], val[2], val[3]]) as f64,
                8 => f64::from_be_bytes([
                    val[0], val[1], val[2], val[3], val[4], val[5], val[6], val[7],
                ]),
                n => {
                    return Err(Error::Decode(format!(
                        "invalid binary float width: {n} bytes"
                    )))
                }
            },
        };
        Ok(Some(value))
    }
}

impl Drop for ResultSet<'_> {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close_inner();
        }
    }
}
