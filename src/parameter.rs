//! Statement parameters.

use crate::error::{Error, Result};
use crate::protocol::types::PgType;
use crate::value::Value;

/// A named parameter of a prepared [`Statement`](crate::Statement).
///
/// Parameters are created free-standing, then moved into a statement by
/// [`Conn::prepare`](crate::Conn::prepare); ownership enforces that a
/// parameter belongs to at most one statement.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    typ: PgType,
    custom_type_name: Option<String>,
    value: Value,
}

impl Parameter {
    /// Create a parameter with the given name and declared type.
    ///
    /// The name is referenced in SQL as `@name` or `:name`.
    pub fn new(name: impl Into<String>, typ: PgType) -> Self {
        Self {
            name: name.into(),
            typ,
            custom_type_name: None,
            value: Value::Null,
        }
    }

    /// Create a parameter of a custom (e.g. enum) type.
    ///
    /// `type_name` is injected into the rewritten command as a `::type_name`
    /// cast so the server knows what to make of the text value.
    pub fn custom(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            typ: PgType::Custom,
            custom_type_name: Some(type_name.into()),
            value: Value::Null,
        }
    }

    /// The parameter name, as referenced in the SQL command.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared PostgreSQL type.
    pub fn pg_type(&self) -> PgType {
        self.typ
    }

    /// The custom type name, if this is a custom-typed parameter.
    pub fn custom_type_name(&self) -> Option<&str> {
        self.custom_type_name.as_deref()
    }

    /// The current value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Assign a value, checking it against the declared type.
    ///
    /// Widening among the accepted variants is performed here (for example
    /// `Int16` widens into a `Bigint` parameter); anything else is a
    /// [`Error::TypeMismatch`]. `Value::Null` is accepted for every type.
    pub fn set_value(&mut self, value: Value) -> Result<()> {
        if value.is_null() {
            self.value = Value::Null;
            return Ok(());
        }

        let mismatch = |value: &Value| Error::TypeMismatch {
            param: self.typ.name(),
            value: value.kind(),
        };

        self.value = match self.typ {
            PgType::Boolean => match value {
                v @ Value::Bool(_) => v,
                v => return Err(mismatch(&v)),
            },
            PgType::Smallint => match value {
                v @ Value::Int16(_) => v,
                v => return Err(mismatch(&v)),
            },
            PgType::Integer => match value {
                Value::Int16(v) => Value::Int32(v as i32),
                v @ Value::Int32(_) => v,
                v => return Err(mismatch(&v)),
            },
            PgType::Bigint => match value {
                Value::Int16(v) => Value::Int64(v as i64),
                Value::Int32(v) => Value::Int64(v as i64),
                v @ Value::Int64(_) => v,
                Value::UInt64(v) => Value::Int64(v as i64),
                v => return Err(mismatch(&v)),
            },
            PgType::Real => match value {
                v @ Value::Float32(_) => v,
                v => return Err(mismatch(&v)),
            },
            PgType::Double => match value {
                Value::Float32(v) => Value::Float64(v as f64),
                v @ Value::Float64(_) => v,
                v => return Err(mismatch(&v)),
            },
            PgType::Char | PgType::Text | PgType::Varchar => match value {
                v @ Value::String(_) => v,
                v => return Err(mismatch(&v)),
            },
            PgType::Numeric => match value {
                v @ Value::Numeric(_) => v,
                Value::Int16(v) => Value::Numeric(num_rational::BigRational::from_integer(v.into())),
                Value::Int32(v) => Value::Numeric(num_rational::BigRational::from_integer(v.into())),
                Value::Int64(v) => Value::Numeric(num_rational::BigRational::from_integer(v.into())),
                v => return Err(mismatch(&v)),
            },
            PgType::Date | PgType::Time | PgType::TimeTz | PgType::Timestamp
            | PgType::TimestampTz => match value {
                // Integer-represented temporal values are Unix seconds UTC.
                Value::Int64(v) => Value::TimeSeconds(v),
                v @ Value::TimeSeconds(_) => v,
                v => return Err(mismatch(&v)),
            },
            PgType::Custom => match value {
                v @ (Value::Bytes(_) | Value::String(_)) => v,
                v => return Err(mismatch(&v)),
            },
        };

        Ok(())
    }

    /// Encode the current value for the Bind message (text format).
    pub(crate) fn encode(&self) -> Option<Vec<u8>> {
        self.value.encode_text(self.typ)
    }
}
