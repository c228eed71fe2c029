//! Parameter and field values.
//!
//! [`Value`] is the explicit sum type over every host representation the
//! library moves across the wire. Encoding to the text wire format lives
//! here; decoding of result fields lives with the result set, which also
//! needs per-column metadata.

use chrono::DateTime;
use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{Signed, Zero};

use crate::error::{Error, Result};
use crate::protocol::types::PgType;

/// Maximum fractional digits emitted for a NUMERIC whose exact decimal
/// expansion does not terminate.
const NUMERIC_MAX_FRAC_DIGITS: usize = 1000;

/// A value bound to a parameter or read from a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    /// Arbitrary-precision rational, used for NUMERIC
    Numeric(BigRational),
    /// A point in time as Unix seconds in UTC
    TimeSeconds(i64),
    /// Raw bytes, passed through unchanged (custom types)
    Bytes(Vec<u8>),
}

impl Value {
    /// Short tag for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int16(_) => "Int16",
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::UInt64(_) => "UInt64",
            Value::Float32(_) => "Float32",
            Value::Float64(_) => "Float64",
            Value::String(_) => "String",
            Value::Numeric(_) => "Numeric",
            Value::TimeSeconds(_) => "TimeSeconds",
            Value::Bytes(_) => "Bytes",
        }
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encode this value in the text wire format for a parameter declared as
    /// `typ`. `None` means SQL NULL (length -1 on the wire).
    pub fn encode_text(&self, typ: PgType) -> Option<Vec<u8>> {
        let text = match self {
            Value::Null => return None,
            Value::Bool(b) => {
                if *b {
                    "t".to_string()
                } else {
                    "f".to_string()
                }
            }
            Value::Int16(v) => v.to_string(),
            Value::Int32(v) => v.to_string(),
            Value::Int64(v) => match typ {
                PgType::Date | PgType::Time | PgType::TimeTz | PgType::Timestamp
                | PgType::TimestampTz => format_seconds(*v, typ),
                _ => v.to_string(),
            },
            Value::UInt64(v) => v.to_string(),
            Value::Float32(v) => float_literal(*v),
            Value::Float64(v) => float_literal(*v),
            Value::String(s) => s.clone(),
            Value::Numeric(r) => format_numeric(r),
            Value::TimeSeconds(secs) => format_seconds(*secs, typ),
            Value::Bytes(b) => return Some(b.clone()),
        };
        Some(text.into_bytes())
    }
}

/// Format a float in shortest round-trip decimal.
///
/// Rust's `Display` already produces the shortest representation that
/// round-trips; PostgreSQL's special literals are spelled out explicitly.
fn float_literal<F: num_traits::Float + std::fmt::Display>(v: F) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v.is_sign_positive() {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else {
        format!("{v}")
    }
}

/// Format Unix seconds (UTC) in the ISO text shape for the declared type.
fn format_seconds(secs: i64, typ: PgType) -> String {
    let dt = match DateTime::from_timestamp(secs, 0) {
        Some(dt) => dt.naive_utc(),
        None => return secs.to_string(),
    };
    match typ {
        PgType::Date => dt.format("%Y-%m-%d").to_string(),
        PgType::Time | PgType::TimeTz => dt.format("%H:%M:%S").to_string(),
        PgType::Timestamp | PgType::TimestampTz => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => secs.to_string(),
    }
}

/// Format a rational as a decimal literal.
///
/// Integers print with no dot. Otherwise the exact terminating expansion is
/// produced when one exists (denominator of the reduced fraction is
/// 2^a * 5^b); non-terminating expansions are cut at 1000 fractional digits.
pub fn format_numeric(r: &BigRational) -> String {
    if r.is_integer() {
        return r.numer().to_string();
    }

    let negative = r.is_negative();
    let abs = r.abs();
    let (int_part, mut rem) = abs.numer().div_rem(abs.denom());

    let mut digits = String::new();
    let ten = BigInt::from(10);
    while !rem.is_zero() && digits.len() < NUMERIC_MAX_FRAC_DIGITS {
        rem *= &ten;
        let (digit, next_rem) = rem.div_rem(abs.denom());
        digits.push_str(&digit.to_string());
        rem = next_rem;
    }

    let sign = if negative { "-" } else { "" };
    format!("{sign}{int_part}.{digits}")
}

/// Parse a NUMERIC text literal (optional sign, digits, optional fraction)
/// into a rational.
pub fn parse_numeric(s: &str) -> Result<BigRational> {
    let bad = || Error::Decode(format!("invalid numeric literal: {s:?}"));

    if s == "NaN" {
        return Err(Error::Decode("NUMERIC NaN has no rational value".into()));
    }

    let (sign, body) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(s)),
    };

    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(bad());
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(bad());
    }

    let mut numer: BigInt = if int_part.is_empty() {
        BigInt::zero()
    } else {
        int_part.parse().map_err(|_| bad())?
    };
    let mut denom = BigInt::from(1);
    let ten = BigInt::from(10);
    for digit in frac_part.bytes() {
        numer = numer * &ten + BigInt::from(digit - b'0');
        denom *= &ten;
    }

    Ok(BigRational::new(numer * BigInt::from(sign), denom))
}
