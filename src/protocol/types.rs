//! Common PostgreSQL wire protocol types.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// PostgreSQL Object Identifier (OID)
pub type Oid = u32;

/// Type OIDs the library recognizes by number.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const CHAR: Oid = 18;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
    pub const DATE: Oid = 1082;
    pub const TIME: Oid = 1083;
    pub const TIMESTAMP: Oid = 1114;
    pub const TIMESTAMPTZ: Oid = 1184;
    pub const TIMETZ: Oid = 1266;
    pub const NUMERIC: Oid = 1700;
}

/// PostgreSQL data type of fields and parameters.
///
/// This is the closed set the library understands; every other OID maps to
/// [`PgType::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgType {
    /// Any type outside the recognized set, including enum types.
    Custom,
    Boolean,
    Char,
    Date,
    Real,
    Double,
    Smallint,
    Integer,
    Bigint,
    Numeric,
    Text,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
    Varchar,
}

impl PgType {
    /// Map a type OID onto the closed enumeration.
    pub fn from_oid(oid: Oid) -> Self {
        match oid {
            oid::BOOL => PgType::Boolean,
            oid::CHAR | oid::BPCHAR => PgType::Char,
            oid::INT8 => PgType::Bigint,
            oid::INT2 => PgType::Smallint,
            oid::INT4 => PgType::Integer,
            oid::TEXT => PgType::Text,
            oid::FLOAT4 => PgType::Real,
            oid::FLOAT8 => PgType::Double,
            oid::VARCHAR => PgType::Varchar,
            oid::DATE => PgType::Date,
            oid::TIME => PgType::Time,
            oid::TIMESTAMP => PgType::Timestamp,
            oid::TIMESTAMPTZ => PgType::TimestampTz,
            oid::TIMETZ => PgType::TimeTz,
            oid::NUMERIC => PgType::Numeric,
            _ => PgType::Custom,
        }
    }

    /// The OID sent in Parse for a parameter of this type.
    ///
    /// CHAR is sent as VARCHAR: CHAR-bound parameters have been observed to
    /// make the server return no rows for queries that match in psql.
    /// Custom types are sent as 0 so the server infers them.
    pub fn parse_oid(self) -> Oid {
        match self {
            PgType::Custom => 0,
            PgType::Boolean => oid::BOOL,
            PgType::Char => oid::VARCHAR,
            PgType::Date => oid::DATE,
            PgType::Real => oid::FLOAT4,
            PgType::Double => oid::FLOAT8,
            PgType::Smallint => oid::INT2,
            PgType::Integer => oid::INT4,
            PgType::Bigint => oid::INT8,
            PgType::Numeric => oid::NUMERIC,
            PgType::Text => oid::TEXT,
            PgType::Time => oid::TIME,
            PgType::TimeTz => oid::TIMETZ,
            PgType::Timestamp => oid::TIMESTAMP,
            PgType::TimestampTz => oid::TIMESTAMPTZ,
            PgType::Varchar => oid::VARCHAR,
        }
    }

    /// Returns true for the date/time family.
    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            PgType::Date | PgType::Time | PgType::TimeTz | PgType::Timestamp | PgType::TimestampTz
        )
    }

    /// Static name, matching the SQL spelling where one exists.
    pub fn name(self) -> &'static str {
        match self {
            PgType::Custom => "Custom",
            PgType::Boolean => "Boolean",
            PgType::Char => "Char",
            PgType::Date => "Date",
            PgType::Real => "Real",
            PgType::Double => "Double",
            PgType::Smallint => "Smallint",
            PgType::Integer => "Integer",
            PgType::Bigint => "Bigint",
            PgType::Numeric => "Numeric",
            PgType::Text => "Text",
            PgType::Time => "Time",
            PgType::TimeTz => "TimeTZ",
            PgType::Timestamp => "Timestamp",
            PgType::TimestampTz => "TimestampTZ",
            PgType::Varchar => "Varchar",
        }
    }
}

impl std::fmt::Display for PgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Data format code in the PostgreSQL protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum FormatCode {
    /// Text format (human-readable)
    #[default]
    Text = 0,
    /// Binary format (type-specific packed representation)
    Binary = 1,
}

impl FormatCode {
    /// Create a FormatCode from a raw u16 value.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(FormatCode::Text),
            1 => Some(FormatCode::Binary),
            _ => None,
        }
    }
}

/// Transaction status indicator from ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block)
    #[default]
    NotInTransaction = b'I',
    /// In a transaction block
    InTransaction = b'T',
    /// In a failed transaction block (queries rejected until rollback)
    InFailedTransaction = b'E',
}

impl TransactionStatus {
    /// Create a TransactionStatus from the raw status byte.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            b'I' => Some(TransactionStatus::NotInTransaction),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::InFailedTransaction),
            _ => None,
        }
    }

    /// Returns true if currently in a transaction (active or failed).
    pub fn in_transaction(self) -> bool {
        matches!(
            self,
            TransactionStatus::InTransaction | TransactionStatus::InFailedTransaction
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransactionStatus::NotInTransaction => "Not In Transaction",
            TransactionStatus::InTransaction => "In Transaction",
            TransactionStatus::InFailedTransaction => "In Failed Transaction",
        })
    }
}

/// Big-endian 16-bit signed integer for zerocopy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct I16Be([u8; 2]);

impl I16Be {
    /// Get the native i16 value.
    pub const fn get(self) -> i16 {
        i16::from_be_bytes(self.0)
    }
}

/// Big-endian 32-bit signed integer for zerocopy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct I32Be([u8; 4]);

impl I32Be {
    /// Get the native i32 value.
    pub const fn get(self) -> i32 {
        i32::from_be_bytes(self.0)
    }
}

/// Big-endian 16-bit unsigned integer for zerocopy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct U16Be([u8; 2]);

impl U16Be {
    /// Get the native u16 value.
    pub const fn get(self) -> u16 {
        u16::from_be_bytes(self.0)
    }
}

/// Big-endian 32-bit unsigned integer for zerocopy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct U32Be([u8; 4]);

impl U32Be {
    /// Get the native u32 value.
    pub const fn get(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_mapping_recognized_subset() {
        assert_eq!(PgType::from_oid(16), PgType::Boolean);
        assert_eq!(PgType::from_oid(20), PgType::Bigint);
        assert_eq!(PgType::from_oid(1042), PgType::Char);
        assert_eq!(PgType::from_oid(1700), PgType::Numeric);
        // Anything outside the subset is Custom, e.g. uuid (2950).
        assert_eq!(PgType::from_oid(2950), PgType::Custom);
    }

    #[test]
    fn test_char_parses_as_varchar() {
        assert_eq!(PgType::Char.parse_oid(), oid::VARCHAR);
        assert_eq!(PgType::Custom.parse_oid(), 0);
    }

    #[test]
    fn test_transaction_status_bytes() {
        assert_eq!(
            TransactionStatus::from_byte(b'I'),
            Some(TransactionStatus::NotInTransaction)
        );
        assert_eq!(
            TransactionStatus::from_byte(b'E'),
            Some(TransactionStatus::InFailedTransaction)
        );
        assert_eq!(TransactionStatus::from_byte(b'X'), None);
        assert!(TransactionStatus::InFailedTransaction.in_transaction());
        assert!(!TransactionStatus::NotInTransaction.in_transaction());
    }

    #[test]
    fn test_be_views() {
        let i = I32Be::ref_from_bytes(&[0xff, 0xff, 0xff, 0xfe]).unwrap();
        assert_eq!(i.get(), -2);
        let u = U16Be::ref_from_bytes(&[0x01, 0x00]).unwrap();
        assert_eq!(u.get(), 256);
    }
}
