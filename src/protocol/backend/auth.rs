//! Session startup backend messages.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_cstr, read_i32};
use crate::protocol::types::{I32Be, TransactionStatus};

/// Authentication subtype codes.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SCM_CREDENTIAL: i32 = 6;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
}

/// AuthenticationRequest message from the server.
///
/// Only Ok, cleartext and MD5 are supported; every other recognized subtype
/// is carried as `Unsupported` so the caller can fail with the code.
#[derive(Debug)]
pub enum AuthenticationRequest {
    /// Authentication successful
    Ok,
    /// Cleartext password required
    CleartextPassword,
    /// MD5 password required (with 4-byte salt)
    Md5Password {
        /// Random salt to mix into the second hash
        salt: [u8; 4],
    },
    /// A method this library does not implement (KerberosV5, SCM, GSS, SSPI, ...)
    Unsupported(i32),
}

impl AuthenticationRequest {
    /// Parse an AuthenticationRequest from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (kind, rest) = read_i32(payload)?;

        match kind {
            auth_type::OK => Ok(AuthenticationRequest::Ok),
            auth_type::CLEARTEXT_PASSWORD => Ok(AuthenticationRequest::CleartextPassword),
            auth_type::MD5_PASSWORD => {
                if rest.len() < 4 {
                    return Err(Error::Protocol("AuthenticationMD5Password: missing salt".into()));
                }
                let mut salt = [0u8; 4];
                salt.copy_from_slice(&rest[..4]);
                Ok(AuthenticationRequest::Md5Password { salt })
            }
            _ => Ok(AuthenticationRequest::Unsupported(kind)),
        }
    }
}

/// BackendKeyData message: process ID and secret key for cancellation.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BackendKeyData {
    /// Process ID of the backend
    pub pid: I32Be,
    /// Secret key for cancellation
    pub secret_key: I32Be,
}

impl BackendKeyData {
    /// Parse a BackendKeyData message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(payload)
            .map_err(|e| Error::Protocol(format!("BackendKeyData: {e:?}")))
    }

    /// Get the backend process ID.
    pub fn process_id(&self) -> i32 {
        self.pid.get()
    }

    /// Get the cancellation secret.
    pub fn secret(&self) -> i32 {
        self.secret_key.get()
    }
}

/// ParameterStatus message: a server runtime parameter name and value.
#[derive(Debug, Clone)]
pub struct ParameterStatus<'a> {
    /// Parameter name
    pub name: &'a str,
    /// Parameter value
    pub value: &'a str,
}

impl<'a> ParameterStatus<'a> {
    /// Parse a ParameterStatus message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery message: the server is ready for the next command.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ReadyForQuery {
    /// Transaction status byte ('I' | 'T' | 'E')
    pub status: u8,
}

impl ReadyForQuery {
    /// Parse a ReadyForQuery message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<&Self> {
        Self::ref_from_bytes(payload)
            .map_err(|e| Error::Protocol(format!("ReadyForQuery: {e:?}")))
    }

    /// Decode the transaction status byte.
    pub fn transaction_status(&self) -> Result<TransactionStatus> {
        TransactionStatus::from_byte(self.status).ok_or_else(|| {
            Error::Protocol(format!("unknown transaction status: {:?}", self.status as char))
        })
    }
}
