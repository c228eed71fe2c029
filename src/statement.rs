//! Prepared statements.

use std::collections::HashMap;

use crate::conn::Conn;
use crate::error::{Error, Result};
use crate::parameter::Parameter;
use crate::resultset::{ResultSet, ScanTarget};
use crate::value::Value;

/// A server-side prepared statement with named parameters.
///
/// Created by [`Conn::prepare`]; optimized for repeated execution with
/// different parameter values. Methods that talk to the server take the
/// connection the statement was prepared on.
#[derive(Debug)]
pub struct Statement {
    name: String,
    portal_name: String,
    command: String,
    actual_command: String,
    params: Vec<Parameter>,
    name_index: HashMap<String, usize>,
    closed: bool,
}

impl Statement {
    pub(crate) fn new(
        name: String,
        portal_name: String,
        command: &str,
        params: Vec<Parameter>,
    ) -> Result<Self> {
        let mut name_index = HashMap::new();
        for (i, param) in params.iter().enumerate() {
            if name_index.insert(param.name().to_string(), i).is_some() {
                return Err(Error::InvalidUsage(format!(
                    "duplicate parameter name {:?}",
                    param.name()
                )));
            }
        }

        let actual_command = rewrite_command(command, &params);

        Ok(Self {
            name,
            portal_name,
            command: command.to_string(),
            actual_command,
            params,
            name_index,
            closed: false,
        })
    }

    /// The wire name of the prepared statement.
    pub(crate) fn wire_name(&self) -> &str {
        &self.name
    }

    /// The wire name of the statement's portal.
    pub(crate) fn wire_portal_name(&self) -> &str {
        &self.portal_name
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// The original command text as given to [`Conn::prepare`].
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The actual command text sent to the server, with parameter references
    /// replaced by `$N` placeholders. Error messages report positions within
    /// this text.
    pub fn actual_command(&self) -> &str {
        &self.actual_command
    }

    /// Returns true once [`Statement::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The parameter with the given name, if any.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.name_index.get(name).map(|&i| &self.params[i])
    }

    /// Mutable access to the parameter with the given name.
    pub fn parameter_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.name_index.get(name).map(|&i| &mut self.params[i])
    }

    /// The statement's parameters, in declaration order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    /// Assign a value to the named parameter.
    pub fn set_value(&mut self, name: &str, value: Value) -> Result<()> {
        match self.parameter_mut(name) {
            Some(param) => param.set_value(value),
            None => Err(Error::InvalidUsage(format!("no parameter named {name:?}"))),
        }
    }

    /// Execute the statement and return a [`ResultSet`] for row-by-row
    /// retrieval. The result set must be closed before the connection can be
    /// used for anything else.
    pub fn query<'a>(&self, conn: &'a mut Conn) -> Result<ResultSet<'a>> {
        if self.closed {
            return Err(Error::InvalidUsage("statement is closed".into()));
        }
        conn.execute_statement(self)
    }

    /// Execute the statement and return the number of rows affected. Use
    /// [`Statement::query`] if the results are needed.
    pub fn execute(&self, conn: &mut Conn) -> Result<u64> {
        self.query(conn)?.close()
    }

    /// Execute the statement and scan the first row of the result into
    /// `targets`. Returns false if no row was fetched.
    pub fn scan(&self, conn: &mut Conn, targets: &mut [ScanTarget<'_>]) -> Result<bool> {
        let mut rs = self.query(conn)?;
        let fetched = rs.scan_next(targets)?;
        rs.close()?;
        Ok(fetched)
    }

    /// Close the statement, releasing its server-side resources.
    pub fn close(&mut self, conn: &mut Conn) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidUsage("statement already closed".into()));
        }
        conn.close_statement(&self.name)?;
        self.closed = true;
        Ok(())
    }
}

/// A parameter name without its `@`/`:` sigil.
fn bare_name(name: &str) -> &str {
    name.strip_prefix('@')
        .or_else(|| name.strip_prefix(':'))
        .unwrap_or(name)
}

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Replace `@name`/`:name` parameter references with `$N` placeholders.
///
/// Single-quoted literals pass through untouched. A reference matches only
/// at a word boundary: the byte before the sigil must not be part of a word
/// (and not `:`, so `::type` casts survive), and the name must not continue
/// with word characters. Custom-typed parameters get a `::type` cast
/// appended so the server can type the text value.
fn rewrite_command(command: &str, params: &[Parameter]) -> String {
    let bytes = command.as_bytes();
    let mut out = String::with_capacity(command.len());
    let mut i = 0;

    'outer: while i < bytes.len() {
        let b = bytes[i];

        if b == b'\'' {
            // Copy the whole literal, including the closing quote.
            let end = memchr::memchr(b'\'', &bytes[i + 1..])
                .map(|p| i + 1 + p + 1)
                .unwrap_or(bytes.len());
            out.push_str(&command[i..end]);
            i = end;
            continue;
        }

        if b == b'@' || b == b':' {
            let boundary_before = i == 0 || (!is_word(bytes[i - 1]) && bytes[i - 1] != b':');
            if boundary_before {
                for (ord, param) in params.iter().enumerate() {
                    let bare = bare_name(param.name());
                    if bare.is_empty() {
                        continue;
                    }
                    let start = i + 1;
                    let end = start + bare.len();
                    if bytes.len() >= end
                        && &bytes[start..end] == bare.as_bytes()
                        && (end == bytes.len() || !is_word(bytes[end]))
                    {
                        out.push('$');
                        out.push_str(&(ord + 1).to_string());
                        if let Some(cast) = param.custom_type_name() {
                            out.push_str("::");
                            out.push_str(cast);
                        }
                        i = end;
                        continue 'outer;
                    }
                }
            }
        }

        let ch_len = utf8_len(b);
        out.push_str(&command[i..i + ch_len]);
        i += ch_len;
    }

    out
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xf0 => 4,
        b if b >= 0xe0 => 3,
        _ => 2,
    }
}
