//! The PostgreSQL connection.
//!
//! A [`Conn`] owns one TCP session and drives every protocol exchange
//! through a single blocking reader loop: it pulls one backend message,
//! dispatches on the code byte, and either handles the message in place or
//! suspends back to the caller. Which operations are legal at any moment is
//! decided by an explicit match on the connection status.

use std::collections::HashMap;
use std::io::{BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::datestyle::{self, TimeFormats};
use crate::error::{Error, Result};
use crate::logging::{conn_log, LogLevel};
use crate::opts::ConnParams;
use crate::parameter::Parameter;
use crate::protocol::backend::{
    msg_type, AuthenticationRequest, BackendKeyData, CommandComplete, CopyInResponse, DataRow,
    ErrorResponse, NoticeResponse, ParameterStatus, ReadyForQuery, RowDescription,
};
use crate::protocol::frontend::{
    self, md5_password, write_password, write_query, write_startup, write_terminate,
};
use crate::protocol::types::{FormatCode, Oid, PgType, TransactionStatus};
use crate::resultset::ResultSet;
use crate::statement::Statement;

/// Frames read from the COPY source per CopyData message.
const COPY_CHUNK_SIZE: usize = 32 * 1024;

/// The status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// No usable session.
    Disconnected,
    /// Ready for the next command.
    Ready,
    /// A query's results are being streamed.
    ProcessingQuery,
    /// A COPY FROM STDIN transfer is in progress.
    Copy,
}

impl std::fmt::Display for ConnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnStatus::Disconnected => "Disconnected",
            ConnStatus::Ready => "Ready",
            ConnStatus::ProcessingQuery => "Processing Query",
            ConnStatus::Copy => "Copy",
        })
    }
}

/// The isolation level of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    Serializable,
}

impl IsolationLevel {
    fn sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IsolationLevel::ReadCommitted => "Read Committed",
            IsolationLevel::Serializable => "Serializable",
        })
    }
}

/// One column of the current result.
#[derive(Debug, Clone)]
pub(crate) struct Field {
    pub name: String,
    pub type_oid: Oid,
    pub format: FormatCode,
}

impl Field {
    pub fn pg_type(&self) -> PgType {
        PgType::from_oid(self.type_oid)
    }
}

/// The state of the single in-flight result stream.
#[derive(Debug, Default)]
pub(crate) struct ResultState {
    pub fields: Vec<Field>,
    pub values: Vec<Option<Vec<u8>>>,
    pub name_index: HashMap<String, usize>,
    pub rows_affected: u64,
    pub has_current_row: bool,
    pub current_result_complete: bool,
    pub all_results_complete: bool,
}

impl ResultState {
    fn reset(&mut self) {
        self.fields.clear();
        self.values.clear();
        self.name_index.clear();
        self.rows_affected = 0;
        self.has_current_row = false;
        self.current_result_complete = false;
        self.all_results_complete = false;
    }
}

/// A suspension point of the message reader: the message that made it hand
/// control back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackendEvent {
    Row,
    BindComplete,
    ParseComplete,
    CommandComplete,
    ReadyForQuery,
    RowDescription,
    NoData,
    CopyIn,
}

/// A PostgreSQL database connection.
///
/// Operations are strictly sequential: each public method blocks until the
/// corresponding server interaction completes, and a [`ResultSet`] must be
/// closed before the connection serves anything else (the borrow checker
/// enforces this).
pub struct Conn {
    /// Controls what this connection writes to the log sink.
    pub log_level: LogLevel,
    stream: BufReader<TcpStream>,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    status: ConnStatus,
    backend_pid: i32,
    backend_secret_key: i32,
    on_error_dont_require_ready_for_query: bool,
    runtime_parameters: HashMap<String, String>,
    time_formats: Option<TimeFormats>,
    next_statement_id: u64,
    next_portal_id: u64,
    next_savepoint_id: u64,
    transaction_status: TransactionStatus,
    startup_creds: Option<(String, Option<String>)>,
    pub(crate) result: ResultState,
}

impl Conn {
    /// Establish a database connection.
    ///
    /// See [`ConnParams::parse`] for the connection-string grammar. The
    /// returned connection is in the Ready state.
    pub fn connect(conn_str: &str, log_level: LogLevel) -> Result<Conn> {
        let params = ConnParams::parse(conn_str)?;
        Self::connect_params(params, log_level)
    }

    fn connect_params(params: ConnParams, log_level: LogLevel) -> Result<Conn> {
        let addr = format!("{}:{}", params.host, params.port);
        let tcp = TcpStream::connect(&addr)?;
        tcp.set_nodelay(true)?;
        if params.timeout_seconds > 0 {
            tcp.set_read_timeout(Some(Duration::from_secs(params.timeout_seconds)))?;
        }

        let mut conn = Conn {
            log_level,
            stream: BufReader::new(tcp),
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            status: ConnStatus::Disconnected,
            backend_pid: 0,
            backend_secret_key: 0,
            on_error_dont_require_ready_for_query: false,
            runtime_parameters: HashMap::new(),
            time_formats: None,
            next_statement_id: 0,
            next_portal_id: 0,
            next_savepoint_id: 0,
            transaction_status: TransactionStatus::NotInTransaction,
            startup_creds: Some((params.user.clone(), params.password.clone())),
            result: ResultState::default(),
        };

        conn.write_buffer.clear();
        write_startup(
            &mut conn.write_buffer,
            &[("user", &params.user), ("database", &params.database)],
        );
        conn.flush_writes()?;

        // Drain the startup conversation up to ReadyForQuery. Authentication,
        // BackendKeyData and ParameterStatus are all handled inside the
        // reader; nothing else is legal here.
        match conn.process_backend_messages()? {
            BackendEvent::ReadyForQuery => {}
            event => {
                return Err(Error::Protocol(format!(
                    "unexpected message during startup: {event:?}"
                )))
            }
        }

        conn.startup_creds = None;
        conn.status = ConnStatus::Ready;
        conn.result.reset();
        conn_log!(conn, LogLevel::Debug, "connected to {}", addr);
        Ok(conn)
    }

    /// The current connection status.
    pub fn status(&self) -> ConnStatus {
        self.status
    }

    /// The current transaction status of the connection.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// The value of a server runtime parameter, e.g. `"DateStyle"`.
    pub fn runtime_parameter(&self, name: &str) -> Option<&str> {
        self.runtime_parameters.get(name).map(String::as_str)
    }

    /// The backend process ID, for a future cancel request.
    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    /// The secret key paired with [`Conn::backend_pid`] in a cancel request.
    pub fn backend_secret_key(&self) -> i32 {
        self.backend_secret_key
    }

    pub(crate) fn time_formats(&self) -> Option<&TimeFormats> {
        self.time_formats.as_ref()
    }

    /// Close the connection.
    ///
    /// Returns an error if the connection is already closed.
    pub fn close(&mut self) -> Result<()> {
        if self.status == ConnStatus::Disconnected {
            let err = Error::InvalidUsage("connection already closed".into());
            conn_log!(self, LogLevel::Warning, "{}", err);
            return Err(err);
        }

        self.write_buffer.clear();
        write_terminate(&mut self.write_buffer);
        let flushed = self.flush_writes();
        let _ = self.stream.get_ref().shutdown(Shutdown::Both);
        self.status = ConnStatus::Disconnected;
        flushed
    }

    /// Send a SQL command and return the number of rows affected. Use
    /// [`Conn::query`] if the results are needed.
    pub fn execute(&mut self, command: &str) -> Result<u64> {
        self.query(command)?.close()
    }

    /// Like [`Conn::execute`], with parameters bound through an internally
    /// prepared statement.
    pub fn execute_with(&mut self, command: &str, params: Vec<Parameter>) -> Result<u64> {
        self.query_with(command, params)?.close()
    }

    /// Send a simple-protocol query and return a [`ResultSet`] for
    /// row-by-row retrieval. A single command string may contain several
    /// statements; use [`ResultSet::next_result`] to step between their
    /// results.
    pub fn query(&mut self, command: &str) -> Result<ResultSet<'_>> {
        self.check_status("query", ConnStatus::Ready)?;
        conn_log!(self, LogLevel::Command, "command: {:?}", command);

        self.result.reset();
        self.write_buffer.clear();
        write_query(&mut self.write_buffer, command);
        self.flush_writes()?;

        match self.process_backend_messages()? {
            BackendEvent::RowDescription
            | BackendEvent::CommandComplete
            | BackendEvent::ReadyForQuery => {}
            BackendEvent::CopyIn => {
                return Err(Error::Protocol(
                    "command started a COPY transfer; use copy_from".into(),
                ))
            }
            event => {
                return Err(Error::Protocol(format!(
                    "unexpected response to query: {event:?}"
                )))
            }
        }

        self.status = ConnStatus::ProcessingQuery;
        Ok(ResultSet::new(self, None))
    }

    /// Like [`Conn::query`], with parameters. The command is prepared,
    /// executed through the extended protocol, and the statement is closed
    /// together with the returned result set.
    pub fn query_with(&mut self, command: &str, params: Vec<Parameter>) -> Result<ResultSet<'_>> {
        let stmt = self.prepare(command, params)?;
        if let Err(e) = self.run_extended(&stmt) {
            // Best effort: do not leak the server-side statement.
            let _ = self.close_statement(stmt.wire_name());
            return Err(e);
        }
        let portal = stmt.wire_portal_name().to_string();
        let mut rs = ResultSet::new(self, Some(portal));
        rs.own_statement(stmt);
        Ok(rs)
    }

    /// Prepare a statement for repeated execution.
    ///
    /// Parameters are moved into the returned [`Statement`]; set their
    /// values through it between executions.
    pub fn prepare(&mut self, command: &str, params: Vec<Parameter>) -> Result<Statement> {
        self.check_status("prepare", ConnStatus::Ready)?;

        let name = format!("stmt{}", self.next_statement_id);
        self.next_statement_id += 1;
        let portal_name = format!("prtl{}", self.next_portal_id);
        self.next_portal_id += 1;

        let stmt = Statement::new(name, portal_name, command, params)?;
        conn_log!(self, LogLevel::Command, "parse: {:?}", stmt.actual_command());

        let param_oids: Vec<Oid> = stmt
            .parameters()
            .iter()
            .map(|p| p.pg_type().parse_oid())
            .collect();

        self.write_buffer.clear();
        frontend::write_parse(
            &mut self.write_buffer,
            stmt.wire_name(),
            stmt.actual_command(),
            &param_oids,
        );
        frontend::write_flush(&mut self.write_buffer);
        self.flush_writes()?;

        // No Sync is pending yet, so a Parse failure is not followed by
        // ReadyForQuery; the reader must not drain for one.
        self.on_error_dont_require_ready_for_query = true;
        let event = self.process_backend_messages();
        self.on_error_dont_require_ready_for_query = false;

        match event? {
            BackendEvent::ParseComplete => Ok(stmt),
            event => Err(Error::Protocol(format!(
                "unexpected response to Parse: {event:?}"
            ))),
        }
    }

    /// Run the extended-protocol Bind/Describe/Execute/Sync sequence for a
    /// prepared statement.
    pub(crate) fn execute_statement(&mut self, stmt: &Statement) -> Result<ResultSet<'_>> {
        self.run_extended(stmt)?;
        Ok(ResultSet::new(
            self,
            Some(stmt.wire_portal_name().to_string()),
        ))
    }

    fn run_extended(&mut self, stmt: &Statement) -> Result<()> {
        self.check_status("execute", ConnStatus::Ready)?;
        conn_log!(self, LogLevel::Command, "execute: {:?}", stmt.actual_command());

        self.result.reset();

        let values: Vec<Option<Vec<u8>>> =
            stmt.parameters().iter().map(|p| p.encode()).collect();

        self.write_buffer.clear();
        frontend::write_bind(
            &mut self.write_buffer,
            stmt.wire_portal_name(),
            stmt.wire_name(),
            &values,
        );
        frontend::write_flush(&mut self.write_buffer);
        self.flush_writes()?;

        match self.process_backend_messages()? {
            BackendEvent::BindComplete => {}
            event => {
                return Err(Error::Protocol(format!(
                    "unexpected response to Bind: {event:?}"
                )))
            }
        }

        self.write_buffer.clear();
        frontend::write_describe_portal(&mut self.write_buffer, stmt.wire_portal_name());
        frontend::write_flush(&mut self.write_buffer);
        self.flush_writes()?;

        match self.process_backend_messages()? {
            BackendEvent::RowDescription | BackendEvent::NoData => {}
            event => {
                return Err(Error::Protocol(format!(
                    "unexpected response to Describe: {event:?}"
                )))
            }
        }

        self.write_buffer.clear();
        frontend::write_execute(&mut self.write_buffer, stmt.wire_portal_name(), 0);
        frontend::write_sync(&mut self.write_buffer);
        self.flush_writes()?;

        self.status = ConnStatus::ProcessingQuery;
        Ok(())
    }

    /// Execute the command and scan the first row of its result into
    /// `targets`. Returns false if the result has no rows.
    pub fn scan(
        &mut self,
        command: &str,
        targets: &mut [crate::resultset::ScanTarget<'_>],
    ) -> Result<bool> {
        let mut rs = self.query(command)?;
        let fetched = rs.scan_next(targets)?;
        rs.close()?;
        Ok(fetched)
    }

    /// Drive a `COPY ... FROM STDIN` command, streaming `source` to the
    /// server in CopyData frames. Returns the number of rows copied.
    ///
    /// A read error from `source` aborts the transfer with CopyFail and is
    /// returned to the caller.
    pub fn copy_from(&mut self, command: &str, source: &mut dyn Read) -> Result<u64> {
        self.check_status("copy_from", ConnStatus::Ready)?;
        conn_log!(self, LogLevel::Command, "copy: {:?}", command);

        self.result.reset();
        self.write_buffer.clear();
        write_query(&mut self.write_buffer, command);
        self.flush_writes()?;

        match self.process_backend_messages()? {
            BackendEvent::CopyIn => {}
            event => {
                return Err(Error::Protocol(format!(
                    "command did not start a COPY transfer: {event:?}"
                )))
            }
        }

        let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
        loop {
            match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_buffer.clear();
                    frontend::write_copy_data(&mut self.write_buffer, &chunk[..n]);
                    self.flush_writes()?;
                }
                Err(e) => {
                    self.write_buffer.clear();
                    frontend::write_copy_fail(&mut self.write_buffer, &e.to_string());
                    self.flush_writes()?;
                    self.status = ConnStatus::ProcessingQuery;
                    // The server answers CopyFail with an ErrorResponse; eat
                    // it so the session recovers, but surface the source
                    // failure that caused the abort.
                    if let Err(server_err) = self.drain_copy_end() {
                        conn_log!(self, LogLevel::Debug, "copy aborted: {}", server_err);
                    }
                    return Err(Error::Io(e));
                }
            }
        }

        self.write_buffer.clear();
        frontend::write_copy_done(&mut self.write_buffer);
        self.flush_writes()?;
        self.status = ConnStatus::ProcessingQuery;

        self.drain_copy_end()?;
        Ok(self.result.rows_affected)
    }

    /// After CopyDone/CopyFail: read through CommandComplete (if any) and
    /// the closing ReadyForQuery.
    fn drain_copy_end(&mut self) -> Result<()> {
        loop {
            match self.process_backend_messages()? {
                BackendEvent::CommandComplete => {}
                BackendEvent::ReadyForQuery => return Ok(()),
                event => {
                    return Err(Error::Protocol(format!(
                        "unexpected message ending COPY: {event:?}"
                    )))
                }
            }
        }
    }

    /// Run `f` inside a transaction.
    ///
    /// If no transaction is in progress, one is started at the given
    /// isolation level and committed afterwards; if `f` fails (or leaves the
    /// transaction in a failed state), it is rolled back instead. Inside an
    /// already-active transaction `f` simply runs in it. Fails immediately
    /// if the connection is in a failed transaction.
    pub fn with_transaction(
        &mut self,
        isolation: IsolationLevel,
        f: impl FnOnce(&mut Conn) -> Result<()>,
    ) -> Result<()> {
        let old_status = self.transaction_status;

        if old_status == TransactionStatus::InFailedTransaction {
            return Err(Error::InvalidUsage("error in transaction".into()));
        }

        if old_status == TransactionStatus::NotInTransaction {
            self.execute(&format!(
                "BEGIN; SET TRANSACTION ISOLATION LEVEL {};",
                isolation.sql()
            ))?;
        }

        let mut outcome = f(self);

        if outcome.is_ok() && self.transaction_status == TransactionStatus::InFailedTransaction {
            outcome = Err(Error::InvalidUsage("error in transaction".into()));
        }

        match outcome {
            Ok(()) => {
                if old_status == TransactionStatus::NotInTransaction
                    && self.transaction_status == TransactionStatus::InTransaction
                {
                    self.execute("COMMIT;")?;
                }
                Ok(())
            }
            Err(e) => {
                if old_status == TransactionStatus::NotInTransaction {
                    let _ = self.execute("ROLLBACK;");
                }
                Err(e)
            }
        }
    }

    /// Run `f` under a savepoint.
    ///
    /// Inside an active transaction a savepoint is created and `f`'s failure
    /// rolls back to it, leaving the outer transaction usable. Outside a
    /// transaction this is [`Conn::with_transaction`]. Savepoints nest.
    pub fn with_savepoint(
        &mut self,
        isolation: IsolationLevel,
        f: impl FnOnce(&mut Conn) -> Result<()>,
    ) -> Result<()> {
        match self.transaction_status {
            TransactionStatus::InFailedTransaction => {
                return Err(Error::InvalidUsage("error in transaction".into()))
            }
            TransactionStatus::NotInTransaction => return self.with_transaction(isolation, f),
            TransactionStatus::InTransaction => {}
        }

        let savepoint = format!("sp{}", self.next_savepoint_id);
        self.next_savepoint_id += 1;

        self.execute(&format!("SAVEPOINT {savepoint};"))?;

        let mut outcome = f(self);

        if outcome.is_ok() && self.transaction_status == TransactionStatus::InFailedTransaction {
            outcome = Err(Error::InvalidUsage("error in transaction".into()));
        }

        if let Err(e) = outcome {
            let _ = self.execute(&format!("ROLLBACK TO {savepoint};"));
            return Err(e);
        }
        Ok(())
    }

    /// Send `Close 'S'` for a prepared statement.
    pub(crate) fn close_statement(&mut self, name: &str) -> Result<()> {
        self.check_status("close statement", ConnStatus::Ready)?;
        self.write_buffer.clear();
        frontend::write_close_statement(&mut self.write_buffer, name);
        self.flush_writes()
        // CloseComplete arrives with the next synchronized exchange and is
        // skipped by the reader.
    }

    /// Send `Close 'P'` for a portal.
    pub(crate) fn close_portal(&mut self, name: &str) -> Result<()> {
        self.check_status("close portal", ConnStatus::Ready)?;
        self.write_buffer.clear();
        frontend::write_close_portal(&mut self.write_buffer, name);
        self.flush_writes()
    }

    /// Reset per-session buffers when a pool takes the connection back.
    pub(crate) fn reset_for_pool(&mut self) {
        self.read_buffer.clear();
        self.write_buffer.clear();
        if self.status != ConnStatus::Disconnected {
            self.status = ConnStatus::Ready;
        }
    }

    pub(crate) fn mark_ready(&mut self) {
        self.status = ConnStatus::Ready;
    }

    fn check_status(&self, op: &'static str, wanted: ConnStatus) -> Result<()> {
        if self.status != wanted {
            return Err(Error::InvalidOpForState {
                op,
                state: self.status,
            });
        }
        Ok(())
    }

    fn flush_writes(&mut self) -> Result<()> {
        let stream = self.stream.get_mut();
        let result = stream
            .write_all(&self.write_buffer)
            .and_then(|_| stream.flush());
        if let Err(e) = result {
            // Any write failure is fatal to the session.
            self.status = ConnStatus::Disconnected;
            return Err(e.into());
        }
        Ok(())
    }

    /// Read one backend message into `read_buffer`, returning its code byte.
    ///
    /// Reads are total: `read_exact` loops until the requested bytes arrive
    /// or the stream fails, so a short read can never truncate a frame.
    fn read_message(&mut self) -> Result<u8> {
        let mut header = [0u8; 5];
        if let Err(e) = self.stream.read_exact(&mut header) {
            self.status = ConnStatus::Disconnected;
            return Err(e.into());
        }

        let code = header[0];
        let length = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        if length < 4 {
            self.status = ConnStatus::Disconnected;
            return Err(Error::Protocol(format!("invalid message length: {length}")));
        }

        self.read_buffer.clear();
        self.read_buffer.resize((length - 4) as usize, 0);
        if let Err(e) = self.stream.read_exact(&mut self.read_buffer) {
            self.status = ConnStatus::Disconnected;
            return Err(e.into());
        }

        conn_log!(
            self,
            LogLevel::Verbose,
            "received {:?} message ({} bytes)",
            code as char,
            length
        );
        Ok(code)
    }

    /// The message reader: pull messages one at a time and dispatch until a
    /// suspension point hands control back to the caller.
    pub(crate) fn process_backend_messages(&mut self) -> Result<BackendEvent> {
        loop {
            let code = self.read_message()?;

            match code {
                msg_type::AUTHENTICATION => self.handle_authentication()?,
                msg_type::BACKEND_KEY_DATA => {
                    let key = BackendKeyData::parse(&self.read_buffer)?;
                    self.backend_pid = key.process_id();
                    self.backend_secret_key = key.secret();
                }
                msg_type::PARAMETER_STATUS => self.handle_parameter_status()?,
                msg_type::NOTICE_RESPONSE => {
                    let notice = NoticeResponse::parse(&self.read_buffer)?;
                    conn_log!(self, LogLevel::Debug, "notice: {}", notice.0);
                }
                msg_type::CLOSE_COMPLETE => {}
                msg_type::EMPTY_QUERY_RESPONSE => {}
                msg_type::NOTIFICATION_RESPONSE => {
                    // Asynchronous notifications are not delivered.
                }
                msg_type::ERROR_RESPONSE => {
                    let err = ErrorResponse::parse(&self.read_buffer)?.0;
                    conn_log!(self, LogLevel::Error, "server error: {}", err);
                    if self.status == ConnStatus::ProcessingQuery {
                        // A result stream that errors is over; subsequent
                        // fetches must return cleanly instead of reading.
                        self.result.has_current_row = false;
                        self.result.current_result_complete = true;
                        self.result.all_results_complete = true;
                    }
                    if !self.on_error_dont_require_ready_for_query {
                        // The server error is what the caller needs to see;
                        // a drain failure only means the session is gone,
                        // which read_message already recorded.
                        if let Err(drain_err) = self.drain_to_ready_for_query() {
                            conn_log!(
                                self,
                                LogLevel::Debug,
                                "drain after server error failed: {}",
                                drain_err
                            );
                        }
                    }
                    return Err(Error::Server(err));
                }
                msg_type::BIND_COMPLETE => return Ok(BackendEvent::BindComplete),
                msg_type::PARSE_COMPLETE => return Ok(BackendEvent::ParseComplete),
                msg_type::COMMAND_COMPLETE => {
                    let complete = CommandComplete::parse(&self.read_buffer)?;
                    match complete.rows_affected() {
                        Some(n) => self.result.rows_affected = n,
                        None => conn_log!(
                            self,
                            LogLevel::Warning,
                            "no affected row count in command tag {:?}",
                            complete.tag
                        ),
                    }
                    self.result.has_current_row = false;
                    self.result.current_result_complete = true;
                    return Ok(BackendEvent::CommandComplete);
                }
                msg_type::DATA_ROW => {
                    self.handle_data_row()?;
                    return Ok(BackendEvent::Row);
                }
                msg_type::READY_FOR_QUERY => {
                    self.handle_ready_for_query()?;
                    return Ok(BackendEvent::ReadyForQuery);
                }
                msg_type::ROW_DESCRIPTION => {
                    self.handle_row_description()?;
                    return Ok(BackendEvent::RowDescription);
                }
                msg_type::NO_DATA => return Ok(BackendEvent::NoData),
                msg_type::COPY_IN_RESPONSE => {
                    CopyInResponse::parse(&self.read_buffer)?;
                    self.status = ConnStatus::Copy;
                    return Ok(BackendEvent::CopyIn);
                }
                msg_type::COPY_OUT_RESPONSE => {
                    return Err(Error::Protocol("COPY TO STDOUT is not supported".into()))
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected backend message code {:?}",
                        other as char
                    )))
                }
            }
        }
    }

    /// After an ErrorResponse with a Sync pending: eat messages through the
    /// following ReadyForQuery so the session can continue.
    fn drain_to_ready_for_query(&mut self) -> Result<()> {
        loop {
            let code = self.read_message()?;
            match code {
                msg_type::READY_FOR_QUERY => {
                    self.handle_ready_for_query()?;
                    return Ok(());
                }
                msg_type::PARAMETER_STATUS => self.handle_parameter_status()?,
                msg_type::NOTICE_RESPONSE => {
                    let notice = NoticeResponse::parse(&self.read_buffer)?;
                    conn_log!(self, LogLevel::Debug, "notice: {}", notice.0);
                }
                // Everything else in flight (rows of an abandoned result,
                // acks, even further errors) is discarded.
                _ => {}
            }
        }
    }

    fn handle_authentication(&mut self) -> Result<()> {
        let request = AuthenticationRequest::parse(&self.read_buffer)?;
        let (user, password) = match &self.startup_creds {
            Some((user, password)) => (user.clone(), password.clone()),
            None => {
                return Err(Error::Protocol(
                    "authentication request outside startup".into(),
                ))
            }
        };

        match request {
            AuthenticationRequest::Ok => Ok(()),
            AuthenticationRequest::CleartextPassword => {
                let password = password.ok_or_else(|| {
                    Error::InvalidUsage("password required but not provided".into())
                })?;
                self.write_buffer.clear();
                write_password(&mut self.write_buffer, &password);
                self.flush_writes()
            }
            AuthenticationRequest::Md5Password { salt } => {
                let password = password.ok_or_else(|| {
                    Error::InvalidUsage("password required but not provided".into())
                })?;
                let hashed = md5_password(&user, &password, &salt);
                self.write_buffer.clear();
                write_password(&mut self.write_buffer, &hashed);
                self.flush_writes()
            }
            AuthenticationRequest::Unsupported(kind) => Err(Error::AuthNotSupported(kind)),
        }
    }

    fn handle_parameter_status(&mut self) -> Result<()> {
        let param = ParameterStatus::parse(&self.read_buffer)?;
        conn_log!(
            self,
            LogLevel::Debug,
            "parameter status: {} = {:?}",
            param.name,
            param.value
        );

        if param.name == "DateStyle" {
            self.time_formats = datestyle::formats_for_style(param.value);
            if self.time_formats.is_none() {
                conn_log!(self, LogLevel::Warning, "unknown DateStyle: {}", param.value);
            }
        }

        let name = param.name.to_string();
        let value = param.value.to_string();
        self.runtime_parameters.insert(name, value);
        Ok(())
    }

    fn handle_row_description(&mut self) -> Result<()> {
        let desc = RowDescription::parse(&self.read_buffer)?;

        self.result.fields = desc
            .fields()
            .iter()
            .map(|f| Field {
                name: f.name.to_string(),
                type_oid: f.type_oid,
                format: f.format,
            })
            .collect();
        self.result.values = vec![None; self.result.fields.len()];
        self.result.name_index = self
            .result
            .fields
            .iter()
            .enumerate()
            .map(|(ord, f)| (f.name.clone(), ord))
            .collect();
        self.result.has_current_row = false;
        self.result.current_result_complete = false;
        Ok(())
    }

    fn handle_data_row(&mut self) -> Result<()> {
        let row = DataRow::parse(&self.read_buffer)?;
        if row.len() != self.result.fields.len() {
            return Err(Error::Protocol(format!(
                "DataRow with {} columns for a result of {} fields",
                row.len(),
                self.result.fields.len()
            )));
        }

        self.result.values.clear();
        self.result
            .values
            .extend(row.iter().map(|v| v.map(|bytes| bytes.to_vec())));
        if self.result.values.len() != self.result.fields.len() {
            return Err(Error::Protocol("truncated DataRow".into()));
        }
        self.result.has_current_row = true;
        Ok(())
    }

    fn handle_ready_for_query(&mut self) -> Result<()> {
        let ready = ReadyForQuery::parse(&self.read_buffer)?;
        self.transaction_status = ready.transaction_status()?;
        conn_log!(
            self,
            LogLevel::Debug,
            "ready for query, transaction status: {}",
            self.transaction_status
        );
        self.result.has_current_row = false;
        self.result.current_result_complete = true;
        self.result.all_results_complete = true;
        self.status = ConnStatus::Ready;
        Ok(())
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if self.status != ConnStatus::Disconnected {
            self.write_buffer.clear();
            write_terminate(&mut self.write_buffer);
            let stream = self.stream.get_mut();
            let _ = stream.write_all(&self.write_buffer);
            let _ = stream.flush();
        }
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("status", &self.status)
            .field("transaction_status", &self.transaction_status)
            .field("backend_pid", &self.backend_pid)
            .finish_non_exhaustive()
    }
}
