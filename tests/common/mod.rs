//! A scripted PostgreSQL backend for integration tests.
//!
//! Each test starts a loopback listener and a thread that plays the server
//! side of the v3 protocol from a script, asserting on every frontend
//! message it reads. Nothing here uses the library under test; framing is
//! written out by hand so the tests pin the wire format independently.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Server side of one accepted connection.
pub struct Backend {
    stream: TcpStream,
}

/// A one-connection scripted server.
pub struct MockServer {
    port: u16,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Start a listener and run `script` against the first connection.
    pub fn start(script: impl FnOnce(&mut Backend) + Send + 'static) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock listener");
        let port = listener.local_addr().expect("local addr").port();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            stream
                .set_read_timeout(Some(Duration::from_secs(10)))
                .expect("set timeout");
            let mut backend = Backend { stream };
            script(&mut backend);
        });

        MockServer {
            port,
            handle: Some(handle),
        }
    }

    /// Start a listener that serves every connection with `handler`.
    pub fn start_multi(
        handler: impl Fn(&mut Backend) + Send + Sync + 'static,
    ) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock listener");
        let port = listener.local_addr().expect("local addr").port();

        let handle = thread::spawn(move || {
            let handler = std::sync::Arc::new(handler);
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let _ = stream.set_read_timeout(Some(Duration::from_secs(30)));
                let handler = handler.clone();
                thread::spawn(move || {
                    let mut backend = Backend { stream };
                    handler(&mut backend);
                });
            }
        });

        MockServer {
            port,
            handle: Some(handle),
        }
    }

    /// Connection string pointing at the mock.
    pub fn conn_str(&self) -> String {
        format!(
            "host=127.0.0.1 port={} user=test password=secret dbname=testdb",
            self.port
        )
    }

    /// Wait for a single-connection script to finish, propagating its
    /// assertion failures into the test.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("mock server script failed");
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        // start_multi listeners run until the test process ends; detaching
        // here is fine because every assertion lives in the script threads.
        drop(self.handle.take());
    }
}

impl Backend {
    // === Reading frontend messages ===

    fn read_exact(&mut self, buf: &mut [u8]) {
        self.stream.read_exact(buf).expect("mock read");
    }

    /// Read the startup message, returning its parameter pairs.
    pub fn read_startup(&mut self) -> Vec<(String, String)> {
        let mut head = [0u8; 8];
        self.read_exact(&mut head);
        let len = i32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize;
        let version = i32::from_be_bytes([head[4], head[5], head[6], head[7]]);
        assert_eq!(version, 196608, "protocol version must be 3.0");

        let mut body = vec![0u8; len - 8];
        self.read_exact(&mut body);

        let mut pairs = Vec::new();
        let mut rest = &body[..];
        while !rest.is_empty() && rest[0] != 0 {
            let (name, r) = take_cstr(rest);
            let (value, r) = take_cstr(r);
            pairs.push((name, value));
            rest = r;
        }
        pairs
    }

    /// Read one regular frontend message.
    pub fn read_message(&mut self) -> (u8, Vec<u8>) {
        let mut head = [0u8; 5];
        self.read_exact(&mut head);
        let code = head[0];
        let len = i32::from_be_bytes([head[1], head[2], head[3], head[4]]) as usize;
        let mut payload = vec![0u8; len - 4];
        self.read_exact(&mut payload);
        (code, payload)
    }

    fn expect(&mut self, wanted: u8) -> Vec<u8> {
        let (code, payload) = self.read_message();
        assert_eq!(
            code as char, wanted as char,
            "expected frontend message {:?}",
            wanted as char
        );
        payload
    }

    /// Expect a Query message and return its SQL text.
    pub fn expect_query(&mut self) -> String {
        let payload = self.expect(b'Q');
        take_cstr(&payload).0
    }

    /// Expect a PasswordMessage and return its text.
    pub fn expect_password(&mut self) -> String {
        let payload = self.expect(b'p');
        take_cstr(&payload).0
    }

    /// Expect a Parse message: (statement name, query, parameter OIDs).
    pub fn expect_parse(&mut self) -> (String, String, Vec<i32>) {
        let payload = self.expect(b'P');
        let (name, rest) = take_cstr(&payload);
        let (query, rest) = take_cstr(rest);
        let count = i16::from_be_bytes([rest[0], rest[1]]) as usize;
        let mut oids = Vec::new();
        for i in 0..count {
            let at = 2 + i * 4;
            oids.push(i32::from_be_bytes([
                rest[at],
                rest[at + 1],
                rest[at + 2],
                rest[at + 3],
            ]));
        }
        (name, query, oids)
    }

    /// Expect a Bind message: (portal, statement, values).
    pub fn expect_bind(&mut self) -> (String, String, Vec<Option<Vec<u8>>>) {
        let payload = self.expect(b'B');
        let (portal, rest) = take_cstr(&payload);
        let (statement, rest) = take_cstr(rest);

        let fmt_count = i16::from_be_bytes([rest[0], rest[1]]) as usize;
        let mut at = 2;
        for _ in 0..fmt_count {
            let fmt = i16::from_be_bytes([rest[at], rest[at + 1]]);
            assert_eq!(fmt, 0, "parameters must be bound in text format");
            at += 2;
        }

        let value_count = i16::from_be_bytes([rest[at], rest[at + 1]]) as usize;
        at += 2;
        let mut values = Vec::new();
        for _ in 0..value_count {
            let len = i32::from_be_bytes([
                rest[at],
                rest[at + 1],
                rest[at + 2],
                rest[at + 3],
            ]);
            at += 4;
            if len == -1 {
                values.push(None);
            } else {
                values.push(Some(rest[at..at + len as usize].to_vec()));
                at += len as usize;
            }
        }

        let result_fmt_count = i16::from_be_bytes([rest[at], rest[at + 1]]) as usize;
        at += 2;
        for _ in 0..result_fmt_count {
            let fmt = i16::from_be_bytes([rest[at], rest[at + 1]]);
            assert_eq!(fmt, 0, "results must be requested in text format");
            at += 2;
        }

        (portal, statement, values)
    }

    /// Expect a Describe message: (kind byte, name).
    pub fn expect_describe(&mut self) -> (u8, String) {
        let payload = self.expect(b'D');
        (payload[0], take_cstr(&payload[1..]).0)
    }

    /// Expect an Execute message: (portal, max rows).
    pub fn expect_execute(&mut self) -> (String, i32) {
        let payload = self.expect(b'E');
        let (portal, rest) = take_cstr(&payload);
        let max_rows = i32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        (portal, max_rows)
    }

    /// Expect a Close message: (kind byte, name).
    pub fn expect_close(&mut self) -> (u8, String) {
        let payload = self.expect(b'C');
        (payload[0], take_cstr(&payload[1..]).0)
    }

    pub fn expect_sync(&mut self) {
        self.expect(b'S');
    }

    pub fn expect_flush(&mut self) {
        self.expect(b'H');
    }

    pub fn expect_terminate(&mut self) {
        self.expect(b'X');
    }

    /// Expect a CopyData message and return its bytes.
    pub fn expect_copy_data(&mut self) -> Vec<u8> {
        self.expect(b'd')
    }

    pub fn expect_copy_done(&mut self) {
        self.expect(b'c');
    }

    /// Expect a CopyFail message and return its cause.
    pub fn expect_copy_fail(&mut self) -> String {
        let payload = self.expect(b'f');
        take_cstr(&payload).0
    }

    /// Read messages until EOF, asserting nothing. Lets a script wind down
    /// without caring about trailing Terminate/Close traffic.
    pub fn drain_until_eof(&mut self) {
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }

    // === Writing backend messages ===

    fn send(&mut self, code: u8, payload: &[u8]) {
        let mut msg = Vec::with_capacity(5 + payload.len());
        msg.push(code);
        msg.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
        msg.extend_from_slice(payload);
        self.stream.write_all(&msg).expect("mock write");
        self.stream.flush().expect("mock flush");
    }

    /// Send a message one byte at a time, exercising the client's
    /// total-read loop.
    fn send_slowly(&mut self, code: u8, payload: &[u8]) {
        let mut msg = Vec::with_capacity(5 + payload.len());
        msg.push(code);
        msg.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
        msg.extend_from_slice(payload);
        for byte in msg {
            self.stream.write_all(&[byte]).expect("mock write");
            self.stream.flush().expect("mock flush");
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn send_auth_ok(&mut self) {
        self.send(b'R', &0i32.to_be_bytes());
    }

    pub fn send_auth_cleartext(&mut self) {
        self.send(b'R', &3i32.to_be_bytes());
    }

    pub fn send_auth_md5(&mut self, salt: [u8; 4]) {
        let mut payload = 5i32.to_be_bytes().to_vec();
        payload.extend_from_slice(&salt);
        self.send(b'R', &payload);
    }

    pub fn send_auth_unsupported(&mut self, kind: i32) {
        self.send(b'R', &kind.to_be_bytes());
    }

    pub fn send_parameter_status(&mut self, name: &str, value: &str) {
        let mut payload = Vec::new();
        push_cstr(&mut payload, name);
        push_cstr(&mut payload, value);
        self.send(b'S', &payload);
    }

    pub fn send_backend_key_data(&mut self, pid: i32, secret: i32) {
        let mut payload = pid.to_be_bytes().to_vec();
        payload.extend_from_slice(&secret.to_be_bytes());
        self.send(b'K', &payload);
    }

    pub fn send_ready_for_query(&mut self, status: u8) {
        self.send(b'Z', &[status]);
    }

    /// Send a RowDescription with text-format columns.
    pub fn send_row_description(&mut self, fields: &[(&str, u32)]) {
        let formatted: Vec<(&str, u32, u16)> =
            fields.iter().map(|&(n, o)| (n, o, 0)).collect();
        self.send_row_description_formats(&formatted);
    }

    /// Send a RowDescription with explicit per-column formats.
    pub fn send_row_description_formats(&mut self, fields: &[(&str, u32, u16)]) {
        let mut payload = (fields.len() as u16).to_be_bytes().to_vec();
        for &(name, oid, format) in fields {
            push_cstr(&mut payload, name);
            payload.extend_from_slice(&0u32.to_be_bytes()); // table oid
            payload.extend_from_slice(&0i16.to_be_bytes()); // column id
            payload.extend_from_slice(&oid.to_be_bytes());
            payload.extend_from_slice(&(-1i16).to_be_bytes()); // size
            payload.extend_from_slice(&(-1i32).to_be_bytes()); // modifier
            payload.extend_from_slice(&format.to_be_bytes());
        }
        self.send(b'T', &payload);
    }

    pub fn send_data_row(&mut self, values: &[Option<&[u8]>]) {
        let mut payload = (values.len() as u16).to_be_bytes().to_vec();
        for value in values {
            match value {
                Some(bytes) => {
                    payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    payload.extend_from_slice(bytes);
                }
                None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        self.send(b'D', &payload);
    }

    /// Send a DataRow byte-by-byte to exercise short reads.
    pub fn send_data_row_slowly(&mut self, values: &[Option<&[u8]>]) {
        let mut payload = (values.len() as u16).to_be_bytes().to_vec();
        for value in values {
            match value {
                Some(bytes) => {
                    payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    payload.extend_from_slice(bytes);
                }
                None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        self.send_slowly(b'D', &payload);
    }

    pub fn send_command_complete(&mut self, tag: &str) {
        let mut payload = Vec::new();
        push_cstr(&mut payload, tag);
        self.send(b'C', &payload);
    }

    pub fn send_empty_query_response(&mut self) {
        self.send(b'I', &[]);
    }

    pub fn send_parse_complete(&mut self) {
        self.send(b'1', &[]);
    }

    pub fn send_bind_complete(&mut self) {
        self.send(b'2', &[]);
    }

    pub fn send_close_complete(&mut self) {
        self.send(b'3', &[]);
    }

    pub fn send_no_data(&mut self) {
        self.send(b'n', &[]);
    }

    pub fn send_copy_in_response(&mut self, columns: u16) {
        let mut payload = vec![0u8]; // text format
        payload.extend_from_slice(&columns.to_be_bytes());
        for _ in 0..columns {
            payload.extend_from_slice(&0u16.to_be_bytes());
        }
        self.send(b'G', &payload);
    }

    pub fn send_notice(&mut self, message: &str) {
        let mut payload = Vec::new();
        payload.push(b'S');
        push_cstr(&mut payload, "NOTICE");
        payload.push(b'M');
        push_cstr(&mut payload, message);
        payload.push(0);
        self.send(b'N', &payload);
    }

    pub fn send_error(&mut self, severity: &str, code: &str, message: &str) {
        let mut payload = Vec::new();
        payload.push(b'S');
        push_cstr(&mut payload, severity);
        payload.push(b'C');
        push_cstr(&mut payload, code);
        payload.push(b'M');
        push_cstr(&mut payload, message);
        payload.push(0);
        self.send(b'E', &payload);
    }

    // === Composite steps ===

    /// Startup with trust (no password): parameters, key data, ready.
    pub fn handshake(&mut self) {
        self.read_startup();
        self.send_auth_ok();
        self.finish_handshake();
    }

    /// Startup demanding an MD5 password response.
    pub fn handshake_md5(&mut self, salt: [u8; 4]) -> String {
        self.read_startup();
        self.send_auth_md5(salt);
        let password = self.expect_password();
        self.send_auth_ok();
        self.finish_handshake();
        password
    }

    fn finish_handshake(&mut self) {
        self.send_parameter_status("server_version", "16.3");
        self.send_parameter_status("DateStyle", "ISO, MDY");
        self.send_backend_key_data(4242, 314159);
        self.send_ready_for_query(b'I');
    }

    /// Respond to one expected Query with command tags and a final
    /// ReadyForQuery carrying `tx_status`.
    pub fn answer_query(&mut self, expected_sql: &str, tags: &[&str], tx_status: u8) {
        let sql = self.expect_query();
        assert_eq!(sql, expected_sql);
        for tag in tags {
            self.send_command_complete(tag);
        }
        self.send_ready_for_query(tx_status);
    }
}

fn take_cstr(data: &[u8]) -> (String, &[u8]) {
    let pos = data
        .iter()
        .position(|&b| b == 0)
        .expect("missing null terminator");
    (
        String::from_utf8(data[..pos].to_vec()).expect("invalid utf8"),
        &data[pos + 1..],
    )
}

fn push_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}
