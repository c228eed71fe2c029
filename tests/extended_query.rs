//! Extended-protocol statement tests against a scripted backend.

mod common;

use common::MockServer;
use pgsql::{Conn, Error, LogLevel, Parameter, PgType, ScanTarget, Value};

#[test]
fn prepared_statement_round_trip() {
    let server = MockServer::start(|be| {
        be.handshake();

        // Prepare
        let (name, query, oids) = be.expect_parse();
        assert_eq!(name, "stmt0");
        assert_eq!(query, "SELECT id FROM table1 WHERE id = $1;");
        assert_eq!(oids, vec![23]);
        be.expect_flush();
        be.send_parse_complete();

        // First execution: @id = 2
        let (portal, stmt, values) = be.expect_bind();
        assert_eq!(portal, "prtl0");
        assert_eq!(stmt, "stmt0");
        assert_eq!(values, vec![Some(b"2".to_vec())]);
        be.expect_flush();
        be.send_bind_complete();

        let (kind, name) = be.expect_describe();
        assert_eq!(kind, b'P');
        assert_eq!(name, "prtl0");
        be.expect_flush();
        be.send_row_description(&[("id", 23)]);

        let (portal, max_rows) = be.expect_execute();
        assert_eq!(portal, "prtl0");
        assert_eq!(max_rows, 0);
        be.expect_sync();
        be.send_data_row(&[Some(b"2")]);
        be.send_command_complete("SELECT 1");
        be.send_ready_for_query(b'I');

        // ResultSet close releases the portal.
        let (kind, name) = be.expect_close();
        assert_eq!((kind, name.as_str()), (b'P', "prtl0"));

        // Second execution: @id = 3. The pending portal Close is answered
        // once the next Flush forces responses out.
        let (_, _, values) = be.expect_bind();
        assert_eq!(values, vec![Some(b"3".to_vec())]);
        be.expect_flush();
        be.send_close_complete();
        be.send_bind_complete();

        be.expect_describe();
        be.expect_flush();
        be.send_row_description(&[("id", 23)]);

        be.expect_execute();
        be.expect_sync();
        be.send_data_row(&[Some(b"3")]);
        be.send_command_complete("SELECT 1");
        be.send_ready_for_query(b'I');

        let (kind, _) = be.expect_close();
        assert_eq!(kind, b'P');

        // Statement close.
        let (kind, name) = be.expect_close();
        assert_eq!((kind, name.as_str()), (b'S', "stmt0"));

        be.drain_until_eof();
    });

    let mut conn = Conn::connect(&server.conn_str(), LogLevel::Nothing).unwrap();

    let mut stmt = conn
        .prepare(
            "SELECT id FROM table1 WHERE id = @id;",
            vec![Parameter::new("@id", PgType::Integer)],
        )
        .unwrap();
    assert_eq!(stmt.command(), "SELECT id FROM table1 WHERE id = @id;");
    assert_eq!(stmt.actual_command(), "SELECT id FROM table1 WHERE id = $1;");
    assert_eq!(stmt.parameters().len(), 1);
    assert!(stmt.parameter("@id").is_some());
    assert!(!stmt.is_closed());

    stmt.set_value("@id", Value::Int32(2)).unwrap();
    let mut rs = stmt.query(&mut conn).unwrap();
    assert!(rs.fetch_next().unwrap());
    assert_eq!(rs.int32(0).unwrap(), Some(2));
    assert!(!rs.fetch_next().unwrap());
    rs.close().unwrap();

    stmt.set_value("@id", Value::Int32(3)).unwrap();
    let mut rs = stmt.query(&mut conn).unwrap();
    assert!(rs.fetch_next().unwrap());
    assert_eq!(rs.int32(0).unwrap(), Some(3));
    rs.close().unwrap();

    stmt.close(&mut conn).unwrap();
    assert!(stmt.is_closed());
    // Closing again is an error.
    assert!(matches!(
        stmt.close(&mut conn),
        Err(Error::InvalidUsage(_))
    ));

    conn.close().unwrap();
    server.join();
}

#[test]
fn null_parameter_and_rowless_statement() {
    let server = MockServer::start(|be| {
        be.handshake();

        let (_, query, oids) = be.expect_parse();
        assert_eq!(query, "INSERT INTO t (v) VALUES ($1);");
        assert_eq!(oids, vec![1043]);
        be.expect_flush();
        be.send_parse_complete();

        let (_, _, values) = be.expect_bind();
        assert_eq!(values, vec![None]);
        be.expect_flush();
        be.send_bind_complete();

        be.expect_describe();
        be.expect_flush();
        be.send_no_data();

        be.expect_execute();
        be.expect_sync();
        be.send_command_complete("INSERT 0 1");
        be.send_ready_for_query(b'I');

        let (kind, _) = be.expect_close();
        assert_eq!(kind, b'P');

        be.drain_until_eof();
    });

    let mut conn = Conn::connect(&server.conn_str(), LogLevel::Nothing).unwrap();
    let stmt = conn
        .prepare(
            "INSERT INTO t (v) VALUES (@v);",
            vec![Parameter::new("@v", PgType::Varchar)],
        )
        .unwrap();

    // The parameter was never set: NULL goes over the wire as length -1.
    assert_eq!(stmt.execute(&mut conn).unwrap(), 1);

    conn.close().unwrap();
    server.join();
}

#[test]
fn query_with_owns_its_statement() {
    let server = MockServer::start(|be| {
        be.handshake();

        let (name, query, _) = be.expect_parse();
        assert_eq!(query, "SELECT name FROM person WHERE id = $1;");
        be.expect_flush();
        be.send_parse_complete();

        be.expect_bind();
        be.expect_flush();
        be.send_bind_complete();
        be.expect_describe();
        be.expect_flush();
        be.send_row_description(&[("name", 25)]);
        be.expect_execute();
        be.expect_sync();
        be.send_data_row(&[Some(b"Mia")]);
        be.send_command_complete("SELECT 1");
        be.send_ready_for_query(b'I');

        // Closing the result set releases the portal and the statement.
        let (kind, _) = be.expect_close();
        assert_eq!(kind, b'P');
        let (kind, closed_name) = be.expect_close();
        assert_eq!(kind, b'S');
        assert_eq!(closed_name, name);

        be.drain_until_eof();
    });

    let mut conn = Conn::connect(&server.conn_str(), LogLevel::Nothing).unwrap();

    let mut param = Parameter::new("@id", PgType::Integer);
    param.set_value(Value::Int32(1)).unwrap();

    let mut rs = conn
        .query_with("SELECT name FROM person WHERE id = @id;", vec![param])
        .unwrap();
    let mut name = String::new();
    assert!(rs.scan_next(&mut [ScanTarget::String(&mut name)]).unwrap());
    assert_eq!(name, "Mia");
    rs.close().unwrap();

    conn.close().unwrap();
    server.join();
}

#[test]
fn parse_error_does_not_wait_for_ready() {
    let server = MockServer::start(|be| {
        be.handshake();

        be.expect_parse();
        be.expect_flush();
        // No Sync is pending, so no ReadyForQuery follows the error.
        be.send_error("ERROR", "42601", "syntax error at or near \"FROM\"");

        // The connection is still usable for the next command.
        be.answer_query("SELECT 1;", &["SELECT 1"], b'I');
        be.drain_until_eof();
    });

    let mut conn = Conn::connect(&server.conn_str(), LogLevel::Nothing).unwrap();

    let err = conn.prepare("FROM WHERE SELECT;", vec![]).unwrap_err();
    assert_eq!(err.sqlstate(), Some("42601"));

    assert_eq!(conn.execute("SELECT 1;").unwrap(), 1);

    conn.close().unwrap();
    server.join();
}

#[test]
fn char_parameters_parse_as_varchar() {
    let server = MockServer::start(|be| {
        be.handshake();
        let (_, _, oids) = be.expect_parse();
        // CHAR must be declared as VARCHAR on the wire.
        assert_eq!(oids, vec![1043, 23]);
        be.expect_flush();
        be.send_parse_complete();
        be.drain_until_eof();
    });

    let mut conn = Conn::connect(&server.conn_str(), LogLevel::Nothing).unwrap();
    conn.prepare(
        "SELECT * FROM t WHERE code = @code AND n = @n;",
        vec![
            Parameter::new("@code", PgType::Char),
            Parameter::new("@n", PgType::Integer),
        ],
    )
    .unwrap();

    conn.close().unwrap();
    server.join();
}

#[test]
fn custom_type_parameter_casts_and_infers() {
    let server = MockServer::start(|be| {
        be.handshake();
        let (_, query, oids) = be.expect_parse();
        assert_eq!(query, "UPDATE person SET mood = $1::mood WHERE id = $2;");
        assert_eq!(oids, vec![0, 23]);
        be.expect_flush();
        be.send_parse_complete();

        let (_, _, values) = be.expect_bind();
        assert_eq!(values, vec![Some(b"happy".to_vec()), Some(b"4".to_vec())]);
        be.expect_flush();
        be.send_bind_complete();
        be.expect_describe();
        be.expect_flush();
        be.send_no_data();
        be.expect_execute();
        be.expect_sync();
        be.send_command_complete("UPDATE 1");
        be.send_ready_for_query(b'I');
        let _ = be.expect_close();

        be.drain_until_eof();
    });

    let mut conn = Conn::connect(&server.conn_str(), LogLevel::Nothing).unwrap();

    let mut stmt = conn
        .prepare(
            "UPDATE person SET mood = @mood WHERE id = @id;",
            vec![
                Parameter::custom("@mood", "mood"),
                Parameter::new("@id", PgType::Integer),
            ],
        )
        .unwrap();

    stmt.set_value("@mood", Value::String("happy".into())).unwrap();
    stmt.set_value("@id", Value::Int32(4)).unwrap();
    assert_eq!(stmt.execute(&mut conn).unwrap(), 1);

    conn.close().unwrap();
    server.join();
}
