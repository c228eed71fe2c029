//! A blocking PostgreSQL frontend library.
//!
//! pgsql speaks the PostgreSQL v3.0 frontend/backend wire protocol over TCP
//! against servers of version 7.4 and later. It provides authenticated
//! sessions (cleartext and MD5), simple and extended-protocol SQL with named
//! parameters, row-by-row result streaming with typed accessors,
//! transactions and savepoints, `COPY ... FROM STDIN` streaming, and a
//! bounded connection pool for concurrent workers.
//!
//! # Example
//!
//! ```no_run
//! use pgsql::{Conn, LogLevel, Parameter, PgType, ScanTarget, Value};
//!
//! fn main() -> pgsql::Result<()> {
//!     let mut conn = Conn::connect("host=localhost user=postgres password=secret", LogLevel::Error)?;
//!
//!     let mut stmt = conn.prepare(
//!         "SELECT name FROM person WHERE id = @id;",
//!         vec![Parameter::new("@id", PgType::Integer)],
//!     )?;
//!
//!     stmt.set_value("@id", Value::Int32(2))?;
//!     let mut name = String::new();
//!     if stmt.scan(&mut conn, &mut [ScanTarget::String(&mut name)])? {
//!         println!("person 2 is {name}");
//!     }
//!
//!     stmt.close(&mut conn)?;
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

mod conn;
mod datestyle;
mod error;
mod logging;
mod opts;
mod parameter;
mod pgpass;
mod pool;
pub mod protocol;
mod resultset;
mod statement;
mod value;

pub use conn::{Conn, ConnStatus, IsolationLevel};
pub use error::{Error, Result, ServerError};
pub use logging::LogLevel;
pub use opts::ConnParams;
pub use parameter::Parameter;
pub use pool::Pool;
pub use protocol::types::{PgType, TransactionStatus};
pub use resultset::{ResultSet, ScanTarget};
pub use statement::Statement;
pub use value::Value;
