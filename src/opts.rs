//! Connection parameters.
//!
//! Parsed from a libpq-style connection string of whitespace-separated
//! `keyword=value` pairs. Values may be single-quoted; quotes are required
//! for empty values or values containing spaces. The environment variables
//! `PGHOST`, `PGPORT`, `PGDATABASE` and `PGUSER` override parsed values when
//! set, and a missing password is looked up in the credential file.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::pgpass;

/// Parsed connection parameters.
#[derive(Debug, Clone)]
pub struct ConnParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    /// Read timeout in seconds; 0 disables the timeout.
    pub timeout_seconds: u64,
}

impl ConnParams {
    /// Parse a connection string, applying environment overrides, defaults
    /// and the credential-file lookup.
    ///
    /// Recognized keywords: `host`, `port`, `dbname`, `user`, `password`,
    /// `timeout`.
    pub fn parse(conn_str: &str) -> Result<Self> {
        Self::parse_with_env(conn_str, |name| std::env::var(name).ok())
    }

    /// Parse with an explicit environment lookup, for tests.
    pub(crate) fn parse_with_env(
        conn_str: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut pairs = parse_keyword_values(conn_str)?;

        if let Some(host) = env("PGHOST") {
            pairs.insert("host".into(), host);
        }
        if let Some(port) = env("PGPORT") {
            pairs.insert("port".into(), port);
        }
        if let Some(database) = env("PGDATABASE") {
            pairs.insert("dbname".into(), database);
        }
        if let Some(user) = env("PGUSER") {
            pairs.insert("user".into(), user);
        }

        let host = pairs
            .get("host")
            .filter(|h| !h.is_empty())
            .cloned()
            .unwrap_or_else(|| "localhost".to_string());
        let port = match pairs.get("port") {
            Some(p) if !p.is_empty() => p
                .parse()
                .map_err(|_| Error::InvalidUsage(format!("invalid port: {p:?}")))?,
            _ => 5432,
        };
        let user = pairs.get("user").cloned().unwrap_or_default();
        let database = pairs
            .get("dbname")
            .filter(|d| !d.is_empty())
            .cloned()
            .unwrap_or_else(|| user.clone());
        let timeout_seconds = match pairs.get("timeout") {
            Some(t) if !t.is_empty() => t
                .parse()
                .map_err(|_| Error::InvalidUsage(format!("invalid timeout: {t:?}")))?,
            _ => 0,
        };

        let password = match pairs.get("password") {
            Some(p) => Some(p.clone()),
            None => pgpass::lookup(&host, port, &database, &user)?,
        };

        Ok(ConnParams {
            host,
            port,
            user,
            password,
            database,
            timeout_seconds,
        })
    }
}

/// Split a connection string into keyword/value pairs.
///
/// The grammar is `keyword = value` with optional spaces around `=` and
/// single quotes around values. A quote inside a value is not supported
/// (matching the server-side syntax this mirrors).
fn parse_keyword_values(s: &str) -> Result<HashMap<String, String>> {
    let mut pairs = HashMap::new();
    let mut rest = s.trim_start();

    while !rest.is_empty() {
        let eq = match rest.find('=') {
            Some(i) => i,
            None => {
                return Err(Error::InvalidUsage(format!(
                    "expected keyword=value near {rest:?}"
                )))
            }
        };
        let keyword = rest[..eq].trim();
        if keyword.is_empty() || keyword.contains(char::is_whitespace) {
            return Err(Error::InvalidUsage(format!(
                "invalid keyword near {rest:?}"
            )));
        }

        rest = rest[eq + 1..].trim_start();
        let value;
        if let Some(quoted) = rest.strip_prefix('\'') {
            let end = quoted.find('\'').ok_or_else(|| {
                Error::InvalidUsage(format!("unterminated quote in value of {keyword:?}"))
            })?;
            value = quoted[..end].to_string();
            rest = &quoted[end + 1..];
        } else {
            let end = rest
                .find(char::is_whitespace)
                .unwrap_or(rest.len());
            value = rest[..end].to_string();
            rest = &rest[end..];
        }

        pairs.insert(keyword.to_string(), value);
        rest = rest.trim_start();
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_basic() {
        let p = ConnParams::parse_with_env(
            "host=db.example.com port=5433 user=alice password=wonder dbname=app timeout=30",
            no_env,
        )
        .unwrap();
        assert_eq!(p.host, "db.example.com");
        assert_eq!(p.port, 5433);
        assert_eq!(p.user, "alice");
        assert_eq!(p.password.as_deref(), Some("wonder"));
        assert_eq!(p.database, "app");
        assert_eq!(p.timeout_seconds, 30);
    }

    #[test]
    fn test_defaults() {
        let p = ConnParams::parse_with_env("user=alice password=x", no_env).unwrap();
        assert_eq!(p.host, "localhost");
        assert_eq!(p.port, 5432);
        // dbname defaults to the user name.
        assert_eq!(p.database, "alice");
        assert_eq!(p.timeout_seconds, 0);
    }

    #[test]
    fn test_quoted_values_and_loose_equals() {
        let p = ConnParams::parse_with_env(
            "host = localhost user=bob password='sec ret' dbname=''",
            no_env,
        )
        .unwrap();
        assert_eq!(p.password.as_deref(), Some("sec ret"));
        // Empty quoted dbname falls back to the user default.
        assert_eq!(p.database, "bob");
    }

    #[test]
    fn test_env_overrides() {
        let env = |name: &str| match name {
            "PGHOST" => Some("envhost".to_string()),
            "PGPORT" => Some("6000".to_string()),
            "PGUSER" => Some("envuser".to_string()),
            _ => None,
        };
        let p =
            ConnParams::parse_with_env("host=confhost user=confuser password=x", env).unwrap();
        assert_eq!(p.host, "envhost");
        assert_eq!(p.port, 6000);
        assert_eq!(p.user, "envuser");
    }

    #[test]
    fn test_malformed_strings() {
        assert!(ConnParams::parse_with_env("host", no_env).is_err());
        assert!(ConnParams::parse_with_env("host='unterminated", no_env).is_err());
        assert!(ConnParams::parse_with_env("port=abc password=x", no_env).is_err());
    }
}
