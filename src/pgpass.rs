//! The `.pgpass` credential file.
//!
//! Lines are `host:port:database:user:password`, `*` matches any value in
//! the first four fields, the first matching line wins. The file must be a
//! regular file without group/world permission bits or the lookup fails.

use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Look up a password for the given connection coordinates.
///
/// Returns `Ok(None)` when the file does not exist or no line matches.
pub fn lookup(host: &str, port: u16, database: &str, user: &str) -> Result<Option<String>> {
    let path = match file_path() {
        Some(p) => p,
        None => return Ok(None),
    };
    if !path.exists() {
        return Ok(None);
    }

    let metadata = fs::metadata(&path)?;
    if !metadata.is_file() {
        return Err(Error::InvalidUsage(format!(
            "password file {} is not a regular file",
            path.display()
        )));
    }
    if metadata.permissions().mode() & 0o077 != 0 {
        return Err(Error::InvalidUsage(format!(
            "password file {} has group or world access; permissions should be u=rw (0600) or less",
            path.display()
        )));
    }

    let mut contents = String::new();
    fs::File::open(&path)?.read_to_string(&mut contents)?;

    Ok(search(&contents, host, &port.to_string(), database, user))
}

fn file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PGPASSFILE") {
        return Some(PathBuf::from(path));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".pgpass"))
}

/// Find the password on the first line whose four key fields all match.
fn search(contents: &str, host: &str, port: &str, database: &str, user: &str) -> Option<String> {
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.splitn(5, ':');
        let (Some(h), Some(p), Some(d), Some(u), Some(password)) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            continue;
        };

        if matches(h, host) && matches(p, port) && matches(d, database) && matches(u, user) {
            return Some(password.to_string());
        }
    }
    None
}

fn matches(pattern: &str, value: &str) -> bool {
    pattern == "*" || pattern == value
}
