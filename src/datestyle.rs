//! DateStyle-derived text formats for temporal values.
//!
//! The session `DateStyle` runtime parameter selects how the server renders
//! dates, times and timestamps in text format. The connection keeps the
//! matching chrono format strings and re-derives them whenever the server
//! reports a DateStyle change.
//!
//! Sub-second fractions are stripped before parsing; the resolution of every
//! temporal value in this library is whole Unix seconds.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{Error, Result};
use crate::protocol::types::PgType;

/// How a TimestampTZ value carries its zone in text format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TzSuffix {
    /// ISO style: a trailing numeric offset like `-07` or `+05:30`.
    HourOffset,
    /// SQL/Postgres/German styles: a trailing abbreviation like ` MST`.
    /// The abbreviation does not identify an offset, so the wall clock is
    /// taken as UTC.
    NamedZone,
}

/// The text formats derived from one DateStyle setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFormats {
    /// chrono format for DATE values
    pub date: &'static str,
    /// chrono format for TIME values
    pub time: &'static str,
    /// chrono format for TIMESTAMP values
    pub timestamp: &'static str,
    /// zone handling for TIMESTAMPTZ values
    pub timestamp_tz: TzSuffix,
}

/// Derive the text formats for a DateStyle value, e.g. `"ISO, MDY"`.
///
/// Returns `None` for styles this library does not know; temporal decoding
/// is then impossible until the style changes.
pub fn formats_for_style(style: &str) -> Option<TimeFormats> {
    let mut parts = style.split(',').map(str::trim);
    let name = parts.next().unwrap_or("");
    let order = parts.next().unwrap_or("");

    let formats = match (name, order) {
        ("ISO", _) => TimeFormats {
            date: "%Y-%m-%d",
            time: "%H:%M:%S",
            timestamp: "%Y-%m-%d %H:%M:%S",
            timestamp_tz: TzSuffix::HourOffset,
        },
        ("SQL", "" | "MDY") => TimeFormats {
            date: "%m/%d/%Y",
            time: "%H:%M:%S",
            timestamp: "%m/%d/%Y %H:%M:%S",
            timestamp_tz: TzSuffix::NamedZone,
        },
        ("SQL", "DMY") => TimeFormats {
            date: "%d/%m/%Y",
            time: "%H:%M:%S",
            timestamp: "%d/%m/%Y %H:%M:%S",
            timestamp_tz: TzSuffix::NamedZone,
        },
        ("Postgres", "" | "DMY") => TimeFormats {
            date: "%d-%m-%Y",
            time: "%H:%M:%S",
            timestamp: "%a %d %b %H:%M:%S %Y",
            timestamp_tz: TzSuffix::NamedZone,
        },
        ("Postgres", "MDY") => TimeFormats {
            date: "%m-%d-%Y",
            time: "%H:%M:%S",
            timestamp: "%a %b %d %H:%M:%S %Y",
            timestamp_tz: TzSuffix::NamedZone,
        },
        ("German", _) => TimeFormats {
            date: "%d.%m.%Y",
            time: "%H:%M:%S",
            timestamp: "%d.%m.%Y %H:%M:%S",
            timestamp_tz: TzSuffix::NamedZone,
        },
        _ => return None,
    };

    Some(formats)
}

/// Strip a fractional-seconds part, keeping any trailing zone suffix.
///
/// `"12:34:56.789-07"` becomes `"12:34:56-07"`; `"12:34:56.789"` becomes
/// `"12:34:56"`. Strings without fractions pass through unchanged.
fn strip_fraction(s: &str) -> String {
    let last_colon = s.rfind(':');
    let last_dot = s.rfind('.');
    match (last_colon, last_dot) {
        (Some(colon), Some(dot)) if colon < dot => {
            match s[dot..].find(['+', '-']) {
                Some(rel) => format!("{}{}", &s[..dot], &s[dot + rel..]),
                None => s[..dot].to_string(),
            }
        }
        _ => s.to_string(),
    }
}

/// Split a trailing numeric offset (`-07`, `+05:30`, `-07:30:36`) off the
/// end of `s`, returning the remaining text and the offset in seconds.
fn split_hour_offset(s: &str) -> Result<(&str, i64)> {
    let pos = s
        .rfind(['+', '-'])
        .ok_or_else(|| Error::Decode(format!("missing timezone offset in {s:?}")))?;
    let (rest, offset) = s.split_at(pos);
    let sign: i64 = if offset.starts_with('-') { -1 } else { 1 };

    let mut total = 0i64;
    for (i, unit) in offset[1..].split(':').enumerate() {
        if i > 2 || unit.is_empty() || !unit.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Decode(format!("invalid timezone offset in {s:?}")));
        }
        let v: i64 = unit
            .parse()
            .map_err(|_| Error::Decode(format!("invalid timezone offset in {s:?}")))?;
        total += v * [3600, 60, 1][i];
    }

    Ok((rest, sign * total))
}

/// Split a trailing ` ABBR` zone name off the end of `s`.
fn split_named_zone(s: &str) -> &str {
    match s.rfind(' ') {
        Some(pos) if s[pos + 1..].bytes().all(|b| b.is_ascii_alphabetic()) => &s[..pos],
        _ => s,
    }
}

/// Decode a temporal text value to Unix seconds in UTC.
///
/// `formats` is the set derived from the session DateStyle; `None` means the
/// style was unknown and decoding fails.
pub fn decode_temporal(s: &str, typ: PgType, formats: Option<&TimeFormats>) -> Result<i64> {
    let formats = formats.ok_or_else(|| {
        Error::Decode("cannot decode temporal value: unknown DateStyle".into())
    })?;

    let parse_err =
        |e: chrono::ParseError| Error::Decode(format!("invalid temporal value {s:?}: {e}"));

    match typ {
        PgType::Date => {
            let date = NaiveDate::parse_from_str(s, formats.date).map_err(parse_err)?;
            let midnight = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| Error::Decode(format!("date {s:?} out of range")))?;
            Ok(midnight.and_utc().timestamp())
        }
        PgType::Time => {
            let s = strip_fraction(s);
            let time = NaiveTime::parse_from_str(&s, formats.time).map_err(parse_err)?;
            Ok(seconds_from_midnight(time))
        }
        PgType::TimeTz => {
            // TimeTZ always carries a numeric offset, whatever the style.
            let s = strip_fraction(s);
            let (rest, offset) = split_hour_offset(&s)?;
            let time = NaiveTime::parse_from_str(rest, formats.time).map_err(parse_err)?;
            Ok(seconds_from_midnight(time) - offset)
        }
        PgType::Timestamp => {
            let s = strip_fraction(s);
            let dt = NaiveDateTime::parse_from_str(&s, formats.timestamp).map_err(parse_err)?;
            Ok(dt.and_utc().timestamp())
        }
        PgType::TimestampTz => {
            let s = strip_fraction(s);
            match formats.timestamp_tz {
                TzSuffix::HourOffset => {
                    let (rest, offset) = split_hour_offset(&s)?;
                    let dt = NaiveDateTime::parse_from_str(rest, formats.timestamp)
                        .map_err(parse_err)?;
                    Ok(dt.and_utc().timestamp() - offset)
                }
                TzSuffix::NamedZone => {
                    let rest = split_named_zone(&s);
                    let dt = NaiveDateTime::parse_from_str(rest, formats.timestamp)
                        .map_err(parse_err)?;
                    Ok(dt.and_utc().timestamp())
                }
            }
        }
        _ => Err(Error::Decode(format!("{typ} is not a temporal type"))),
    }
}

fn seconds_from_midnight(time: NaiveTime) -> i64 {
    use chrono::Timelike;
    time.num_seconds_from_midnight() as i64
}
