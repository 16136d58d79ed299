//! DB-API style type constructors and type-code constants.
//!
//! Result columns report their type oid; compare it against [`STRING`],
//! [`NUMBER`], [`DATETIME`], [`ROWID`] or [`BINARY`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{Error, Result};
use crate::protocol::types::{Oid, oid};
use crate::types::Interval;

/// `varchar`
pub const STRING: Oid = oid::VARCHAR;
/// `numeric`
pub const NUMBER: Oid = oid::NUMERIC;
/// `timestamp`
pub const DATETIME: Oid = oid::TIMESTAMP;
/// `oid`
pub const ROWID: Oid = oid::OID;
/// `bytea`
pub const BINARY: Oid = oid::BYTEA;

fn out_of_range(what: &str) -> Error {
    Error::Encode(format!("{what} out of range"))
}

pub fn date(year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| out_of_range("date"))
}

pub fn time(hour: u32, minute: u32, second: u32) -> Result<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| out_of_range("time"))
}

pub fn timestamp(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Result<NaiveDateTime> {
    Ok(date(year, month, day)?.and_time(time(hour, minute, second)?))
}

/// Seconds since the Unix epoch, read as UTC.
pub fn timestamp_from_ticks(ticks: f64) -> Result<NaiveDateTime> {
    if !ticks.is_finite() {
        return Err(out_of_range("ticks"));
    }
    let micros = (ticks * 1_000_000.0).round();
    if micros.abs() >= i64::MAX as f64 {
        return Err(out_of_range("ticks"));
    }
    DateTime::from_timestamp_micros(micros as i64)
        .map(|utc| utc.naive_utc())
        .ok_or_else(|| out_of_range("ticks"))
}

pub fn date_from_ticks(ticks: f64) -> Result<NaiveDate> {
    Ok(timestamp_from_ticks(ticks)?.date())
}

pub fn time_from_ticks(ticks: f64) -> Result<NaiveTime> {
    Ok(timestamp_from_ticks(ticks)?.time())
}

pub fn binary(bytes: impl Into<Vec<u8>>) -> Vec<u8> {
    bytes.into()
}

pub fn interval(months: i32, days: i32, microseconds: i64) -> Interval {
    Interval::new(months, days, microseconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors() {
        assert_eq!(date(2001, 2, 3).unwrap(), NaiveDate::from_ymd_opt(2001, 2, 3).unwrap());
        assert_eq!(time(4, 5, 6).unwrap(), NaiveTime::from_hms_opt(4, 5, 6).unwrap());
        assert_eq!(
            timestamp(2001, 2, 3, 4, 5, 6).unwrap().to_string(),
            "2001-02-03 04:05:06"
        );
        assert!(matches!(date(2001, 2, 30), Err(Error::Encode(_))));
        assert!(time(24, 0, 1).is_err());
    }

    #[test]
    fn ticks_are_utc() {
        assert_eq!(date_from_ticks(1173804319.0).unwrap(), date(2007, 3, 13).unwrap());
        assert_eq!(time_from_ticks(1173804319.0).unwrap(), time(16, 45, 19).unwrap());
        assert_eq!(
            timestamp_from_ticks(1173804319.0).unwrap(),
            timestamp(2007, 3, 13, 16, 45, 19).unwrap()
        );
        assert!(timestamp_from_ticks(f64::NAN).is_err());
    }

    #[test]
    fn type_codes() {
        assert_eq!((STRING, NUMBER, DATETIME, ROWID), (1043, 1700, 1114, 26));
        assert_eq!(binary(&b"\x00\x01"[..]), vec![0, 1]);
        assert_eq!(interval(1, 2, 3), Interval::new(1, 2, 3));
    }
}
