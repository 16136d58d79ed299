//! date, time, timestamp, timestamptz and interval codecs.
//!
//! Binary forms count from the PostgreSQL epoch, 2000-01-01 00:00:00 UTC.
//! `infinity` and `-infinity` map to the chrono `MAX` and `MIN` values.
//! Nothing here reads the process clock or the local timezone.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Utc};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i32, read_i64};
use crate::protocol::types::Oid;

use super::{Value, utf8};

const PG_EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(2000, 1, 1) {
    Some(d) => d,
    None => panic!("invalid date"),
};

const USECS_PER_SEC: i64 = 1_000_000;
const USECS_PER_DAY: i64 = 86_400 * USECS_PER_SEC;

/// `time '24:00:00'`, held as chrono's leap-second form of 23:59:59 so that
/// it still counts 86400 seconds from midnight.
pub const END_OF_DAY: NaiveTime =
    match NaiveTime::from_num_seconds_from_midnight_opt(86_399, 1_000_000_000) {
        Some(t) => t,
        None => panic!("invalid time"),
    };

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A PostgreSQL `interval`. The three parts are independent: a month is not
/// a fixed number of days, nor a day a fixed number of microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Interval {
    pub months: i32,
    pub days: i32,
    pub microseconds: i64,
}

impl Interval {
    pub fn new(months: i32, days: i32, microseconds: i64) -> Self {
        Self {
            months,
            days,
            microseconds,
        }
    }
}

impl From<TimeDelta> for Interval {
    /// Whole days go to `days`, the remainder to `microseconds`.
    fn from(delta: TimeDelta) -> Self {
        let days = delta.num_days();
        let rest = delta - TimeDelta::days(days);
        Self {
            months: 0,
            days: days as i32,
            microseconds: rest.num_microseconds().unwrap_or(0),
        }
    }
}

fn epoch() -> NaiveDateTime {
    PG_EPOCH.and_time(NaiveTime::MIN)
}

fn mismatch(value: &Value, target: &str) -> Error {
    Error::Encode(format!("cannot encode {value:?} as {target}"))
}

fn exact<'a>(bytes: &'a [u8], len: usize, name: &str) -> Result<&'a [u8]> {
    if bytes.len() == len {
        Ok(bytes)
    } else {
        Err(Error::Decode(format!("invalid {name} length: {}", bytes.len())))
    }
}

// === binary ===

pub fn encode_date_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let Value::Date(date) = value else {
        return Err(mismatch(value, "date"));
    };
    let days = match *date {
        NaiveDate::MAX => i32::MAX,
        NaiveDate::MIN => i32::MIN,
        d => d.signed_duration_since(PG_EPOCH).num_days() as i32,
    };
    buf.extend_from_slice(&days.to_be_bytes());
    Ok(())
}

pub fn decode_date_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let (days, _) = read_i32(exact(bytes, 4, "date")?)?;
    let date = match days {
        i32::MAX => NaiveDate::MAX,
        i32::MIN => NaiveDate::MIN,
        n => PG_EPOCH
            .checked_add_signed(TimeDelta::days(i64::from(n)))
            .ok_or_else(|| Error::Decode(format!("date out of range: {n} days")))?,
    };
    Ok(Value::Date(date))
}

fn time_usecs(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight()) * USECS_PER_SEC
        + i64::from(time.nanosecond() / 1000)
}

pub fn encode_time_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let Value::Time(time) = value else {
        return Err(mismatch(value, "time"));
    };
    buf.extend_from_slice(&time_usecs(*time).to_be_bytes());
    Ok(())
}

pub fn decode_time_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let (usecs, _) = read_i64(exact(bytes, 8, "time")?)?;
    if usecs == USECS_PER_DAY {
        return Ok(Value::Time(END_OF_DAY));
    }
    if !(0..USECS_PER_DAY).contains(&usecs) {
        return Err(Error::Decode(format!("time out of range: {usecs}us")));
    }
    let secs = (usecs / USECS_PER_SEC) as u32;
    let nanos = ((usecs % USECS_PER_SEC) * 1000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
        .map(Value::Time)
        .ok_or_else(|| Error::Decode("invalid time".into()))
}

fn timestamp_usecs(ts: NaiveDateTime) -> Result<i64> {
    match ts {
        NaiveDateTime::MAX => Ok(i64::MAX),
        NaiveDateTime::MIN => Ok(i64::MIN),
        ts => ts
            .signed_duration_since(epoch())
            .num_microseconds()
            .ok_or_else(|| Error::Encode(format!("timestamp out of range: {ts}"))),
    }
}

fn timestamp_from_usecs(usecs: i64) -> Result<NaiveDateTime> {
    match usecs {
        i64::MAX => Ok(NaiveDateTime::MAX),
        i64::MIN => Ok(NaiveDateTime::MIN),
        n => epoch()
            .checked_add_signed(TimeDelta::microseconds(n))
            .ok_or_else(|| Error::Decode(format!("timestamp out of range: {n}us"))),
    }
}

pub fn encode_timestamp_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let Value::Timestamp(ts) = value else {
        return Err(mismatch(value, "timestamp"));
    };
    buf.extend_from_slice(&timestamp_usecs(*ts)?.to_be_bytes());
    Ok(())
}

pub fn decode_timestamp_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let (usecs, _) = read_i64(exact(bytes, 8, "timestamp")?)?;
    timestamp_from_usecs(usecs).map(Value::Timestamp)
}

/// Sent as its UTC instant.
pub fn encode_timestamptz_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let Value::TimestampTz(ts) = value else {
        return Err(mismatch(value, "timestamptz"));
    };
    buf.extend_from_slice(&timestamp_usecs(ts.naive_utc())?.to_be_bytes());
    Ok(())
}

/// The binary form carries no zone; the result is in UTC.
pub fn decode_timestamptz_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let (usecs, _) = read_i64(exact(bytes, 8, "timestamptz")?)?;
    let utc = timestamp_from_usecs(usecs)?.and_utc();
    Ok(Value::TimestampTz(utc.fixed_offset()))
}

pub fn encode_interval_binary(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let Value::Interval(iv) = value else {
        return Err(mismatch(value, "interval"));
    };
    buf.extend_from_slice(&iv.microseconds.to_be_bytes());
    buf.extend_from_slice(&iv.days.to_be_bytes());
    buf.extend_from_slice(&iv.months.to_be_bytes());
    Ok(())
}

pub fn decode_interval_binary(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let (microseconds, rest) = read_i64(exact(bytes, 16, "interval")?)?;
    let (days, rest) = read_i32(rest)?;
    let (months, _) = read_i32(rest)?;
    Ok(Value::Interval(Interval {
        months,
        days,
        microseconds,
    }))
}

// === text ===

/// Text encoder shared by all temporal types.
pub fn encode_text(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    let text = match value {
        Value::Date(NaiveDate::MAX) => "infinity".to_string(),
        Value::Date(NaiveDate::MIN) => "-infinity".to_string(),
        Value::Date(d) => d.format(DATE_FORMAT).to_string(),
        Value::Time(t) if *t == END_OF_DAY => "24:00:00".to_string(),
        Value::Time(t) => t.format(TIME_FORMAT).to_string(),
        Value::Timestamp(NaiveDateTime::MAX) => "infinity".to_string(),
        Value::Timestamp(NaiveDateTime::MIN) => "-infinity".to_string(),
        Value::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        Value::TimestampTz(ts) if ts.naive_utc() == NaiveDateTime::MAX => "infinity".to_string(),
        Value::TimestampTz(ts) if ts.naive_utc() == NaiveDateTime::MIN => "-infinity".to_string(),
        Value::TimestampTz(ts) => ts.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string(),
        Value::Interval(iv) => format!(
            "{} mons {} days {} microseconds",
            iv.months, iv.days, iv.microseconds
        ),
        other => return Err(mismatch(other, "a temporal type")),
    };
    buf.extend_from_slice(text.as_bytes());
    Ok(())
}

fn invalid(kind: &str, s: &str) -> Error {
    Error::Decode(format!("invalid {kind}: {s:?}"))
}

pub fn decode_date_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    let date = match s {
        "infinity" => NaiveDate::MAX,
        "-infinity" => NaiveDate::MIN,
        _ => NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| invalid("date", s))?,
    };
    Ok(Value::Date(date))
}

pub fn decode_time_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    if let Some(fraction) = s.strip_prefix("24:00:00")
        && fraction.trim_start_matches('.').bytes().all(|b| b == b'0')
    {
        return Ok(Value::Time(END_OF_DAY));
    }
    NaiveTime::parse_from_str(s, TIME_FORMAT)
        .map(Value::Time)
        .map_err(|_| invalid("time", s))
}

pub fn decode_timestamp_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    let ts = match s {
        "infinity" => NaiveDateTime::MAX,
        "-infinity" => NaiveDateTime::MIN,
        _ => NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .map_err(|_| invalid("timestamp", s))?,
    };
    Ok(Value::Timestamp(ts))
}

/// Keeps the session offset printed by the server.
pub fn decode_timestamptz_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    let ts = match s {
        "infinity" => DateTime::<Utc>::MAX_UTC.fixed_offset(),
        "-infinity" => DateTime::<Utc>::MIN_UTC.fixed_offset(),
        _ => DateTime::<FixedOffset>::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z")
            .map_err(|_| invalid("timestamptz", s))?,
    };
    Ok(Value::TimestampTz(ts))
}

/// `[-]HH:MM:SS[.ffffff]` as microseconds.
fn parse_clock(s: &str) -> Option<i64> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let mut parts = body.split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let (secs, frac) = match parts.next() {
        Some(sec) => sec.split_once('.').unwrap_or((sec, "")),
        None => ("0", ""),
    };
    if parts.next().is_some() || frac.len() > 6 {
        return None;
    }
    let secs: i64 = secs.parse().ok()?;
    let frac: i64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<6}").parse().ok()?
    };
    let usecs = ((hours * 60 + minutes) * 60 + secs) * USECS_PER_SEC + frac;
    Some(if negative { -usecs } else { usecs })
}

/// Parses the default `postgres` IntervalStyle, e.g. `1 year 2 mons -3 days 04:05:06.5`.
pub fn decode_interval_text(_oid: Oid, bytes: &[u8]) -> Result<Value> {
    let s = utf8(bytes)?;
    let mut iv = Interval::default();
    let mut tokens = s.split_ascii_whitespace();
    while let Some(token) = tokens.next() {
        if token.contains(':') {
            iv.microseconds += parse_clock(token).ok_or_else(|| invalid("interval", s))?;
            continue;
        }
        let amount: i32 = token.parse().map_err(|_| invalid("interval", s))?;
        let unit = tokens.next().ok_or_else(|| invalid("interval", s))?;
        match unit.trim_end_matches('s') {
            "year" => iv.months += amount * 12,
            "mon" => iv.months += amount,
            "day" => iv.days += amount,
            _ => return Err(invalid("interval", s)),
        }
    }
    Ok(Value::Interval(iv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;
    use crate::types::registry::{DecodeFn, EncodeFn};

    fn binary_round_trip(value: Value, encode: EncodeFn, decode: DecodeFn) {
        let mut buf = Vec::new();
        encode(&value, &mut buf).unwrap();
        assert_eq!(decode(0, &buf).unwrap(), value);
    }

    #[test]
    fn epoch_is_zero() {
        let mut buf = Vec::new();
        encode_timestamp_binary(&Value::Timestamp(epoch()), &mut buf).unwrap();
        assert_eq!(buf, [0; 8]);

        buf.clear();
        encode_date_binary(&Value::Date(PG_EPOCH), &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);
    }

    #[test]
    fn infinities_map_to_bounds() {
        assert_eq!(
            decode_timestamp_binary(0, &i64::MAX.to_be_bytes()).unwrap(),
            Value::Timestamp(NaiveDateTime::MAX)
        );
        assert_eq!(
            decode_date_binary(0, &i32::MIN.to_be_bytes()).unwrap(),
            Value::Date(NaiveDate::MIN)
        );
        binary_round_trip(
            Value::Timestamp(NaiveDateTime::MIN),
            encode_timestamp_binary,
            decode_timestamp_binary,
        );
        binary_round_trip(Value::Date(NaiveDate::MAX), encode_date_binary, decode_date_binary);
    }

    #[test]
    fn timestamptz_is_utc_on_the_wire() {
        let local = DateTime::parse_from_rfc3339("2001-02-03T04:05:06.17-07:00").unwrap();
        let mut buf = Vec::new();
        encode_timestamptz_binary(&Value::TimestampTz(local), &mut buf).unwrap();
        let Value::TimestampTz(back) = decode_timestamptz_binary(0, &buf).unwrap() else {
            panic!("not a timestamptz");
        };
        assert_eq!(back, local);
        assert_eq!(back.offset().local_minus_utc(), 0);
        assert_eq!(back.format("%H:%M:%S%.f").to_string(), "11:05:06.170");
    }

    #[test]
    fn timestamptz_text_keeps_offset() {
        let Value::TimestampTz(ts) =
            decode_timestamptz_text(oid::TIMESTAMPTZ, b"2001-02-03 04:05:06.17-07").unwrap()
        else {
            panic!("not a timestamptz");
        };
        assert_eq!(ts.offset().local_minus_utc(), -7 * 3600);
        assert_eq!(ts.naive_utc().format("%H").to_string(), "11");
    }

    #[test]
    fn interval_text() {
        assert_eq!(
            decode_interval_text(oid::INTERVAL, b"2 years 2 days 00:02:03.456789").unwrap(),
            Value::Interval(Interval::new(24, 2, 123_456_789))
        );
        assert_eq!(
            decode_interval_text(oid::INTERVAL, b"-1 days +02:03:00").unwrap(),
            Value::Interval(Interval::new(0, -1, 7_380_000_000))
        );
        assert_eq!(
            decode_interval_text(oid::INTERVAL, b"-00:00:00.5").unwrap(),
            Value::Interval(Interval::new(0, 0, -500_000))
        );
        assert!(decode_interval_text(oid::INTERVAL, b"3 fortnights").is_err());
    }

    #[test]
    fn interval_binary_layout() {
        let mut buf = Vec::new();
        encode_interval_binary(&Value::Interval(Interval::new(3, 2, 1)), &mut buf).unwrap();
        assert_eq!(
            buf,
            [0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]
        );
    }

    #[test]
    fn time_and_date_text() {
        let mut buf = Vec::new();
        let t = NaiveTime::from_hms_micro_opt(4, 5, 6, 170000).unwrap();
        encode_text(&Value::Time(t), &mut buf).unwrap();
        assert_eq!(decode_time_text(oid::TIME, &buf).unwrap(), Value::Time(t));
        assert_eq!(
            decode_date_text(oid::DATE, b"infinity").unwrap(),
            Value::Date(NaiveDate::MAX)
        );
        assert!(decode_time_binary(0, &(USECS_PER_DAY + 1).to_be_bytes()).is_err());
        assert!(decode_time_binary(0, &(-1_i64).to_be_bytes()).is_err());
    }

    #[test]
    fn midnight_at_end_of_day() {
        let decoded = decode_time_binary(oid::TIME, &USECS_PER_DAY.to_be_bytes()).unwrap();
        assert_eq!(decoded, Value::Time(END_OF_DAY));

        let mut buf = Vec::new();
        encode_time_binary(&decoded, &mut buf).unwrap();
        assert_eq!(buf, USECS_PER_DAY.to_be_bytes());

        buf.clear();
        encode_text(&decoded, &mut buf).unwrap();
        assert_eq!(buf, b"24:00:00");
        assert_eq!(decode_time_text(oid::TIME, b"24:00:00").unwrap(), decoded);
        assert_eq!(decode_time_text(oid::TIME, b"24:00:00.000").unwrap(), decoded);
        assert!(decode_time_text(oid::TIME, b"24:00:01").is_err());
    }

    #[test]
    fn interval_from_delta() {
        let iv = Interval::from(TimeDelta::days(12) + TimeDelta::seconds(30));
        assert_eq!(iv, Interval::new(0, 12, 30_000_000));
    }
}
