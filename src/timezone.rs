//! Conversions between a provider's civil time and the absolute timeline.
//!
//! Everything the engine compares is a UTC millisecond instant ([`Ms`]). Civil
//! dates and times only exist to match weekday rules and to render results.

use chrono::{
    DateTime, Datelike, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeDelta, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;

use crate::engine::EngineError;
use crate::model::Ms;

pub fn parse_zone(name: &str) -> Result<Tz, EngineError> {
    name.parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimeInput(format!("unknown timezone: {name}")))
}

pub fn parse_date(s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| EngineError::InvalidTimeInput(format!("bad date {s:?}: {e}")))
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_time(s: &str) -> Result<NaiveTime, EngineError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| EngineError::InvalidTimeInput(format!("bad time {s:?}: {e}")))
}

/// RFC 3339 instant. The offset is mandatory: naive timestamps are rejected.
pub fn parse_instant(s: &str) -> Result<Ms, EngineError> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| EngineError::InvalidTimeInput(format!("bad instant {s:?}: {e}")))
}

pub fn format_instant(ms: Ms) -> String {
    match Utc.timestamp_millis_opt(ms) {
        LocalResult::Single(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        _ => ms.to_string(),
    }
}

/// Civil date + time in `tz` to a UTC instant.
///
/// Ambiguous times (fall-back) resolve to the earlier instant. Times inside a
/// spring-forward gap are pushed forward by the gap length.
pub fn local_to_utc(tz: Tz, date: NaiveDate, time: NaiveTime) -> Ms {
    let local = date.and_time(time);
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.timestamp_millis(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp_millis(),
        LocalResult::None => {
            let before = offset_before(tz, local);
            (local - TimeDelta::seconds(i64::from(before.local_minus_utc())))
                .and_utc()
                .timestamp_millis()
        }
    }
}

/// UTC instant to the civil date and time in `tz`.
pub fn utc_to_local(tz: Tz, ms: Ms) -> (NaiveDate, NaiveTime) {
    let local = to_local_datetime(tz, ms).naive_local();
    (local.date(), local.time())
}

/// The instant rendered in `tz`, keeping its UTC offset.
pub fn to_local_datetime(tz: Tz, ms: Ms) -> DateTime<FixedOffset> {
    let utc = DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default();
    utc.with_timezone(&tz).fixed_offset()
}

/// String form of [`local_to_utc`].
pub fn local_to_utc_str(zone: &str, date: &str, time: &str) -> Result<Ms, EngineError> {
    Ok(local_to_utc(parse_zone(zone)?, parse_date(date)?, parse_time(time)?))
}

/// String form of [`utc_to_local`], rendering `YYYY-MM-DD` and `HH:MM:SS`.
pub fn utc_to_local_str(zone: &str, instant: &str) -> Result<(String, String), EngineError> {
    let tz = parse_zone(zone)?;
    let (date, time) = utc_to_local(tz, parse_instant(instant)?);
    Ok((date.format("%Y-%m-%d").to_string(), time.format("%H:%M:%S").to_string()))
}

/// The provider's current civil date.
pub fn today_in(tz: Tz, now: Ms) -> NaiveDate {
    utc_to_local(tz, now).0
}

/// ISO weekday number, Monday = 1 .. Sunday = 7.
pub fn iso_weekday(date: NaiveDate) -> u8 {
    date.weekday().number_from_monday() as u8
}

pub fn weekday_from_iso(n: i64) -> Result<Weekday, EngineError> {
    match n {
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        7 => Ok(Weekday::Sun),
        _ => Err(EngineError::InvalidTimeInput(format!(
            "day_of_week must be 1 (Monday) .. 7 (Sunday), got {n}"
        ))),
    }
}

fn offset_before(tz: Tz, local: NaiveDateTime) -> FixedOffset {
    // Gaps never exceed a day, so the offset a day earlier is the pre-transition one.
    let probe = (local - TimeDelta::days(1)).and_utc();
    tz.offset_from_utc_datetime(&probe.naive_utc()).fix()
}
