//! JST (UTC+9) civil-time helpers. Every reminder window computation
//! composes on these; an off-by-one here silently skips reminders.
//!
//! Reservations store absolute UTC instants. Naive JST wall-clock strings
//! are accepted at exactly one boundary — [`parse_local_jst`] — and
//! converted once.

use anyhow::{anyhow, Result};
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime,
    Timelike, Utc, Weekday,
};

const JST_OFFSET_SECS: i32 = 9 * 3600;

pub fn jst() -> FixedOffset {
    // UTC+9 is a valid fixed offset; east_opt only fails out of range.
    FixedOffset::east_opt(JST_OFFSET_SECS).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
}

/// The JST calendar date a given instant falls on.
pub fn civil_date_of(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&jst()).date_naive()
}

/// Half-open UTC interval `[start, end)` covering one JST calendar day.
/// JST has no DST, so the day is exactly 24 hours.
pub fn civil_day_utc_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = (date.and_time(NaiveTime::MIN) - Duration::hours(9)).and_utc();
    (start, start + Duration::hours(24))
}

/// "N days from now" in civil terms: convert to the JST calendar first,
/// then add days on the calendar — never by adding 24h × N to the instant.
pub fn shift_civil_date(instant: DateTime<Utc>, delta_days: i64) -> NaiveDate {
    civil_date_of(instant) + Duration::days(delta_days)
}

/// Parses a JST wall-clock string (`YYYY-MM-DDTHH:MM:SS`) into a UTC instant.
pub fn parse_local_jst(s: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .map_err(|e| anyhow!("invalid JST datetime '{}': {}", s, e))?;
    Ok((naive - Duration::hours(9)).and_utc())
}

/// JST wall-clock view of an instant, for validation and formatting.
pub fn jst_wall(instant: DateTime<Utc>) -> NaiveDateTime {
    instant.with_timezone(&jst()).naive_local()
}

/// `YYYY/MM/DD(曜) HH:MM` in JST, the format customers see in messages.
pub fn format_jst(instant: DateTime<Utc>) -> String {
    let wall = jst_wall(instant);
    let weekday = match wall.weekday() {
        Weekday::Sun => "日",
        Weekday::Mon => "月",
        Weekday::Tue => "火",
        Weekday::Wed => "水",
        Weekday::Thu => "木",
        Weekday::Fri => "金",
        Weekday::Sat => "土",
    };
    format!(
        "{:04}/{:02}/{:02}({}) {:02}:{:02}",
        wall.year(),
        wall.month(),
        wall.day(),
        weekday,
        wall.hour(),
        wall.minute(),
    )
}

/// UTC instants of the first moment of this JST month, the next, and the
/// one after — the buckets for the monthly stats endpoint.
pub fn jst_month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>, DateTime<Utc>) {
    let today = civil_date_of(now);
    let first = today.with_day(1).unwrap_or(today);
    let next = first.checked_add_months(Months::new(1)).unwrap_or(first);
    let next_next = first.checked_add_months(Months::new(2)).unwrap_or(first);
    (
        civil_day_utc_bounds(first).0,
        civil_day_utc_bounds(next).0,
        civil_day_utc_bounds(next_next).0,
    )
}
