//! Local-date arithmetic for the weekly calendar.
//!
//! Events are stored in UTC. Everything a resident sees or types is in a local
//! zone: the resident's own (`/tz`) or the house default.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Farthest the week navigation may move from today, in days.
pub const MAX_WEEK_OFFSET: i64 = 364;

/// A 7-day window starting `offset` days from the viewer's today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekWindow {
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    /// Local midnight of `first_day`, in UTC.
    pub lower: DateTime<Utc>,
    /// Local midnight of the day after `last_day`, in UTC.
    pub upper: DateTime<Utc>,
}

impl WeekWindow {
    pub fn new(now: DateTime<Utc>, tz: Tz, offset_days: i64) -> Self {
        let today = local_date(now, tz);
        let first_day = shift_days(today, clamp_offset(offset_days));
        let last_day = shift_days(first_day, 6);
        Self {
            first_day,
            last_day,
            lower: local_midnight(first_day, tz),
            upper: local_midnight(shift_days(last_day, 1), tz),
        }
    }
}

pub fn clamp_offset(offset_days: i64) -> i64 {
    offset_days.clamp(-MAX_WEEK_OFFSET, MAX_WEEK_OFFSET)
}

pub fn shift_days(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_add_signed(Duration::days(days)).unwrap_or(date)
}

pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Resolve a wall-clock time in `tz`. Ambiguous times (DST fall-back) take
/// the earlier instant; times skipped by DST spring-forward yield `None`.
pub fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive).earliest().map(|dt| dt.with_timezone(&Utc))
}

/// Start of `date` in `tz`, in UTC. Zones whose midnight can be skipped by
/// DST start the day at the first existing hour.
pub fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    (0..3)
        .find_map(|h| resolve_local(tz, date.and_time(NaiveTime::from_hms_opt(h, 0, 0)?)))
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN).and_utc())
}

pub fn weekday_ja(date: NaiveDate) -> char {
    let names = ['月', '火', '水', '木', '金', '土', '日'];
    names[date.weekday().num_days_from_monday() as usize]
}

/// `10/18（日）`
pub fn day_heading(date: NaiveDate) -> String {
    format!("{}（{}）", date.format("%m/%d"), weekday_ja(date))
}

pub fn parse_tz(name: &str) -> Option<Tz> {
    name.trim().parse::<Tz>().ok()
}

/// Parse a resident-typed date: `YYYY-MM-DD`, `YYYY/MM/DD`, `MM/DD` (this
/// year), or today/tomorrow in English or Japanese.
pub fn parse_date(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let s = input.trim().to_lowercase();
    match s.as_str() {
        "today" | "今日" | "きょう" => return Some(today),
        "tomorrow" | "明日" | "あした" => return Some(shift_days(today, 1)),
        _ => {}
    }
    if let Ok(d) = NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(&s, "%Y/%m/%d") {
        return Some(d);
    }
    let (m, d) = s.split_once('/')?;
    NaiveDate::from_ymd_opt(today.year(), m.trim().parse().ok()?, d.trim().parse().ok()?)
}

/// Parse `HH:MM` (also `H:MM` and a full-width colon).
pub fn parse_time(input: &str) -> Option<NaiveTime> {
    let s = input.trim().replace('：', ":");
    NaiveTime::parse_from_str(&s, "%H:%M").ok()
}
