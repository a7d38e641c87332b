//! Calendar helpers: due-date buckets, day and week boundaries, due input parsing.
//!
//! All "now" values are `DateTime<FixedOffset>` so that calendar-day
//! normalisation happens in the viewer's timezone rather than in UTC.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Local, NaiveDate, NaiveTime, TimeZone, Utc, Weekday,
};

use crate::fields::TaskStatus;

/// Source of the current moment.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Wall clock in the process' local timezone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// A clock pinned to one instant, for reproducible runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<FixedOffset>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}

/// Bucket a due day against today.
pub fn classify_day(due: NaiveDate, today: NaiveDate) -> TaskStatus {
    let delta = (due - today).num_days();
    if delta < 0 {
        TaskStatus::Overdue
    } else if delta == 0 {
        TaskStatus::Today
    } else if delta == 1 {
        TaskStatus::Tomorrow
    } else if delta < 7 {
        TaskStatus::Upcoming
    } else {
        TaskStatus::Later
    }
}

/// Bucket a due instant, normalising both sides to calendar days in `now`'s timezone.
pub fn calculate_status(due: DateTime<Utc>, now: DateTime<FixedOffset>) -> TaskStatus {
    let due_day = due.with_timezone(&now.timezone()).date_naive();
    classify_day(due_day, now.date_naive())
}

/// First instant of `day` in `tz`.
pub fn start_of_day(day: NaiveDate, tz: &FixedOffset) -> DateTime<Utc> {
    tz.from_local_datetime(&day.and_time(NaiveTime::MIN))
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN)))
}

/// Last millisecond of `day` in `tz`.
pub fn end_of_day(day: NaiveDate, tz: &FixedOffset) -> DateTime<Utc> {
    start_of_day(day + Duration::days(1), tz) - Duration::milliseconds(1)
}

/// Monday and Sunday of the ISO week containing `day`.
pub fn iso_week_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = day - Duration::days(i64::from(day.weekday().num_days_from_monday()));
    (monday, monday + Duration::days(6))
}

/// Instants bounding today, this week and last week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekBoundaries {
    pub today: DateTime<Utc>,
    pub this_week_start: DateTime<Utc>,
    pub this_week_end: DateTime<Utc>,
    pub last_week_start: DateTime<Utc>,
    pub last_week_end: DateTime<Utc>,
}

impl WeekBoundaries {
    pub fn at(now: DateTime<FixedOffset>) -> Self {
        let tz = now.timezone();
        let today = now.date_naive();
        let (start, end) = iso_week_bounds(today);
        let last_start = start - Duration::days(7);
        let last_end = end - Duration::days(7);
        WeekBoundaries {
            today: start_of_day(today, &tz),
            this_week_start: start_of_day(start, &tz),
            this_week_end: end_of_day(end, &tz),
            last_week_start: start_of_day(last_start, &tz),
            last_week_end: end_of_day(last_end, &tz),
        }
    }

    /// Calendar date of last week's Sunday, used to look up weekly snapshots.
    pub fn last_week_end_date(&self, tz: &FixedOffset) -> NaiveDate {
        self.last_week_end.with_timezone(tz).date_naive()
    }
}

/// Render an instant the way the backend filters expect it.
pub fn to_wire(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse a backend timestamp: RFC 3339, or a bare `YYYY-MM-DD` taken as UTC midnight.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
}

/// Resolve a due date typed on the command line against `today`.
///
/// Accepts ISO dates, `today` / `tomorrow`, `eow`, offsets such as `in 3d` or
/// `in 2w`, and weekday names optionally prefixed with `this` or `next`.
pub fn parse_due_input(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let input = input.trim().to_lowercase();
    if let Ok(date) = NaiveDate::parse_from_str(&input, "%Y-%m-%d") {
        return Some(date);
    }
    match input.as_str() {
        "today" => return Some(today),
        "tomorrow" => return today.succ_opt(),
        "eow" | "end of week" => return Some(iso_week_bounds(today).1),
        _ => {}
    }
    if let Some(offset) = input.strip_prefix("in ") {
        let offset = offset.trim();
        let (count, unit) = offset.split_at(offset.char_indices().last()?.0);
        let count: i64 = count.trim().parse().ok()?;
        return match unit {
            "d" => Some(today + Duration::days(count)),
            "w" => Some(today + Duration::weeks(count)),
            _ => None,
        };
    }

    let (skip_week, name) = match input.split_once(' ') {
        Some(("next", name)) => (true, name),
        Some(("this", name)) => (false, name),
        Some(_) => return None,
        None => (false, input.as_str()),
    };
    let target: Weekday = name.parse().ok()?;
    let ahead = (7 + i64::from(target.num_days_from_monday())
        - i64::from(today.weekday().num_days_from_monday()))
        % 7;
    // "next friday" on a Friday is a week out, on a Tuesday it is the Friday after this one.
    let ahead = if skip_week { ahead + 7 } else { ahead };
    Some(today + Duration::days(ahead))
}

/// Format a due date relative to today ("today", "tomorrow", "in 3d", "2d late").
pub fn format_due_relative(due: NaiveDate, today: NaiveDate) -> String {
    let delta = (due - today).num_days();
    if delta == 0 {
        "today".into()
    } else if delta == 1 {
        "tomorrow".into()
    } else if delta > 1 {
        format!("in {delta}d")
    } else {
        format!("{}d late", -delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[rstest]
    #[case("2025-11-27", TaskStatus::Overdue)]
    #[case("2025-11-28", TaskStatus::Today)]
    #[case("2025-11-29", TaskStatus::Tomorrow)]
    #[case("2025-11-30", TaskStatus::Upcoming)]
    #[case("2025-12-04", TaskStatus::Upcoming)]
    #[case("2025-12-05", TaskStatus::Later)]
    fn bucket_boundaries(#[case] due: &str, #[case] expected: TaskStatus) {
        assert_eq!(classify_day(day(due), day("2025-11-28")), expected);
    }

    #[test]
    fn status_uses_the_viewers_calendar_day() {
        // 23:30 UTC on the 28th is already the 29th in UTC+2.
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2025, 11, 29, 9, 0, 0).unwrap();
        let due = Utc.with_ymd_and_hms(2025, 11, 28, 23, 30, 0).unwrap();
        assert_eq!(calculate_status(due, now), TaskStatus::Today);

        let utc_now = now.with_timezone(&Utc).fixed_offset();
        assert_eq!(calculate_status(due, utc_now), TaskStatus::Overdue);
    }

    #[test]
    fn missing_due_date_substituted_with_now_is_today() {
        let now = Utc.with_ymd_and_hms(2025, 11, 28, 12, 0, 0).unwrap().fixed_offset();
        assert_eq!(calculate_status(now.with_timezone(&Utc), now), TaskStatus::Today);
    }

    #[test]
    fn iso_week_runs_monday_to_sunday() {
        assert_eq!(iso_week_bounds(day("2025-11-24")), (day("2025-11-24"), day("2025-11-30")));
        assert_eq!(iso_week_bounds(day("2025-11-30")), (day("2025-11-24"), day("2025-11-30")));
    }

    #[test]
    fn week_boundaries_start_on_monday() {
        let now = Utc.with_ymd_and_hms(2025, 11, 28, 12, 0, 0).unwrap().fixed_offset();
        let w = WeekBoundaries::at(now);
        assert_eq!(w.this_week_start, Utc.with_ymd_and_hms(2025, 11, 24, 0, 0, 0).unwrap());
        assert_eq!(w.last_week_start, Utc.with_ymd_and_hms(2025, 11, 17, 0, 0, 0).unwrap());
        assert_eq!(w.this_week_end.date_naive(), day("2025-11-30"));
        assert_eq!(w.last_week_end_date(&now.timezone()), day("2025-11-23"));
        assert_eq!(w.today, Utc.with_ymd_and_hms(2025, 11, 28, 0, 0, 0).unwrap());
    }

    #[test]
    fn parse_due_input_relative_forms() {
        let today = day("2025-11-28"); // Friday
        assert_eq!(parse_due_input("tomorrow", today), Some(day("2025-11-29")));
        assert_eq!(parse_due_input("in 3d", today), Some(day("2025-12-01")));
        assert_eq!(parse_due_input("in 2w", today), Some(day("2025-12-12")));
        assert_eq!(parse_due_input("monday", today), Some(day("2025-12-01")));
        assert_eq!(parse_due_input("next friday", today), Some(day("2025-12-05")));
        assert_eq!(parse_due_input("2026-01-02", today), Some(day("2026-01-02")));
        assert_eq!(parse_due_input("this fri", today), Some(today));
        assert_eq!(parse_due_input("eow", today), Some(day("2025-11-30")));
        assert_eq!(parse_due_input("someday", today), None);
        assert_eq!(parse_due_input("in 3x", today), None);
    }

    #[test]
    fn parse_timestamp_accepts_backend_shapes() {
        let expected = Utc.with_ymd_and_hms(2025, 11, 20, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-11-20T00:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-11-20T02:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-11-20"), Some(expected));
        assert_eq!(parse_timestamp("not a date"), None);
    }

    proptest! {
        #[test]
        fn classification_is_pure(due_offset in -400i64..400, hour in 0u32..24) {
            let now = Utc.with_ymd_and_hms(2025, 6, 15, hour, 0, 0).unwrap().fixed_offset();
            let due = now.with_timezone(&Utc) + Duration::days(due_offset);
            prop_assert_eq!(calculate_status(due, now), calculate_status(due, now));
        }
    }
}
