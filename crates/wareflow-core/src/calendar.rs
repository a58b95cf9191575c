//! Calendar dimension rules and timestamp text forms

use chrono::{Datelike, NaiveDate, NaiveDateTime};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Text form used for every timestamp column
pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse `YYYY-MM-DD HH:MM:SS[.f]`, its `T`-separated form, or a bare date
/// (midnight)
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// `YYYYMMDD` as an integer
pub fn date_key(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}

/// Batch id for a logical run date, `YYYYMMDD`
pub fn batch_id_for(date: NaiveDate) -> i64 {
    date_key(date)
}

/// One row of `dim_date`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarDay {
    pub date_key: i64,
    pub date: NaiveDate,
    pub year: i32,
    pub quarter: u32,
    pub month: u32,
    pub day: u32,
    /// 0 = Sunday .. 6 = Saturday
    pub weekday: u32,
}

impl CalendarDay {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            date_key: date_key(date),
            date,
            year: date.year(),
            quarter: (date.month() - 1) / 3 + 1,
            month: date.month(),
            day: date.day(),
            weekday: date.weekday().num_days_from_sunday(),
        }
    }
}

/// Inclusive date range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Range spanning both endpoints, whichever order they come in
    pub fn new(a: NaiveDate, b: NaiveDate) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self::new(date, date)
    }

    pub fn covers(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn union(&self, other: &DateRange) -> DateRange {
        DateRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Every day of the range, ascending
    pub fn days(&self) -> impl Iterator<Item = CalendarDay> + '_ {
        self.start
            .iter_days()
            .take_while(move |d| *d <= self.end)
            .map(CalendarDay::from_date)
    }
}

/// Calendar range for a full rebuild: every event date in the warehouse,
/// or just `today` when there are none
pub fn full_range(events: Option<DateRange>, today: NaiveDate) -> DateRange {
    events.unwrap_or_else(|| DateRange::single(today))
}

/// Calendar range after an incremental load, or `None` if the calendar
/// already covers the active sale dates
///
/// The result always covers `current`, so the calendar never shrinks.
pub fn extended_range(
    current: Option<DateRange>,
    active_sales: Option<DateRange>,
) -> Option<DateRange> {
    match (current, active_sales) {
        (_, None) => None,
        (None, Some(incoming)) => Some(incoming),
        (Some(existing), Some(incoming)) if existing.covers(&incoming) => None,
        (Some(existing), Some(incoming)) => Some(existing.union(&incoming)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_calendar_day_attributes() {
        // 2025-01-05 is a Sunday
        let sunday = CalendarDay::from_date(d(2025, 1, 5));
        assert_eq!(sunday.date_key, 20250105);
        assert_eq!(sunday.weekday, 0);
        assert_eq!(sunday.quarter, 1);

        let saturday = CalendarDay::from_date(d(2025, 10, 4));
        assert_eq!(saturday.weekday, 6);
        assert_eq!(saturday.quarter, 4);
        assert_eq!(saturday.month, 10);
        assert_eq!(saturday.day, 4);
    }

    #[test]
    fn test_days_are_inclusive() {
        let range = DateRange::new(d(2024, 2, 27), d(2024, 3, 1));
        let keys: Vec<_> = range.days().map(|day| day.date_key).collect();
        assert_eq!(keys, vec![20240227, 20240228, 20240229, 20240301]);
    }

    #[test]
    fn test_full_range_defaults_to_today() {
        let today = d(2025, 6, 1);
        assert_eq!(full_range(None, today), DateRange::single(today));
    }

    #[test]
    fn test_extension_rules() {
        let current = DateRange::new(d(2025, 1, 1), d(2025, 1, 31));

        assert_eq!(extended_range(Some(current), None), None);
        assert_eq!(
            extended_range(Some(current), Some(DateRange::single(d(2025, 1, 15)))),
            None
        );
        assert_eq!(
            extended_range(Some(current), Some(DateRange::single(d(2025, 2, 3)))),
            Some(DateRange::new(d(2025, 1, 1), d(2025, 2, 3)))
        );
        assert_eq!(
            extended_range(None, Some(DateRange::single(d(2025, 2, 3)))),
            Some(DateRange::single(d(2025, 2, 3)))
        );
    }

    #[test]
    fn test_timestamp_text_forms() {
        let at = d(2025, 1, 2).and_hms_opt(3, 4, 5).unwrap();
        assert_eq!(format_timestamp(at), "2025-01-02 03:04:05");
        assert_eq!(parse_timestamp("2025-01-02 03:04:05"), Some(at));
        assert_eq!(parse_timestamp("2025-01-02T03:04:05"), Some(at));
        assert_eq!(
            parse_timestamp("2025-01-02"),
            d(2025, 1, 2).and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_timestamp("02/01/2025"), None);
    }

    #[test]
    fn test_batch_id_for_date() {
        assert_eq!(batch_id_for(d(2025, 11, 3)), 20251103);
    }

    proptest! {
        #[test]
        fn prop_extension_never_shrinks(
            a in 0i64..400, b in 0i64..400, c in 0i64..400, e in 0i64..400,
        ) {
            let base = d(2024, 1, 1);
            let current = DateRange::new(
                base + chrono::Duration::days(a),
                base + chrono::Duration::days(b),
            );
            let incoming = DateRange::new(
                base + chrono::Duration::days(c),
                base + chrono::Duration::days(e),
            );
            let after = extended_range(Some(current), Some(incoming)).unwrap_or(current);
            prop_assert!(after.covers(&current));
            prop_assert!(after.covers(&incoming));
        }
    }
}
