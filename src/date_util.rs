use chrono::{Datelike, NaiveDate, Weekday};

/// Get the last day of a given month. `None` for an out-of-range month.
pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    if !(1..=12).contains(&month) {
        return None;
    }
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// Get the quarter (1-4) for a given date.
pub fn quarter_of(d: NaiveDate) -> u8 {
    ((d.month() - 1) / 3 + 1) as u8
}

/// Monday of the given ISO week.
pub fn iso_week_start(iso_year: i32, week: u8) -> Option<NaiveDate> {
    NaiveDate::from_isoywd_opt(iso_year, week as u32, Weekday::Mon)
}

/// Parse a `YYYY-MM-DD` date key, tolerating a trailing time component
/// (`2024-01-01T00:00:00Z`, `2024-01-01 00:00:00`).
pub fn parse_date_key(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_day_of_month() {
        assert_eq!(
            last_day_of_month(2025, 1),
            NaiveDate::from_ymd_opt(2025, 1, 31)
        );
        assert_eq!(
            last_day_of_month(2025, 2),
            NaiveDate::from_ymd_opt(2025, 2, 28)
        );
        assert_eq!(
            last_day_of_month(2024, 2),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        ); // Leap year
        assert_eq!(
            last_day_of_month(2025, 12),
            NaiveDate::from_ymd_opt(2025, 12, 31)
        );
        assert_eq!(last_day_of_month(2025, 13), None);
    }

    #[test]
    fn test_quarter_of() {
        assert_eq!(quarter_of(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()), 1);
        assert_eq!(quarter_of(NaiveDate::from_ymd_opt(2025, 3, 31).unwrap()), 1);
        assert_eq!(quarter_of(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()), 2);
        assert_eq!(quarter_of(NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()), 3);
        assert_eq!(
            quarter_of(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()),
            4
        );
    }

    #[test]
    fn test_iso_week_start() {
        // ISO week 1 of 2025 starts on Monday 2024-12-30
        assert_eq!(
            iso_week_start(2025, 1),
            NaiveDate::from_ymd_opt(2024, 12, 30)
        );
        assert_eq!(iso_week_start(2025, 54), None);
    }

    #[test]
    fn test_parse_date_key() {
        let jan = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert_eq!(parse_date_key("2024-01-01"), jan);
        assert_eq!(parse_date_key("2024-01-01T00:00:00Z"), jan);
        assert_eq!(parse_date_key(" 2024-01-01 00:00:00 "), jan);
        assert_eq!(parse_date_key("January"), None);
    }
}
