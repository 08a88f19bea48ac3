use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::date_util::{iso_week_start, last_day_of_month, parse_date_key, quarter_of};
use crate::error::{Error, Result};

static RE_QUARTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-Q([1-4])$").unwrap());
static RE_WEEK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-W(\d{1,2})$").unwrap());
static RE_MONTH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})$").unwrap());

/// Reporting grain of a fact row or a roll-up. Ordered fine to coarse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        }
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "week" | "weekly" => Ok(Granularity::Week),
            "month" | "monthly" => Ok(Granularity::Month),
            "quarter" | "quarterly" => Ok(Granularity::Quarter),
            "year" | "yearly" => Ok(Granularity::Year),
            other => Err(Error::PeriodParse(format!("unknown granularity: {other}"))),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reporting period. Fact rows carry `Month` or `Week`; `Quarter` and
/// `Year` appear when rolling up.
///
/// Ordering is chronological within a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    Week(i32, u8),
    Month(i32, u8),
    Quarter(i32, u8),
    Year(i32),
}

impl Period {
    /// Parse a period string.
    ///
    /// Supported formats:
    /// - `2025`: year
    /// - `2025-Q1`: quarter
    /// - `2025-01`: month
    /// - `2025-01-01`: month containing the date (month-start dates from the store)
    /// - `2025-W05`: ISO week
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        // Year: "2025"
        if s.len() == 4 {
            if let Ok(year) = s.parse::<i32>() {
                return Ok(Period::Year(year));
            }
        }

        // Quarter: "2025-Q1" through "2025-Q4"
        if let Some(caps) = RE_QUARTER.captures(s) {
            let year: i32 = caps[1].parse().map_err(|_| bad_period(s))?;
            let q: u8 = caps[2].parse().map_err(|_| bad_period(s))?;
            return Ok(Period::Quarter(year, q));
        }

        // Week: "2025-W05"
        if let Some(caps) = RE_WEEK.captures(s) {
            let year: i32 = caps[1].parse().map_err(|_| bad_period(s))?;
            let week: u8 = caps[2].parse().map_err(|_| bad_period(s))?;
            return Period::week(year, week);
        }

        // Month: "2025-01"
        if let Some(caps) = RE_MONTH.captures(s) {
            let year: i32 = caps[1].parse().map_err(|_| bad_period(s))?;
            let month: u8 = caps[2].parse().map_err(|_| bad_period(s))?;
            if (1..=12).contains(&month) {
                return Ok(Period::Month(year, month));
            }
        }

        // Month-start ISO date: "2025-01-01"
        if let Some(date) = parse_date_key(s) {
            return Ok(Period::from_date(date, Granularity::Month));
        }

        Err(bad_period(s))
    }

    /// Build a weekly period from the `(year, week_number)` pair the weekly
    /// tables carry, rejecting weeks the ISO calendar doesn't have.
    pub fn week(iso_year: i32, week: u8) -> Result<Self> {
        if iso_week_start(iso_year, week).is_none() {
            return Err(Error::PeriodParse(format!(
                "{iso_year} has no ISO week {week}"
            )));
        }
        Ok(Period::Week(iso_year, week))
    }

    /// The period of the given grain containing `date`.
    pub fn from_date(date: NaiveDate, granularity: Granularity) -> Self {
        match granularity {
            Granularity::Week => {
                let iw = date.iso_week();
                Period::Week(iw.year(), iw.week() as u8)
            }
            Granularity::Month => Period::Month(date.year(), date.month() as u8),
            Granularity::Quarter => Period::Quarter(date.year(), quarter_of(date)),
            Granularity::Year => Period::Year(date.year()),
        }
    }

    pub fn granularity(&self) -> Granularity {
        match self {
            Period::Week(..) => Granularity::Week,
            Period::Month(..) => Granularity::Month,
            Period::Quarter(..) => Granularity::Quarter,
            Period::Year(_) => Granularity::Year,
        }
    }

    /// Convert to a canonical key string for storage/lookup.
    pub fn to_key(&self) -> String {
        match self {
            Period::Year(y) => format!("{y}"),
            Period::Quarter(y, q) => format!("{y}-Q{q}"),
            Period::Month(y, m) => format!("{y}-{m:02}"),
            Period::Week(y, w) => format!("{y}-W{w:02}"),
        }
    }

    /// Get the date range (inclusive start, inclusive end) for this period.
    /// `None` only for hand-built periods outside the calendar.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        match *self {
            Period::Year(y) => Some((
                NaiveDate::from_ymd_opt(y, 1, 1)?,
                NaiveDate::from_ymd_opt(y, 12, 31)?,
            )),
            Period::Quarter(y, q) => {
                if !(1..=4).contains(&q) {
                    return None;
                }
                let start_month = (q as u32 - 1) * 3 + 1;
                Some((
                    NaiveDate::from_ymd_opt(y, start_month, 1)?,
                    last_day_of_month(y, q as u32 * 3)?,
                ))
            }
            Period::Month(y, m) => Some((
                NaiveDate::from_ymd_opt(y, m as u32, 1)?,
                last_day_of_month(y, m as u32)?,
            )),
            Period::Week(y, w) => {
                let start = iso_week_start(y, w)?;
                Some((start, start + Duration::days(6)))
            }
        }
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.date_range().map(|(start, _)| start)
    }

    /// Get the previous period of the same type.
    pub fn previous(&self) -> Self {
        match *self {
            Period::Year(y) => Period::Year(y - 1),
            Period::Quarter(y, q) => {
                if q <= 1 {
                    Period::Quarter(y - 1, 4)
                } else {
                    Period::Quarter(y, q - 1)
                }
            }
            Period::Month(y, m) => {
                if m <= 1 {
                    Period::Month(y - 1, 12)
                } else {
                    Period::Month(y, m - 1)
                }
            }
            Period::Week(y, w) => match iso_week_start(y, w) {
                // Step back through the calendar so 53-week years resolve.
                Some(start) => Period::from_date(start - Duration::days(7), Granularity::Week),
                None if w > 1 => Period::Week(y, w - 1),
                None => Period::Week(y - 1, 52),
            },
        }
    }

    /// Roll this period up to a coarser (or equal) grain. Returns `None`
    /// when asked for a finer grain.
    ///
    /// A week belongs to the month and quarter containing its Thursday,
    /// which matches ISO week-year assignment.
    pub fn rollup(&self, target: Granularity) -> Option<Self> {
        if target < self.granularity() {
            return None;
        }
        if target == self.granularity() {
            return Some(*self);
        }
        match *self {
            Period::Week(y, w) => {
                if target == Granularity::Year {
                    return Some(Period::Year(y));
                }
                let thursday = iso_week_start(y, w)? + Duration::days(3);
                Some(Period::from_date(thursday, target))
            }
            Period::Month(y, m) => match target {
                Granularity::Quarter => Some(Period::Quarter(y, m.saturating_sub(1) / 3 + 1)),
                _ => Some(Period::Year(y)),
            },
            Period::Quarter(y, _) => Some(Period::Year(y)),
            Period::Year(_) => None,
        }
    }
}

fn bad_period(s: &str) -> Error {
    Error::PeriodParse(format!("unrecognized period: {s}"))
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Period::parse(s)
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_key())
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_key())
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Period::parse(&s).map_err(serde::de::Error::custom)
    }
}
