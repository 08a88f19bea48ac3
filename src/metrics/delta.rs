use serde::Serialize;

use crate::metrics::aggregate::{aggregate, Sums};
use crate::metrics::derive::RatioMetric;
use crate::metrics::types::{FactRecord, Field};
use crate::query::period::Period;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Up => "↑",
            Direction::Down => "↓",
            Direction::Flat => "→",
        }
    }
}

/// Whether a change is good news once the metric's polarity is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeltaResult {
    pub absolute: Option<f64>,
    /// Percent change, already multiplied by 100.
    pub percent: Option<f64>,
    pub direction: Direction,
}

impl DeltaResult {
    const NONE: DeltaResult = DeltaResult {
        absolute: None,
        percent: None,
        direction: Direction::Flat,
    };

    pub fn sentiment(&self, lower_is_better: bool) -> Sentiment {
        match (self.direction, lower_is_better) {
            (Direction::Flat, _) => Sentiment::Neutral,
            (Direction::Up, false) | (Direction::Down, true) => Sentiment::Positive,
            (Direction::Up, true) | (Direction::Down, false) => Sentiment::Negative,
        }
    }
}

fn sign_direction(x: f64) -> Direction {
    if x > 0.0 {
        Direction::Up
    } else if x < 0.0 {
        Direction::Down
    } else {
        Direction::Flat
    }
}

/// Compare two values.
///
/// Direction is sign-only and always taken from the absolute change, so a
/// rise from a negative baseline is `Up` even though its percent is negative.
/// When `previous` is 0 the percent is undefined.
pub fn compute_delta(current: Option<f64>, previous: Option<f64>) -> DeltaResult {
    let (current, previous) = match (current, previous) {
        (Some(c), Some(p)) if c.is_finite() && p.is_finite() => (c, p),
        _ => return DeltaResult::NONE,
    };
    let absolute = current - previous;
    if previous == 0.0 {
        return DeltaResult {
            absolute: Some(absolute),
            percent: None,
            direction: sign_direction(absolute),
        };
    }
    let percent = absolute / previous * 100.0;
    DeltaResult {
        absolute: Some(absolute),
        percent: Some(percent),
        direction: sign_direction(absolute),
    }
}

/// A headline number compared across two periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Headline {
    Sum(Field),
    Ratio(RatioMetric),
}

impl Headline {
    pub const DEFAULT: [Headline; 7] = [
        Headline::Sum(Field::Spend),
        Headline::Sum(Field::Leads),
        Headline::Sum(Field::TotalAppointments),
        Headline::Sum(Field::TotalEstimatedRevenue),
        Headline::Ratio(RatioMetric::Roas),
        Headline::Ratio(RatioMetric::ConversionRate),
        Headline::Ratio(RatioMetric::CostPerLead),
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Headline::Sum(f) => f.as_str(),
            Headline::Ratio(m) => m.as_str(),
        }
    }

    pub fn lower_is_better(&self) -> bool {
        match self {
            Headline::Sum(f) => f.lower_is_better(),
            Headline::Ratio(m) => m.lower_is_better(),
        }
    }

    /// Value for one period's sums. A period with no rows reads as `None`,
    /// not as zero.
    fn value(&self, sums: Option<&Sums>) -> Option<f64> {
        let sums = sums?;
        match self {
            Headline::Sum(f) => Some(sums.get(*f)),
            Headline::Ratio(m) => m.compute(sums),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDelta {
    pub metric: Headline,
    pub current: Option<f64>,
    pub previous: Option<f64>,
    pub delta: DeltaResult,
    pub sentiment: Sentiment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodComparison {
    pub current_period: Period,
    pub previous_period: Period,
    pub current_rows: usize,
    pub previous_rows: usize,
    pub metrics: Vec<MetricDelta>,
}

/// Compare the latest period present in `records` with the period before
/// it. Ratios are re-derived from each period's sums. Returns `None` for an
/// empty input.
pub fn compare_latest_periods(records: &[FactRecord]) -> Option<PeriodComparison> {
    let current_period = records.iter().map(|r| r.period).max()?;
    let previous_period = current_period.previous();

    let current: Vec<&FactRecord> = records.iter().filter(|r| r.period == current_period).collect();
    let previous: Vec<&FactRecord> =
        records.iter().filter(|r| r.period == previous_period).collect();

    let current_sums = aggregate(&current, &Field::ALL).sums;
    let previous_sums = (!previous.is_empty()).then(|| aggregate(&previous, &Field::ALL).sums);

    let metrics = Headline::DEFAULT
        .iter()
        .map(|h| {
            let c = h.value(Some(&current_sums));
            let p = h.value(previous_sums.as_ref());
            let delta = compute_delta(c, p);
            MetricDelta {
                metric: *h,
                current: c,
                previous: p,
                delta,
                sentiment: delta.sentiment(h.lower_is_better()),
            }
        })
        .collect();

    Some(PeriodComparison {
        current_period,
        previous_period,
        current_rows: current.len(),
        previous_rows: previous.len(),
        metrics,
    })
}
