use serde::Serialize;

use crate::metrics::aggregate::{total, Sums};
use crate::metrics::derive::{conversion_rate, roas, weighted_average, RatioMetric, WeightBasis};
use crate::metrics::types::{FactRecord, Field};
use crate::query::period::Period;

/// A row whose stored ratio disagrees with the one derived from its own
/// fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatioMismatch {
    pub entity_id: String,
    pub period: Period,
    pub channel: Option<String>,
    pub metric: RatioMetric,
    pub stored: f64,
    pub derived: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub rows_checked: usize,
    pub tolerance: f64,
    pub mismatches: Vec<RatioMismatch>,
    /// Spend-weighted mean of the stored `total_roas` values.
    pub stored_roas_weighted: Option<f64>,
    /// ROAS from summed revenue and spend.
    pub derived_roas: Option<f64>,
    /// Visit-weighted mean of the stored `total_conversion` values.
    pub stored_conversion_weighted: Option<f64>,
    pub derived_conversion: Option<f64>,
}

impl QualityReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

fn row_sums(record: &FactRecord) -> Sums {
    Field::ALL
        .iter()
        .map(|f| (*f, record.additive_value(*f)))
        .collect()
}

fn mismatch(stored: Option<f64>, derived: Option<f64>, tolerance: f64) -> Option<f64> {
    let stored = stored.filter(|v| v.is_finite())?;
    match derived {
        Some(d) if (stored - d).abs() <= tolerance => None,
        // No denominator on the row: a stored zero is consistent with that.
        None if stored == 0.0 => None,
        _ => Some(stored),
    }
}

/// Re-derive ROAS and conversion per row and compare with the values the
/// ETL stored. `tolerance` is an absolute difference on the decimal values.
///
/// The stored ratios are also averaged (weighted by their own denominators)
/// next to the aggregate re-derivation, so a drift between the two shows up
/// even when no single row is far off.
pub fn check_ratio_consistency(records: &[FactRecord], tolerance: f64) -> QualityReport {
    let mut mismatches = Vec::new();
    for record in records {
        let sums = row_sums(record);
        let checks = [
            (RatioMetric::Roas, record.total_roas, roas(&sums)),
            (RatioMetric::ConversionRate, record.total_conversion, conversion_rate(&sums)),
        ];
        for (metric, stored, derived) in checks {
            if let Some(stored) = mismatch(stored, derived, tolerance) {
                mismatches.push(RatioMismatch {
                    entity_id: record.entity_id.clone(),
                    period: record.period,
                    channel: record.channel.clone(),
                    metric,
                    stored,
                    derived,
                });
            }
        }
    }

    let all = total(records);

    if !mismatches.is_empty() {
        log::warn!(
            "{} stored ratio(s) disagree with re-derived values across {} rows",
            mismatches.len(),
            records.len()
        );
    }

    QualityReport {
        rows_checked: records.len(),
        tolerance,
        mismatches,
        stored_roas_weighted: weighted_average(records, |r| r.total_roas, WeightBasis::Spend),
        derived_roas: roas(&all.sums),
        stored_conversion_weighted: weighted_average(
            records,
            |r| r.total_conversion,
            WeightBasis::Visits,
        ),
        derived_conversion: conversion_rate(&all.sums),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(spend: f64, revenue: f64, stored_roas: Option<f64>) -> FactRecord {
        let mut r = FactRecord::new("a", Period::Month(2024, 1), None)
            .with(Field::Spend, spend)
            .with(Field::TotalEstimatedRevenue, revenue);
        r.total_roas = stored_roas;
        r
    }

    #[test]
    fn test_consistent_rows_are_clean() {
        let records = vec![row(100.0, 300.0, Some(3.0)), row(900.0, 900.0, Some(1.0))];
        let report = check_ratio_consistency(&records, 0.001);
        assert!(report.is_clean());
        assert_eq!(report.rows_checked, 2);
        // Spend-weighted stored ROAS agrees with the re-derived aggregate
        assert!((report.stored_roas_weighted.unwrap() - 1.2).abs() < 1e-12);
        assert!((report.derived_roas.unwrap() - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_flags_drifted_row() {
        let records = vec![row(100.0, 300.0, Some(2.5)), row(900.0, 900.0, Some(1.0))];
        let report = check_ratio_consistency(&records, 0.01);
        assert_eq!(report.mismatches.len(), 1);
        let m = &report.mismatches[0];
        assert_eq!(m.metric, RatioMetric::Roas);
        assert_eq!(m.stored, 2.5);
        assert_eq!(m.derived, Some(3.0));
    }

    #[test]
    fn test_stored_ratio_without_denominator() {
        let records = vec![row(0.0, 50.0, Some(0.0)), row(0.0, 50.0, Some(4.0))];
        let report = check_ratio_consistency(&records, 0.01);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].derived, None);
        assert_eq!(report.derived_roas, None);
        assert_eq!(report.stored_roas_weighted, None);
    }

    #[test]
    fn test_conversion_check() {
        let mut r = FactRecord::new("a", Period::Month(2024, 1), Some("seo"))
            .with(Field::Visits, 200.0)
            .with(Field::Leads, 10.0);
        r.total_conversion = Some(5.0);
        let report = check_ratio_consistency(&[r], 0.001);
        assert_eq!(report.mismatches.len(), 1);
        assert_eq!(report.mismatches[0].metric, RatioMetric::ConversionRate);
        assert_eq!(report.derived_conversion, Some(0.05));
    }
}
