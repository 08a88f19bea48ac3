//! Ratio metrics derived from summed fields.
//!
//! Every ratio here is computed from a numerator sum and a denominator sum.
//! Combining groups means merging their [`Sums`] and deriving again; there is
//! deliberately no function that averages ratios without a weight.

use serde::{Deserialize, Serialize};

use crate::metrics::aggregate::{AggregateGroup, Sums};
use crate::metrics::types::{ChannelKey, FactRecord, Field};

/// `numerator / denominator`, or `None` when the denominator is zero,
/// negative, or either side is not finite.
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if !numerator.is_finite() || !denominator.is_finite() || denominator <= 0.0 {
        return None;
    }
    let value = numerator / denominator;
    value.is_finite().then_some(value)
}

/// Return on ad spend: revenue / spend.
pub fn roas(sums: &Sums) -> Option<f64> {
    ratio(sums.get(Field::TotalEstimatedRevenue), sums.get(Field::Spend))
}

/// Leads / visits, as a fraction.
pub fn conversion_rate(sums: &Sums) -> Option<f64> {
    ratio(sums.get(Field::Leads), sums.get(Field::Visits))
}

/// Spend / leads (CAC).
pub fn cost_per_lead(sums: &Sums) -> Option<f64> {
    ratio(sums.get(Field::Spend), sums.get(Field::Leads))
}

pub fn cost_per_appointment(sums: &Sums) -> Option<f64> {
    ratio(sums.get(Field::Spend), sums.get(Field::TotalAppointments))
}

pub fn cost_per_visit(sums: &Sums) -> Option<f64> {
    ratio(sums.get(Field::Spend), sums.get(Field::Visits))
}

/// Appointments / leads, as a fraction.
pub fn lead_to_appointment_rate(sums: &Sums) -> Option<f64> {
    ratio(sums.get(Field::TotalAppointments), sums.get(Field::Leads))
}

/// Visits / impressions, as a fraction.
pub fn click_through_rate(sums: &Sums) -> Option<f64> {
    ratio(sums.get(Field::Visits), sums.get(Field::Impressions))
}

/// Named ratio metrics, used for delta reports, ranking inputs and column
/// lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioMetric {
    Roas,
    ConversionRate,
    CostPerLead,
    CostPerAppointment,
    CostPerVisit,
    LeadToAppointmentRate,
    ClickThroughRate,
}

impl RatioMetric {
    pub const ALL: [RatioMetric; 7] = [
        RatioMetric::Roas,
        RatioMetric::ConversionRate,
        RatioMetric::CostPerLead,
        RatioMetric::CostPerAppointment,
        RatioMetric::CostPerVisit,
        RatioMetric::LeadToAppointmentRate,
        RatioMetric::ClickThroughRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RatioMetric::Roas => "roas",
            RatioMetric::ConversionRate => "conversion_rate",
            RatioMetric::CostPerLead => "cost_per_lead",
            RatioMetric::CostPerAppointment => "cost_per_appointment",
            RatioMetric::CostPerVisit => "cost_per_visit",
            RatioMetric::LeadToAppointmentRate => "lead_to_appointment_rate",
            RatioMetric::ClickThroughRate => "click_through_rate",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RatioMetric::Roas => "ROAS",
            RatioMetric::ConversionRate => "Conversion Rate",
            RatioMetric::CostPerLead => "Cost per Lead",
            RatioMetric::CostPerAppointment => "Cost per Appointment",
            RatioMetric::CostPerVisit => "Cost per Visit",
            RatioMetric::LeadToAppointmentRate => "Lead to Appointment",
            RatioMetric::ClickThroughRate => "CTR",
        }
    }

    pub fn compute(&self, sums: &Sums) -> Option<f64> {
        match self {
            RatioMetric::Roas => roas(sums),
            RatioMetric::ConversionRate => conversion_rate(sums),
            RatioMetric::CostPerLead => cost_per_lead(sums),
            RatioMetric::CostPerAppointment => cost_per_appointment(sums),
            RatioMetric::CostPerVisit => cost_per_visit(sums),
            RatioMetric::LeadToAppointmentRate => lead_to_appointment_rate(sums),
            RatioMetric::ClickThroughRate => click_through_rate(sums),
        }
    }

    /// Cost metrics improve as they fall.
    pub fn lower_is_better(&self) -> bool {
        matches!(
            self,
            RatioMetric::CostPerLead | RatioMetric::CostPerAppointment | RatioMetric::CostPerVisit
        )
    }

    /// Whether the value is a fraction that presentation shows as a percent.
    pub fn is_rate(&self) -> bool {
        matches!(
            self,
            RatioMetric::ConversionRate
                | RatioMetric::LeadToAppointmentRate
                | RatioMetric::ClickThroughRate
        )
    }
}

/// All ratio metrics for one set of sums. `None` means "N/A".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DerivedMetrics {
    pub roas: Option<f64>,
    pub conversion_rate: Option<f64>,
    pub cost_per_lead: Option<f64>,
    pub cost_per_appointment: Option<f64>,
    pub cost_per_visit: Option<f64>,
    pub lead_to_appointment_rate: Option<f64>,
    pub click_through_rate: Option<f64>,
}

impl DerivedMetrics {
    pub fn get(&self, metric: RatioMetric) -> Option<f64> {
        match metric {
            RatioMetric::Roas => self.roas,
            RatioMetric::ConversionRate => self.conversion_rate,
            RatioMetric::CostPerLead => self.cost_per_lead,
            RatioMetric::CostPerAppointment => self.cost_per_appointment,
            RatioMetric::CostPerVisit => self.cost_per_visit,
            RatioMetric::LeadToAppointmentRate => self.lead_to_appointment_rate,
            RatioMetric::ClickThroughRate => self.click_through_rate,
        }
    }
}

pub fn derive_metrics(sums: &Sums) -> DerivedMetrics {
    DerivedMetrics {
        roas: roas(sums),
        conversion_rate: conversion_rate(sums),
        cost_per_lead: cost_per_lead(sums),
        cost_per_appointment: cost_per_appointment(sums),
        cost_per_visit: cost_per_visit(sums),
        lead_to_appointment_rate: lead_to_appointment_rate(sums),
        click_through_rate: click_through_rate(sums),
    }
}

/// Re-derive metrics across several groups by merging their sums first.
pub fn combine(groups: &[AggregateGroup]) -> (Sums, DerivedMetrics) {
    let mut sums = Sums::new();
    for g in groups {
        sums.merge(&g.sums);
    }
    let derived = derive_metrics(&sums);
    (sums, derived)
}

/// The denominator a ratio is weighted by when only per-row ratios are
/// available. Match it to the ratio: spend for ROAS, visits for conversion
/// rate, leads for cost per lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightBasis {
    Spend,
    Visits,
    Leads,
}

impl WeightBasis {
    pub fn field(&self) -> Field {
        match self {
            WeightBasis::Spend => Field::Spend,
            WeightBasis::Visits => Field::Visits,
            WeightBasis::Leads => Field::Leads,
        }
    }
}

/// Weighted mean of a per-row ratio: Σ(value·weight) / Σweight, with each
/// row's weight read from its `basis` field. Rows with no value or a
/// non-positive weight are skipped. When the basis is the ratio's own
/// denominator this equals re-deriving from sums.
pub fn weighted_average<F>(records: &[FactRecord], value: F, basis: WeightBasis) -> Option<f64>
where
    F: Fn(&FactRecord) -> Option<f64>,
{
    let field = basis.field();
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for record in records {
        let weight = record.additive_value(field);
        match value(record) {
            Some(v) if v.is_finite() && weight > 0.0 => {
                numerator += v * weight;
                denominator += weight;
            }
            _ => {}
        }
    }
    ratio(numerator, denominator)
}

/// One step of the impressions → visits → leads → appointments funnel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelStage {
    pub stage: &'static str,
    pub value: f64,
    /// Fraction of the previous stage that reached this one. The first
    /// stage has no rate.
    pub rate_from_previous: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Funnel {
    pub stages: Vec<FunnelStage>,
}

impl Funnel {
    pub fn from_sums(sums: &Sums) -> Self {
        let impressions = sums.get(Field::Impressions);
        let visits = sums.get(Field::Visits);
        let leads = sums.get(Field::Leads);
        let appointments = sums.get(Field::TotalAppointments);
        Funnel {
            stages: vec![
                FunnelStage {
                    stage: "impressions",
                    value: impressions,
                    rate_from_previous: None,
                },
                FunnelStage {
                    stage: "visits",
                    value: visits,
                    rate_from_previous: click_through_rate(sums),
                },
                FunnelStage {
                    stage: "leads",
                    value: leads,
                    rate_from_previous: conversion_rate(sums),
                },
                FunnelStage {
                    stage: "appointments",
                    value: appointments,
                    rate_from_previous: lead_to_appointment_rate(sums),
                },
            ],
        }
    }

    /// Appointments per impression across the whole funnel.
    pub fn end_to_end_rate(&self) -> Option<f64> {
        let first = self.stages.first()?;
        let last = self.stages.last()?;
        ratio(last.value, first.value)
    }
}

/// A channel's share of one summed field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelShare {
    pub channel: ChannelKey,
    pub value: f64,
    pub share: Option<f64>,
}

/// Each channel's share of `field` across `groups`. Groups that were not
/// keyed on channel count as unsegmented. Order follows first appearance.
pub fn channel_mix(groups: &[AggregateGroup], field: Field) -> Vec<ChannelShare> {
    let mut totals: indexmap::IndexMap<ChannelKey, f64> = indexmap::IndexMap::new();
    for g in groups {
        let channel = g.key.channel.clone().unwrap_or(ChannelKey::Unsegmented);
        *totals.entry(channel).or_insert(0.0) += g.sums.get(field);
    }
    let grand_total: f64 = totals.values().sum();
    totals
        .into_iter()
        .map(|(channel, value)| ChannelShare {
            channel,
            value,
            share: ratio(value, grand_total),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::aggregate::aggregate_by_period;
    use crate::metrics::group::{CompositeKey, Dimensions};
    use crate::query::period::Period;

    fn sums(pairs: &[(Field, f64)]) -> Sums {
        pairs.iter().copied().collect()
    }

    fn group_with(channel: Option<&str>, pairs: &[(Field, f64)]) -> AggregateGroup {
        AggregateGroup {
            key: CompositeKey {
                entity_id: None,
                period: None,
                channel: Some(match channel {
                    Some(c) => ChannelKey::Named(c.to_string()),
                    None => ChannelKey::Unsegmented,
                }),
            },
            sums: sums(pairs),
            member_count: 1,
        }
    }

    #[test]
    fn test_ratio_null_policy() {
        assert_eq!(ratio(100.0, 0.0), None);
        assert_eq!(ratio(100.0, -5.0), None);
        assert_eq!(ratio(f64::NAN, 2.0), None);
        assert_eq!(ratio(1.0, f64::INFINITY), None);
        assert_eq!(ratio(0.0, 4.0), Some(0.0));
        assert_eq!(ratio(3.0, 4.0), Some(0.75));
    }

    #[test]
    fn test_roas_zero_spend_is_none() {
        let s = sums(&[(Field::Spend, 0.0), (Field::TotalEstimatedRevenue, 100.0)]);
        let d = derive_metrics(&s);
        assert_eq!(d.roas, None);
        // Nothing else has a denominator either
        assert_eq!(d, DerivedMetrics::default());
    }

    #[test]
    fn test_canonical_formulas() {
        let s = sums(&[
            (Field::Impressions, 10_000.0),
            (Field::Visits, 500.0),
            (Field::Leads, 50.0),
            (Field::TotalAppointments, 20.0),
            (Field::Spend, 1_000.0),
            (Field::TotalEstimatedRevenue, 4_000.0),
        ]);
        let d = derive_metrics(&s);
        assert_eq!(d.roas, Some(4.0));
        assert_eq!(d.conversion_rate, Some(0.1));
        assert_eq!(d.cost_per_lead, Some(20.0));
        assert_eq!(d.cost_per_appointment, Some(50.0));
        assert_eq!(d.cost_per_visit, Some(2.0));
        assert_eq!(d.lead_to_appointment_rate, Some(0.4));
        assert_eq!(d.click_through_rate, Some(0.05));
        for metric in RatioMetric::ALL {
            assert_eq!(metric.compute(&s), d.get(metric));
        }
    }

    #[test]
    fn test_rates_stay_fractions() {
        let s = sums(&[(Field::Visits, 400.0), (Field::Leads, 92.0)]);
        assert_eq!(conversion_rate(&s), Some(0.23));
    }

    #[test]
    fn test_combined_roas_is_rederived_not_averaged() {
        let a = group_with(Some("a"), &[(Field::Spend, 100.0), (Field::TotalEstimatedRevenue, 300.0)]);
        let b = group_with(Some("b"), &[(Field::Spend, 900.0), (Field::TotalEstimatedRevenue, 900.0)]);
        assert_eq!(roas(&a.sums), Some(3.0));
        assert_eq!(roas(&b.sums), Some(1.0));

        let (merged, derived) = combine(&[a, b]);
        assert_eq!(merged.get(Field::Spend), 1000.0);
        assert_eq!(merged.get(Field::TotalEstimatedRevenue), 1200.0);
        let combined = derived.roas.unwrap();
        assert!((combined - 1.2).abs() < 1e-12);
        assert!((combined - 2.0).abs() > 0.5);
    }

    fn stored_roas_row(stored: Option<f64>, spend: f64, visits: f64) -> FactRecord {
        let mut r = FactRecord::new("a", Period::Month(2024, 1), None)
            .with(Field::Spend, spend)
            .with(Field::Visits, visits);
        r.total_roas = stored;
        r
    }

    #[test]
    fn test_spend_weighted_average_matches_rederivation() {
        let rows = [
            stored_roas_row(Some(3.0), 100.0, 0.0),
            stored_roas_row(Some(1.0), 900.0, 0.0),
        ];
        let avg = weighted_average(&rows, |r| r.total_roas, WeightBasis::Spend).unwrap();
        assert!((avg - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_average_reads_weights_from_basis() {
        let rows = [
            stored_roas_row(Some(3.0), 100.0, 900.0),
            stored_roas_row(Some(1.0), 900.0, 100.0),
        ];
        let by_spend = weighted_average(&rows, |r| r.total_roas, WeightBasis::Spend).unwrap();
        let by_visits = weighted_average(&rows, |r| r.total_roas, WeightBasis::Visits).unwrap();
        assert!((by_spend - 1.2).abs() < 1e-12);
        assert!((by_visits - 2.8).abs() < 1e-12);
        // No leads on any row, so there is nothing to weight by
        assert_eq!(weighted_average(&rows, |r| r.total_roas, WeightBasis::Leads), None);
    }

    #[test]
    fn test_weighted_average_skips_missing_and_zero_weight() {
        let rows = [
            stored_roas_row(None, 100.0, 0.0),
            stored_roas_row(Some(2.0), 0.0, 0.0),
            stored_roas_row(Some(4.0), 50.0, 0.0),
        ];
        assert_eq!(weighted_average(&rows, |r| r.total_roas, WeightBasis::Spend), Some(4.0));
        assert_eq!(weighted_average(&rows[..1], |r| r.total_roas, WeightBasis::Spend), None);
        assert_eq!(weighted_average(&[], |r| r.total_roas, WeightBasis::Visits), None);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let records = vec![
            FactRecord::new("A", Period::Month(2024, 1), None)
                .with(Field::Spend, 100.0)
                .with(Field::Leads, 10.0)
                .with(Field::TotalEstimatedRevenue, 500.0),
            FactRecord::new("A", Period::Month(2024, 1), None)
                .with(Field::Spend, 50.0)
                .with(Field::Leads, 5.0)
                .with(Field::TotalEstimatedRevenue, 100.0),
        ];
        let groups = aggregate_by_period(&records, &Dimensions::entity_period());
        let d = derive_metrics(&groups[0].sums);
        assert_eq!(d.roas, Some(4.0));
        assert_eq!(d.cost_per_lead, Some(10.0));
    }

    #[test]
    fn test_funnel() {
        let s = sums(&[
            (Field::Impressions, 1000.0),
            (Field::Visits, 100.0),
            (Field::Leads, 10.0),
            (Field::TotalAppointments, 5.0),
        ]);
        let f = Funnel::from_sums(&s);
        let rates: Vec<_> = f.stages.iter().map(|s| s.rate_from_previous).collect();
        assert_eq!(rates, vec![None, Some(0.1), Some(0.1), Some(0.5)]);
        assert_eq!(f.end_to_end_rate(), Some(0.005));

        let empty = Funnel::from_sums(&Sums::new());
        assert!(empty.stages.iter().all(|s| s.rate_from_previous.is_none()));
        assert_eq!(empty.end_to_end_rate(), None);
    }

    #[test]
    fn test_channel_mix() {
        let groups = vec![
            group_with(Some("google ads"), &[(Field::Spend, 300.0)]),
            group_with(None, &[(Field::Spend, 100.0)]),
            group_with(Some("google ads"), &[(Field::Spend, 100.0)]),
        ];
        let mix = channel_mix(&groups, Field::Spend);
        assert_eq!(mix.len(), 2);
        assert_eq!(mix[0].channel, ChannelKey::Named("google ads".into()));
        assert_eq!(mix[0].value, 400.0);
        assert_eq!(mix[0].share, Some(0.8));
        assert_eq!(mix[1].share, Some(0.2));

        let zero = channel_mix(&groups, Field::Leads);
        assert!(zero.iter().all(|s| s.share.is_none()));
    }

    #[test]
    fn test_channel_mix_json_keeps_order() {
        let groups = vec![
            group_with(None, &[(Field::Spend, 25.0)]),
            group_with(Some("seo"), &[(Field::Spend, 75.0)]),
        ];
        let json = serde_json::to_value(channel_mix(&groups, Field::Spend)).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"channel": null, "value": 25.0, "share": 0.25},
                {"channel": "seo", "value": 75.0, "share": 0.75},
            ])
        );
    }
}
