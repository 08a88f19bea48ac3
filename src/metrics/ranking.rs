use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::aggregate::aggregate;
use crate::metrics::derive::{conversion_rate, ratio, roas};
use crate::metrics::group::group;
use crate::metrics::types::{FactRecord, Field};
use crate::query::period::Period;

/// Inputs the composite score can weigh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMetric {
    LeadsPerPeriod,
    ConversionRate,
    Roas,
    AppointmentsPerPeriod,
}

impl RankMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankMetric::LeadsPerPeriod => "leads_per_period",
            RankMetric::ConversionRate => "conversion_rate",
            RankMetric::Roas => "roas",
            RankMetric::AppointmentsPerPeriod => "appointments_per_period",
        }
    }
}

/// One weighted term: `weight * (value / scale)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreTerm {
    pub metric: RankMetric,
    pub weight: f64,
    pub scale: f64,
}

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// A validated set of score terms. Weights sum to 1.0 and every scale is a
/// positive finite number.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScoreWeights {
    terms: Vec<ScoreTerm>,
}

impl ScoreWeights {
    pub fn new(terms: Vec<ScoreTerm>) -> Result<Self> {
        if terms.is_empty() {
            return Err(Error::Config("score weights must have at least one term".into()));
        }
        let mut seen = BTreeSet::new();
        for term in &terms {
            if !seen.insert(term.metric) {
                return Err(Error::Config(format!(
                    "metric {} appears more than once in score weights",
                    term.metric.as_str()
                )));
            }
            if !term.weight.is_finite() || term.weight < 0.0 {
                return Err(Error::Config(format!(
                    "weight for {} must be a non-negative number",
                    term.metric.as_str()
                )));
            }
            if !term.scale.is_finite() || term.scale <= 0.0 {
                return Err(Error::Config(format!(
                    "scale for {} must be positive",
                    term.metric.as_str()
                )));
            }
        }
        let sum: f64 = terms.iter().map(|t| t.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(Error::Config(format!("score weights sum to {sum}, expected 1.0")));
        }
        Ok(Self { terms })
    }

    /// Parse the JSON list stored under the `score_weights` config key.
    pub fn from_json(json: &str) -> Result<Self> {
        let terms: Vec<ScoreTerm> = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid score_weights: {e}")))?;
        Self::new(terms)
    }

    pub fn terms(&self) -> &[ScoreTerm] {
        &self.terms
    }

    pub fn score(&self, input: &RankInput) -> f64 {
        self.terms
            .iter()
            .map(|t| match input.get(t.metric) {
                Some(v) if v.is_finite() => t.weight * (v / t.scale),
                _ => 0.0,
            })
            .sum()
    }
}

impl Default for ScoreWeights {
    /// Leads 30% (per 1000), conversion 25% (per 1%), ROAS 25% (per 10x),
    /// appointments 20% (per 100).
    fn default() -> Self {
        Self {
            terms: vec![
                ScoreTerm { metric: RankMetric::LeadsPerPeriod, weight: 0.30, scale: 1000.0 },
                ScoreTerm { metric: RankMetric::ConversionRate, weight: 0.25, scale: 0.01 },
                ScoreTerm { metric: RankMetric::Roas, weight: 0.25, scale: 10.0 },
                ScoreTerm { metric: RankMetric::AppointmentsPerPeriod, weight: 0.20, scale: 100.0 },
            ],
        }
    }
}

/// Per-entity metrics fed into the ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankInput {
    pub entity_id: String,
    pub leads_per_period: Option<f64>,
    pub conversion_rate: Option<f64>,
    pub roas: Option<f64>,
    pub appointments_per_period: Option<f64>,
    pub period_count: usize,
}

impl RankInput {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            leads_per_period: None,
            conversion_rate: None,
            roas: None,
            appointments_per_period: None,
            period_count: 0,
        }
    }

    pub fn get(&self, metric: RankMetric) -> Option<f64> {
        match metric {
            RankMetric::LeadsPerPeriod => self.leads_per_period,
            RankMetric::ConversionRate => self.conversion_rate,
            RankMetric::Roas => self.roas,
            RankMetric::AppointmentsPerPeriod => self.appointments_per_period,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub score: f64,
    pub input: RankInput,
}

/// Score every entry and sort best first. Equal scores keep input order.
pub fn rank_entities(entries: &[RankInput], weights: &ScoreWeights) -> Vec<RankingEntry> {
    let mut scored: Vec<(f64, &RankInput)> =
        entries.iter().map(|e| (weights.score(e), e)).collect();
    // sort_by is stable
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
        .into_iter()
        .enumerate()
        .map(|(i, (score, input))| RankingEntry {
            rank: i + 1,
            score,
            input: input.clone(),
        })
        .collect()
}

/// Build one ranking input per entity, in order of first appearance.
///
/// Volume metrics are averaged over the entity's distinct periods. Ratios are
/// derived from the entity's summed numerators and denominators.
pub fn rank_inputs(records: &[FactRecord]) -> Vec<RankInput> {
    group(records, |r| r.entity_id.clone())
        .into_iter()
        .map(|(entity_id, members)| {
            let periods: BTreeSet<Period> = members.iter().map(|r| r.period).collect();
            let period_count = periods.len();
            let agg = aggregate(&members, &Field::ALL);
            let per_period = |field: Field| ratio(agg.sums.get(field), period_count as f64);
            RankInput {
                entity_id,
                leads_per_period: per_period(Field::Leads),
                conversion_rate: conversion_rate(&agg.sums),
                roas: roas(&agg.sums),
                appointments_per_period: per_period(Field::TotalAppointments),
                period_count,
            }
        })
        .collect()
}
