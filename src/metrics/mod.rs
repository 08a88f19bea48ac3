pub mod aggregate;
pub mod delta;
pub mod derive;
pub mod group;
pub mod heatmap;
pub mod quality;
pub mod ranking;
pub mod types;

pub use aggregate::{aggregate, aggregate_by_period, Aggregate, AggregateGroup, Sums};
pub use delta::{compare_latest_periods, compute_delta, DeltaResult, Direction, PeriodComparison};
pub use derive::{derive_metrics, DerivedMetrics, RatioMetric};
pub use group::{group, CompositeKey, Dimensions};
pub use ranking::{rank_entities, rank_inputs, RankingEntry, ScoreWeights};
pub use types::*;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::Result;
use crate::metrics::derive::{channel_mix, ChannelShare, Funnel};
use crate::metrics::heatmap::{heat_column, HeatLevel};
use crate::metrics::quality::{check_ratio_consistency, QualityReport};
use crate::query::builder::FactQuery;
use crate::storage::repository::EntityDirectory;
use crate::storage::Database;

/// Ratios shaded in summary tables.
const HEATMAP_METRICS: [RatioMetric; 4] = [
    RatioMetric::Roas,
    RatioMetric::ConversionRate,
    RatioMetric::CostPerLead,
    RatioMetric::CostPerAppointment,
];

/// One summed group with its derived ratios.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRow {
    pub key: CompositeKey,
    pub label: String,
    pub display_name: Option<String>,
    /// Source rows folded in (not a count of non-null values).
    pub member_count: usize,
    pub sums: Sums,
    pub metrics: DerivedMetrics,
    pub heat: BTreeMap<RatioMetric, HeatLevel>,
}

impl SummaryRow {
    fn from_group(group: AggregateGroup, directory: &EntityDirectory) -> Self {
        let display_name = group
            .key
            .entity_id
            .as_deref()
            .map(|id| directory.display_name(id).to_string());
        let label = match (&display_name, &group.key.entity_id) {
            (Some(name), Some(id)) if name != id => group.key.label().replacen(id.as_str(), name, 1),
            _ => group.key.label(),
        };
        Self {
            metrics: derive_metrics(&group.sums),
            key: group.key,
            label,
            display_name,
            member_count: group.member_count,
            sums: group.sums,
            heat: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub dimensions: String,
    pub groups: Vec<SummaryRow>,
    /// All groups merged, ratios re-derived from the merged sums.
    pub total: SummaryRow,
}

fn describe(dimensions: &Dimensions) -> String {
    let mut parts = Vec::new();
    if dimensions.entity {
        parts.push("entity".to_string());
    }
    if dimensions.period {
        match dimensions.rollup {
            Some(g) => parts.push(format!("period({g})")),
            None => parts.push("period".to_string()),
        }
    }
    if dimensions.channel {
        parts.push("channel".to_string());
    }
    if parts.is_empty() {
        "total".to_string()
    } else {
        parts.join(",")
    }
}

async fn load_directory(db: &Database) -> Result<EntityDirectory> {
    Ok(db.reader().call(|conn| EntityDirectory::load(conn)).await?)
}

/// Group and sum the rows matching `query`, derive ratios per group and band
/// each ratio against the other groups.
pub fn summarize(
    records: &[FactRecord],
    dimensions: &Dimensions,
    directory: &EntityDirectory,
) -> SummaryReport {
    let groups = aggregate_by_period(records, dimensions);
    let (total_sums, total_metrics) = derive::combine(&groups);

    let mut rows: Vec<SummaryRow> = groups
        .into_iter()
        .map(|g| SummaryRow::from_group(g, directory))
        .collect();

    for metric in HEATMAP_METRICS {
        let column: Vec<Option<f64>> = rows.iter().map(|r| r.metrics.get(metric)).collect();
        let levels = heat_column(&column, metric.lower_is_better());
        for (row, level) in rows.iter_mut().zip(levels) {
            row.heat.insert(metric, level);
        }
    }

    let total = SummaryRow {
        key: CompositeKey { entity_id: None, period: None, channel: None },
        label: "(all)".to_string(),
        display_name: None,
        member_count: records.len(),
        metrics: total_metrics,
        sums: total_sums,
        heat: BTreeMap::new(),
    };

    SummaryReport {
        dimensions: describe(dimensions),
        groups: rows,
        total,
    }
}

/// Compute a grouped summary for the rows matching `query`.
pub async fn compute_summary(
    db: &Database,
    query: FactQuery,
    dimensions: &Dimensions,
) -> Result<SummaryReport> {
    let records = query.fetch(db).await?;
    let directory = load_directory(db).await?;
    Ok(summarize(&records, dimensions, &directory))
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelReport {
    pub channels: Vec<SummaryRow>,
    pub spend_mix: Vec<ChannelShare>,
    pub lead_mix: Vec<ChannelShare>,
    pub funnel: Funnel,
}

/// Per-channel totals, each channel's share of spend and leads, and the
/// overall funnel.
pub async fn compute_channel_report(db: &Database, query: FactQuery) -> Result<ChannelReport> {
    let records = query.fetch(db).await?;
    let groups = aggregate_by_period(&records, &Dimensions::channel());
    let spend_mix = channel_mix(&groups, Field::Spend);
    let lead_mix = channel_mix(&groups, Field::Leads);
    let funnel = Funnel::from_sums(&aggregate::total(&records).sums);
    let report = summarize(&records, &Dimensions::channel(), &EntityDirectory::default());
    Ok(ChannelReport {
        channels: report.groups,
        spend_mix,
        lead_mix,
        funnel,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedEntity {
    pub display_name: String,
    #[serde(flatten)]
    pub entry: RankingEntry,
}

/// Rank every clinic in the rows matching `query`.
pub async fn compute_ranking(
    db: &Database,
    query: FactQuery,
    weights: &ScoreWeights,
) -> Result<Vec<RankedEntity>> {
    let records = query.fetch(db).await?;
    let directory = load_directory(db).await?;
    let inputs = rank_inputs(&records);
    Ok(rank_entities(&inputs, weights)
        .into_iter()
        .map(|entry| RankedEntity {
            display_name: directory.display_name(&entry.input.entity_id).to_string(),
            entry,
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendReport {
    pub entity_id: Option<String>,
    pub display_name: Option<String>,
    pub comparison: PeriodComparison,
}

/// Latest period against the one before it, overall or per clinic.
pub async fn compute_trend(db: &Database, query: FactQuery, by_entity: bool) -> Result<Vec<TrendReport>> {
    let records = query.fetch(db).await?;
    if !by_entity {
        return Ok(compare_latest_periods(&records)
            .map(|comparison| TrendReport {
                entity_id: None,
                display_name: None,
                comparison,
            })
            .into_iter()
            .collect());
    }

    let directory = load_directory(db).await?;
    let mut reports = Vec::new();
    for (entity_id, members) in group(&records, |r| r.entity_id.clone()) {
        let owned: Vec<FactRecord> = members.into_iter().cloned().collect();
        if let Some(comparison) = compare_latest_periods(&owned) {
            reports.push(TrendReport {
                display_name: Some(directory.display_name(&entity_id).to_string()),
                entity_id: Some(entity_id),
                comparison,
            });
        }
    }
    Ok(reports)
}

/// Compare stored ratios on the rows matching `query` with re-derived ones.
pub async fn compute_quality(db: &Database, query: FactQuery, tolerance: f64) -> Result<QualityReport> {
    let records = query.fetch(db).await?;
    Ok(check_ratio_consistency(&records, tolerance))
}
