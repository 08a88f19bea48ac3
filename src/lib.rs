pub mod date_util;
pub mod error;
pub mod export;
pub mod ingest;
pub mod metrics;
pub mod query;
pub mod storage;

pub use error::{Error, Result};
pub use export::{to_csv, Column, ColumnFormat};
pub use ingest::{IngestOptions, IngestProgress, IngestReport, IngestStatus, NoopProgress};
pub use metrics::quality::QualityReport;
pub use metrics::ranking::{RankInput, ScoreTerm};
pub use metrics::{
    ChannelKey, ChannelReport, Company, Dimensions, FactRecord, Field, RankedEntity,
    ScoreWeights, SummaryReport, SummaryRow, TrendReport,
};
pub use query::builder::FactQuery;
pub use query::period::{Granularity, Period};
pub use storage::Database;

// Re-export repository types needed by the binary crate, but not the module itself
pub use storage::repository::{FactStats, IngestRun};

use std::path::Path;

use storage::repository;

/// `app_config` key holding a JSON list of score terms.
pub const SCORE_WEIGHTS_KEY: &str = "score_weights";
/// `app_config` key holding the ratio-consistency tolerance.
pub const QUALITY_TOLERANCE_KEY: &str = "quality_tolerance";
/// Tolerance used when `quality_tolerance` is unset.
pub const DEFAULT_QUALITY_TOLERANCE: f64 = 0.01;

/// Main entry point for the marketing data warehouse.
pub struct MarketDW {
    db: Database,
}

impl MarketDW {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    // ── Reports ────────────────────────────────────────────────────

    pub async fn fetch(&self, query: FactQuery) -> Result<Vec<FactRecord>> {
        query.fetch(&self.db).await
    }

    pub async fn summary(&self, query: FactQuery, dimensions: &Dimensions) -> Result<SummaryReport> {
        metrics::compute_summary(&self.db, query, dimensions).await
    }

    pub async fn channels(&self, query: FactQuery) -> Result<ChannelReport> {
        metrics::compute_channel_report(&self.db, query).await
    }

    /// Rank clinics with the configured score weights.
    pub async fn rank(&self, query: FactQuery) -> Result<Vec<RankedEntity>> {
        let weights = self.score_weights().await?;
        metrics::compute_ranking(&self.db, query, &weights).await
    }

    pub async fn trend(&self, query: FactQuery, by_entity: bool) -> Result<Vec<TrendReport>> {
        metrics::compute_trend(&self.db, query, by_entity).await
    }

    /// Check stored ratios. `tolerance` overrides the configured one.
    pub async fn quality(&self, query: FactQuery, tolerance: Option<f64>) -> Result<QualityReport> {
        let tolerance = match tolerance {
            Some(t) => t,
            None => self.quality_tolerance().await?,
        };
        if tolerance.is_nan() || tolerance < 0.0 {
            return Err(Error::Config(format!("tolerance must be >= 0, got {tolerance}")));
        }
        metrics::compute_quality(&self.db, query, tolerance).await
    }

    /// Summary rows as CSV, one column per sum and derived ratio.
    pub async fn export(&self, query: FactQuery, dimensions: &Dimensions) -> Result<String> {
        let report = self.summary(query, dimensions).await?;
        to_csv(&report.groups, &summary_columns(dimensions))
    }

    /// Score weights from `app_config`, or the defaults when unset.
    pub async fn score_weights(&self) -> Result<ScoreWeights> {
        match self.config_get(SCORE_WEIGHTS_KEY).await? {
            Some(json) => ScoreWeights::from_json(&json),
            None => Ok(ScoreWeights::default()),
        }
    }

    async fn quality_tolerance(&self) -> Result<f64> {
        match self.config_get(QUALITY_TOLERANCE_KEY).await? {
            Some(raw) => raw.trim().parse::<f64>().map_err(|_| {
                Error::Config(format!("{QUALITY_TOLERANCE_KEY} is not a number: {raw}"))
            }),
            None => Ok(DEFAULT_QUALITY_TOLERANCE),
        }
    }

    // ── Ingest ─────────────────────────────────────────────────────

    pub async fn ingest(
        &self,
        path: &Path,
        options: &IngestOptions,
        progress: &dyn IngestProgress,
    ) -> Result<IngestReport> {
        ingest::loader::ingest_csv(&self.db, path, options, progress).await
    }

    pub async fn ingest_log(&self, limit: u32) -> Result<Vec<IngestRun>> {
        self.db
            .reader()
            .call(move |conn| repository::list_ingest_runs(conn, limit))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn status(&self, granularity: Granularity) -> Result<FactStats> {
        self.db
            .reader()
            .call(move |conn| repository::fact_stats(conn, granularity.as_str()))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ── Companies ──────────────────────────────────────────────────

    pub async fn company_add(&self, entity_id: &str, display_name: &str, is_active: bool) -> Result<()> {
        if entity_id.trim().is_empty() {
            return Err(Error::Config("company id must not be empty".into()));
        }
        self.db
            .writer()
            .call({
                let entity_id = entity_id.trim().to_string();
                let display_name = display_name.to_string();
                move |conn| repository::upsert_company(conn, &entity_id, &display_name, is_active)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn company_list(&self, active_only: bool) -> Result<Vec<Company>> {
        self.db
            .reader()
            .call(move |conn| repository::list_companies(conn, active_only))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Set a config value. Known keys are validated before they are stored.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        match key {
            SCORE_WEIGHTS_KEY => {
                ScoreWeights::from_json(value)?;
            }
            QUALITY_TOLERANCE_KEY => {
                let ok = value.trim().parse::<f64>().map(|t| t >= 0.0).unwrap_or(false);
                if !ok {
                    return Err(Error::Config(format!(
                        "{QUALITY_TOLERANCE_KEY} must be a non-negative number, got {value}"
                    )));
                }
            }
            _ => {}
        }
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}

/// Export columns for a summary grouped by `dimensions`.
pub fn summary_columns(dimensions: &Dimensions) -> Vec<Column> {
    let mut columns = Vec::new();
    if dimensions.entity {
        columns.push(Column::new("key.entity_id", "Clinic ID"));
        columns.push(Column::new("display_name", "Clinic"));
    }
    if dimensions.period {
        columns.push(Column::new("key.period", "Period"));
    }
    if dimensions.channel {
        columns.push(Column::new("key.channel", "Channel"));
    }
    columns.push(Column::new("member_count", "Rows").format(ColumnFormat::Number));
    for field in Field::ALL {
        let format = if field.is_currency() {
            ColumnFormat::Currency
        } else {
            ColumnFormat::Number
        };
        columns.push(Column::new(&format!("sums.{}", field.as_str()), field.label()).format(format));
    }
    for metric in metrics::RatioMetric::ALL {
        let format = if metric.is_rate() {
            ColumnFormat::Percent
        } else if metric.lower_is_better() {
            ColumnFormat::Currency
        } else {
            ColumnFormat::Number
        };
        columns.push(Column::new(&format!("metrics.{}", metric.as_str()), metric.label()).format(format));
    }
    columns
}
