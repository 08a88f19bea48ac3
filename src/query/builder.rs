use chrono::NaiveDate;

use crate::error::{Error, Result};
use crate::metrics::types::{ChannelKey, FactRecord};
use crate::query::period::{Granularity, Period};
use crate::storage::repository::{fact_from_row, fact_select_columns};
use crate::storage::Database;

/// Builder for fact-row queries with optional filters.
///
/// Results are always ordered by period start, then clinic, then channel
/// (unsegmented rows first), then load order, so grouping downstream sees a
/// stable sequence.
#[derive(Debug, Clone, Default)]
pub struct FactQuery {
    entities: Vec<String>,
    channels: Vec<ChannelKey>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    granularity: Option<Granularity>,
    active_only: bool,
    limit: Option<u32>,
}

impl FactQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, entity_id: &str) -> Self {
        self.entities.push(entity_id.to_string());
        self
    }

    pub fn entities<S: AsRef<str>>(mut self, ids: &[S]) -> Self {
        self.entities.extend(ids.iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub fn channel(mut self, channel: ChannelKey) -> Self {
        self.channels.push(channel);
        self
    }

    /// Keep only rows on these named channels. Unsegmented rows are dropped
    /// unless [`ChannelKey::Unsegmented`] is also added with `channel`.
    pub fn channels<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.channels
            .extend(names.iter().map(|s| ChannelKey::Named(s.as_ref().to_string())));
        self
    }

    /// Only rows whose period starts on or after this date.
    pub fn start(mut self, date: NaiveDate) -> Self {
        self.start = Some(date);
        self
    }

    /// Only rows whose period starts on or before this date.
    pub fn end(mut self, date: NaiveDate) -> Self {
        self.end = Some(date);
        self
    }

    /// Restrict to periods starting inside `period`'s calendar range.
    pub fn within(mut self, period: &Period) -> Self {
        if let Some((start, end)) = period.date_range() {
            self.start = Some(start);
            self.end = Some(end);
        }
        self
    }

    pub fn granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    /// Skip clinics marked inactive in the directory. Clinics with no
    /// directory row are kept.
    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    /// Build and execute the query.
    pub async fn fetch(self, db: &Database) -> Result<Vec<FactRecord>> {
        let builder = self;
        let records = db
            .reader()
            .call(move |conn| {
                let (sql, params) = builder.build_sql();
                let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(param_refs.as_slice(), fact_from_row)?;
                rows.collect::<std::result::Result<Vec<FactRecord>, rusqlite::Error>>()
            })
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        log::debug!("fetched {} fact rows", records.len());
        Ok(records)
    }

    /// Build and execute the query, returning a count of matching rows.
    pub async fn count(self, db: &Database) -> Result<u64> {
        let builder = self;
        db.reader()
            .call(move |conn| {
                let (inner_sql, params) = builder.build_sql();
                let sql = format!("SELECT COUNT(*) FROM ({inner_sql})");
                let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                    params.iter().map(|p| p.as_ref()).collect();
                let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
                Ok::<u64, rusqlite::Error>(count as u64)
            })
            .await
            .map_err(|e| Error::Fetch(e.to_string()))
    }

    /// Build and execute the query, returning results as JSON.
    pub async fn to_json(self, db: &Database) -> Result<String> {
        let rows = self.fetch(db).await?;
        Ok(serde_json::to_string_pretty(&rows)?)
    }

    fn build_sql(&self) -> (String, Vec<Box<dyn rusqlite::types::ToSql>>) {
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut wheres = Vec::new();
        let mut param_idx = 1;

        let mut sql = format!("SELECT {} FROM fact_marketing f", fact_select_columns(Some("f")));

        if self.active_only {
            sql.push_str(" LEFT JOIN dim_companies c ON c.entity_id = f.entity_id");
            wheres.push("COALESCE(c.is_active, 1) = 1".to_string());
        }

        if !self.entities.is_empty() {
            let mut placeholders = Vec::with_capacity(self.entities.len());
            for id in &self.entities {
                placeholders.push(format!("?{param_idx}"));
                params.push(Box::new(id.clone()));
                param_idx += 1;
            }
            wheres.push(format!("f.entity_id IN ({})", placeholders.join(", ")));
        }

        if !self.channels.is_empty() {
            let mut clauses = Vec::new();
            let mut placeholders = Vec::new();
            for channel in &self.channels {
                match channel {
                    ChannelKey::Unsegmented => clauses.push("f.channel IS NULL".to_string()),
                    ChannelKey::Named(name) => {
                        placeholders.push(format!("?{param_idx}"));
                        params.push(Box::new(name.clone()));
                        param_idx += 1;
                    }
                }
            }
            if !placeholders.is_empty() {
                clauses.push(format!("f.channel IN ({})", placeholders.join(", ")));
            }
            wheres.push(format!("({})", clauses.join(" OR ")));
        }

        if let Some(g) = self.granularity {
            wheres.push(format!("f.granularity = ?{param_idx}"));
            params.push(Box::new(g.as_str()));
            param_idx += 1;
        }

        if let Some(date) = self.start {
            wheres.push(format!("f.period_start >= ?{param_idx}"));
            params.push(Box::new(date.format("%Y-%m-%d").to_string()));
            param_idx += 1;
        }
        if let Some(date) = self.end {
            wheres.push(format!("f.period_start <= ?{param_idx}"));
            params.push(Box::new(date.format("%Y-%m-%d").to_string()));
            param_idx += 1;
        }

        if !wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wheres.join(" AND "));
        }

        sql.push_str(
            " ORDER BY f.period_start, f.entity_id, f.channel IS NOT NULL, f.channel, f.id",
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT ?{param_idx}"));
            params.push(Box::new(limit));
        }

        (sql, params)
    }
}
