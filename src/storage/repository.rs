use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::metrics::types::{Company, FactRecord, Field};
use crate::query::period::Period;

// ── Companies ──────────────────────────────────────────────────────

pub fn upsert_company(
    conn: &Connection,
    entity_id: &str,
    display_name: &str,
    is_active: bool,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO dim_companies (entity_id, display_name, is_active, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(entity_id) DO UPDATE SET
            display_name = excluded.display_name,
            is_active = excluded.is_active,
            updated_at = datetime('now')",
        params![entity_id, display_name, is_active],
    )?;
    Ok(())
}

/// Register a clinic seen in fact data. Existing rows (with a curated
/// display name) are left untouched; new ones use the id as their name.
pub fn ensure_company(conn: &Connection, entity_id: &str) -> Result<bool, rusqlite::Error> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO dim_companies (entity_id, display_name) VALUES (?1, ?1)",
        params![entity_id],
    )?;
    Ok(inserted > 0)
}

pub fn list_companies(conn: &Connection, active_only: bool) -> Result<Vec<Company>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT entity_id, display_name, is_active FROM dim_companies
         WHERE (?1 = 0 OR is_active = 1)
         ORDER BY display_name COLLATE NOCASE, entity_id",
    )?;
    let rows = stmt.query_map(params![active_only], |row| {
        Ok(Company {
            entity_id: row.get(0)?,
            display_name: row.get(1)?,
            is_active: row.get(2)?,
        })
    })?;
    rows.collect()
}

/// Display names for every known clinic, loaded once per command.
#[derive(Debug, Clone, Default)]
pub struct EntityDirectory {
    names: HashMap<String, String>,
}

impl EntityDirectory {
    pub fn load(conn: &Connection) -> Result<Self, rusqlite::Error> {
        Ok(Self::from_companies(list_companies(conn, false)?))
    }

    pub fn from_companies(companies: impl IntoIterator<Item = Company>) -> Self {
        Self {
            names: companies
                .into_iter()
                .map(|c| (c.entity_id, c.display_name))
                .collect(),
        }
    }

    /// Display name, falling back to the id for unknown clinics.
    pub fn display_name<'a>(&'a self, entity_id: &'a str) -> &'a str {
        self.names.get(entity_id).map(String::as_str).unwrap_or(entity_id)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ── Facts ──────────────────────────────────────────────────────────

const FACT_VALUE_COLUMNS: &str = "impressions, visits, spend, leads, new_leads, returning_leads, \
     total_appointments, new_appointments, returning_appointments, total_conversations, \
     total_estimated_revenue, estimated_ltv_6m, total_roas, total_conversion";

/// Column list read by [`fact_from_row`], in order, qualified with `alias`
/// when one is given.
pub fn fact_select_columns(alias: Option<&str>) -> String {
    let columns = format!("entity_id, period_key, channel, {FACT_VALUE_COLUMNS}");
    match alias {
        Some(a) => columns
            .split(", ")
            .map(|c| format!("{a}.{c}"))
            .collect::<Vec<_>>()
            .join(", "),
        None => columns,
    }
}

pub fn insert_fact(
    conn: &Connection,
    record: &FactRecord,
    ingest_run_id: Option<i64>,
) -> Result<i64, rusqlite::Error> {
    let (start, end) = record.period.date_range().ok_or_else(|| {
        rusqlite::Error::ToSqlConversionFailure(
            format!("period {} has no calendar range", record.period).into(),
        )
    })?;
    conn.execute(
        &format!(
            "INSERT INTO fact_marketing (
                entity_id, granularity, period_key, period_start, period_end, channel,
                {FACT_VALUE_COLUMNS}, ingest_run_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                      ?17, ?18, ?19, ?20, ?21)"
        ),
        params![
            record.entity_id,
            record.period.granularity().as_str(),
            record.period.to_key(),
            start.format("%Y-%m-%d").to_string(),
            end.format("%Y-%m-%d").to_string(),
            record.channel,
            record.impressions,
            record.visits,
            record.spend,
            record.leads,
            record.new_leads,
            record.returning_leads,
            record.total_appointments,
            record.new_appointments,
            record.returning_appointments,
            record.total_conversations,
            record.total_estimated_revenue,
            record.estimated_ltv_6m,
            record.total_roas,
            record.total_conversion,
            ingest_run_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Remove every row for one clinic and period, across all channels.
pub fn delete_facts_for_period(
    conn: &Connection,
    entity_id: &str,
    period: &Period,
) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "DELETE FROM fact_marketing WHERE entity_id = ?1 AND period_key = ?2",
        params![entity_id, period.to_key()],
    )
}

/// Map a row selected with [`fact_select_columns`].
pub fn fact_from_row(row: &Row<'_>) -> Result<FactRecord, rusqlite::Error> {
    let entity_id: String = row.get(0)?;
    let period_key: String = row.get(1)?;
    let period = Period::parse(&period_key).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let channel: Option<String> = row.get(2)?;
    let mut record = FactRecord::new(entity_id, period, None);
    record.channel = channel;
    for (i, field) in Field::ALL.iter().enumerate() {
        record.set(*field, row.get(3 + i)?);
    }
    record.total_roas = row.get(3 + Field::ALL.len())?;
    record.total_conversion = row.get(4 + Field::ALL.len())?;
    Ok(record)
}

/// Row counts and period coverage for `status`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FactStats {
    pub rows: u64,
    pub entities: u64,
    pub channels: u64,
    pub first_period: Option<String>,
    pub last_period: Option<String>,
}

pub fn fact_stats(conn: &Connection, granularity: &str) -> Result<FactStats, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT entity_id), COUNT(DISTINCT channel),
                MIN(period_start), MAX(period_start)
         FROM fact_marketing WHERE granularity = ?1",
        params![granularity],
        |row| {
            Ok(FactStats {
                rows: row.get::<_, i64>(0)? as u64,
                entities: row.get::<_, i64>(1)? as u64,
                channels: row.get::<_, i64>(2)? as u64,
                first_period: row.get(3)?,
                last_period: row.get(4)?,
            })
        },
    )
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Ingest Runs ────────────────────────────────────────────────────

pub fn insert_ingest_run(
    conn: &Connection,
    source: &str,
    granularity: &str,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO ingest_runs (source, granularity, status, started_at)
         VALUES (?1, ?2, 'running', datetime('now'))",
        params![source, granularity],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_ingest_run(
    conn: &Connection,
    run_id: i64,
    status: &str,
    rows_read: u64,
    rows_loaded: u64,
    rows_rejected: u64,
    error_message: Option<&str>,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE ingest_runs SET
            status = ?2, completed_at = datetime('now'),
            rows_read = ?3, rows_loaded = ?4, rows_rejected = ?5,
            error_message = ?6
         WHERE id = ?1",
        params![
            run_id,
            status,
            rows_read as i64,
            rows_loaded as i64,
            rows_rejected as i64,
            error_message,
        ],
    )?;
    Ok(())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestRun {
    pub id: i64,
    pub source: String,
    pub granularity: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub rows_read: u64,
    pub rows_loaded: u64,
    pub rows_rejected: u64,
    pub error_message: Option<String>,
}

/// Most recent runs first.
pub fn list_ingest_runs(conn: &Connection, limit: u32) -> Result<Vec<IngestRun>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, source, granularity, status, started_at, completed_at,
                rows_read, rows_loaded, rows_rejected, error_message
         FROM ingest_runs ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(IngestRun {
            id: row.get(0)?,
            source: row.get(1)?,
            granularity: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            rows_read: row.get::<_, i64>(6)? as u64,
            rows_loaded: row.get::<_, i64>(7)? as u64,
            rows_rejected: row.get::<_, i64>(8)? as u64,
            error_message: row.get(9)?,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[tokio::test]
    async fn test_config_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                set_config(conn, "score_weights", "[]")?;
                set_config(conn, "quality_tolerance", "0.01")?;
                set_config(conn, "score_weights", "[1]")?;

                assert_eq!(get_config(conn, "score_weights")?, Some("[1]".to_string()));
                assert_eq!(get_config(conn, "missing")?, None);

                let all = list_config(conn)?;
                assert_eq!(
                    all,
                    vec![
                        ("quality_tolerance".to_string(), "0.01".to_string()),
                        ("score_weights".to_string(), "[1]".to_string()),
                    ]
                );
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ensure_company_does_not_clobber_display_name() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_company(conn, "c-1", "Bright Smiles", true)?;
                assert!(!ensure_company(conn, "c-1")?);
                assert!(ensure_company(conn, "c-2")?);

                let dir = EntityDirectory::load(conn)?;
                assert_eq!(dir.len(), 2);
                assert_eq!(dir.display_name("c-1"), "Bright Smiles");
                assert_eq!(dir.display_name("c-2"), "c-2");
                assert_eq!(dir.display_name("unknown"), "unknown");
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_companies_active_only() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                upsert_company(conn, "b", "beta", true)?;
                upsert_company(conn, "a", "Alpha", true)?;
                upsert_company(conn, "z", "Closed", false)?;

                let all = list_companies(conn, false)?;
                let names: Vec<_> = all.iter().map(|c| c.display_name.as_str()).collect();
                assert_eq!(names, vec!["Alpha", "beta", "Closed"]);

                let active = list_companies(conn, true)?;
                assert_eq!(active.len(), 2);
                assert!(active.iter().all(|c| c.is_active));
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fact_insert_and_read_back() {
        let db = Database::open_memory().await.unwrap();

        let mut record = FactRecord::new("c-1", Period::Week(2024, 7), Some(""))
            .with(Field::Spend, 12.5)
            .with(Field::Leads, 3.0);
        record.total_roas = Some(1.5);
        let expected = record.clone();

        let back = db
            .writer()
            .call(move |conn| {
                insert_fact(conn, &record, None)?;
                let sql = format!("SELECT {} FROM fact_marketing", fact_select_columns(None));
                conn.query_row(&sql, [], fact_from_row)
            })
            .await
            .unwrap();

        assert_eq!(back, expected);
        assert_eq!(back.channel.as_deref(), Some(""));
        assert_eq!(back.visits, None);
    }

    #[tokio::test]
    async fn test_delete_facts_for_period() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let jan = Period::Month(2024, 1);
                insert_fact(conn, &FactRecord::new("a", jan, Some("seo")), None)?;
                insert_fact(conn, &FactRecord::new("a", jan, None), None)?;
                insert_fact(conn, &FactRecord::new("a", Period::Month(2024, 2), None), None)?;
                insert_fact(conn, &FactRecord::new("b", jan, None), None)?;

                assert_eq!(delete_facts_for_period(conn, "a", &jan)?, 2);
                let stats = fact_stats(conn, "month")?;
                assert_eq!(stats.rows, 2);
                assert_eq!(stats.entities, 2);
                assert_eq!(stats.first_period.as_deref(), Some("2024-01-01"));
                assert_eq!(stats.last_period.as_deref(), Some("2024-02-01"));
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_ingest_run_lifecycle() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let first = insert_ingest_run(conn, "jan.csv", "month")?;
                update_ingest_run(conn, first, "success", 10, 10, 0, None)?;
                let second = insert_ingest_run(conn, "feb.csv", "month")?;
                update_ingest_run(conn, second, "partial_failure", 5, 4, 1, Some("row 3: bad period"))?;

                let runs = list_ingest_runs(conn, 10)?;
                assert_eq!(runs.len(), 2);
                assert_eq!(runs[0].source, "feb.csv");
                assert_eq!(runs[0].rows_rejected, 1);
                assert_eq!(runs[0].error_message.as_deref(), Some("row 3: bad period"));
                assert!(runs[1].completed_at.is_some());
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }
}
