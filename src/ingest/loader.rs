use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::date_util::parse_date_key;
use crate::error::{Error, Result};
use crate::ingest::{IngestOptions, IngestProgress, IngestReport};
use crate::metrics::types::{FactRecord, Field};
use crate::query::period::{Granularity, Period};
use crate::storage::repository;
use crate::storage::Database;

/// Rejection messages kept in the run log.
const MAX_LOGGED_REJECTIONS: usize = 5;

/// One CSV row as exported by the reporting ETL. Header names follow the
/// monthly and weekly report tables; unknown columns are ignored.
#[derive(Debug, Deserialize)]
struct CsvFactRow {
    #[serde(alias = "clinic", alias = "company_id")]
    entity_id: String,
    #[serde(default, alias = "month", alias = "week")]
    period: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    week_number: Option<u8>,
    #[serde(default)]
    week_start_date: Option<String>,
    /// An empty cell is an unsegmented row.
    #[serde(default, alias = "traffic_source")]
    channel: Option<String>,
    #[serde(default)]
    impressions: Option<f64>,
    #[serde(default)]
    visits: Option<f64>,
    #[serde(default)]
    spend: Option<f64>,
    #[serde(default)]
    leads: Option<f64>,
    #[serde(default)]
    new_leads: Option<f64>,
    #[serde(default)]
    returning_leads: Option<f64>,
    #[serde(default)]
    total_appointments: Option<f64>,
    #[serde(default)]
    new_appointments: Option<f64>,
    #[serde(default)]
    returning_appointments: Option<f64>,
    #[serde(default)]
    total_conversations: Option<f64>,
    #[serde(default)]
    total_estimated_revenue: Option<f64>,
    #[serde(default)]
    estimated_ltv_6m: Option<f64>,
    #[serde(default)]
    total_roas: Option<f64>,
    #[serde(default)]
    total_conversion: Option<f64>,
}

impl CsvFactRow {
    fn period(&self, granularity: Granularity) -> std::result::Result<Period, String> {
        if let (Some(year), Some(week)) = (self.year, self.week_number) {
            if granularity != Granularity::Week {
                return Err(format!("week {year}-W{week:02} in a {granularity} file"));
            }
            return Period::week(year, week).map_err(|e| e.to_string());
        }
        fn present(s: &Option<String>) -> Option<&str> {
            s.as_deref().filter(|s| !s.trim().is_empty())
        }
        let raw = present(&self.period)
            .or_else(|| present(&self.week_start_date))
            .ok_or_else(|| "missing period".to_string())?;

        // Full dates are snapped to the file's grain
        if raw.trim().len() >= 10 {
            if let Some(date) = parse_date_key(raw) {
                return Ok(Period::from_date(date, granularity));
            }
        }
        let period = Period::parse(raw).map_err(|e| e.to_string())?;
        if period.granularity() != granularity {
            return Err(format!("period {period} is not a {granularity} period"));
        }
        Ok(period)
    }

    fn into_record(self, granularity: Granularity) -> std::result::Result<FactRecord, String> {
        let entity_id = self.entity_id.trim().to_string();
        if entity_id.is_empty() {
            return Err("missing clinic id".to_string());
        }
        let period = self.period(granularity)?;
        let channel = self.channel.as_deref().map(str::trim).filter(|c| !c.is_empty());
        let mut record = FactRecord::new(entity_id, period, channel);
        let values = [
            (Field::Impressions, self.impressions),
            (Field::Visits, self.visits),
            (Field::Spend, self.spend),
            (Field::Leads, self.leads),
            (Field::NewLeads, self.new_leads),
            (Field::ReturningLeads, self.returning_leads),
            (Field::TotalAppointments, self.total_appointments),
            (Field::NewAppointments, self.new_appointments),
            (Field::ReturningAppointments, self.returning_appointments),
            (Field::TotalConversations, self.total_conversations),
            (Field::TotalEstimatedRevenue, self.total_estimated_revenue),
            (Field::EstimatedLtv6m, self.estimated_ltv_6m),
        ];
        for (field, value) in values {
            record.set(field, value);
        }
        record.total_roas = self.total_roas;
        record.total_conversion = self.total_conversion;
        Ok(record)
    }
}

/// A data row that could not be turned into a fact record.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRejection {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedCsv {
    pub records: Vec<FactRecord>,
    pub rejections: Vec<RowRejection>,
}

impl ParsedCsv {
    pub fn rows_read(&self) -> u64 {
        (self.records.len() + self.rejections.len()) as u64
    }
}

/// Parse fact rows from CSV. Bad rows are collected as rejections; only an
/// unreadable header fails the whole parse.
pub fn parse_csv<R: Read>(reader: R, granularity: Granularity) -> Result<ParsedCsv> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = rdr.headers()?.clone();

    let mut parsed = ParsedCsv::default();
    for result in rdr.records() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                parsed.rejections.push(RowRejection { line, message: e.to_string() });
                continue;
            }
        };
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let outcome = row
            .deserialize::<CsvFactRow>(Some(&headers))
            .map_err(|e| e.to_string())
            .and_then(|r| r.into_record(granularity));
        match outcome {
            Ok(record) => parsed.records.push(record),
            Err(message) => parsed.rejections.push(RowRejection { line, message }),
        }
    }
    Ok(parsed)
}

/// Open and parse a CSV file on the blocking pool.
async fn read_csv_file(path: PathBuf, granularity: Granularity) -> Result<ParsedCsv> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path)?;
        parse_csv(file, granularity)
    })
    .await
    .map_err(|e| Error::Other(format!("csv reader task failed: {e}")))?
}

/// Load a CSV file of fact rows into the warehouse and log the run.
pub async fn ingest_csv(
    db: &Database,
    path: &Path,
    options: &IngestOptions,
    progress: &dyn IngestProgress,
) -> Result<IngestReport> {
    let source = path.display().to_string();
    progress.on_file_start(&source);

    let parsed = read_csv_file(path.to_path_buf(), options.granularity).await;
    let parsed = match parsed {
        Ok(p) => p,
        Err(e) => {
            let message = e.to_string();
            log::error!("ingest of {source} failed: {message}");
            record_failed_run(db, &source, options.granularity, &message).await?;
            return Err(Error::Ingest { source_name: source, message });
        }
    };

    for rejection in &parsed.rejections {
        log::warn!("{source}:{}: {}", rejection.line, rejection.message);
        progress.on_row_rejected(&source, rejection.line, &rejection.message);
    }
    progress.on_rows_parsed(&source, parsed.records.len(), parsed.rejections.len());

    let report = load_records(db, &source, options, parsed).await?;
    log::info!(
        "ingested {}: {} loaded, {} rejected, {} replaced",
        source,
        report.rows_loaded,
        report.rows_rejected,
        report.rows_replaced
    );
    progress.on_complete(&report);
    Ok(report)
}

/// Write parsed rows in one transaction together with their run-log entry.
pub async fn load_records(
    db: &Database,
    source: &str,
    options: &IngestOptions,
    parsed: ParsedCsv,
) -> Result<IngestReport> {
    let source = source.to_string();
    let granularity = options.granularity;
    let replace = options.replace;

    let report = db
        .writer()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let run_id = repository::insert_ingest_run(&tx, &source, granularity.as_str())?;

            let mut rows_replaced = 0u64;
            if replace {
                let keys: BTreeSet<(&str, Period)> = parsed
                    .records
                    .iter()
                    .map(|r| (r.entity_id.as_str(), r.period))
                    .collect();
                for (entity_id, period) in keys {
                    rows_replaced += repository::delete_facts_for_period(&tx, entity_id, &period)? as u64;
                }
            }

            let entities: BTreeSet<&str> = parsed.records.iter().map(|r| r.entity_id.as_str()).collect();
            let mut new_companies = 0u64;
            for entity_id in entities {
                if repository::ensure_company(&tx, entity_id)? {
                    new_companies += 1;
                }
            }

            for record in &parsed.records {
                repository::insert_fact(&tx, record, Some(run_id))?;
            }

            let mut report = IngestReport::from_counts(
                source,
                parsed.rows_read(),
                parsed.records.len() as u64,
                parsed.rejections.len() as u64,
            );
            report.run_id = Some(run_id);
            report.rows_replaced = rows_replaced;
            report.new_companies = new_companies;

            let detail: Vec<String> = parsed
                .rejections
                .iter()
                .take(MAX_LOGGED_REJECTIONS)
                .map(|r| format!("line {}: {}", r.line, r.message))
                .collect();
            let error_message = report
                .error
                .as_ref()
                .map(|summary| format!("{summary}; {}", detail.join("; ")));
            repository::update_ingest_run(
                &tx,
                run_id,
                report.status.as_str(),
                report.rows_read,
                report.rows_loaded,
                report.rows_rejected,
                error_message.as_deref(),
            )?;

            tx.commit()?;
            Ok::<IngestReport, rusqlite::Error>(report)
        })
        .await?;
    Ok(report)
}

async fn record_failed_run(
    db: &Database,
    source: &str,
    granularity: Granularity,
    message: &str,
) -> Result<()> {
    let source = source.to_string();
    let message = message.to_string();
    db.writer()
        .call(move |conn| {
            let run_id = repository::insert_ingest_run(conn, &source, granularity.as_str())?;
            repository::update_ingest_run(conn, run_id, "failed", 0, 0, 0, Some(&message))
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{IngestStatus, NoopProgress};
    use crate::query::builder::FactQuery;
    use std::io::Write;

    const MONTHLY: &str = "\
clinic,month,traffic_source,spend,leads,visits,total_estimated_revenue,total_roas,sync_timestamp
A,2024-01-01,google ads,100,10,200,500,5,2024-02-01
A,2024-01-01,,50,5,,100,,2024-02-01
B,2024-02,facebook,\"1,000\",3,10,0,,2024-03-01
,2024-02,seo,1,1,1,1,,2024-03-01
C,2024-W05,seo,1,1,1,1,,2024-03-01
";

    #[test]
    fn test_parse_monthly_rows() {
        let parsed = parse_csv(MONTHLY.as_bytes(), Granularity::Month).unwrap();
        assert_eq!(parsed.rows_read(), 5);
        assert_eq!(parsed.records.len(), 2);

        let first = &parsed.records[0];
        assert_eq!(first.entity_id, "A");
        assert_eq!(first.period, Period::Month(2024, 1));
        assert_eq!(first.channel.as_deref(), Some("google ads"));
        assert_eq!(first.spend, Some(100.0));
        assert_eq!(first.total_roas, Some(5.0));

        let second = &parsed.records[1];
        assert_eq!(second.channel, None);
        assert_eq!(second.visits, None);

        // "1,000" is not a number, the blank clinic and the week are rejected
        let lines: Vec<u64> = parsed.rejections.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![4, 5, 6]);
        assert!(parsed.rejections[2].message.contains("not a month period"));
    }

    #[test]
    fn test_parse_weekly_year_and_week_number() {
        let data = "\
clinic,week,year,week_number,week_start_date,traffic_source,leads
A,2024-W05,2024,5,2024-01-29,seo,4
A,,,,2024-02-07,seo,2
A,,2024,54,,seo,1
";
        let parsed = parse_csv(data.as_bytes(), Granularity::Week).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].period, Period::Week(2024, 5));
        assert_eq!(parsed.records[1].period, Period::Week(2024, 6));
        assert_eq!(parsed.rejections.len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_csv_logs_run_and_loads_rows() {
        let db = Database::open_memory().await.unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MONTHLY.as_bytes()).unwrap();

        let report = ingest_csv(&db, file.path(), &IngestOptions::default(), &NoopProgress)
            .await
            .unwrap();
        assert_eq!(report.status, IngestStatus::PartialFailure);
        assert_eq!(report.rows_loaded, 2);
        assert_eq!(report.rows_rejected, 3);
        assert_eq!(report.new_companies, 1);

        let rows = FactQuery::new().fetch(&db).await.unwrap();
        assert_eq!(rows.len(), 2);

        let runs = db
            .reader()
            .call(|conn| repository::list_ingest_runs(conn, 5))
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "partial_failure");
        assert!(runs[0].error_message.as_deref().unwrap().contains("line 4"));
    }

    #[tokio::test]
    async fn test_reingest_replaces_by_default() {
        let db = Database::open_memory().await.unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MONTHLY.as_bytes()).unwrap();

        let options = IngestOptions::default();
        ingest_csv(&db, file.path(), &options, &NoopProgress).await.unwrap();
        let second = ingest_csv(&db, file.path(), &options, &NoopProgress).await.unwrap();
        assert_eq!(second.rows_replaced, 2);
        assert_eq!(second.new_companies, 0);
        assert_eq!(FactQuery::new().count(&db).await.unwrap(), 2);

        let append = IngestOptions { replace: false, ..IngestOptions::default() };
        ingest_csv(&db, file.path(), &append, &NoopProgress).await.unwrap();
        assert_eq!(FactQuery::new().count(&db).await.unwrap(), 4);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_file_read_on_current_thread_runtime() {
        let db = Database::open_memory().await.unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MONTHLY.as_bytes()).unwrap();

        let parsed = read_csv_file(file.path().to_path_buf(), Granularity::Month)
            .await
            .unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.rejections.len(), 3);

        let options = IngestOptions::default();
        let (a, b) = tokio::join!(
            ingest_csv(&db, file.path(), &options, &NoopProgress),
            FactQuery::new().count(&db),
        );
        assert_eq!(a.unwrap().rows_loaded, 2);
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_is_logged_as_failed() {
        let db = Database::open_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.csv");

        let err = ingest_csv(&db, &path, &IngestOptions::default(), &NoopProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ingest { .. }));

        let runs = db
            .reader()
            .call(|conn| repository::list_ingest_runs(conn, 5))
            .await
            .unwrap();
        assert_eq!(runs[0].status, "failed");
    }
}
