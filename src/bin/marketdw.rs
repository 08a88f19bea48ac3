use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use marketdw::export::format::{
    format_currency, format_delta, format_number, format_percent, format_ratio,
};
use marketdw::metrics::delta::Headline;
use marketdw::metrics::RatioMetric;
use marketdw::{
    ChannelKey, Dimensions, FactQuery, Granularity, IngestOptions, IngestReport, IngestStatus, MarketDW,
    Period, SummaryRow,
};

#[derive(Parser)]
#[command(name = "marketdw", about = "Marketing analytics warehouse CLI")]
struct Cli {
    /// Database path (default: ~/.marketdw/marketdw.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl marketdw::IngestProgress for StderrProgress {
    fn on_file_start(&self, source: &str) {
        eprintln!("Ingesting {source}...");
    }

    fn on_row_rejected(&self, _source: &str, line: u64, message: &str) {
        eprintln!("  line {line}: {message}");
    }

    fn on_rows_parsed(&self, _source: &str, accepted: usize, rejected: usize) {
        eprintln!("  Parsed {accepted} rows ({rejected} rejected)");
    }

    fn on_complete(&self, report: &IngestReport) {
        eprintln!("  Done: {} rows loaded", report.rows_loaded);
    }
}

/// Row filters shared by every report command.
#[derive(Args, Clone)]
struct Filters {
    /// Clinic id (repeatable)
    #[arg(long = "entity", value_name = "ID")]
    entities: Vec<String>,
    /// Channel name (repeatable). Rows without a channel are dropped unless
    /// `unsegmented` is also given
    #[arg(long = "channel", value_name = "NAME")]
    channels: Vec<String>,
    /// Restrict to one period (e.g. 2024-03, 2024-W05, 2024-Q1, 2024)
    #[arg(long)]
    period: Option<String>,
    /// Periods starting on or after this date (YYYY-MM-DD)
    #[arg(long)]
    start: Option<String>,
    /// Periods starting on or before this date (YYYY-MM-DD)
    #[arg(long)]
    end: Option<String>,
    /// Grain of the fact rows to read: month or week
    #[arg(long, default_value = "month")]
    granularity: String,
    /// Skip clinics marked inactive
    #[arg(long)]
    active_only: bool,
}

impl Filters {
    fn to_query(&self) -> anyhow::Result<FactQuery> {
        let granularity: Granularity = self.granularity.parse()?;
        let mut query = FactQuery::new()
            .granularity(granularity)
            .entities(&self.entities);
        for name in &self.channels {
            query = query.channel(ChannelKey::from_label(name));
        }
        if let Some(p) = &self.period {
            query = query.within(&Period::parse(p)?);
        }
        if let Some(d) = parse_date(self.start.as_deref())? {
            query = query.start(d);
        }
        if let Some(d) = parse_date(self.end.as_deref())? {
            query = query.end(d);
        }
        if self.active_only {
            query = query.active_only();
        }
        Ok(query)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show warehouse status
    Status,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Manage the clinic directory
    Company {
        #[command(subcommand)]
        action: CompanyAction,
    },
    /// Load a CSV file of fact rows
    Ingest {
        /// Path to the CSV file
        path: PathBuf,
        /// Grain of the periods in the file: month or week
        #[arg(long, default_value = "month")]
        granularity: String,
        /// Keep existing rows for the same clinic and period
        #[arg(long)]
        append: bool,
    },
    /// Show recent ingest runs
    IngestLog {
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Grouped totals with derived ratios
    Summary {
        #[command(flatten)]
        filters: Filters,
        /// Comma-separated dimensions: entity, period, channel
        #[arg(long, default_value = "entity")]
        by: String,
        /// Roll periods up to this grain: month, quarter or year
        #[arg(long)]
        rollup: Option<String>,
    },
    /// Channel totals, spend and lead mix, and the funnel
    Channels {
        #[command(flatten)]
        filters: Filters,
    },
    /// Rank clinics by weighted score
    Rank {
        #[command(flatten)]
        filters: Filters,
    },
    /// Compare the latest period with the one before it
    Trend {
        #[command(flatten)]
        filters: Filters,
        /// One comparison per clinic
        #[arg(long)]
        by_entity: bool,
    },
    /// Check stored ratios against ratios derived from the fields
    Quality {
        #[command(flatten)]
        filters: Filters,
        /// Absolute tolerance (default: config quality_tolerance or 0.01)
        #[arg(long)]
        tolerance: Option<f64>,
    },
    /// Export a summary as CSV
    Export {
        #[command(flatten)]
        filters: Filters,
        #[arg(long, default_value = "entity")]
        by: String,
        #[arg(long)]
        rollup: Option<String>,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[derive(Subcommand)]
enum CompanyAction {
    /// Add or rename a clinic
    Add {
        id: String,
        name: String,
        /// Mark the clinic inactive
        #[arg(long)]
        inactive: bool,
    },
    /// List clinics
    List {
        #[arg(long)]
        active_only: bool,
    },
}

fn parse_date(s: Option<&str>) -> anyhow::Result<Option<chrono::NaiveDate>> {
    match s {
        Some(s) => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid date '{s}': {e}")),
        None => Ok(None),
    }
}

fn parse_dimensions(by: &str, rollup: Option<&str>) -> anyhow::Result<Dimensions> {
    let mut dims: Dimensions = by.parse()?;
    if let Some(g) = rollup {
        dims = dims.with_rollup(g.parse()?);
        dims.period = true;
    }
    Ok(dims)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db = match &cli.db {
        Some(path) => marketdw::Database::open_at(path).await?,
        None => marketdw::Database::open().await?,
    };
    let dw = MarketDW::new(db);
    let json = cli.json;

    match cli.command {
        Commands::Status => {
            print_status(&dw, json).await?;
        }
        Commands::Config { action } => {
            handle_config(&dw, action).await?;
        }
        Commands::Company { action } => {
            handle_company(&dw, action, json).await?;
        }
        Commands::Ingest {
            path,
            granularity,
            append,
        } => {
            let options = IngestOptions {
                granularity: granularity.parse()?,
                replace: !append,
            };
            let report = dw.ingest(&path, &options, &StderrProgress).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_ingest_report(&report);
            }
            if report.status == IngestStatus::Failed {
                anyhow::bail!("no rows loaded from {}", report.source);
            }
        }
        Commands::IngestLog { limit } => {
            handle_ingest_log(&dw, limit, json).await?;
        }
        Commands::Summary { filters, by, rollup } => {
            let dims = parse_dimensions(&by, rollup.as_deref())?;
            let report = dw.summary(filters.to_query()?, &dims).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.groups.is_empty() {
                println!("No fact rows found.");
            } else {
                println!("Summary by {}", report.dimensions);
                for row in &report.groups {
                    print_summary_row(row);
                }
                println!();
                print_summary_row(&report.total);
            }
        }
        Commands::Channels { filters } => {
            handle_channels(&dw, filters, json).await?;
        }
        Commands::Rank { filters } => {
            let ranked = dw.rank(filters.to_query()?).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ranked)?);
            } else if ranked.is_empty() {
                println!("No clinics to rank.");
            } else {
                for r in &ranked {
                    let input = &r.entry.input;
                    println!(
                        "{:>3}. {} ({:.4}) leads/period {} | conv {} | ROAS {} | appts/period {}",
                        r.entry.rank,
                        r.display_name,
                        r.entry.score,
                        format_number(input.leads_per_period),
                        format_percent(input.conversion_rate, 2),
                        format_ratio(input.roas),
                        format_number(input.appointments_per_period),
                    );
                }
            }
        }
        Commands::Trend { filters, by_entity } => {
            handle_trend(&dw, filters, by_entity, json).await?;
        }
        Commands::Quality { filters, tolerance } => {
            let report = dw.quality(filters.to_query()?, tolerance).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Checked {} rows (tolerance {})",
                    report.rows_checked, report.tolerance
                );
                println!(
                    "  ROAS:       stored (spend-weighted) {} | derived {}",
                    format_ratio(report.stored_roas_weighted),
                    format_ratio(report.derived_roas)
                );
                println!(
                    "  Conversion: stored (visit-weighted) {} | derived {}",
                    format_percent(report.stored_conversion_weighted, 2),
                    format_percent(report.derived_conversion, 2)
                );
                if report.is_clean() {
                    println!("  No mismatches.");
                } else {
                    println!("  {} mismatches:", report.mismatches.len());
                    for m in &report.mismatches {
                        println!(
                            "    {} {} {}: {} stored {} vs derived {}",
                            m.entity_id,
                            m.period,
                            m.channel.as_deref().unwrap_or("(unsegmented)"),
                            m.metric.as_str(),
                            format_number(Some(m.stored)),
                            format_number(m.derived),
                        );
                    }
                }
            }
        }
        Commands::Export {
            filters,
            by,
            rollup,
            output,
        } => {
            let dims = parse_dimensions(&by, rollup.as_deref())?;
            let csv = dw.export(filters.to_query()?, &dims).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, csv)?;
                    eprintln!("Wrote {}", path.display());
                }
                None => print!("{csv}"),
            }
        }
    }

    Ok(())
}

async fn print_status(dw: &MarketDW, json: bool) -> anyhow::Result<()> {
    let monthly = dw.status(Granularity::Month).await?;
    let weekly = dw.status(Granularity::Week).await?;
    let companies = dw.company_list(false).await?;
    let last_run = dw.ingest_log(1).await?.into_iter().next();

    if json {
        let value = serde_json::json!({
            "month": monthly,
            "week": weekly,
            "companies": companies.len(),
            "last_ingest": last_run,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Warehouse Status");
    for (name, stats) in [("Monthly", &monthly), ("Weekly", &weekly)] {
        println!(
            "  {name:<9} {} rows, {} clinics, {} channels ({} to {})",
            stats.rows,
            stats.entities,
            stats.channels,
            stats.first_period.as_deref().unwrap_or("-"),
            stats.last_period.as_deref().unwrap_or("-"),
        );
    }
    println!("  Clinics:  {}", companies.len());
    println!(
        "  Last ingest: {}",
        last_run
            .map(|r| format!("{} ({}, {})", r.started_at, r.source, r.status))
            .unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

async fn handle_config(dw: &MarketDW, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match dw.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            dw.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = dw.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

async fn handle_company(dw: &MarketDW, action: CompanyAction, json: bool) -> anyhow::Result<()> {
    match action {
        CompanyAction::Add { id, name, inactive } => {
            dw.company_add(&id, &name, !inactive).await?;
            println!("Saved: {id} ({name})");
        }
        CompanyAction::List { active_only } => {
            let companies = dw.company_list(active_only).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&companies)?);
            } else if companies.is_empty() {
                println!("No clinics.");
            } else {
                for c in companies {
                    let flag = if c.is_active { "" } else { " [inactive]" };
                    println!("{} {}{flag}", c.entity_id, c.display_name);
                }
            }
        }
    }
    Ok(())
}

async fn handle_ingest_log(dw: &MarketDW, limit: u32, json: bool) -> anyhow::Result<()> {
    let runs = dw.ingest_log(limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
    } else if runs.is_empty() {
        println!("No ingest runs.");
    } else {
        for r in runs {
            println!(
                "#{} {} {} [{}] read {} loaded {} rejected {}",
                r.id, r.started_at, r.source, r.status, r.rows_read, r.rows_loaded, r.rows_rejected
            );
            if let Some(err) = r.error_message {
                println!("    {err}");
            }
        }
    }
    Ok(())
}

async fn handle_channels(dw: &MarketDW, filters: Filters, json: bool) -> anyhow::Result<()> {
    let report = dw.channels(filters.to_query()?).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if report.channels.is_empty() {
        println!("No fact rows found.");
        return Ok(());
    }
    for row in &report.channels {
        print_summary_row(row);
    }
    println!("\nSpend mix");
    for share in &report.spend_mix {
        println!(
            "  {:<24} {:>12} {:>8}",
            share.channel.label(),
            format_currency(Some(share.value)),
            format_percent(share.share, 1)
        );
    }
    println!("\nLead mix");
    for share in &report.lead_mix {
        println!(
            "  {:<24} {:>12} {:>8}",
            share.channel.label(),
            format_number(Some(share.value)),
            format_percent(share.share, 1)
        );
    }
    println!("\nFunnel");
    for stage in &report.funnel.stages {
        println!(
            "  {:<14} {:>12} {:>8}",
            stage.stage,
            format_number(Some(stage.value)),
            format_percent(stage.rate_from_previous, 2)
        );
    }
    Ok(())
}

async fn handle_trend(dw: &MarketDW, filters: Filters, by_entity: bool, json: bool) -> anyhow::Result<()> {
    let reports = dw.trend(filters.to_query()?, by_entity).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    if reports.is_empty() {
        println!("No fact rows found.");
        return Ok(());
    }
    for report in &reports {
        let c = &report.comparison;
        let name = report.display_name.as_deref().unwrap_or("All clinics");
        println!("{name}: {} vs {}", c.current_period, c.previous_period);
        for m in &c.metrics {
            let render = |v: Option<f64>| match m.metric {
                Headline::Ratio(r) if r.is_rate() => format_percent(v, 2),
                Headline::Ratio(RatioMetric::Roas) => format_ratio(v),
                Headline::Ratio(_) => format_currency(v),
                Headline::Sum(f) if f.is_currency() => format_currency(v),
                Headline::Sum(_) => format_number(v),
            };
            println!(
                "  {:<16} {:>12} {:>12}  {}",
                m.metric.name(),
                render(m.current),
                render(m.previous),
                format_delta(&m.delta)
            );
        }
        println!();
    }
    Ok(())
}

fn print_summary_row(row: &SummaryRow) {
    let m = &row.metrics;
    println!(
        "{:<32} spend {:>10} | leads {:>8} | appts {:>6} | ROAS {:>7} | conv {:>7} | CPL {:>8}",
        row.label,
        format_currency(Some(row.sums.get(marketdw::Field::Spend))),
        format_number(Some(row.sums.get(marketdw::Field::Leads))),
        format_number(Some(row.sums.get(marketdw::Field::TotalAppointments))),
        format_ratio(m.roas),
        format_percent(m.conversion_rate, 2),
        format_currency(m.cost_per_lead),
    );
}

fn print_ingest_report(report: &IngestReport) {
    println!("Ingest: {}", report.source);
    println!("  Status:   {}", report.status.as_str());
    println!("  Read:     {}", report.rows_read);
    println!("  Loaded:   {}", report.rows_loaded);
    println!("  Rejected: {}", report.rows_rejected);
    println!("  Replaced: {}", report.rows_replaced);
    println!("  New clinics: {}", report.new_companies);
    if let Some(ref err) = report.error {
        println!("  Error:    {err}");
    }
}
