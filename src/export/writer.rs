use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::export::format::{csv_currency, csv_number, csv_percent};

/// Built-in cell formats for CSV export. Symbols and grouping are left out so
/// spreadsheets read the cells as numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnFormat {
    #[default]
    Text,
    Number,
    Currency,
    /// Decimal fraction written as a percent number (`0.23` → `23.00`).
    Percent,
}

type Formatter = Box<dyn Fn(&Value) -> String + Send + Sync>;

enum Render {
    Format(ColumnFormat),
    Custom(Formatter),
}

/// One exported column: a dotted path into the serialized row, a header
/// label and how to render the cell.
pub struct Column {
    pub key: String,
    pub label: String,
    render: Render,
}

impl Column {
    pub fn new(key: &str, label: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            render: Render::Format(ColumnFormat::Text),
        }
    }

    pub fn format(mut self, format: ColumnFormat) -> Self {
        self.render = Render::Format(format);
        self
    }

    /// Render with a custom function. It is not called for missing or null
    /// values, which always export as an empty cell.
    pub fn with_formatter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.render = Render::Custom(Box::new(f));
        self
    }

    fn cell(&self, row: &Value) -> String {
        let value = match lookup(row, &self.key) {
            Some(v) if !v.is_null() => v,
            _ => return String::new(),
        };
        match &self.render {
            Render::Custom(f) => f(value),
            Render::Format(format) => format_cell(value, *format),
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("key", &self.key)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Follow a dotted path such as `metrics.roas` through nested objects.
fn lookup<'a>(row: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(row, |v, part| v.get(part))
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn format_cell(value: &Value, format: ColumnFormat) -> String {
    let number = value.as_f64();
    match (format, number) {
        (ColumnFormat::Currency, Some(n)) => csv_currency(n),
        (ColumnFormat::Percent, Some(n)) => csv_percent(n),
        (ColumnFormat::Number, Some(n)) => csv_number(n),
        _ => plain(value),
    }
}

/// Serialize `rows` to CSV text: a header row of labels, then one line per
/// row. Every field is quoted and embedded quotes are doubled.
pub fn to_csv<T: Serialize>(rows: &[T], columns: &[Column]) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());

    wtr.write_record(columns.iter().map(|c| c.label.as_str()))?;
    for row in rows {
        let value = serde_json::to_value(row)?;
        wtr.write_record(columns.iter().map(|c| c.cell(&value)))?;
    }

    let bytes = wtr
        .into_inner()
        .map_err(|e| Error::Other(format!("failed to flush CSV: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::Other(e.to_string()))
}
