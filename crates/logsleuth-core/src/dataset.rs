//! Tabular log datasets as the pipeline sees them.
//!
//! A dataset is a declared, ordered column list plus ordered records. The
//! column list is authoritative: records are normalized on construction so
//! every record carries exactly the declared columns (missing cells become
//! `Value::Null`). Downstream stages rely on that when they emit result sets
//! whose column list must agree with every row.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A scalar cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Non-null and (for text) not blank.
    pub fn is_present(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Text(s) => !s.trim().is_empty(),
            _ => true,
        }
    }

    /// Convert a JSON scalar. Nested arrays/objects are kept as their JSON text
    /// so that they still participate in substring matching.
    pub fn from_json(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Text(s),
            other => Self::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// One row: column name → value.
pub type Record = BTreeMap<String, Value>;

/// Lowercased text blob of a record: every value in column order, space separated.
///
/// This is the haystack for both keyword fallback search and pattern
/// categories, so the two stages agree on what "the record contains" means.
pub fn record_text(columns: &[String], record: &Record) -> String {
    let mut out = String::new();
    for col in columns {
        let Some(v) = record.get(col) else {
            continue;
        };
        if v.is_null() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&v.to_string());
    }
    out.to_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawDataset")]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Record>,
}

/// Wire shape of a [`Dataset`]; always normalized through [`Dataset::new`].
#[derive(Deserialize)]
struct RawDataset {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Record>,
}

impl From<RawDataset> for Dataset {
    fn from(raw: RawDataset) -> Self {
        Dataset::new(raw.columns, raw.rows)
    }
}

impl Dataset {
    /// Build a dataset from a declared column list.
    ///
    /// Columns that only appear in records are appended to the declared list
    /// (in first-seen order); cells missing from a record are filled with null.
    pub fn new(columns: Vec<String>, rows: Vec<Record>) -> Self {
        let mut columns = dedup_columns(columns);
        let mut seen: BTreeSet<String> = columns.iter().cloned().collect();
        for row in &rows {
            for key in row.keys() {
                if seen.insert(key.clone()) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = rows
            .into_iter()
            .map(|mut row| {
                for col in &columns {
                    row.entry(col.clone()).or_insert(Value::Null);
                }
                row
            })
            .collect();

        Self { columns, rows }
    }

    /// Build a dataset whose schema is inferred from the records alone.
    pub fn from_records(rows: Vec<Record>) -> Self {
        Self::new(Vec::new(), rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn into_rows(self) -> Vec<Record> {
        self.rows
    }
}

fn dedup_columns(columns: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    columns
        .into_iter()
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

// =============================================================================
// Descriptors (schema context for the plan generator)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Every value is null / blank.
    Empty,
    Boolean,
    Integer,
    Float,
    Timestamp,
    Text,
}

impl ColumnType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Empty => "empty",
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Text => "text",
        }
    }

    /// Infer the type of one column from its present values.
    pub fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        let mut bools = 0usize;
        let mut ints = 0usize;
        let mut floats = 0usize;
        let mut timestamps = 0usize;
        let mut texts = 0usize;

        for v in values {
            if !v.is_present() {
                continue;
            }
            match v {
                Value::Bool(_) => bools += 1,
                Value::Int(_) => ints += 1,
                Value::Float(_) => floats += 1,
                Value::Text(s) if parse_timestamp(s).is_some() => timestamps += 1,
                _ => texts += 1,
            }
        }

        let total = bools + ints + floats + timestamps + texts;
        if total == 0 {
            ColumnType::Empty
        } else if bools == total {
            ColumnType::Boolean
        } else if ints == total {
            ColumnType::Integer
        } else if ints + floats == total {
            ColumnType::Float
        } else if timestamps == total {
            ColumnType::Timestamp
        } else {
            ColumnType::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

/// Per-request schema summary handed to the plan generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub row_count: usize,
    pub sample_rows: Vec<Record>,
}

impl DatasetDescriptor {
    pub fn describe(name: &str, dataset: &Dataset, sample_size: usize) -> Self {
        let columns = dataset
            .columns()
            .iter()
            .map(|col| ColumnDescriptor {
                name: col.clone(),
                column_type: ColumnType::infer(dataset.rows().iter().filter_map(|r| r.get(col))),
            })
            .collect();

        Self {
            name: name.to_string(),
            columns,
            row_count: dataset.len(),
            sample_rows: dataset.rows().iter().take(sample_size).cloned().collect(),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Human-readable schema block for prompts.
    pub fn render_for_prompt(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} ({})", c.name, c.column_type.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sample = serde_json::to_string_pretty(&self.sample_rows)
            .unwrap_or_else(|_| "<unprintable>".to_string());
        format!(
            "Dataset '{name}':\n  Columns: {columns}\n  Row count: {rows}\n  Sample rows: {sample}",
            name = self.name,
            rows = self.row_count,
        )
    }
}

// =============================================================================
// Timestamps
// =============================================================================

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

/// Parse the timestamp shapes commonly found in exported log tables.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.len() < 8 {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for fmt in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
