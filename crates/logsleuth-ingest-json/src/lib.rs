//! JSON table loading for Logsleuth
//!
//! Serves already-materialized tables from a directory tree:
//!
//! ```text
//! <root>/<tenant>/<dataset>.json    array of objects, or {"columns": [...], "rows": [...]}
//! <root>/<tenant>/<dataset>.jsonl   one object per line
//! ```
//!
//! Scalars map onto [`Value`]; nested arrays and objects are kept as their
//! compact JSON text.

use logsleuth_core::dataset::{Dataset, Record, Value};
use logsleuth_core::error::DatasetUnavailable;
use logsleuth_core::loader::{DatasetLoader, LoadedDatasets};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const JSON_EXTENSION: &str = "json";
pub const JSON_LINES_EXTENSION: &str = "jsonl";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid {kind} name `{name}`")]
    InvalidName { kind: &'static str, name: String },

    #[error("no table file for `{0}`")]
    NotFound(String),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "invalid JSON in {}{}: {source}",
        .path.display(),
        .line.map(|l| format!(" (line {l})")).unwrap_or_default()
    )]
    Json {
        path: PathBuf,
        line: Option<usize>,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected table shape in {}: {detail}", .path.display())]
    Shape { path: PathBuf, detail: String },
}

pub type Result<T> = std::result::Result<T, IngestError>;

// ============================================================================
// Parsing
// ============================================================================

/// Parse a `.json` table: an array of objects, or an object with `columns`
/// and `rows` (alias `data`, `records`).
pub fn parse_json_table(text: &str, path: &Path) -> Result<Dataset> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|source| IngestError::Json {
        path: path.to_path_buf(),
        line: None,
        source,
    })?;

    match value {
        serde_json::Value::Array(items) => Ok(Dataset::from_records(records(items, path)?)),
        serde_json::Value::Object(mut map) => {
            let rows = ["rows", "data", "records"]
                .iter()
                .find_map(|k| map.remove(*k))
                .ok_or_else(|| shape(path, "object table needs a `rows` array"))?;
            let serde_json::Value::Array(items) = rows else {
                return Err(shape(path, "`rows` must be an array"));
            };
            let columns = match map.remove("columns") {
                None => Vec::new(),
                Some(serde_json::Value::Array(cols)) => cols
                    .into_iter()
                    .map(|c| match c {
                        serde_json::Value::String(s) => Ok(s),
                        other => Err(shape(path, format!("column name {other} is not a string"))),
                    })
                    .collect::<Result<Vec<_>>>()?,
                Some(_) => return Err(shape(path, "`columns` must be an array of strings")),
            };
            Ok(Dataset::new(columns, records(items, path)?))
        }
        _ => Err(shape(path, "expected an array of objects or a table object")),
    }
}

/// Parse a `.jsonl` table. Blank lines are skipped.
pub fn parse_json_lines(text: &str, path: &Path) -> Result<Dataset> {
    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line).map_err(|source| IngestError::Json {
            path: path.to_path_buf(),
            line: Some(idx + 1),
            source,
        })?;
        rows.push(record(value, path)?);
    }
    Ok(Dataset::from_records(rows))
}

fn records(items: Vec<serde_json::Value>, path: &Path) -> Result<Vec<Record>> {
    items.into_iter().map(|v| record(v, path)).collect()
}

fn record(value: serde_json::Value, path: &Path) -> Result<Record> {
    let serde_json::Value::Object(map) = value else {
        return Err(shape(path, "every record must be a JSON object"));
    };
    Ok(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
}

fn shape(path: &Path, detail: impl Into<String>) -> IngestError {
    IngestError::Shape {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

// ============================================================================
// Directory loader
// ============================================================================

/// [`DatasetLoader`] over `<root>/<tenant>/<dataset>.json|.jsonl`.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, tenant: &str) -> Result<PathBuf> {
        check_name("tenant", tenant)?;
        Ok(self.root.join(tenant))
    }

    /// Dataset names present for `tenant`, sorted. Missing tenants have none.
    pub fn list(&self, tenant: &str) -> Result<Vec<String>> {
        let dir = self.tenant_dir(tenant)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|source| IngestError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut names = BTreeSet::new();
        for entry in entries {
            let path = entry
                .map_err(|source| IngestError::Io {
                    path: dir.clone(),
                    source,
                })?
                .path();
            if !path.is_file() {
                continue;
            }
            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some(JSON_EXTENSION | JSON_LINES_EXTENSION)) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.insert(stem.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    /// Load one dataset. `.json` wins when both files exist.
    pub fn load(&self, tenant: &str, name: &str) -> Result<Dataset> {
        check_name("dataset", name)?;
        let dir = self.tenant_dir(tenant)?;

        let json = dir.join(format!("{name}.{JSON_EXTENSION}"));
        if json.is_file() {
            return parse_json_table(&read(&json)?, &json);
        }
        let lines = dir.join(format!("{name}.{JSON_LINES_EXTENSION}"));
        if lines.is_file() {
            return parse_json_lines(&read(&lines)?, &lines);
        }
        Err(IngestError::NotFound(name.to_string()))
    }
}

impl DatasetLoader for DirectoryLoader {
    fn known_datasets(&self, tenant: &str) -> Vec<String> {
        match self.list(tenant) {
            Ok(names) => names,
            Err(e) => {
                warn!(tenant, error = %e, "cannot list datasets");
                Vec::new()
            }
        }
    }

    fn load_datasets(&self, tenant: &str, names: &[String]) -> LoadedDatasets {
        names
            .iter()
            .map(|name| {
                let loaded = self.load(tenant, name).map_err(|e| {
                    warn!(tenant, dataset = %name, error = %e, "dataset unavailable");
                    DatasetUnavailable::new(name.as_str(), e.to_string())
                });
                if let Ok(ds) = &loaded {
                    debug!(tenant, dataset = %name, rows = ds.len(), "loaded dataset");
                }
                (name.clone(), loaded)
            })
            .collect()
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Names become path components, so only plain file-name characters pass.
fn check_name(kind: &'static str, name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(IngestError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p() -> PathBuf {
        PathBuf::from("t.json")
    }

    #[test]
    fn array_tables_infer_columns_in_first_seen_order() {
        let ds = parse_json_table(r#"[{"b": 1, "a": "x"}, {"c": true}]"#, &p()).unwrap();
        // Record keys are ordered, so columns first seen in one record are sorted.
        assert_eq!(ds.columns(), &["a", "b", "c"]);
        assert_eq!(ds.rows()[1]["a"], Value::Null);
    }

    #[test]
    fn object_tables_keep_declared_columns() {
        let ds = parse_json_table(
            r#"{"columns": ["timestamp", "message"], "rows": [{"message": "hi", "timestamp": "2024-03-01 08:00:00"}]}"#,
            &p(),
        )
        .unwrap();
        assert_eq!(ds.columns(), &["timestamp", "message"]);
        assert_eq!(ds.len(), 1);
    }

    #[test]
    fn nested_values_become_text() {
        let ds = parse_json_table(r#"[{"tags": ["a", "b"]}]"#, &p()).unwrap();
        assert_eq!(ds.rows()[0]["tags"], Value::text(r#"["a","b"]"#));
    }

    #[test]
    fn bad_shapes_are_rejected() {
        assert!(matches!(parse_json_table("42", &p()), Err(IngestError::Shape { .. })));
        assert!(matches!(parse_json_table("[1, 2]", &p()), Err(IngestError::Shape { .. })));
        assert!(matches!(parse_json_table("{\"columns\": []}", &p()), Err(IngestError::Shape { .. })));
        assert!(matches!(parse_json_table("[", &p()), Err(IngestError::Json { line: None, .. })));
    }

    #[test]
    fn json_lines_report_the_bad_line() {
        let err = parse_json_lines("{\"a\": 1}\n\n{oops}\n", Path::new("t.jsonl")).unwrap_err();
        assert!(matches!(err, IngestError::Json { line: Some(3), .. }));
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn path_like_names_are_refused() {
        for bad in ["", ".", "..", "../etc", "a/b", "a\\b"] {
            assert!(check_name("tenant", bad).is_err(), "{bad:?}");
        }
        assert!(check_name("dataset", "network_logs.v2").is_ok());
    }
}
