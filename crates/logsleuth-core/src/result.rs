//! Per-dataset result sets shared by the plan executor and keyword search.

use crate::dataset::Record;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of running a plan (or keyword search) against one dataset.
///
/// `columns` agrees with the keys of every row. A failed result carries no
/// rows and an error marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetResult {
    pub success: bool,
    #[serde(rename = "data")]
    pub rows: Vec<Record>,
    pub columns: Vec<String>,
    pub row_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DatasetResult {
    pub fn ok(columns: Vec<String>, rows: Vec<Record>) -> Self {
        Self {
            success: true,
            row_count: rows.len(),
            rows,
            columns,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            rows: Vec::new(),
            columns: Vec::new(),
            row_count: 0,
            error: Some(error.into()),
        }
    }

    /// Keep at most `max` rows.
    pub fn truncate(&mut self, max: usize) {
        self.rows.truncate(max);
        self.row_count = self.rows.len();
    }
}

/// Result sets keyed by dataset name.
pub type ExecutionResult = BTreeMap<String, DatasetResult>;

/// Total rows over the successful results.
pub fn matched_rows(results: &ExecutionResult) -> usize {
    results
        .values()
        .filter(|r| r.success)
        .map(|r| r.row_count)
        .sum()
}

pub fn any_success(results: &ExecutionResult) -> bool {
    results.values().any(|r| r.success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;

    #[test]
    fn serializes_rows_as_data() {
        let mut row = Record::new();
        row.insert("a".into(), Value::Int(1));
        let ok = DatasetResult::ok(vec!["a".into()], vec![row]);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["data"][0]["a"], 1);
        assert_eq!(json["row_count"], 1);
        assert!(json.get("error").is_none());

        let failed = serde_json::to_value(DatasetResult::failed("gone")).unwrap();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["error"], "gone");
    }

    #[test]
    fn totals_only_count_successes() {
        let mut results = ExecutionResult::new();
        results.insert("a".into(), DatasetResult::ok(vec![], vec![Record::new(); 2]));
        results.insert("b".into(), DatasetResult::failed("x"));
        assert_eq!(matched_rows(&results), 2);
        assert!(any_success(&results));
    }
}
