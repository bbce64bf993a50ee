//! Cross-dataset correlation of actors.

use crate::insights::{first_present, ADDRESS_FIELDS, USER_FIELDS};
use crate::result::ExecutionResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMode {
    #[default]
    None,
    /// Addresses seen in more than one dataset.
    #[serde(alias = "cross_reference_ips")]
    CrossReferenceIdentifier,
    /// Activity per user, no threshold.
    #[serde(alias = "user_activity")]
    ActorActivity,
}

impl CorrelationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CorrelationMode::None => "none",
            CorrelationMode::CrossReferenceIdentifier => "cross_reference_identifier",
            CorrelationMode::ActorActivity => "actor_activity",
        }
    }

    /// Lenient parse of a mode name (model hints, CLI flags).
    pub fn parse(text: &str) -> Option<Self> {
        let norm = text.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "none" | "" => Some(CorrelationMode::None),
            "cross_reference_identifier" | "cross_reference_ips" | "cross_reference" => {
                Some(CorrelationMode::CrossReferenceIdentifier)
            }
            "actor_activity" | "user_activity" => Some(CorrelationMode::ActorActivity),
            _ => None,
        }
    }
}

impl std::str::FromStr for CorrelationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            format!("unknown correlation mode `{s}` (expected none, cross_reference_identifier, actor_activity)")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub key: String,
    /// Sorted, distinct.
    pub datasets: Vec<String>,
    pub event_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub mode: CorrelationMode,
    /// Ordered by key.
    pub entries: Vec<CorrelationEntry>,
}

impl CorrelationReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, key: &str) -> Option<&CorrelationEntry> {
        self.entries.iter().find(|e| e.key == key)
    }
}

/// Correlate successful result sets. `None` mode yields no report.
pub fn correlate(results: &ExecutionResult, mode: CorrelationMode) -> Option<CorrelationReport> {
    let (fields, min_datasets) = match mode {
        CorrelationMode::None => return None,
        CorrelationMode::CrossReferenceIdentifier => (ADDRESS_FIELDS, 2),
        CorrelationMode::ActorActivity => (USER_FIELDS, 1),
    };

    let mut by_key: BTreeMap<String, (BTreeSet<String>, usize)> = BTreeMap::new();
    for (dataset, result) in results.iter().filter(|(_, r)| r.success) {
        for record in &result.rows {
            let Some(key) = first_present(record, fields) else {
                continue;
            };
            let slot = by_key.entry(key).or_default();
            slot.0.insert(dataset.clone());
            slot.1 += 1;
        }
    }

    let entries = by_key
        .into_iter()
        .filter(|(_, (datasets, _))| datasets.len() >= min_datasets)
        .map(|(key, (datasets, event_count))| CorrelationEntry {
            key,
            datasets: datasets.into_iter().collect(),
            event_count,
        })
        .collect();

    Some(CorrelationReport { mode, entries })
}
