//! Dataset loader seam.

use crate::dataset::Dataset;
use crate::error::DatasetUnavailable;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-dataset load outcomes, keyed by dataset name.
pub type LoadedDatasets = BTreeMap<String, Result<Dataset, DatasetUnavailable>>;

/// Supplies already-materialized tabular datasets for a tenant.
pub trait DatasetLoader: Send + Sync {
    /// Dataset names the tenant has, in a stable order.
    fn known_datasets(&self, tenant: &str) -> Vec<String>;

    /// Load the requested datasets. Every requested name gets an entry.
    fn load_datasets(&self, tenant: &str, names: &[String]) -> LoadedDatasets;
}

pub type SharedLoader = Arc<dyn DatasetLoader>;

impl<L: DatasetLoader + ?Sized> DatasetLoader for Arc<L> {
    fn known_datasets(&self, tenant: &str) -> Vec<String> {
        (**self).known_datasets(tenant)
    }

    fn load_datasets(&self, tenant: &str, names: &[String]) -> LoadedDatasets {
        (**self).load_datasets(tenant, names)
    }
}

/// Loader over datasets held in memory, grouped by tenant.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoader {
    tenants: BTreeMap<String, BTreeMap<String, Dataset>>,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, tenant: &str, name: &str, dataset: Dataset) -> Self {
        self.insert(tenant, name, dataset);
        self
    }

    pub fn insert(&mut self, tenant: &str, name: &str, dataset: Dataset) {
        self.tenants
            .entry(tenant.to_string())
            .or_default()
            .insert(name.to_string(), dataset);
    }
}

impl DatasetLoader for InMemoryLoader {
    fn known_datasets(&self, tenant: &str) -> Vec<String> {
        self.tenants
            .get(tenant)
            .map(|sets| sets.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn load_datasets(&self, tenant: &str, names: &[String]) -> LoadedDatasets {
        let sets = self.tenants.get(tenant);
        names
            .iter()
            .map(|name| {
                let loaded = sets
                    .and_then(|s| s.get(name))
                    .cloned()
                    .ok_or_else(|| {
                        DatasetUnavailable::new(name, format!("not found for tenant `{tenant}`"))
                    });
                (name.clone(), loaded)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_become_unavailable_markers() {
        let loader = InMemoryLoader::new().with_dataset("acme", "syslog", Dataset::default());
        assert_eq!(loader.known_datasets("acme"), vec!["syslog"]);
        assert!(loader.known_datasets("other").is_empty());

        let out = loader.load_datasets("acme", &["syslog".into(), "app_logs".into()]);
        assert!(out["syslog"].is_ok());
        let err = out["app_logs"].as_ref().unwrap_err();
        assert_eq!(err.dataset, "app_logs");
    }
}
