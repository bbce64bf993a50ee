//! Keyword search used when the plan path fails.
//!
//! A record matches when any keyword occurs in its lowercased text blob (see
//! [`record_text`]). Nothing here returns an error.

use crate::config::Sampling;
use crate::dataset::record_text;
use crate::gateway::{extract_string_list, CompletionRequest, LanguageModel, PromptTask};
use crate::loader::LoadedDatasets;
use crate::result::{DatasetResult, ExecutionResult};
use std::collections::BTreeSet;
use tracing::{debug, warn};

pub const MAX_KEYWORDS: usize = 4;

const KEYWORD_SYSTEM_PROMPT: &str = "\
Extract 2 to 4 short search keywords from the user's question about security logs. \
Keywords are matched as case-insensitive substrings against raw log records, so \
prefer words that literally appear in logs (e.g. \"failed\", \"denied\", \"ssh\", \"drop\").
Respond with JSON only: {\"keywords\": [\"...\", \"...\"]}";

/// Trim, lowercase, drop blanks and duplicates, keep at most [`MAX_KEYWORDS`].
pub fn normalize_keywords<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    raw.into_iter()
        .map(|k| k.as_ref().trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.clone()))
        .take(MAX_KEYWORDS)
        .collect()
}

/// Ask the model for keywords; use `defaults` when it fails or answers nothing usable.
pub fn suggest_keywords(
    model: &dyn LanguageModel,
    query: &str,
    defaults: &[String],
    sampling: Sampling,
) -> Vec<String> {
    let request = CompletionRequest::new(PromptTask::Keywords)
        .system(KEYWORD_SYSTEM_PROMPT)
        .user(query)
        .with_sampling(sampling.temperature, sampling.max_tokens);

    let suggested = match model.complete(&request) {
        Ok(answer) => extract_string_list(&answer, "keywords")
            .map(normalize_keywords)
            .unwrap_or_default(),
        Err(e) => {
            warn!(error = %e, "keyword suggestion failed; using default keywords");
            Vec::new()
        }
    };

    if suggested.is_empty() {
        normalize_keywords(defaults)
    } else {
        debug!(keywords = ?suggested, "suggested keywords");
        suggested
    }
}

/// OR-substring filter over every record of every selected dataset.
///
/// Selected datasets that failed to load come back as failed results.
pub fn keyword_search(
    keywords: &[String],
    selected: &[String],
    loaded: &LoadedDatasets,
    max_rows: usize,
) -> ExecutionResult {
    let needles: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

    selected
        .iter()
        .map(|name| {
            let result = match loaded.get(name) {
                Some(Ok(dataset)) => {
                    let mut rows: Vec<_> = dataset
                        .rows()
                        .iter()
                        .filter(|record| {
                            let text = record_text(dataset.columns(), record);
                            needles.iter().any(|k| text.contains(k.as_str()))
                        })
                        .cloned()
                        .collect();
                    rows.truncate(max_rows);
                    DatasetResult::ok(dataset.columns().to_vec(), rows)
                }
                Some(Err(e)) => DatasetResult::failed(e.to_string()),
                None => DatasetResult::failed(format!("dataset `{name}` was not loaded")),
            };
            (name.clone(), result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatasetUnavailable;
    use crate::testing::{network_fixture, syslog_fixture, FailingModel, ScriptedModel};

    fn defaults() -> Vec<String> {
        vec!["error".into(), "failed".into()]
    }

    #[test]
    fn keywords_are_normalized() {
        assert_eq!(
            normalize_keywords([" SSH ", "ssh", "", "Denied", "drop", "port", "extra"]),
            vec!["ssh", "denied", "drop", "port"]
        );
    }

    #[test]
    fn failures_and_empty_answers_use_defaults() {
        assert_eq!(
            suggest_keywords(&FailingModel::unavailable(), "q", &defaults(), Sampling::new(0.3, 100)),
            defaults()
        );
        let model = ScriptedModel::new().on(PromptTask::Keywords, "{\"keywords\": [\"  \"]}");
        assert_eq!(suggest_keywords(&model, "q", &defaults(), Sampling::new(0.3, 100)), defaults());
        let model = ScriptedModel::new().on(PromptTask::Keywords, "no idea");
        assert_eq!(suggest_keywords(&model, "q", &defaults(), Sampling::new(0.3, 100)), defaults());
    }

    #[test]
    fn model_keywords_win() {
        let model = ScriptedModel::new().on(PromptTask::Keywords, "[\"DROP\", \"ssh\"]");
        assert_eq!(
            suggest_keywords(&model, "q", &defaults(), Sampling::new(0.3, 100)),
            vec!["drop", "ssh"]
        );
    }

    #[test]
    fn search_matches_any_keyword_across_all_columns() {
        let mut loaded = LoadedDatasets::new();
        loaded.insert("syslog".into(), Ok(syslog_fixture()));
        loaded.insert("network_logs".into(), Ok(network_fixture()));
        loaded.insert(
            "app_logs".into(),
            Err(DatasetUnavailable::new("app_logs", "object missing")),
        );
        let selected = vec!["syslog".to_string(), "network_logs".to_string(), "app_logs".to_string()];

        let out = keyword_search(&["failed".into(), "drop".into()], &selected, &loaded, 500);
        assert_eq!(out["syslog"].row_count, 1);
        // "DROP" lives in the action column.
        assert_eq!(out["network_logs"].row_count, 1);
        assert!(!out["app_logs"].success);
        assert!(out["app_logs"].error.as_deref().unwrap().contains("object missing"));
    }

    #[test]
    fn no_keywords_match_nothing() {
        let mut loaded = LoadedDatasets::new();
        loaded.insert("syslog".into(), Ok(syslog_fixture()));
        let out = keyword_search(&[], &["syslog".to_string()], &loaded, 500);
        assert!(out["syslog"].success);
        assert_eq!(out["syslog"].row_count, 0);
        assert_eq!(out["syslog"].columns, syslog_fixture().columns());
    }
}
