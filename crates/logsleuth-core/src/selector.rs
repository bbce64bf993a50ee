//! Dataset selection: which of the tenant's datasets a question is about.

use crate::config::Sampling;
use crate::correlation::CorrelationMode;
use crate::gateway::{extract_json, CompletionRequest, LanguageModel, PromptTask};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Non-empty, ordered as in the known set.
    pub datasets: Vec<String>,
    pub correlation: CorrelationMode,
}

impl Selection {
    pub fn all(known: &[String]) -> Self {
        Self {
            datasets: known.to_vec(),
            correlation: CorrelationMode::None,
        }
    }
}

fn selector_prompt(known: &[String]) -> String {
    format!(
        "You pick which log datasets are needed to answer a security question.
Available datasets: {names}

Respond with JSON only:
{{\"datasets\": [\"<name>\", ...], \"correlation\": \"none\" | \"cross_reference_ips\" | \"user_activity\"}}

Use \"cross_reference_ips\" when the question relates addresses across datasets and \
\"user_activity\" when it follows users across datasets.",
        names = known.join(", ")
    )
}

/// Parse the model's answer against the known names.
///
/// Returns `None` when nothing usable was named.
pub fn parse_selection(answer: &str, known: &[String]) -> Option<Selection> {
    let value = extract_json(answer)?;
    let (names, hint) = match &value {
        serde_json::Value::Array(items) => (items.as_slice(), None),
        serde_json::Value::Object(map) => (
            map.get("datasets")?.as_array()?.as_slice(),
            map.get("correlation").and_then(|v| v.as_str()),
        ),
        _ => return None,
    };

    let requested: Vec<&str> = names.iter().filter_map(|v| v.as_str()).map(str::trim).collect();
    let datasets: Vec<String> = known
        .iter()
        .filter(|k| {
            requested.iter().any(|r| *r == k.as_str())
                || requested.iter().any(|r| r.eq_ignore_ascii_case(k))
        })
        .cloned()
        .collect();
    if datasets.is_empty() {
        return None;
    }

    let correlation = hint
        .and_then(CorrelationMode::parse)
        .unwrap_or(CorrelationMode::None);
    Some(Selection {
        datasets,
        correlation,
    })
}

/// Select datasets for a query. Any failure selects everything known.
pub fn select_datasets(
    model: &dyn LanguageModel,
    query: &str,
    known: &[String],
    sampling: Sampling,
) -> Selection {
    if known.len() <= 1 {
        return Selection::all(known);
    }

    let request = CompletionRequest::new(PromptTask::SelectDatasets)
        .system(selector_prompt(known))
        .user(query)
        .with_sampling(sampling.temperature, sampling.max_tokens);

    match model.complete(&request) {
        Ok(answer) => match parse_selection(&answer, known) {
            Some(selection) => {
                debug!(datasets = ?selection.datasets, correlation = selection.correlation.as_str(), "selected datasets");
                selection
            }
            None => {
                warn!(answer = %answer.trim(), "unusable dataset selection; using all datasets");
                Selection::all(known)
            }
        },
        Err(e) => {
            warn!(error = %e, "dataset selection failed; using all datasets");
            Selection::all(known)
        }
    }
}
