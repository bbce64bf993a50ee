//! Deterministic offline backend.
//!
//! Answers each [`PromptTask`] with keyword heuristics so the whole pipeline
//! can run without a model server. It never produces a plan, so data queries
//! always take the keyword-search path.

use logsleuth_core::error::GatewayError;
use logsleuth_core::gateway::{CompletionRequest, LanguageModel, PromptTask};
use serde_json::json;

/// Words that mark a question as a data query.
const DATA_QUERY_TERMS: &[&str] = &[
    "show", "find", "list", "count", "how many", "which", "search", "logs", "log", "failed",
    "login", "error", "ip", "address", "network", "traffic", "connection", "blocked", "user",
    "endpoint", "today", "yesterday", "week", "suspicious", "attack", "ssh", "denied",
];

/// Keyword → dataset routing.
const DATASET_ROUTES: &[(&[&str], &str)] = &[
    (&["login", "auth", "system", "syslog", "ssh", "host"], "syslog"),
    (&["network", "ip", "connection", "traffic", "firewall", "port", "blocked"], "network_logs"),
    (&["app", "user", "endpoint", "api", "request", "password"], "app_logs"),
];

/// Terms worth searching for verbatim in raw records.
const SEARCH_TERMS: &[&str] = &[
    "failed", "failure", "error", "denied", "invalid", "login", "password", "drop", "reject",
    "blocked", "ssh", "sql", "injection", "warning", "critical", "scan", "brute", "timeout",
];

const MOCK_CHAT_ANSWER: &str = "Running with the offline mock backend. Ask about failed logins or \
blocked connections in your datasets and I will search the raw records.";

#[derive(Debug, Clone, Default)]
pub struct MockModel;

impl MockModel {
    pub fn new() -> Self {
        Self
    }
}

impl LanguageModel for MockModel {
    fn name(&self) -> &str {
        "mock"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        let question = request.last_user().unwrap_or_default().to_lowercase();
        Ok(match request.task {
            PromptTask::Classify => classify(&question).to_string(),
            PromptTask::SelectDatasets => {
                let available = available_datasets(&request.system_prompt().unwrap_or_default());
                select(&question, &available)
            }
            PromptTask::GeneratePlan => {
                json!({ "error": "the offline mock backend does not generate plans" }).to_string()
            }
            PromptTask::Keywords => json!({ "keywords": keywords(&question) }).to_string(),
            // Empty answers make the pipeline use its deterministic summary.
            PromptTask::Summarize => String::new(),
            PromptTask::Chat => MOCK_CHAT_ANSWER.to_string(),
        })
    }
}

fn tokens(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .collect()
}

fn has_term(question: &str, term: &str) -> bool {
    if term.contains(' ') {
        return question.contains(term);
    }
    tokens(question)
        .iter()
        .any(|t| *t == term || t.strip_suffix('s') == Some(term))
}

fn classify(question: &str) -> &'static str {
    if DATA_QUERY_TERMS.iter().any(|t| has_term(question, t)) {
        "data_query"
    } else {
        "conversational"
    }
}

/// Names from the selector prompt's `Available datasets: a, b` line.
fn available_datasets(system: &str) -> Vec<String> {
    system
        .lines()
        .find_map(|l| l.trim().strip_prefix("Available datasets:"))
        .map(|rest| {
            rest.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn select(question: &str, available: &[String]) -> String {
    let datasets: Vec<&str> = DATASET_ROUTES
        .iter()
        .filter(|(terms, _)| terms.iter().any(|t| has_term(question, t)))
        .map(|(_, name)| *name)
        .filter(|name| available.iter().any(|a| a == name))
        .collect();

    let across = ["across", "both", "correlate", "everywhere"]
        .iter()
        .any(|t| question.contains(t));
    let correlation = if !across {
        "none"
    } else if has_term(question, "user") {
        "user_activity"
    } else {
        "cross_reference_ips"
    };

    json!({ "datasets": datasets, "correlation": correlation }).to_string()
}

fn keywords(question: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in tokens(question) {
        let stem = token.strip_suffix('s').unwrap_or(token);
        let term = [token, stem].into_iter().find(|t| SEARCH_TERMS.contains(t));
        if let Some(term) = term {
            if !out.iter().any(|o| o == term) {
                out.push(term.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use logsleuth_core::config::Sampling;
    use logsleuth_core::correlation::CorrelationMode;
    use logsleuth_core::intent::{classify_intent, Intent};
    use logsleuth_core::selector::select_datasets;
    use proptest::prelude::*;

    fn known() -> Vec<String> {
        vec!["syslog".into(), "network_logs".into(), "app_logs".into()]
    }

    #[test]
    fn classification_follows_data_terms() {
        let m = MockModel::new();
        let s = Sampling::new(0.0, 10);
        assert_eq!(classify_intent(&m, "Show me failed logins", s), Intent::DataQuery);
        assert_eq!(classify_intent(&m, "hello there", s), Intent::Conversational);
    }

    #[test]
    fn selection_routes_by_keyword_through_the_real_prompt() {
        let m = MockModel::new();
        let s = Sampling::new(0.1, 200);

        let sel = select_datasets(&m, "failed login attempts", &known(), s);
        assert_eq!(sel.datasets, vec!["syslog"]);

        let sel = select_datasets(&m, "which ip shows up across network and app logs", &known(), s);
        assert_eq!(sel.datasets, vec!["network_logs", "app_logs"]);
        assert_eq!(sel.correlation, CorrelationMode::CrossReferenceIdentifier);

        // Nothing routed: the selector falls back to everything.
        let sel = select_datasets(&m, "anything odd", &known(), s);
        assert_eq!(sel.datasets, known());
    }

    #[test]
    fn keywords_keep_search_terms_only() {
        assert_eq!(keywords("show failed logins and errors"), vec!["failed", "login", "error"]);
        assert!(keywords("hello").is_empty());
    }

    proptest! {
        #[test]
        fn selection_never_names_unavailable_datasets(
            question in "[a-z ]{0,60}",
            mask in prop::collection::vec(any::<bool>(), 3),
        ) {
            let available: Vec<String> = known()
                .into_iter()
                .zip(mask)
                .filter_map(|(name, keep)| keep.then_some(name))
                .collect();
            let answer: serde_json::Value = serde_json::from_str(&select(&question, &available)).unwrap();
            for name in answer["datasets"].as_array().unwrap() {
                prop_assert!(available.iter().any(|a| a == name.as_str().unwrap()));
            }
        }
    }

    #[test]
    fn plans_are_always_declined() {
        let req = CompletionRequest::new(PromptTask::GeneratePlan).user("q");
        let answer = MockModel::new().complete(&req).unwrap();
        assert!(answer.contains("\"error\""));
    }
}
