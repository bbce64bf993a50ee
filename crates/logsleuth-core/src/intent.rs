//! Intent classification: is this a question about the logs, or small talk?

use crate::config::Sampling;
use crate::gateway::{extract_json, CompletionRequest, LanguageModel, PromptTask};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Conversational,
    DataQuery,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Conversational => "conversational",
            Intent::DataQuery => "data_query",
        }
    }
}

const CLASSIFY_SYSTEM_PROMPT: &str = "\
You route messages for a security log analysis assistant.
Answer with exactly one label and nothing else:
- data_query: the user wants information retrieved from their log data \
(events, logins, IP addresses, errors, traffic, counts, time ranges).
- conversational: greetings, small talk, questions about the assistant itself, \
or anything that does not need log data.";

/// Read a label out of a model answer.
///
/// Whitespace, quotes, trailing punctuation and case are ignored, and
/// `data query` / `data-query` spell the same label. A JSON object
/// `{"intent": "..."}` is also accepted.
pub fn parse_intent_label(answer: &str) -> Option<Intent> {
    if let Some(serde_json::Value::Object(map)) = extract_json(answer) {
        if let Some(label) = map.get("intent").and_then(|v| v.as_str()) {
            return parse_intent_label(label);
        }
    }

    let label = answer
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .trim()
        .to_ascii_lowercase()
        .replace([' ', '-'], "_");

    match label.as_str() {
        "data_query" => Some(Intent::DataQuery),
        "conversational" => Some(Intent::Conversational),
        _ => None,
    }
}

/// Classify a query. Never fails: anything unexpected is `Conversational`.
pub fn classify_intent(model: &dyn LanguageModel, query: &str, sampling: Sampling) -> Intent {
    let request = CompletionRequest::new(PromptTask::Classify)
        .system(CLASSIFY_SYSTEM_PROMPT)
        .user(query)
        .with_sampling(sampling.temperature, sampling.max_tokens);

    match model.complete(&request) {
        Ok(answer) => match parse_intent_label(&answer) {
            Some(intent) => {
                debug!(intent = intent.as_str(), "classified query");
                intent
            }
            None => {
                debug!(answer = %answer.trim(), "unrecognized intent label; treating as conversational");
                Intent::Conversational
            }
        },
        Err(e) => {
            warn!(error = %e, "intent classification failed; treating as conversational");
            Intent::Conversational
        }
    }
}
