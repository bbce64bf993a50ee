//! Language model gateway: the one seam through which every stage talks to a model.
//!
//! The pipeline never depends on a concrete backend. HTTP backends live in the
//! CLI crate; tests use scripted doubles. All calls are blocking and are
//! expected to honour a bounded timeout on the implementation side.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Which pipeline stage issued a request.
///
/// Backends may ignore it; it labels trace output and drives the offline
/// heuristic backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTask {
    Classify,
    SelectDatasets,
    GeneratePlan,
    Keywords,
    Summarize,
    Chat,
}

impl PromptTask {
    pub fn as_str(self) -> &'static str {
        match self {
            PromptTask::Classify => "classify",
            PromptTask::SelectDatasets => "select_datasets",
            PromptTask::GeneratePlan => "generate_plan",
            PromptTask::Keywords => "keywords",
            PromptTask::Summarize => "summarize",
            PromptTask::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub task: PromptTask,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(task: PromptTask) -> Self {
        Self {
            task,
            messages: Vec::new(),
            temperature: 0.0,
            max_tokens: 256,
        }
    }

    pub fn system(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message {
            role: Role::System,
            content: content.into(),
        });
        self
    }

    pub fn user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message {
            role: Role::User,
            content: content.into(),
        });
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// All system messages joined, for backends with a single system slot.
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    pub fn last_user(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// A text-completion capability.
pub trait LanguageModel: Send + Sync {
    /// Short backend label for logs.
    fn name(&self) -> &str {
        "model"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError>;
}

pub type SharedModel = Arc<dyn LanguageModel>;

impl<M: LanguageModel + ?Sized> LanguageModel for Arc<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        (**self).complete(request)
    }
}

/// Backend that refuses every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledModel;

impl LanguageModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    fn complete(&self, _request: &CompletionRequest) -> Result<String, GatewayError> {
        Err(GatewayError::Disabled)
    }
}

// =============================================================================
// Reading structured answers out of free text
// =============================================================================

/// Strip one surrounding markdown fence (with optional language tag).
pub fn strip_code_fence(text: &str) -> &str {
    let s = text.trim();
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let Some(end) = rest.rfind("```") else {
        return s;
    };
    let inner = &rest[..end];
    // Drop a language tag on the opening line (```json, ```sql, ...).
    match inner.find('\n') {
        Some(nl) if !inner[..nl].trim().contains(' ') => inner[nl + 1..].trim(),
        _ => inner.trim(),
    }
}

/// Best-effort extraction of the first complete JSON object or array.
///
/// Models wrap JSON in prose or fences even when told not to. Brace balancing
/// outside of string literals is used instead of `rfind`, which can land on an
/// inner brace.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = strip_code_fence(text);
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(v);
    }

    let start = trimmed.find(['{', '['])?;
    let (open, close) = if trimmed[start..].starts_with('{') {
        ('{', '}')
    } else {
        ('[', ']')
    };

    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;
    for (idx, ch) in trimmed[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &trimmed[start..=start + idx];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull a list of strings out of a model answer.
///
/// Accepts a bare JSON array or an object holding the array under `key`.
pub fn extract_string_list(text: &str, key: &str) -> Option<Vec<String>> {
    let value = extract_json(text)?;
    let array = match &value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => map.get(key)?.as_array()?,
        _ => return None,
    };
    Some(
        array
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_collects_messages() {
        let req = CompletionRequest::new(PromptTask::Classify)
            .system("a")
            .system("b")
            .user("q1")
            .user("q2")
            .with_sampling(0.1, 10);
        assert_eq!(req.system_prompt().as_deref(), Some("a\n\nb"));
        assert_eq!(req.last_user(), Some("q2"));
        assert_eq!(req.max_tokens, 10);
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fence("```sql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  plain "), "plain");
    }

    #[test]
    fn json_is_found_inside_prose() {
        let v = extract_json("Sure! {\"datasets\": [\"syslog\"], \"note\": \"}\"} done").unwrap();
        assert_eq!(v["datasets"][0], "syslog");

        let v = extract_json("answer: [\"a\", \"b\"] thanks").unwrap();
        assert_eq!(v.as_array().unwrap().len(), 2);

        assert!(extract_json("no json here").is_none());
        assert!(extract_json("{ unterminated").is_none());
    }

    #[test]
    fn string_lists_accept_both_shapes() {
        assert_eq!(
            extract_string_list("{\"keywords\": [\"ssh\", 3, \"denied\"]}", "keywords").unwrap(),
            vec!["ssh", "denied"]
        );
        assert_eq!(
            extract_string_list("[\"x\"]", "keywords").unwrap(),
            vec!["x"]
        );
        assert!(extract_string_list("{\"other\": []}", "keywords").is_none());
    }

    #[test]
    fn disabled_model_refuses() {
        let req = CompletionRequest::new(PromptTask::Chat).user("hi");
        assert_eq!(DisabledModel.complete(&req), Err(GatewayError::Disabled));
    }
}
