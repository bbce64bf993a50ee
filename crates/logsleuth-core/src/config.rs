//! Pipeline tuning knobs.
//!
//! Everything has a default, so an empty JSON object is a valid config.

use crate::correlation::CorrelationMode;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SAMPLE_ROWS: usize = 3;
pub const DEFAULT_MAX_RESULT_ROWS: usize = 500;
pub const DEFAULT_FALLBACK_KEYWORDS: [&str; 2] = ["error", "failed"];

/// Sampling parameters for one prompt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Sampling {
    pub const fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature,
            max_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub classify: Sampling,
    pub select: Sampling,
    pub plan: Sampling,
    pub keywords: Sampling,
    pub summary: Sampling,
    pub chat: Sampling,
    /// Rows included in each dataset descriptor.
    pub sample_rows: usize,
    /// Cap applied to every result set after the plan's own limit.
    pub max_result_rows: usize,
    /// Keywords used when the model cannot suggest any.
    pub fallback_keywords: Vec<String>,
    /// When set, wins over the correlation hint from dataset selection.
    pub correlation_override: Option<CorrelationMode>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classify: Sampling::new(0.0, 10),
            select: Sampling::new(0.1, 200),
            plan: Sampling::new(0.1, 500),
            keywords: Sampling::new(0.3, 100),
            summary: Sampling::new(0.3, 300),
            chat: Sampling::new(0.7, 500),
            sample_rows: DEFAULT_SAMPLE_ROWS,
            max_result_rows: DEFAULT_MAX_RESULT_ROWS,
            fallback_keywords: DEFAULT_FALLBACK_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            correlation_override: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn with_correlation_override(mut self, mode: CorrelationMode) -> Self {
        self.correlation_override = Some(mode);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = PipelineConfig::from_json_str(
            r#"{"max_result_rows": 20, "correlation_override": "actor_activity"}"#,
        )
        .unwrap();
        assert_eq!(cfg.max_result_rows, 20);
        assert_eq!(cfg.sample_rows, DEFAULT_SAMPLE_ROWS);
        assert_eq!(cfg.fallback_keywords, vec!["error", "failed"]);
        assert_eq!(cfg.correlation_override, Some(CorrelationMode::ActorActivity));
    }

    #[test]
    fn empty_object_is_the_default() {
        assert_eq!(
            PipelineConfig::from_json_str("{}").unwrap(),
            PipelineConfig::default()
        );
    }
}
