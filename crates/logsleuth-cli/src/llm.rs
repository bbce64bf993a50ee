//! Language-model backends for the CLI.
//!
//! Every backend implements [`LanguageModel`], so the pipeline only ever sees
//! the trait object. HTTP backends are blocking and honour one timeout per
//! request.

use crate::mock::MockModel;
use anyhow::{anyhow, bail, Result};
use logsleuth_core::gateway::{DisabledModel, SharedModel};
use std::sync::Arc;
use std::time::Duration;

#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
use logsleuth_core::error::GatewayError;
#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
use logsleuth_core::gateway::{CompletionRequest, LanguageModel, Role};
#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
use serde_json::json;

pub(crate) const LOGSLEUTH_LLM_BACKEND_ENV: &str = "LOGSLEUTH_LLM_BACKEND";
pub(crate) const LOGSLEUTH_LLM_MODEL_ENV: &str = "LOGSLEUTH_LLM_MODEL";
pub(crate) const LOGSLEUTH_LLM_TIMEOUT_SECS_ENV: &str = "LOGSLEUTH_LLM_TIMEOUT_SECS";

// External provider env vars.
pub(crate) const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub(crate) const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub(crate) const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub(crate) const ANTHROPIC_BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";
pub(crate) const ANTHROPIC_VERSION_ENV: &str = "ANTHROPIC_VERSION";
pub(crate) const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";

const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_BACKEND: &str = "mock";

const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";

// =============================================================================
// Settings resolution
// =============================================================================

fn read_env(name: &str) -> Result<Option<String>> {
    match std::env::var(name) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(anyhow!("failed to read {name}: {e}")),
    }
}

/// Resolve the effective timeout from an explicit override and the raw env value.
///
/// Precedence:
/// 1) explicit override
/// 2) env var `LOGSLEUTH_LLM_TIMEOUT_SECS`
/// 3) default (`DEFAULT_LLM_TIMEOUT_SECS`)
///
/// `0` disables the timeout.
pub(crate) fn resolve_timeout(override_secs: Option<u64>, env_value: Option<&str>) -> Result<Option<Duration>> {
    let secs = match (override_secs, env_value) {
        (Some(v), _) => v,
        (None, Some(v)) => v.trim().parse::<u64>().map_err(|_| {
            anyhow!("invalid {LOGSLEUTH_LLM_TIMEOUT_SECS_ENV}={v:?} (expected integer seconds; 0 disables)")
        })?,
        (None, None) => DEFAULT_LLM_TIMEOUT_SECS,
    };
    Ok(if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    })
}

pub(crate) fn llm_timeout(override_secs: Option<u64>) -> Result<Option<Duration>> {
    let env = read_env(LOGSLEUTH_LLM_TIMEOUT_SECS_ENV)?;
    resolve_timeout(override_secs, env.as_deref())
}

/// Backend name: flag, then `LOGSLEUTH_LLM_BACKEND`, then `mock`.
pub(crate) fn backend_name(flag: Option<&str>) -> Result<String> {
    Ok(match flag {
        Some(name) => name.to_string(),
        None => read_env(LOGSLEUTH_LLM_BACKEND_ENV)?.unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
    })
}

fn normalize_ollama_host(host: &str) -> String {
    let mut host = host.trim().to_string();
    if host.is_empty() {
        host = DEFAULT_OLLAMA_HOST.to_string();
    }
    if !host.starts_with("http://") && !host.starts_with("https://") {
        host = format!("http://{host}");
    }
    host.trim_end_matches('/').to_string()
}

fn normalize_http_base_url(base_url: &str, default: &str) -> String {
    let mut host = base_url.trim().to_string();
    if host.is_empty() {
        host = default.to_string();
    }
    if !host.starts_with("http://") && !host.starts_with("https://") {
        host = format!("https://{host}");
    }
    host.trim_end_matches('/').to_string()
}

// =============================================================================
// Backend selection
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    /// Refuses every request; the pipeline degrades to chat / fallbacks.
    Disabled,
    /// Deterministic offline heuristics (see [`crate::mock`]).
    Mock,
    /// Local Ollama server via `/api/chat`. Override the host with `OLLAMA_HOST`.
    #[cfg(feature = "llm-ollama")]
    Ollama { host: String },
    /// OpenAI Responses API. Needs `OPENAI_API_KEY`; `OPENAI_BASE_URL` is optional.
    #[cfg(feature = "llm-openai")]
    OpenAI { base_url: String },
    /// Anthropic Messages API. Needs `ANTHROPIC_API_KEY`; `ANTHROPIC_BASE_URL`
    /// and `ANTHROPIC_VERSION` are optional.
    #[cfg(feature = "llm-anthropic")]
    Anthropic { base_url: String },
}

impl Default for LlmBackend {
    fn default() -> Self {
        Self::Mock
    }
}

impl LlmBackend {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "disabled" | "none" | "off" => Ok(Self::Disabled),
            "mock" => Ok(Self::Mock),
            #[cfg(feature = "llm-ollama")]
            "ollama" => Ok(Self::Ollama {
                host: normalize_ollama_host(&read_env(OLLAMA_HOST_ENV)?.unwrap_or_default()),
            }),
            #[cfg(feature = "llm-openai")]
            "openai" => Ok(Self::OpenAI {
                base_url: normalize_http_base_url(
                    &read_env(OPENAI_BASE_URL_ENV)?.unwrap_or_default(),
                    DEFAULT_OPENAI_BASE_URL,
                ),
            }),
            #[cfg(feature = "llm-anthropic")]
            "anthropic" => Ok(Self::Anthropic {
                base_url: normalize_http_base_url(
                    &read_env(ANTHROPIC_BASE_URL_ENV)?.unwrap_or_default(),
                    DEFAULT_ANTHROPIC_BASE_URL,
                ),
            }),
            #[allow(unreachable_patterns)]
            other @ ("ollama" | "openai" | "anthropic") => {
                bail!("backend `{other}` is not compiled in (enable the `llm-{other}` feature)")
            }
            other => bail!("unknown backend `{other}` (expected disabled, mock, ollama, openai or anthropic)"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Mock => "mock",
            #[cfg(feature = "llm-ollama")]
            Self::Ollama { .. } => "ollama",
            #[cfg(feature = "llm-openai")]
            Self::OpenAI { .. } => "openai",
            #[cfg(feature = "llm-anthropic")]
            Self::Anthropic { .. } => "anthropic",
        }
    }

    fn default_model(&self) -> Option<&'static str> {
        match self {
            Self::Disabled | Self::Mock => None,
            #[cfg(feature = "llm-ollama")]
            Self::Ollama { .. } => Some(DEFAULT_OLLAMA_MODEL),
            #[cfg(feature = "llm-openai")]
            Self::OpenAI { .. } => Some(DEFAULT_OPENAI_MODEL),
            #[cfg(feature = "llm-anthropic")]
            Self::Anthropic { .. } => Some(DEFAULT_ANTHROPIC_MODEL),
        }
    }
}

/// Build the model for `backend`. Model name: flag, then `LOGSLEUTH_LLM_MODEL`,
/// then the backend default.
pub fn build_model(backend: &LlmBackend, model: Option<&str>, timeout: Option<Duration>) -> Result<SharedModel> {
    let model = match model {
        Some(m) => Some(m.to_string()),
        None => read_env(LOGSLEUTH_LLM_MODEL_ENV)?,
    };

    Ok(match backend {
        LlmBackend::Disabled => Arc::new(DisabledModel),
        LlmBackend::Mock => Arc::new(MockModel::new()),
        #[allow(unreachable_patterns)]
        other => {
            let model = model
                .or_else(|| other.default_model().map(str::to_string))
                .ok_or_else(|| anyhow!("no model configured for backend `{}`", other.name()))?;
            http_model(other.clone(), model, timeout)?
        }
    })
}

#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
fn http_model(backend: LlmBackend, model: String, timeout: Option<Duration>) -> Result<SharedModel> {
    Ok(Arc::new(HttpModel::new(backend, model, timeout)?))
}

#[cfg(not(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic")))]
fn http_model(backend: LlmBackend, _model: String, _timeout: Option<Duration>) -> Result<SharedModel> {
    bail!("backend `{}` needs an HTTP feature", backend.name())
}

// =============================================================================
// HTTP backends
// =============================================================================

#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
pub struct HttpModel {
    backend: LlmBackend,
    model: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
impl HttpModel {
    pub fn new(backend: LlmBackend, model: String, timeout: Option<Duration>) -> Result<Self> {
        let api_key = match &backend {
            #[cfg(feature = "llm-openai")]
            LlmBackend::OpenAI { .. } => Some(required_key(OPENAI_API_KEY_ENV, "OpenAI")?),
            #[cfg(feature = "llm-anthropic")]
            LlmBackend::Anthropic { .. } => Some(required_key(ANTHROPIC_API_KEY_ENV, "Anthropic")?),
            _ => None,
        };

        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| anyhow!("failed to build http client: {e}"))?;

        Ok(Self {
            backend,
            model,
            api_key,
            client,
        })
    }

    fn key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }
}

#[cfg(any(feature = "llm-openai", feature = "llm-anthropic"))]
fn required_key(env: &str, provider: &str) -> Result<String> {
    match read_env(env)? {
        Some(key) => Ok(key),
        None => bail!("{provider} backend requires {env} (set it in your env; do not hardcode secrets in scripts)"),
    }
}

#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
impl LanguageModel for HttpModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        tracing::debug!(
            backend = self.backend.name(),
            model = %self.model,
            task = request.task.as_str(),
            "sending completion request"
        );
        match &self.backend {
            #[cfg(feature = "llm-ollama")]
            LlmBackend::Ollama { host } => self.ollama_chat(host, request),
            #[cfg(feature = "llm-openai")]
            LlmBackend::OpenAI { base_url } => self.openai_responses(base_url, request),
            #[cfg(feature = "llm-anthropic")]
            LlmBackend::Anthropic { base_url } => self.anthropic_messages(base_url, request),
            #[allow(unreachable_patterns)]
            _ => Err(GatewayError::Disabled),
        }
    }
}

/// Non-system messages as `{role, content}` objects.
#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
fn conversation(request: &CompletionRequest) -> Vec<serde_json::Value> {
    request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect()
}

#[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
fn send_json(
    request: reqwest::blocking::RequestBuilder,
    url: &str,
    provider: &str,
) -> Result<serde_json::Value, GatewayError> {
    let resp = request.send().map_err(|e| {
        if e.is_timeout() {
            GatewayError::Timeout(format!("{provider} at {url}: {e}"))
        } else {
            GatewayError::Unavailable(format!("failed to reach {provider} at {url}: {e}"))
        }
    })?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        return Err(GatewayError::Http {
            status: status.as_u16(),
            body,
        });
    }

    resp.json()
        .map_err(|e| GatewayError::InvalidResponse(format!("{provider} returned invalid JSON: {e}")))
}

#[cfg(feature = "llm-ollama")]
impl HttpModel {
    fn ollama_chat(&self, host: &str, request: &CompletionRequest) -> Result<String, GatewayError> {
        let url = format!("{host}/api/chat");

        let mut messages = Vec::new();
        if let Some(system) = request.system_prompt() {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.extend(conversation(request));

        let body = json!({
            "model": self.model,
            "stream": false,
            "messages": messages,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens
            }
        });

        let v = send_json(self.client.post(&url).json(&body), &url, "ollama")?;
        v.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| GatewayError::InvalidResponse("ollama: response has no message.content".into()))
    }
}

#[cfg(feature = "llm-openai")]
fn openai_extract_output_text(v: &serde_json::Value) -> Option<String> {
    let mut out = String::new();
    let output = v.get("output")?.as_array()?;
    for item in output {
        // The Responses API emits many item types; only "message" carries text.
        if item.get("type").and_then(|x| x.as_str()) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(|x| x.as_array()) else {
            continue;
        };
        for c in content {
            if c.get("type").and_then(|x| x.as_str()) != Some("output_text") {
                continue;
            }
            if let Some(t) = c.get("text").and_then(|x| x.as_str()) {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(t);
            }
        }
    }
    let trimmed = out.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(feature = "llm-openai")]
impl HttpModel {
    fn openai_responses(&self, base_url: &str, request: &CompletionRequest) -> Result<String, GatewayError> {
        let url = format!("{base_url}/v1/responses");

        let mut body = json!({
            "model": self.model,
            "input": conversation(request),
            "max_output_tokens": request.max_tokens,
            "temperature": request.temperature
        });
        if let Some(system) = request.system_prompt() {
            body["instructions"] = json!(system);
        }

        let v = send_json(
            self.client.post(&url).bearer_auth(self.key()).json(&body),
            &url,
            "OpenAI",
        )?;
        openai_extract_output_text(&v).ok_or_else(|| {
            GatewayError::InvalidResponse("openai: no output_text in response (unexpected response shape)".into())
        })
    }
}

#[cfg(feature = "llm-anthropic")]
fn anthropic_extract_output_text(v: &serde_json::Value) -> Option<String> {
    let mut out = String::new();
    let blocks = v.get("content")?.as_array()?;
    for b in blocks {
        if b.get("type").and_then(|x| x.as_str()) != Some("text") {
            continue;
        }
        if let Some(t) = b.get("text").and_then(|x| x.as_str()) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(t);
        }
    }
    let trimmed = out.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(feature = "llm-anthropic")]
impl HttpModel {
    fn anthropic_messages(&self, base_url: &str, request: &CompletionRequest) -> Result<String, GatewayError> {
        let url = format!("{base_url}/v1/messages");
        let version = std::env::var(ANTHROPIC_VERSION_ENV).unwrap_or_else(|_| DEFAULT_ANTHROPIC_VERSION.to_string());

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": conversation(request)
        });
        if let Some(system) = request.system_prompt() {
            body["system"] = json!(system);
        }

        let v = send_json(
            self.client
                .post(&url)
                .header("x-api-key", self.key())
                .header("anthropic-version", version)
                .json(&body),
            &url,
            "Anthropic",
        )?;
        anthropic_extract_output_text(&v).ok_or_else(|| {
            GatewayError::InvalidResponse("anthropic: no text blocks in response (unexpected response shape)".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_precedence() {
        assert_eq!(resolve_timeout(Some(5), Some("9")).unwrap(), Some(Duration::from_secs(5)));
        assert_eq!(resolve_timeout(None, Some(" 9 ")).unwrap(), Some(Duration::from_secs(9)));
        assert_eq!(
            resolve_timeout(None, None).unwrap(),
            Some(Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS))
        );
        assert_eq!(resolve_timeout(Some(0), None).unwrap(), None);
        assert_eq!(resolve_timeout(None, Some("0")).unwrap(), None);
        assert!(resolve_timeout(None, Some("soon")).is_err());
    }

    #[test]
    fn backend_names() {
        assert_eq!(LlmBackend::from_name("mock").unwrap(), LlmBackend::Mock);
        assert_eq!(LlmBackend::from_name(" Disabled ").unwrap(), LlmBackend::Disabled);
        assert!(LlmBackend::from_name("gemini").is_err());
    }

    #[test]
    fn hosts_are_normalized() {
        assert_eq!(normalize_ollama_host(""), DEFAULT_OLLAMA_HOST);
        assert_eq!(normalize_ollama_host("gpu-box:11434/"), "http://gpu-box:11434");
        assert_eq!(
            normalize_http_base_url("proxy.internal/", DEFAULT_OPENAI_BASE_URL),
            "https://proxy.internal"
        );
        assert_eq!(normalize_http_base_url(" ", DEFAULT_OPENAI_BASE_URL), DEFAULT_OPENAI_BASE_URL);
    }

    #[test]
    fn offline_backends_need_no_model_name() {
        assert_eq!(build_model(&LlmBackend::Mock, None, None).unwrap().name(), "mock");
        assert_eq!(build_model(&LlmBackend::Disabled, None, None).unwrap().name(), "disabled");
    }

    #[cfg(feature = "llm-openai")]
    #[test]
    fn openai_text_is_collected_from_message_items() {
        let v = json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "SELECT * FROM syslog"}
                ]}
            ]
        });
        assert_eq!(openai_extract_output_text(&v).as_deref(), Some("SELECT * FROM syslog"));
        assert_eq!(openai_extract_output_text(&json!({"output": []})), None);
    }

    #[cfg(feature = "llm-anthropic")]
    #[test]
    fn anthropic_text_blocks_are_joined() {
        let v = json!({
            "content": [
                {"type": "text", "text": "data_query"},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": " "}
            ]
        });
        assert_eq!(anthropic_extract_output_text(&v).as_deref(), Some("data_query"));
    }

    #[cfg(any(feature = "llm-ollama", feature = "llm-openai", feature = "llm-anthropic"))]
    #[test]
    fn conversation_skips_system_messages() {
        let req = CompletionRequest::new(logsleuth_core::PromptTask::Chat)
            .system("be brief")
            .user("hi");
        assert_eq!(conversation(&req), vec![json!({"role": "user", "content": "hi"})]);
    }
}
