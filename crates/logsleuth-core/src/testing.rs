//! Test doubles for the two collaborator seams, plus small log fixtures.
//!
//! Compiled for unit tests and behind the `testing` feature, which the
//! integration tests enable to drive the pipeline deterministically.

use crate::dataset::{Dataset, Record, Value};
use crate::error::GatewayError;
use crate::gateway::{CompletionRequest, LanguageModel, PromptTask};
use std::collections::HashMap;
use std::sync::Mutex;

/// Answers by [`PromptTask`]. Unscripted tasks fail as unavailable.
///
/// Every request is recorded so tests can inspect prompts.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    answers: HashMap<PromptTask, Result<String, GatewayError>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, task: PromptTask, answer: impl Into<String>) -> Self {
        self.answers.insert(task, Ok(answer.into()));
        self
    }

    pub fn failing_on(mut self, task: PromptTask, error: GatewayError) -> Self {
        self.answers.insert(task, Err(error));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn requests_for(&self, task: PromptTask) -> Vec<CompletionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.task == task)
            .collect()
    }
}

impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        self.answers.get(&request.task).cloned().unwrap_or_else(|| {
            Err(GatewayError::Unavailable(format!(
                "no scripted answer for {}",
                request.task.as_str()
            )))
        })
    }
}

/// Fails every request with the same error.
#[derive(Debug, Clone)]
pub struct FailingModel {
    error: GatewayError,
}

impl FailingModel {
    pub fn new(error: GatewayError) -> Self {
        Self { error }
    }

    pub fn unavailable() -> Self {
        Self::new(GatewayError::Unavailable("connection refused".into()))
    }

    pub fn timeout() -> Self {
        Self::new(GatewayError::Timeout("deadline elapsed".into()))
    }
}

impl LanguageModel for FailingModel {
    fn name(&self) -> &str {
        "failing"
    }

    fn complete(&self, _request: &CompletionRequest) -> Result<String, GatewayError> {
        Err(self.error.clone())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn record(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Three host log lines, one of them a failed login.
pub fn syslog_fixture() -> Dataset {
    Dataset::new(
        columns(&["timestamp", "host", "process", "pid", "message"]),
        vec![
            record(&[
                ("timestamp", "2024-03-01 08:00:00".into()),
                ("host", "web-01".into()),
                ("process", "sshd".into()),
                ("pid", Value::Int(812)),
                ("message", "Failed login for admin from 203.0.113.7".into()),
            ]),
            record(&[
                ("timestamp", "2024-03-01 08:05:00".into()),
                ("host", "web-01".into()),
                ("process", "cron".into()),
                ("pid", Value::Int(901)),
                ("message", "Job completed".into()),
            ]),
            record(&[
                ("timestamp", "2024-03-01 08:10:00".into()),
                ("host", "db-01".into()),
                ("process", "systemd".into()),
                ("pid", Value::Int(1)),
                ("message", "Started session 42".into()),
            ]),
        ],
    )
}

/// Firewall records; `203.0.113.7` also appears in [`app_fixture`].
pub fn network_fixture() -> Dataset {
    Dataset::new(
        columns(&[
            "timestamp",
            "src_ip",
            "dest_ip",
            "protocol",
            "dest_port",
            "action",
            "bytes_sent",
        ]),
        vec![
            record(&[
                ("timestamp", "2024-03-01 08:01:00".into()),
                ("src_ip", "203.0.113.7".into()),
                ("dest_ip", "10.0.0.5".into()),
                ("protocol", "TCP".into()),
                ("dest_port", Value::Int(22)),
                ("action", "DROP".into()),
                ("bytes_sent", Value::Int(0)),
            ]),
            record(&[
                ("timestamp", "2024-03-01 08:02:00".into()),
                ("src_ip", "10.0.0.9".into()),
                ("dest_ip", "10.0.0.5".into()),
                ("protocol", "TCP".into()),
                ("dest_port", Value::Int(443)),
                ("action", "ACCEPT".into()),
                ("bytes_sent", Value::Int(5120)),
            ]),
        ],
    )
}

/// Application records with users and endpoints.
pub fn app_fixture() -> Dataset {
    Dataset::new(
        columns(&["timestamp", "level", "user", "endpoint", "src_ip", "message"]),
        vec![
            record(&[
                ("timestamp", "2024-03-01 08:03:00".into()),
                ("level", "WARN".into()),
                ("user", "mallory".into()),
                ("endpoint", "/api/login".into()),
                ("src_ip", "203.0.113.7".into()),
                ("message", "Invalid password for user mallory".into()),
            ]),
            record(&[
                ("timestamp", "2024-03-01 08:04:00".into()),
                ("level", "INFO".into()),
                ("user", "alice".into()),
                ("endpoint", "/api/reports".into()),
                ("src_ip", "10.0.0.12".into()),
                ("message", "Report downloaded".into()),
            ]),
        ],
    )
}
