//! The query pipeline: free text in, structured response out.
//!
//! ```text
//! classify ──► chat ──────────────────────────────────────────────► response
//!    │
//!    └──► select ─► load ─► describe ─► generate ─► execute ──┐
//!                                          │           │      ├─► insights ─► correlate ─► summarize
//!                                          └──(fail)───┴─► keyword search ┘
//! ```
//!
//! Every request gets a fresh UUID and runs inside a `query` tracing span.
//! Nothing here returns `Err`: stage failures are absorbed into defaults or the
//! fallback path, and only a request with no data at all yields an `error`
//! response.

use crate::config::PipelineConfig;
use crate::correlation::{correlate, CorrelationReport};
use crate::dataset::{Dataset, DatasetDescriptor};
use crate::error::PlanFailure;
use crate::executor::{execute_plan, ExecutionContext};
use crate::fallback::{keyword_search, suggest_keywords};
use crate::gateway::{CompletionRequest, LanguageModel, PromptTask, SharedModel};
use crate::generator::generate_plan;
use crate::insights::InsightReport;
use crate::intent::{classify_intent, Intent};
use crate::loader::{DatasetLoader, LoadedDatasets, SharedLoader};
use crate::result::{any_success, matched_rows, DatasetResult, ExecutionResult};
use crate::selector::select_datasets;
use crate::summary::generate_summary;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, info_span, warn};
use uuid::Uuid;

pub const CHAT_UNAVAILABLE_MESSAGE: &str =
    "The log analysis assistant is unavailable right now. Please try again shortly.";

/// An incoming question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub tenant: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tenant: tenant.into(),
            session: None,
        }
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Chat,
    Query,
    Error,
}

/// How the results were produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum SearchPath {
    Plan,
    KeywordFallback { keywords: Vec<String>, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<InsightReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlations: Option<CorrelationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchPath>,
    pub request_id: Uuid,
}

impl PipelineResponse {
    fn bare(kind: ResponseKind, message: impl Into<String>, request_id: Uuid) -> Self {
        Self {
            kind,
            message: message.into(),
            logs: None,
            insights: None,
            correlations: None,
            summary: None,
            plan: None,
            search: None,
            request_id,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == ResponseKind::Error
    }
}

/// Runs questions through the pipeline. Cheap to clone; safe to share across threads.
#[derive(Clone)]
pub struct QueryPipeline {
    model: SharedModel,
    loader: SharedLoader,
    config: PipelineConfig,
    fixed_now: Option<NaiveDateTime>,
}

impl std::fmt::Debug for QueryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPipeline")
            .field("model", &self.model.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QueryPipeline {
    pub fn new(model: SharedModel, loader: SharedLoader) -> Self {
        Self {
            model,
            loader,
            config: PipelineConfig::default(),
            fixed_now: None,
        }
    }

    pub fn from_parts<M, L>(model: M, loader: L) -> Self
    where
        M: LanguageModel + 'static,
        L: DatasetLoader + 'static,
    {
        Self::new(Arc::new(model), Arc::new(loader))
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Pin the clock used by `time_range` predicates.
    pub fn with_fixed_now(mut self, now: NaiveDateTime) -> Self {
        self.fixed_now = Some(now);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn process_query(&self, text: &str, tenant: &str) -> PipelineResponse {
        self.process(&Query::new(text, tenant))
    }

    pub fn process(&self, query: &Query) -> PipelineResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("query", %request_id, tenant = %query.tenant);
        let _guard = span.enter();

        match classify_intent(self.model.as_ref(), &query.text, self.config.classify) {
            Intent::Conversational => self.chat(query, request_id),
            Intent::DataQuery => self.data_query(query, request_id),
        }
    }

    fn chat(&self, query: &Query, request_id: Uuid) -> PipelineResponse {
        let known = self.loader.known_datasets(&query.tenant);
        let datasets = if known.is_empty() {
            "none".to_string()
        } else {
            known.join(", ")
        };
        let system = format!(
            "You are a helpful assistant for security log analysis. You can answer \
questions about the user's logs (failed logins, suspicious addresses, blocked \
connections, application errors) and explain security concepts. \
Datasets available to this user: {datasets}."
        );
        let request = CompletionRequest::new(PromptTask::Chat)
            .system(system)
            .user(&query.text)
            .with_sampling(self.config.chat.temperature, self.config.chat.max_tokens);

        let message = match self.model.complete(&request) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => CHAT_UNAVAILABLE_MESSAGE.to_string(),
            Err(e) => {
                warn!(error = %e, "chat completion failed");
                CHAT_UNAVAILABLE_MESSAGE.to_string()
            }
        };
        info!("answered conversationally");
        PipelineResponse::bare(ResponseKind::Chat, message, request_id)
    }

    fn data_query(&self, query: &Query, request_id: Uuid) -> PipelineResponse {
        let cfg = &self.config;
        let model = self.model.as_ref();

        let known = self.loader.known_datasets(&query.tenant);
        if known.is_empty() {
            warn!("tenant has no datasets");
            return PipelineResponse::bare(
                ResponseKind::Error,
                "No datasets available for this tenant.",
                request_id,
            );
        }

        let selection = select_datasets(model, &query.text, &known, cfg.select);
        let loaded: LoadedDatasets = self.loader.load_datasets(&query.tenant, &selection.datasets);
        let available: BTreeMap<String, Dataset> = loaded
            .iter()
            .filter_map(|(name, r)| r.as_ref().ok().map(|ds| (name.clone(), ds.clone())))
            .collect();

        if available.is_empty() {
            let reasons = loaded
                .values()
                .filter_map(|r| r.as_ref().err().map(|e| e.to_string()))
                .collect::<Vec<_>>()
                .join("; ");
            warn!(%reasons, "no selected dataset could be loaded");
            let mut response = PipelineResponse::bare(
                ResponseKind::Error,
                format!("None of the selected datasets could be loaded: {reasons}"),
                request_id,
            );
            response.logs = Some(load_failures(&loaded));
            return response;
        }

        let descriptors: Vec<DatasetDescriptor> = available
            .iter()
            .map(|(name, ds)| DatasetDescriptor::describe(name, ds, cfg.sample_rows))
            .collect();

        let mut ctx = ExecutionContext::new(cfg.max_result_rows);
        if let Some(now) = self.fixed_now {
            ctx = ctx.at(now);
        }

        let mut plan_text = None;
        let attempt: Result<ExecutionResult, PlanFailure> =
            generate_plan(model, &query.text, &descriptors, cfg.plan)
                .map_err(PlanFailure::from)
                .and_then(|plan| {
                    plan_text = Some(plan.as_str().to_string());
                    execute_plan(&plan, &available, &ctx).map_err(PlanFailure::from)
                });

        let (mut results, search) = match attempt {
            Ok(results) => {
                info!(datasets = results.len(), rows = matched_rows(&results), "plan executed");
                (results, SearchPath::Plan)
            }
            Err(failure) => {
                warn!(error = %failure, "plan path failed; falling back to keyword search");
                let keywords = suggest_keywords(model, &query.text, &cfg.fallback_keywords, cfg.keywords);
                let results = keyword_search(&keywords, &selection.datasets, &loaded, cfg.max_result_rows);
                info!(?keywords, rows = matched_rows(&results), "keyword search finished");
                (
                    results,
                    SearchPath::KeywordFallback {
                        keywords,
                        reason: failure.to_string(),
                    },
                )
            }
        };

        for (name, failed) in load_failures(&loaded) {
            results.entry(name).or_insert(failed);
        }

        if !any_success(&results) {
            let mut response = PipelineResponse::bare(
                ResponseKind::Error,
                "The query could not be answered from the available datasets.",
                request_id,
            );
            response.logs = Some(results);
            response.plan = plan_text;
            response.search = Some(search);
            return response;
        }

        let insights = InsightReport::analyze(&results);
        let mode = cfg.correlation_override.unwrap_or(selection.correlation);
        let correlations = correlate(&results, mode);
        let summary = generate_summary(model, &query.text, &insights, cfg.summary);
        let matched = matched_rows(&results);

        PipelineResponse {
            kind: ResponseKind::Query,
            message: format!(
                "Found {matched} matching record{s}. {summary}",
                s = if matched == 1 { "" } else { "s" }
            ),
            logs: Some(results),
            insights: Some(insights),
            correlations,
            summary: Some(summary),
            plan: plan_text,
            search: Some(search),
            request_id,
        }
    }
}

fn load_failures(loaded: &LoadedDatasets) -> ExecutionResult {
    loaded
        .iter()
        .filter_map(|(name, r)| {
            r.as_ref()
                .err()
                .map(|e| (name.clone(), DatasetResult::failed(e.to_string())))
        })
        .collect()
}
