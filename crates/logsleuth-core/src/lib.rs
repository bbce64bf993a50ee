//! Logsleuth core: natural-language questions over tenant security logs.
//!
//! A question is classified, routed to the relevant datasets, turned into a
//! query plan by a language model, executed against in-memory records, and
//! summarized with security insights.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                         QUERY PIPELINE                             │
//! ├────────────────────────────────────────────────────────────────────┤
//! │                                                                    │
//! │  question ──► intent ──► selector ──► loader ──► generator         │
//! │                 │                                    │             │
//! │               chat                               QueryPlan         │
//! │                                                      │             │
//! │                          ┌── keyword fallback ◄──(fail)            │
//! │                          │                           │             │
//! │                          ▼                        executor         │
//! │                    ExecutionResult ◄─────────────────┘             │
//! │                          │                                         │
//! │            insights ─► correlation ─► summary ─► response          │
//! │                                                                    │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Seams
//! - [`gateway::LanguageModel`]: any chat-completion backend
//! - [`loader::DatasetLoader`]: any per-tenant record store
//!
//! ## Plans
//! Plans are text. Two forms are accepted: a typed JSON IR (`plan_v1`) and a
//! small SQL subset. Both lower to the same [`plan::PlanTree`].

pub mod config;
pub mod correlation;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod gateway;
pub mod generator;
pub mod insights;
pub mod intent;
pub mod loader;
pub mod pipeline;
pub mod plan;
pub mod result;
pub mod selector;
pub mod summary;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{PipelineConfig, Sampling};
pub use correlation::{correlate, CorrelationEntry, CorrelationMode, CorrelationReport};
pub use dataset::{Dataset, DatasetDescriptor, Record, Value};
pub use error::{DatasetUnavailable, GatewayError, PlanError, PlanFailure, PlanGenerationError};
pub use executor::{execute_plan, ExecutionContext};
pub use gateway::{CompletionRequest, LanguageModel, PromptTask, SharedModel};
pub use insights::InsightReport;
pub use intent::Intent;
pub use loader::{DatasetLoader, InMemoryLoader, LoadedDatasets, SharedLoader};
pub use pipeline::{PipelineResponse, Query, QueryPipeline, ResponseKind, SearchPath};
pub use plan::{parse_plan, PlanTree, QueryPlan};
pub use result::{DatasetResult, ExecutionResult};
