//! Logsleuth CLI
//!
//! Command-line front end for:
//! - Asking free-text questions about a tenant's logs (`ask`)
//! - Inspecting the datasets a tenant has (`datasets`)
//! - Running a hand-written plan without a model (`run-plan`)
//! - Plain keyword search over raw records (`search`)

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use logsleuth_core::config::PipelineConfig;
use logsleuth_core::dataset::{Dataset, DatasetDescriptor};
use logsleuth_core::executor::{execute_plan, ExecutionContext};
use logsleuth_core::fallback::{keyword_search, normalize_keywords};
use logsleuth_core::gateway::LanguageModel;
use logsleuth_core::loader::DatasetLoader;
use logsleuth_core::pipeline::QueryPipeline;
use logsleuth_core::plan::QueryPlan;
use logsleuth_core::CorrelationMode;
use logsleuth_ingest_json::DirectoryLoader;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod llm;
mod mock;
mod render;

const LOGSLEUTH_DATA_DIR_ENV: &str = "LOGSLEUTH_DATA_DIR";
const LOGSLEUTH_TENANT_ENV: &str = "LOGSLEUTH_TENANT";

#[derive(Parser)]
#[command(name = "logsleuth")]
#[command(author, version, about = "Logsleuth: ask questions about tenant security logs")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` wins when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct DataArgs {
    /// Tenant whose datasets are queried (default: $LOGSLEUTH_TENANT)
    #[arg(long)]
    tenant: Option<String>,

    /// Root directory holding `<tenant>/<dataset>.json|.jsonl` (default: $LOGSLEUTH_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl DataArgs {
    fn resolve(&self) -> Result<(String, DirectoryLoader)> {
        let tenant = match &self.tenant {
            Some(t) => t.clone(),
            None => env_value(LOGSLEUTH_TENANT_ENV)
                .ok_or_else(|| anyhow!("no tenant (pass --tenant or set {LOGSLEUTH_TENANT_ENV})"))?,
        };
        let dir = match &self.data_dir {
            Some(d) => d.clone(),
            None => env_value(LOGSLEUTH_DATA_DIR_ENV)
                .map(PathBuf::from)
                .ok_or_else(|| anyhow!("no data directory (pass --data-dir or set {LOGSLEUTH_DATA_DIR_ENV})"))?,
        };
        if !dir.is_dir() {
            bail!("data directory {} does not exist", dir.display());
        }
        Ok((tenant, DirectoryLoader::new(dir)))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a free-text question; the pipeline classifies, plans, executes and summarizes.
    Ask {
        /// The question (words are joined with spaces)
        #[arg(required = true)]
        question: Vec<String>,

        #[command(flatten)]
        data: DataArgs,

        /// disabled | mock | ollama | openai | anthropic (default: $LOGSLEUTH_LLM_BACKEND or mock)
        #[arg(long)]
        backend: Option<String>,

        /// Model name (default: $LOGSLEUTH_LLM_MODEL or the backend default)
        #[arg(long)]
        model: Option<String>,

        /// Per-request timeout; 0 disables (default: $LOGSLEUTH_LLM_TIMEOUT_SECS or 60)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Force a correlation mode: none | cross_reference_identifier | actor_activity
        #[arg(long)]
        correlation: Option<CorrelationMode>,

        /// Pipeline config JSON (sampling, row caps, fallback keywords)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },

    /// List a tenant's datasets with inferred column types.
    Datasets {
        #[command(flatten)]
        data: DataArgs,

        /// Sample rows per dataset in JSON output
        #[arg(long, default_value_t = 3)]
        sample: usize,

        #[arg(long)]
        json: bool,
    },

    /// Parse and execute a plan (`plan_v1` JSON or SQL) against a tenant's datasets.
    RunPlan {
        /// Plan file, or `-` for stdin
        plan: String,

        #[command(flatten)]
        data: DataArgs,

        /// Row cap per result set
        #[arg(long, default_value_t = logsleuth_core::config::DEFAULT_MAX_RESULT_ROWS)]
        max_rows: usize,

        #[arg(long)]
        json: bool,
    },

    /// Case-insensitive OR keyword search across every dataset of a tenant.
    Search {
        #[arg(required = true)]
        keywords: Vec<String>,

        #[command(flatten)]
        data: DataArgs,

        #[arg(long, default_value_t = logsleuth_core::config::DEFAULT_MAX_RESULT_ROWS)]
        max_rows: usize,

        #[arg(long)]
        json: bool,
    },
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Ask {
            question,
            data,
            backend,
            model,
            timeout_secs,
            correlation,
            config,
            json,
        } => cmd_ask(
            &question.join(" "),
            &data,
            backend.as_deref(),
            model.as_deref(),
            timeout_secs,
            correlation,
            config.as_ref(),
            json,
        ),
        Commands::Datasets { data, sample, json } => cmd_datasets(&data, sample, json),
        Commands::RunPlan {
            plan,
            data,
            max_rows,
            json,
        } => cmd_run_plan(&plan, &data, max_rows, json),
        Commands::Search {
            keywords,
            data,
            max_rows,
            json,
        } => cmd_search(&keywords, &data, max_rows, json),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_ask(
    question: &str,
    data: &DataArgs,
    backend: Option<&str>,
    model: Option<&str>,
    timeout_secs: Option<u64>,
    correlation: Option<CorrelationMode>,
    config: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let (tenant, loader) = data.resolve()?;

    let mut pipeline_config = match config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            PipelineConfig::from_json_str(&text).with_context(|| format!("invalid config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    if let Some(mode) = correlation {
        pipeline_config = pipeline_config.with_correlation_override(mode);
    }

    let backend = llm::LlmBackend::from_name(&llm::backend_name(backend)?)?;
    let timeout = llm::llm_timeout(timeout_secs)?;
    let model = llm::build_model(&backend, model, timeout)?;
    tracing::info!(backend = backend.name(), model = model.name(), "language model ready");

    let pipeline = QueryPipeline::new(model, Arc::new(loader)).with_config(pipeline_config);
    let response = pipeline.process_query(question, &tenant);

    if json {
        print_json(&response)?;
    } else {
        render::print_response(&response);
    }
    if response.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

fn load_all(tenant: &str, loader: &DirectoryLoader) -> Result<BTreeMap<String, Dataset>> {
    let names = loader.list(tenant)?;
    if names.is_empty() {
        bail!("tenant `{tenant}` has no datasets under {}", loader.root().display());
    }
    let mut out = BTreeMap::new();
    for (name, loaded) in loader.load_datasets(tenant, &names) {
        match loaded {
            Ok(ds) => {
                out.insert(name, ds);
            }
            Err(e) => eprintln!("{} {e}", "warning:".yellow().bold()),
        }
    }
    Ok(out)
}

fn cmd_datasets(data: &DataArgs, sample: usize, json: bool) -> Result<()> {
    let (tenant, loader) = data.resolve()?;
    let descriptors: Vec<DatasetDescriptor> = load_all(&tenant, &loader)?
        .iter()
        .map(|(name, ds)| DatasetDescriptor::describe(name, ds, sample))
        .collect();

    if json {
        return print_json(&descriptors);
    }
    for d in &descriptors {
        render::print_descriptor(d);
    }
    Ok(())
}

fn read_plan(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        io::stdin()
            .read_to_string(&mut text)
            .context("failed to read plan from stdin")?;
        return Ok(text);
    }
    fs::read_to_string(source).with_context(|| format!("failed to read plan {source}"))
}

fn cmd_run_plan(source: &str, data: &DataArgs, max_rows: usize, json: bool) -> Result<()> {
    let (tenant, loader) = data.resolve()?;
    let plan = QueryPlan::new(read_plan(source)?);
    let datasets = load_all(&tenant, &loader)?;

    let results =
        execute_plan(&plan, &datasets, &ExecutionContext::new(max_rows)).context("plan rejected")?;

    if json {
        return print_json(&results);
    }
    render::print_results(&results);
    Ok(())
}

fn cmd_search(keywords: &[String], data: &DataArgs, max_rows: usize, json: bool) -> Result<()> {
    let (tenant, loader) = data.resolve()?;
    let keywords = normalize_keywords(keywords);
    let names = loader.list(&tenant)?;
    let loaded = loader.load_datasets(&tenant, &names);
    let results = keyword_search(&keywords, &names, &loaded, max_rows);

    if json {
        return print_json(&results);
    }
    println!("{} [{}]", "searching".green().bold(), keywords.join(", "));
    render::print_results(&results);
    Ok(())
}
