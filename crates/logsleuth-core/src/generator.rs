//! Query plan generation.

use crate::config::Sampling;
use crate::dataset::DatasetDescriptor;
use crate::error::PlanGenerationError;
use crate::gateway::{CompletionRequest, LanguageModel, PromptTask};
use crate::plan::ir::PLAN_V1_REFERENCE;
use crate::plan::QueryPlan;
use tracing::debug;

const SQL_SUBSET_REFERENCE: &str = "\
SELECT <* | col, ... | COUNT(*) [AS name] [, group_col]> FROM <dataset> \
[WHERE ...] [GROUP BY group_col] [LIMIT n]
WHERE supports =, != / <>, LIKE / ILIKE '%text%' (case-insensitive substring), \
IN (...), AND, OR, NOT, parentheses, and TIME_RANGE(col, 'today' | 'yesterday' | 'last_7_days').
One statement per dataset; separate statements with ';'. No JOIN, ORDER BY, DISTINCT or subqueries.";

fn plan_prompt(descriptors: &[DatasetDescriptor]) -> String {
    let schemas = descriptors
        .iter()
        .map(DatasetDescriptor::render_for_prompt)
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You translate security questions about log data into query plans.

Datasets:
{schemas}

Answer with exactly one JSON object and nothing else. Preferred form:
{PLAN_V1_REFERENCE}

Alternatively {{\"sql\": \"<query>\"}} using only this SQL subset:
{SQL_SUBSET_REFERENCE}

Use dataset and column names exactly as listed. If the question cannot be \
answered from these datasets, answer {{\"error\": \"<reason>\"}}."
    )
}

/// Ask the model for a plan over the given datasets. The plan is not validated here.
pub fn generate_plan(
    model: &dyn LanguageModel,
    query: &str,
    descriptors: &[DatasetDescriptor],
    sampling: Sampling,
) -> Result<QueryPlan, PlanGenerationError> {
    let request = CompletionRequest::new(PromptTask::GeneratePlan)
        .system(plan_prompt(descriptors))
        .user(query)
        .with_sampling(sampling.temperature, sampling.max_tokens);

    let text = model.complete(&request)?;
    debug!(plan = %text.trim(), "generated plan");
    Ok(QueryPlan::new(text))
}
