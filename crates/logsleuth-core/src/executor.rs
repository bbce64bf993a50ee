//! Plan execution against in-memory datasets.
//!
//! Execution is all-or-nothing: results are accumulated locally and only
//! returned once every step has run. Any unknown dataset, unknown column or
//! runtime type error discards the whole plan.

use crate::dataset::{parse_timestamp, Dataset, Record, Value};
use crate::error::PlanError;
use crate::plan::{parse_plan, Aggregate, Literal, PlanStep, PlanTree, Predicate, QueryPlan, TimeWindow};
use crate::result::{DatasetResult, ExecutionResult};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Per-request execution settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionContext {
    /// Reference instant for `time_range` predicates (UTC).
    pub now: NaiveDateTime,
    /// Cap applied to every result set after the plan's own limit.
    pub max_result_rows: usize,
}

impl ExecutionContext {
    pub fn new(max_result_rows: usize) -> Self {
        Self {
            now: Utc::now().naive_utc(),
            max_result_rows,
        }
    }

    pub fn at(mut self, now: NaiveDateTime) -> Self {
        self.now = now;
        self
    }
}

/// Parse and execute plan text.
pub fn execute_plan(
    plan: &QueryPlan,
    datasets: &BTreeMap<String, Dataset>,
    ctx: &ExecutionContext,
) -> Result<ExecutionResult, PlanError> {
    let tree = parse_plan(plan)?;
    execute_tree(&tree, datasets, ctx)
}

/// Execute an already-parsed plan.
pub fn execute_tree(
    tree: &PlanTree,
    datasets: &BTreeMap<String, Dataset>,
    ctx: &ExecutionContext,
) -> Result<ExecutionResult, PlanError> {
    if tree.steps.is_empty() {
        return Err(PlanError::Empty);
    }

    let mut results = ExecutionResult::new();
    for step in &tree.steps {
        let dataset = datasets
            .get(&step.dataset)
            .ok_or_else(|| PlanError::UnknownDataset(step.dataset.clone()))?;
        let (columns, rows) = run_step(step, dataset, ctx)?;
        debug!(dataset = %step.dataset, rows = rows.len(), "plan step executed");

        match results.get_mut(&step.dataset) {
            Some(existing) => {
                if existing.columns != columns {
                    return Err(PlanError::ConflictingProjection(step.dataset.clone()));
                }
                existing.rows.extend(rows);
                existing.row_count = existing.rows.len();
            }
            None => {
                results.insert(step.dataset.clone(), DatasetResult::ok(columns, rows));
            }
        }
    }

    for result in results.values_mut() {
        result.truncate(ctx.max_result_rows);
    }
    Ok(results)
}

fn run_step(
    step: &PlanStep,
    dataset: &Dataset,
    ctx: &ExecutionContext,
) -> Result<(Vec<String>, Vec<Record>), PlanError> {
    validate_columns(step, dataset)?;

    let mut matched: Vec<&Record> = Vec::new();
    for record in dataset.rows() {
        let keep = match &step.filter {
            Some(predicate) => eval(predicate, record, ctx)?,
            None => true,
        };
        if keep {
            matched.push(record);
        }
    }

    let (columns, mut rows) = match &step.aggregate {
        Some(Aggregate::Count { group_by, output }) => count(&matched, group_by.as_deref(), output),
        None => project(&matched, step.projection.as_deref(), dataset.columns()),
    };

    if let Some(limit) = step.limit {
        rows.truncate(limit);
    }
    Ok((columns, rows))
}

fn validate_columns(step: &PlanStep, dataset: &Dataset) -> Result<(), PlanError> {
    let mut referenced: Vec<&str> = Vec::new();
    if let Some(filter) = &step.filter {
        referenced.extend(filter.columns());
    }
    if let Some(projection) = &step.projection {
        referenced.extend(projection.iter().map(String::as_str));
    }
    if let Some(Aggregate::Count {
        group_by: Some(column),
        ..
    }) = &step.aggregate
    {
        referenced.push(column);
    }

    match referenced.into_iter().find(|c| !dataset.has_column(c)) {
        Some(column) => Err(PlanError::UnknownColumn {
            dataset: step.dataset.clone(),
            column: column.to_string(),
        }),
        None => Ok(()),
    }
}

fn project(rows: &[&Record], projection: Option<&[String]>, all: &[String]) -> (Vec<String>, Vec<Record>) {
    let Some(columns) = projection else {
        return (all.to_vec(), rows.iter().map(|r| (*r).clone()).collect());
    };
    let projected = rows
        .iter()
        .map(|r| {
            columns
                .iter()
                .map(|c| (c.clone(), r.get(c).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect();
    (columns.to_vec(), projected)
}

fn count(rows: &[&Record], group_by: Option<&str>, output: &str) -> (Vec<String>, Vec<Record>) {
    let Some(group_col) = group_by else {
        let mut row = Record::new();
        row.insert(output.to_string(), Value::Int(rows.len() as i64));
        return (vec![output.to_string()], vec![row]);
    };

    // Keyed by display text.
    let mut groups: BTreeMap<String, (Value, i64)> = BTreeMap::new();
    for r in rows {
        let value = r.get(group_col).cloned().unwrap_or(Value::Null);
        groups.entry(value.to_string()).or_insert((value, 0)).1 += 1;
    }

    let out = groups
        .into_values()
        .map(|(value, n)| {
            let mut row = Record::new();
            row.insert(group_col.to_string(), value);
            row.insert(output.to_string(), Value::Int(n));
            row
        })
        .collect();
    (vec![group_col.to_string(), output.to_string()], out)
}

// =============================================================================
// Predicate evaluation
// =============================================================================

/// A row passes only when its predicate is definitely true.
fn eval(predicate: &Predicate, record: &Record, ctx: &ExecutionContext) -> Result<bool, PlanError> {
    Ok(eval_tri(predicate, record, ctx)? == Some(true))
}

/// Three-valued evaluation: `None` is unknown (a comparison against a null
/// cell). `NOT` keeps unknown unknown, so `a != 'x'` and `NOT a = 'x'` agree.
fn eval_tri(predicate: &Predicate, record: &Record, ctx: &ExecutionContext) -> Result<Option<bool>, PlanError> {
    match predicate {
        Predicate::Eq { column, value } => compare(column, cell(record, column), value),
        Predicate::NotEq { column, value } => Ok(compare(column, cell(record, column), value)?.map(|eq| !eq)),
        Predicate::Contains { column, needle } => {
            let c = cell(record, column);
            if c.is_null() {
                return Ok(None);
            }
            Ok(Some(c.to_string().to_lowercase().contains(&needle.to_lowercase())))
        }
        Predicate::In { column, values } => {
            let c = cell(record, column);
            let mut unknown = false;
            for v in values {
                match compare(column, c, v)? {
                    Some(true) => return Ok(Some(true)),
                    Some(false) => {}
                    None => unknown = true,
                }
            }
            Ok(if unknown { None } else { Some(false) })
        }
        Predicate::TimeRange { column, window } => {
            let c = cell(record, column);
            if c.is_null() {
                return Ok(None);
            }
            in_window(column, c, *window, ctx.now).map(Some)
        }
        Predicate::And(parts) => {
            let mut unknown = false;
            for p in parts {
                match eval_tri(p, record, ctx)? {
                    Some(false) => return Ok(Some(false)),
                    Some(true) => {}
                    None => unknown = true,
                }
            }
            Ok(if unknown { None } else { Some(true) })
        }
        Predicate::Or(parts) => {
            let mut unknown = false;
            for p in parts {
                match eval_tri(p, record, ctx)? {
                    Some(true) => return Ok(Some(true)),
                    Some(false) => {}
                    None => unknown = true,
                }
            }
            Ok(if unknown { None } else { Some(false) })
        }
        Predicate::Not(inner) => Ok(eval_tri(inner, record, ctx)?.map(|b| !b)),
    }
}

/// Equality with null handling: `= NULL` tests for a null cell, any other
/// literal against a null cell is unknown.
fn compare(column: &str, cell: &Value, literal: &Literal) -> Result<Option<bool>, PlanError> {
    match (cell, literal) {
        (_, Literal::Null) => Ok(Some(cell.is_null())),
        (Value::Null, _) => Ok(None),
        _ => cell_equals(column, cell, literal).map(Some),
    }
}

static NULL: Value = Value::Null;

fn cell<'a>(record: &'a Record, column: &str) -> &'a Value {
    record.get(column).unwrap_or(&NULL)
}

fn mismatch(column: &str, detail: String) -> PlanError {
    PlanError::TypeMismatch {
        column: column.to_string(),
        detail,
    }
}

fn cell_equals(column: &str, cell: &Value, literal: &Literal) -> Result<bool, PlanError> {
    Ok(match (cell, literal) {
        (Value::Null, Literal::Null) => true,
        (Value::Null, _) | (_, Literal::Null) => false,

        (Value::Int(i), Literal::Number(n)) => (*i as f64) == *n,
        (Value::Float(x), Literal::Number(n)) => x == n,
        (Value::Int(_) | Value::Float(_), Literal::Text(s)) => {
            let n = s
                .trim()
                .parse::<f64>()
                .map_err(|_| mismatch(column, format!("numeric column compared with '{s}'")))?;
            match cell {
                Value::Int(i) => (*i as f64) == n,
                Value::Float(x) => *x == n,
                _ => false,
            }
        }
        (Value::Int(_) | Value::Float(_), Literal::Bool(b)) => {
            return Err(mismatch(column, format!("numeric column compared with {b}")))
        }

        (Value::Bool(b), Literal::Bool(l)) => b == l,
        (Value::Bool(b), Literal::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => *b,
            "false" => !*b,
            _ => return Err(mismatch(column, format!("boolean column compared with '{s}'"))),
        },
        (Value::Bool(_), Literal::Number(n)) => {
            return Err(mismatch(column, format!("boolean column compared with {n}")))
        }

        (Value::Text(t), Literal::Text(s)) => t == s,
        (Value::Text(t), Literal::Number(n)) => t.trim().parse::<f64>().is_ok_and(|x| x == *n),
        (Value::Text(t), Literal::Bool(b)) => t.trim().eq_ignore_ascii_case(&b.to_string()),
    })
}

fn window_bounds(window: TimeWindow, now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let today = now.date().and_time(chrono::NaiveTime::MIN);
    let tomorrow = today + Duration::days(1);
    match window {
        TimeWindow::Today => (today, tomorrow),
        TimeWindow::Yesterday => (today - Duration::days(1), today),
        TimeWindow::Last7Days => (today - Duration::days(6), tomorrow),
    }
}

fn in_window(
    column: &str,
    cell: &Value,
    window: TimeWindow,
    now: NaiveDateTime,
) -> Result<bool, PlanError> {
    let at = match cell {
        Value::Null => return Ok(false),
        Value::Text(s) if s.trim().is_empty() => return Ok(false),
        Value::Text(s) => parse_timestamp(s)
            .ok_or_else(|| mismatch(column, format!("'{s}' is not a timestamp")))?,
        Value::Int(secs) => DateTime::<Utc>::from_timestamp(*secs, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| mismatch(column, format!("{secs} is out of range as epoch seconds")))?,
        other => return Err(mismatch(column, format!("{other} is not a timestamp"))),
    };
    let (start, end) = window_bounds(window, now);
    Ok(at >= start && at < end)
}
