//! Typed plan IR (JSON) for models.
//!
//! Models are better at producing structured JSON than valid SQL, so the
//! generator prompt steers them toward `plan_v1`. The IR is deserialized with
//! serde and then lowered into a [`PlanTree`], which is where the semantic
//! checks live. Unknown fields are rejected rather than silently dropped.

use super::{Aggregate, Literal, PlanStep, PlanTree, Predicate, TimeWindow, DEFAULT_COUNT_COLUMN};
use crate::error::PlanError;
use serde::{Deserialize, Serialize};

pub const PLAN_V1_VERSION: u32 = 1;

/// Shape reference embedded in the plan generator prompt.
pub const PLAN_V1_REFERENCE: &str = r#"{"plan_v1": {
  "version": 1,
  "steps": [
    {
      "dataset": "<dataset name>",
      "where": <predicate, optional>,
      "select": ["<column>", ...],            // optional, default all columns
      "aggregate": {"kind": "count", "group_by": "<column>"},  // optional
      "limit": 50                              // optional
    }
  ]
}}
Predicates:
  {"op": "eq", "column": "<c>", "value": <string|number|bool|null>}
  {"op": "not_eq", "column": "<c>", "value": <...>}
  {"op": "contains", "column": "<c>", "value": "<case-insensitive substring>"}
  {"op": "in", "column": "<c>", "values": [<...>, ...]}
  {"op": "time_range", "column": "<timestamp column>", "range": "today" | "yesterday" | "last_7_days"}
  {"op": "and", "args": [<predicate>, ...]}
  {"op": "or", "args": [<predicate>, ...]}
  {"op": "not", "arg": <predicate>}"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanIrV1 {
    #[serde(default = "default_plan_v1_version")]
    pub version: u32,
    pub steps: Vec<StepIrV1>,
}

fn default_plan_v1_version() -> u32 {
    PLAN_V1_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepIrV1 {
    #[serde(alias = "from")]
    pub dataset: String,

    #[serde(default, rename = "where", alias = "filter")]
    pub filter: Option<PredicateIrV1>,

    #[serde(default, rename = "select", alias = "columns", alias = "projection")]
    pub projection: Option<Vec<String>>,

    #[serde(default)]
    pub aggregate: Option<AggregateIrV1>,

    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PredicateIrV1 {
    Eq {
        column: String,
        value: serde_json::Value,
    },
    NotEq {
        column: String,
        value: serde_json::Value,
    },
    Contains {
        column: String,
        #[serde(alias = "needle")]
        value: String,
    },
    In {
        column: String,
        values: Vec<serde_json::Value>,
    },
    TimeRange {
        column: String,
        range: String,
    },
    And {
        args: Vec<PredicateIrV1>,
    },
    Or {
        args: Vec<PredicateIrV1>,
    },
    Not {
        arg: Box<PredicateIrV1>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateIrV1 {
    Count {
        #[serde(default)]
        group_by: Option<String>,
        #[serde(default, alias = "as")]
        output: Option<String>,
    },
}

/// Deserialize and lower a `plan_v1` value.
pub fn parse_plan_ir(value: serde_json::Value) -> Result<PlanTree, PlanError> {
    let ir: PlanIrV1 = serde_json::from_value(value)
        .map_err(|e| PlanError::Syntax(format!("invalid plan_v1: {e}")))?;
    ir.lower()
}

impl PlanIrV1 {
    pub fn lower(self) -> Result<PlanTree, PlanError> {
        if self.version != PLAN_V1_VERSION {
            return Err(PlanError::Unsupported(format!(
                "plan_v1 version {}",
                self.version
            )));
        }
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        let steps = self
            .steps
            .into_iter()
            .map(StepIrV1::lower)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PlanTree { steps })
    }
}

impl StepIrV1 {
    fn lower(self) -> Result<PlanStep, PlanError> {
        let dataset = self.dataset.trim().to_string();
        if dataset.is_empty() {
            return Err(PlanError::Syntax("step without a dataset".into()));
        }

        let projection = self
            .projection
            .filter(|cols| !cols.is_empty() && !(cols.len() == 1 && cols[0] == "*"));

        let aggregate = self.aggregate.map(|a| match a {
            AggregateIrV1::Count { group_by, output } => Aggregate::Count {
                group_by,
                output: output.unwrap_or_else(|| DEFAULT_COUNT_COLUMN.to_string()),
            },
        });

        // With a count, the only columns that may be named are the grouping column.
        let projection = match (&aggregate, projection) {
            (Some(Aggregate::Count { group_by, .. }), Some(cols)) => {
                if cols.iter().all(|c| Some(c) == group_by.as_ref()) {
                    None
                } else {
                    return Err(PlanError::Unsupported(
                        "columns selected alongside count must be the group_by column".into(),
                    ));
                }
            }
            (_, projection) => projection,
        };

        Ok(PlanStep {
            dataset,
            filter: self.filter.map(PredicateIrV1::lower).transpose()?,
            projection,
            aggregate,
            limit: self.limit,
        })
    }
}

impl PredicateIrV1 {
    fn lower(self) -> Result<Predicate, PlanError> {
        Ok(match self {
            PredicateIrV1::Eq { column, value } => Predicate::Eq {
                column,
                value: literal_from_json(value)?,
            },
            PredicateIrV1::NotEq { column, value } => Predicate::NotEq {
                column,
                value: literal_from_json(value)?,
            },
            PredicateIrV1::Contains { column, value } => Predicate::Contains {
                column,
                needle: value,
            },
            PredicateIrV1::In { column, values } => Predicate::In {
                column,
                values: values
                    .into_iter()
                    .map(literal_from_json)
                    .collect::<Result<_, _>>()?,
            },
            PredicateIrV1::TimeRange { column, range } => Predicate::TimeRange {
                column,
                window: TimeWindow::parse(&range)
                    .ok_or_else(|| PlanError::Unsupported(format!("time range `{range}`")))?,
            },
            PredicateIrV1::And { args } => Predicate::And(lower_args("and", args)?),
            PredicateIrV1::Or { args } => Predicate::Or(lower_args("or", args)?),
            PredicateIrV1::Not { arg } => Predicate::Not(Box::new(arg.lower()?)),
        })
    }
}

fn lower_args(op: &str, args: Vec<PredicateIrV1>) -> Result<Vec<Predicate>, PlanError> {
    if args.is_empty() {
        return Err(PlanError::Syntax(format!("`{op}` needs at least one argument")));
    }
    args.into_iter().map(PredicateIrV1::lower).collect()
}

fn literal_from_json(value: serde_json::Value) -> Result<Literal, PlanError> {
    match value {
        serde_json::Value::Null => Ok(Literal::Null),
        serde_json::Value::Bool(b) => Ok(Literal::Bool(b)),
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(Literal::Number)
            .ok_or_else(|| PlanError::Syntax(format!("number out of range: {n}"))),
        serde_json::Value::String(s) => Ok(Literal::Text(s)),
        other => Err(PlanError::Syntax(format!(
            "comparison values must be scalars, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_step_lowers() {
        let tree = parse_plan_ir(json!({
            "version": 1,
            "steps": [{
                "dataset": "syslog",
                "where": {"op": "and", "args": [
                    {"op": "contains", "column": "message", "value": "failed login"},
                    {"op": "time_range", "column": "timestamp", "range": "today"},
                    {"op": "not", "arg": {"op": "in", "column": "host", "values": ["db-01", 3]}}
                ]},
                "select": ["timestamp", "message"],
                "limit": 25
            }]
        }))
        .unwrap();

        let step = &tree.steps[0];
        assert_eq!(step.dataset, "syslog");
        assert_eq!(step.limit, Some(25));
        assert_eq!(
            step.projection.as_deref(),
            Some(&["timestamp".to_string(), "message".to_string()][..])
        );
        let Some(Predicate::And(parts)) = &step.filter else {
            panic!("expected and");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts[1],
            Predicate::TimeRange {
                column: "timestamp".into(),
                window: TimeWindow::Today
            }
        );
        assert_eq!(
            parts[2],
            Predicate::Not(Box::new(Predicate::In {
                column: "host".into(),
                values: vec![Literal::text("db-01"), Literal::Number(3.0)],
            }))
        );
    }

    #[test]
    fn count_with_group_by() {
        let tree = parse_plan_ir(json!({
            "steps": [{
                "dataset": "app_logs",
                "select": ["user"],
                "aggregate": {"kind": "count", "group_by": "user", "as": "events"}
            }]
        }))
        .unwrap();
        assert_eq!(tree.steps[0].projection, None);
        assert_eq!(
            tree.steps[0].aggregate,
            Some(Aggregate::Count {
                group_by: Some("user".into()),
                output: "events".into()
            })
        );
    }

    #[test]
    fn count_with_foreign_projection_is_unsupported() {
        let err = parse_plan_ir(json!({
            "steps": [{"dataset": "app_logs", "select": ["endpoint"], "aggregate": {"kind": "count"}}]
        }))
        .unwrap_err();
        assert!(matches!(err, PlanError::Unsupported(_)));
    }

    #[test]
    fn malformed_ir_is_rejected() {
        let unknown_op = parse_plan_ir(json!({
            "steps": [{"dataset": "syslog", "where": {"op": "regex", "column": "m", "value": "x"}}]
        }));
        assert!(matches!(unknown_op, Err(PlanError::Syntax(_))));

        let unknown_field = parse_plan_ir(json!({
            "steps": [{"dataset": "syslog", "order_by": "timestamp"}]
        }));
        assert!(matches!(unknown_field, Err(PlanError::Syntax(_))));

        assert_eq!(parse_plan_ir(json!({"steps": []})), Err(PlanError::Empty));

        let bad_range = parse_plan_ir(json!({
            "steps": [{"dataset": "syslog", "where": {"op": "time_range", "column": "timestamp", "range": "last_month"}}]
        }));
        assert!(matches!(bad_range, Err(PlanError::Unsupported(_))));

        let nested_value = parse_plan_ir(json!({
            "steps": [{"dataset": "syslog", "where": {"op": "eq", "column": "pid", "value": [1]}}]
        }));
        assert!(matches!(nested_value, Err(PlanError::Syntax(_))));

        let future = parse_plan_ir(json!({"version": 2, "steps": [{"dataset": "syslog"}]}));
        assert!(matches!(future, Err(PlanError::Unsupported(_))));
    }
}
