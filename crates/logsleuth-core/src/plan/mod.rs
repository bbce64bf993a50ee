//! Query plans: the opaque text a model produces, and the typed tree it is
//! parsed into before execution.
//!
//! Accepted plan forms:
//! - `{"plan_v1": {...}}`: the typed JSON IR (see [`ir`]);
//! - `{"sql": "SELECT ..."}` or raw SQL text (see [`sql`]);
//! - `{"error": "..."}`: the model declined.
//!
//! Surrounding markdown fences, `sql:` / `plan:` prefixes and trailing
//! semicolons are stripped first.

pub mod ir;
pub mod sql;

use crate::error::PlanError;
use crate::gateway::{extract_json, strip_code_fence};
use serde::{Deserialize, Serialize};

/// Plan text as produced by the generator. Consumed once by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryPlan(String);

impl QueryPlan {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_text(self) -> String {
        self.0
    }
}

impl From<&str> for QueryPlan {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// Typed plan tree
// =============================================================================

/// A literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Literal {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    Today,
    Yesterday,
    #[serde(rename = "last_7_days", alias = "week", alias = "last_week")]
    Last7Days,
}

impl TimeWindow {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "today" => Some(TimeWindow::Today),
            "yesterday" => Some(TimeWindow::Yesterday),
            "last_7_days" | "week" | "last_week" => Some(TimeWindow::Last7Days),
            _ => None,
        }
    }
}

/// Row filter. A closed set: anything a model asks for beyond this is rejected
/// while parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq { column: String, value: Literal },
    NotEq { column: String, value: Literal },
    /// Case-insensitive substring.
    Contains { column: String, needle: String },
    In { column: String, values: Vec<Literal> },
    TimeRange { column: String, window: TimeWindow },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Every column the predicate reads, in first-use order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Eq { column, .. }
            | Predicate::NotEq { column, .. }
            | Predicate::Contains { column, .. }
            | Predicate::In { column, .. }
            | Predicate::TimeRange { column, .. } => {
                if !out.contains(&column.as_str()) {
                    out.push(column);
                }
            }
            Predicate::And(parts) | Predicate::Or(parts) => {
                for p in parts {
                    p.collect_columns(out);
                }
            }
            Predicate::Not(inner) => inner.collect_columns(out),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    /// Row count, optionally grouped by one column. `output` names the count column.
    Count {
        group_by: Option<String>,
        output: String,
    },
}

pub const DEFAULT_COUNT_COLUMN: &str = "count";

#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub dataset: String,
    pub filter: Option<Predicate>,
    /// `None` keeps every declared column.
    pub projection: Option<Vec<String>>,
    pub aggregate: Option<Aggregate>,
    pub limit: Option<usize>,
}

impl PlanStep {
    pub fn scan(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            filter: None,
            projection: None,
            aggregate: None,
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_projection<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_count(mut self, group_by: Option<&str>) -> Self {
        self.aggregate = Some(Aggregate::Count {
            group_by: group_by.map(str::to_string),
            output: DEFAULT_COUNT_COLUMN.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanTree {
    pub steps: Vec<PlanStep>,
}

// =============================================================================
// Parsing
// =============================================================================

/// Strip the wrappers models put around plans even when asked not to.
pub fn normalize_plan_text(text: &str) -> String {
    let mut s = strip_code_fence(text).to_string();
    for prefix in ["sql:", "plan:"] {
        let has_prefix = s
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
        if has_prefix {
            s = s[prefix.len()..].trim().to_string();
            s = strip_code_fence(&s).to_string();
        }
    }
    while s.ends_with(';') {
        s.pop();
        s = s.trim_end().to_string();
    }
    s
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    let Some(head) = text.get(..keyword.len()) else {
        return false;
    };
    head.eq_ignore_ascii_case(keyword)
        && text[keyword.len()..]
            .chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c == '(')
}

/// Parse plan text into a typed tree. Does not consult dataset schemas.
pub fn parse_plan(plan: &QueryPlan) -> Result<PlanTree, PlanError> {
    let text = normalize_plan_text(plan.as_str());
    if text.is_empty() {
        return Err(PlanError::Empty);
    }

    if starts_with_keyword(&text, "select") {
        return sql::parse_sql_plan(&text);
    }
    if starts_with_keyword(&text, "with") {
        return Err(PlanError::Unsupported("common table expressions".into()));
    }

    if text.starts_with('{') {
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| PlanError::Syntax(format!("invalid plan JSON: {e}")))?;
        return parse_plan_object(value);
    }

    // A JSON plan wrapped in prose.
    if let Some(value @ serde_json::Value::Object(_)) = extract_json(&text) {
        return parse_plan_object(value);
    }

    Err(PlanError::Syntax(
        "expected a plan_v1 JSON object or a SELECT statement".into(),
    ))
}

fn parse_plan_object(value: serde_json::Value) -> Result<PlanTree, PlanError> {
    let serde_json::Value::Object(mut map) = value else {
        return Err(PlanError::Syntax("plan must be a JSON object".into()));
    };

    if let Some(plan) = map.remove("plan_v1") {
        return ir::parse_plan_ir(plan);
    }
    if let Some(sql) = map.remove("sql") {
        let sql = sql
            .as_str()
            .ok_or_else(|| PlanError::Syntax("`sql` must be a string".into()))?;
        let sql = normalize_plan_text(sql);
        if sql.is_empty() {
            return Err(PlanError::Empty);
        }
        return sql::parse_sql_plan(&sql);
    }
    if let Some(reason) = map.remove("error") {
        let reason = match reason {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        return Err(PlanError::Declined(reason));
    }
    if map.contains_key("steps") {
        return ir::parse_plan_ir(serde_json::Value::Object(map));
    }

    Err(PlanError::Syntax(
        "plan object must contain `plan_v1`, `sql` or `error`".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrappers_are_stripped() {
        assert_eq!(normalize_plan_text("```sql\nSELECT * FROM syslog;\n```"), "SELECT * FROM syslog");
        assert_eq!(normalize_plan_text("SQL: SELECT 1 ;;"), "SELECT 1");
        assert_eq!(normalize_plan_text("plan: {\"a\": 1}"), "{\"a\": 1}");
    }

    #[test]
    fn raw_sql_and_wrapped_sql_agree() {
        let raw = parse_plan(&"SELECT message FROM syslog LIMIT 3".into()).unwrap();
        let wrapped = parse_plan(&r#"{"sql": "SELECT message FROM syslog LIMIT 3;"}"#.into()).unwrap();
        assert_eq!(raw, wrapped);
        assert_eq!(raw.steps[0].limit, Some(3));
    }

    #[test]
    fn declined_and_empty_plans_fail() {
        assert_eq!(
            parse_plan(&r#"{"error": "cannot answer"}"#.into()),
            Err(PlanError::Declined("cannot answer".into()))
        );
        assert_eq!(parse_plan(&"  ``` ```  ".into()), Err(PlanError::Empty));
        assert_eq!(parse_plan(&"".into()), Err(PlanError::Empty));
    }

    #[test]
    fn prose_is_a_syntax_error() {
        assert!(matches!(
            parse_plan(&"Here are the failed logins".into()),
            Err(PlanError::Syntax(_))
        ));
        assert!(matches!(
            parse_plan(&"{\"unrelated\": true}".into()),
            Err(PlanError::Syntax(_))
        ));
        assert!(matches!(
            parse_plan(&"{not json".into()),
            Err(PlanError::Syntax(_))
        ));
    }

    #[test]
    fn cte_is_unsupported() {
        assert!(matches!(
            parse_plan(&"WITH x AS (SELECT 1) SELECT * FROM x".into()),
            Err(PlanError::Unsupported(_))
        ));
    }

    #[test]
    fn predicate_columns_are_collected_once() {
        let p = Predicate::And(vec![
            Predicate::Contains {
                column: "message".into(),
                needle: "fail".into(),
            },
            Predicate::Not(Box::new(Predicate::Eq {
                column: "host".into(),
                value: Literal::text("web-01"),
            })),
            Predicate::In {
                column: "message".into(),
                values: vec![],
            },
        ]);
        assert_eq!(p.columns(), vec!["message", "host"]);
    }
}
