//! SQL plan surface lowered into a [`PlanTree`].
//!
//! `sqlparser` does the parsing; this module accepts a deliberately small
//! subset and rejects everything else as unsupported:
//!
//! ```sql
//! SELECT <* | col, ... | COUNT(*) [AS name] [, group_col]>
//! FROM <dataset>
//! [WHERE <predicate>]
//! [GROUP BY group_col]
//! [LIMIT n]
//! ```
//!
//! Predicates: `=`, `!=` / `<>`, `LIKE` / `ILIKE` with a `'%text%'` pattern
//! (case-insensitive substring), `IN (...)`, `AND`, `OR`, `NOT`, parentheses,
//! and `TIME_RANGE(col, 'today' | 'yesterday' | 'last_7_days')`.
//! Several statements become several steps.

use super::{Aggregate, Literal, PlanStep, PlanTree, Predicate, TimeWindow, DEFAULT_COUNT_COLUMN};
use crate::error::PlanError;
use sqlparser::ast::{
    BinaryOperator, Expr, Function, FunctionArg, FunctionArgExpr, GroupByExpr, Ident, ObjectName,
    Query, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, UnaryOperator,
    Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

pub fn parse_sql_plan(input: &str) -> Result<PlanTree, PlanError> {
    let statements = Parser::parse_sql(&GenericDialect {}, input)
        .map_err(|e| PlanError::Syntax(format!("failed to parse SQL: {e}")))?;
    if statements.is_empty() {
        return Err(PlanError::Empty);
    }

    let steps = statements
        .iter()
        .map(|stmt| match stmt {
            Statement::Query(query) => lower_query(query),
            _ => Err(PlanError::Unsupported(
                "only SELECT statements are supported".into(),
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PlanTree { steps })
}

fn unsupported(what: impl Into<String>) -> PlanError {
    PlanError::Unsupported(what.into())
}

fn lower_query(query: &Query) -> Result<PlanStep, PlanError> {
    if query.with.is_some() {
        return Err(unsupported("common table expressions"));
    }
    if !query.order_by.is_empty() {
        return Err(unsupported("ORDER BY"));
    }
    if query.offset.is_some() || query.fetch.is_some() {
        return Err(unsupported("OFFSET / FETCH"));
    }

    let SetExpr::Select(select) = query.body.as_ref() else {
        return Err(unsupported("set operations and nested queries"));
    };
    if select.distinct.is_some() {
        return Err(unsupported("DISTINCT"));
    }
    if select.having.is_some() {
        return Err(unsupported("HAVING"));
    }

    let dataset = lower_from(&select.from)?;
    let group_by = lower_group_by(&select.group_by)?;
    let (projection, count_output) = lower_projection(&select.projection)?;

    let aggregate = match (count_output, group_by) {
        (Some(output), group_by) => {
            // Only the grouping column may appear next to the count.
            if let Some(cols) = &projection {
                if cols.iter().any(|c| Some(c) != group_by.as_ref()) {
                    return Err(unsupported(
                        "columns selected next to COUNT must be the GROUP BY column",
                    ));
                }
            }
            Some(Aggregate::Count { group_by, output })
        }
        (None, Some(_)) => return Err(unsupported("GROUP BY without COUNT")),
        (None, None) => None,
    };
    let projection = if aggregate.is_some() { None } else { projection };

    let filter = select.selection.as_ref().map(lower_predicate).transpose()?;
    let limit = query.limit.as_ref().map(lower_limit).transpose()?;

    Ok(PlanStep {
        dataset,
        filter,
        projection,
        aggregate,
        limit,
    })
}

fn lower_from(from: &[TableWithJoins]) -> Result<String, PlanError> {
    let [table] = from else {
        return Err(if from.is_empty() {
            PlanError::Syntax("SELECT without FROM".into())
        } else {
            unsupported("more than one FROM item")
        });
    };
    if !table.joins.is_empty() {
        return Err(unsupported("JOIN"));
    }
    match &table.relation {
        TableFactor::Table { name, .. } => object_name(name),
        _ => Err(unsupported("FROM item other than a dataset name")),
    }
}

fn object_name(name: &ObjectName) -> Result<String, PlanError> {
    match name.0.last() {
        Some(ident) if !ident.value.trim().is_empty() => Ok(ident.value.trim().to_string()),
        _ => Err(PlanError::Syntax("empty dataset name".into())),
    }
}

fn lower_group_by(group_by: &GroupByExpr) -> Result<Option<String>, PlanError> {
    match group_by {
        GroupByExpr::Expressions(exprs) => match exprs.as_slice() {
            [] => Ok(None),
            [expr] => column_name(expr).map(Some),
            _ => Err(unsupported("GROUP BY over more than one column")),
        },
        _ => Err(unsupported("GROUP BY ALL")),
    }
}

/// Returns the plain column list (if any) and the count output name (if counting).
fn lower_projection(items: &[SelectItem]) -> Result<(Option<Vec<String>>, Option<String>), PlanError> {
    let mut columns = Vec::new();
    let mut wildcard = false;
    let mut count: Option<String> = None;

    for item in items {
        match item {
            SelectItem::Wildcard(_) => wildcard = true,
            SelectItem::UnnamedExpr(Expr::Function(f)) => match keyword_column(f) {
                Some(column) => columns.push(column),
                None => set_count(&mut count, f, DEFAULT_COUNT_COLUMN.to_string())?,
            },
            SelectItem::UnnamedExpr(expr) => columns.push(column_name(expr)?),
            SelectItem::ExprWithAlias {
                expr: Expr::Function(f),
                alias,
            } => set_count(&mut count, f, alias.value.clone())?,
            SelectItem::ExprWithAlias { .. } => return Err(unsupported("column aliases")),
            SelectItem::QualifiedWildcard(..) => wildcard = true,
        }
    }

    if wildcard && (!columns.is_empty() || count.is_some()) {
        return Err(unsupported("`*` mixed with other select items"));
    }
    let projection = if wildcard || columns.is_empty() {
        None
    } else {
        Some(columns)
    };
    Ok((projection, count))
}

fn set_count(slot: &mut Option<String>, f: &Function, output: String) -> Result<(), PlanError> {
    if !f.name.to_string().eq_ignore_ascii_case("count") {
        return Err(unsupported(format!("function `{}` in SELECT", f.name)));
    }
    match f.args.as_slice() {
        [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] => {}
        [FunctionArg::Unnamed(FunctionArgExpr::Expr(Expr::Value(SqlValue::Number(..))))] => {}
        _ => return Err(unsupported("COUNT over anything but `*`")),
    }
    if slot.is_some() {
        return Err(unsupported("more than one COUNT"));
    }
    *slot = Some(output);
    Ok(())
}

fn lower_limit(expr: &Expr) -> Result<usize, PlanError> {
    match expr {
        Expr::Value(SqlValue::Number(s, _)) => s
            .parse::<usize>()
            .map_err(|e| PlanError::Syntax(format!("invalid LIMIT `{s}`: {e}"))),
        other => Err(unsupported(format!("LIMIT expression `{other}`"))),
    }
}

fn lower_predicate(expr: &Expr) -> Result<Predicate, PlanError> {
    match expr {
        Expr::Nested(inner) => lower_predicate(inner),
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => Ok(Predicate::And(join(
                lower_predicate(left)?,
                lower_predicate(right)?,
                true,
            ))),
            BinaryOperator::Or => Ok(Predicate::Or(join(
                lower_predicate(left)?,
                lower_predicate(right)?,
                false,
            ))),
            BinaryOperator::Eq => {
                let (column, value) = comparison(left, right)?;
                Ok(Predicate::Eq { column, value })
            }
            BinaryOperator::NotEq => {
                let (column, value) = comparison(left, right)?;
                Ok(Predicate::NotEq { column, value })
            }
            other => Err(unsupported(format!("operator `{other}`"))),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => Ok(Predicate::Not(Box::new(lower_predicate(expr)?))),
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        }
        | Expr::ILike {
            negated,
            expr,
            pattern,
            ..
        } => {
            let contains = Predicate::Contains {
                column: column_name(expr)?,
                needle: like_needle(pattern)?,
            };
            Ok(negate_if(*negated, contains))
        }
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let within = Predicate::In {
                column: column_name(expr)?,
                values: list.iter().map(literal).collect::<Result<_, _>>()?,
            };
            Ok(negate_if(*negated, within))
        }
        Expr::Function(f) if f.name.to_string().eq_ignore_ascii_case("time_range") => {
            lower_time_range(f)
        }
        other => Err(unsupported(format!("WHERE expression `{other}`"))),
    }
}

fn negate_if(negated: bool, p: Predicate) -> Predicate {
    if negated {
        Predicate::Not(Box::new(p))
    } else {
        p
    }
}

/// Flatten nested chains of the same connective.
fn join(left: Predicate, right: Predicate, conjunction: bool) -> Vec<Predicate> {
    let mut out = Vec::new();
    for p in [left, right] {
        match p {
            Predicate::And(parts) if conjunction => out.extend(parts),
            Predicate::Or(parts) if !conjunction => out.extend(parts),
            other => out.push(other),
        }
    }
    out
}

fn lower_time_range(f: &Function) -> Result<Predicate, PlanError> {
    let args = function_args(f)?;
    let [column, window] = args.as_slice() else {
        return Err(PlanError::Syntax(
            "TIME_RANGE(column, window) expects 2 arguments".into(),
        ));
    };
    let column = column_name(column)?;
    let window = match literal(window)? {
        Literal::Text(w) => {
            TimeWindow::parse(&w).ok_or_else(|| unsupported(format!("time range `{w}`")))?
        }
        other => return Err(PlanError::Syntax(format!("invalid time range {other:?}"))),
    };
    Ok(Predicate::TimeRange { column, window })
}

fn function_args(f: &Function) -> Result<Vec<&Expr>, PlanError> {
    f.args
        .iter()
        .map(|arg| match arg {
            FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Ok(e),
            _ => Err(unsupported(format!("argument `{arg}` to `{}`", f.name))),
        })
        .collect()
}

/// `'%text%'` → `text`. Any other wildcard placement is unsupported.
fn like_needle(pattern: &Expr) -> Result<String, PlanError> {
    let Literal::Text(p) = literal(pattern)? else {
        return Err(PlanError::Syntax("LIKE pattern must be a string".into()));
    };
    let needle = p
        .strip_prefix('%')
        .and_then(|rest| rest.strip_suffix('%'))
        .filter(|inner| !inner.contains('%'))
        .ok_or_else(|| unsupported(format!("LIKE pattern '{p}' (only '%text%' is supported)")))?;
    Ok(needle.to_string())
}

/// `column <op> literal`, in either order.
fn comparison(left: &Expr, right: &Expr) -> Result<(String, Literal), PlanError> {
    if let (Ok(column), Ok(value)) = (column_name(left), literal(right)) {
        return Ok((column, value));
    }
    if let (Ok(value), Ok(column)) = (literal(left), column_name(right)) {
        return Ok((column, value));
    }
    Err(unsupported(format!(
        "comparison `{left}` against `{right}` (expected column and literal)"
    )))
}

fn column_name(expr: &Expr) -> Result<String, PlanError> {
    match expr {
        Expr::Identifier(id) => ident_name(id),
        // `dataset.column`
        Expr::CompoundIdentifier(parts) if parts.len() == 2 => ident_name(&parts[1]),
        Expr::Nested(inner) => column_name(inner),
        Expr::Function(f) => keyword_column(f)
            .ok_or_else(|| unsupported(format!("function `{}` where a column was expected", f.name))),
        other => Err(unsupported(format!("`{other}` where a column was expected"))),
    }
}

/// GenericDialect parses a bare `user` as the zero-argument `USER` function.
/// In log tables it is a column.
fn keyword_column(f: &Function) -> Option<String> {
    let [ident] = f.name.0.as_slice() else {
        return None;
    };
    (f.args.is_empty() && ident.value.eq_ignore_ascii_case("user")).then(|| ident.value.to_lowercase())
}

fn ident_name(id: &Ident) -> Result<String, PlanError> {
    let name = id.value.trim();
    if name.is_empty() {
        return Err(PlanError::Syntax("empty identifier".into()));
    }
    Ok(name.to_string())
}

fn literal(expr: &Expr) -> Result<Literal, PlanError> {
    match expr {
        Expr::Value(v) => match v {
            SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
                Ok(Literal::Text(s.clone()))
            }
            SqlValue::Number(s, _) => s
                .parse::<f64>()
                .map(Literal::Number)
                .map_err(|e| PlanError::Syntax(format!("invalid number `{s}`: {e}"))),
            SqlValue::Boolean(b) => Ok(Literal::Bool(*b)),
            SqlValue::Null => Ok(Literal::Null),
            other => Err(unsupported(format!("literal `{other}`"))),
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Literal::Number(n) => Ok(Literal::Number(-n)),
            _ => Err(PlanError::Syntax("`-` before a non-number".into())),
        },
        // Models often double-quote strings; GenericDialect reads those as identifiers.
        Expr::Identifier(Ident {
            value,
            quote_style: Some('"'),
            ..
        }) => Ok(Literal::Text(value.clone())),
        Expr::Nested(inner) => literal(inner),
        other => Err(unsupported(format!("`{other}` where a literal was expected"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_step(sql: &str) -> PlanStep {
        let mut tree = parse_sql_plan(sql).unwrap();
        assert_eq!(tree.steps.len(), 1);
        tree.steps.remove(0)
    }

    #[test]
    fn select_with_filters_and_limit() {
        let step = one_step(
            "SELECT timestamp, message FROM syslog \
             WHERE message LIKE '%failed login%' AND host <> 'db-01' LIMIT 10",
        );
        assert_eq!(step.dataset, "syslog");
        assert_eq!(
            step.projection,
            Some(vec!["timestamp".to_string(), "message".to_string()])
        );
        assert_eq!(step.limit, Some(10));
        assert_eq!(
            step.filter,
            Some(Predicate::And(vec![
                Predicate::Contains {
                    column: "message".into(),
                    needle: "failed login".into()
                },
                Predicate::NotEq {
                    column: "host".into(),
                    value: Literal::text("db-01")
                },
            ]))
        );
    }

    #[test]
    fn and_chains_flatten_but_or_nests() {
        let step = one_step("SELECT * FROM t WHERE a = 1 AND b = 2 AND (c = 3 OR d = 4)");
        let Some(Predicate::And(parts)) = step.filter else {
            panic!("expected and");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[2], Predicate::Or(p) if p.len() == 2));
    }

    #[test]
    fn in_not_and_reversed_comparisons() {
        let step = one_step(
            "SELECT * FROM network_logs WHERE action NOT IN ('ACCEPT') AND 443 = dest_port AND NOT protocol ILIKE '%udp%'",
        );
        let Some(Predicate::And(parts)) = step.filter else {
            panic!("expected and");
        };
        assert_eq!(
            parts[0],
            Predicate::Not(Box::new(Predicate::In {
                column: "action".into(),
                values: vec![Literal::text("ACCEPT")]
            }))
        );
        assert_eq!(
            parts[1],
            Predicate::Eq {
                column: "dest_port".into(),
                value: Literal::Number(443.0)
            }
        );
        assert!(matches!(&parts[2], Predicate::Not(_)));
    }

    #[test]
    fn count_and_group_by() {
        let step = one_step("SELECT user, COUNT(*) AS attempts FROM app_logs GROUP BY user");
        assert_eq!(step.projection, None);
        assert_eq!(
            step.aggregate,
            Some(Aggregate::Count {
                group_by: Some("user".into()),
                output: "attempts".into()
            })
        );

        let step = one_step("SELECT COUNT(*) FROM syslog");
        assert_eq!(
            step.aggregate,
            Some(Aggregate::Count {
                group_by: None,
                output: "count".into()
            })
        );
    }

    #[test]
    fn time_range_function() {
        let step = one_step("SELECT * FROM syslog WHERE TIME_RANGE(timestamp, 'yesterday')");
        assert_eq!(
            step.filter,
            Some(Predicate::TimeRange {
                column: "timestamp".into(),
                window: TimeWindow::Yesterday
            })
        );
    }

    #[test]
    fn double_quoted_value_is_text() {
        let step = one_step("SELECT * FROM app_logs WHERE level = \"ERROR\"");
        assert_eq!(
            step.filter,
            Some(Predicate::Eq {
                column: "level".into(),
                value: Literal::text("ERROR")
            })
        );
    }

    #[test]
    fn multiple_statements_become_steps() {
        let tree = parse_sql_plan("SELECT * FROM syslog; SELECT * FROM app_logs").unwrap();
        let names: Vec<_> = tree.steps.iter().map(|s| s.dataset.as_str()).collect();
        assert_eq!(names, vec!["syslog", "app_logs"]);
    }

    #[test]
    fn outside_the_subset_is_unsupported() {
        for sql in [
            "SELECT * FROM syslog ORDER BY timestamp",
            "SELECT * FROM syslog s JOIN app_logs a ON s.host = a.host",
            "SELECT * FROM syslog WHERE pid > 5",
            "SELECT * FROM syslog WHERE message LIKE 'boot%'",
            "SELECT DISTINCT host FROM syslog",
            "SELECT host FROM syslog GROUP BY host",
            "SELECT host AS h FROM syslog",
            "SELECT * FROM syslog UNION SELECT * FROM app_logs",
            "SELECT UPPER(host) FROM syslog",
            "DELETE FROM syslog",
        ] {
            assert!(
                matches!(parse_sql_plan(sql), Err(PlanError::Unsupported(_))),
                "{sql}"
            );
        }
    }

    #[test]
    fn malformed_sql_is_a_syntax_error() {
        assert!(matches!(
            parse_sql_plan("SELECT * FROM syslog WHERE"),
            Err(PlanError::Syntax(_))
        ));
    }
}
