//! Human-readable terminal output.

use colored::Colorize;
use logsleuth_core::dataset::{DatasetDescriptor, Record};
use logsleuth_core::insights::InsightReport;
use logsleuth_core::pipeline::{PipelineResponse, ResponseKind, SearchPath};
use logsleuth_core::result::ExecutionResult;
use logsleuth_core::CorrelationReport;

/// Rows printed per dataset before eliding.
const MAX_PRINTED_ROWS: usize = 10;

pub fn print_response(r: &PipelineResponse) {
    let label = match r.kind {
        ResponseKind::Chat => "chat".cyan().bold(),
        ResponseKind::Query => "query".green().bold(),
        ResponseKind::Error => "error".red().bold(),
    };
    println!("{label} {}", r.request_id.to_string().dimmed());
    println!("{}", r.message);

    match &r.search {
        Some(SearchPath::Plan) => {
            if let Some(plan) = &r.plan {
                println!("\n{}", "plan".bold());
                for line in plan.trim().lines() {
                    println!("  {line}");
                }
            }
        }
        Some(SearchPath::KeywordFallback { keywords, reason }) => {
            println!(
                "\n{} keyword search for [{}]",
                "fallback:".yellow().bold(),
                keywords.join(", ")
            );
            println!("  {} {}", "→".yellow(), reason);
        }
        None => {}
    }

    if let Some(logs) = &r.logs {
        println!();
        print_results(logs);
    }
    if let Some(insights) = &r.insights {
        println!();
        print_insights(insights);
    }
    if let Some(correlations) = &r.correlations {
        println!();
        print_correlations(correlations);
    }
}

pub fn print_results(results: &ExecutionResult) {
    for (name, result) in results {
        if !result.success {
            println!(
                "{} {}: {}",
                "✗".red(),
                name.bold(),
                result.error.as_deref().unwrap_or("failed")
            );
            continue;
        }
        println!("{} {} ({} rows)", "✓".green(), name.bold(), result.row_count);
        for row in result.rows.iter().take(MAX_PRINTED_ROWS) {
            println!("  {}", render_row(&result.columns, row));
        }
        if result.rows.len() > MAX_PRINTED_ROWS {
            println!("  {}", format!("… {} more", result.rows.len() - MAX_PRINTED_ROWS).dimmed());
        }
    }
}

fn render_row(columns: &[String], row: &Record) -> String {
    columns
        .iter()
        .filter_map(|c| row.get(c).filter(|v| !v.is_null()).map(|v| format!("{}={v}", c.dimmed())))
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_insights(i: &InsightReport) {
    println!(
        "{} {} events, {} security events, {} blocked connections",
        "insights:".bold(),
        i.total_events,
        i.security_events,
        i.blocked_connections
    );
    for c in i.categories.iter().filter(|c| c.count > 0) {
        println!("  {} {}: {}", "→".cyan(), c.category, c.count);
    }
    let sets = [
        ("addresses", &i.suspicious_ips),
        ("users", &i.affected_users),
        ("endpoints", &i.critical_endpoints),
    ];
    for (label, set) in sets {
        if !set.is_empty() {
            let items: Vec<&str> = set.iter().map(String::as_str).collect();
            println!("  {} {label}: {}", "→".cyan(), items.join(", "));
        }
    }
}

fn print_correlations(c: &CorrelationReport) {
    println!("{} {}", "correlation:".bold(), c.mode.as_str());
    if c.is_empty() {
        println!("  {}", "no shared actors".dimmed());
    }
    for e in &c.entries {
        println!(
            "  {} {} ({} events in {})",
            "→".cyan(),
            e.key.bold(),
            e.event_count,
            e.datasets.join(", ")
        );
    }
}

pub fn print_descriptor(d: &DatasetDescriptor) {
    println!("{} ({} rows)", d.name.bold(), d.row_count);
    for c in &d.columns {
        println!("  {} {}", c.name, c.column_type.as_str().dimmed());
    }
}
