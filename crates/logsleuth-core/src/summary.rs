//! Natural-language digest of an insight report.

use crate::config::Sampling;
use crate::gateway::{CompletionRequest, LanguageModel, PromptTask};
use crate::insights::InsightReport;
use tracing::{debug, warn};

pub const NO_EVENTS_SUMMARY: &str = "No significant security events found in the analyzed logs.";

/// Deterministic summary built from the counters alone.
pub fn fallback_summary(report: &InsightReport) -> String {
    let parts: Vec<String> = [
        (report.security_events, "Found {} security events"),
        (report.failed_logins(), "{} failed login attempts"),
        (report.sql_injections(), "{} SQL injection attempts"),
        (report.blocked_connections, "{} blocked network connections"),
        (report.system_warnings(), "{} system warnings"),
        (report.network_attacks(), "{} network attack indicators"),
    ]
    .into_iter()
    .filter(|(n, _)| *n > 0)
    .map(|(n, template)| template.replace("{}", &n.to_string()))
    .collect();

    if parts.is_empty() {
        NO_EVENTS_SUMMARY.to_string()
    } else {
        format!("Security analysis complete. {}.", parts.join("; "))
    }
}

fn preview(set: &std::collections::BTreeSet<String>, max: usize) -> String {
    if set.is_empty() {
        return "none".to_string();
    }
    let mut items: Vec<&str> = set.iter().take(max).map(String::as_str).collect();
    if set.len() > max {
        items.push("...");
    }
    items.join(", ")
}

fn summary_prompt(query: &str, report: &InsightReport) -> String {
    format!(
        "You are a security analyst. Write a concise, professional 2-3 sentence summary \
of these log analysis results. Be specific about numbers, users, IPs and events.

Query: {query}

Results:
- Total events analyzed: {total}
- Security events found: {security}
- Failed logins: {failed}
- SQL injection attempts: {sqli}
- Blocked connections: {blocked}
- System warnings: {warnings}
- Network attack indicators: {attacks}
- Addresses ({n_ips}): {ips}
- Users ({n_users}): {users}
- Endpoints ({n_endpoints}): {endpoints}",
        total = report.total_events,
        security = report.security_events,
        failed = report.failed_logins(),
        sqli = report.sql_injections(),
        blocked = report.blocked_connections,
        warnings = report.system_warnings(),
        attacks = report.network_attacks(),
        n_ips = report.suspicious_ips.len(),
        ips = preview(&report.suspicious_ips, 10),
        n_users = report.affected_users.len(),
        users = preview(&report.affected_users, 10),
        n_endpoints = report.critical_endpoints.len(),
        endpoints = preview(&report.critical_endpoints, 10),
    )
}

/// Ask the model for a digest; fall back to [`fallback_summary`] on failure or an empty answer.
pub fn generate_summary(
    model: &dyn LanguageModel,
    query: &str,
    report: &InsightReport,
    sampling: Sampling,
) -> String {
    let request = CompletionRequest::new(PromptTask::Summarize)
        .system(summary_prompt(query, report))
        .user("Generate the security summary.")
        .with_sampling(sampling.temperature, sampling.max_tokens);

    match model.complete(&request) {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            debug!("empty summary from model; using fallback summary");
            fallback_summary(report)
        }
        Err(e) => {
            warn!(error = %e, "summary generation failed; using fallback summary");
            fallback_summary(report)
        }
    }
}
