//! Security insights over result sets: counters, pattern flags, and the actors
//! (addresses, users, endpoints) seen in the matched records.

use crate::dataset::{record_text, Record, Value};
use crate::result::ExecutionResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named list of case-insensitive substrings.
#[derive(Debug, Clone, Copy)]
pub struct PatternCategory {
    pub name: &'static str,
    pub patterns: &'static [&'static str],
}

impl PatternCategory {
    /// `text` must already be lowercased.
    pub fn matches(&self, text: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| text.contains(&p.to_lowercase()))
    }
}

pub const FAILED_LOGINS: &str = "failed_logins";
pub const SQL_INJECTION: &str = "sql_injection";
pub const SUSPICIOUS_IPS: &str = "suspicious_ips";
pub const SYSTEM_WARNINGS: &str = "system_warnings";
pub const NETWORK_ATTACKS: &str = "network_attacks";

/// Security pattern categories, in reporting order.
pub const PATTERN_CATEGORIES: &[PatternCategory] = &[
    PatternCategory {
        name: FAILED_LOGINS,
        patterns: &[
            "failed login",
            "authentication failed",
            "login failed",
            "invalid password",
            "access denied",
        ],
    },
    PatternCategory {
        name: SQL_INJECTION,
        patterns: &[
            "sql injection",
            "' or '1'='1",
            "' or 1=1",
            "'; drop table",
            "union select",
            "or 1=1",
        ],
    },
    PatternCategory {
        name: SUSPICIOUS_IPS,
        patterns: &["external", "unknown", "blocked", "malicious"],
    },
    PatternCategory {
        name: SYSTEM_WARNINGS,
        patterns: &[
            "disk space",
            "memory low",
            "cpu high",
            "warning",
            "error",
            "critical",
            "failed",
        ],
    },
    PatternCategory {
        name: NETWORK_ATTACKS,
        patterns: &[
            "port scan",
            "brute force",
            "ddos",
            "flood",
            "reconnaissance",
            "exploit",
        ],
    },
];

pub const ACTION_FIELD: &str = "action";
pub const BLOCKED_ACTIONS: &[&str] = &["DROP", "REJECT", "BLOCK", "BLOCKED", "DENY"];

/// Address-like fields, in correlation-key priority order.
pub const ADDRESS_FIELDS: &[&str] = &["src_ip", "dest_ip", "ip", "client_ip", "source_ip"];
pub const USER_FIELDS: &[&str] = &["user", "username", "user_id"];
pub const ENDPOINT_FIELDS: &[&str] = &["endpoint", "path", "url"];

/// First present value among `fields`, as text.
pub fn first_present(record: &Record, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|f| record.get(*f))
        .find(|v| v.is_present())
        .map(|v| v.to_string().trim().to_string())
}

fn present_values<'a>(record: &'a Record, fields: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
    fields
        .iter()
        .filter_map(|f| record.get(*f))
        .filter(|v| v.is_present())
        .map(|v| v.to_string().trim().to_string())
}

fn is_blocked(record: &Record) -> bool {
    match record.get(ACTION_FIELD) {
        Some(Value::Text(action)) => {
            let action = action.trim();
            BLOCKED_ACTIONS.iter().any(|b| b.eq_ignore_ascii_case(action))
        }
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightReport {
    pub total_events: usize,
    pub security_events: usize,
    /// One entry per pattern category, in [`PATTERN_CATEGORIES`] order.
    pub categories: Vec<CategoryCount>,
    pub blocked_connections: usize,
    pub suspicious_ips: BTreeSet<String>,
    pub affected_users: BTreeSet<String>,
    pub critical_endpoints: BTreeSet<String>,
    pub analyzed_datasets: BTreeSet<String>,
}

impl Default for InsightReport {
    fn default() -> Self {
        Self {
            total_events: 0,
            security_events: 0,
            categories: PATTERN_CATEGORIES
                .iter()
                .map(|c| CategoryCount {
                    category: c.name.to_string(),
                    count: 0,
                })
                .collect(),
            blocked_connections: 0,
            suspicious_ips: BTreeSet::new(),
            affected_users: BTreeSet::new(),
            critical_endpoints: BTreeSet::new(),
            analyzed_datasets: BTreeSet::new(),
        }
    }
}

impl InsightReport {
    /// Analyze every successful result set. Failed results are skipped.
    pub fn analyze(results: &ExecutionResult) -> Self {
        let mut report = Self::default();
        for (name, result) in results.iter().filter(|(_, r)| r.success) {
            report.observe_dataset(name, &result.columns, &result.rows);
        }
        report
    }

    /// Fold one dataset's records into the report.
    pub fn observe_dataset(&mut self, dataset: &str, columns: &[String], rows: &[Record]) {
        self.analyzed_datasets.insert(dataset.to_string());
        for record in rows {
            self.observe_record(columns, record);
        }
    }

    fn observe_record(&mut self, columns: &[String], record: &Record) {
        self.total_events += 1;

        let text = record_text(columns, record);
        for (slot, category) in self.categories.iter_mut().zip(PATTERN_CATEGORIES) {
            if category.matches(&text) {
                slot.count += 1;
                self.security_events += 1;
            }
        }

        if is_blocked(record) {
            self.blocked_connections += 1;
            self.security_events += 1;
        }

        self.suspicious_ips.extend(present_values(record, ADDRESS_FIELDS));
        self.affected_users.extend(present_values(record, USER_FIELDS));
        self.critical_endpoints.extend(present_values(record, ENDPOINT_FIELDS));
    }

    /// Combine two reports over disjoint inputs.
    pub fn merge(mut self, other: InsightReport) -> Self {
        self.total_events += other.total_events;
        self.security_events += other.security_events;
        self.blocked_connections += other.blocked_connections;
        for (mine, theirs) in self.categories.iter_mut().zip(other.categories) {
            mine.count += theirs.count;
        }
        self.suspicious_ips.extend(other.suspicious_ips);
        self.affected_users.extend(other.affected_users);
        self.critical_endpoints.extend(other.critical_endpoints);
        self.analyzed_datasets.extend(other.analyzed_datasets);
        self
    }

    pub fn category_count(&self, category: &str) -> usize {
        self.categories
            .iter()
            .find(|c| c.category == category)
            .map(|c| c.count)
            .unwrap_or(0)
    }

    pub fn failed_logins(&self) -> usize {
        self.category_count(FAILED_LOGINS)
    }

    pub fn sql_injections(&self) -> usize {
        self.category_count(SQL_INJECTION)
    }

    pub fn system_warnings(&self) -> usize {
        self.category_count(SYSTEM_WARNINGS)
    }

    pub fn network_attacks(&self) -> usize {
        self.category_count(NETWORK_ATTACKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::DatasetResult;
    use crate::testing::{network_fixture, record, syslog_fixture};

    fn results_of(name: &str, ds: crate::dataset::Dataset) -> ExecutionResult {
        let mut out = ExecutionResult::new();
        out.insert(
            name.to_string(),
            DatasetResult::ok(ds.columns().to_vec(), ds.into_rows()),
        );
        out
    }

    #[test]
    fn syslog_fixture_has_one_failed_login() {
        let report = InsightReport::analyze(&results_of("syslog", syslog_fixture()));
        assert_eq!(report.total_events, 3);
        assert_eq!(report.failed_logins(), 1);
        assert_eq!(report.sql_injections(), 0);
        // "Failed login" also carries the generic "failed" warning marker.
        assert_eq!(report.system_warnings(), 1);
        assert_eq!(report.security_events, 2);
        assert_eq!(report.analyzed_datasets.len(), 1);
    }

    #[test]
    fn blocked_actions_and_addresses_are_tracked() {
        let report = InsightReport::analyze(&results_of("network_logs", network_fixture()));
        assert_eq!(report.blocked_connections, 1);
        assert_eq!(
            report.suspicious_ips.iter().collect::<Vec<_>>(),
            vec!["10.0.0.5", "10.0.0.9", "203.0.113.7"]
        );
    }

    #[test]
    fn blocked_matching_ignores_case() {
        let mut report = InsightReport::default();
        let cols = vec!["action".to_string()];
        report.observe_dataset("fw", &cols, &[record(&[("action", "deny".into())])]);
        report.observe_dataset("fw", &cols, &[record(&[("action", "allow".into())])]);
        assert_eq!(report.blocked_connections, 1);
        assert_eq!(report.total_events, 2);
    }

    #[test]
    fn sql_injection_patterns_match_case_insensitively() {
        let mut report = InsightReport::default();
        let cols = vec!["message".to_string()];
        report.observe_dataset(
            "app_logs",
            &cols,
            &[record(&[("message", "id=1' OR '1'='1".into())])],
        );
        assert_eq!(report.sql_injections(), 1);
    }

    #[test]
    fn failed_results_are_skipped() {
        let mut results = results_of("syslog", syslog_fixture());
        results.insert("app_logs".into(), DatasetResult::failed("unavailable"));
        let report = InsightReport::analyze(&results);
        assert_eq!(report.total_events, 3);
        assert!(!report.analyzed_datasets.contains("app_logs"));
    }

    #[test]
    fn categories_keep_their_order() {
        let names: Vec<_> = InsightReport::default()
            .categories
            .into_iter()
            .map(|c| c.category)
            .collect();
        assert_eq!(
            names,
            vec![FAILED_LOGINS, SQL_INJECTION, SUSPICIOUS_IPS, SYSTEM_WARNINGS, NETWORK_ATTACKS]
        );
    }
}
