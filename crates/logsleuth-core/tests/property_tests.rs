//! Property-based tests for the query pipeline
//!
//! 1. The pipeline never panics and always answers chat, query or error
//! 2. An unreachable model means conversational
//! 3. Unusable selections mean every dataset
//! 4. Malformed plans never execute
//! 5. Keyword search is exactly an OR-substring filter
//! 6. Insight counters are additive
//! 7. Correlation ignores record order

use logsleuth_core::config::Sampling;
use logsleuth_core::correlation::{correlate, CorrelationMode};
use logsleuth_core::dataset::{Dataset, Record, Value};
use logsleuth_core::fallback::keyword_search;
use logsleuth_core::insights::InsightReport;
use logsleuth_core::loader::{InMemoryLoader, LoadedDatasets};
use logsleuth_core::pipeline::{QueryPipeline, ResponseKind};
use logsleuth_core::plan::{parse_plan, QueryPlan};
use logsleuth_core::result::{DatasetResult, ExecutionResult};
use logsleuth_core::selector::select_datasets;
use logsleuth_core::testing::{
    app_fixture, network_fixture, record, syslog_fixture, FailingModel, ScriptedModel,
};
use logsleuth_core::PromptTask;
use proptest::prelude::*;

fn loader() -> InMemoryLoader {
    InMemoryLoader::new()
        .with_dataset("maze_bank", "syslog", syslog_fixture())
        .with_dataset("maze_bank", "network_logs", network_fixture())
        .with_dataset("maze_bank", "app_logs", app_fixture())
}

fn known() -> Vec<String> {
    vec!["syslog".into(), "network_logs".into(), "app_logs".into()]
}

// ============================================================================
// Strategies
// ============================================================================

fn classify_answer() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("data_query".to_string()),
        Just("conversational".to_string()),
        ".{0,20}",
    ]
}

fn selection_answer() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(r#"{"datasets": ["syslog"]}"#.to_string()),
        Just(r#"{"datasets": ["network_logs", "app_logs"], "correlation": "cross_reference_ips"}"#.to_string()),
        Just(r#"["app_logs"]"#.to_string()),
        ".{0,30}",
    ]
}

fn plan_answer() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("SELECT * FROM syslog WHERE message LIKE '%failed%'".to_string()),
        Just("SELECT action, COUNT(*) AS n FROM network_logs GROUP BY action".to_string()),
        Just("SELECT * FROM missing_table".to_string()),
        Just(r#"{"error": "cannot answer"}"#.to_string()),
        Just(r#"{"plan_v1": {"version": 1, "steps": [{"dataset": "app_logs", "where": {"op": "eq", "column": "user", "value": "mallory"}}]}}"#.to_string()),
        ".{0,40}",
    ]
}

fn free_text() -> impl Strategy<Value = String> {
    ".{0,60}"
}

fn lowercase_words() -> impl Strategy<Value = String> {
    "[a-z ]{0,30}"
}

fn message_record() -> impl Strategy<Value = Record> {
    ("[a-z ]{0,16}", "[a-z]{1,4}").prop_map(|(message, host)| {
        record(&[("message", Value::text(message)), ("host", Value::text(host))])
    })
}

fn security_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("failed login for root".to_string()),
        Just("union select password from users".to_string()),
        Just("disk space warning".to_string()),
        Just("port scan detected".to_string()),
        Just("connection from external host".to_string()),
        "[a-z ]{0,12}",
    ]
}

fn insight_record() -> impl Strategy<Value = Record> {
    (
        security_line(),
        prop::sample::select(vec!["DROP", "ACCEPT", "deny", "ALLOW"]),
        prop::sample::select(vec!["10.0.0.1", "10.0.0.2", "203.0.113.7"]),
        prop::sample::select(vec!["alice", "bob", "mallory"]),
    )
        .prop_map(|(message, action, ip, user)| {
            record(&[
                ("message", Value::text(message)),
                ("action", Value::text(action)),
                ("src_ip", Value::text(ip)),
                ("user", Value::text(user)),
            ])
        })
}

fn ok_result(rows: Vec<Record>) -> DatasetResult {
    let columns = Dataset::from_records(rows.clone()).columns().to_vec();
    DatasetResult::ok(columns, rows)
}

// ============================================================================
// Pipeline Totality
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pipeline_always_answers(
        text in free_text(),
        classify in classify_answer(),
        select in selection_answer(),
        plan in plan_answer(),
        keywords in ".{0,30}",
        summary in ".{0,30}",
    ) {
        let model = ScriptedModel::new()
            .on(PromptTask::Classify, classify)
            .on(PromptTask::SelectDatasets, select)
            .on(PromptTask::GeneratePlan, plan)
            .on(PromptTask::Keywords, keywords)
            .on(PromptTask::Summarize, summary)
            .on(PromptTask::Chat, "hello");
        let pipeline = QueryPipeline::from_parts(model, loader());

        let r = pipeline.process_query(&text, "maze_bank");
        match r.kind {
            ResponseKind::Chat => {
                prop_assert!(r.logs.is_none());
                prop_assert!(r.insights.is_none());
            }
            ResponseKind::Query => {
                prop_assert!(r.message.starts_with("Found "));
                let logs = r.logs.as_ref().unwrap();
                prop_assert!(logs.values().any(|d| d.success));
                for d in logs.values() {
                    prop_assert_eq!(d.row_count, d.rows.len());
                }
                prop_assert!(r.insights.is_some());
                prop_assert!(r.summary.is_some());
            }
            ResponseKind::Error => {
                prop_assert!(r.insights.is_none());
                prop_assert!(!r.message.is_empty());
            }
        }
    }

    #[test]
    fn unreachable_model_means_conversational(text in free_text()) {
        let pipeline = QueryPipeline::from_parts(FailingModel::unavailable(), loader());
        let r = pipeline.process_query(&text, "maze_bank");
        prop_assert_eq!(r.kind, ResponseKind::Chat);
        prop_assert!(!r.message.is_empty());
    }
}

// ============================================================================
// Selection And Plans
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn unusable_selection_selects_everything(answer in lowercase_words()) {
        let model = ScriptedModel::new().on(PromptTask::SelectDatasets, answer);
        let selection = select_datasets(&model, "anything", &known(), Sampling::new(0.1, 200));
        prop_assert_eq!(selection.datasets, known());
        prop_assert_eq!(selection.correlation, CorrelationMode::None);
    }

    #[test]
    fn selection_is_a_subset_in_known_order(answer in selection_answer()) {
        let model = ScriptedModel::new().on(PromptTask::SelectDatasets, answer);
        let selection = select_datasets(&model, "anything", &known(), Sampling::new(0.1, 200));
        prop_assert!(!selection.datasets.is_empty());
        let positions: Vec<usize> = selection
            .datasets
            .iter()
            .map(|d| known().iter().position(|k| k == d).unwrap())
            .collect();
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prose_is_never_a_plan(text in lowercase_words()) {
        prop_assume!(!text.trim_start().starts_with("select"));
        prop_assert!(parse_plan(&QueryPlan::new(text)).is_err());
    }
}

// ============================================================================
// Keyword Search
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn keyword_search_is_or_substring_filter(
        rows in prop::collection::vec(message_record(), 0..20),
        keywords in prop::collection::vec("[a-z]{1,3}", 0..4),
    ) {
        let dataset = Dataset::new(vec!["message".into(), "host".into()], rows.clone());
        let mut loaded = LoadedDatasets::new();
        loaded.insert("syslog".into(), Ok(dataset));

        let out = keyword_search(&keywords, &["syslog".to_string()], &loaded, usize::MAX);
        let expected: Vec<Record> = rows
            .into_iter()
            .filter(|r| {
                let fields: Vec<String> = ["message", "host"]
                    .iter()
                    .filter_map(|c| r.get(*c).map(|v| v.to_string()))
                    .collect();
                keywords.iter().any(|k| fields.iter().any(|f| f.contains(k.as_str())))
            })
            .collect();

        prop_assert!(out["syslog"].success);
        prop_assert_eq!(&out["syslog"].rows, &expected);
        prop_assert_eq!(out["syslog"].row_count, expected.len());
    }
}

// ============================================================================
// Insights And Correlation
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn insight_counters_are_additive(
        rows in prop::collection::vec(insight_record(), 0..24),
        split in 0usize..24,
    ) {
        let split = split.min(rows.len());
        let columns = Dataset::from_records(rows.clone()).columns().to_vec();

        let mut whole = InsightReport::default();
        whole.observe_dataset("app_logs", &columns, &rows);

        let mut left = InsightReport::default();
        left.observe_dataset("app_logs", &columns, &rows[..split]);
        let mut right = InsightReport::default();
        right.observe_dataset("app_logs", &columns, &rows[split..]);

        prop_assert_eq!(left.merge(right), whole.clone());
        prop_assert_eq!(whole.total_events, rows.len());
        prop_assert!(whole.security_events >= whole.blocked_connections);
    }

    #[test]
    fn correlation_ignores_record_order(
        (net, shuffled_net) in prop::collection::vec(insight_record(), 0..12)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
        (app, shuffled_app) in prop::collection::vec(insight_record(), 0..12)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
    ) {
        let original: ExecutionResult = [
            ("network_logs".to_string(), ok_result(net)),
            ("app_logs".to_string(), ok_result(app)),
        ]
        .into_iter()
        .collect();
        let shuffled: ExecutionResult = [
            ("app_logs".to_string(), ok_result(shuffled_app)),
            ("network_logs".to_string(), ok_result(shuffled_net)),
        ]
        .into_iter()
        .collect();

        for mode in [CorrelationMode::CrossReferenceIdentifier, CorrelationMode::ActorActivity] {
            let a = correlate(&original, mode).unwrap();
            let b = correlate(&shuffled, mode).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert!(a.entries.windows(2).all(|w| w[0].key < w[1].key));
        }
        prop_assert!(correlate(&original, CorrelationMode::None).is_none());
    }
}
