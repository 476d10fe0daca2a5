//! End-to-end pipeline behavior over the in-memory graph and a scripted LLM.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Value as JsonValue};

use quiver_cache::MemoryBackend;
use quiver_core::{
    Error, Intent, PageWindow, ParamValue, PipelineConfig, QueryStatus, Record, RetryPolicy,
};
use quiver_graph::mock::InMemoryGraph;
use quiver_inference::mock::ScriptedBackend;
use quiver_pipeline::prompts::{PLAN_SYSTEM, REPAIR_SYSTEM, SUMMARY_SYSTEM, VALIDATE_SYSTEM};
use quiver_pipeline::{AppContext, QueryPipeline};

const QUESTION: &str = "show loans for borrower 12345 flagged as risky";

const PLAN: &str = "```cypher\nMATCH (b:Borrower {id: '12345'})-[:HAS_LOAN]->(l:Loan) WHERE l.flagged RETURN l\n```";

const SUMMARY: &str =
    r#"{"summary": "Borrower 12345 has one flagged loan.", "sections": [{"title": "Loans", "body": "L1 risk 0.91"}]}"#;

fn loans() -> Vec<JsonValue> {
    vec![
        json!({"id": "L1", "borrower_id": "12345", "flagged": true, "risk_score": 0.91, "amount": 12000.0}),
        json!({"id": "L2", "borrower_id": "12345", "flagged": false, "risk_score": 0.12, "amount": 4000.0}),
        json!({"id": "L3", "borrower_id": "67890", "flagged": true, "risk_score": 0.77, "amount": 9000.0}),
    ]
}

fn graph() -> InMemoryGraph {
    let loan_rows: Vec<Record> = loans()
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
    InMemoryGraph::new()
        .with_label(
            "Borrower",
            vec![
                json!({"id": "12345", "name": "Ada"}),
                json!({"id": "67890", "name": "Grace"}),
            ],
        )
        .with_label("Loan", loans())
        .with_relationship("HAS_LOAN", "Borrower", "Loan", 3)
        .with_handler(move |text, params| {
            if !text.contains("HAS_LOAN") {
                return None;
            }
            let id = params.get("id")?.as_text();
            Some(
                loan_rows
                    .iter()
                    .filter(|l| l["borrower_id"] == json!(id) && l["flagged"] == json!(true))
                    .map(|l| {
                        let mut row = Record::new();
                        row.insert("l".into(), JsonValue::Object(l.clone()));
                        row
                    })
                    .collect(),
            )
        })
}

fn happy_llm() -> ScriptedBackend {
    ScriptedBackend::new()
        .on(PLAN_SYSTEM, Ok(PLAN.into()))
        .on(VALIDATE_SYSTEM, Ok("VALID".into()))
        .on(SUMMARY_SYSTEM, Ok(SUMMARY.into()))
}

fn config() -> PipelineConfig {
    PipelineConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        graph_timeout: Duration::from_secs(2),
        llm_timeout: Duration::from_secs(2),
        ..PipelineConfig::default()
    }
}

fn pipeline(graph: &InMemoryGraph, llm: &ScriptedBackend) -> QueryPipeline {
    let ctx = AppContext::new(
        config(),
        Arc::new(graph.clone()),
        Arc::new(MemoryBackend::new()),
        Arc::new(llm.clone()),
    )
    .unwrap();
    QueryPipeline::new(Arc::new(ctx))
}

#[tokio::test]
async fn test_cold_run_then_reissue_computes_nothing() {
    let graph = graph();
    let llm = happy_llm();
    let pipeline = pipeline(&graph, &llm);

    let answer = pipeline.answer("s1", QUESTION, None).await.unwrap();
    assert_eq!(answer.intent, Intent::EntityLookup);
    assert_eq!(answer.query.status, QueryStatus::Valid);
    assert!(!answer.query.from_cache);
    assert_eq!(answer.query.parameters.len(), 1);
    assert_eq!(
        answer.query.parameters["id"],
        ParamValue::String("12345".into())
    );
    assert!(answer.query.text.contains("{id: $id}"));
    assert_eq!(answer.result.count, 1);
    assert_eq!(answer.result.records[0]["l"]["id"], json!("L1"));
    let summary = answer.summary.as_ref().unwrap();
    assert_eq!(summary.text, "Borrower 12345 has one flagged loan.");
    assert_eq!(summary.sections.len(), 1);
    assert!(!answer.degradation.plan_fallback);
    assert!(!answer.degradation.summary_unavailable);

    let calls = graph.calls();
    assert_eq!(calls.list_labels, 1);
    assert_eq!(calls.sample_nodes, 2);
    assert_eq!(llm.calls_matching(PLAN_SYSTEM), 1);
    assert_eq!(llm.calls_matching(VALIDATE_SYSTEM), 1);

    let computations = pipeline.context().cache.stats().computations;

    // A fresh session has the same (empty) context, so every cached layer hits.
    let again = pipeline.answer("s2", QUESTION, None).await.unwrap();
    assert!(again.query.from_cache);
    assert_eq!(again.query.text, answer.query.text);
    assert_eq!(again.query.parameters, answer.query.parameters);
    assert_eq!(pipeline.context().cache.stats().computations, computations);
    assert_eq!(graph.calls().list_labels, 1);
    assert_eq!(graph.calls().sample_nodes, 2);
    assert_eq!(llm.calls_matching(PLAN_SYSTEM), 1);
    assert_eq!(llm.calls_matching(VALIDATE_SYSTEM), 1);
}

#[tokio::test]
async fn test_literal_change_reuses_plan_with_new_parameters() {
    let graph = graph();
    let llm = happy_llm();
    let pipeline = pipeline(&graph, &llm);

    pipeline.answer("s1", QUESTION, None).await.unwrap();
    let other = pipeline
        .answer("s2", "Show loans for borrower 67890 flagged as risky?", None)
        .await
        .unwrap();

    assert!(other.query.from_cache);
    assert_eq!(
        other.query.parameters["id"],
        ParamValue::String("67890".into())
    );
    assert_eq!(other.result.count, 1);
    assert_eq!(other.result.records[0]["l"]["id"], json!("L3"));
    assert_eq!(llm.calls_matching(PLAN_SYSTEM), 1);
}

#[tokio::test]
async fn test_follow_up_in_same_session_plans_again() {
    let graph = graph();
    let llm = happy_llm();
    let pipeline = pipeline(&graph, &llm);

    pipeline.answer("s1", QUESTION, None).await.unwrap();
    let follow_up = pipeline.answer("s1", QUESTION, None).await.unwrap();

    // History changed the context hash, so the plan key differs.
    assert!(!follow_up.query.from_cache);
    assert_eq!(llm.calls_matching(PLAN_SYSTEM), 2);
    let plan_prompt = &llm.calls()[llm.calls().len() - 3].prompt;
    assert!(plan_prompt.contains("Conversation so far:"));

    let turns = pipeline.context().history.recent("s1", 10).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].question, QUESTION);
    assert_eq!(turns[0].answer, "Borrower 12345 has one flagged loan.");
}

#[tokio::test]
async fn test_schema_version_bump_rebuilds_everything() {
    let graph = graph();
    let llm = happy_llm();
    let pipeline = pipeline(&graph, &llm);

    pipeline.answer("s1", QUESTION, None).await.unwrap();
    let next = pipeline.context().catalog.bump_version();
    assert_eq!(next, 2);

    let answer = pipeline.answer("s2", QUESTION, None).await.unwrap();
    assert!(!answer.query.from_cache);
    assert_eq!(graph.calls().list_labels, 2);
    assert_eq!(graph.calls().sample_nodes, 4);
    assert_eq!(llm.calls_matching(PLAN_SYSTEM), 2);
}

#[tokio::test]
async fn test_unknown_label_is_repaired_once_without_validation_call() {
    let graph = graph();
    let llm = ScriptedBackend::new()
        .on(PLAN_SYSTEM, Ok("MATCH (c:Client {id: '12345'})-[:OWNS]->(l:Loan) RETURN l".into()))
        .on(VALIDATE_SYSTEM, Ok("VALID".into()))
        .on(REPAIR_SYSTEM, Ok("MATCH (c:Customer {id: '12345'}) RETURN c".into()))
        .on(SUMMARY_SYSTEM, Ok(SUMMARY.into()));
    let pipeline = pipeline(&graph, &llm);

    let answer = pipeline.answer("s1", QUESTION, None).await.unwrap();
    // The repaired text is accepted as-is, even though it is still wrong.
    assert_eq!(answer.query.status, QueryStatus::Repaired);
    assert!(answer.query.text.starts_with("MATCH (c:Customer {id: $id})"));
    assert_eq!(llm.calls_matching(REPAIR_SYSTEM), 1);
    assert_eq!(llm.calls_matching(VALIDATE_SYSTEM), 0);
    assert_eq!(answer.result.count, 0);
}

#[tokio::test]
async fn test_reviewer_mismatch_is_repaired_once() {
    let graph = graph();
    let llm = ScriptedBackend::new()
        .on(PLAN_SYSTEM, Ok("MATCH (b:Borrower {id: '12345'})-[:HAS_LOAN]->(l:Loan) WHERE l.riskiness > 0.5 RETURN l".into()))
        .on(VALIDATE_SYSTEM, Ok("Unknown property: riskiness is not defined on Loan".into()))
        .on(REPAIR_SYSTEM, Ok(PLAN.into()))
        .on(SUMMARY_SYSTEM, Ok(SUMMARY.into()));
    let pipeline = pipeline(&graph, &llm);

    let answer = pipeline.answer("s1", QUESTION, None).await.unwrap();
    assert_eq!(answer.query.status, QueryStatus::Repaired);
    assert_eq!(answer.result.count, 1);
    assert_eq!(llm.calls_matching(VALIDATE_SYSTEM), 1);
    assert_eq!(llm.calls_matching(REPAIR_SYSTEM), 1);
    assert!(!answer.degradation.validation_best_effort);
}

#[tokio::test]
async fn test_rejected_plan_runs_best_effort_and_is_not_cached() {
    let graph = graph();
    let llm = ScriptedBackend::new()
        .on(PLAN_SYSTEM, Ok(PLAN.into()))
        .on(VALIDATE_SYSTEM, Ok("Syntax error: unexpected WHERE".into()))
        .on(REPAIR_SYSTEM, Ok(PLAN.into()))
        .on(SUMMARY_SYSTEM, Ok(SUMMARY.into()));
    let pipeline = pipeline(&graph, &llm);

    let answer = pipeline.answer("s1", QUESTION, None).await.unwrap();
    assert_eq!(answer.query.status, QueryStatus::Rejected);
    assert!(answer.degradation.validation_best_effort);
    assert_eq!(answer.result.count, 1);
    assert_eq!(llm.calls_matching(REPAIR_SYSTEM), 0);

    let again = pipeline.answer("s2", QUESTION, None).await.unwrap();
    assert!(!again.query.from_cache);
    assert_eq!(llm.calls_matching(PLAN_SYSTEM), 2);
}

#[tokio::test]
async fn test_llm_outage_degrades_to_template_and_raw_results() {
    let graph = graph();
    let llm = ScriptedBackend::new()
        .on(PLAN_SYSTEM, Err(Error::Transient("503".into())))
        .on(SUMMARY_SYSTEM, Err(Error::Transient("503".into())));
    let pipeline = pipeline(&graph, &llm);

    let answer = pipeline.answer("s1", QUESTION, None).await.unwrap();
    assert!(answer.query.degraded);
    assert!(answer.degradation.plan_fallback);
    assert!(answer.degradation.summary_unavailable);
    assert!(answer.summary.is_none());
    assert_eq!(
        answer.query.parameters["value"],
        ParamValue::String("12345".into())
    );
    // Bounded retry: two attempts each for plan and summary.
    assert_eq!(llm.calls_matching(PLAN_SYSTEM), 2);
    assert_eq!(llm.calls_matching(SUMMARY_SYSTEM), 2);
    assert_eq!(llm.calls_matching(VALIDATE_SYSTEM), 0);

    let turns = pipeline.context().history.recent("s1", 5).await.unwrap();
    assert_eq!(turns[0].answer, format!("{} rows", answer.result.count));
}

#[tokio::test]
async fn test_malformed_summary_returns_raw_results() {
    let graph = graph();
    let llm = ScriptedBackend::new()
        .on(PLAN_SYSTEM, Ok(PLAN.into()))
        .on(VALIDATE_SYSTEM, Ok("VALID".into()))
        .on(SUMMARY_SYSTEM, Ok("{\"summary\": \"unterminated".into()));
    let pipeline = pipeline(&graph, &llm);

    let answer = pipeline.answer("s1", QUESTION, None).await.unwrap();
    assert!(answer.summary.is_none());
    assert!(answer.degradation.summary_unavailable);
    assert_eq!(answer.result.count, 1);
}

#[tokio::test]
async fn test_graph_outage() {
    let graph = graph();
    let llm = happy_llm();
    let pipeline = pipeline(&graph, &llm);

    // Cold: the schema cannot be read.
    graph.set_offline(true);
    let err = pipeline.answer("s1", QUESTION, None).await.unwrap_err();
    assert_eq!(err.code(), "GRAPH_UNAVAILABLE");

    // Warm caches still need the graph to execute.
    graph.set_offline(false);
    pipeline.warm().await.unwrap();
    graph.set_offline(true);
    let err = pipeline.answer("s1", QUESTION, None).await.unwrap_err();
    assert_eq!(err.code(), "GRAPH_UNAVAILABLE");
}

#[tokio::test]
async fn test_empty_question_is_rejected() {
    let graph = graph();
    let llm = happy_llm();
    let pipeline = pipeline(&graph, &llm);

    let err = pipeline.answer("s1", "   ", None).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
    assert_eq!(llm.call_count(), 0);
    assert_eq!(graph.calls().list_labels, 0);
}

#[tokio::test]
async fn test_concurrent_questions_share_one_plan() {
    let graph = graph();
    let llm = happy_llm().with_latency(Duration::from_millis(20));
    let pipeline = pipeline(&graph, &llm);

    let sessions: Vec<String> = (0..8).map(|i| format!("session-{}", i)).collect();
    let answers = join_all(
        sessions
            .iter()
            .map(|s| pipeline.answer(s, QUESTION, None)),
    )
    .await;

    for answer in &answers {
        let answer = answer.as_ref().unwrap();
        assert_eq!(
            answer.query.parameters["id"],
            ParamValue::String("12345".into())
        );
    }
    assert_eq!(llm.calls_matching(PLAN_SYSTEM), 1);
    assert_eq!(llm.calls_matching(VALIDATE_SYSTEM), 1);
    assert_eq!(graph.calls().list_labels, 1);
    assert_eq!(graph.calls().sample_nodes, 2);
    assert_eq!(answers.iter().filter(|a| a.as_ref().unwrap().query.from_cache).count(), 7);
}

#[tokio::test]
async fn test_caller_window_is_applied() {
    let graph = graph();
    let llm = happy_llm();
    let pipeline = pipeline(&graph, &llm);

    let answer = pipeline
        .answer("s1", QUESTION, Some(PageWindow { skip: 0, limit: 1 }))
        .await
        .unwrap();
    assert_eq!(answer.result.parameters["page_limit"], ParamValue::Int(1));
    assert!(answer.result.truncated);
    let executed = graph.executed();
    assert!(executed
        .last()
        .unwrap()
        .text
        .ends_with("RETURN l SKIP $page_skip LIMIT $page_limit"));
}
