//! Query planning with a versioned plan cache.
//!
//! Plans are keyed by `(schema version, intent, masked question, context
//! hash)`, so questions differing only in literal values share one entry.
//! A reused plan is re-bound to the literals of the question at hand and is
//! not validated again. Only validated or repaired plans are stored;
//! rejected and template plans are recomputed on every request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, warn};

use quiver_cache::{keys, CacheLayer};
use quiver_core::{
    defaults, ConversationContext, GenerationParams, GeneratedQuery, Intent, SchemaSnapshot,
};
use quiver_inference::GenerationClient;

use crate::params::{bind_to_question, blank_strings, parameterize, rebind};
use crate::prompts::{plan_prompt, PLAN_SYSTEM};
use crate::slice::SchemaSlice;
use crate::templates;
use crate::validate::Validator;

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("fence pattern"));

static READ_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(MATCH|OPTIONAL\s+MATCH|WITH|UNWIND|CALL|RETURN)\b").expect("start pattern")
});

static WRITE_CLAUSE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(CREATE|MERGE|DELETE|DETACH|SET|REMOVE|DROP)\b").expect("write pattern")
});

/// Extract a single read-only query from model output.
///
/// Strips code fences and trailing semicolons. `None` when nothing usable is
/// left or the text would write to the graph. Quoted values are ignored by
/// the write check.
pub fn clean_query_text(raw: &str) -> Option<String> {
    let body = FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);
    let text = body.trim().trim_end_matches(';').trim();
    if text.is_empty() || !READ_START.is_match(text) || WRITE_CLAUSE.is_match(&blank_strings(text)) {
        return None;
    }
    Some(text.to_string())
}

/// Plan-cache key for a masked, normalized question.
pub fn plan_cache_key(version: u64, intent: Intent, masked: &str, context_hash: &str) -> String {
    let version_text = version.to_string();
    let digest = keys::digest(&[masked, context_hash, &version_text, intent.as_str()]);
    keys::plan_key(version, intent.as_str(), &digest)
}

/// Everything the planner needs for one question.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub question: &'a str,
    /// Normalized question with literals masked.
    pub masked: &'a str,
    pub literals: &'a [String],
    pub intent: Intent,
    pub schema: &'a SchemaSnapshot,
    pub slice: &'a SchemaSlice,
    pub slice_text: &'a str,
    pub context: &'a ConversationContext,
    pub hints: Option<&'a str>,
}

/// Produces one executable query per question. Never fails: every failure
/// path ends in a template query.
#[derive(Clone)]
pub struct PlanGenerator {
    llm: GenerationClient,
    cache: CacheLayer,
    validator: Validator,
    ttl: Duration,
}

impl PlanGenerator {
    pub fn new(llm: GenerationClient, cache: CacheLayer, ttl: Duration) -> Self {
        let validator = Validator::new(llm.clone());
        Self {
            llm,
            cache,
            validator,
            ttl,
        }
    }

    #[instrument(skip_all, fields(subsystem = "pipeline", component = "planner", op = "plan", intent = %req.intent, schema_version = req.schema.version))]
    pub async fn generate(&self, req: &PlanRequest<'_>) -> GeneratedQuery {
        let key = plan_cache_key(
            req.schema.version,
            req.intent,
            req.masked,
            &req.context.context_hash(),
        );

        let computed = AtomicBool::new(false);
        let computed_here = &computed;
        let cached = self
            .cache
            .get_or_compute_if(
                &key,
                self.ttl,
                move || async move {
                    computed_here.store(true, Ordering::SeqCst);
                    Ok(self.plan_fresh(req).await)
                },
                |q: &GeneratedQuery| q.status.is_cacheable() && !q.degraded,
            )
            .await;

        let mut query = match cached {
            Ok(query) => query,
            Err(e) => {
                warn!(error = %e, cache_key = %key, "Plan cache failed, planning directly");
                return self.plan_fresh(req).await;
            }
        };

        if computed.load(Ordering::SeqCst) {
            return query;
        }

        // Reused plan: carry over the shape, take the values from this question.
        // A plan shared from an in-flight request may never have been stored.
        match rebind(
            &query.parameters,
            &query.bindings,
            &query.source_literals,
            req.literals,
        ) {
            Some(parameters) => {
                debug!(cache_key = %key, query_status = query.status.as_str(), "Reusing cached plan");
                query.parameters = parameters;
                query.source_literals = req.literals.to_vec();
                query.from_cache = query.status.is_cacheable() && !query.degraded;
                query
            }
            None => {
                debug!(cache_key = %key, "Cached plan does not carry this question's literals, replanning");
                self.plan_fresh(req).await
            }
        }
    }

    /// Generate, validate, and parameterize without consulting the cache.
    async fn plan_fresh(&self, req: &PlanRequest<'_>) -> GeneratedQuery {
        let prompt = plan_prompt(req.question, req.intent, req.slice_text, req.context, req.hints);
        let params = GenerationParams::with_temperature(defaults::PLAN_TEMPERATURE);

        let raw = match self.llm.complete("plan", PLAN_SYSTEM, &prompt, params).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Plan generation failed, using template");
                return templates::fallback(req.intent, req.slice, req.literals);
            }
        };
        let Some(text) = clean_query_text(&raw) else {
            warn!("Plan output held no usable query, using template");
            return templates::fallback(req.intent, req.slice, req.literals);
        };

        let validated = self
            .validator
            .validate(GeneratedQuery::new(text, req.intent), req.schema, req.slice_text)
            .await;
        let mut query = validated.query;

        let lifted = parameterize(&query.text, &query.parameters);
        query.text = lifted.text;
        query.parameters = lifted.parameters;
        query.bindings = bind_to_question(&query.parameters, req.literals);
        query.source_literals = req.literals.to_vec();
        debug!(
            query_status = query.status.as_str(),
            parameters = query.parameters.len(),
            bindings = query.bindings.len(),
            "Planned query"
        );
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{mask_literals, normalize_question};
    use crate::prompts::{REPAIR_SYSTEM, VALIDATE_SYSTEM};
    use quiver_cache::MemoryBackend;
    use quiver_core::{
        Error, LabelSchema, ParamValue, PropertySchema, PropertyType, QueryStatus,
        RelationshipSchema, RetryPolicy,
    };
    use quiver_graph::SchemaArtifacts;
    use quiver_inference::mock::ScriptedBackend;
    use std::sync::Arc;

    const PLAN: &str = "MATCH (b:Borrower {id: '12345'})-[:HAS_LOAN]->(l:Loan) RETURN l";

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::new(
            "neo4j",
            1,
            vec![
                LabelSchema {
                    name: "Borrower".into(),
                    count: 2,
                    properties: vec![PropertySchema {
                        name: "id".into(),
                        kind: PropertyType::String,
                    }],
                },
                LabelSchema {
                    name: "Loan".into(),
                    count: 3,
                    properties: vec![PropertySchema {
                        name: "id".into(),
                        kind: PropertyType::String,
                    }],
                },
            ],
            vec![RelationshipSchema {
                rel_type: "HAS_LOAN".into(),
                from: "Borrower".into(),
                to: "Loan".into(),
                count: 3,
            }],
        )
    }

    fn generator(backend: &ScriptedBackend) -> (PlanGenerator, Arc<MemoryBackend>) {
        let store = Arc::new(MemoryBackend::new());
        let llm = GenerationClient::new(
            Arc::new(backend.clone()),
            RetryPolicy::none(),
            Duration::from_secs(1),
        );
        let cache = CacheLayer::new(store.clone());
        (PlanGenerator::new(llm, cache, Duration::from_secs(60)), store)
    }

    async fn plan_for(gen: &PlanGenerator, schema: &SchemaSnapshot, question: &str) -> GeneratedQuery {
        let (masked, literals) = mask_literals(question);
        let masked = normalize_question(&masked);
        let slice = SchemaSlice::build(
            schema,
            None,
            &SchemaArtifacts::empty(),
            &normalize_question(question),
            Intent::EntityLookup,
        );
        let slice_text = slice.render();
        let context = ConversationContext::default();
        let req = PlanRequest {
            question,
            masked: &masked,
            literals: &literals,
            intent: Intent::EntityLookup,
            schema,
            slice: &slice,
            slice_text: &slice_text,
            context: &context,
            hints: None,
        };
        gen.generate(&req).await
    }

    #[test]
    fn test_clean_query_text() {
        assert_eq!(
            clean_query_text("```cypher\nMATCH (n) RETURN n;\n```").as_deref(),
            Some("MATCH (n) RETURN n")
        );
        assert_eq!(
            clean_query_text("  optional match (n) return n  ").as_deref(),
            Some("optional match (n) return n")
        );
        assert_eq!(clean_query_text("Sorry, I cannot help"), None);
        assert_eq!(clean_query_text("MATCH (n) DETACH DELETE n"), None);
        assert_eq!(clean_query_text("```\n```"), None);
    }

    #[test]
    fn test_write_keywords_inside_strings_are_values() {
        assert_eq!(
            clean_query_text("MATCH (l:Loan) WHERE l.status = 'set aside' RETURN l").as_deref(),
            Some("MATCH (l:Loan) WHERE l.status = 'set aside' RETURN l")
        );
        assert!(clean_query_text(r#"MATCH (n) WHERE n.note CONTAINS "drop" RETURN n"#).is_some());
        assert_eq!(clean_query_text("MATCH (n) SET n.status = 'open' RETURN n"), None);
    }

    #[test]
    fn test_plan_key_ignores_literals_but_not_context() {
        let a = plan_cache_key(1, Intent::EntityLookup, "loans for borrower <lit>", "c1");
        let b = plan_cache_key(1, Intent::EntityLookup, "loans for borrower <lit>", "c1");
        let c = plan_cache_key(1, Intent::EntityLookup, "loans for borrower <lit>", "c2");
        let d = plan_cache_key(2, Intent::EntityLookup, "loans for borrower <lit>", "c1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.starts_with("plan:v1:entity_lookup:"));
    }

    #[tokio::test]
    async fn test_valid_plan_is_parameterized_and_cached() {
        let backend = ScriptedBackend::new()
            .on(PLAN_SYSTEM, Ok(PLAN.into()))
            .on(VALIDATE_SYSTEM, Ok("VALID".into()));
        let (gen, store) = generator(&backend);
        let schema = schema();

        let q = plan_for(&gen, &schema, "Show loans for borrower 12345").await;
        assert_eq!(q.status, QueryStatus::Valid);
        assert!(!q.from_cache);
        assert!(q.text.contains("{id: $id}"));
        assert_eq!(q.parameters["id"], ParamValue::String("12345".into()));
        assert_eq!(q.bindings.len(), 1);
        assert_eq!(store.len(), 1);

        let again = plan_for(&gen, &schema, "show loans for borrower 67890?").await;
        assert!(again.from_cache);
        assert_eq!(again.text, q.text);
        assert_eq!(again.parameters["id"], ParamValue::String("67890".into()));
        assert_eq!(backend.calls_matching(PLAN_SYSTEM), 1);
        assert_eq!(backend.calls_matching(VALIDATE_SYSTEM), 1);
    }

    #[tokio::test]
    async fn test_rejected_plan_is_not_cached() {
        let backend = ScriptedBackend::new()
            .on(PLAN_SYSTEM, Ok(PLAN.into()))
            .on(VALIDATE_SYSTEM, Ok("syntax error".into()));
        let (gen, store) = generator(&backend);
        let schema = schema();

        let q = plan_for(&gen, &schema, "show loans for borrower 12345").await;
        assert_eq!(q.status, QueryStatus::Rejected);
        assert!(store.is_empty());

        plan_for(&gen, &schema, "show loans for borrower 12345").await;
        assert_eq!(backend.calls_matching(PLAN_SYSTEM), 2);
    }

    #[tokio::test]
    async fn test_repaired_plan_is_cached() {
        let backend = ScriptedBackend::new()
            .on(PLAN_SYSTEM, Ok("MATCH (c:Client {id: '12345'}) RETURN c".into()))
            .on(REPAIR_SYSTEM, Ok(PLAN.into()));
        let (gen, store) = generator(&backend);
        let q = plan_for(&gen, &schema(), "show loans for borrower 12345").await;
        assert_eq!(q.status, QueryStatus::Repaired);
        assert!(q.text.contains("Borrower {id: $id}"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_template() {
        let backend =
            ScriptedBackend::new().on(PLAN_SYSTEM, Err(Error::Inference("model missing".into())));
        let (gen, store) = generator(&backend);
        let q = plan_for(&gen, &schema(), "show loans for borrower 12345").await;
        assert!(q.degraded);
        assert_eq!(q.parameters["value"], ParamValue::String("12345".into()));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unusable_output_falls_back_to_template() {
        let backend = ScriptedBackend::new().on(PLAN_SYSTEM, Ok("I am not sure.".into()));
        let (gen, _) = generator(&backend);
        let q = plan_for(&gen, &schema(), "show loans for borrower 12345").await;
        assert!(q.degraded);
        assert_eq!(backend.calls_matching(VALIDATE_SYSTEM), 0);
    }

    #[tokio::test]
    async fn test_changed_inline_literal_replans() {
        let backend = ScriptedBackend::new()
            .on(
                PLAN_SYSTEM,
                Ok("MATCH (b:Borrower {id: '12345'})-[:HAS_LOAN]->(l:Loan) RETURN l LIMIT 5".into()),
            )
            .on(VALIDATE_SYSTEM, Ok("VALID".into()));
        let (gen, _) = generator(&backend);
        let schema = schema();

        let first = plan_for(&gen, &schema, "top 5 loans for borrower 12345").await;
        assert_eq!(first.status, QueryStatus::Valid);
        assert_eq!(first.source_literals, vec!["5".to_string(), "12345".to_string()]);

        let other_borrower = plan_for(&gen, &schema, "top 5 loans for borrower 67890").await;
        assert!(other_borrower.from_cache);
        assert_eq!(other_borrower.parameters["id"], ParamValue::String("67890".into()));
        assert_eq!(backend.calls_matching(PLAN_SYSTEM), 1);

        let larger = plan_for(&gen, &schema, "top 50 loans for borrower 12345").await;
        assert!(!larger.from_cache);
        assert_eq!(backend.calls_matching(PLAN_SYSTEM), 2);
    }

    #[tokio::test]
    async fn test_value_not_from_question_is_never_rebound() {
        let backend = ScriptedBackend::new()
            .on(
                PLAN_SYSTEM,
                Ok("MATCH (b:Borrower {id: 'B-12345'})-[:HAS_LOAN]->(l:Loan) RETURN l".into()),
            )
            .on(VALIDATE_SYSTEM, Ok("VALID".into()));
        let (gen, _) = generator(&backend);
        let schema = schema();

        let first = plan_for(&gen, &schema, "show loans for borrower 12345").await;
        assert!(first.bindings.is_empty());

        let same = plan_for(&gen, &schema, "show loans for borrower 12345").await;
        assert!(same.from_cache);

        let other = plan_for(&gen, &schema, "show loans for borrower 67890").await;
        assert!(!other.from_cache);
        assert_eq!(backend.calls_matching(PLAN_SYSTEM), 2);
    }

    #[tokio::test]
    async fn test_shared_rejected_plan_is_not_marked_cached() {
        let backend = ScriptedBackend::new()
            .on(PLAN_SYSTEM, Ok(PLAN.into()))
            .on(VALIDATE_SYSTEM, Ok("syntax error".into()))
            .with_latency(Duration::from_millis(50));
        let (gen, store) = generator(&backend);
        let schema = schema();

        let (a, b) = tokio::join!(
            plan_for(&gen, &schema, "show loans for borrower 12345"),
            plan_for(&gen, &schema, "show loans for borrower 12345"),
        );
        assert_eq!(backend.calls_matching(PLAN_SYSTEM), 1);
        assert_eq!(a.status, QueryStatus::Rejected);
        assert_eq!(b.status, QueryStatus::Rejected);
        assert!(!a.from_cache);
        assert!(!b.from_cache);
        assert!(store.is_empty());
    }
}
