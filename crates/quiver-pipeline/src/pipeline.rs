//! End-to-end question answering.
//!
//! ```text
//! question ─► history ─► schema + introspection ─► intent ─► slice
//!          ─► hints ─► plan (cache │ LLM → validate → repair │ template)
//!          ─► execute ─► summarize ─► append turn
//! ```
//!
//! Only an empty question, a schema or introspection failure, and an
//! execution failure end a request with an error. Everything else degrades
//! and is reported in [`Degradation`].

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use quiver_core::{
    build_context, Answer, Degradation, Error, PageWindow, QueryStatus, Result, Turn,
};

use crate::context::AppContext;
use crate::execute::ExecutionCoordinator;
use crate::intent::{mask_literals, normalize_question, IntentClassifier};
use crate::plan::{PlanGenerator, PlanRequest};
use crate::slice::SchemaSlice;
use crate::summarize::ResponseSummarizer;

pub struct QueryPipeline {
    ctx: Arc<AppContext>,
    classifier: IntentClassifier,
    planner: PlanGenerator,
    executor: ExecutionCoordinator,
    summarizer: ResponseSummarizer,
}

impl QueryPipeline {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let config = &ctx.config;
        let classifier = IntentClassifier::new(config.intent_priority.clone());
        let planner = PlanGenerator::new(ctx.llm.clone(), ctx.cache.clone(), config.plan_ttl);
        let executor = ExecutionCoordinator::new(
            ctx.graph.clone(),
            config.graph_timeout,
            config.retry,
            config.page_limit,
        );
        let summarizer = ResponseSummarizer::new(ctx.llm.clone(), config.summary_max_records);
        Self {
            ctx,
            classifier,
            planner,
            executor,
            summarizer,
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Answer one question within a conversation session.
    #[instrument(skip_all, fields(subsystem = "pipeline", component = "query_pipeline", op = "answer", session_id = %session_id, request_id = tracing::field::Empty))]
    pub async fn answer(
        &self,
        session_id: &str,
        question: &str,
        window: Option<PageWindow>,
    ) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::InvalidInput("question is empty".to_string()));
        }
        let request_id = Uuid::now_v7();
        Span::current().record("request_id", tracing::field::display(&request_id));
        let start = Instant::now();
        let ctx = &self.ctx;
        let config = &ctx.config;

        let _session = ctx.sessions.acquire(session_id).await;

        let turns = match ctx.history.recent(session_id, config.history_turns).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(error = %e, "History unavailable, answering without context");
                Vec::new()
            }
        };
        let context = build_context(session_id, &turns, config.context_token_budget);

        let version = ctx.catalog.current_version();
        let schema = ctx.catalog.get_schema(version).await.inspect_err(|e| {
            error!(error = %e, code = e.code(), "Schema unavailable");
        })?;
        let report = ctx
            .introspector
            .infer(config.sample_size, version)
            .await
            .inspect_err(|e| {
                error!(error = %e, code = e.code(), "Introspection unavailable");
            })?;

        let (masked, literals) = mask_literals(question);
        let masked = normalize_question(&masked);
        let normalized = normalize_question(question);
        let intent = self.classifier.classify(&normalized, schema.field_to_entity());
        debug!(intent = %intent, literals = literals.len(), "Classified question");

        let slice = SchemaSlice::build(&schema, Some(&report), &ctx.artifacts, &normalized, intent);
        let slice_text = slice.render();

        let hints = ctx.details.hints(&literals).await;
        let hints_text = hints.hints().map(|h| h.render());

        let request = PlanRequest {
            question,
            masked: &masked,
            literals: &literals,
            intent,
            schema: &schema,
            slice: &slice,
            slice_text: &slice_text,
            context: &context,
            hints: hints_text.as_deref(),
        };
        let query = self.planner.generate(&request).await;

        let result = self
            .executor
            .execute(&query, &literals, window)
            .await
            .inspect_err(|e| {
                error!(error = %e, code = e.code(), "Query execution failed");
            })?;

        let summary = match self.summarizer.summarize(question, &slice_text, &result).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, code = e.code(), "Summary unavailable, returning raw results");
                None
            }
        };

        let degradation = Degradation {
            plan_fallback: query.degraded,
            validation_best_effort: query.status == QueryStatus::Rejected,
            hints_unavailable: hints.is_unavailable(),
            summary_unavailable: summary.is_none(),
        };

        let answer_text = summary
            .as_ref()
            .map(|s| s.text.clone())
            .unwrap_or_else(|| format!("{} rows", result.count));
        if let Err(e) = ctx
            .history
            .append(session_id, Turn::new(question, answer_text))
            .await
        {
            warn!(error = %e, "Failed to append conversation turn");
        }

        info!(
            intent = %intent,
            query_status = query.status.as_str(),
            from_cache = query.from_cache,
            result_count = result.count,
            degraded = degradation.any(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Answered question"
        );

        Ok(Answer {
            request_id,
            question: question.to_string(),
            intent,
            query,
            result,
            summary,
            degradation,
        })
    }

    /// Build the schema snapshot and introspection report ahead of traffic.
    #[instrument(skip(self), fields(subsystem = "pipeline", component = "query_pipeline", op = "warm"))]
    pub async fn warm(&self) -> Result<()> {
        let start = Instant::now();
        let version = self.ctx.catalog.current_version();
        let schema = self.ctx.catalog.get_schema(version).await?;
        let report = self
            .ctx
            .introspector
            .infer(self.ctx.config.sample_size, version)
            .await?;
        info!(
            schema_version = version,
            labels = schema.labels.len(),
            risk_patterns = report.risk_patterns.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Caches warmed"
        );
        Ok(())
    }

    pub fn shutdown(self) {
        let stats = self.ctx.cache.stats();
        info!(
            subsystem = "pipeline",
            component = "query_pipeline",
            op = "shutdown",
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            cache_errors = stats.errors,
            active_sessions = self.ctx.sessions.active(),
            "Pipeline shutting down"
        );
    }
}
