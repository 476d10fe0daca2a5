//! Pipeline configuration loaded from the environment.
//!
//! Every setting has a default in [`crate::defaults`]; unparseable values
//! fall back to the default with a warning rather than failing startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::defaults;
use crate::models::Intent;

/// Default intent priority: the first matching category in this list wins.
pub const DEFAULT_INTENT_PRIORITY: [Intent; 4] = [
    Intent::Comparison,
    Intent::Lookalike,
    Intent::Analytical,
    Intent::EntityLookup,
];

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first call.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(defaults::RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(defaults::RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Settings for the query pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Logical database name (part of schema cache keys).
    pub database: String,
    pub schema_version: u64,
    pub schema_ttl: Duration,
    pub introspection_ttl: Duration,
    pub plan_ttl: Duration,
    pub sample_size: usize,
    pub cache_timeout: Duration,
    pub graph_timeout: Duration,
    pub llm_timeout: Duration,
    pub retry: RetryPolicy,
    pub page_limit: i64,
    pub history_turns: usize,
    pub context_token_budget: usize,
    pub summary_max_records: usize,
    pub intent_priority: Vec<Intent>,
    /// YAML/JSON file with static relationship and label notes.
    pub artifacts_path: Option<PathBuf>,
    /// Base URL of the entity-detail service; `None` disables hints.
    pub detail_url: Option<String>,
    pub detail_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: defaults::DATABASE.to_string(),
            schema_version: defaults::SCHEMA_VERSION,
            schema_ttl: Duration::from_secs(defaults::SCHEMA_TTL_SECS),
            introspection_ttl: Duration::from_secs(defaults::INTROSPECTION_TTL_SECS),
            plan_ttl: Duration::from_secs(defaults::PLAN_TTL_SECS),
            sample_size: defaults::SAMPLE_SIZE,
            cache_timeout: Duration::from_millis(defaults::CACHE_TIMEOUT_MS),
            graph_timeout: Duration::from_secs(defaults::GRAPH_TIMEOUT_SECS),
            llm_timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            page_limit: defaults::PAGE_LIMIT,
            history_turns: defaults::HISTORY_TURNS,
            context_token_budget: defaults::CONTEXT_TOKEN_BUDGET,
            summary_max_records: defaults::SUMMARY_MAX_RECORDS,
            intent_priority: DEFAULT_INTENT_PRIORITY.to_vec(),
            artifacts_path: None,
            detail_url: None,
            detail_timeout: Duration::from_millis(defaults::DETAIL_TIMEOUT_MS),
        }
    }
}

impl PipelineConfig {
    /// Create from environment variables.
    ///
    /// Reads `QUIVER_DATABASE`, `QUIVER_SCHEMA_VERSION`, `QUIVER_SCHEMA_TTL_SECS`,
    /// `QUIVER_INTROSPECTION_TTL_SECS`, `QUIVER_PLAN_TTL_SECS`,
    /// `QUIVER_SAMPLE_SIZE`, `QUIVER_CACHE_TIMEOUT_MS`,
    /// `QUIVER_GRAPH_TIMEOUT_SECS`, `QUIVER_LLM_TIMEOUT_SECS`,
    /// `QUIVER_RETRY_ATTEMPTS`, `QUIVER_RETRY_BASE_MS`, `QUIVER_PAGE_LIMIT`,
    /// `QUIVER_HISTORY_TURNS`, `QUIVER_CONTEXT_TOKENS`,
    /// `QUIVER_SUMMARY_MAX_RECORDS`, `QUIVER_INTENT_PRIORITY`,
    /// `QUIVER_SCHEMA_ARTIFACTS`, `QUIVER_DETAIL_URL`, `QUIVER_DETAIL_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        let retry = RetryPolicy {
            max_attempts: env_parse("QUIVER_RETRY_ATTEMPTS", d.retry.max_attempts).max(1),
            base_delay: Duration::from_millis(env_parse(
                "QUIVER_RETRY_BASE_MS",
                defaults::RETRY_BASE_DELAY_MS,
            )),
            max_delay: d.retry.max_delay,
        };

        Self {
            database: std::env::var("QUIVER_DATABASE").unwrap_or(d.database),
            schema_version: env_parse("QUIVER_SCHEMA_VERSION", d.schema_version),
            schema_ttl: Duration::from_secs(env_parse(
                "QUIVER_SCHEMA_TTL_SECS",
                defaults::SCHEMA_TTL_SECS,
            )),
            introspection_ttl: Duration::from_secs(env_parse(
                "QUIVER_INTROSPECTION_TTL_SECS",
                defaults::INTROSPECTION_TTL_SECS,
            )),
            plan_ttl: Duration::from_secs(env_parse(
                "QUIVER_PLAN_TTL_SECS",
                defaults::PLAN_TTL_SECS,
            )),
            sample_size: env_parse("QUIVER_SAMPLE_SIZE", d.sample_size),
            cache_timeout: Duration::from_millis(env_parse(
                "QUIVER_CACHE_TIMEOUT_MS",
                defaults::CACHE_TIMEOUT_MS,
            )),
            graph_timeout: Duration::from_secs(env_parse(
                "QUIVER_GRAPH_TIMEOUT_SECS",
                defaults::GRAPH_TIMEOUT_SECS,
            )),
            llm_timeout: Duration::from_secs(env_parse(
                "QUIVER_LLM_TIMEOUT_SECS",
                defaults::GEN_TIMEOUT_SECS,
            )),
            retry,
            page_limit: env_parse("QUIVER_PAGE_LIMIT", d.page_limit)
                .clamp(1, defaults::PAGE_LIMIT_MAX),
            history_turns: env_parse("QUIVER_HISTORY_TURNS", d.history_turns),
            context_token_budget: env_parse("QUIVER_CONTEXT_TOKENS", d.context_token_budget),
            summary_max_records: env_parse("QUIVER_SUMMARY_MAX_RECORDS", d.summary_max_records),
            intent_priority: std::env::var("QUIVER_INTENT_PRIORITY")
                .ok()
                .and_then(|v| parse_intent_priority(&v))
                .unwrap_or(d.intent_priority),
            artifacts_path: std::env::var("QUIVER_SCHEMA_ARTIFACTS")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            detail_url: std::env::var("QUIVER_DETAIL_URL")
                .ok()
                .filter(|v| !v.is_empty()),
            detail_timeout: Duration::from_millis(env_parse(
                "QUIVER_DETAIL_TIMEOUT_MS",
                defaults::DETAIL_TIMEOUT_MS,
            )),
        }
    }
}

/// Parse a comma-separated priority list.
///
/// Categories missing from the list are appended in default order so the
/// result is always a total order over all four categories. Returns `None`
/// when any entry is unknown.
pub fn parse_intent_priority(raw: &str) -> Option<Vec<Intent>> {
    let mut order = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match Intent::from_str(part) {
            Ok(intent) if !order.contains(&intent) => order.push(intent),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Ignoring QUIVER_INTENT_PRIORITY");
                return None;
            }
        }
    }
    for intent in DEFAULT_INTENT_PRIORITY {
        if !order.contains(&intent) {
            order.push(intent);
        }
    }
    Some(order)
}

fn env_parse<T: FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}
