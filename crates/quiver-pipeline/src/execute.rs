//! Query execution: parameterization, pagination, and comparison fan-out.
//!
//! Every value reaches the graph through the parameter map, including the
//! pagination window. Expanding queries (variable-length patterns or two or
//! more hops) are always bounded; a caller-supplied window bounds any query.

use std::collections::BTreeMap;
use std::mem::discriminant;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, warn};

use quiver_core::{
    defaults, with_retry, with_timeout, Error, ExecutionResult, GeneratedQuery, GraphBackend,
    Intent, PageWindow, ParamValue, Record, Result, RetryPolicy,
};

use crate::params::parameterize;

/// Field added to each record when results of several sub-queries are merged.
pub const CORRELATION_FIELD: &str = "_correlation";

static VARIABLE_LENGTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\*[^\]]*\]").expect("variable length pattern"));

static HOP: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\s*\[[^\]]*\]\s*-").expect("hop pattern"));

static TRAILING_WINDOW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\s+SKIP\s+(?P<skip>\d+|\$\w+))?(?:\s+LIMIT\s+(?P<limit>\d+|\$\w+))?\s*$")
        .expect("window pattern")
});

/// Whether a query can return a number of rows far beyond its anchors.
pub fn is_expander(text: &str) -> bool {
    VARIABLE_LENGTH.is_match(text) || HOP.find_iter(text).count() >= 2
}

/// Query text with its window moved into parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Windowed {
    pub text: String,
    pub skip: i64,
    pub limit: i64,
}

fn window_value(raw: &str, parameters: &BTreeMap<String, ParamValue>) -> Option<i64> {
    match raw.strip_prefix('$') {
        Some(name) => match parameters.get(name) {
            Some(ParamValue::Int(v)) => Some(*v),
            _ => None,
        },
        None => raw.parse().ok(),
    }
}

/// Replace any trailing `SKIP`/`LIMIT` with `SKIP $page_skip LIMIT $page_limit`.
///
/// `None` when the query needs no window: no caller window and not an
/// expander. An existing limit is only ever lowered.
pub fn apply_window(
    text: &str,
    parameters: &BTreeMap<String, ParamValue>,
    window: Option<PageWindow>,
    default_limit: i64,
) -> Option<Windowed> {
    if window.is_none() && !is_expander(text) {
        return None;
    }

    let (base, existing_skip, existing_limit) = match TRAILING_WINDOW.captures(text) {
        Some(caps) => {
            let start = caps.get(0).map(|m| m.start()).unwrap_or(text.len());
            let skip = caps.name("skip").and_then(|m| window_value(m.as_str(), parameters));
            let limit = caps.name("limit").and_then(|m| window_value(m.as_str(), parameters));
            (&text[..start], skip, limit)
        }
        None => (text, None, None),
    };

    let (skip, bound) = match window {
        Some(w) => (w.skip.max(0), w.limit.clamp(1, defaults::PAGE_LIMIT_MAX)),
        None => (
            existing_skip.unwrap_or(defaults::PAGE_OFFSET).max(0),
            default_limit.clamp(1, defaults::PAGE_LIMIT_MAX),
        ),
    };
    let limit = existing_limit.filter(|l| *l > 0).map_or(bound, |l| l.min(bound));

    Some(Windowed {
        text: format!("{} SKIP $page_skip LIMIT $page_limit", base.trim_end()),
        skip,
        limit,
    })
}

/// One sub-query of a fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    pub correlation: Option<String>,
    pub parameters: BTreeMap<String, ParamValue>,
}

/// Split a comparison across every question literal that fits its first
/// bound parameter. A single sub-query otherwise.
pub fn fan_out(
    query: &GeneratedQuery,
    parameters: &BTreeMap<String, ParamValue>,
    literals: &[String],
) -> Vec<SubQuery> {
    let single = || {
        vec![SubQuery {
            correlation: None,
            parameters: parameters.clone(),
        }]
    };
    if query.intent != Intent::Comparison {
        return single();
    }
    let Some(binding) = query.bindings.first() else {
        return single();
    };
    let Some(current) = parameters.get(&binding.param) else {
        return single();
    };

    let values: Vec<(String, ParamValue)> = literals
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            *i == binding.literal_index || !query.bindings.iter().any(|b| b.literal_index == *i)
        })
        .filter_map(|(_, literal)| {
            let value = current.with_text(literal);
            (discriminant(&value) == discriminant(current)).then(|| (literal.clone(), value))
        })
        .collect();
    if values.len() < 2 {
        return single();
    }

    values
        .into_iter()
        .map(|(literal, value)| {
            let mut params = parameters.clone();
            params.insert(binding.param.clone(), value);
            SubQuery {
                correlation: Some(format!("{}={}", binding.param, literal)),
                parameters: params,
            }
        })
        .collect()
}

/// Runs generated queries against the shared graph client.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    graph: Arc<dyn GraphBackend>,
    timeout: Duration,
    retry: RetryPolicy,
    page_limit: i64,
}

impl ExecutionCoordinator {
    pub fn new(
        graph: Arc<dyn GraphBackend>,
        timeout: Duration,
        retry: RetryPolicy,
        page_limit: i64,
    ) -> Self {
        Self {
            graph,
            timeout,
            retry,
            page_limit,
        }
    }

    /// Execute `query`. Any failure after retries is `GRAPH_UNAVAILABLE`.
    #[instrument(skip_all, fields(subsystem = "pipeline", component = "executor", op = "execute", intent = %query.intent))]
    pub async fn execute(
        &self,
        query: &GeneratedQuery,
        literals: &[String],
        window: Option<PageWindow>,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();
        let lifted = parameterize(&query.text, &query.parameters);
        let mut text = lifted.text;
        let mut parameters = lifted.parameters;

        let bound = match apply_window(&text, &parameters, window, self.page_limit) {
            Some(windowed) => {
                parameters.insert("page_skip".to_string(), ParamValue::Int(windowed.skip));
                parameters.insert("page_limit".to_string(), ParamValue::Int(windowed.limit));
                text = windowed.text;
                Some(windowed.limit)
            }
            None if text.contains("$page_limit") => match parameters.get("page_limit") {
                Some(ParamValue::Int(limit)) => Some(*limit),
                _ => None,
            },
            None => None,
        };

        let subs = fan_out(query, &parameters, literals);
        let fanned = subs.len() > 1;
        if fanned {
            debug!(sub_queries = subs.len(), "Fanning out comparison");
        }

        let runs = subs.iter().map(|sub| self.run(&text, &sub.parameters));
        let outcomes = join_all(runs).await;

        let mut records: Vec<Record> = Vec::new();
        let mut truncated = false;
        for (sub, outcome) in subs.iter().zip(outcomes) {
            let rows = outcome.map_err(|e| match e {
                Error::Graph(_) => e,
                other => Error::Graph(other.to_string()),
            })?;
            if bound.is_some_and(|limit| rows.len() as i64 >= limit) {
                truncated = true;
            }
            match (&sub.correlation, fanned) {
                (Some(correlation), true) => records.extend(rows.into_iter().map(|mut row| {
                    row.insert(
                        CORRELATION_FIELD.to_string(),
                        JsonValue::String(correlation.clone()),
                    );
                    row
                })),
                _ => records.extend(rows),
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        if duration_ms > defaults::SLOW_CALL_MS {
            warn!(duration_ms, slow = true, "Slow query execution");
        }
        debug!(
            result_count = records.len(),
            truncated,
            duration_ms,
            "Query executed"
        );

        Ok(ExecutionResult {
            count: records.len(),
            records,
            truncated,
            parameters,
        })
    }

    async fn run(&self, text: &str, parameters: &BTreeMap<String, ParamValue>) -> Result<Vec<Record>> {
        let graph = &self.graph;
        with_retry(&self.retry, "execute", move || {
            with_timeout(self.timeout, "execute", graph.execute(text, parameters))
        })
        .await
    }
}
