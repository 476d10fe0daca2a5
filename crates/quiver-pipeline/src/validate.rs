//! Query validation with a single bounded repair.
//!
//! ```text
//! Generated -> Validating -> Valid
//!                         -> SchemaMismatch -> (one repair) -> Repaired | Rejected
//!                         -> Other          -> Rejected
//! ```
//!
//! A local pre-check against the snapshot catches unknown labels and
//! relationship types without an LLM round-trip. Everything else is decided
//! by one validation call whose answer is classified exactly once.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, warn};

use quiver_core::{defaults, GenerationParams, GeneratedQuery, QueryStatus, SchemaSnapshot};
use quiver_inference::GenerationClient;

use crate::plan::clean_query_text;
use crate::prompts::{repair_prompt, validate_prompt, REPAIR_SYSTEM, VALIDATE_SYSTEM};

/// Reviewer phrases that mean "the query does not fit the schema".
const SCHEMA_MISMATCH_INDICATORS: &[&str] = &[
    "unknown label",
    "unknown relationship",
    "unknown property",
    "type mismatch",
    "not in the schema",
    "does not exist in the schema",
    "no such label",
    "no such relationship",
    "no such property",
];

/// `(n:Label:Other` and `(:Label`
static NODE_LABELS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(\s*[A-Za-z_]?\w*\s*((?::\s*`?[A-Za-z_][\w ]*?`?\s*)+)[\s{)]")
        .expect("node label pattern")
});

/// `[r:TYPE|OTHER` and `[:TYPE*1..3`
static REL_TYPES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\s*[A-Za-z_]?\w*\s*:\s*([`\w|: ]+)").expect("relationship pattern")
});

/// Result of classifying a validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    SchemaMismatch(String),
    Other(String),
}

/// Classify a reviewer response. The only place the response text is read.
pub fn classify_response(response: &str) -> ValidationOutcome {
    let text = response.trim();
    if text == defaults::VALID_MARKER {
        return ValidationOutcome::Valid;
    }
    let lower = text.to_lowercase();
    if SCHEMA_MISMATCH_INDICATORS.iter().any(|i| lower.contains(i)) {
        ValidationOutcome::SchemaMismatch(text.to_string())
    } else {
        ValidationOutcome::Other(text.to_string())
    }
}

/// Labels and relationship types the query references.
pub fn referenced_names(query: &str) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut labels = BTreeSet::new();
    for caps in NODE_LABELS.captures_iter(query) {
        if let Some(group) = caps.get(1) {
            labels.extend(
                group
                    .as_str()
                    .split(':')
                    .map(|s| s.trim().trim_matches('`').trim())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }
    }

    let mut rel_types = BTreeSet::new();
    for caps in REL_TYPES.captures_iter(query) {
        if let Some(group) = caps.get(1) {
            rel_types.extend(
                group
                    .as_str()
                    .split('|')
                    .map(|s| s.trim().trim_start_matches(':').trim().trim_matches('`'))
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }
    }
    (labels, rel_types)
}

/// Local schema check. `Some(detail)` when the query names a label or
/// relationship type the snapshot does not have.
pub fn precheck(query: &str, schema: &SchemaSnapshot) -> Option<String> {
    if schema.labels.is_empty() {
        return None;
    }
    let (labels, rel_types) = referenced_names(query);
    let mut problems = Vec::new();
    for label in labels.iter().filter(|l| !schema.has_label(l)) {
        problems.push(format!("unknown label {}", label));
    }
    for rel in rel_types.iter().filter(|r| !schema.has_relationship(r)) {
        problems.push(format!("unknown relationship {}", rel));
    }
    if problems.is_empty() {
        None
    } else {
        Some(problems.join("; "))
    }
}

/// What validation did to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    /// The query with its final status; repaired text when a repair was accepted.
    pub query: GeneratedQuery,
    pub outcome: ValidationOutcome,
    pub repair_attempted: bool,
}

/// Runs the validate-and-repair state machine.
#[derive(Clone)]
pub struct Validator {
    llm: GenerationClient,
}

impl Validator {
    pub fn new(llm: GenerationClient) -> Self {
        Self { llm }
    }

    #[instrument(skip_all, fields(subsystem = "pipeline", component = "validator", op = "validate", intent = %query.intent))]
    pub async fn validate(
        &self,
        mut query: GeneratedQuery,
        schema: &SchemaSnapshot,
        schema_slice: &str,
    ) -> Validated {
        let outcome = match precheck(&query.text, schema) {
            Some(detail) => ValidationOutcome::SchemaMismatch(detail),
            None => {
                let prompt = validate_prompt(&query.text, schema_slice);
                let params = GenerationParams::with_temperature(defaults::PLAN_TEMPERATURE);
                match self
                    .llm
                    .complete("validate", VALIDATE_SYSTEM, &prompt, params)
                    .await
                {
                    Ok(response) => classify_response(&response),
                    Err(e) => {
                        warn!(error = %e, "Validation call failed, using query best-effort");
                        query.status = QueryStatus::Rejected;
                        return Validated {
                            query,
                            outcome: ValidationOutcome::Other(e.to_string()),
                            repair_attempted: false,
                        };
                    }
                }
            }
        };

        match &outcome {
            ValidationOutcome::Valid => {
                debug!(query_status = "valid", "Query validated");
                query.status = QueryStatus::Valid;
                Validated {
                    query,
                    outcome,
                    repair_attempted: false,
                }
            }
            ValidationOutcome::SchemaMismatch(detail) => {
                debug!(detail = %detail, "Schema mismatch, attempting repair");
                let repaired = self.repair(&query.text, detail, schema_slice).await;
                match repaired {
                    Some(text) => {
                        query.text = text;
                        query.parameters.clear();
                        query.bindings.clear();
                        query.status = QueryStatus::Repaired;
                    }
                    None => query.status = QueryStatus::Rejected,
                }
                Validated {
                    query,
                    outcome,
                    repair_attempted: true,
                }
            }
            ValidationOutcome::Other(detail) => {
                warn!(detail = %detail, "Query rejected, using it best-effort");
                query.status = QueryStatus::Rejected;
                Validated {
                    query,
                    outcome,
                    repair_attempted: false,
                }
            }
        }
    }

    /// The single repair call. `None` when it fails or yields no query.
    async fn repair(&self, query: &str, detail: &str, schema_slice: &str) -> Option<String> {
        let prompt = repair_prompt(query, detail, schema_slice);
        let params = GenerationParams::with_temperature(defaults::PLAN_TEMPERATURE);
        match self.llm.complete("repair", REPAIR_SYSTEM, &prompt, params).await {
            Ok(raw) => {
                let cleaned = clean_query_text(&raw);
                if cleaned.is_none() {
                    warn!("Repair produced no usable query");
                }
                cleaned
            }
            Err(e) => {
                warn!(error = %e, "Repair call failed");
                None
            }
        }
    }
}
