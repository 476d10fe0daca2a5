//! System prompts and user-prompt builders for every LLM stage.

use std::fmt::Write as _;

use quiver_core::{ConversationContext, Intent, Record};

pub const PLAN_SYSTEM: &str = "You are a Cypher query planner for a Neo4j graph database. \
Write exactly one read-only Cypher query that answers the user's question. \
Use only the node labels, relationship types and properties listed in the schema. \
Write values taken from the question inline as quoted strings or numbers. \
Return only the query, with no explanation and no code fences.";

pub const VALIDATE_SYSTEM: &str = "You are a Cypher query reviewer. \
Check the query against the schema. \
If the query is correct and uses only the listed labels, relationship types and properties, \
answer with the single word VALID. \
Otherwise answer with one line that starts with the kind of problem \
(unknown label, unknown relationship, unknown property, type mismatch, syntax error) \
followed by a short explanation.";

pub const REPAIR_SYSTEM: &str = "You correct Cypher queries that do not match the graph schema. \
Rewrite the query so that it uses only the listed labels, relationship types and properties \
while answering the same question. \
Return only the corrected query, with no explanation and no code fences.";

pub const SUMMARY_SYSTEM: &str = "You summarize graph query results for an analyst. \
Respond with a JSON object of the form \
{\"summary\": \"...\", \"sections\": [{\"title\": \"...\", \"body\": \"...\"}]}. \
Base every statement on the rows provided. If there are no rows, say that nothing matched.";

pub fn plan_prompt(
    question: &str,
    intent: Intent,
    schema_slice: &str,
    context: &ConversationContext,
    hints: Option<&str>,
) -> String {
    let mut prompt = format!("Schema:\n{}\nQuestion category: {}\n", schema_slice, intent);
    if !context.turns.is_empty() {
        let _ = write!(prompt, "\nConversation so far:\n{}\n", context.render());
    }
    if let Some(hints) = hints.filter(|h| !h.is_empty()) {
        let _ = write!(prompt, "\nKnown entities:\n{}\n", hints);
    }
    let _ = write!(prompt, "\nQuestion: {}", question);
    prompt
}

pub fn validate_prompt(query: &str, schema_slice: &str) -> String {
    format!("Schema:\n{}\nQuery:\n{}", schema_slice, query)
}

pub fn repair_prompt(query: &str, problem: &str, schema_slice: &str) -> String {
    format!(
        "Schema:\n{}\nQuery:\n{}\n\nProblem reported by the reviewer:\n{}",
        schema_slice, query, problem
    )
}

/// Rows beyond `max_records` are counted but not shown.
pub fn summary_prompt(
    question: &str,
    schema_slice: &str,
    records: &[Record],
    truncated: bool,
    max_records: usize,
) -> String {
    let shown = records.len().min(max_records);
    let mut prompt = format!("Schema:\n{}\nQuestion: {}\n\n", schema_slice, question);
    let more = if truncated { ", more rows exist" } else { "" };
    let _ = writeln!(prompt, "Rows ({} of {}{}):", shown, records.len(), more);
    for record in records.iter().take(shown) {
        let line = serde_json::to_string(record).unwrap_or_default();
        let _ = writeln!(prompt, "{}", line);
    }
    prompt
}
