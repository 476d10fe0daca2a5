//! In-memory graph backend for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quiver_graph::mock::InMemoryGraph;
//! use serde_json::json;
//!
//! let graph = InMemoryGraph::new()
//!     .with_label("Loan", vec![json!({"id": "L1", "risk_score": 0.9})])
//!     .with_relationship("HAS_LOAN", "Borrower", "Loan", 1);
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use quiver_core::{
    Error, GraphBackend, ParamValue, PropertySchema, PropertyType, Record, RelationshipSchema,
    Result,
};

type Handler = Arc<dyn Fn(&str, &BTreeMap<String, ParamValue>) -> Option<Vec<Record>> + Send + Sync>;

/// One recorded `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedQuery {
    pub text: String,
    pub params: BTreeMap<String, ParamValue>,
}

/// Per-operation call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCalls {
    pub list_labels: usize,
    pub label_properties: usize,
    pub relationship_metadata: usize,
    pub sample_nodes: usize,
    pub execute: usize,
}

#[derive(Default)]
struct Counters {
    list_labels: AtomicUsize,
    label_properties: AtomicUsize,
    relationship_metadata: AtomicUsize,
    sample_nodes: AtomicUsize,
    execute: AtomicUsize,
}

/// Graph backend holding nodes per label, declared relationships, and
/// scripted query handlers. Clones share call counters and the query log.
#[derive(Clone, Default)]
pub struct InMemoryGraph {
    nodes: BTreeMap<String, Vec<Record>>,
    relationships: Vec<RelationshipSchema>,
    handlers: Vec<Handler>,
    executed: Arc<Mutex<Vec<ExecutedQuery>>>,
    counters: Arc<Counters>,
    offline: Arc<AtomicBool>,
    latency: Option<Duration>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label with its nodes. Each node must be a JSON object.
    pub fn with_label(mut self, label: &str, nodes: Vec<JsonValue>) -> Self {
        let records = nodes
            .into_iter()
            .filter_map(|n| match n {
                JsonValue::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.nodes.insert(label.to_string(), records);
        self
    }

    pub fn with_relationship(mut self, rel_type: &str, from: &str, to: &str, count: i64) -> Self {
        self.relationships.push(RelationshipSchema {
            rel_type: rel_type.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            count,
        });
        self
    }

    /// Register a handler for `execute`. Handlers are tried in order; the
    /// first returning `Some` answers the query. Unanswered queries return
    /// no rows.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, &BTreeMap<String, ParamValue>) -> Option<Vec<Record>> + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Answer every query containing `needle` with the nodes of `label`
    /// whose properties equal the bound parameters of the same name.
    pub fn with_lookup(self, needle: &str, label: &str) -> Self {
        let needle = needle.to_string();
        let nodes = self.nodes.get(label).cloned().unwrap_or_default();
        self.with_handler(move |text, params| {
            if !text.contains(&needle) {
                return None;
            }
            Some(
                nodes
                    .iter()
                    .filter(|node| {
                        params.iter().all(|(name, value)| match node.get(name) {
                            Some(found) => json_text(found) == value.as_text(),
                            None => true,
                        })
                    })
                    .cloned()
                    .collect(),
            )
        })
    }

    /// Delay every call, for timeout tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Simulate an outage: every call fails with `GRAPH_UNAVAILABLE`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> GraphCalls {
        let c = &self.counters;
        GraphCalls {
            list_labels: c.list_labels.load(Ordering::SeqCst),
            label_properties: c.label_properties.load(Ordering::SeqCst),
            relationship_metadata: c.relationship_metadata.load(Ordering::SeqCst),
            sample_nodes: c.sample_nodes.load(Ordering::SeqCst),
            execute: c.execute.load(Ordering::SeqCst),
        }
    }

    /// Every `execute` call in order.
    pub fn executed(&self) -> Vec<ExecutedQuery> {
        self
            .executed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn enter(&self, counter: &AtomicUsize) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Graph("in-memory graph offline".to_string()));
        }
        Ok(())
    }
}

fn json_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl GraphBackend for InMemoryGraph {
    async fn list_labels(&self) -> Result<Vec<String>> {
        self.enter(&self.counters.list_labels).await?;
        Ok(self.nodes.keys().cloned().collect())
    }

    async fn label_properties(&self, label: &str) -> Result<Vec<PropertySchema>> {
        self.enter(&self.counters.label_properties).await?;
        let mut kinds: BTreeMap<String, PropertyType> = BTreeMap::new();
        for node in self.nodes.get(label).into_iter().flatten() {
            for (name, value) in node {
                if let Some(kind) = PropertyType::of_value(value) {
                    kinds
                        .entry(name.clone())
                        .and_modify(|k| *k = k.unify(kind))
                        .or_insert(kind);
                }
            }
        }
        Ok(kinds
            .into_iter()
            .map(|(name, kind)| PropertySchema { name, kind })
            .collect())
    }

    async fn count_nodes(&self, label: &str) -> Result<i64> {
        Ok(self.nodes.get(label).map(|n| n.len() as i64).unwrap_or(0))
    }

    async fn relationship_metadata(&self) -> Result<Vec<RelationshipSchema>> {
        self.enter(&self.counters.relationship_metadata).await?;
        Ok(self.relationships.clone())
    }

    async fn sample_nodes(&self, label: &str, limit: usize) -> Result<Vec<Record>> {
        self.enter(&self.counters.sample_nodes).await?;
        Ok(self
            .nodes
            .get(label)
            .map(|n| n.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn execute(
        &self,
        query: &str,
        params: &BTreeMap<String, ParamValue>,
    ) -> Result<Vec<Record>> {
        self
            .executed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ExecutedQuery {
                text: query.to_string(),
                params: params.clone(),
            });
        self.enter(&self.counters.execute).await?;

        let mut rows = self
            .handlers
            .iter()
            .find_map(|h| h(query, params))
            .unwrap_or_default();

        if let Some(ParamValue::Int(skip)) = params.get("page_skip") {
            rows = rows.into_iter().skip((*skip).max(0) as usize).collect();
        }
        if let Some(ParamValue::Int(limit)) = params.get("page_limit") {
            rows.truncate((*limit).max(0) as usize);
        }
        Ok(rows)
    }
}
