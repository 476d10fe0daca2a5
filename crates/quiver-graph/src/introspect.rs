//! Semantic introspection over sampled nodes.
//!
//! Samples every label of the current schema, derives per-property statistics,
//! then runs three detection passes over the sampled rows only (no further
//! graph round-trips):
//!
//! - **risk patterns**: bounded ratios, bounded scores, and flag properties
//! - **derived features**: `c = a + b`, `a - b`, `a * b`, or `a / b` on every row
//! - **entity relationships**: implicit foreign keys and declared links whose
//!   endpoints were both sampled
//!
//! Reports are cached under `introspection:v<version>:size:<sample_size>`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use quiver_cache::{keys, CacheLayer};
use quiver_core::{
    defaults, with_timeout, DerivationOp, DerivedFeature, EntityRelationshipPattern,
    GraphBackend, IntrospectionReport, LabelStats, PipelineConfig, PropertyStats, PropertyType,
    Record, RelationshipPatternKind, Result, RiskKind, RiskPattern, SchemaSnapshot,
};

use crate::catalog::SchemaCatalog;

/// Name fragments that mark a 0..100 property as a score.
const SCORE_HINTS: &[&str] = &["score", "rating", "grade", "pct", "percent", "risk"];

/// Name fragments that mark a boolean or 0/1 property as a flag.
const FLAG_HINTS: &[&str] = &[
    "flag", "risk", "fraud", "default", "delinquent", "suspicious", "blocked", "watch",
];

pub struct SemanticIntrospector {
    graph: Arc<dyn GraphBackend>,
    cache: CacheLayer,
    catalog: Arc<SchemaCatalog>,
    ttl: Duration,
    timeout: Duration,
    concurrency: usize,
}

impl SemanticIntrospector {
    pub fn new(
        graph: Arc<dyn GraphBackend>,
        cache: CacheLayer,
        catalog: Arc<SchemaCatalog>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            graph,
            cache,
            catalog,
            ttl: config.introspection_ttl,
            timeout: config.graph_timeout,
            concurrency: defaults::INTROSPECTION_CONCURRENCY,
        }
    }

    /// Report for `(sample_size, version)`, sampling the graph on a cache miss.
    #[instrument(skip(self), fields(subsystem = "graph", component = "introspector", op = "infer"))]
    pub async fn infer(&self, sample_size: usize, version: u64) -> Result<IntrospectionReport> {
        let key = keys::introspection_key(version, sample_size);
        self.cache
            .get_or_compute(&key, self.ttl, || self.build(sample_size, version))
            .await
    }

    async fn build(&self, sample_size: usize, version: u64) -> Result<IntrospectionReport> {
        let start = Instant::now();
        let schema = self.catalog.get_schema(version).await?;
        let graph = &self.graph;
        let timeout = self.timeout;

        let samples: BTreeMap<String, Vec<Record>> =
            stream::iter(schema.labels.iter().map(|l| l.name.clone()))
                .map(|label| async move {
                    let rows =
                        with_timeout(timeout, "sample_nodes", graph.sample_nodes(&label, sample_size))
                            .await?;
                    Ok::<_, quiver_core::Error>((label, rows))
                })
                .buffer_unordered(self.concurrency.max(1))
                .try_collect()
                .await?;

        let report = analyze(&schema, &samples, sample_size, version);
        debug!(
            schema_version = version,
            sample_size,
            risk_patterns = report.risk_patterns.len(),
            derived_features = report.derived_features.len(),
            relationship_patterns = report.relationship_patterns.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Built introspection report"
        );
        Ok(report)
    }
}

/// Run every pass over already-sampled rows.
pub fn analyze(
    schema: &SchemaSnapshot,
    samples: &BTreeMap<String, Vec<Record>>,
    sample_size: usize,
    version: u64,
) -> IntrospectionReport {
    let labels: Vec<LabelStats> = schema
        .labels
        .iter()
        .map(|label| {
            let rows = samples.get(&label.name).map(Vec::as_slice).unwrap_or(&[]);
            let declared: Vec<&str> = label.properties.iter().map(|p| p.name.as_str()).collect();
            label_stats(&label.name, &declared, rows)
        })
        .collect();

    let risk_patterns = labels.iter().flat_map(detect_risk_patterns).collect();
    let derived_features = labels
        .iter()
        .flat_map(|stats| {
            let rows = samples.get(&stats.label).map(Vec::as_slice).unwrap_or(&[]);
            detect_derived_features(stats, rows)
        })
        .collect();
    let relationship_patterns = detect_relationship_patterns(schema, &labels, samples);

    IntrospectionReport {
        version,
        sample_size,
        labels,
        risk_patterns,
        derived_features,
        relationship_patterns,
    }
}

/// Type, null, cardinality and range statistics for one label's sample.
pub fn label_stats(label: &str, declared: &[&str], rows: &[Record]) -> LabelStats {
    let mut names: BTreeSet<&str> = declared.iter().copied().collect();
    for row in rows {
        names.extend(row.keys().map(String::as_str));
    }

    let properties = names
        .into_iter()
        .map(|name| {
            let mut kind: Option<PropertyType> = None;
            let mut non_null = 0;
            let mut distinct = BTreeSet::new();
            let mut min: Option<f64> = None;
            let mut max: Option<f64> = None;

            for value in rows.iter().filter_map(|r| r.get(name)) {
                let Some(observed) = PropertyType::of_value(value) else {
                    continue;
                };
                non_null += 1;
                kind = Some(kind.map_or(observed, |k| k.unify(observed)));
                distinct.insert(value.to_string());
                if let Some(n) = numeric(value) {
                    min = Some(min.map_or(n, |m| m.min(n)));
                    max = Some(max.map_or(n, |m| m.max(n)));
                }
            }

            let stats = PropertyStats {
                kind: kind.unwrap_or(PropertyType::Unknown),
                non_null,
                distinct: distinct.len(),
                min,
                max,
            };
            (name.to_string(), stats)
        })
        .collect();

    LabelStats {
        label: label.to_string(),
        sampled: rows.len(),
        properties,
    }
}

fn numeric(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn name_has(name: &str, hints: &[&str]) -> bool {
    let lower = name.to_lowercase();
    lower.starts_with("is_") || lower.starts_with("has_") || hints.iter().any(|h| lower.contains(h))
}

fn score_like(name: &str) -> bool {
    let lower = name.to_lowercase();
    SCORE_HINTS.iter().any(|h| lower.contains(h))
}

/// Bounded ratios in `[0, 1]`, scores in `[0, 100]`, and flags.
pub fn detect_risk_patterns(stats: &LabelStats) -> Vec<RiskPattern> {
    let mut patterns = Vec::new();
    for (name, prop) in &stats.properties {
        if prop.non_null == 0 {
            continue;
        }
        let pattern = |kind| RiskPattern {
            label: stats.label.clone(),
            property: name.clone(),
            kind,
            min: prop.min,
            max: prop.max,
        };

        if prop.kind == PropertyType::Boolean {
            if name_has(name, FLAG_HINTS) {
                patterns.push(pattern(RiskKind::Flag));
            }
            continue;
        }
        if !prop.kind.is_numeric() {
            continue;
        }
        let (Some(min), Some(max)) = (prop.min, prop.max) else {
            continue;
        };

        let zero_one = prop.kind == PropertyType::Integer && min >= 0.0 && max <= 1.0;
        if zero_one && name_has(name, FLAG_HINTS) {
            patterns.push(pattern(RiskKind::Flag));
        } else if min >= 0.0 && max <= 1.0 && !zero_one {
            patterns.push(pattern(RiskKind::BoundedRatio));
        } else if min >= 0.0 && max <= 100.0 && score_like(name) {
            patterns.push(pattern(RiskKind::BoundedScore));
        }
    }
    patterns
}

/// Numeric properties equal to a sum, difference, product or ratio of two
/// others on every sampled row.
pub fn detect_derived_features(stats: &LabelStats, rows: &[Record]) -> Vec<DerivedFeature> {
    if rows.len() < defaults::DERIVED_MIN_ROWS {
        return Vec::new();
    }

    // Columns present and numeric on every row, capped to bound the search.
    let columns: Vec<(&str, Vec<f64>)> = stats
        .properties
        .iter()
        .filter(|(_, p)| p.kind.is_numeric() && p.non_null == rows.len())
        .take(defaults::DERIVED_MAX_PROPERTIES)
        .filter_map(|(name, _)| {
            let values: Option<Vec<f64>> =
                rows.iter().map(|r| r.get(name).and_then(numeric)).collect();
            values.map(|v| (name.as_str(), v))
        })
        .collect();

    let mut features = Vec::new();
    for (target, c) in &columns {
        // A constant target matches too many combinations to be meaningful.
        if c.iter().all(|v| (v - c[0]).abs() <= f64::EPSILON) {
            continue;
        }
        for (i, (left, a)) in columns.iter().enumerate() {
            for (j, (right, b)) in columns.iter().enumerate() {
                if i == j || left == target || right == target {
                    continue;
                }
                for op in [
                    DerivationOp::Sum,
                    DerivationOp::Difference,
                    DerivationOp::Product,
                    DerivationOp::Ratio,
                ] {
                    // Commutative ops are reported once.
                    let commutative = matches!(op, DerivationOp::Sum | DerivationOp::Product);
                    if commutative && i > j {
                        continue;
                    }
                    if holds(op, a, b, c) {
                        features.push(DerivedFeature {
                            label: stats.label.clone(),
                            property: target.to_string(),
                            op,
                            left: left.to_string(),
                            right: right.to_string(),
                        });
                    }
                }
            }
        }
    }
    features
}

fn holds(op: DerivationOp, a: &[f64], b: &[f64], c: &[f64]) -> bool {
    a.iter().zip(b).zip(c).all(|((&x, &y), &z)| {
        let value = match op {
            DerivationOp::Sum => x + y,
            DerivationOp::Difference => x - y,
            DerivationOp::Product => x * y,
            DerivationOp::Ratio if y == 0.0 => return false,
            DerivationOp::Ratio => x / y,
        };
        let scale = value.abs().max(z.abs()).max(1.0);
        (value - z).abs() <= defaults::DERIVED_TOLERANCE * scale
    })
}

fn id_like(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower == "id" || lower == "uuid" || lower.ends_with("_id") || lower.ends_with("_key")
        || lower == "key" || lower == "code"
}

fn value_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_set(rows: &[Record], property: &str) -> BTreeSet<String> {
    rows.iter()
        .filter_map(|r| r.get(property).and_then(value_text))
        .collect()
}

/// Implicit foreign keys and sampled structural links.
pub fn detect_relationship_patterns(
    schema: &SchemaSnapshot,
    stats: &[LabelStats],
    samples: &BTreeMap<String, Vec<Record>>,
) -> Vec<EntityRelationshipPattern> {
    let mut patterns = Vec::new();

    for from in stats {
        let from_rows = samples.get(&from.label).map(Vec::as_slice).unwrap_or(&[]);
        for (from_prop, prop) in &from.properties {
            // A label's own primary identifier never references another label.
            if prop.non_null == 0 || from_prop.eq_ignore_ascii_case("id") {
                continue;
            }
            let lower = from_prop.to_lowercase();
            let values = value_set(from_rows, from_prop);
            if values.is_empty() {
                continue;
            }

            for to in stats.iter().filter(|t| t.label != from.label) {
                let names_target = lower.contains(&to.label.to_lowercase());
                if !names_target && !id_like(from_prop) {
                    continue;
                }
                let to_rows = samples.get(&to.label).map(Vec::as_slice).unwrap_or(&[]);
                for to_prop in to.properties.keys().filter(|p| id_like(p)) {
                    let targets = value_set(to_rows, to_prop);
                    if !targets.is_empty() && values.is_subset(&targets) {
                        patterns.push(EntityRelationshipPattern {
                            kind: RelationshipPatternKind::ImplicitForeignKey,
                            from_label: from.label.clone(),
                            from_property: Some(from_prop.clone()),
                            to_label: to.label.clone(),
                            to_property: Some(to_prop.clone()),
                            rel_type: None,
                        });
                    }
                }
            }
        }
    }

    let sampled = |label: &str| samples.get(label).map(|r| !r.is_empty()).unwrap_or(false);
    for rel in &schema.relationships {
        if sampled(&rel.from) && sampled(&rel.to) {
            patterns.push(EntityRelationshipPattern {
                kind: RelationshipPatternKind::Structural,
                from_label: rel.from.clone(),
                from_property: None,
                to_label: rel.to.clone(),
                to_property: None,
                rel_type: Some(rel.rel_type.clone()),
            });
        }
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::InMemoryGraph;
    use quiver_cache::MemoryBackend;
    use quiver_core::{LabelSchema, RelationshipSchema};
    use serde_json::json;

    fn rows(values: Vec<JsonValue>) -> Vec<Record> {
        values
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn loans() -> Vec<JsonValue> {
        vec![
            json!({"id": "L1", "borrower_id": "12345", "principal": 100.0, "interest": 5.0, "total": 105.0, "risk_score": 0.91, "flagged": true, "credit_score": 71}),
            json!({"id": "L2", "borrower_id": "12345", "principal": 200.0, "interest": 12.5, "total": 212.5, "risk_score": 0.12, "flagged": false, "credit_score": 88}),
            json!({"id": "L3", "borrower_id": "777", "principal": 50.0, "interest": 1.0, "total": 51.0, "risk_score": 0.45, "flagged": false, "credit_score": 40}),
        ]
    }

    #[test]
    fn test_label_stats() {
        let stats = label_stats("Loan", &["closed_at"], &rows(loans()));
        assert_eq!(stats.sampled, 3);
        let score = &stats.properties["risk_score"];
        assert_eq!(score.kind, PropertyType::Float);
        assert_eq!(score.min, Some(0.12));
        assert_eq!(score.max, Some(0.91));
        assert_eq!(stats.properties["borrower_id"].distinct, 2);
        // Declared but never observed.
        assert_eq!(stats.properties["closed_at"].non_null, 0);
    }

    #[test]
    fn test_risk_patterns() {
        let stats = label_stats("Loan", &[], &rows(loans()));
        let patterns = detect_risk_patterns(&stats);
        let kind_of = |p: &str| patterns.iter().find(|r| r.property == p).map(|r| r.kind);

        assert_eq!(kind_of("risk_score"), Some(RiskKind::BoundedRatio));
        assert_eq!(kind_of("flagged"), Some(RiskKind::Flag));
        assert_eq!(kind_of("credit_score"), Some(RiskKind::BoundedScore));
        assert_eq!(kind_of("principal"), None);
    }

    #[test]
    fn test_integer_flag() {
        let stats = label_stats(
            "Account",
            &[],
            &rows(vec![json!({"is_blocked": 0}), json!({"is_blocked": 1})]),
        );
        let patterns = detect_risk_patterns(&stats);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].kind, RiskKind::Flag);
    }

    #[test]
    fn test_derived_sum_detected() {
        let data = rows(loans());
        let stats = label_stats("Loan", &[], &data);
        let features = detect_derived_features(&stats, &data);

        assert!(features.iter().any(|f| f.property == "total"
            && f.op == DerivationOp::Sum
            && f.left == "interest"
            && f.right == "principal"));
        // total - interest = principal
        assert!(features.iter().any(|f| f.property == "principal"
            && f.op == DerivationOp::Difference
            && f.left == "total"
            && f.right == "interest"));
    }

    #[test]
    fn test_derived_needs_min_rows() {
        let data = rows(loans().into_iter().take(2).collect());
        let stats = label_stats("Loan", &[], &data);
        assert!(detect_derived_features(&stats, &data).is_empty());
    }

    #[test]
    fn test_derived_rejects_single_outlier() {
        let mut values = loans();
        values[2]["total"] = json!(99.0);
        let data = rows(values);
        let stats = label_stats("Loan", &[], &data);
        assert!(!detect_derived_features(&stats, &data)
            .iter()
            .any(|f| f.property == "total"));
    }

    fn schema() -> SchemaSnapshot {
        SchemaSnapshot::new(
            "neo4j",
            1,
            vec![
                LabelSchema { name: "Borrower".into(), count: 2, properties: vec![] },
                LabelSchema { name: "Loan".into(), count: 3, properties: vec![] },
                LabelSchema { name: "Branch".into(), count: 0, properties: vec![] },
            ],
            vec![
                RelationshipSchema {
                    rel_type: "HAS_LOAN".into(),
                    from: "Borrower".into(),
                    to: "Loan".into(),
                    count: 3,
                },
                RelationshipSchema {
                    rel_type: "SERVICED_BY".into(),
                    from: "Loan".into(),
                    to: "Branch".into(),
                    count: 0,
                },
            ],
        )
    }

    #[test]
    fn test_relationship_patterns() {
        let mut samples = BTreeMap::new();
        samples.insert("Loan".to_string(), rows(loans()));
        samples.insert(
            "Borrower".to_string(),
            rows(vec![json!({"id": "12345"}), json!({"id": "777"})]),
        );
        samples.insert("Branch".to_string(), Vec::new());
        let stats: Vec<LabelStats> = ["Borrower", "Loan", "Branch"]
            .iter()
            .map(|l| label_stats(l, &[], &samples[*l]))
            .collect();

        let patterns = detect_relationship_patterns(&schema(), &stats, &samples);

        assert!(patterns.iter().any(|p| p.kind == RelationshipPatternKind::ImplicitForeignKey
            && p.from_label == "Loan"
            && p.from_property.as_deref() == Some("borrower_id")
            && p.to_label == "Borrower"
            && p.to_property.as_deref() == Some("id")));
        let structural: Vec<_> = patterns
            .iter()
            .filter(|p| p.kind == RelationshipPatternKind::Structural)
            .collect();
        // Branch has no sampled nodes.
        assert_eq!(structural.len(), 1);
        assert_eq!(structural[0].rel_type.as_deref(), Some("HAS_LOAN"));
    }

    #[tokio::test]
    async fn test_infer_samples_once_per_version_and_size() {
        let graph = InMemoryGraph::new()
            .with_label("Loan", loans())
            .with_label("Borrower", vec![json!({"id": "12345"}), json!({"id": "777"})])
            .with_relationship("HAS_LOAN", "Borrower", "Loan", 3);
        let graph_arc: Arc<dyn GraphBackend> = Arc::new(graph.clone());
        let cache = CacheLayer::new(Arc::new(MemoryBackend::new()));
        let config = PipelineConfig::default();
        let catalog = Arc::new(SchemaCatalog::new(graph_arc.clone(), cache.clone(), &config));
        let introspector = SemanticIntrospector::new(graph_arc, cache, catalog, &config);

        let first = introspector.infer(50, 1).await.unwrap();
        let second = introspector.infer(50, 1).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(graph.calls().sample_nodes, 2);
        assert!(!first.risk_patterns.is_empty());

        // A different sample size is a different report.
        introspector.infer(10, 1).await.unwrap();
        assert_eq!(graph.calls().sample_nodes, 4);
        // The schema itself was built once.
        assert_eq!(graph.calls().list_labels, 1);
    }
}
