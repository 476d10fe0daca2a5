//! Schema slicing: the subset of metadata a prompt needs.
//!
//! Labels mentioned in the question (through the field index) are kept with
//! their neighbours across declared relationships. Analytical and comparison
//! questions also get numeric ranges and derived features from introspection.
//! When nothing is mentioned the whole schema is used.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use quiver_core::{
    DerivedFeature, Intent, IntrospectionReport, LabelSchema, RelationshipSchema, RiskKind,
    RiskPattern, SchemaSnapshot,
};
use quiver_graph::SchemaArtifacts;

use crate::intent::mentioned_labels;

/// Observed numeric range of one property.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericRange {
    pub label: String,
    pub property: String,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaSlice {
    pub labels: Vec<LabelSchema>,
    pub relationships: Vec<RelationshipSchema>,
    pub numeric_ranges: Vec<NumericRange>,
    pub risk_patterns: Vec<RiskPattern>,
    pub derived_features: Vec<DerivedFeature>,
    pub notes: Vec<String>,
}

impl SchemaSlice {
    pub fn build(
        schema: &SchemaSnapshot,
        report: Option<&IntrospectionReport>,
        artifacts: &SchemaArtifacts,
        normalized_question: &str,
        intent: Intent,
    ) -> Self {
        let mentioned = mentioned_labels(normalized_question, schema.field_to_entity());

        let (label_names, relationships): (BTreeSet<String>, Vec<RelationshipSchema>) =
            if mentioned.is_empty() {
                (
                    schema.labels.iter().map(|l| l.name.clone()).collect(),
                    schema.relationships.clone(),
                )
            } else {
                let rels: Vec<RelationshipSchema> = schema
                    .relationships
                    .iter()
                    .filter(|r| mentioned.contains(&r.from) || mentioned.contains(&r.to))
                    .cloned()
                    .collect();
                let mut names = mentioned.clone();
                for r in &rels {
                    names.insert(r.from.clone());
                    names.insert(r.to.clone());
                }
                (names, rels)
            };

        let labels: Vec<LabelSchema> = schema
            .labels
            .iter()
            .filter(|l| label_names.contains(&l.name))
            .cloned()
            .collect();

        let quantitative = matches!(intent, Intent::Analytical | Intent::Comparison);
        let mut numeric_ranges = Vec::new();
        let mut risk_patterns = Vec::new();
        let mut derived_features = Vec::new();
        if let Some(report) = report {
            for label in &labels {
                risk_patterns.extend(report.risk_patterns_for(&label.name).cloned());
                if !quantitative {
                    continue;
                }
                derived_features.extend(report.derived_features_for(&label.name).cloned());
                if let Some(stats) = report.stats_for(&label.name) {
                    for (property, s) in &stats.properties {
                        if let (true, Some(min), Some(max)) = (s.kind.is_numeric(), s.min, s.max) {
                            numeric_ranges.push(NumericRange {
                                label: label.name.clone(),
                                property: property.clone(),
                                min,
                                max,
                            });
                        }
                    }
                }
            }
        }

        let label_refs: Vec<&str> = labels.iter().map(|l| l.name.as_str()).collect();
        let rel_refs: Vec<&str> = relationships.iter().map(|r| r.rel_type.as_str()).collect();
        let notes = artifacts.notes_for(&label_refs, &rel_refs, normalized_question);

        Self {
            labels,
            relationships,
            numeric_ranges,
            risk_patterns,
            derived_features,
            notes,
        }
    }

    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }

    /// The label most likely to anchor a query: the most populated one.
    pub fn primary_label(&self) -> Option<&LabelSchema> {
        self.labels
            .iter()
            .max_by_key(|l| l.count)
            .filter(|l| l.count > 0)
            .or_else(|| self.labels.first())
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Compact text form for prompts.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Node labels:\n");
        for label in &self.labels {
            let props: Vec<String> = label
                .properties
                .iter()
                .map(|p| format!("{}: {}", p.name, p.kind.as_str()))
                .collect();
            let _ = writeln!(
                out,
                "- {} ({} nodes): {}",
                label.name,
                label.count,
                props.join(", ")
            );
        }

        if !self.relationships.is_empty() {
            out.push_str("Relationships:\n");
            for r in &self.relationships {
                let _ = writeln!(out, "- (:{})-[:{}]->(:{}) x{}", r.from, r.rel_type, r.to, r.count);
            }
        }

        if !self.numeric_ranges.is_empty() {
            out.push_str("Observed numeric ranges:\n");
            for n in &self.numeric_ranges {
                let _ = writeln!(out, "- {}.{} in [{}, {}]", n.label, n.property, n.min, n.max);
            }
        }

        if !self.risk_patterns.is_empty() {
            out.push_str("Risk indicators:\n");
            for r in &self.risk_patterns {
                let kind = match r.kind {
                    RiskKind::BoundedRatio => "ratio in [0, 1]",
                    RiskKind::BoundedScore => "score in [0, 100]",
                    RiskKind::Flag => "flag",
                };
                let _ = writeln!(out, "- {}.{}: {}", r.label, r.property, kind);
            }
        }

        if !self.derived_features.is_empty() {
            out.push_str("Derived properties:\n");
            for d in &self.derived_features {
                let _ = writeln!(
                    out,
                    "- {}.{} = {} {} {}",
                    d.label,
                    d.property,
                    d.left,
                    d.op.symbol(),
                    d.right
                );
            }
        }

        if !self.notes.is_empty() {
            out.push_str("Notes:\n");
            for note in &self.notes {
                let _ = writeln!(out, "- {}", note);
            }
        }
        out
    }
}
