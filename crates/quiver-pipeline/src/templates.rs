//! Static query templates used when the planner cannot produce a query.
//!
//! Templates only touch labels and properties present in the slice and bind
//! every value as a parameter, the row limit included. The result is always
//! marked degraded.

use quiver_core::{GeneratedQuery, Intent, LabelSchema, ParamValue, QueryStatus, QuestionBinding};

use crate::slice::SchemaSlice;

const LOOKUP_LIMIT: i64 = 25;

/// Property most likely to identify a node.
fn id_property(label: &LabelSchema) -> Option<&str> {
    let names: Vec<&str> = label.properties.iter().map(|p| p.name.as_str()).collect();
    names
        .iter()
        .find(|n| **n == "id")
        .or_else(|| names.iter().find(|n| n.ends_with("_id") || n.ends_with("id")))
        .or_else(|| names.iter().find(|n| **n == "name"))
        .copied()
}

fn first_numeric(label: &LabelSchema) -> Option<&str> {
    label
        .properties
        .iter()
        .find(|p| p.kind.is_numeric())
        .map(|p| p.name.as_str())
}

/// Build the fallback query for `intent`.
pub fn fallback(intent: Intent, slice: &SchemaSlice, literals: &[String]) -> GeneratedQuery {
    let mut query = match slice.primary_label() {
        None => GeneratedQuery::new(
            "MATCH (n) RETURN labels(n) AS labels, count(*) AS count",
            intent,
        ),
        Some(label) => for_label(intent, label, literals),
    };
    query.status = QueryStatus::Unvalidated;
    query.degraded = true;
    query.source_literals = literals.to_vec();
    query
}

fn for_label(intent: Intent, label: &LabelSchema, literals: &[String]) -> GeneratedQuery {
    let name = &label.name;
    let key = id_property(label);

    match (intent, key, literals.first()) {
        (Intent::EntityLookup | Intent::Lookalike | Intent::Comparison, Some(key), Some(literal)) => {
            let mut query = GeneratedQuery::new(
                format!(
                    "MATCH (n:`{}`) WHERE toString(n.`{}`) = $value RETURN n LIMIT $page_limit",
                    name, key
                ),
                intent,
            );
            query
                .parameters
                .insert("value".to_string(), ParamValue::String(literal.clone()));
            query
                .parameters
                .insert("page_limit".to_string(), ParamValue::Int(LOOKUP_LIMIT));
            query.bindings.push(QuestionBinding {
                param: "value".to_string(),
                literal_index: 0,
            });
            query
        }
        (Intent::Analytical, _, _) => {
            let text = match first_numeric(label) {
                Some(prop) => format!(
                    "MATCH (n:`{}`) RETURN count(n) AS count, avg(n.`{}`) AS avg_{}",
                    name, prop, prop
                ),
                None => format!("MATCH (n:`{}`) RETURN count(n) AS count", name),
            };
            GeneratedQuery::new(text, intent)
        }
        _ => {
            let mut query =
                GeneratedQuery::new(format!("MATCH (n:`{}`) RETURN n LIMIT $page_limit", name), intent);
            query
                .parameters
                .insert("page_limit".to_string(), ParamValue::Int(LOOKUP_LIMIT));
            query
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::{PropertySchema, PropertyType};

    fn slice() -> SchemaSlice {
        SchemaSlice {
            labels: vec![LabelSchema {
                name: "Loan".into(),
                count: 3,
                properties: vec![
                    PropertySchema {
                        name: "amount".into(),
                        kind: PropertyType::Float,
                    },
                    PropertySchema {
                        name: "loan_id".into(),
                        kind: PropertyType::String,
                    },
                ],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_lookup_template_binds_first_literal() {
        let q = fallback(Intent::EntityLookup, &slice(), &["L-17".to_string()]);
        assert_eq!(
            q.text,
            "MATCH (n:`Loan`) WHERE toString(n.`loan_id`) = $value RETURN n LIMIT $page_limit"
        );
        assert_eq!(q.parameters["value"], ParamValue::String("L-17".into()));
        assert_eq!(q.parameters["page_limit"], ParamValue::Int(25));
        assert_eq!(q.source_literals, vec!["L-17".to_string()]);
        assert_eq!(q.bindings.len(), 1);
        assert!(q.degraded);
        assert_eq!(q.status, QueryStatus::Unvalidated);
    }

    #[test]
    fn test_analytical_template_aggregates() {
        let q = fallback(Intent::Analytical, &slice(), &[]);
        assert_eq!(
            q.text,
            "MATCH (n:`Loan`) RETURN count(n) AS count, avg(n.`amount`) AS avg_amount"
        );
        assert!(q.parameters.is_empty());
    }

    #[test]
    fn test_lookup_without_literal_lists_nodes() {
        let q = fallback(Intent::EntityLookup, &slice(), &[]);
        assert_eq!(q.text, "MATCH (n:`Loan`) RETURN n LIMIT $page_limit");
        assert_eq!(q.parameters["page_limit"], ParamValue::Int(25));
        assert!(q.bindings.is_empty());
    }

    #[test]
    fn test_template_limit_is_lowered_by_window() {
        let q = fallback(Intent::EntityLookup, &slice(), &[]);
        let windowed = crate::execute::apply_window(
            &q.text,
            &q.parameters,
            Some(quiver_core::PageWindow { skip: 5, limit: 10 }),
            25,
        )
        .unwrap();
        assert_eq!(windowed.text, "MATCH (n:`Loan`) RETURN n SKIP $page_skip LIMIT $page_limit");
        assert_eq!((windowed.skip, windowed.limit), (5, 10));
    }

    #[test]
    fn test_empty_slice_counts_labels() {
        let q = fallback(Intent::Lookalike, &SchemaSlice::default(), &[]);
        assert!(q.text.contains("labels(n)"));
        assert!(q.degraded);
    }
}
