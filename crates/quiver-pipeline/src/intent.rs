//! Question normalization, literal extraction, and intent classification.
//!
//! Classification is pure and deterministic: every category whose signals
//! fire is collected, and the first one in the configured priority order
//! wins. A question with no signals is treated as analytical.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;

use quiver_core::{Intent, DEFAULT_INTENT_PRIORITY};

/// Placeholder that replaces each literal in a masked question.
pub const LITERAL_MASK: &str = "<lit>";

/// Quoted strings (after start or whitespace), decimals, and tokens
/// containing a digit such as `12345`, `L-17`, or `acct_9`.
static LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|\s)"([^"]+)"|(?:^|\s)'([^']+)'|\b(\d+\.\d+|[\w\-]*\d[\w\-]*)\b"#)
        .expect("literal pattern")
});

static COMPARISON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(compare|compared|comparing|comparison|versus|vs\.?|difference between|differs?|relative to)\b",
    )
    .expect("comparison pattern")
});

static LOOKALIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(similar|similarity|look-?alikes?|look alikes?|resembl\w*|comparable to|most like|same profile as)\b",
    )
    .expect("lookalike pattern")
});

static ANALYTICAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(how many|count|number of|average|avg|mean|median|total|sum|distribution|trend|top|highest|lowest|most|least|percent|percentage|ratio|breakdown|per|grouped by|group by|maximum|minimum|max|min)\b",
    )
    .expect("analytical pattern")
});

static LOOKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(show|find|get|list|display|details?|lookup|look up|who is|what is|fetch)\b")
        .expect("lookup pattern")
});

/// Lower-case, collapse whitespace, and drop trailing punctuation.
pub fn normalize_question(question: &str) -> String {
    let collapsed = question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| matches!(c, '?' | '!' | '.' | ',' | ';' | ':'))
        .trim_end()
        .to_string()
}

/// Replace every literal with [`LITERAL_MASK`], returning the masked text and
/// the literals in order of appearance. Quotes around quoted literals are
/// masked along with the value.
pub fn mask_literals(question: &str) -> (String, Vec<String>) {
    let mut masked = String::with_capacity(question.len());
    let mut literals = Vec::new();
    let mut last = 0;

    for caps in LITERAL.captures_iter(question) {
        let (value, start, end) = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(m), _, _) | (_, Some(m), _) => (m, m.start() - 1, m.end() + 1),
            (_, _, Some(m)) => (m, m.start(), m.end()),
            _ => continue,
        };
        masked.push_str(&question[last..start]);
        masked.push_str(LITERAL_MASK);
        literals.push(value.as_str().to_string());
        last = end;
    }
    masked.push_str(&question[last..]);
    (masked, literals)
}

/// Literals of `question` in order of appearance.
pub fn extract_literals(question: &str) -> Vec<String> {
    mask_literals(question).1
}

/// Word tokens plus naive singular forms.
fn tokens(normalized: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for word in normalized
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
    {
        out.insert(word.to_string());
        if let Some(stem) = word.strip_suffix("ies") {
            out.insert(format!("{}y", stem));
        } else if let Some(stem) = word.strip_suffix("es") {
            out.insert(stem.to_string());
        }
        if let Some(stem) = word.strip_suffix('s') {
            out.insert(stem.to_string());
        }
    }
    out
}

/// Field-index keys mentioned in the question, as whole words or, for
/// `snake_case` keys, as space-separated phrases.
pub fn mentioned_fields<'a>(
    normalized: &str,
    field_index: &'a BTreeMap<String, BTreeSet<String>>,
) -> Vec<&'a str> {
    let words = tokens(normalized);
    field_index
        .keys()
        .filter(|key| {
            words.contains(key.as_str())
                || (key.contains('_')
                    && (normalized.contains(key.as_str())
                        || normalized.contains(&key.replace('_', " "))))
        })
        .map(String::as_str)
        .collect()
}

/// Labels owning any field mentioned in the question.
pub fn mentioned_labels(
    normalized: &str,
    field_index: &BTreeMap<String, BTreeSet<String>>,
) -> BTreeSet<String> {
    mentioned_fields(normalized, field_index)
        .into_iter()
        .filter_map(|key| field_index.get(key))
        .flatten()
        .cloned()
        .collect()
}

/// Whether the question names a label itself, not just one of its properties.
fn mentions_label(normalized: &str, field_index: &BTreeMap<String, BTreeSet<String>>) -> bool {
    mentioned_fields(normalized, field_index).into_iter().any(|key| {
        field_index
            .get(key)
            .map(|labels| labels.iter().any(|l| l.to_lowercase() == key))
            .unwrap_or(false)
    })
}

/// Picks a query category from keyword signals and a priority order.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    priority: Vec<Intent>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_INTENT_PRIORITY.to_vec())
    }
}

impl IntentClassifier {
    /// Categories missing from `priority` are appended in default order.
    pub fn new(priority: Vec<Intent>) -> Self {
        let mut order = Vec::with_capacity(Intent::ALL.len());
        for intent in priority.into_iter().chain(DEFAULT_INTENT_PRIORITY) {
            if !order.contains(&intent) {
                order.push(intent);
            }
        }
        Self { priority: order }
    }

    pub fn priority(&self) -> &[Intent] {
        &self.priority
    }

    /// Every category whose signals fire, in [`Intent::ALL`] order.
    pub fn signals(
        &self,
        normalized: &str,
        field_index: &BTreeMap<String, BTreeSet<String>>,
    ) -> Vec<Intent> {
        let mut found = Vec::new();
        let lookup = LOOKUP.is_match(normalized)
            || !extract_literals(normalized).is_empty()
            || mentions_label(normalized, field_index);
        if lookup {
            found.push(Intent::EntityLookup);
        }
        if ANALYTICAL.is_match(normalized) {
            found.push(Intent::Analytical);
        }
        if COMPARISON.is_match(normalized) {
            found.push(Intent::Comparison);
        }
        if LOOKALIKE.is_match(normalized) {
            found.push(Intent::Lookalike);
        }
        found
    }

    /// First signalled category in priority order; analytical when none fire.
    pub fn classify(
        &self,
        normalized: &str,
        field_index: &BTreeMap<String, BTreeSet<String>>,
    ) -> Intent {
        let signals = self.signals(normalized, field_index);
        self.priority
            .iter()
            .copied()
            .find(|intent| signals.contains(intent))
            .unwrap_or(Intent::Analytical)
    }
}
