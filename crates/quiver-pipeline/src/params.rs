//! Literal parameterization and question binding.
//!
//! Generated queries carry values inline. Before execution or caching they
//! are rewritten so every value travels in the parameter map:
//!
//! - property-map entries: `{id: '12345'}` becomes `{id: $id}`
//! - comparisons: `n.score >= 0.8`, `<>`, `CONTAINS`, `STARTS WITH`, `ENDS WITH`
//!
//! Parameters are named after the property and suffixed (`id_2`) on
//! collision. Running the rewrite twice changes nothing.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use quiver_core::{ParamValue, QuestionBinding};

/// Parameter names owned by pagination.
pub const RESERVED_PARAMS: [&str; 2] = ["page_skip", "page_limit"];

const LITERAL: &str = r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?\b|(?i:true|false)\b"#;

static MAP_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?P<key>[A-Za-z_]\w*)\s*:\s*(?P<lit>{})", LITERAL)).expect("map pattern")
});

static COMPARISON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?P<lhs>\b[A-Za-z_]\w*\.(?P<prop>[A-Za-z_]\w*))\s*(?P<op>>=|<=|<>|!=|=|<|>|(?i:contains|starts\s+with|ends\s+with))\s*(?P<lit>{})",
        LITERAL
    ))
    .expect("comparison pattern")
});

/// Query text with values lifted into parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameterized {
    pub text: String,
    pub parameters: BTreeMap<String, ParamValue>,
}

/// Rewrite inline literals to `$name` placeholders.
///
/// `existing` parameters are kept and their names are never reused.
pub fn parameterize(text: &str, existing: &BTreeMap<String, ParamValue>) -> Parameterized {
    let mut parameters = existing.clone();

    let text = rewrite(text, &MAP_ENTRY, "key", &mut parameters, |text, caps| {
        let (Some(key), Some(lit)) = (caps.name("key"), caps.name("lit")) else {
            return false;
        };
        text[..key.start()]
            .trim_end()
            .ends_with(|c: char| c == '{' || c == ',')
            && text[lit.end()..]
                .trim_start()
                .starts_with(|c: char| c == ',' || c == '}')
    });
    let text = rewrite(&text, &COMPARISON, "prop", &mut parameters, |_, _| true);

    Parameterized { text, parameters }
}

/// Apply one rewrite pass. `accept` vets the surrounding text of a match.
fn rewrite<F>(
    text: &str,
    pattern: &Regex,
    name_group: &str,
    parameters: &mut BTreeMap<String, ParamValue>,
    accept: F,
) -> String
where
    F: Fn(&str, &Captures<'_>) -> bool,
{
    let spans = string_spans(text);
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in pattern.captures_iter(text) {
        let (Some(whole), Some(name), Some(lit)) =
            (caps.get(0), caps.name(name_group), caps.name("lit"))
        else {
            continue;
        };
        if inside_string(&spans, whole.start()) || !accept(text, &caps) {
            continue;
        }
        let param = param_name(name.as_str(), parameters);
        parameters.insert(param.clone(), parse_literal(lit.as_str()));
        out.push_str(&text[last..lit.start()]);
        out.push('$');
        out.push_str(&param);
        last = lit.end();
    }
    out.push_str(&text[last..]);
    out
}

/// Byte ranges of quoted string literals, quotes included.
pub(crate) fn string_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let quote = bytes[i];
        if quote == b'\'' || quote == b'"' {
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i] != quote {
                if bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            spans.push((start, (i + 1).min(bytes.len())));
        }
        i += 1;
    }
    spans
}

/// `text` with every quoted string replaced by an empty one.
pub(crate) fn blank_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (start, end) in string_spans(text) {
        out.push_str(&text[last..start]);
        out.push_str("''");
        last = end;
    }
    out.push_str(&text[last..]);
    out
}

fn inside_string(spans: &[(usize, usize)], pos: usize) -> bool {
    spans.iter().any(|&(start, end)| pos > start && pos < end)
}

fn param_name(property: &str, taken: &BTreeMap<String, ParamValue>) -> String {
    let mut base: String = property
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if base.is_empty()
        || base.starts_with(|c: char| c.is_ascii_digit())
        || RESERVED_PARAMS.contains(&base.as_str())
    {
        base = format!("p_{}", base);
    }
    if !taken.contains_key(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !taken.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn parse_literal(raw: &str) -> ParamValue {
    let quoted = raw.len() >= 2
        && ((raw.starts_with('\'') && raw.ends_with('\''))
            || (raw.starts_with('"') && raw.ends_with('"')));
    if quoted {
        return ParamValue::String(unescape(&raw[1..raw.len() - 1]));
    }
    if raw.eq_ignore_ascii_case("true") {
        return ParamValue::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return ParamValue::Bool(false);
    }
    if raw.contains('.') {
        if let Ok(f) = raw.parse() {
            return ParamValue::Float(f);
        }
    } else if let Ok(i) = raw.parse() {
        return ParamValue::Int(i);
    } else if let Ok(f) = raw.parse() {
        return ParamValue::Float(f);
    }
    ParamValue::String(raw.to_string())
}

fn unescape(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn literal_matches(literal: &str, value: &ParamValue) -> bool {
    match value {
        ParamValue::Int(_) | ParamValue::Float(_) => {
            let (Ok(a), Ok(b)) = (literal.parse::<f64>(), value.as_text().parse::<f64>()) else {
                return false;
            };
            (a - b).abs() <= f64::EPSILON * a.abs().max(1.0)
        }
        _ => literal.eq_ignore_ascii_case(&value.as_text()),
    }
}

/// Link each parameter to the first question literal carrying its value.
/// Parameters with no matching literal stay unbound.
pub fn bind_to_question(
    parameters: &BTreeMap<String, ParamValue>,
    literals: &[String],
) -> Vec<QuestionBinding> {
    parameters
        .iter()
        .filter(|(name, _)| !RESERVED_PARAMS.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            literals
                .iter()
                .position(|l| literal_matches(l, value))
                .map(|literal_index| QuestionBinding {
                    param: name.clone(),
                    literal_index,
                })
        })
        .collect()
}

/// Re-bind parameters to the literals of a new question with the same shape.
///
/// `None` when the literal counts differ, a binding points past the
/// available literals, or a literal changed that no parameter carries: the
/// query text still holds the old value in that case.
pub fn rebind(
    parameters: &BTreeMap<String, ParamValue>,
    bindings: &[QuestionBinding],
    source_literals: &[String],
    literals: &[String],
) -> Option<BTreeMap<String, ParamValue>> {
    if source_literals.len() != literals.len() {
        return None;
    }
    let unbound_change = source_literals
        .iter()
        .zip(literals)
        .enumerate()
        .any(|(i, (old, new))| old != new && !bindings.iter().any(|b| b.literal_index == i));
    if unbound_change {
        return None;
    }

    let mut out = parameters.clone();
    for binding in bindings {
        let literal = literals.get(binding.literal_index)?;
        let current = out.get(&binding.param)?;
        let next = current.with_text(literal);
        out.insert(binding.param.clone(), next);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, ParamValue)]) -> BTreeMap<String, ParamValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_property_map_and_comparison() {
        let p = parameterize(
            "MATCH (b:Borrower {id: '12345'})-[:HAS_LOAN]->(l:Loan) WHERE l.risk_score >= 0.8 RETURN l",
            &BTreeMap::new(),
        );
        assert_eq!(
            p.text,
            "MATCH (b:Borrower {id: $id})-[:HAS_LOAN]->(l:Loan) WHERE l.risk_score >= $risk_score RETURN l"
        );
        assert_eq!(
            p.parameters,
            params(&[
                ("id", ParamValue::String("12345".into())),
                ("risk_score", ParamValue::Float(0.8)),
            ])
        );
    }

    #[test]
    fn test_collisions_get_suffixes() {
        let p = parameterize(
            "MATCH (a:Borrower {id: '1'}), (b:Borrower {id: '2'}) RETURN a, b",
            &BTreeMap::new(),
        );
        assert_eq!(
            p.text,
            "MATCH (a:Borrower {id: $id}), (b:Borrower {id: $id_2}) RETURN a, b"
        );
        assert_eq!(p.parameters["id_2"], ParamValue::String("2".into()));
    }

    #[test]
    fn test_multi_entry_map_and_types() {
        let p = parameterize(
            "MATCH (l:Loan {term: 36, active: true, rate: 4.5}) RETURN l",
            &BTreeMap::new(),
        );
        assert_eq!(
            p.text,
            "MATCH (l:Loan {term: $term, active: $active, rate: $rate}) RETURN l"
        );
        assert_eq!(p.parameters["term"], ParamValue::Int(36));
        assert_eq!(p.parameters["active"], ParamValue::Bool(true));
        assert_eq!(p.parameters["rate"], ParamValue::Float(4.5));
    }

    #[test]
    fn test_string_operators() {
        let p = parameterize(
            "MATCH (n:Borrower) WHERE n.name CONTAINS 'Ada' AND n.city STARTS WITH \"Lon\" AND n.status <> 'closed' RETURN n",
            &BTreeMap::new(),
        );
        assert_eq!(
            p.text,
            "MATCH (n:Borrower) WHERE n.name CONTAINS $name AND n.city STARTS WITH $city AND n.status <> $status RETURN n"
        );
        assert_eq!(p.parameters.len(), 3);
    }

    #[test]
    fn test_string_contents_untouched() {
        let p = parameterize("MATCH (n) WHERE n.note = 'a: 1, b' RETURN n", &BTreeMap::new());
        assert_eq!(p.text, "MATCH (n) WHERE n.note = $note RETURN n");
        assert_eq!(p.parameters["note"], ParamValue::String("a: 1, b".into()));
    }

    #[test]
    fn test_escaped_quotes() {
        let p = parameterize(r"MATCH (n:Borrower {name: 'O\'Brien'}) RETURN n", &BTreeMap::new());
        assert_eq!(p.parameters["name"], ParamValue::String("O'Brien".into()));
    }

    #[test]
    fn test_idempotent() {
        let once = parameterize(
            "MATCH (b:Borrower {id: '12345'}) WHERE b.score > 10 RETURN b LIMIT 5",
            &BTreeMap::new(),
        );
        let twice = parameterize(&once.text, &once.parameters);
        assert_eq!(once, twice);
        assert!(twice.text.ends_with("LIMIT 5"));
    }

    #[test]
    fn test_reserved_names_are_prefixed() {
        let p = parameterize("MATCH (n {page_limit: 3}) RETURN n", &BTreeMap::new());
        assert!(p.parameters.contains_key("p_page_limit"));
    }

    #[test]
    fn test_bind_and_rebind() {
        let parameters = params(&[
            ("id", ParamValue::String("12345".into())),
            ("risk_score", ParamValue::Float(0.8)),
            ("status", ParamValue::String("open".into())),
        ]);
        let literals = vec!["12345".to_string(), "0.80".to_string()];
        let bindings = bind_to_question(&parameters, &literals);
        assert_eq!(bindings.len(), 2);

        let rebound = rebind(
            &parameters,
            &bindings,
            &literals,
            &["67890".to_string(), "0.5".to_string()],
        )
        .unwrap();
        assert_eq!(rebound["id"], ParamValue::String("67890".into()));
        assert_eq!(rebound["risk_score"], ParamValue::Float(0.5));
        assert_eq!(rebound["status"], ParamValue::String("open".into()));

        assert!(rebind(&parameters, &bindings, &literals, &["1".to_string()]).is_none());
    }

    #[test]
    fn test_rebind_refuses_changed_unbound_literal() {
        // `LIMIT 5` stays inline, so "5" never reaches the parameter map.
        let parameters = params(&[("id", ParamValue::String("12345".into()))]);
        let literals = vec!["5".to_string(), "12345".to_string()];
        let bindings = bind_to_question(&parameters, &literals);
        assert_eq!(bindings.len(), 1);

        let same_limit = vec!["5".to_string(), "67890".to_string()];
        let rebound = rebind(&parameters, &bindings, &literals, &same_limit).unwrap();
        assert_eq!(rebound["id"], ParamValue::String("67890".into()));

        let new_limit = vec!["50".to_string(), "12345".to_string()];
        assert!(rebind(&parameters, &bindings, &literals, &new_limit).is_none());
    }

    #[test]
    fn test_rebind_refuses_value_not_taken_from_question() {
        let parameters = params(&[("id", ParamValue::String("B-12345".into()))]);
        let literals = vec!["12345".to_string()];
        let bindings = bind_to_question(&parameters, &literals);
        assert!(bindings.is_empty());

        assert!(rebind(&parameters, &bindings, &literals, &literals).is_some());
        assert!(rebind(&parameters, &bindings, &literals, &["67890".to_string()]).is_none());
    }

    #[test]
    fn test_blank_strings() {
        assert_eq!(
            blank_strings(r"MATCH (l) WHERE l.status = 'set aside' AND l.n = 'O\'x' RETURN l"),
            "MATCH (l) WHERE l.status = '' AND l.n = '' RETURN l"
        );
        assert_eq!(blank_strings("RETURN \"drop\""), "RETURN ''");
    }
}
