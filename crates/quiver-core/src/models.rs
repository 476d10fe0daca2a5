//! Data model shared across the pipeline stages.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// SCHEMA
// =============================================================================

/// Simple type inferred for a node property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Integer,
    Float,
    Boolean,
    List,
    Map,
    Temporal,
    Unknown,
}

impl PropertyType {
    /// Map a Neo4j `propertyTypes` entry (e.g. `"Long"`, `"StringArray"`).
    pub fn from_neo4j(name: &str) -> Self {
        match name {
            "String" => Self::String,
            "Long" | "Integer" | "Int" => Self::Integer,
            "Double" | "Float" => Self::Float,
            "Boolean" => Self::Boolean,
            "Date" | "DateTime" | "LocalDateTime" | "LocalTime" | "Time" | "Duration" => {
                Self::Temporal
            }
            "Map" => Self::Map,
            n if n.ends_with("Array") || n.starts_with("List") => Self::List,
            _ => Self::Unknown,
        }
    }

    /// Infer the type of a sampled JSON value. `None` for JSON null.
    pub fn of_value(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => None,
            JsonValue::Bool(_) => Some(Self::Boolean),
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => Some(Self::Integer),
            JsonValue::Number(_) => Some(Self::Float),
            JsonValue::String(_) => Some(Self::String),
            JsonValue::Array(_) => Some(Self::List),
            JsonValue::Object(_) => Some(Self::Map),
        }
    }

    /// Merge two observations of the same property.
    pub fn unify(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Integer, Self::Float) | (Self::Float, Self::Integer) => Self::Float,
            _ => Self::Unknown,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Map => "map",
            Self::Temporal => "temporal",
            Self::Unknown => "unknown",
        }
    }
}

/// One property of a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: String,
    pub kind: PropertyType,
}

/// A node label and its properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSchema {
    pub name: String,
    /// Node count at build time.
    #[serde(default)]
    pub count: i64,
    pub properties: Vec<PropertySchema>,
}

impl LabelSchema {
    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// A relationship type between two labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSchema {
    pub rel_type: String,
    pub from: String,
    pub to: String,
    pub count: i64,
}

/// Versioned, immutable snapshot of the graph schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub database: String,
    pub version: u64,
    pub labels: Vec<LabelSchema>,
    pub relationships: Vec<RelationshipSchema>,
    /// Lower-cased property or label name → labels it belongs to.
    pub field_index: BTreeMap<String, BTreeSet<String>>,
    pub built_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    /// Assemble a snapshot, sorting its contents and deriving the field index.
    pub fn new(
        database: impl Into<String>,
        version: u64,
        mut labels: Vec<LabelSchema>,
        mut relationships: Vec<RelationshipSchema>,
    ) -> Self {
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        for label in &mut labels {
            label.properties.sort_by(|a, b| a.name.cmp(&b.name));
            label.properties.dedup_by(|a, b| a.name == b.name);
        }
        relationships.sort_by(|a, b| {
            (&a.rel_type, &a.from, &a.to).cmp(&(&b.rel_type, &b.from, &b.to))
        });

        let mut field_index: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for label in &labels {
            field_index
                .entry(label.name.to_lowercase())
                .or_default()
                .insert(label.name.clone());
            for prop in &label.properties {
                field_index
                    .entry(prop.name.to_lowercase())
                    .or_default()
                    .insert(label.name.clone());
            }
        }

        Self {
            database: database.into(),
            version,
            labels,
            relationships,
            field_index,
            built_at: Utc::now(),
        }
    }

    /// Field → entity index used to downscope prompts and detect intent.
    pub fn field_to_entity(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.field_index
    }

    pub fn label(&self, name: &str) -> Option<&LabelSchema> {
        self.labels.iter().find(|l| l.name == name)
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.label(name).is_some()
    }

    pub fn has_relationship(&self, rel_type: &str) -> bool {
        self.relationships.iter().any(|r| r.rel_type == rel_type)
    }

    /// Relationships touching `label` on either end.
    pub fn relationships_for<'a>(
        &'a self,
        label: &'a str,
    ) -> impl Iterator<Item = &'a RelationshipSchema> + 'a {
        self.relationships
            .iter()
            .filter(move |r| r.from == label || r.to == label)
    }
}

// =============================================================================
// INTROSPECTION
// =============================================================================

/// Sample-derived statistics for one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyStats {
    pub kind: PropertyType,
    pub non_null: usize,
    pub distinct: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Sample-derived statistics for one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelStats {
    pub label: String,
    pub sampled: usize,
    pub properties: BTreeMap<String, PropertyStats>,
}

/// Kind of bounded indicator detected on a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    /// Values within `[0, 1]`.
    BoundedRatio,
    /// Values within `[0, 100]` on a score-like property.
    BoundedScore,
    /// Boolean or 0/1 property with a flag-like name.
    Flag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPattern {
    pub label: String,
    pub property: String,
    pub kind: RiskKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationOp {
    Sum,
    Difference,
    Product,
    Ratio,
}

impl DerivationOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Sum => "+",
            Self::Difference => "-",
            Self::Product => "*",
            Self::Ratio => "/",
        }
    }
}

/// `property = left <op> right` held on every sampled node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFeature {
    pub label: String,
    pub property: String,
    pub op: DerivationOp,
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipPatternKind {
    /// Property values of one label contained in an identifier of another.
    ImplicitForeignKey,
    /// Declared relationship type whose endpoints were both sampled.
    Structural,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRelationshipPattern {
    pub kind: RelationshipPatternKind,
    pub from_label: String,
    pub from_property: Option<String>,
    pub to_label: String,
    pub to_property: Option<String>,
    pub rel_type: Option<String>,
}

/// Immutable result of one semantic introspection round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrospectionReport {
    pub version: u64,
    pub sample_size: usize,
    pub labels: Vec<LabelStats>,
    pub risk_patterns: Vec<RiskPattern>,
    pub derived_features: Vec<DerivedFeature>,
    pub relationship_patterns: Vec<EntityRelationshipPattern>,
}

impl IntrospectionReport {
    pub fn stats_for(&self, label: &str) -> Option<&LabelStats> {
        self.labels.iter().find(|l| l.label == label)
    }

    pub fn risk_patterns_for<'a>(
        &'a self,
        label: &'a str,
    ) -> impl Iterator<Item = &'a RiskPattern> + 'a {
        self.risk_patterns.iter().filter(move |r| r.label == label)
    }

    pub fn derived_features_for<'a>(
        &'a self,
        label: &'a str,
    ) -> impl Iterator<Item = &'a DerivedFeature> + 'a {
        self.derived_features.iter().filter(move |d| d.label == label)
    }
}

// =============================================================================
// QUERIES
// =============================================================================

/// Query category detected from the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    EntityLookup,
    Analytical,
    Comparison,
    Lookalike,
}

impl Intent {
    pub const ALL: [Intent; 4] = [
        Intent::EntityLookup,
        Intent::Analytical,
        Intent::Comparison,
        Intent::Lookalike,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::EntityLookup => "entity_lookup",
            Intent::Analytical => "analytical",
            Intent::Comparison => "comparison",
            Intent::Lookalike => "lookalike",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "entity_lookup" | "lookup" => Ok(Intent::EntityLookup),
            "analytical" => Ok(Intent::Analytical),
            "comparison" => Ok(Intent::Comparison),
            "lookalike" => Ok(Intent::Lookalike),
            other => Err(Error::Config(format!("Unknown intent category: {}", other))),
        }
    }
}

/// Validation status of a generated query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Unvalidated,
    Valid,
    Repaired,
    Rejected,
}

impl QueryStatus {
    /// Only validated or repaired plans are stored in the plan cache.
    pub fn is_cacheable(self) -> bool {
        matches!(self, QueryStatus::Valid | QueryStatus::Repaired)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryStatus::Unvalidated => "unvalidated",
            QueryStatus::Valid => "valid",
            QueryStatus::Repaired => "repaired",
            QueryStatus::Rejected => "rejected",
        }
    }
}

/// Execution parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    /// Textual form used to match parameters against question literals.
    pub fn as_text(&self) -> String {
        match self {
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => f.to_string(),
            ParamValue::String(s) => s.clone(),
        }
    }

    /// Rebuild a value of the same shape from a new literal.
    pub fn with_text(&self, text: &str) -> ParamValue {
        match self {
            ParamValue::Int(_) => text
                .parse()
                .map(ParamValue::Int)
                .unwrap_or_else(|_| ParamValue::String(text.to_string())),
            ParamValue::Float(_) => text
                .parse()
                .map(ParamValue::Float)
                .unwrap_or_else(|_| ParamValue::String(text.to_string())),
            ParamValue::Bool(_) => text
                .parse()
                .map(ParamValue::Bool)
                .unwrap_or_else(|_| ParamValue::String(text.to_string())),
            ParamValue::String(_) => ParamValue::String(text.to_string()),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Links a query parameter to the n-th literal of the question it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionBinding {
    pub param: String,
    pub literal_index: usize,
}

/// A query produced by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub text: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub bindings: Vec<QuestionBinding>,
    /// Literals of the question this query was planned for.
    #[serde(default)]
    pub source_literals: Vec<String>,
    pub intent: Intent,
    pub status: QueryStatus,
    /// Served from the plan cache (validation skipped).
    #[serde(default)]
    pub from_cache: bool,
    /// Produced by a fallback path (static template).
    #[serde(default)]
    pub degraded: bool,
}

impl GeneratedQuery {
    pub fn new(text: impl Into<String>, intent: Intent) -> Self {
        Self {
            text: text.into(),
            parameters: BTreeMap::new(),
            bindings: Vec::new(),
            source_literals: Vec::new(),
            intent,
            status: QueryStatus::Unvalidated,
            from_cache: false,
            degraded: false,
        }
    }
}

/// Explicit pagination window supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    pub skip: i64,
    pub limit: i64,
}

/// One row returned by the graph database.
pub type Record = serde_json::Map<String, JsonValue>;

/// Request-scoped query result. Never cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub records: Vec<Record>,
    pub count: usize,
    /// Pagination bound applied and reached.
    pub truncated: bool,
    pub parameters: BTreeMap<String, ParamValue>,
}

// =============================================================================
// CONVERSATION
// =============================================================================

/// One completed question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            at: Utc::now(),
        }
    }
}

/// Recent turns of one session, oldest first, already trimmed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    pub turns: Vec<Turn>,
}

impl ConversationContext {
    /// Stable digest of the turn texts (timestamps excluded).
    pub fn context_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for turn in &self.turns {
            hasher.update(turn.question.as_bytes());
            hasher.update([0u8]);
            hasher.update(turn.answer.as_bytes());
            hasher.update([1u8]);
        }
        hex::encode(hasher.finalize())[..16].to_string()
    }

    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("Q: {}\nA: {}", t.question, t.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// =============================================================================
// ANSWERS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySection {
    pub title: String,
    pub body: String,
}

/// Structured narrative produced by the summarizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    #[serde(default)]
    pub sections: Vec<SummarySection>,
}

/// Degraded paths taken while answering. All false on the happy path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    /// Plan came from a static template.
    pub plan_fallback: bool,
    /// Validation rejected the plan; it was executed best-effort.
    pub validation_best_effort: bool,
    /// Entity-detail hints could not be fetched.
    pub hints_unavailable: bool,
    /// No narrative summary; raw results only.
    pub summary_unavailable: bool,
}

impl Degradation {
    pub fn any(&self) -> bool {
        self.plan_fallback
            || self.validation_best_effort
            || self.hints_unavailable
            || self.summary_unavailable
    }
}

/// Pipeline output for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub request_id: Uuid,
    pub question: String,
    pub intent: Intent,
    pub query: GeneratedQuery,
    pub result: ExecutionResult,
    pub summary: Option<Summary>,
    pub degradation: Degradation,
}
