//! Static schema notes loaded once at startup.
//!
//! Hand-written descriptions of labels and relationships plus a glossary of
//! domain terms. They are folded into prompts next to the introspected schema.
//!
//! ```yaml
//! labels:
//!   Loan: A credit facility issued to one borrower.
//! relationships:
//!   HAS_LOAN: Borrower owns the loan.
//! glossary:
//!   risky: risk_score above 0.7 or flagged = true
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use quiver_core::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaArtifacts {
    /// Label name → description.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Relationship type → description.
    #[serde(default)]
    pub relationships: BTreeMap<String, String>,
    /// Domain term → meaning.
    #[serde(default)]
    pub glossary: BTreeMap<String, String>,
}

impl SchemaArtifacts {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from a YAML or JSON file, chosen by extension (YAML otherwise).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read schema artifacts {}: {}", path.display(), e))
        })?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let artifacts: Self = if is_json {
            serde_json::from_str(&raw)?
        } else {
            serde_yaml::from_str(&raw)?
        };

        info!(
            subsystem = "graph",
            component = "artifacts",
            op = "load",
            path = %path.display(),
            labels = artifacts.labels.len(),
            relationships = artifacts.relationships.len(),
            glossary = artifacts.glossary.len(),
            "Loaded schema artifacts"
        );
        Ok(artifacts)
    }

    /// Load when a path is configured; a missing or broken file degrades to
    /// no notes.
    pub fn load_optional(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::load(p).unwrap_or_else(|e| {
                warn!(error = %e, "Schema artifacts unavailable, continuing without notes");
                Self::empty()
            }),
            None => Self::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.relationships.is_empty() && self.glossary.is_empty()
    }

    /// Prompt notes for the given labels and relationship types, plus every
    /// glossary term that appears in `question`.
    pub fn notes_for(&self, labels: &[&str], rel_types: &[&str], question: &str) -> Vec<String> {
        let mut notes = Vec::new();
        for label in labels {
            if let Some(desc) = self.labels.get(*label) {
                notes.push(format!("{}: {}", label, desc));
            }
        }
        for rel in rel_types {
            if let Some(desc) = self.relationships.get(*rel) {
                notes.push(format!("[:{}] {}", rel, desc));
            }
        }
        let question = question.to_lowercase();
        for (term, meaning) in &self.glossary {
            if question.contains(&term.to_lowercase()) {
                notes.push(format!("\"{}\" means {}", term, meaning));
            }
        }
        notes
    }
}
