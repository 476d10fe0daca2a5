//! Entity-detail hints from an optional downstream service.
//!
//! `POST <base>/entities/details` with `{"ids": [...]}` answers
//! `{"entities": {"<id>": {...}}}`. Hints only enrich the plan prompt, so
//! every failure degrades to planning without them.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, warn};

use quiver_core::{with_timeout, Error, Result};

/// Details keyed by entity id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityHints {
    #[serde(default)]
    pub entities: BTreeMap<String, JsonValue>,
}

impl EntityHints {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// One `id: {json}` line per entity.
    pub fn render(&self) -> String {
        self.entities
            .iter()
            .map(|(id, detail)| format!("{}: {}", id, detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What the hint lookup produced for one question.
#[derive(Debug, Clone, PartialEq)]
pub enum HintOutcome {
    Fetched(EntityHints),
    /// Nothing to look up.
    Skipped,
    /// Service unconfigured, slow, or failing.
    Unavailable,
}

impl HintOutcome {
    pub fn hints(&self) -> Option<&EntityHints> {
        match self {
            HintOutcome::Fetched(h) => Some(h),
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, HintOutcome::Unavailable)
    }
}

#[derive(Serialize)]
struct DetailRequest<'a> {
    ids: &'a [String],
}

#[derive(Clone)]
pub struct EntityDetailClient {
    http: reqwest::Client,
    base_url: Option<String>,
    timeout: Duration,
}

impl EntityDetailClient {
    pub fn new(base_url: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build detail client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            timeout,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    /// Fetch details for `ids`.
    pub async fn fetch(&self, ids: &[String]) -> Result<EntityHints> {
        let Some(base) = &self.base_url else {
            return Err(Error::Config("entity detail service not configured".to_string()));
        };
        let url = format!("{}/entities/details", base);
        with_timeout(self.timeout, "entity_details", async {
            let response = self
                .http
                .post(&url)
                .json(&DetailRequest { ids })
                .send()
                .await
                .map_err(|e| Error::Downstream(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(Error::Downstream(format!("{} returned {}", url, status)));
            }
            response
                .json::<EntityHints>()
                .await
                .map_err(|e| Error::Downstream(format!("invalid detail response: {}", e)))
        })
        .await
    }

    /// Hint lookup that never fails the request.
    #[instrument(skip_all, fields(subsystem = "pipeline", component = "entity_details", op = "hints", ids = ids.len()))]
    pub async fn hints(&self, ids: &[String]) -> HintOutcome {
        if ids.is_empty() {
            return HintOutcome::Skipped;
        }
        if !self.is_configured() {
            debug!("Entity detail service not configured");
            return HintOutcome::Unavailable;
        }
        let start = Instant::now();
        match self.fetch(ids).await {
            Ok(hints) => {
                debug!(
                    entities = hints.entities.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Fetched entity hints"
                );
                HintOutcome::Fetched(hints)
            }
            Err(e) => {
                warn!(error = %e, "Entity hints unavailable, planning without them");
                HintOutcome::Unavailable
            }
        }
    }
}
