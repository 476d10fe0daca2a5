//! Boundary traits for the external systems the pipeline talks to.
//!
//! Every boundary call is async so that one slow dependency never stalls
//! unrelated requests sharing a runtime thread.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::models::{ParamValue, PropertySchema, Record, RelationshipSchema, Turn};

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Stream of generated text fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Per-request generation parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl GenerationParams {
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: None,
        }
    }
}

/// Backend for text generation (LLM).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a complete response.
    async fn generate(&self, system: &str, prompt: &str, params: GenerationParams)
        -> Result<String>;

    /// Generate a response as a stream of fragments.
    async fn generate_stream(
        &self,
        system: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<TokenStream>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// GRAPH TRAITS
// =============================================================================

/// Graph database boundary: introspection plus parameterized execution.
///
/// One instance is shared by every request for the process lifetime.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Enumerate node labels.
    async fn list_labels(&self) -> Result<Vec<String>>;

    /// Property names and types of one label.
    async fn label_properties(&self, label: &str) -> Result<Vec<PropertySchema>>;

    /// Number of nodes carrying `label`.
    async fn count_nodes(&self, label: &str) -> Result<i64>;

    /// Relationship types with endpoint labels and counts.
    async fn relationship_metadata(&self) -> Result<Vec<RelationshipSchema>>;

    /// Property maps of up to `limit` nodes carrying `label`.
    async fn sample_nodes(&self, label: &str, limit: usize) -> Result<Vec<Record>>;

    /// Execute a query. Values are always bound as parameters.
    async fn execute(
        &self,
        query: &str,
        params: &BTreeMap<String, ParamValue>,
    ) -> Result<Vec<Record>>;
}

// =============================================================================
// CACHE TRAITS
// =============================================================================

/// Distributed key/value store. No durability is assumed.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a serialized value. `Ok(None)` on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a serialized value with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove a key immediately.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

// =============================================================================
// CONVERSATION TRAITS
// =============================================================================

/// Conversation-history store, consumed read/append only.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Last `n` turns of a session, oldest first.
    async fn recent(&self, session_id: &str, n: usize) -> Result<Vec<Turn>>;

    /// Append one completed turn.
    async fn append(&self, session_id: &str, turn: Turn) -> Result<()>;
}
