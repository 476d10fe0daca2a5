//! Centralized default constants for the quiver pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// GRAPH DATABASE
// =============================================================================

/// Default Bolt endpoint.
pub const NEO4J_URI: &str = "127.0.0.1:7687";

/// Default Neo4j user.
pub const NEO4J_USER: &str = "neo4j";

/// Default logical database name (part of schema cache keys).
pub const DATABASE: &str = "neo4j";

/// Maximum connections in the shared Bolt pool.
pub const GRAPH_MAX_CONNECTIONS: usize = 16;

/// Timeout for a single graph query (seconds).
pub const GRAPH_TIMEOUT_SECS: u64 = 30;

/// Maximum labels introspected or sampled concurrently.
pub const INTROSPECTION_CONCURRENCY: usize = 4;

// =============================================================================
// CACHE
// =============================================================================

/// Default Redis URL.
pub const REDIS_URL: &str = "redis://localhost:6379";

/// Schema snapshot TTL (seconds). Hours-class.
pub const SCHEMA_TTL_SECS: u64 = 6 * 60 * 60;

/// Introspection report TTL (seconds). Same class as the schema.
pub const INTROSPECTION_TTL_SECS: u64 = 6 * 60 * 60;

/// Generated-plan TTL (seconds). Minutes-class, shorter than schema TTL.
pub const PLAN_TTL_SECS: u64 = 10 * 60;

/// Timeout for a single cache backend round-trip (milliseconds).
pub const CACHE_TIMEOUT_MS: u64 = 500;

/// Initial schema version.
pub const SCHEMA_VERSION: u64 = 1;

// =============================================================================
// INTROSPECTION
// =============================================================================

/// Nodes sampled per label.
pub const SAMPLE_SIZE: usize = 200;

/// Minimum sampled rows before a derived-feature relation is reported.
pub const DERIVED_MIN_ROWS: usize = 3;

/// Relative tolerance for derived-feature equality checks.
pub const DERIVED_TOLERANCE: f64 = 1e-6;

/// Maximum numeric properties per label considered for derived features.
pub const DERIVED_MAX_PROPERTIES: usize = 12;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default OpenAI-compatible endpoint (Ollama compatibility mode).
pub const LLM_URL: &str = "http://127.0.0.1:11434/v1";

/// Default generation model.
pub const GEN_MODEL: &str = "qwen2.5-coder:14b";

/// Timeout for a single generation request (seconds).
pub const GEN_TIMEOUT_SECS: u64 = 60;

/// Sampling temperature for plan generation.
pub const PLAN_TEMPERATURE: f32 = 0.0;

/// Sampling temperature for summaries.
pub const SUMMARY_TEMPERATURE: f32 = 0.2;

/// Response marker meaning "query is valid".
pub const VALID_MARKER: &str = "VALID";

// =============================================================================
// RETRY
// =============================================================================

/// Maximum attempts for a transient LLM/graph failure (including the first).
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Initial backoff delay (milliseconds).
pub const RETRY_BASE_DELAY_MS: u64 = 200;

/// Upper bound for a single backoff delay (milliseconds).
pub const RETRY_MAX_DELAY_MS: u64 = 2_000;

// =============================================================================
// EXECUTION
// =============================================================================

/// Row bound applied to expander queries without an explicit window.
pub const PAGE_LIMIT: i64 = 100;

/// Hard ceiling for a caller-supplied window.
pub const PAGE_LIMIT_MAX: i64 = 1_000;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;

/// Records included in the summarization prompt.
pub const SUMMARY_MAX_RECORDS: usize = 50;

// =============================================================================
// CONVERSATION
// =============================================================================

/// Recent turns read per session.
pub const HISTORY_TURNS: usize = 6;

/// Token budget for conversation context in prompts.
pub const CONTEXT_TOKEN_BUDGET: usize = 1_024;

// =============================================================================
// DOWNSTREAM
// =============================================================================

/// Timeout for the entity-detail service (milliseconds).
pub const DETAIL_TIMEOUT_MS: u64 = 1_500;

// =============================================================================
// OBSERVABILITY
// =============================================================================

/// External calls slower than this are logged with `slow = true` (milliseconds).
pub const SLOW_CALL_MS: u64 = 5_000;
