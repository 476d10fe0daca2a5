//! Structured logging schema and field name constants.
//!
//! All crates use these constants (or the identical literal in
//! `#[instrument(fields(...))]`, which only accepts identifiers) so log
//! aggregation can query by standardized field names.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Fatal request failure, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied (fail-open, degraded) |
//! | INFO  | Lifecycle events (startup, shutdown), snapshot rebuilds |
//! | DEBUG | Decision points: cache hit/miss, intent, validation outcome |
//! | TRACE | Per-item iteration (sampled rows, fragments) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID for one pipeline run. Format: UUIDv7.
pub const REQUEST_ID: &str = "request_id";

/// Conversation session identifier.
pub const SESSION_ID: &str = "session_id";

/// Subsystem originating the log event.
/// Values: "cache", "graph", "inference", "pipeline"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "cache_layer", "schema_catalog", "introspector", "planner"
pub const COMPONENT: &str = "component";

/// Logical operation name.
pub const OPERATION: &str = "op";

// ─── Pipeline fields ───────────────────────────────────────────────────────

/// Cache key being read or written.
pub const CACHE_KEY: &str = "cache_key";

/// Detected intent category.
pub const INTENT: &str = "intent";

/// Schema version in use.
pub const SCHEMA_VERSION: &str = "schema_version";

/// Validation status of a generated query.
pub const QUERY_STATUS: &str = "query_status";

/// Retry attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of records returned.
pub const RESULT_COUNT: &str = "result_count";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

/// Sample size used for introspection.
pub const SAMPLE_SIZE: &str = "sample_size";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Whether a degraded path was taken.
pub const DEGRADED: &str = "degraded";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";
