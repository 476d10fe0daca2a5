//! # quiver-pipeline
//!
//! Natural-language questions to Cypher, executed and summarized.
//!
//! This crate provides:
//! - [`IntentClassifier`]: deterministic, priority-ordered query categories
//! - [`PlanGenerator`]: schema-sliced prompting behind a versioned plan cache
//! - [`Validator`]: validation with at most one repair
//! - [`ExecutionCoordinator`]: parameterization, pagination, and fan-out
//! - [`ResponseSummarizer`]: streamed summaries through the shared decoder
//! - [`QueryPipeline`]: the end-to-end request path over an [`AppContext`]

pub mod context;
pub mod details;
pub mod execute;
pub mod intent;
pub mod params;
pub mod pipeline;
pub mod plan;
pub mod prompts;
pub mod session;
pub mod slice;
pub mod summarize;
pub mod templates;
pub mod validate;

pub use context::AppContext;
pub use details::{EntityDetailClient, EntityHints, HintOutcome};
pub use execute::{apply_window, is_expander, ExecutionCoordinator, CORRELATION_FIELD};
pub use intent::{extract_literals, mask_literals, normalize_question, IntentClassifier};
pub use params::{parameterize, Parameterized};
pub use pipeline::QueryPipeline;
pub use plan::{clean_query_text, plan_cache_key, PlanGenerator, PlanRequest};
pub use session::{InMemoryHistory, SessionLocks};
pub use slice::SchemaSlice;
pub use summarize::{parse_summary, ResponseSummarizer};
pub use validate::{classify_response, ValidationOutcome, Validator};
