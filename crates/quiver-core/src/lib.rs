//! # quiver-core
//!
//! Core types, traits, and abstractions for the quiver natural-language
//! graph query pipeline.
//!
//! This crate provides the data model shared by every stage, the async
//! boundary traits for the graph database, LLM service, cache and history
//! store, the error taxonomy, and environment-driven configuration.

pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod retry;
pub mod tokenizer;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{parse_intent_priority, PipelineConfig, RetryPolicy, DEFAULT_INTENT_PRIORITY};
pub use error::{Error, Result};
pub use models::*;
pub use retry::{with_retry, with_timeout};
pub use tokenizer::{build_context, estimate_tokens, shared_tokenizer, trim_turns, Tokenizer};
pub use traits::*;
