//! # quiver-inference
//!
//! LLM access for the quiver pipeline.
//!
//! This crate provides:
//! - [`OpenAIBackend`]: chat-completions backend, complete and streamed
//! - [`decode_fragments`]: the one decoder every streamed response goes through
//! - [`GenerationClient`]: per-call deadlines plus bounded retry with backoff
//!
//! # Feature Flags
//!
//! - `mock`: scripted backend with a call log

pub mod client;
pub mod decoder;
pub mod openai;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use client::GenerationClient;
pub use decoder::{collect_stream, decode_fragments};
pub use openai::{OpenAIBackend, OpenAIConfig};
