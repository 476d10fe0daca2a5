//! OpenAI-compatible generation backend.
//!
//! Works with any endpoint speaking the chat-completions protocol: OpenAI,
//! Ollama in compatibility mode, vLLM, LM Studio.
//!
//! ```rust,no_run
//! use quiver_inference::openai::OpenAIBackend;
//! use quiver_core::{GenerationBackend, GenerationParams};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::from_env().unwrap();
//!     let text = backend
//!         .generate("", "Say hi", GenerationParams::default())
//!         .await
//!         .unwrap();
//!     println!("{}", text);
//! }
//! ```

mod backend;
mod error;
mod streaming;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig};
pub use error::{to_quiver_error, OpenAIErrorCode};
pub use streaming::{parse_sse_stream, SseParser};
pub use types::*;
