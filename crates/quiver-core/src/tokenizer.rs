//! Token counting and conversation-context trimming.
//!
//! Prompts carry recent conversation turns; this module keeps them inside a
//! token budget using tiktoken's `cl100k_base`, falling back to a character
//! heuristic when the BPE tables cannot be initialized.

use once_cell::sync::Lazy;
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{ConversationContext, Turn};

/// Trait for tokenization operations.
pub trait Tokenizer: Send + Sync {
    /// Count the number of tokens in the given text.
    fn count_tokens(&self, text: &str) -> usize;

    /// Get the name/identifier of this tokenizer.
    fn name(&self) -> &str;
}

/// Tiktoken-based tokenizer implementation.
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
    name: String,
}

impl TiktokenTokenizer {
    /// Create a tokenizer using `cl100k_base`.
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::Internal(format!("Failed to initialize cl100k_base: {}", e)))?;

        Ok(Self {
            bpe,
            name: "cl100k_base".to_string(),
        })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Character-ratio estimator used when tiktoken is unavailable.
pub struct EstimatingTokenizer;

impl Tokenizer for EstimatingTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    fn name(&self) -> &str {
        "estimate"
    }
}

static SHARED: Lazy<Box<dyn Tokenizer>> = Lazy::new(|| match TiktokenTokenizer::cl100k() {
    Ok(t) => Box::new(t),
    Err(e) => {
        warn!(error = %e, "Falling back to estimated token counts");
        Box::new(EstimatingTokenizer)
    }
});

/// Process-wide tokenizer, initialized on first use.
pub fn shared_tokenizer() -> &'static dyn Tokenizer {
    SHARED.as_ref()
}

/// Quickly estimate token count without full tokenization.
///
/// Uses a heuristic ratio of ~3.7 characters per token for English text.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() as f32 / 3.7).ceil() as usize
}

/// Keep the most recent turns whose combined size fits `budget` tokens.
///
/// Turns are returned oldest first. A single turn larger than the budget is
/// dropped rather than truncated mid-sentence.
pub fn trim_turns(turns: &[Turn], budget: usize, tokenizer: &dyn Tokenizer) -> Vec<Turn> {
    let mut kept = Vec::new();
    let mut used = 0usize;

    for turn in turns.iter().rev() {
        let cost = tokenizer.count_tokens(&turn.question) + tokenizer.count_tokens(&turn.answer);
        if used + cost > budget {
            break;
        }
        used += cost;
        kept.push(turn.clone());
    }

    kept.reverse();
    kept
}

/// Build a trimmed conversation context for a session.
pub fn build_context(session_id: &str, turns: &[Turn], budget: usize) -> ConversationContext {
    ConversationContext {
        session_id: session_id.to_string(),
        turns: trim_turns(turns, budget, shared_tokenizer()),
    }
}
