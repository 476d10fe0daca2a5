//! Scripted generation backend for deterministic testing.
//!
//! Responses are chosen by matching a needle against the system prompt, so a
//! test can script each pipeline stage independently and then assert how
//! many calls each stage made.
//!
//! ```rust,ignore
//! use quiver_inference::mock::ScriptedBackend;
//!
//! let backend = ScriptedBackend::new()
//!     .on("Cypher", Ok("MATCH (n) RETURN n".into()))
//!     .with_default_response("VALID");
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use quiver_core::{Error, GenerationBackend, GenerationParams, Result, TokenStream};

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedCall {
    pub system: String,
    pub prompt: String,
    pub streamed: bool,
}

struct Rule {
    needle: String,
    /// The last response repeats once the others are used up.
    responses: VecDeque<Result<String>>,
}

/// Generation backend answering from scripted rules.
#[derive(Clone)]
pub struct ScriptedBackend {
    rules: Arc<Mutex<Vec<Rule>>>,
    default_response: Option<String>,
    latency: Option<Duration>,
    chunk_chars: usize,
    call_log: Arc<Mutex<Vec<ScriptedCall>>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            rules: Arc::new(Mutex::new(Vec::new())),
            default_response: None,
            latency: None,
            chunk_chars: 5,
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call whose system prompt contains `needle`.
    pub fn on(self, needle: &str, response: Result<String>) -> Self {
        self.on_sequence(needle, vec![response])
    }

    /// Answer successive matching calls in order; the last answer repeats.
    pub fn on_sequence(self, needle: &str, responses: Vec<Result<String>>) -> Self {
        lock(&self.rules).push(Rule {
            needle: needle.to_string(),
            responses: responses.into(),
        });
        self
    }

    /// Response for calls no rule matches. Without one they fail.
    pub fn with_default_response(mut self, text: &str) -> Self {
        self.default_response = Some(text.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> Vec<ScriptedCall> {
        lock(&self.call_log).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.call_log).len()
    }

    /// Calls whose system prompt contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        lock(&self.call_log)
            .iter()
            .filter(|c| c.system.contains(needle))
            .count()
    }

    pub fn clear_calls(&self) {
        lock(&self.call_log).clear();
    }

    async fn respond(&self, system: &str, prompt: &str, streamed: bool) -> Result<String> {
        lock(&self.call_log).push(ScriptedCall {
            system: system.to_string(),
            prompt: prompt.to_string(),
            streamed,
        });
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = {
            let mut rules = lock(&self.rules);
            rules
                .iter_mut()
                .find(|r| system.contains(&r.needle))
                .and_then(|r| {
                    if r.responses.len() > 1 {
                        r.responses.pop_front()
                    } else {
                        r.responses.front().cloned()
                    }
                })
        };
        match (scripted, &self.default_response) {
            (Some(response), _) => response,
            (None, Some(text)) => Ok(text.clone()),
            (None, None) => Err(Error::Inference(format!(
                "no scripted response for system prompt: {}",
                system.chars().take(60).collect::<String>()
            ))),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        _params: GenerationParams,
    ) -> Result<String> {
        self.respond(system, prompt, false).await
    }

    async fn generate_stream(
        &self,
        system: &str,
        prompt: &str,
        _params: GenerationParams,
    ) -> Result<TokenStream> {
        let text = self.respond(system, prompt, true).await?;
        let chars: Vec<char> = text.chars().collect();
        let fragments: Vec<Result<String>> = chars
            .chunks(self.chunk_chars.max(1))
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(Box::pin(stream::iter(fragments)))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::collect_stream;

    #[tokio::test]
    async fn test_rules_match_system_prompt() {
        let backend = ScriptedBackend::new()
            .on("planner", Ok("MATCH (n) RETURN n".into()))
            .with_default_response("VALID");
        let p = GenerationParams::default();

        assert_eq!(
            backend.generate("you are a planner", "q", p).await.unwrap(),
            "MATCH (n) RETURN n"
        );
        assert_eq!(backend.generate("reviewer", "q", p).await.unwrap(), "VALID");
        assert_eq!(backend.calls_matching("planner"), 1);
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let backend = ScriptedBackend::new().on_sequence(
            "x",
            vec![Err(Error::Transient("busy".into())), Ok("a".into())],
        );
        let p = GenerationParams::default();
        assert!(backend.generate("x", "", p).await.is_err());
        assert_eq!(backend.generate("x", "", p).await.unwrap(), "a");
        assert_eq!(backend.generate("x", "", p).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_unscripted_call_fails() {
        let backend = ScriptedBackend::new();
        let err = backend
            .generate("anything", "", GenerationParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INFERENCE");
    }

    #[tokio::test]
    async fn test_stream_is_fragmented() {
        let backend = ScriptedBackend::new().with_default_response("héllo wörld, twelve+");
        let stream = backend
            .generate_stream("", "", GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(collect_stream(stream).await.unwrap(), "héllo wörld, twelve+");
        assert!(backend.calls()[0].streamed);
    }
}
