//! Deadline- and retry-bounded access to a [`GenerationBackend`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use quiver_core::{
    defaults, with_retry, with_timeout, GenerationBackend, GenerationParams, Result, RetryPolicy,
};

use crate::decoder::collect_stream;

/// Wraps a backend so every call has a deadline and transient failures back
/// off and retry. Permanent failures return immediately.
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            backend,
            retry,
            timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// One complete generation. `op` names the call in logs.
    pub async fn complete(
        &self,
        op: &str,
        system: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String> {
        let start = Instant::now();
        let backend = &self.backend;
        let text = with_retry(&self.retry, op, move || {
            with_timeout(self.timeout, op, backend.generate(system, prompt, params))
        })
        .await?;
        self.log_done(op, prompt.len(), text.len(), start);
        Ok(text)
    }

    /// One streamed generation, assembled by the shared decoder.
    ///
    /// The deadline covers opening the stream and draining it.
    pub async fn stream_text(
        &self,
        op: &str,
        system: &str,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String> {
        let start = Instant::now();
        let backend = &self.backend;
        let text = with_retry(&self.retry, op, move || {
            with_timeout(self.timeout, op, async move {
                let stream = backend.generate_stream(system, prompt, params).await?;
                collect_stream(stream).await
            })
        })
        .await?;
        self.log_done(op, prompt.len(), text.len(), start);
        Ok(text)
    }

    fn log_done(&self, op: &str, prompt_len: usize, response_len: usize, start: Instant) {
        let duration_ms = start.elapsed().as_millis() as u64;
        if duration_ms > defaults::SLOW_CALL_MS {
            warn!(
                subsystem = "inference",
                op,
                model = self.backend.model_name(),
                prompt_len,
                response_len,
                duration_ms,
                slow = true,
                "Slow LLM call"
            );
        } else {
            debug!(
                subsystem = "inference",
                op,
                prompt_len,
                response_len,
                duration_ms,
                "LLM call complete"
            );
        }
    }
}
