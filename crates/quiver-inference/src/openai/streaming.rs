//! SSE stream parsing for OpenAI-compatible streaming responses.
//!
//! Network chunks do not respect event boundaries: a `data:` line may be
//! split across chunks, and so may a multi-byte UTF-8 character. Bytes are
//! buffered until a full line is available.

use std::collections::VecDeque;

use futures::{stream, Stream, StreamExt};

use quiver_core::{Error, Result, TokenStream};

use super::types::ChatCompletionChunk;

/// Incremental SSE line parser.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
    done: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// `[DONE]` seen; later input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes, returning content fragments from every completed line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<String>> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.parse_line(&line, &mut out);
        }
        out
    }

    /// Flush a final line that had no trailing newline.
    pub fn finish(&mut self) -> Vec<Result<String>> {
        let mut out = Vec::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.parse_line(&line, &mut out);
        }
        out
    }

    fn parse_line(&mut self, raw: &[u8], out: &mut Vec<Result<String>>) {
        if self.done {
            return;
        }
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();

        // Blank separators, comments, and non-data fields carry no content.
        let Some(data) = line.strip_prefix("data:") else {
            return;
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            self.done = true;
            return;
        }

        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => {
                let content: String = chunk
                    .choices
                    .into_iter()
                    .filter_map(|c| c.delta.content)
                    .collect();
                if !content.is_empty() {
                    out.push(Ok(content));
                }
            }
            Err(e) => out.push(Err(Error::Inference(format!(
                "Failed to parse SSE chunk: {}",
                e
            )))),
        }
    }
}

struct SseState<S> {
    inner: std::pin::Pin<Box<S>>,
    parser: SseParser,
    queue: VecDeque<Result<String>>,
    finished: bool,
}

/// Turn a byte stream from an OpenAI-compatible endpoint into content fragments.
pub fn parse_sse_stream<S>(body: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
{
    let state = SseState {
        inner: Box::pin(body),
        parser: SseParser::new(),
        queue: VecDeque::new(),
        finished: false,
    };

    let fragments = stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.queue.pop_front() {
                return Some((item, st));
            }
            if st.finished || st.parser.is_done() {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => st.queue.extend(st.parser.feed(&chunk)),
                Some(Err(e)) => {
                    st.finished = true;
                    st.queue
                        .push_back(Err(Error::Transient(format!("Stream error: {}", e))));
                }
                None => {
                    st.finished = true;
                    st.queue.extend(st.parser.finish());
                }
            }
        }
    });

    Box::pin(fragments)
}
