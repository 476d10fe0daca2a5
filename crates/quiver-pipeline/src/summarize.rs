//! Narrative summaries of execution results.
//!
//! The model's streamed output goes through the shared fragment decoder and
//! is parsed once into a [`Summary`]: a JSON object first, then Markdown
//! headings, then plain prose.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument};

use quiver_core::{
    defaults, Error, ExecutionResult, GenerationParams, Result, Summary, SummarySection,
};
use quiver_inference::GenerationClient;

use crate::prompts::{summary_prompt, SUMMARY_SYSTEM};

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\n?(.*?)\n?```$").expect("fence pattern"));

#[derive(Deserialize)]
struct RawSummary {
    #[serde(default, alias = "text")]
    summary: Option<String>,
    #[serde(default)]
    sections: Vec<RawSection>,
}

#[derive(Deserialize)]
struct RawSection {
    #[serde(default)]
    title: String,
    #[serde(default, alias = "content")]
    body: String,
}

/// Parse decoded model output into a [`Summary`].
pub fn parse_summary(decoded: &str) -> Result<Summary> {
    let trimmed = decoded.trim();
    let body = FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(trimmed);
    if body.is_empty() {
        return Err(Error::MalformedOutput("empty summary".to_string()));
    }

    if body.starts_with('{') {
        let raw: RawSummary = serde_json::from_str(body)
            .map_err(|e| Error::MalformedOutput(format!("summary JSON: {}", e)))?;
        let sections: Vec<SummarySection> = raw
            .sections
            .into_iter()
            .filter(|s| !s.title.trim().is_empty() || !s.body.trim().is_empty())
            .map(|s| SummarySection {
                title: s.title.trim().to_string(),
                body: s.body.trim().to_string(),
            })
            .collect();
        let text = raw.summary.unwrap_or_default().trim().to_string();
        if text.is_empty() && sections.is_empty() {
            return Err(Error::MalformedOutput("summary JSON has no content".to_string()));
        }
        return Ok(Summary { text, sections });
    }

    Ok(parse_markdown(body))
}

fn parse_markdown(body: &str) -> Summary {
    let mut preamble: Vec<&str> = Vec::new();
    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
    for line in body.lines() {
        let heading = line.trim_start();
        if heading.starts_with('#') {
            let title = heading.trim_start_matches('#').trim().to_string();
            sections.push((title, Vec::new()));
        } else if let Some((_, lines)) = sections.last_mut() {
            lines.push(line);
        } else {
            preamble.push(line);
        }
    }

    let sections: Vec<SummarySection> = sections
        .into_iter()
        .map(|(title, lines)| SummarySection {
            title,
            body: lines.join("\n").trim().to_string(),
        })
        .collect();
    let mut text = preamble.join("\n").trim().to_string();
    if text.is_empty() {
        text = sections.first().map(|s| s.body.clone()).unwrap_or_default();
    }
    Summary { text, sections }
}

#[derive(Clone)]
pub struct ResponseSummarizer {
    llm: GenerationClient,
    max_records: usize,
}

impl ResponseSummarizer {
    pub fn new(llm: GenerationClient, max_records: usize) -> Self {
        Self { llm, max_records }
    }

    #[instrument(skip_all, fields(subsystem = "pipeline", component = "summarizer", op = "summarize", result_count = result.count))]
    pub async fn summarize(
        &self,
        question: &str,
        schema_slice: &str,
        result: &ExecutionResult,
    ) -> Result<Summary> {
        let prompt = summary_prompt(
            question,
            schema_slice,
            &result.records,
            result.truncated,
            self.max_records,
        );
        let params = GenerationParams::with_temperature(defaults::SUMMARY_TEMPERATURE);
        let decoded = self
            .llm
            .stream_text("summarize", SUMMARY_SYSTEM, &prompt, params)
            .await?;
        let summary = parse_summary(&decoded)?;
        debug!(sections = summary.sections.len(), "Summary parsed");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_core::RetryPolicy;
    use quiver_inference::mock::ScriptedBackend;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_parse_json_summary() {
        let s = parse_summary(
            r#"{"summary": "Two flagged loans.", "sections": [{"title": "Risk", "body": "L1 scores 0.91."}]}"#,
        )
        .unwrap();
        assert_eq!(s.text, "Two flagged loans.");
        assert_eq!(s.sections[0].title, "Risk");
        assert_eq!(s.sections[0].body, "L1 scores 0.91.");
    }

    #[test]
    fn test_parse_fenced_json_with_aliases() {
        let s = parse_summary("```json\n{\"text\": \"One loan.\", \"sections\": [{\"title\": \"A\", \"content\": \"b\"}]}\n```")
            .unwrap();
        assert_eq!(s.text, "One loan.");
        assert_eq!(s.sections[0].body, "b");
    }

    #[test]
    fn test_parse_markdown_sections() {
        let s = parse_summary("Borrower 12345 has two loans.\n\n## Flagged\nL1 is flagged.\n## Clean\nL2 is not.")
            .unwrap();
        assert_eq!(s.text, "Borrower 12345 has two loans.");
        assert_eq!(s.sections.len(), 2);
        assert_eq!(s.sections[1].title, "Clean");
        assert_eq!(s.sections[1].body, "L2 is not.");
    }

    #[test]
    fn test_parse_plain_prose() {
        let s = parse_summary("Nothing matched.").unwrap();
        assert_eq!(s.text, "Nothing matched.");
        assert!(s.sections.is_empty());
    }

    #[test]
    fn test_malformed_outputs() {
        assert_eq!(parse_summary("   ").unwrap_err().code(), "MALFORMED_OUTPUT");
        assert_eq!(parse_summary("{\"summary\": ").unwrap_err().code(), "MALFORMED_OUTPUT");
        assert_eq!(parse_summary("{}").unwrap_err().code(), "MALFORMED_OUTPUT");
    }

    #[tokio::test]
    async fn test_summarize_streams_through_decoder() {
        let backend = ScriptedBackend::new().on(
            SUMMARY_SYSTEM,
            Ok("\u{FEFF}{\"summary\": \"Two risky\\r\\nloans.\"}".into()),
        );
        let summarizer = ResponseSummarizer::new(
            GenerationClient::new(
                Arc::new(backend.clone()),
                RetryPolicy::none(),
                Duration::from_secs(1),
            ),
            10,
        );
        let summary = summarizer
            .summarize("q", "schema", &ExecutionResult::default())
            .await
            .unwrap();
        assert_eq!(summary.text, "Two risky\r\nloans.");
        assert!(backend.calls()[0].streamed);
    }
}
