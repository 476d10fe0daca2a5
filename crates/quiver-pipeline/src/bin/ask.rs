//! quiver-ask: answer one natural-language question against the graph.
//!
//! Usage:
//!   quiver-ask "show loans for borrower 12345 flagged as risky"
//!   quiver-ask --session analyst-1 --limit 20 --json "top 10 branches by loan volume"
//!   quiver-ask --warm

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiver_core::{defaults, Answer, PageWindow};
use quiver_pipeline::{AppContext, QueryPipeline};

#[derive(Parser)]
#[command(name = "quiver-ask")]
#[command(author, version, about = "Ask a graph database questions in plain language")]
struct Cli {
    /// The question to answer
    question: Vec<String>,

    /// Conversation session; follow-up questions see earlier turns
    #[arg(short, long, default_value = "cli")]
    session: String,

    /// Maximum rows to return
    #[arg(short, long)]
    limit: Option<i64>,

    /// Rows to skip before returning results
    #[arg(long)]
    skip: Option<i64>,

    /// Print the full answer as JSON
    #[arg(long)]
    json: bool,

    /// Build schema and introspection caches before answering
    #[arg(long)]
    warm: bool,
}

/// Logs go to stderr (or `LOG_FILE`) so stdout carries only the answer.
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter (default: "quiver=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "quiver_pipeline=info,quiver_graph=info,quiver_cache=warn,quiver_inference=warn".into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("quiver-ask.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    }
}

fn print_answer(answer: &Answer) {
    match &answer.summary {
        Some(summary) => {
            println!("{}", summary.text);
            for section in &summary.sections {
                println!("\n## {}\n{}", section.title, section.body);
            }
        }
        None => println!("(no summary available)"),
    }

    println!("\n{} row(s){}", answer.result.count, if answer.result.truncated { ", more available" } else { "" });
    for record in &answer.result.records {
        println!("{}", serde_json::Value::Object(record.clone()));
    }

    let d = &answer.degradation;
    if d.any() {
        let mut notes = Vec::new();
        if d.plan_fallback {
            notes.push("template query used");
        }
        if d.validation_best_effort {
            notes.push("query not validated");
        }
        if d.hints_unavailable {
            notes.push("entity details unavailable");
        }
        if d.summary_unavailable {
            notes.push("summary unavailable");
        }
        eprintln!("note: {}", notes.join("; "));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();
    let cli = Cli::parse();

    let question = cli.question.join(" ");
    if question.trim().is_empty() && !cli.warm {
        bail!("no question given");
    }

    let ctx = AppContext::from_env()
        .await
        .context("failed to initialize backends")?;
    let pipeline = QueryPipeline::new(Arc::new(ctx));
    info!(session = %cli.session, "quiver-ask ready");

    if cli.warm {
        pipeline.warm().await.context("cache warm-up failed")?;
    }

    if !question.trim().is_empty() {
        let window = match (cli.skip, cli.limit) {
            (None, None) => None,
            (skip, limit) => Some(PageWindow {
                skip: skip.unwrap_or(defaults::PAGE_OFFSET),
                limit: limit.unwrap_or(defaults::PAGE_LIMIT),
            }),
        };
        let answer = pipeline
            .answer(&cli.session, &question, window)
            .await
            .map_err(|e| anyhow::anyhow!("[{}] {}", e.code(), e))?;

        if cli.json {
            println!("{}", serde_json::to_string_pretty(&answer)?);
        } else {
            print_answer(&answer);
        }
    }

    pipeline.shutdown();
    Ok(())
}
