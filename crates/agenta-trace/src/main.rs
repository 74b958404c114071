//! agenta-trace: command-line harness for the tracing SDK.
//!
//! Loads `.agenta/config.toml`, installs logging, builds the shared
//! [`Tracer`] and runs an instrumented retrieval-augmented generation flow,
//! printing the recorded trace and shipping it to the collector.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agenta_tracing::{
    Attributes, FileSink, SpanKind, SpanStatus, Tracer, with_context, with_current,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::Config;

/// Command-line harness for agenta tracing
#[derive(Parser)]
#[command(name = "agenta-trace")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to .agenta directory (default: search for .agenta/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Platform base URL
    #[arg(long, global = true, env = "AGENTA_HOST")]
    host: Option<String>,

    /// API key; traces are only dispatched when one is set
    #[arg(long, global = true, env = "AGENTA_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Application id stamped on every span
    #[arg(long, global = true, env = "AGENTA_APP_ID")]
    app_id: Option<String>,

    /// Maximum concurrent trace dispatches
    #[arg(long, global = true)]
    max_workers: Option<usize>,

    /// Write logs to daily-rotated files in this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an instrumented demo workflow and print its trace
    Demo {
        /// Number of concurrent requests, each traced in its own context
        #[arg(long, default_value = "1")]
        requests: usize,

        /// Question fed to the workflow
        #[arg(long, default_value = "What is tracing?")]
        question: String,

        /// Also append finished traces to this JSONL file
        #[arg(long)]
        out: Option<PathBuf>,

        /// Seconds to wait for pending dispatches before exiting
        #[arg(long, default_value = "30")]
        flush_timeout: u64,
    },

    /// Initialize a new .agenta directory with a config file
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    ShowConfig,
}

fn env_filter(verbose: bool, level: Option<&str>) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or("info")))
    }
}

/// Initialize logging to stderr.
fn init_logging(verbose: bool, level: Option<&str>) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter(verbose, level))
        .init();
}

/// Initialize logging to daily-rotated files.
fn init_file_logging(log_dir: &std::path::Path, verbose: bool, level: Option<&str>) {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
        init_logging(verbose, level);
        return;
    }

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "agenta-trace.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the background writer.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(env_filter(verbose, level))
        .init();
}

/// Load config from `--config`, discovery, or defaults.
fn load_config(explicit: Option<&PathBuf>) -> Result<(Config, Option<PathBuf>)> {
    if let Some(dir) = explicit {
        let config = Config::from_file(&dir.join(config::CONFIG_FILE))?;
        return Ok((config, Some(dir.clone())));
    }
    match Config::find_and_load()? {
        Some((config, dir)) => Ok((config, Some(dir))),
        None => Ok((Config::default(), None)),
    }
}

/// Apply command-line and environment overrides.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.tracing.host = host.clone();
    }
    if let Some(key) = cli.api_key.as_ref().filter(|k| !k.is_empty()) {
        config.tracing.api_key = Some(key.clone());
    }
    if let Some(app_id) = &cli.app_id {
        config.tracing.app_id = app_id.clone();
    }
    if let Some(workers) = cli.max_workers {
        config.tracing.max_workers = workers;
    }
    // A flag path is relative to the shell's directory, not to `.agenta/`.
    if let Some(dir) = &cli.log_dir {
        config.logging.dir = Some(std::path::absolute(dir).unwrap_or_else(|_| dir.clone()));
    }
}

fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap_or_default()
}

async fn retrieve(tracer: &Tracer, question: &str) -> Vec<String> {
    with_current(|ctx| {
        tracer.open_span(
            ctx,
            "retrieve",
            SpanKind::RETRIEVER,
            attrs(json!({"query": question})),
            None,
        );
        tracer.store_locals(ctx, attrs(json!({"top_k": 2})));
    });

    tokio::time::sleep(Duration::from_millis(5)).await;
    let documents = vec![
        "Tracing records spans for each step.".to_string(),
        "Spans nest under the step that started them.".to_string(),
    ];

    with_current(|ctx| {
        tracer.close_span(
            ctx,
            attrs(json!({
                "documents": documents,
                "cost": 0.0001,
                "usage": {"prompt_tokens": 12, "completion_tokens": 0, "total_tokens": 12}
            })),
        )
    });
    documents
}

async fn generate(tracer: &Tracer, question: &str, documents: &[String], pass: &str) -> String {
    with_current(|ctx| {
        tracer.open_span(
            ctx,
            "generate",
            SpanKind::LLM,
            attrs(json!({"question": question, "context": documents, "pass": pass})),
            None,
        );
        tracer.set_attributes(ctx, attrs(json!({"model": "gpt-4o-mini", "temperature": 0.2})));
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let answer = format!("({pass}) {}", documents.join(" "));

    with_current(|ctx| {
        tracer.set_status(ctx, SpanStatus::Ok);
        tracer.close_span(
            ctx,
            attrs(json!({
                "message": answer,
                "cost": 0.002,
                "usage": {"prompt_tokens": 150, "completion_tokens": 40, "total_tokens": 190}
            })),
        )
    });
    answer
}

async fn simulate_request(tracer: &Tracer, question: &str) -> String {
    with_current(|ctx| {
        tracer.open_span(
            ctx,
            "rag",
            SpanKind::CHAIN,
            attrs(json!({"question": question})),
            None,
        );
        tracer.set_trace_tags(ctx, ["demo"]);
    });

    let documents = retrieve(tracer, question).await;
    let draft = generate(tracer, question, &documents, "draft").await;
    let answer = generate(tracer, &draft, &documents, "refine").await;

    with_current(|ctx| {
        tracer.set_status(ctx, SpanStatus::Ok);
        tracer.close_span(ctx, attrs(json!({"answer": answer})));
    });
    answer
}

async fn run_demo(
    tracer: Arc<Tracer>,
    requests: usize,
    question: String,
    out: Option<PathBuf>,
    flush_timeout: Duration,
) -> Result<()> {
    let sink = out
        .map(FileSink::session)
        .transpose()
        .context("Failed to open trace output file")?
        .map(Arc::new);

    let mut handles = Vec::with_capacity(requests);
    for i in 0..requests.max(1) {
        let tracer = Arc::clone(&tracer);
        let question = format!("{question} #{i}");
        handles.push(tokio::spawn(async move {
            let (answer, mut ctx) = with_context(simulate_request(&tracer, &question)).await;
            let document = tracer.dump_trace(&ctx);
            let trace = tracer.close_trace(&mut ctx);
            (answer, document, trace)
        }));
    }

    for handle in handles {
        let (answer, document, trace) = handle.await.context("Demo request panicked")?;
        println!("{}", serde_json::to_string_pretty(&document)?);
        info!(answer = %answer, "Request finished");

        if let (Some(sink), Some(trace)) = (&sink, &trace) {
            sink.append(&trace.trace_id, trace.spans())?;
        }
    }

    if !tracer.flush_and_wait(flush_timeout).await {
        tracing::warn!("Timed out waiting for trace dispatch");
    }
    if let Some(queue) = tracer.queue() {
        info!(
            submitted = queue.submitted(),
            completed = queue.completed(),
            failed = queue.failed(),
            "Dispatch summary"
        );
    }
    if let Some(sink) = &sink {
        println!("Traces written to {}", sink.current_file_path().display());
    }
    Ok(())
}

fn run_init(agenta_dir: PathBuf, force: bool) -> Result<()> {
    let path = agenta_dir.join(config::CONFIG_FILE);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    std::fs::create_dir_all(&agenta_dir)
        .with_context(|| format!("Failed to create {}", agenta_dir.display()))?;
    std::fs::write(&path, Config::template())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Created {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, agenta_dir) = load_config(cli.config.as_ref())?;
    apply_overrides(&mut config, &cli);

    match config.resolve_log_dir(agenta_dir.as_deref()) {
        Some(dir) => init_file_logging(&dir, cli.verbose, config.logging.level.as_deref()),
        None => init_logging(cli.verbose, config.logging.level.as_deref()),
    }

    if let Some(dir) = &agenta_dir {
        info!("Loaded config from {}", dir.display());
    }

    match cli.command.unwrap_or(Commands::Demo {
        requests: 1,
        question: "What is tracing?".to_string(),
        out: None,
        flush_timeout: 30,
    }) {
        Commands::Demo {
            requests,
            question,
            out,
            flush_timeout,
        } => {
            let tracer = Tracer::new(config.tracing.clone()).context("Failed to build tracer")?;
            let tracer = Tracer::init_shared(tracer);
            tracer.update_baggage(attrs(json!({"environment": "development"})));
            run_demo(
                tracer,
                requests,
                question,
                out,
                Duration::from_secs(flush_timeout),
            )
            .await
        }
        Commands::Init { force } => {
            let dir = agenta_dir.unwrap_or_else(|| PathBuf::from(config::AGENTA_DIR));
            run_init(dir, force)
        }
        Commands::ShowConfig => {
            let mut shown = config.clone();
            if shown.tracing.api_key.is_some() {
                shown.tracing.api_key = Some("********".to_string());
            }
            print!("{}", toml::to_string_pretty(&shown)?);
            Ok(())
        }
    }
}
