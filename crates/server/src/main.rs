//! Concord Server
//!
//! CLI and HTTP surface over the analysis pipeline, backed by scripted
//! demonstration workers.

mod api;
mod demo;

use anyhow::Context;
use axum::Router;
use clap::{Parser, Subcommand};
use concord_core::models::CoordinatorConfig;
use concord_core::state::CaseContext;
use concord_core::swarm::{Controller, ExecutionReport};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use api::{pipeline::pipeline_routes, AppState, SharedState};

#[derive(Parser, Clone)]
#[command(author, version, about = "Concord - multi-worker analysis with contradiction detection")]
struct Args {
    /// JSON file with a serialized CoordinatorConfig (environment otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run the pipeline once on a trigger (CLI mode, no server)
    Run {
        /// Free-text trigger, e.g. "Explain the CPI drop"
        trigger: String,
        /// JSON file with case facts (worker scripts live under `workers`)
        #[arg(long)]
        facts: Option<PathBuf>,
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        period: Option<String>,
        #[arg(long)]
        case_id: Option<String>,
    },
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<CoordinatorConfig> {
    match path {
        Some(path) => read_json(path).await,
        None => Ok(CoordinatorConfig::from_env()?),
    }
}

pub async fn run_server(config: CoordinatorConfig, port: u16) -> anyhow::Result<()> {
    let state: SharedState = Arc::new(AppState::new(config, demo::demo_registry()));

    let app = Router::new()
        .nest("/api", pipeline_routes())
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, "Concord server listening");
    println!("Concord Server running at http://{}", addr);
    println!("   POST /api/pipeline/run");
    println!("   GET  /api/cases, /api/cases/:id/history, /api/cases/:id/versions/:version");
    println!("   POST /api/cases/:id/rollback");
    println!("   GET  /api/events (SSE), /api/metrics, /api/health");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_once(
    config: CoordinatorConfig,
    trigger: &str,
    context: CaseContext,
) -> anyhow::Result<()> {
    let controller = Controller::new(config, demo::demo_registry());
    let result = controller.run_pipeline(trigger, context).await?;
    let state = &result.final_state;

    println!(
        "Case {} -> {} ({:.2}), version {}",
        state.case_id,
        state.intent,
        state.intent_confidence,
        result.final_version
    );
    println!(
        "Contradictions: {} detected, {} unresolved after {} iteration(s)",
        state.contradictions.len(),
        result.unresolved_contradictions.len(),
        state.iteration_count
    );
    for c in &state.contradictions {
        let mark = if c.resolved { "resolved" } else { "OPEN" };
        println!("  [{}] {} ({}): {}", mark, c.rule.as_str(), c.severity.as_str(), c.description);
    }
    if !result.timed_out_workers.is_empty() {
        println!("Timed out: {:?}", result.timed_out_workers);
    }

    match (&result.report, &result.synthesis_error) {
        (Some(report), _) => println!("\n{}", report.render()),
        (None, Some(error)) => println!("\nSynthesis failed: {}", error),
        (None, None) => {}
    }
    println!("\n{}", ExecutionReport::new(&result.trace).render());

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref()).await?;

    match args.command {
        Some(CliCommand::Run {
            trigger,
            facts,
            program,
            period,
            case_id,
        }) => {
            let facts = match facts {
                Some(path) => read_json(&path).await?,
                None => serde_json::Value::Null,
            };
            let context = CaseContext {
                case_id,
                program_name: program.unwrap_or_default(),
                reporting_period: period.unwrap_or_default(),
                facts,
            };
            run_once(config, &trigger, context).await
        }
        Some(CliCommand::Serve { port }) => run_server(config, port).await,
        None => run_server(config, 8080).await,
    }
}
