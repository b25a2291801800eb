//! MockView CLI
//!
//! Main entry point for serving the MockView interview engine.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use mockview_engine::{create_router, AppState, Config, MemoryStore, StaticEnrichment};
use mockview_llm::{ChatBackend, OpenAiBackend, ScriptedBackend};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// MockView - AI Mock Interview Server
///
/// Streams interview questions to candidates, adapting to their resume,
/// subscription tier, and past answers.
#[derive(Parser, Debug)]
#[command(name = "mockview")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: mockview.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Port for the HTTP API server
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,

    /// Serve canned questions instead of calling the AI provider
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("MockView starting");
    tracing::debug!(config = ?args.config, "Config file");

    match serve(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration and collaborators, then serves until Ctrl+C.
async fn serve(args: Args) -> anyhow::Result<()> {
    let (config, data_dir) = load_config(args.config.as_deref())?;
    print_config(&config, args.offline);

    let backend: Arc<dyn ChatBackend> = if args.offline {
        tracing::info!("Offline mode, serving scripted questions");
        Arc::new(ScriptedBackend::demo())
    } else {
        let backend = OpenAiBackend::from_settings(config.llm.clone()).map_err(|e| {
            anyhow::anyhow!(
                "Failed to set up the AI backend: {e}\n\nSuggestion: Set {} or run with --offline",
                config.llm.api_key_env
            )
        })?;
        Arc::new(backend)
    };

    let enrichment = StaticEnrichment::from_files(&config.data, &data_dir)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let state = AppState::new(
        config,
        Arc::new(MemoryStore::new()),
        backend,
        Arc::new(enrichment),
    );
    let router = create_router(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address '{}': {e}", args.host))?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;

    println!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

/// Loads configuration from the specified path or default location.
///
/// Returns the config with the directory data files are resolved against.
fn load_config(config_path: Option<&str>) -> anyhow::Result<(Config, PathBuf)> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            let config = Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))?;
            let dir = path
                .parent()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
            Ok((config, dir))
        }
        None => {
            let config = Config::load().map_err(|e| anyhow::anyhow!("{e}"))?;
            Ok((config, PathBuf::from(".")))
        }
    }
}

/// Prints the loaded configuration.
fn print_config(config: &Config, offline: bool) {
    println!("Configuration loaded:");
    if offline {
        println!("  AI backend: scripted (offline)");
    } else {
        println!("  AI backend: {} ({})", config.llm.model, config.llm.base_url);
    }
    println!("  Turn timeout: {}s", config.stream.timeout_secs);
    println!("  Turns per minute: {}", config.rate_limit.turns_per_minute);
    match config.tiers.free.question_limit {
        Some(limit) => println!("  Free tier questions: {limit}"),
        None => println!("  Free tier questions: unlimited"),
    }
}
