//! PyGuide CLI
//!
//! Main entry point for serving the PyGuide tutoring assistant.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use pyguide_tutor::{create_router, AppState, Config};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// PyGuide - Socratic Python Debugging Tutor
///
/// Serves a web page where students submit buggy code and receive streamed,
/// hint-only guidance from a locally hosted language model.
#[derive(Parser, Debug)]
#[command(name = "pyguide")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: pyguide.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Interface to bind the HTTP server to
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port for the HTTP server
    #[arg(short, long)]
    port: Option<u16>,

    /// Base URL of the OpenAI-compatible backend (e.g. http://127.0.0.1:11434/v1)
    #[arg(long, value_name = "URL", env = "PYGUIDE_BASE_URL")]
    base_url: Option<String>,

    /// Credential sent to the backend as a bearer token
    #[arg(long, value_name = "KEY", env = "PYGUIDE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model identifier to request from the backend
    #[arg(short, long, value_name = "MODEL", env = "PYGUIDE_MODEL")]
    model: Option<String>,

    /// HTML page to serve at `/` instead of the bundled one
    #[arg(long, value_name = "FILE")]
    index_page: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
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

    tracing::info!("PyGuide starting");
    tracing::debug!(config = ?args.config, "Config file");

    match serve(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration, binds the listener and serves until Ctrl+C.
async fn serve(args: Args) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let config = apply_overrides(config, args);

    // Re-validate after overrides
    config.validate()?;

    print_config(&config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| {
            anyhow::anyhow!(
                "Invalid listen address '{}:{}': {e}\n\nSuggestion: Use an IP address for --host (e.g. 127.0.0.1 or 0.0.0.0)",
                config.server.host,
                config.server.port
            )
        })?;

    let state = AppState::new(config)?;
    let router = create_router(state);

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("PyGuide running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("PyGuide stopped");
    Ok(())
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Applies CLI and environment overrides on top of the loaded file.
fn apply_overrides(mut config: Config, args: Args) -> Config {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(base_url) = args.base_url {
        config.backend.base_url = base_url;
    }
    if let Some(api_key) = args.api_key {
        config.backend.api_key = api_key;
    }
    if let Some(model) = args.model {
        config.backend.model = model;
    }
    if args.index_page.is_some() {
        config.index_page = args.index_page;
    }
    config
}

/// Resolves when the process receives Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

/// Prints the loaded configuration. The credential is never printed.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Backend: {} ({})", config.backend.base_url, config.backend.name);
    println!("  Model: {}", config.backend.model);
    println!("  Temperature: {}", config.backend.temperature);
    match config.backend.timeout_secs {
        Some(secs) => println!("  Chunk timeout: {secs}s"),
        None => println!("  Chunk timeout: none"),
    }
    println!(
        "  Index page: {}",
        config.index_page.as_deref().unwrap_or("<bundled>")
    );
}
