// Telemetry Collector - Pluggable Telemetry-Collection Agent
//
// A Rust-based agent that polls heterogeneous sources through collector
// plugins and exports the observations as metrics.
//
// # Features
// - Collector plugins polling on independent fixed-delay timers
// - Direct and rate-derived metric semantics with stale-series age-out
// - Batched OTLP push export over gRPC or HTTP
// - Prometheus text exposition on one shared scrape endpoint
// - Multiple collector instances per process
//
// # Usage
// telemetry-collector --config <path>
//
// Example:
// telemetry-collector --config config/config.yaml

use anyhow::{Context, Result};
use std::env;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use telemetry_collector::agent::Agent;
use telemetry_collector::config;

/// Application entry point
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging
/// 3. Loads the YAML configuration document
/// 4. Starts one collector instance per configured entry
/// 5. Runs until interrupted, then shuts the instances down
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging subsystem
    // Logs are written to stdout/stderr and can be captured by systemd
    init_logging();

    info!("=== Telemetry Collector Starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = config::resolve_config_path(find_arg("--config"));
    let agent_config = config::load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    let mut agent = Agent::new(agent_config);
    agent
        .start()
        .await
        .context("Failed to start collector instances")?;

    info!("=== Telemetry Collector Started Successfully ===");
    info!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for the shutdown signal")?;

    info!("Shutdown signal received");
    agent.shutdown().await;

    info!("=== Telemetry Collector Stopped ===");
    Ok(())
}

/// Finds the value following a command-line flag.
fn find_arg(flag: &str) -> Option<String> {
    let args: Vec<String> = env::args().collect();
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|pos| args.get(pos + 1))
        .map(|value| value.to_string())
}

/// Initializes the logging subsystem
///
/// Sets up structured logging with:
/// - Timestamp for each log entry
/// - Log level (INFO, WARN, ERROR, etc.)
/// - Target module name
/// - Colored output when running in terminal
/// - JSON output when running as systemd service
///
/// # Log Levels
/// Default: INFO
/// Can be overridden with RUST_LOG environment variable
///
/// # Examples
/// ```bash
/// RUST_LOG=debug telemetry-collector ...  # Enable debug logging
/// RUST_LOG=warn telemetry-collector ...   # Only warnings and errors
/// ```
fn init_logging() {
    // Determine if we're running under systemd
    // Systemd sets INVOCATION_ID environment variable
    let is_systemd = env::var("INVOCATION_ID").is_ok();

    // Create env filter
    // Default to INFO level, but allow override via RUST_LOG
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if is_systemd {
        // When running under systemd, use JSON format for structured logging
        // This makes logs easier to parse and analyze
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        // When running in terminal, use human-readable format with colors
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    }
}
