//! chainfeed CLI and server binary
//!
//! Commands for initializing, validating and starting the feed.

use anyhow::{Context, Result};
use cli::{Cli, Commands, LogFormatArg};
use config::{generate_default_config, load_config, save_config, validate_config, MasterConfig};
use observability::{init_logging, init_metrics, LogFormat};
use server::{FeedApp, ShutdownController};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Start {
            config,
            log_format,
            port,
        } => start_command(config, log_format, port).await,
        Commands::Validate { config } => {
            init_logging("chainfeed", LogFormat::Pretty)?;
            validate_command(config)
        }
        Commands::Init { output } => {
            init_logging("chainfeed", LogFormat::Pretty)?;
            init_command(output)
        }
    }
}

async fn start_command(
    config_path: PathBuf,
    log_format: Option<LogFormatArg>,
    port: Option<u16>,
) -> Result<()> {
    let mut config = load_config(&config_path)?;

    let format = match log_format {
        Some(arg) => LogFormat::parse(arg.as_str()),
        None => LogFormat::parse(&config.logging.format),
    }
    .unwrap_or_default();
    init_logging(&config.service.name, format)?;
    info!(path = ?config_path, "chainfeed starting...");

    ensure_valid(&config)?;

    if let Some(port) = port {
        debug!(port, "Overriding API port from the command line");
        config.api.port = port;
    }
    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    info!(
        service = %config.service.name,
        api = %format!("{}:{}", config.api.host, config.api.port),
        tracked = config.instruments.tracked.len(),
        connections = config.connections.count,
        capacity = config.subscriptions.global_capacity,
        "Starting feed"
    );

    let app = FeedApp::from_config(config)
        .await
        .context("Failed to assemble feed services")?;
    let shutdown = ShutdownController::with_ctrl_c();
    app.run(&shutdown).await.context("Feed stopped with an error")?;
    Ok(())
}

fn ensure_valid(config: &MasterConfig) -> Result<()> {
    let report = validate_config(config);

    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }

    if !report.is_valid() {
        error!(
            error_count = report.errors.len(),
            "Configuration validation failed"
        );
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!("Cannot start feed due to configuration errors");
    }
    Ok(())
}

fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = load_config(&config_path).inspect_err(|e| error!(%e, "Failed to load configuration"))?;
    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Service: {}", config.service.name);
    println!(
        "Tracked underlyings: {}",
        config
            .instruments
            .tracked
            .iter()
            .map(|t| t.symbol.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "Capacity: {} across {} connections of {}",
        config.subscriptions.global_capacity,
        config.connections.count,
        config.connections.capacity_per_connection
    );
    println!("API: {}:{}", config.api.host, config.api.port);

    Ok(())
}

fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("Next steps:");
    println!("  1. Point instruments.master_path at the broker's instrument master CSV");
    println!("  2. Set BROKER_CLIENT_ID and BROKER_ACCESS_TOKEN");
    println!(
        "  3. Run 'chainfeed validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  4. Run 'chainfeed start --config {:?}' to start the feed",
        output_path
    );

    Ok(())
}
