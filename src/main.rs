//! Entry point of the dungeon finder service
//!
//! Loads the configuration, wires the matchmaking task to AMQP and the
//! health server, and shuts everything down on SIGINT or SIGTERM.

use anyhow::Result;
use clap::Parser;
use dungeon_finder::config::{validate_config, AppConfig};
use dungeon_finder::service::AppState;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

/// Dungeon finder: role-based party formation over AMQP
#[derive(Parser)]
#[command(
    name = "dungeon-finder",
    version,
    about = "Queues participants for group activities and forms role-balanced parties",
    long_about = "The dungeon finder consumes queue, vote and party lifecycle commands over AMQP, \
                 forms parties of one tank, one healer and three damage dealers, runs role checks, \
                 proposals and vote-kicks, and publishes every decision back to the participants."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics port")]
    health_port: Option<u16>,

    /// Activity catalog override
    #[arg(long, value_name = "FILE", help = "Load activities from this TOML file")]
    catalog: Option<PathBuf>,

    /// Allow both teams in one queue
    #[arg(long, help = "Queue both teams together")]
    cross_faction: bool,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C) signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}

fn display_startup_banner(config: &AppConfig) {
    let matchmaking = &config.matchmaking;
    info!("Dungeon finder");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   AMQP: {}", config.amqp.url);
    info!(
        "   Party: {} tank, {} healer, {} damage",
        matchmaking.quotas.tanks, matchmaking.quotas.healers, matchmaking.quotas.damage
    );
    info!(
        "   Timeouts: role check {}s, proposal {}s, vote-kick {}s",
        matchmaking.role_check_timeout_seconds,
        matchmaking.proposal_timeout_seconds,
        matchmaking.boot_vote_timeout_seconds
    );
    info!("   Cross-faction: {}", matchmaking.cross_faction);
}

/// Configuration file or environment, then command line overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(config_path) => AppConfig::from_file(config_path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if args.debug {
        config.service.log_level = "debug".to_string();
    }
    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }
    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }
    if let Some(catalog) = &args.catalog {
        config.service.catalog_path = Some(catalog.clone());
    }
    if args.cross_faction {
        config.matchmaking.cross_faction = true;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config);

    if args.dry_run {
        info!("Configuration is valid, exiting without starting the service");
        return Ok(());
    }

    let mut app_state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    info!("Dungeon finder is running, press Ctrl+C to stop");
    wait_for_shutdown_signal().await;

    let shutdown_timeout = config.shutdown_timeout();
    match tokio::time::timeout(shutdown_timeout, app_state.shutdown()).await {
        Ok(Ok(())) => info!("Graceful shutdown completed"),
        Ok(Err(e)) => error!("Shutdown failed: {}", e),
        Err(_) => warn!("Shutdown timeout of {:?} exceeded, forcing exit", shutdown_timeout),
    }

    Ok(())
}
