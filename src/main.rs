use anyhow::{Context, Result};
use clap::Parser;
use http_over_ssh::cli::{Cli, Commands, ServeArgs};
use http_over_ssh::config::RelayConfig;
use http_over_ssh::credentials;
use http_over_ssh::server::{self, Relay};
use http_over_ssh::stats::TunnelMetrics;
use http_over_ssh::tunnel::{RusshConnector, TunnelRegistry};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Display version information
    info!("HTTP over SSH v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Check { config } => check_config(config),
        Commands::Serve(args) => serve(args).await,
    }
}

async fn serve(args: &ServeArgs) -> Result<()> {
    let config = args.resolve().context("Invalid configuration")?;

    let tunnel_config =
        credentials::build_tunnel_config(&config).context("Failed to load SSH credentials")?;
    info!(
        "Loaded {} SSH key(s), connection timeout {:?}",
        tunnel_config.auth_methods.len(),
        tunnel_config.dial_timeout
    );

    let metrics = Arc::new(TunnelMetrics::new().context("Failed to register metrics")?);
    let registry = Arc::new(TunnelRegistry::new(
        tunnel_config,
        Arc::new(RusshConnector::new()),
        metrics,
    ));

    let relay = Arc::new(Relay::from_config(&config, registry));
    if config.metrics {
        info!("Metrics available at /metrics and /stats");
    }

    server::bind_and_serve(&config, relay, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

/// Check configuration file format
fn check_config(config_path: &str) -> Result<()> {
    let path = std::path::Path::new(config_path);
    if !path.exists() {
        anyhow::bail!("Configuration file not found: {}", config_path);
    }

    println!("Checking configuration file: {}\n", config_path);

    match RelayConfig::load(config_path) {
        Ok(config) => {
            println!("✓ Listen address: {}", config.listen);
            println!("✓ Default user: {}", config.default_user);
            println!("✓ Default SSH port: {}", config.default_port);
            println!(
                "✓ Connection timeout: {}",
                humantime::format_duration(config.timeout)
            );
            println!("✓ Metrics: {}", if config.metrics { "enabled" } else { "disabled" });

            for key in config.key_file_paths() {
                if key.exists() {
                    println!("✓ SSH key: {:?}", key);
                } else {
                    println!("⚠ Warning: SSH key not found: {:?}", key);
                }
            }

            let known_hosts = config.known_hosts_path();
            if known_hosts.exists() {
                println!("✓ known_hosts: {:?}", known_hosts);
            } else {
                println!("⚠ Warning: known_hosts file not found: {:?}", known_hosts);
            }

            println!("\n✓ Configuration is valid!");
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed!");
            println!("\nError details:");
            println!("{:#}", e);
            Err(e)
        }
    }
}
