//! Kneesocks - HTTP(S) forward proxy over SOCKS5
//!
//! This is the main entry point for the Kneesocks application.

use anyhow::{Context, Result};
use clap::Parser;
use kneesocks::config::{load_config, ProxyConfig};
use kneesocks::ProxyServer;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Kneesocks - relay HTTP proxy traffic through a SOCKS5 proxy
#[derive(Parser, Debug)]
#[command(name = "kneesocks")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for the HTTP proxy listener
    #[arg(short, long)]
    port: Option<u16>,

    /// Host of the upstream SOCKS proxy
    #[arg(long)]
    socks_host: Option<String>,

    /// Port of the upstream SOCKS proxy
    #[arg(long)]
    socks_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

impl Args {
    /// Load the configuration file, if any, and apply command line overrides
    fn into_config(self) -> Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(port) = self.port {
            config.server.http_port = port;
        }
        if let Some(host) = self.socks_host {
            config.upstream.host = host;
        }
        if let Some(port) = self.socks_port {
            config.upstream.port = port;
        }

        config
            .validate()
            .context("Invalid configuration after command line overrides")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    let config_path = args.config.clone();
    let config = args.into_config()?;

    info!("Kneesocks v{}", kneesocks::VERSION);
    if let Some(path) = config_path {
        info!("Configuration loaded from: {:?}", path);
    }
    info!(
        "Upstream SOCKS endpoint: {}:{}",
        config.upstream.host, config.upstream.port
    );

    let server = ProxyServer::from_config(config);
    server.start().await.context("Failed to start proxy")?;

    wait_for_signal().await;

    server.stop().await.context("Failed to stop proxy")?;
    Ok(())
}

/// Wait for Ctrl+C or a termination signal
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        // On Windows, only handle Ctrl+C
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
