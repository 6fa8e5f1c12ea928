use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use clap::Parser;
use sealink_common::EndpointConfig;
use sealink_server::EchoServer;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sealink-server")]
#[command(about = "Sealink mutual TLS echo server")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON configuration file; missing fields take defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen on the IPv6 wildcard address
    #[arg(long)]
    ipv6: bool,

    /// Per-operation read/write timeout in seconds (0 disables it)
    #[arg(long)]
    io_timeout: Option<f64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    tracing::info!("Starting sealink echo server...");

    let mut config = match &args.config {
        Some(path) => EndpointConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => EndpointConfig::server(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.ipv6 {
        config.use_ipv6 = true;
    }
    if let Some(io_timeout) = args.io_timeout {
        config.io_timeout = io_timeout;
    }

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        tracing::info!("Interrupt received, shutting down");
        flag.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl-C handler")?;

    let server = EchoServer::new(config).context("Failed to create server")?;
    server.run_with_shutdown(running).context("Server error")?;
    Ok(())
}
