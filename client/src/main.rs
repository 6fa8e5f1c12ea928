use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sealink_client::{EndpointConfig, SecureClient};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sealink-client")]
#[command(about = "Sealink mutual TLS echo client")]
struct Args {
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON configuration file; missing fields take defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host name or address
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Per-operation read/write timeout in seconds (0 disables it)
    #[arg(long)]
    io_timeout: Option<f64>,

    /// Messages to send; each one is echoed back
    #[arg(required = true)]
    messages: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => EndpointConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => EndpointConfig::client(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(io_timeout) = args.io_timeout {
        config.io_timeout = io_timeout;
    }

    let client = SecureClient::new(config).context("Failed to create client")?;
    let mut session = client.connect().context("Failed to connect to server")?;

    for message in &args.messages {
        let reply = session
            .echo(message.as_bytes())
            .with_context(|| format!("Failed to echo {:?}", message))?;
        println!("Server response: {}", String::from_utf8_lossy(&reply));
    }

    session.close().context("Failed to close session")?;
    Ok(())
}
