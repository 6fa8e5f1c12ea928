//! Sealink Echo Server
//!
//! A thread-per-connection server that accepts TCP connections, establishes
//! a mutually authenticated secure channel with each peer, and echoes every
//! length-prefixed payload it receives.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use anyhow::{anyhow, Context, Result};
use sealink_common::{
    resolver, timeout, EndpointConfig, ErrorKind, IoFault, Role, SecureChannel, SocketHandle,
    TlsContext, MAX_ECHO_FRAME,
};
use uuid::Uuid;

/// How long one `accept` call waits before the shutdown flag is checked
const ACCEPT_POLL_SECS: f64 = 0.25;

/// A secure echo server that requires and verifies client certificates.
#[derive(Clone)]
pub struct EchoServer {
    context: TlsContext,
    config:  EndpointConfig,
}

impl EchoServer {
    /// Creates a server from its endpoint settings, loading the server
    /// certificate, key and client CA bundle.
    pub fn new(config: EndpointConfig) -> Result<Self> {
        tracing::info!("Creating secure echo server with certificates:");
        tracing::info!("  - Server cert: {:?}", config.certs.cert_path);
        tracing::info!("  - Server key: {:?}", config.certs.key_path);
        tracing::info!("  - CA cert: {:?}", config.certs.ca_path);

        let context = TlsContext::from_paths(Role::Server, &config.certs)
            .context("Failed to build server TLS context")?;

        Ok(Self { context, config })
    }

    /// Binds the configured port and serves until `running` turns false.
    pub fn run_with_shutdown(&self, running: Arc<AtomicBool>) -> Result<()> {
        let listener = resolver::listen(self.config.port, self.config.use_ipv6)
            .with_context(|| format!("Failed to listen on port {}", self.config.port))?;
        let result = self.serve(&listener, &running);
        listener.close();
        result
    }

    /// Serves connections from an already listening socket until `running`
    /// turns false.
    pub fn serve(&self, listener: &SocketHandle, running: &AtomicBool) -> Result<()> {
        // accept() honours the receive deadline, which lets the loop notice
        // the shutdown flag.
        timeout::set_timeout(listener, ACCEPT_POLL_SECS)
            .context("Failed to set accept timeout")?;

        tracing::info!(
            "Secure echo server listening on: {:?}",
            listener.local_addr().ok()
        );

        let mut workers = Vec::new();
        while running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((socket, peer)) => {
                    tracing::info!("New connection received from {}", peer);
                    let server = self.clone();
                    workers.push(thread::spawn(move || server.handle_client(socket, peer)));
                }
                Err(sealink_common::Error::Accept { source })
                    if is_poll_timeout(&source) =>
                {
                    workers.retain(|w: &thread::JoinHandle<()>| !w.is_finished());
                }
                Err(e) if listener.is_closed() => {
                    tracing::warn!("Listener closed, no longer accepting: {}", e);
                    break;
                }
                Err(e) => {
                    tracing::error!("Connection error: {}", e);
                }
            }
        }

        tracing::info!("Server shutdown signal received, stopping gracefully");
        for worker in workers {
            let _ = worker.join();
        }
        Ok(())
    }

    /// Handles one client from handshake to socket close.
    fn handle_client(&self, socket: SocketHandle, peer: String) {
        let span = tracing::info_span!("connection", id = %Uuid::new_v4(), %peer);
        let _enter = span.enter();

        match self.serve_client(&socket) {
            Ok(frames) => tracing::info!("Client disconnected after {} frame(s)", frames),
            Err(e) => tracing::error!("Client error: {:#}", e),
        }
        socket.close();
    }

    fn serve_client(&self, socket: &SocketHandle) -> Result<u64> {
        let mut channel = SecureChannel::establish(
            socket,
            Role::Server,
            self.config.default_timeout,
            self.context.clone(),
        )
        .context("Failed to establish secure channel")?;

        tracing::info!(
            "✓ TLS connection established with client certificate {}",
            channel.peer_fingerprint().unwrap_or("-")
        );

        let result = echo_loop(&mut channel, self.config.io_timeout);
        channel.shutdown();
        result
    }

    /// Endpoint settings the server was created with
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }
}

/// Echoes length-prefixed frames until the client sends a zero length.
fn echo_loop(channel: &mut SecureChannel, io_timeout: f64) -> Result<u64> {
    let mut frames = 0;
    loop {
        let len = match channel.read_u32(io_timeout) {
            Ok(len) => len as usize,
            Err(e) if is_disconnect(&e) => {
                tracing::info!("Client closed the connection");
                return Ok(frames);
            }
            Err(e) => return Err(e).context("Failed to read frame length"),
        };
        if len == 0 {
            return Ok(frames);
        }
        if len > MAX_ECHO_FRAME {
            return Err(anyhow!("Frame too large: {} bytes", len));
        }

        let payload = channel
            .read(len, io_timeout)
            .context("Failed to read frame payload")?;
        tracing::debug!("Echoing {} bytes", len);

        channel
            .write_u32(len as u32, io_timeout)
            .context("Failed to send frame length")?;
        channel
            .write(&payload, io_timeout)
            .context("Failed to send frame payload")?;
        frames += 1;
    }
}

fn is_disconnect(err: &sealink_common::Error) -> bool {
    err.kind() == ErrorKind::Io && matches!(err.io_fault(), Some(IoFault::Closed | IoFault::Eof))
}

fn is_poll_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
    )
}
