use anyhow::{anyhow, Context, Result};
use sealink_common::{
    resolver, EndpointConfig, Role, SecureChannel, SocketHandle, TlsContext, MAX_ECHO_FRAME,
};

/// A client that opens mutually authenticated sessions with an echo server
#[derive(Debug, Clone)]
pub struct SecureClient {
    context: TlsContext,
    config:  EndpointConfig,
}

impl SecureClient {
    /// Creates a client from its endpoint settings, loading the client
    /// certificate, key and CA bundle.
    pub fn new(config: EndpointConfig) -> Result<Self> {
        tracing::debug!("Loading client certificates...");
        tracing::debug!("  - Client cert: {:?}", config.certs.cert_path);
        tracing::debug!("  - Client key: {:?}", config.certs.key_path);
        tracing::debug!("  - CA cert: {:?}", config.certs.ca_path);

        let context = TlsContext::from_paths(Role::Client, &config.certs)
            .context("Failed to build client TLS context")?;

        Ok(Self { context, config })
    }

    /// Connects to the configured server and completes the handshake
    pub fn connect(&self) -> Result<ClientSession> {
        tracing::info!(
            "Connecting to sealink server: {}:{}",
            self.config.host,
            self.config.port
        );

        let socket = resolver::connect(&self.config.host, self.config.port)
            .context("Failed to connect to server socket")?;

        tracing::debug!("Socket connected, establishing TLS...");

        let channel = match SecureChannel::establish(
            &socket,
            Role::Client,
            self.config.default_timeout,
            self.context.clone(),
        ) {
            Ok(channel) => channel,
            Err(e) => {
                socket.close();
                return Err(e).context("Failed to establish secure channel");
            }
        };

        tracing::info!(
            "✓ Secure connection established, server certificate {}",
            channel.peer_fingerprint().unwrap_or("-")
        );

        Ok(ClientSession {
            socket,
            channel,
            io_timeout: self.config.io_timeout,
            frames_sent: 0,
        })
    }

    /// Endpoint settings the client was created with
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }
}

/// One open session with the echo server
pub struct ClientSession {
    socket:      SocketHandle,
    channel:     SecureChannel,
    io_timeout:  f64,
    frames_sent: u64,
}

impl ClientSession {
    /// Sends `payload` as one frame and returns the server's echo
    pub fn echo(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.is_empty() {
            return Err(anyhow!("Empty payloads are reserved for ending the session"));
        }
        if payload.len() > MAX_ECHO_FRAME {
            return Err(anyhow!(
                "Payload too large: {} bytes (limit {})",
                payload.len(),
                MAX_ECHO_FRAME
            ));
        }

        tracing::debug!("Sending frame of {} bytes", payload.len());
        self.channel
            .write_u32(payload.len() as u32, self.io_timeout)
            .context("Failed to send frame length")?;
        self.channel
            .write(payload, self.io_timeout)
            .context("Failed to send frame payload")?;

        let len = self
            .channel
            .read_u32(self.io_timeout)
            .context("Failed to read echo length")? as usize;
        if len != payload.len() {
            return Err(anyhow!(
                "Echo length mismatch: sent {}, got {}",
                payload.len(),
                len
            ));
        }
        let reply = self
            .channel
            .read(len, self.io_timeout)
            .context("Failed to read echo payload")?;

        self.frames_sent += 1;
        Ok(reply)
    }

    /// Writes bytes to the channel without framing
    pub fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.channel
            .write(data, self.io_timeout)
            .context("Failed to send raw bytes")
    }

    /// Reads exactly `len` bytes from the channel without framing
    pub fn recv_raw(&mut self, len: usize) -> Result<Vec<u8>> {
        self.channel
            .read(len, self.io_timeout)
            .context("Failed to receive raw bytes")
    }

    /// Number of frames echoed so far
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// SHA-256 fingerprint of the server's certificate
    pub fn server_fingerprint(&self) -> Option<&str> {
        self.channel.peer_fingerprint()
    }

    /// Ends the session: sends the zero-length terminator, shuts the channel
    /// down and closes the socket.
    pub fn close(mut self) -> Result<()> {
        tracing::debug!("Disconnecting from server...");
        let result = self
            .channel
            .write_u32(0, self.io_timeout)
            .context("Failed to send session terminator");
        self.channel.shutdown();
        self.socket.close();
        tracing::debug!("✓ Disconnected");
        result
    }
}
