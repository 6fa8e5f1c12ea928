use std::{
    fmt,
    io::{self, Read, Write},
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

use rustls::{
    pki_types::{CertificateDer, ServerName},
    CertificateError, ClientConnection, Connection, ServerConnection,
};
use sha2::{Digest, Sha256};
use socket2::Socket;

use crate::{
    crypto_guard,
    error::{Error, PeerClosed, Result},
    socket::SocketHandle,
    timeout,
    tls_context::{Role, TlsContext},
};

/// Numeric peer-certificate verification results, in X.509 verify-result
/// numbering.
pub mod verify_code {
    pub const OK: u32 = 0;
    pub const UNABLE_TO_DECODE: u32 = 4;
    pub const SIGNATURE_FAILURE: u32 = 7;
    pub const NOT_YET_VALID: u32 = 9;
    pub const EXPIRED: u32 = 10;
    pub const UNKNOWN_ISSUER: u32 = 20;
    pub const REVOKED: u32 = 23;
    pub const INVALID_PURPOSE: u32 = 26;
    /// No peer certificate, or a failure with no more specific code
    pub const APPLICATION_VERIFICATION: u32 = 50;
}

/// Lifecycle of a [`SecureChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninitialized,
    Handshaking,
    Established,
    ShutDown,
}

/// A mutually authenticated TLS session bound to a socket handle.
///
/// The channel retains a clone of the socket handle for as long as the
/// session lives. Shutting the channel down releases that clone without
/// closing the descriptor; closing the socket stays with its owner.
///
/// A channel is meant for one logical operation at a time. Callers that
/// share one across threads must serialize access, including `shutdown`
/// against in-flight reads and writes.
pub struct SecureChannel {
    role:             Role,
    state:            ChannelState,
    default_timeout:  f64,
    socket:           Option<SocketHandle>,
    context:          Option<TlsContext>,
    session:          Option<Connection>,
    peer_closed:      bool,
    peer_fingerprint: Option<String>,
}

impl SecureChannel {
    /// Binds a new session to `socket` without handshaking.
    ///
    /// Applies `default_timeout` to the socket right away; it bounds the
    /// handshake and every later shutdown.
    pub fn new(
        socket: &SocketHandle,
        role: Role,
        default_timeout: f64,
        context: TlsContext,
    ) -> Result<Self> {
        if context.role() != role {
            return Err(Error::TlsConfig {
                op:     "establish",
                reason: format!("context built for {:?} used as {:?}", context.role(), role),
            });
        }
        crypto_guard::ensure_initialized()?;
        timeout::set_timeout(socket, default_timeout)?;

        let session = match &context {
            TlsContext::Server(config) => {
                ServerConnection::new(config.clone())
                    .map(Connection::Server)
                    .map_err(|e| handshake_error(role, e))?
            }
            TlsContext::Client(config) => {
                let name = server_name(socket);
                ClientConnection::new(config.clone(), name)
                    .map(Connection::Client)
                    .map_err(|e| handshake_error(role, e))?
            }
        };

        Ok(Self {
            role,
            state: ChannelState::Uninitialized,
            default_timeout,
            socket: Some(socket.clone()),
            context: Some(context),
            session: Some(session),
            peer_closed: false,
            peer_fingerprint: None,
        })
    }

    /// Creates a channel and completes the handshake.
    ///
    /// On failure the session is released before the error is returned; the
    /// socket itself is left open for its owner to close.
    pub fn establish(
        socket: &SocketHandle,
        role: Role,
        default_timeout: f64,
        context: TlsContext,
    ) -> Result<Self> {
        let mut channel = Self::new(socket, role, default_timeout, context)?;
        channel.handshake()?;
        Ok(channel)
    }

    /// Runs the handshake and verifies the peer certificate.
    pub fn handshake(&mut self) -> Result<()> {
        match self.state {
            ChannelState::Established => return Ok(()),
            ChannelState::ShutDown | ChannelState::Handshaking => {
                return Err(Error::ChannelClosed { op: "handshake" });
            }
            ChannelState::Uninitialized => {}
        }

        self.state = ChannelState::Handshaking;
        match self.drive_handshake().and_then(|()| self.verify_peer()) {
            Ok(()) => {
                self.state = ChannelState::Established;
                tracing::info!(
                    role = ?self.role,
                    peer = self.peer_fingerprint.as_deref().unwrap_or("-"),
                    "secure channel established"
                );
                Ok(())
            }
            Err(e) => {
                tracing::debug!(role = ?self.role, error = %e, "handshake failed");
                self.release();
                Err(e)
            }
        }
    }

    fn drive_handshake(&mut self) -> Result<()> {
        let role = self.role;
        let socket = self
            .socket
            .as_ref()
            .and_then(SocketHandle::socket)
            .ok_or(Error::ChannelClosed { op: "handshake" })?;
        let conn = self
            .session
            .as_mut()
            .ok_or(Error::ChannelClosed { op: "handshake" })?;
        let mut io = &*socket;

        while conn.is_handshaking() {
            if conn.wants_write() {
                conn.write_tls(&mut io)
                    .map_err(|e| handshake_error(role, e))?;
                continue;
            }
            if !conn.wants_read() {
                break;
            }
            match conn.read_tls(&mut io) {
                Ok(0) => {
                    return Err(handshake_error(
                        role,
                        "connection closed during handshake",
                    ));
                }
                Ok(_) => {}
                Err(e) => return Err(handshake_error(role, e)),
            }
            if let Err(e) = conn.process_new_packets() {
                // Let the peer see the alert explaining the failure.
                let _ = flush_records(conn, &socket);
                return Err(tls_failure(role, e));
            }
        }

        flush_records(conn, &socket).map_err(|e| handshake_error(role, e))?;
        if conn.is_handshaking() {
            return Err(handshake_error(role, "handshake stalled"));
        }
        Ok(())
    }

    fn verify_peer(&mut self) -> Result<()> {
        let chain = self.session.as_ref().and_then(peer_certificates);
        let Some(leaf) = chain.and_then(|certs| certs.first()) else {
            return Err(Error::CertificateVerification {
                code:   verify_code::APPLICATION_VERIFICATION,
                reason: "peer presented no certificate".to_string(),
            });
        };
        self.peer_fingerprint = Some(hex::encode(Sha256::digest(leaf.as_ref())));
        Ok(())
    }

    /// Reads exactly `length` bytes, waiting at most `timeout` seconds for
    /// each underlying transfer.
    ///
    /// Any transfer that makes no progress, including an expired deadline,
    /// fails the whole read; partially received bytes are discarded.
    pub fn read(&mut self, length: usize, timeout: f64) -> Result<Vec<u8>> {
        let socket = self.begin_io("read", timeout)?;

        let mut buf = vec![0u8; length];
        let mut total = 0;
        while total < length {
            let n = self
                .read_some(&socket, &mut buf[total..])
                .map_err(|e| Error::io("read", e))?;
            total += n;
        }
        Ok(buf)
    }

    /// Writes all of `data`, waiting at most `timeout` seconds for each
    /// underlying transfer.
    pub fn write(&mut self, data: &[u8], timeout: f64) -> Result<()> {
        let socket = self.begin_io("write", timeout)?;
        let conn = self
            .session
            .as_mut()
            .ok_or(Error::ChannelClosed { op: "write" })?;

        let mut sent = 0;
        while sent < data.len() {
            let n = conn
                .writer()
                .write(&data[sent..])
                .map_err(|e| Error::io("write", e))?;
            flush_records(conn, &socket).map_err(|e| Error::io("write", e))?;
            if n == 0 {
                return Err(Error::io(
                    "write",
                    io::Error::new(io::ErrorKind::WriteZero, "session accepted no data"),
                ));
            }
            sent += n;
        }
        Ok(())
    }

    /// Reads a 4-byte unsigned integer in network byte order
    pub fn read_u32(&mut self, timeout: f64) -> Result<u32> {
        let raw = self.read(4, timeout)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&raw);
        Ok(u32::from_be_bytes(bytes))
    }

    /// Writes a 4-byte unsigned integer in network byte order
    pub fn write_u32(&mut self, value: u32, timeout: f64) -> Result<()> {
        self.write(&value.to_be_bytes(), timeout)
    }

    fn begin_io(&self, op: &'static str, seconds: f64) -> Result<Arc<Socket>> {
        if self.state != ChannelState::Established {
            return Err(Error::ChannelClosed { op });
        }
        let handle = self.socket.as_ref().ok_or(Error::ChannelClosed { op })?;
        let socket = handle.socket().ok_or(Error::ChannelClosed { op })?;
        timeout::set_timeout(handle, seconds)?;
        Ok(socket)
    }

    /// One decrypting transfer into `buf`; never returns `Ok(0)`.
    fn read_some(&mut self, socket: &Socket, buf: &mut [u8]) -> io::Result<usize> {
        let conn = self
            .session
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        let mut io = socket;

        loop {
            match conn.reader().read(buf) {
                Ok(0) => {
                    self.peer_closed = true;
                    return Err(PeerClosed.into_io_error());
                }
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            flush_records(conn, socket)?;
            if conn.read_tls(&mut io)? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed without close_notify",
                ));
            }
            match conn.process_new_packets() {
                Ok(state) => {
                    if state.peer_has_closed() {
                        self.peer_closed = true;
                    }
                }
                Err(e) => {
                    let _ = flush_records(conn, socket);
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
            }
        }
    }

    /// Ends the session. Never fails and may be called any number of times.
    ///
    /// An established session re-applies the default timeout and sends
    /// close_notify. If the peer's close_notify has not been seen yet, one
    /// more attempt is made to complete the exchange, whatever its outcome.
    /// The session and context are then released and the socket reference
    /// dropped without closing the descriptor.
    pub fn shutdown(&mut self) {
        if let Some(mut conn) = self.session.take() {
            if self.state == ChannelState::Established {
                if let Some(handle) = &self.socket {
                    self.notify_close(&mut conn, handle);
                }
            }
            drop(conn);
        }
        self.release();
    }

    fn notify_close(&self, conn: &mut Connection, handle: &SocketHandle) {
        if let Err(e) = timeout::set_timeout(handle, self.default_timeout) {
            tracing::warn!(error = %e, "shutdown: could not restore default timeout");
        }
        let Some(socket) = handle.socket() else {
            return;
        };

        send_close_notify(conn);
        if let Err(e) = flush_records(conn, &socket) {
            tracing::warn!(error = %e, "shutdown: close_notify not sent");
        }
        if self.peer_closed {
            return;
        }

        match await_close_notify(conn, &socket) {
            Ok(true) => tracing::debug!("shutdown: peer acknowledged"),
            Ok(false) => tracing::debug!("shutdown: peer has not acknowledged"),
            Err(e) => tracing::debug!(error = %e, "shutdown: retry failed"),
        }
    }

    fn release(&mut self) {
        self.session = None;
        self.context = None;
        self.socket = None;
        self.state = ChannelState::ShutDown;
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Side of the handshake this channel played
    pub fn role(&self) -> Role {
        self.role
    }

    /// Deadline restored before every shutdown, in seconds
    pub fn default_timeout(&self) -> f64 {
        self.default_timeout
    }

    /// Hex SHA-256 of the peer's end-entity certificate once established
    pub fn peer_fingerprint(&self) -> Option<&str> {
        self.peer_fingerprint.as_deref()
    }

    /// Context the session was created from, until shutdown
    pub fn context(&self) -> Option<&TlsContext> {
        self.context.as_ref()
    }

    /// Socket the session is bound to, until shutdown
    pub fn socket(&self) -> Option<&SocketHandle> {
        self.socket.as_ref()
    }
}

impl Drop for SecureChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("default_timeout", &self.default_timeout)
            .field("peer_fingerprint", &self.peer_fingerprint)
            .finish_non_exhaustive()
    }
}

/// Writes every pending TLS record to the socket.
fn flush_records(conn: &mut Connection, socket: &Socket) -> io::Result<()> {
    let mut io = socket;
    while conn.wants_write() {
        if conn.write_tls(&mut io)? == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero));
        }
    }
    Ok(())
}

/// Reads once more from the peer and reports whether its close_notify
/// has arrived.
fn await_close_notify(conn: &mut Connection, socket: &Socket) -> io::Result<bool> {
    let mut io = socket;
    if conn.read_tls(&mut io)? == 0 {
        return Ok(false);
    }
    let state = conn
        .process_new_packets()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(state.peer_has_closed())
}

fn send_close_notify(conn: &mut Connection) {
    match conn {
        Connection::Client(c) => c.send_close_notify(),
        Connection::Server(s) => s.send_close_notify(),
    }
}

fn peer_certificates(conn: &Connection) -> Option<&[CertificateDer<'static>]> {
    match conn {
        Connection::Client(c) => c.peer_certificates(),
        Connection::Server(s) => s.peer_certificates(),
    }
}

/// SNI/verification name for a client session; identity is checked against
/// the CA only, so the peer IP is as good as any.
fn server_name(socket: &SocketHandle) -> ServerName<'static> {
    match socket.peer_addr() {
        Ok(addr) => ServerName::from(addr.ip()),
        Err(_) => ServerName::from(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    }
}

fn handshake_op(role: Role) -> &'static str {
    match role {
        Role::Server => "tls_accept",
        Role::Client => "tls_connect",
    }
}

fn handshake_error(role: Role, reason: impl fmt::Display) -> Error {
    Error::Handshake {
        op:     handshake_op(role),
        reason: reason.to_string(),
    }
}

/// Maps a TLS failure during the handshake, singling out certificates that
/// this side rejected.
fn tls_failure(role: Role, err: rustls::Error) -> Error {
    match &err {
        rustls::Error::InvalidCertificate(cert_err) => {
            Error::CertificateVerification {
                code:   certificate_code(cert_err),
                reason: err.to_string(),
            }
        }
        rustls::Error::NoCertificatesPresented => {
            Error::CertificateVerification {
                code:   verify_code::APPLICATION_VERIFICATION,
                reason: err.to_string(),
            }
        }
        _ => handshake_error(role, err),
    }
}

fn certificate_code(err: &CertificateError) -> u32 {
    match err {
        CertificateError::BadEncoding => verify_code::UNABLE_TO_DECODE,
        CertificateError::BadSignature => verify_code::SIGNATURE_FAILURE,
        CertificateError::NotValidYet => verify_code::NOT_YET_VALID,
        CertificateError::Expired => verify_code::EXPIRED,
        CertificateError::UnknownIssuer => verify_code::UNKNOWN_ISSUER,
        CertificateError::Revoked => verify_code::REVOKED,
        CertificateError::InvalidPurpose => verify_code::INVALID_PURPOSE,
        _ => verify_code::APPLICATION_VERIFICATION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_errors_map_to_verify_codes() {
        assert_eq!(
            certificate_code(&CertificateError::UnknownIssuer),
            verify_code::UNKNOWN_ISSUER
        );
        assert_eq!(
            certificate_code(&CertificateError::Expired),
            verify_code::EXPIRED
        );
        assert_eq!(
            certificate_code(&CertificateError::NotValidForName),
            verify_code::APPLICATION_VERIFICATION
        );
    }

    #[test]
    fn rejected_certificate_is_verification_error() {
        let err = tls_failure(
            Role::Server,
            rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer),
        );
        match err {
            Error::CertificateVerification { code, .. } => {
                assert_eq!(code, verify_code::UNKNOWN_ISSUER)
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = tls_failure(Role::Server, rustls::Error::NoCertificatesPresented);
        assert_eq!(err.kind(), crate::error::ErrorKind::CertificateVerification);
    }

    #[test]
    fn other_tls_failures_name_the_role() {
        let err = tls_failure(Role::Client, rustls::Error::DecryptError);
        assert_eq!(err.kind(), crate::error::ErrorKind::Handshake);
        assert!(err.to_string().contains("tls_connect"));
    }
}
