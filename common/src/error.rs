use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// Result alias used throughout the secure connection core
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by sockets, TLS contexts and secure channels
#[derive(Debug, Error)]
pub enum Error {
    /// A hostname could not be resolved to any endpoint
    #[error("{op}: failed to resolve {host}:{port}: {source}")]
    Resolution {
        op:     &'static str,
        host:   String,
        port:   u16,
        #[source]
        source: io::Error,
    },

    /// Creating, binding or listening on a server socket failed
    #[error("{op}: failed to listen on port {port}: {source}")]
    Bind {
        op:     &'static str,
        port:   u16,
        #[source]
        source: io::Error,
    },

    /// No resolved endpoint accepted the connection
    #[error("failed to connect to {host}:{port} ({attempts} candidate(s) tried){}", last_error_suffix(.last_error))]
    Connect {
        host:       String,
        port:       u16,
        attempts:   usize,
        last_error: Option<io::Error>,
    },

    /// Accepting a pending connection failed
    #[error("accept: {source}")]
    Accept {
        #[source]
        source: io::Error,
    },

    /// A read/write deadline could not be applied to a socket
    #[error("set_timeout({seconds}): {source}")]
    TimeoutConfig {
        seconds: f64,
        #[source]
        source:  io::Error,
    },

    /// An endpoint configuration file could not be read or parsed
    #[error("{op}: {}: {reason}", .path.display())]
    Config {
        op:     &'static str,
        path:   PathBuf,
        reason: String,
    },

    /// Loading or validating TLS material failed
    #[error("TLS error [func {op}]: {reason}")]
    TlsConfig { op: &'static str, reason: String },

    /// The TLS handshake did not complete
    #[error("TLS error [func {op}]: {reason}")]
    Handshake { op: &'static str, reason: String },

    /// The peer certificate is absent or did not verify
    #[error("certificate doesn't verify. Verify result: {code} ({reason})")]
    CertificateVerification { code: u32, reason: String },

    /// An encrypted read or write failed
    #[error("TLS error [func {op}] [{fault}]: {source}")]
    Io {
        op:     &'static str,
        fault:  IoFault,
        #[source]
        source: io::Error,
    },

    /// The channel has no live socket or session
    #[error("attempt to {op} on a closed channel")]
    ChannelClosed { op: &'static str },

    /// The crypto concurrency guard could not be set up
    #[error("failed to initialize crypto provider: {0}")]
    Init(String),
}

fn last_error_suffix(err: &Option<io::Error>) -> String {
    match err {
        Some(e) => format!(": {e}"),
        None => String::new(),
    }
}

/// Fieldless discriminant of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Resolution,
    Bind,
    Connect,
    Accept,
    TimeoutConfig,
    Config,
    TlsConfig,
    Handshake,
    CertificateVerification,
    Io,
    ChannelClosed,
    Init,
}

impl Error {
    /// Returns the kind of this error without its payload
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Resolution { .. } => ErrorKind::Resolution,
            Error::Bind { .. } => ErrorKind::Bind,
            Error::Connect { .. } => ErrorKind::Connect,
            Error::Accept { .. } => ErrorKind::Accept,
            Error::TimeoutConfig { .. } => ErrorKind::TimeoutConfig,
            Error::Config { .. } => ErrorKind::Config,
            Error::TlsConfig { .. } => ErrorKind::TlsConfig,
            Error::Handshake { .. } => ErrorKind::Handshake,
            Error::CertificateVerification { .. } => ErrorKind::CertificateVerification,
            Error::Io { .. } => ErrorKind::Io,
            Error::ChannelClosed { .. } => ErrorKind::ChannelClosed,
            Error::Init(_) => ErrorKind::Init,
        }
    }

    /// Returns the I/O fault classification for [`Error::Io`]
    pub fn io_fault(&self) -> Option<IoFault> {
        match self {
            Error::Io { fault, .. } => Some(*fault),
            _ => None,
        }
    }

    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Error::Io {
            op,
            fault: IoFault::classify(&source),
            source,
        }
    }
}

/// Classification of a failed encrypted read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoFault {
    /// The peer sent close_notify; no further data will arrive
    Closed,
    /// The transport reached EOF without a close_notify
    Eof,
    /// The deadline expired before any progress was made
    Timeout,
    /// Any other socket error
    Transport,
    /// Malformed records, alerts or other TLS protocol failures
    Protocol,
}

/// Payload of the I/O error raised once the peer's close_notify has been
/// read
#[derive(Debug, Error)]
#[error("peer closed the session")]
pub(crate) struct PeerClosed;

impl PeerClosed {
    pub(crate) fn into_io_error(self) -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionAborted, self)
    }
}

impl IoFault {
    pub(crate) fn classify(err: &io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<PeerClosed>()) {
            return IoFault::Closed;
        }
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => IoFault::Timeout,
            io::ErrorKind::UnexpectedEof => IoFault::Eof,
            io::ErrorKind::InvalidData => IoFault::Protocol,
            _ => IoFault::Transport,
        }
    }
}

impl fmt::Display for IoFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IoFault::Closed => "zero return",
            IoFault::Eof => "unexpected eof",
            IoFault::Timeout => "timeout",
            IoFault::Transport => "syscall",
            IoFault::Protocol => "protocol",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_socket_timeouts() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(IoFault::classify(&err), IoFault::Timeout);
        let err = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(IoFault::classify(&err), IoFault::Timeout);
        let err = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(IoFault::classify(&err), IoFault::Transport);
    }

    #[test]
    fn only_close_notify_counts_as_closed() {
        let err = PeerClosed.into_io_error();
        assert_eq!(IoFault::classify(&err), IoFault::Closed);
        let err = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert_eq!(IoFault::classify(&err), IoFault::Transport);
        let err = io::Error::new(io::ErrorKind::ConnectionAborted, "software caused abort");
        assert_eq!(IoFault::classify(&err), IoFault::Transport);
    }

    #[test]
    fn io_error_carries_fault_and_op() {
        let err = Error::io("read", io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.io_fault(), Some(IoFault::Eof));
        assert!(err.to_string().contains("func read"));
    }

    #[test]
    fn connect_message_includes_last_error() {
        let err = Error::Connect {
            host:       "example".into(),
            port:       1,
            attempts:   2,
            last_error: Some(io::Error::from(io::ErrorKind::ConnectionRefused)),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("failed to connect to example:1 (2 candidate(s) tried): "));
    }
}
