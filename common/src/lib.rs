//! Sealink Common Library
//!
//! The secure connection core shared by the sealink server and client. It
//! provides authenticated, encrypted, byte-exact communication over TCP with
//! mutual certificate-based authentication:
//!
//! - Address resolution for listening and connecting sockets
//! - Socket handles with idempotent close and shared ownership
//! - Per-operation read/write deadlines
//! - Role-specific TLS contexts that always require a peer certificate
//! - Secure channels with exact-length timed reads and writes
//!
//! # Example
//!
//! ```no_run
//! use sealink_common::{resolver, CertPaths, Role, SecureChannel, TlsContext};
//!
//! # fn main() -> sealink_common::Result<()> {
//! let context = TlsContext::from_paths(Role::Client, &CertPaths::client())?;
//! let socket = resolver::connect("127.0.0.1", 9351)?;
//! let mut channel = SecureChannel::establish(&socket, Role::Client, 5.0, context)?;
//!
//! channel.write(b"hello", 5.0)?;
//! let reply = channel.read(5, 5.0)?;
//! assert_eq!(reply, b"hello");
//!
//! channel.shutdown();
//! socket.close();
//! # Ok(())
//! # }
//! ```

/// Secure channel: handshake, exact-length I/O and shutdown
pub mod channel;
/// Certificate locations and endpoint settings
pub mod config;
/// Process-wide crypto provider setup
pub mod crypto_guard;
pub mod error;
/// Listening and connecting sockets
pub mod resolver;
/// Socket handles
pub mod socket;
/// Read/write deadlines
pub mod timeout;
/// TLS context construction
pub mod tls_context;
#[cfg(feature = "test-support")]
pub mod testing;

// Re-export commonly used types for convenience
pub use channel::{verify_code, ChannelState, SecureChannel};
pub use config::{CertPaths, EndpointConfig, DEFAULT_PORT, MAX_ECHO_FRAME};
pub use error::{Error, ErrorKind, IoFault, Result};
pub use socket::{SocketHandle, SocketRole, UNKNOWN_PEER};
pub use tls_context::{Role, TlsContext};
