//! Sealink Client Library
//!
//! This crate provides a client for the sealink echo service. Each session
//! runs over TCP with mutual TLS: the client presents its own certificate and
//! accepts the server only if its chain leads to the trusted CA.
//!
//! # Example
//!
//! ```no_run
//! use sealink_client::{EndpointConfig, SecureClient};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut config = EndpointConfig::client();
//! config.io_timeout = 10.0;
//!
//! let client = SecureClient::new(config)?;
//! let mut session = client.connect()?;
//!
//! let reply = session.echo(b"hello")?;
//! assert_eq!(reply, b"hello");
//!
//! session.close()?;
//! # Ok(())
//! # }
//! ```

mod client;

pub use client::*;
// Re-export important types from sealink-common for convenience
pub use sealink_common::{CertPaths, EndpointConfig, DEFAULT_PORT};
