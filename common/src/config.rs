use std::{env, fs, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Backlog passed to `listen` for every server socket
pub const LISTEN_BACKLOG: i32 = 5;

/// Port the echo server listens on when nothing else is configured
pub const DEFAULT_PORT: u16 = 9351;

/// Default deadline, in seconds, for handshakes and shutdowns
pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// Largest payload the echo service accepts in one frame
pub const MAX_ECHO_FRAME: usize = 1024 * 1024;

const CERTS_DIR_ENV: &str = "SEALINK_CERTS_DIR";
const DEFAULT_CERTS_DIR: &str = "certs";

const SERVER_CERTS_SUBDIR: &str = "server";
const CLIENT_CERTS_SUBDIR: &str = "client";

fn get_certs_dir() -> PathBuf {
    env::var(CERTS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CERTS_DIR))
}

/// Paths to the PEM material one side of a connection presents and trusts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertPaths {
    /// Path to the leaf certificate
    pub cert_path: PathBuf,
    /// Path to the private key matching the leaf certificate
    pub key_path:  PathBuf,
    /// Path to the trusted certificate authority bundle
    pub ca_path:   PathBuf,
}

impl CertPaths {
    /// Creates paths from explicit locations
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        ca_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path:  key_path.into(),
            ca_path:   ca_path.into(),
        }
    }

    /// Default server material, under the `server` subdirectory of the
    /// certs directory
    pub fn server() -> Self {
        let base = get_certs_dir();
        let dir = base.join(SERVER_CERTS_SUBDIR);
        Self::new(
            dir.join("server.pem"),
            dir.join("server.key.pem"),
            base.join("root-ca.pem"), // CA stays in the base certs dir
        )
    }

    /// Default client material, under the `client` subdirectory of the
    /// certs directory
    pub fn client() -> Self {
        let base = get_certs_dir();
        let dir = base.join(CLIENT_CERTS_SUBDIR);
        Self::new(
            dir.join("client.pem"),
            dir.join("client.key.pem"),
            base.join("root-ca.pem"),
        )
    }
}

/// Connection settings shared by the server and client binaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Host to connect to (clients only)
    pub host:            String,
    /// Port to listen on or connect to
    pub port:            u16,
    /// Listen on the IPv6 wildcard instead of IPv4 (servers only)
    pub use_ipv6:        bool,
    /// Deadline for handshakes and shutdowns, in seconds
    pub default_timeout: f64,
    /// Deadline for each read or write, in seconds
    pub io_timeout:      f64,
    /// Certificate, key and CA locations
    pub certs:           CertPaths,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host:            "127.0.0.1".to_string(),
            port:            DEFAULT_PORT,
            use_ipv6:        false,
            default_timeout: DEFAULT_TIMEOUT_SECS,
            io_timeout:      DEFAULT_TIMEOUT_SECS,
            certs:           CertPaths::client(),
        }
    }
}

impl EndpointConfig {
    /// Defaults for a server endpoint
    pub fn server() -> Self {
        Self {
            certs: CertPaths::server(),
            ..Self::default()
        }
    }

    /// Defaults for a client endpoint
    pub fn client() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file; missing fields take defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| Error::Config {
            op:     "read_config",
            path:   path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_json(&raw).map_err(|e| Error::Config {
            op:     "parse_config",
            path:   path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Parses a configuration from a JSON document
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = EndpointConfig::from_json(r#"{ "port": 4000, "io_timeout": 0.5 }"#).unwrap();
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.io_timeout, 0.5);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.default_timeout, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn server_and_client_paths_share_ca() {
        let server = CertPaths::server();
        let client = CertPaths::client();
        assert_eq!(server.ca_path, client.ca_path);
        assert!(server.cert_path.ends_with("server/server.pem"));
        assert!(client.key_path.ends_with("client/client.key.pem"));
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let err = EndpointConfig::from_file("/nonexistent/sealink.json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_string().contains("read_config"));
    }

    #[test]
    fn malformed_config_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealink.json");
        fs::write(&path, "{ \"port\": \"not a number\" }").unwrap();

        let err = EndpointConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config { op: "parse_config", .. }));
        assert_ne!(err.kind(), ErrorKind::TlsConfig);
    }
}
