use std::{fmt, fs, io::BufReader, path::Path, sync::Arc};

use rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        verify_server_cert_signed_by_trust_anchor,
    },
    crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    server::{ParsedCertificate, WebPkiClientVerifier},
    version, ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme,
    SupportedProtocolVersion,
};
use rustls_pemfile::{certs, private_key};

use crate::{
    config::CertPaths,
    crypto_guard,
    error::{Error, Result},
};

/// Protocol versions both roles negotiate.
///
/// TLS 1.2 only: the server rejects a client certificate before sending its
/// Finished, so the rejected client's own handshake fails too.
pub static PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] = &[&version::TLS12];

/// Which end of the handshake a context or channel plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Immutable, role-specific TLS configuration with mandatory peer
/// verification.
#[derive(Clone)]
pub enum TlsContext {
    Server(Arc<ServerConfig>),
    Client(Arc<ClientConfig>),
}

impl TlsContext {
    /// Loads the CA bundle, leaf certificate and private key and builds a
    /// context for `role`.
    ///
    /// Both roles require the peer to present a certificate that chains to
    /// the CA bundle.
    pub fn build(role: Role, cert_path: &Path, key_path: &Path, ca_path: &Path) -> Result<Self> {
        let provider = crypto_guard::ensure_initialized()?;

        tracing::debug!(
            ?role,
            cert = ?cert_path,
            key = ?key_path,
            ca = ?ca_path,
            "building TLS context"
        );

        let roots = load_roots(ca_path)?;
        let cert_chain = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;

        // Reject keys the provider cannot sign with before pairing them
        // with the certificate.
        provider
            .key_provider
            .load_private_key(key.clone_key())
            .map_err(|e| tls_error("use_private_key", format!("{}: {e}", key_path.display())))?;

        match role {
            Role::Server => {
                let verifier =
                    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                        .build()
                        .map_err(|e| tls_error("client_verifier", e))?;

                let config = ServerConfig::builder_with_provider(provider)
                    .with_protocol_versions(PROTOCOL_VERSIONS)
                    .map_err(|e| tls_error("protocol_versions", e))?
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(cert_chain, key)
                    .map_err(|e| tls_error("check_private_key", e))?;

                Ok(TlsContext::Server(Arc::new(config)))
            }
            Role::Client => {
                let verifier = CaChainVerifier::new(roots, provider.clone());

                let config = ClientConfig::builder_with_provider(provider)
                    .with_protocol_versions(PROTOCOL_VERSIONS)
                    .map_err(|e| tls_error("protocol_versions", e))?
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(verifier))
                    .with_client_auth_cert(cert_chain, key)
                    .map_err(|e| tls_error("check_private_key", e))?;

                Ok(TlsContext::Client(Arc::new(config)))
            }
        }
    }

    /// Builds a context from a set of certificate paths
    pub fn from_paths(role: Role, paths: &CertPaths) -> Result<Self> {
        Self::build(role, &paths.cert_path, &paths.key_path, &paths.ca_path)
    }

    /// Role this context was built for
    pub fn role(&self) -> Role {
        match self {
            TlsContext::Server(_) => Role::Server,
            TlsContext::Client(_) => Role::Client,
        }
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("role", &self.role())
            .finish_non_exhaustive()
    }
}

fn tls_error(op: &'static str, reason: impl fmt::Display) -> Error {
    Error::TlsConfig {
        op,
        reason: reason.to_string(),
    }
}

fn read_pem(op: &'static str, path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| tls_error(op, format!("{}: {e}", path.display())))
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    const OP: &str = "load_verify_locations";

    let pem = read_pem(OP, path)?;
    let ca_certs = certs(&mut BufReader::new(&*pem))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error(OP, format!("{}: {e}", path.display())))?;

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(ca_certs);
    if ignored > 0 {
        tracing::warn!(ignored, ca = ?path, "skipped unparsable CA certificates");
    }
    if added == 0 {
        return Err(tls_error(
            OP,
            format!("no valid CA certificates found in {}", path.display()),
        ));
    }
    Ok(roots)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    const OP: &str = "use_certificate_file";

    let pem = read_pem(OP, path)?;
    let chain = certs(&mut BufReader::new(&*pem))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| tls_error(OP, format!("{}: {e}", path.display())))?;
    if chain.is_empty() {
        return Err(tls_error(
            OP,
            format!("no certificate found in {}", path.display()),
        ));
    }
    Ok(chain)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    const OP: &str = "use_private_key_file";

    let pem = read_pem(OP, path)?;
    private_key(&mut BufReader::new(&*pem))
        .map_err(|e| tls_error(OP, format!("{}: {e}", path.display())))?
        .ok_or_else(|| tls_error(OP, format!("no private key found in {}", path.display())))
}

/// Verifies a server certificate chain against the trusted CA bundle.
///
/// Identity comes from the CA signature alone; the certificate is not bound
/// to the name used to reach the server.
#[derive(Debug)]
struct CaChainVerifier {
    roots:    RootCertStore,
    provider: Arc<CryptoProvider>,
}

impl CaChainVerifier {
    fn new(roots: RootCertStore, provider: Arc<CryptoProvider>) -> Self {
        Self { roots, provider }
    }
}

impl ServerCertVerifier for CaChainVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn missing_ca_bundle_is_config_error() {
        let missing = PathBuf::from("/nonexistent/sealink");
        let err = TlsContext::build(
            Role::Server,
            &missing.join("server.pem"),
            &missing.join("server.key.pem"),
            &missing.join("root-ca.pem"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TlsConfig);
        assert!(err.to_string().contains("load_verify_locations"));
    }

    #[test]
    fn only_tls12_is_offered() {
        assert_eq!(PROTOCOL_VERSIONS.len(), 1);
        assert_eq!(PROTOCOL_VERSIONS[0].version, rustls::ProtocolVersion::TLSv1_2);
    }

    #[test]
    fn empty_ca_bundle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("root-ca.pem");
        fs::write(&ca, "not a certificate\n").unwrap();
        let err = load_roots(&ca).unwrap_err();
        assert!(err.to_string().contains("no valid CA certificates"));
    }
}
