//! Throwaway PKI for tests: a trusted CA with server and client leaves, and a
//! second CA nobody trusts with leaves of its own.
//!
//! Only compiled with the `test-support` feature.

use std::{fs, io, path::Path};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use tempfile::TempDir;

use crate::{config::CertPaths, error::Result, tls_context::Role, TlsContext};

/// Certificate material written to a temporary directory that lives as
/// long as the `Pki`.
pub struct Pki {
    _dir:             TempDir,
    pub server:       CertPaths,
    pub client:       CertPaths,
    pub rogue_client: CertPaths,
    pub rogue_server: CertPaths,
}

struct Authority {
    cert: Certificate,
    key:  KeyPair,
}

fn rcgen_error(e: rcgen::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

fn authority(name: &str) -> io::Result<Authority> {
    let key = KeyPair::generate().map_err(rcgen_error)?;
    let mut params = CertificateParams::new(Vec::<String>::new()).map_err(rcgen_error)?;
    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let cert = params.self_signed(&key).map_err(rcgen_error)?;
    Ok(Authority { cert, key })
}

fn leaf(dir: &Path, name: &str, issuer: &Authority, ca_path: &Path) -> io::Result<CertPaths> {
    let key = KeyPair::generate().map_err(rcgen_error)?;
    let mut params =
        CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .map_err(rcgen_error)?;
    params.distinguished_name.push(DnType::CommonName, name);
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    let cert = params
        .signed_by(&key, &issuer.cert, &issuer.key)
        .map_err(rcgen_error)?;

    let cert_path = dir.join(format!("{name}.pem"));
    let key_path = dir.join(format!("{name}.key.pem"));
    fs::write(&cert_path, cert.pem())?;
    fs::write(&key_path, key.serialize_pem())?;
    Ok(CertPaths::new(cert_path, key_path, ca_path))
}

impl Pki {
    /// Generates both CAs and all four leaves. Every leaf trusts only the
    /// first CA.
    pub fn generate() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = authority("sealink test root")?;
        let rogue = authority("sealink rogue root")?;

        let ca_path = dir.path().join("root-ca.pem");
        fs::write(&ca_path, root.cert.pem())?;

        let server = leaf(dir.path(), "server", &root, &ca_path)?;
        let client = leaf(dir.path(), "client", &root, &ca_path)?;
        let rogue_client = leaf(dir.path(), "rogue-client", &rogue, &ca_path)?;
        let rogue_server = leaf(dir.path(), "rogue-server", &rogue, &ca_path)?;

        Ok(Self {
            _dir: dir,
            server,
            client,
            rogue_client,
            rogue_server,
        })
    }

    pub fn server_context(&self) -> Result<TlsContext> {
        TlsContext::from_paths(Role::Server, &self.server)
    }

    pub fn client_context(&self) -> Result<TlsContext> {
        TlsContext::from_paths(Role::Client, &self.client)
    }
}
