//! Throwaway PKI and connection helpers for integration tests.

#![allow(dead_code)]

use std::{fs, sync::Arc, thread};

use sealink_common::{resolver, tls_context, Result, Role, SecureChannel, SocketHandle, TlsContext};
pub use sealink_common::testing::Pki;

pub const TIMEOUT: f64 = 5.0;

/// Both ends of a handshake attempt over loopback.
pub struct Attempt {
    pub server_socket:  SocketHandle,
    pub server_channel: Result<SecureChannel>,
    pub client_socket:  SocketHandle,
    pub client_channel: Result<SecureChannel>,
}

/// Listens on an ephemeral port, connects, and handshakes both sides
/// concurrently.
pub fn handshake(server_ctx: TlsContext, client_ctx: TlsContext) -> Attempt {
    handshake_within(server_ctx, client_ctx, TIMEOUT)
}

/// Same as [`handshake`], with `default_timeout` as both channels' default
/// timeout.
pub fn handshake_within(
    server_ctx: TlsContext,
    client_ctx: TlsContext,
    default_timeout: f64,
) -> Attempt {
    let listener = resolver::listen(0, false).expect("listen");
    let port = listener.local_addr().expect("local addr").port();

    let server = thread::spawn(move || {
        let (socket, _peer) = listener.accept().expect("accept");
        let channel = SecureChannel::establish(&socket, Role::Server, default_timeout, server_ctx);
        listener.close();
        (socket, channel)
    });

    let client_socket = resolver::connect("127.0.0.1", port).expect("connect");
    let client_channel =
        SecureChannel::establish(&client_socket, Role::Client, default_timeout, client_ctx);
    let (server_socket, server_channel) = server.join().expect("server thread");

    Attempt {
        server_socket,
        server_channel,
        client_socket,
        client_channel,
    }
}

/// An established pair of channels
pub fn established(pki: &Pki) -> (SocketHandle, SecureChannel, SocketHandle, SecureChannel) {
    established_within(pki, TIMEOUT)
}

/// An established pair of channels with the given default timeout
pub fn established_within(
    pki: &Pki,
    default_timeout: f64,
) -> (SocketHandle, SecureChannel, SocketHandle, SecureChannel) {
    let attempt = handshake_within(
        pki.server_context().expect("server context"),
        pki.client_context().expect("client context"),
        default_timeout,
    );
    (
        attempt.server_socket,
        attempt.server_channel.expect("server handshake"),
        attempt.client_socket,
        attempt.client_channel.expect("client handshake"),
    )
}

/// Client context that presents no certificate at all
pub fn anonymous_client_context(pki: &Pki) -> TlsContext {
    use std::io::BufReader;

    let provider = sealink_common::crypto_guard::ensure_initialized().expect("provider");
    let pem = fs::read(&pki.client.ca_path).expect("read CA");
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut BufReader::new(&*pem)) {
        roots.add(cert.expect("parse CA")).expect("add CA");
    }
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(tls_context::PROTOCOL_VERSIONS)
        .expect("protocol versions")
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsContext::Client(Arc::new(config))
}

/// Shuts both channels down at the same time so neither waits out its
/// default timeout for the other's close_notify.
pub fn shutdown_both(mut server: SecureChannel, mut client: SecureChannel) {
    let peer = thread::spawn(move || server.shutdown());
    client.shutdown();
    peer.join().expect("server shutdown thread");
}
