use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use rand::RngCore;
use sealink_client::{CertPaths, EndpointConfig, SecureClient};
use sealink_common::{resolver, testing::Pki};
use sealink_server::EchoServer;

const TIMEOUT: f64 = 5.0;

struct Running {
    port:   u16,
    flag:   Arc<AtomicBool>,
    handle: thread::JoinHandle<anyhow::Result<()>>,
}

impl Running {
    fn start(certs: CertPaths) -> Self {
        let mut config = EndpointConfig::server();
        config.certs = certs;
        config.default_timeout = TIMEOUT;
        config.io_timeout = TIMEOUT;
        let server = EchoServer::new(config).unwrap();

        let listener = resolver::listen(0, false).unwrap();
        let port = listener.local_addr().unwrap().port();
        let flag = Arc::new(AtomicBool::new(true));
        let running = Arc::clone(&flag);
        let handle = thread::spawn(move || {
            let result = server.serve(&listener, &running);
            listener.close();
            result
        });
        Self { port, flag, handle }
    }

    fn client(&self, certs: &CertPaths) -> SecureClient {
        let mut config = EndpointConfig::client();
        config.port = self.port;
        config.certs = certs.clone();
        config.default_timeout = TIMEOUT;
        config.io_timeout = TIMEOUT;
        SecureClient::new(config).unwrap()
    }

    fn stop(self) {
        self.flag.store(false, Ordering::SeqCst);
        self.handle.join().unwrap().unwrap();
    }
}

#[test]
fn echo_returns_random_payload_unchanged() {
    let pki = Pki::generate().unwrap();
    let server = Running::start(pki.server.clone());
    let client = server.client(&pki.client);

    let mut payload = vec![0u8; 1024];
    rand::thread_rng().fill_bytes(&mut payload);

    let mut session = client.connect().unwrap();
    assert!(session.server_fingerprint().is_some());
    assert_eq!(session.echo(&payload).unwrap(), payload);
    assert_eq!(session.echo(b"again").unwrap(), b"again");
    assert_eq!(session.frames_sent(), 2);
    session.close().unwrap();

    server.stop();
}

#[test]
fn raw_bytes_follow_the_frame_layout() {
    let pki = Pki::generate().unwrap();
    let server = Running::start(pki.server.clone());
    let mut session = server.client(&pki.client).connect().unwrap();

    session.send_raw(&[0, 0, 0, 3]).unwrap();
    session.send_raw(b"abc").unwrap();
    assert_eq!(session.recv_raw(7).unwrap(), b"\x00\x00\x00\x03abc");
    session.close().unwrap();

    server.stop();
}

#[test]
fn empty_payload_is_refused_locally() {
    let pki = Pki::generate().unwrap();
    let server = Running::start(pki.server.clone());
    let mut session = server.client(&pki.client).connect().unwrap();

    assert!(session.echo(&[]).is_err());
    // The session is still usable.
    assert_eq!(session.echo(b"x").unwrap(), b"x");
    session.close().unwrap();

    server.stop();
}

#[test]
fn untrusted_server_is_rejected() {
    let pki = Pki::generate().unwrap();
    let server = Running::start(pki.rogue_server.clone());

    let err = server.client(&pki.client).connect().err().unwrap();
    assert!(format!("{err:#}").contains("Failed to establish secure channel"));

    server.stop();
}

#[test]
fn missing_certificates_fail_at_construction() {
    let mut config = EndpointConfig::client();
    config.certs = CertPaths::new("/nonexistent/c.pem", "/nonexistent/c.key", "/nonexistent/ca");
    assert!(SecureClient::new(config).is_err());
}

#[test]
fn untrusted_client_is_refused_at_connect() {
    let pki = Pki::generate().unwrap();
    let server = Running::start(pki.server.clone());

    let err = server.client(&pki.rogue_client).connect().err().unwrap();
    assert!(format!("{err:#}").contains("Failed to establish secure channel"));

    server.stop();
}
