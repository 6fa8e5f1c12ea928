use std::{net::IpAddr, thread};

use sealink_common::{resolver, ErrorKind, SocketRole};

fn assert_numeric_host_port(addr: &str) {
    let (host, port) = addr.rsplit_once(':').expect("host:port");
    assert!(host.parse::<IpAddr>().is_ok(), "host is not numeric: {addr}");
    assert!(port.parse::<u16>().is_ok(), "port is not numeric: {addr}");
}

#[test]
fn accept_reports_numeric_peer_address() {
    let listener = resolver::listen(0, false).unwrap();
    let port = listener.local_addr().unwrap().port();

    let client = thread::spawn(move || resolver::connect("localhost", port).unwrap());
    let (accepted, peer) = listener.accept().unwrap();
    let client = client.join().unwrap();

    assert_numeric_host_port(&peer);
    assert_eq!(accepted.role(), SocketRole::Accepted);
    assert_eq!(peer, client.local_addr().unwrap().to_string());

    accepted.close();
    client.close();
    listener.close();
}

#[test]
fn ipv6_listener_accepts_loopback() {
    let listener = match resolver::listen(0, true) {
        Ok(listener) => listener,
        // Hosts without IPv6 cannot run this test.
        Err(e) if e.kind() == ErrorKind::Bind => return,
        Err(e) => panic!("unexpected error: {e}"),
    };
    let port = listener.local_addr().unwrap().port();
    let Ok(client) = resolver::connect("::1", port) else {
        return;
    };

    let (accepted, peer) = listener.accept().unwrap();
    assert!(peer.starts_with("::1:"), "unexpected peer {peer}");
    assert_numeric_host_port(&peer);

    accepted.close();
    client.close();
    listener.close();
}

#[test]
fn double_close_is_harmless() {
    let listener = resolver::listen(0, false).unwrap();
    listener.close();
    listener.close();
    assert!(listener.is_closed());
    assert_eq!(listener.accept().unwrap_err().kind(), ErrorKind::Accept);
}

#[test]
fn unresolvable_host_fails_resolution() {
    let err = resolver::connect("nonexistent.invalid", 443).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert!(err.to_string().contains("nonexistent.invalid:443"));
}
