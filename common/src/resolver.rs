use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::{
    config::LISTEN_BACKLOG,
    error::{Error, Result},
    socket::{SocketHandle, SocketRole},
};

/// Creates a socket listening on the wildcard address of `port`.
///
/// Binds `[::]` when `use_ipv6` is set, `0.0.0.0` otherwise. A descriptor
/// created before a failing step is closed before the error is returned.
pub fn listen(port: u16, use_ipv6: bool) -> Result<SocketHandle> {
    let fail = |op| move |source| Error::Bind { op, port, source };

    let (domain, addr) = if use_ipv6 {
        (Domain::IPV6, SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)))
    } else {
        (Domain::IPV4, SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(fail("socket"))?;
    socket.bind(&SockAddr::from(addr)).map_err(fail("bind"))?;
    socket.listen(LISTEN_BACKLOG).map_err(fail("listen"))?;

    tracing::info!(%addr, "listening");
    Ok(SocketHandle::new(socket, SocketRole::Listening))
}

/// Resolves `host` and connects to the first endpoint that accepts.
///
/// Candidates of every address family are tried in resolver order; each
/// failed attempt closes its descriptor before the next one starts.
pub fn connect(host: &str, port: u16) -> Result<SocketHandle> {
    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| {
            Error::Resolution {
                op: "getaddrinfo",
                host: host.to_string(),
                port,
                source,
            }
        })?
        .collect();

    let mut last_error = None;
    for addr in &candidates {
        match connect_one(addr) {
            Ok(socket) => {
                tracing::debug!(%addr, "connected");
                return Ok(SocketHandle::new(socket, SocketRole::Connected));
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(Error::Connect {
        host: host.to_string(),
        port,
        attempts: candidates.len(),
        last_error,
    })
}

fn connect_one(addr: &SocketAddr) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect(&SockAddr::from(*addr))?;
    Ok(socket)
}
