use std::{
    fmt,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use socket2::{SockAddr, Socket};

use crate::error::{Error, Result};

/// Address reported by `accept` when the peer address cannot be formatted
pub const UNKNOWN_PEER: &str = "unknown:unknown";

/// How a socket handle came into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRole {
    /// Bound to a wildcard address and listening
    Listening,
    /// Outbound connection made by `resolver::connect`
    Connected,
    /// Connection returned by `accept` on a listening handle
    Accepted,
}

/// Owner of one TCP socket descriptor.
///
/// Cloning a handle retains the same descriptor; this is how a
/// [`SecureChannel`](crate::channel::SecureChannel) keeps its socket alive
/// for the duration of a session. [`close`](Self::close) releases the
/// descriptor for every clone at once. Dropping the last clone closes it.
#[derive(Clone)]
pub struct SocketHandle {
    shared: Arc<Shared>,
}

struct Shared {
    role:   SocketRole,
    socket: Mutex<Option<Arc<Socket>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let socket = self
            .socket
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if socket.is_some() {
            tracing::debug!(role = ?self.role, "closing socket on last release");
        }
    }
}

impl SocketHandle {
    pub(crate) fn new(socket: Socket, role: SocketRole) -> Self {
        Self {
            shared: Arc::new(Shared {
                role,
                socket: Mutex::new(Some(Arc::new(socket))),
            }),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Socket>>> {
        self.shared
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the live socket, or `None` once closed.
    ///
    /// The returned reference keeps the descriptor open until dropped, so an
    /// in-flight operation is never pulled out from under its caller.
    pub(crate) fn socket(&self) -> Option<Arc<Socket>> {
        self.slot().clone()
    }

    pub(crate) fn require_socket(&self) -> io::Result<Arc<Socket>> {
        self.socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket is closed"))
    }

    /// Role this handle was created with
    pub fn role(&self) -> SocketRole {
        self.shared.role
    }

    /// Whether the descriptor has been released
    pub fn is_closed(&self) -> bool {
        self.slot().is_none()
    }

    /// Local address the socket is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        to_socket_addr(self.require_socket()?.local_addr()?)
    }

    /// Address of the connected peer
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        to_socket_addr(self.require_socket()?.peer_addr()?)
    }

    /// Waits for a peer on a listening handle.
    ///
    /// Returns the new, independently owned handle together with the peer
    /// address as `"<numeric-host>:<numeric-port>"`, or [`UNKNOWN_PEER`] when
    /// the address cannot be formatted.
    pub fn accept(&self) -> Result<(SocketHandle, String)> {
        if self.role() != SocketRole::Listening {
            return Err(Error::Accept {
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "accept called on a socket that is not listening",
                ),
            });
        }
        let listener = self
            .require_socket()
            .map_err(|source| Error::Accept { source })?;

        let (socket, addr) = listener
            .accept()
            .map_err(|source| Error::Accept { source })?;

        let peer = format_peer(&addr);
        tracing::debug!(peer = %peer, "accepted connection");
        Ok((SocketHandle::new(socket, SocketRole::Accepted), peer))
    }

    /// Releases the descriptor. Closing an already closed handle does nothing.
    pub fn close(&self) {
        if let Some(socket) = self.slot().take() {
            tracing::debug!(role = ?self.role(), "closing socket");
            drop(socket);
        }
    }

    /// Whether two handles refer to the same descriptor
    pub fn same_socket(&self, other: &SocketHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("role", &self.role())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn to_socket_addr(addr: SockAddr) -> io::Result<SocketAddr> {
    addr.as_socket().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "socket address is not an IP address")
    })
}

fn format_peer(addr: &SockAddr) -> String {
    match addr.as_socket() {
        Some(sa) => format!("{}:{}", sa.ip(), sa.port()),
        None => {
            tracing::warn!("peer address could not be formatted");
            UNKNOWN_PEER.to_string()
        }
    }
}
