//! Network personalities of the cache service.
//!
//! Three interchangeable server implementations share one protocol
//! ([`session`]) and one backend ([`crate::storage::Storage`]):
//!
//! | Module | Scheduling |
//! |--------|-----------|
//! | [`st_blocking`] | one thread accepts and services inline |
//! | [`mt_blocking`] | one acceptor, one capped worker thread per connection |
//! | [`mt_nonblocking`] | one acceptor, fixed reactor threads over `mio` |
//!
//! Lifecycle is uniform: [`start`] binds and begins accepting,
//! [`ServerControl::stop`] notifies every live socket and shuts the service
//! down, [`ServerControl::join`] blocks until all threads exited. Only after
//! `join` returns is the backend no longer referenced by the service.

pub mod mt_blocking;
pub mod mt_nonblocking;
pub mod session;
pub mod st_blocking;

use crate::config::{ServerConfig, Variant};
use crate::storage::Storage;

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

/// Farewell sent to live clients during shutdown. Administrative message,
/// bare `\n` terminator.
pub(crate) const SHUTDOWN_MSG: &[u8] = b"Sorry, the server is shutting down\n";

/// Rejection sent when the worker cap is reached. Administrative message,
/// bare `\n` terminator.
pub(crate) const BUSY_MSG: &[u8] = b"No free workers, try later\n";

/// Handle to a running server.
///
/// `stop` may be called from any thread and is idempotent; `join` consumes
/// the handle and returns once every service thread has exited and all
/// sockets are closed.
pub trait ServerControl: Send {
    /// The address actually bound, useful with an ephemeral port.
    fn local_addr(&self) -> SocketAddr;

    /// Initiates shutdown: notifies and disconnects live clients, stops
    /// accepting.
    fn stop(&self);

    /// Waits for every worker and the acceptor to finish.
    fn join(self: Box<Self>);
}

/// Starts the personality selected by `config.variant`.
pub fn start(
    config: &ServerConfig,
    store: Arc<dyn Storage>,
) -> io::Result<Box<dyn ServerControl>> {
    match config.variant {
        Variant::StBlocking => Ok(Box::new(st_blocking::StBlockingServer::start(
            config, store,
        )?)),
        Variant::MtBlocking => Ok(Box::new(mt_blocking::MtBlockingServer::start(
            config, store,
        )?)),
        Variant::MtNonblocking => Ok(Box::new(mt_nonblocking::MtNonblockingServer::start(
            config, store,
        )?)),
    }
}

/// Binds a listening socket with `SO_REUSEADDR` and an explicit backlog.
pub(crate) fn bind_listener(
    addr: SocketAddr,
    backlog: i32,
) -> io::Result<std::net::TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

/// Pokes a blocking acceptor awake with a throwaway local connection, so it
/// re-checks its running flag. The listener itself cannot be shut down
/// through the std API.
pub(crate) fn nudge_acceptor(addr: SocketAddr) {
    let target = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    };
    debug!(%target, "waking acceptor");
    let _ = TcpStream::connect(target);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_listener_ephemeral_port() {
        let listener =
            bind_listener(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)), 16).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        // The listener accepts a plain connection.
        let client = TcpStream::connect(addr).unwrap();
        let (_sock, peer) = listener.accept().unwrap();
        assert_eq!(peer.ip(), client.local_addr().unwrap().ip());
    }
}
