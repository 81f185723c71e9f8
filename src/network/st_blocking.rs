//! Single-threaded blocking personality.
//!
//! One thread accepts and services each connection inline with blocking
//! reads and writes; the next client waits until the current pump finishes.
//! No concurrency. Useful for diagnostics and as the reference behavior of
//! the shared byte pump.

use crate::config::ServerConfig;
use crate::network::session::pump_blocking;
use crate::network::{bind_listener, nudge_acceptor, SHUTDOWN_MSG};
use crate::storage::Storage;

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

struct Shared {
    running: AtomicBool,
    /// The connection currently being serviced, if any, so `stop` can
    /// reach it from another thread.
    current: Mutex<Option<TcpStream>>,
}

/// The single-threaded blocking server.
pub struct StBlockingServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_thread: Option<JoinHandle<()>>,
}

impl StBlockingServer {
    /// Binds and starts the accept loop.
    pub fn start(config: &ServerConfig, store: Arc<dyn Storage>) -> io::Result<Self> {
        let listener = bind_listener(config.listen, config.backlog)?;
        let addr = listener.local_addr()?;
        info!(%addr, "starting st_blocking network service");

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            current: Mutex::new(None),
        });
        let read_timeout = config.read_timeout;
        let max_value_size = config.max_value_size;

        let accept_shared = Arc::clone(&shared);
        let accept_thread = std::thread::Builder::new()
            .name("st-accept".into())
            .spawn(move || {
                while accept_shared.running.load(Ordering::SeqCst) {
                    let (stream, peer) = match listener.accept() {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(%err, "accept failed");
                            continue;
                        }
                    };
                    if !accept_shared.running.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!(%peer, "accepted connection");
                    if let Err(err) = stream.set_read_timeout(Some(read_timeout)) {
                        warn!(%err, "failed to set receive timeout");
                        continue;
                    }

                    let serviced = match stream.try_clone() {
                        Ok(clone) => {
                            *accept_shared.current.lock() = Some(clone);
                            let mut stream = stream;
                            let outcome =
                                pump_blocking(&mut stream, store.as_ref(), max_value_size);
                            *accept_shared.current.lock() = None;
                            outcome
                        }
                        Err(err) => Err(err),
                    };
                    if let Err(err) = serviced {
                        error!(%peer, %err, "failed to process connection");
                    }
                }
                info!("st_blocking network stopped");
            })?;

        Ok(StBlockingServer {
            addr,
            shared,
            accept_thread: Some(accept_thread),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Notifies the connection in flight and stops accepting.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(stream) = self.shared.current.lock().take() {
            let mut stream = stream;
            if stream.write_all(SHUTDOWN_MSG).is_err() {
                warn!("failed to write farewell to client");
            }
            let _ = stream.shutdown(Shutdown::Both);
        }
        nudge_acceptor(self.addr);
    }

    /// Waits for the accept loop to exit.
    pub fn join(mut self) {
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                error!("accept thread panicked");
            }
        }
    }
}

impl crate::network::ServerControl for StBlockingServer {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn stop(&self) {
        StBlockingServer::stop(self)
    }

    fn join(self: Box<Self>) {
        StBlockingServer::join(*self)
    }
}
