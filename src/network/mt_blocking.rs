//! Thread-per-connection blocking personality.
//!
//! One acceptor thread hands each connection to a freshly spawned, detached
//! worker thread running the shared byte pump, up to a configured cap.
//! Beyond the cap clients are told to come back later and disconnected.
//!
//! Worker accounting lives under one lock: the live worker count, and the
//! set of open sockets so `stop` can reach every client. When the count
//! drops to zero a condvar wakes `join`.

use crate::config::ServerConfig;
use crate::network::session::pump_blocking;
use crate::network::{bind_listener, nudge_acceptor, BUSY_MSG, SHUTDOWN_MSG};
use crate::storage::Storage;

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

struct WorkerTable {
    workers_current: usize,
    /// Clones of every live client socket, keyed by worker id.
    open_sockets: HashMap<u64, TcpStream>,
    next_id: u64,
}

struct Shared {
    running: AtomicBool,
    table: Mutex<WorkerTable>,
    all_done: Condvar,
}

/// The thread-per-connection blocking server.
pub struct MtBlockingServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_thread: Option<JoinHandle<()>>,
}

impl MtBlockingServer {
    /// Binds and starts the accept loop.
    pub fn start(config: &ServerConfig, store: Arc<dyn Storage>) -> io::Result<Self> {
        let listener = bind_listener(config.listen, config.backlog)?;
        let addr = listener.local_addr()?;
        info!(%addr, max_workers = config.max_workers, "starting mt_blocking network service");

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            table: Mutex::new(WorkerTable {
                workers_current: 0,
                open_sockets: HashMap::new(),
                next_id: 0,
            }),
            all_done: Condvar::new(),
        });

        let accept_shared = Arc::clone(&shared);
        let max_workers = config.max_workers;
        let read_timeout = config.read_timeout;
        let max_value_size = config.max_value_size;

        let accept_thread = std::thread::Builder::new()
            .name("mt-accept".into())
            .spawn(move || {
                while accept_shared.running.load(Ordering::SeqCst) {
                    let (mut stream, peer) = match listener.accept() {
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

                    let mut table = accept_shared.table.lock();
                    if table.workers_current >= max_workers {
                        drop(table);
                        warn!(%peer, "no free workers");
                        if stream.write_all(BUSY_MSG).is_err() {
                            warn!("failed to write rejection to client");
                        }
                        continue;
                    }

                    let clone = match stream.try_clone() {
                        Ok(clone) => clone,
                        Err(err) => {
                            drop(table);
                            error!(%err, "failed to clone client socket");
                            continue;
                        }
                    };
                    let id = table.next_id;
                    table.next_id += 1;
                    table.workers_current += 1;
                    table.open_sockets.insert(id, clone);
                    drop(table);

                    let worker_shared = Arc::clone(&accept_shared);
                    let worker_store = Arc::clone(&store);
                    let spawned = std::thread::Builder::new()
                        .name(format!("mt-worker-{id}"))
                        .spawn(move || {
                            if let Err(err) =
                                pump_blocking(&mut stream, worker_store.as_ref(), max_value_size)
                            {
                                error!(%err, "failed to process connection");
                            }
                            let mut table = worker_shared.table.lock();
                            table.open_sockets.remove(&id);
                            table.workers_current -= 1;
                            if table.workers_current == 0 {
                                worker_shared.all_done.notify_all();
                            }
                        });
                    if spawned.is_err() {
                        error!("failed to spawn worker thread");
                        let mut table = accept_shared.table.lock();
                        table.open_sockets.remove(&id);
                        table.workers_current -= 1;
                        if table.workers_current == 0 {
                            accept_shared.all_done.notify_all();
                        }
                    }
                }
                info!("mt_blocking network stopped");
            })?;

        Ok(MtBlockingServer {
            addr,
            shared,
            accept_thread: Some(accept_thread),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Notifies every live client, disconnects them, and stops accepting.
    pub fn stop(&self) {
        let mut table = self.shared.table.lock();
        for (_, socket) in table.open_sockets.iter() {
            let mut socket = socket;
            if socket.write_all(SHUTDOWN_MSG).is_err() {
                warn!("failed to write farewell to client");
            }
            let _ = socket.shutdown(Shutdown::Both);
        }
        table.open_sockets.clear();
        drop(table);

        if self.shared.running.swap(false, Ordering::SeqCst) {
            nudge_acceptor(self.addr);
        }
    }

    /// Waits until every worker exited, then joins the acceptor.
    pub fn join(mut self) {
        let mut table = self.shared.table.lock();
        while table.workers_current != 0 {
            self.shared.all_done.wait(&mut table);
        }
        // Residual sockets are closed by dropping their handles.
        table.open_sockets.clear();
        drop(table);

        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                error!("accept thread panicked");
            }
        }
    }
}

impl crate::network::ServerControl for MtBlockingServer {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn stop(&self) {
        MtBlockingServer::stop(self)
    }

    fn join(self: Box<Self>) {
        MtBlockingServer::join(*self)
    }
}
