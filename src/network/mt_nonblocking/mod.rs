//! Multi-reactor non-blocking personality.
//!
//! One acceptor thread feeds accepted sockets to a fixed pool of reactor
//! workers. Each worker owns a `mio` poll, a slab of connections, and a
//! waker; the acceptor hands a socket to exactly one worker, so a
//! connection is only ever touched by a single thread. Single ownership
//! gives the same race-freedom a one-shot epoll registration protocol
//! would, without per-connection locks.
//!
//! ```text
//!                        ┌────────────────────────────┐
//!   accept ──┬─ socket ─▶│ worker 0: Poll + Slab      │
//!            │           ├────────────────────────────┤
//!            ├─ socket ─▶│ worker 1: Poll + Slab      │
//!            │           ├────────────────────────────┤
//!            └─ socket ─▶│ worker K: Poll + Slab      │
//!                        └────────────────────────────┘
//! ```
//!
//! Sockets are registered read-only while the reply queue is empty and
//! read+write while it holds data; `mio` polls edge-triggered, so handlers
//! always run their socket to `WouldBlock`.

mod connection;

use crate::config::ServerConfig;
use crate::network::{bind_listener, nudge_acceptor, SHUTDOWN_MSG};
use crate::storage::Storage;

use connection::Connection;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use tracing::{debug, error, info, warn};

/// Token reserved for the per-worker waker; connection tokens are slab keys.
const WAKER_TOKEN: Token = Token(usize::MAX);

struct Shared {
    running: AtomicBool,
    wakers: Vec<Waker>,
}

/// The multi-reactor non-blocking server.
pub struct MtNonblockingServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_thread: Option<JoinHandle<()>>,
    worker_threads: Vec<JoinHandle<()>>,
}

impl MtNonblockingServer {
    /// Binds, spawns the reactor pool, and starts the accept loop.
    pub fn start(config: &ServerConfig, store: Arc<dyn Storage>) -> io::Result<Self> {
        let listener = bind_listener(config.listen, config.backlog)?;
        let addr = listener.local_addr()?;
        let worker_count = config.effective_reactor_threads();
        info!(%addr, workers = worker_count, "starting mt_nonblocking network service");

        let mut wakers = Vec::with_capacity(worker_count);
        let mut seeds = Vec::with_capacity(worker_count);
        let mut senders: Vec<Sender<std::net::TcpStream>> = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let poll = Poll::new()?;
            let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
            let (tx, rx) = mpsc::channel();
            wakers.push(waker);
            senders.push(tx);
            seeds.push((poll, rx));
        }

        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            wakers,
        });

        let mut worker_threads = Vec::with_capacity(worker_count);
        for (id, (poll, rx)) in seeds.into_iter().enumerate() {
            let mut worker = Worker {
                id,
                poll,
                conns: Slab::new(),
                rx,
                shared: Arc::clone(&shared),
                store: Arc::clone(&store),
                max_value_size: config.max_value_size,
            };
            let handle = std::thread::Builder::new()
                .name(format!("reactor-{id}"))
                .spawn(move || {
                    if let Err(err) = worker.run() {
                        error!(worker = worker.id, %err, "reactor worker failed");
                    }
                })?;
            worker_threads.push(handle);
        }

        let accept_shared = Arc::clone(&shared);
        let accept_thread = std::thread::Builder::new()
            .name("epoll-accept".into())
            .spawn(move || {
                let mut next_worker = 0usize;
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
                    debug!(%peer, worker = next_worker, "accepted connection");
                    if senders[next_worker].send(stream).is_ok() {
                        let _ = accept_shared.wakers[next_worker].wake();
                    }
                    next_worker = (next_worker + 1) % senders.len();
                }
                info!("mt_nonblocking network stopped");
            })?;

        Ok(MtNonblockingServer {
            addr,
            shared,
            accept_thread: Some(accept_thread),
            worker_threads,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Flags shutdown and wakes every thread; workers notify and close
    /// their connections themselves.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for waker in &self.shared.wakers {
            let _ = waker.wake();
        }
        nudge_acceptor(self.addr);
    }

    /// Waits for the acceptor and every reactor worker to exit.
    pub fn join(mut self) {
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                error!("accept thread panicked");
            }
        }
        for handle in self.worker_threads.drain(..) {
            if handle.join().is_err() {
                error!("reactor worker panicked");
            }
        }
    }
}

impl crate::network::ServerControl for MtNonblockingServer {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn stop(&self) {
        MtNonblockingServer::stop(self)
    }

    fn join(self: Box<Self>) {
        MtNonblockingServer::join(*self)
    }
}

struct Worker {
    id: usize,
    poll: Poll,
    conns: Slab<Connection>,
    rx: Receiver<std::net::TcpStream>,
    shared: Arc<Shared>,
    store: Arc<dyn Storage>,
    max_value_size: usize,
}

impl Worker {
    fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(256);
        loop {
            if let Err(err) = self.poll.poll(&mut events, None) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => {
                        if !self.shared.running.load(Ordering::SeqCst) {
                            self.shutdown_all();
                            return Ok(());
                        }
                        self.adopt_pending()?;
                    }
                    Token(id) => self.dispatch(id, event.is_readable()),
                }
            }
        }
    }

    /// Registers sockets the acceptor queued for this worker.
    fn adopt_pending(&mut self) -> io::Result<()> {
        while let Ok(stream) = self.rx.try_recv() {
            stream.set_nonblocking(true)?;
            let mut stream = mio::net::TcpStream::from_std(stream);
            let entry = self.conns.vacant_entry();
            let token = Token(entry.key());
            if let Err(err) =
                self.poll
                    .registry()
                    .register(&mut stream, token, Interest::READABLE)
            {
                warn!(worker = self.id, %err, "failed to register connection");
                continue;
            }
            let mut conn = Connection::new(stream, self.max_value_size);
            conn.set_armed(Some(Interest::READABLE));
            entry.insert(conn);
            debug!(worker = self.id, token = token.0, "connection registered");
        }
        Ok(())
    }

    /// Runs one pump slice for the connection named by `id`.
    fn dispatch(&mut self, id: usize, readable: bool) {
        let Some(conn) = self.conns.get_mut(id) else {
            return;
        };
        if readable {
            conn.on_readable(self.store.as_ref());
        }
        // Flush opportunistically whether the event was readable or
        // writable: edge-triggered polls only report transitions, so a
        // freshly filled queue must be tried at once.
        conn.flush();

        match conn.desired_interest() {
            None => self.teardown(id),
            Some(interest) => {
                if conn.armed_interest() != Some(interest) {
                    let token = Token(id);
                    if let Err(err) =
                        self.poll
                            .registry()
                            .reregister(conn.stream_mut(), token, interest)
                    {
                        warn!(worker = self.id, %err, "failed to re-arm connection");
                        self.teardown(id);
                        return;
                    }
                    conn.set_armed(Some(interest));
                }
            }
        }
    }

    fn teardown(&mut self, id: usize) {
        if !self.conns.contains(id) {
            return;
        }
        let mut conn = self.conns.remove(id);
        let _ = self.poll.registry().deregister(conn.stream_mut());
        debug!(worker = self.id, token = id, "connection closed");
    }

    /// Farewell and close every connection during shutdown.
    fn shutdown_all(&mut self) {
        let ids: Vec<usize> = self.conns.iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(conn) = self.conns.get_mut(id) {
                conn.farewell(SHUTDOWN_MSG);
            }
            self.teardown(id);
        }
        debug!(worker = self.id, "reactor drained");
    }
}
