//! Non-blocking connection state machine.
//!
//! A connection is owned by exactly one reactor worker for its whole life,
//! so no locks guard its buffers. Readiness events drive it through:
//!
//! ```text
//! Open --(peer close / protocol error)--> Draining --(queue empty)--> Closed
//! Open --(I/O error / failed send)-----------------------------------> Closed
//! ```
//!
//! `Draining` keeps write interest only, flushing queued replies before the
//! socket is torn down.

use crate::network::session::Session;
use crate::storage::Storage;

use std::collections::VecDeque;
use std::io::{self, IoSlice, Read, Write};
use std::net::Shutdown;

use mio::net::TcpStream;
use mio::Interest;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    /// Reading commands and writing replies.
    Open,
    /// No more reads; flush the reply queue, then close.
    Draining,
    /// Ready to be torn down.
    Closed,
}

/// One client connection on a reactor worker.
#[derive(Debug)]
pub(crate) struct Connection {
    stream: TcpStream,
    session: Session,
    inbuf: Vec<u8>,
    /// Pending outbound replies, each a complete CRLF-terminated response.
    replies: VecDeque<Vec<u8>>,
    /// Bytes of `replies.front()` already sent.
    head_sent: usize,
    state: ConnState,
    /// Interest currently registered with the poll, if any.
    armed: Option<Interest>,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, max_value_size: usize) -> Self {
        Connection {
            stream,
            session: Session::new(max_value_size),
            inbuf: Vec::with_capacity(4096),
            replies: VecDeque::new(),
            head_sent: 0,
            state: ConnState::Open,
            armed: None,
        }
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Reads until the socket would block, running the byte pump over
    /// everything that arrived.
    pub(crate) fn on_readable(&mut self, store: &dyn Storage) {
        if self.state != ConnState::Open {
            return;
        }
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!("connection closed by peer");
                    self.state = ConnState::Draining;
                    break;
                }
                Ok(n) => {
                    self.inbuf.extend_from_slice(&chunk[..n]);
                    if let Err(err) = self.session.drive(&mut self.inbuf, store, &mut self.replies)
                    {
                        debug!(?err, "draining connection after protocol violation");
                        self.state = ConnState::Draining;
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(%err, "read failed");
                    self.fail();
                    return;
                }
            }
        }
    }

    /// Writes queued replies with vectored sends until the queue empties or
    /// the socket would block. Any failed send moves the connection to the
    /// error state and shuts the socket down.
    pub(crate) fn flush(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        while !self.replies.is_empty() {
            let slices: Vec<IoSlice<'_>> = self
                .replies
                .iter()
                .enumerate()
                .map(|(i, reply)| {
                    if i == 0 {
                        IoSlice::new(&reply[self.head_sent..])
                    } else {
                        IoSlice::new(reply)
                    }
                })
                .collect();
            match self.stream.write_vectored(&slices) {
                Ok(0) => {
                    self.fail();
                    return;
                }
                Ok(sent) => self.advance(sent),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(%err, "send failed");
                    self.fail();
                    return;
                }
            }
        }
        if self.replies.is_empty() && self.state == ConnState::Draining {
            self.state = ConnState::Closed;
        }
    }

    /// Drops completely-sent replies and tracks the offset into the head.
    fn advance(&mut self, mut sent: usize) {
        while sent > 0 {
            let head_left = match self.replies.front() {
                Some(front) => front.len() - self.head_sent,
                None => break,
            };
            if sent >= head_left {
                sent -= head_left;
                self.replies.pop_front();
                self.head_sent = 0;
            } else {
                self.head_sent += sent;
                sent = 0;
            }
        }
    }

    /// Interest this connection wants registered next, `None` when it
    /// should be torn down instead.
    pub(crate) fn desired_interest(&self) -> Option<Interest> {
        match self.state {
            ConnState::Closed => None,
            ConnState::Draining => {
                if self.replies.is_empty() {
                    None
                } else {
                    Some(Interest::WRITABLE)
                }
            }
            ConnState::Open => {
                if self.replies.is_empty() {
                    Some(Interest::READABLE)
                } else {
                    Some(Interest::READABLE | Interest::WRITABLE)
                }
            }
        }
    }

    pub(crate) fn armed_interest(&self) -> Option<Interest> {
        self.armed
    }

    pub(crate) fn set_armed(&mut self, interest: Option<Interest>) {
        self.armed = interest;
    }

    /// Best-effort farewell during shutdown, then tear down.
    pub(crate) fn farewell(&mut self, message: &[u8]) {
        let _ = self.stream.write(message);
        self.fail();
    }

    fn fail(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        self.state = ConnState::Closed;
    }
}
