//! Per-connection protocol state and the shared byte pump.
//!
//! Every network personality drives the same [`Session`]: bytes arrive in
//! the connection's buffer, [`Session::drive`] parses as many commands out
//! of it as it can, gathers each command's bulk argument, executes, and
//! queues complete replies (CRLF-terminated). Only scheduling differs per
//! personality.

use crate::execute::Command;
use crate::protocol::{ParseError, Parser};
use crate::storage::Storage;

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;

use tracing::{debug, warn};

/// Why a session refused to continue. The farewell reply is already queued
/// when `drive` returns one of these; the caller flushes, then closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The parser rejected the stream.
    Protocol(ParseError),
    /// The declared data segment did not end with CRLF.
    BadDataChunk,
    /// A storage command declared more bytes than the configured ceiling.
    ValueTooLarge,
}

/// Protocol state carried across reads of one connection.
#[derive(Debug)]
pub struct Session {
    parser: Parser,
    /// Command whose bulk argument is still being gathered, plus the bytes
    /// of it (terminator included) still owed by the stream.
    pending: Option<(Command, usize)>,
    argument: Vec<u8>,
    max_value_size: usize,
}

impl Session {
    pub fn new(max_value_size: usize) -> Self {
        Session {
            parser: Parser::new(),
            pending: None,
            argument: Vec::new(),
            max_value_size,
        }
    }

    /// Consumes as much of `buf` as possible, executing every completed
    /// command against `store` and pushing its CRLF-terminated reply onto
    /// `replies`.
    ///
    /// One call can complete several pipelined commands, or none when the
    /// buffer holds only a partial header or argument. On error the farewell
    /// reply is the last element of `replies` and the connection must be
    /// closed once it is flushed.
    pub fn drive(
        &mut self,
        buf: &mut Vec<u8>,
        store: &dyn Storage,
        replies: &mut VecDeque<Vec<u8>>,
    ) -> Result<(), SessionError> {
        loop {
            let mut progressed = false;

            // No command in flight: feed the parser.
            if self.pending.is_none() && !buf.is_empty() {
                let (consumed, complete) = match self.parser.parse(buf) {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        replies.push_back(error_reply(&err));
                        return Err(SessionError::Protocol(err));
                    }
                };
                if consumed > 0 {
                    buf.drain(..consumed);
                    progressed = true;
                }
                if complete {
                    if let Some((command, bulk)) = self.parser.build() {
                        debug!(command = command.name(), bulk, "parsed command");
                        if bulk > self.max_value_size {
                            replies.push_back(
                                b"SERVER_ERROR object too large for cache\r\n".to_vec(),
                            );
                            return Err(SessionError::ValueTooLarge);
                        }
                        // The data segment carries its own CRLF.
                        let remains = if bulk > 0 { bulk + 2 } else { 0 };
                        self.pending = Some((command, remains));
                    }
                }
            }

            // Command parsed, argument still short: gather.
            if let Some((_, remains)) = &mut self.pending {
                if *remains > 0 && !buf.is_empty() {
                    let take = (*remains).min(buf.len());
                    self.argument.extend_from_slice(&buf[..take]);
                    buf.drain(..take);
                    *remains -= take;
                    progressed = true;
                }
            }

            // Command and argument complete: run it.
            match self.pending.take() {
                Some((command, 0)) => {
                    if !self.argument.is_empty() {
                        if !self.argument.ends_with(b"\r\n") {
                            replies.push_back(b"CLIENT_ERROR bad data chunk\r\n".to_vec());
                            return Err(SessionError::BadDataChunk);
                        }
                        let len = self.argument.len();
                        self.argument.truncate(len - 2);
                    }

                    let mut reply = command.execute(store, &self.argument);
                    reply.extend_from_slice(b"\r\n");
                    replies.push_back(reply);

                    self.argument.clear();
                    self.parser.reset();
                    progressed = true;
                }
                still_pending => self.pending = still_pending,
            }

            if !progressed {
                return Ok(());
            }
        }
    }
}

fn error_reply(err: &ParseError) -> Vec<u8> {
    match err {
        ParseError::UnknownCommand(_) => b"ERROR\r\n".to_vec(),
        _ => b"CLIENT_ERROR bad command line format\r\n".to_vec(),
    }
}

/// Blocking read/parse/execute/write loop shared by the blocking
/// personalities.
///
/// Runs until the peer closes, the receive timeout fires, the session turns
/// fatal, or an I/O error surfaces (including the shutdown performed by
/// `Stop` on another thread). Errors worth logging are logged here; only
/// unexpected I/O errors propagate.
pub(crate) fn pump_blocking(
    stream: &mut TcpStream,
    store: &dyn Storage,
    max_value_size: usize,
) -> io::Result<()> {
    let mut session = Session::new(max_value_size);
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut replies: VecDeque<Vec<u8>> = VecDeque::new();
    let mut chunk = [0u8; 4096];

    loop {
        let read = match stream.read(&mut chunk) {
            Ok(0) => {
                debug!("connection closed by peer");
                return Ok(());
            }
            Ok(n) => n,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                warn!("connection closed: receive timeout");
                return Ok(());
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        buf.extend_from_slice(&chunk[..read]);

        let status = session.drive(&mut buf, store, &mut replies);
        for reply in replies.drain(..) {
            stream.write_all(&reply)?;
        }
        if let Err(err) = status {
            debug!(?err, "closing connection after protocol violation");
            return Ok(());
        }
    }
}
