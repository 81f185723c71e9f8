//! Incremental parser for the memcached text protocol subset.
//!
//! The parser consumes a byte stream one chunk (or one byte) at a time and
//! recognizes complete command headers. It reports how many bytes it took
//! from each chunk and whether a full header is now available; the caller
//! then builds the command object and learns the bulk argument length that
//! must follow.
//!
//! Grammar handled here:
//!
//! ```text
//! storage   := ("set"|"add"|"replace"|"append"|"prepend")
//!              SP key SP flags SP exptime SP bytes CRLF
//! retrieval := ("get"|"gets") SP key (SP key)* CRLF
//! delete    := "delete" SP key CRLF
//! stats     := "stats" CRLF
//! ```
//!
//! The bulk data segment of storage commands (`bytes` payload plus its own
//! CRLF) is not the parser's business; the connection layer gathers it.

use crate::execute::{Command, StorageVerb};

use thiserror::Error;

/// Longest accepted command line, terminator included.
pub const MAX_HEADER_LEN: usize = 2048;

/// Longest accepted key, as in memcached.
pub const MAX_KEY_LEN: usize = 250;

/// Reasons a byte stream is rejected. Any of these terminates the
/// connection after an error reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// First token of the line is not a known command.
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    /// Wrong arity, a bad numeric field, or a bare LF terminator.
    #[error("malformed command line")]
    BadFormat,
    /// A key token longer than [`MAX_KEY_LEN`].
    #[error("key exceeds {MAX_KEY_LEN} bytes")]
    KeyTooLong,
    /// Header grew past [`MAX_HEADER_LEN`] without a terminator.
    #[error("command line exceeds {MAX_HEADER_LEN} bytes")]
    HeaderTooLong,
}

/// Incremental command header parser.
///
/// Feed byte slices with [`Parser::parse`] until it reports completion, then
/// call [`Parser::build`] for the command and its bulk length. [`Parser::reset`]
/// readies the machine for the next header. The parser tolerates being fed a
/// single byte at a time and resumes exactly where it left off.
#[derive(Debug, Default)]
pub struct Parser {
    line: Vec<u8>,
    ready: Option<(Command, usize)>,
}

impl Parser {
    pub fn new() -> Self {
        Parser::default()
    }

    /// Consumes bytes from `data` up to and including the header terminator.
    ///
    /// Returns `(consumed, complete)`. `consumed` is how many bytes of
    /// `data` were taken; zero with `complete == false` means the caller
    /// must supply more input before the parser can advance (only possible
    /// on an empty slice, or after completion before [`Parser::reset`]).
    pub fn parse(&mut self, data: &[u8]) -> Result<(usize, bool), ParseError> {
        if self.ready.is_some() {
            return Ok((0, true));
        }

        let mut consumed = 0;
        for &byte in data {
            consumed += 1;
            self.line.push(byte);
            if self.line.len() > MAX_HEADER_LEN {
                return Err(ParseError::HeaderTooLong);
            }
            if byte == b'\n' {
                if !self.line.ends_with(b"\r\n") {
                    return Err(ParseError::BadFormat);
                }
                let header = &self.line[..self.line.len() - 2];
                self.ready = Some(parse_header(header)?);
                return Ok((consumed, true));
            }
        }
        Ok((consumed, false))
    }

    /// Hands out the parsed command and its bulk argument length.
    ///
    /// Only meaningful after [`Parser::parse`] reported completion; returns
    /// `None` otherwise. Storage commands report the `bytes` field; the
    /// data segment's own CRLF is on the caller.
    pub fn build(&mut self) -> Option<(Command, usize)> {
        self.ready.take()
    }

    /// Clears all state for the next command.
    pub fn reset(&mut self) {
        self.line.clear();
        self.ready = None;
    }
}

fn parse_header(line: &[u8]) -> Result<(Command, usize), ParseError> {
    let mut tokens = line.split(|&b| b == b' ').filter(|t| !t.is_empty());
    let name = tokens.next().ok_or(ParseError::BadFormat)?;

    match name {
        b"set" | b"add" | b"replace" | b"append" | b"prepend" => {
            let verb = match name {
                b"set" => StorageVerb::Set,
                b"add" => StorageVerb::Add,
                b"replace" => StorageVerb::Replace,
                b"append" => StorageVerb::Append,
                _ => StorageVerb::Prepend,
            };
            let key = key_token(tokens.next())?;
            let flags: u32 = num_token(tokens.next())?;
            let _exptime: i64 = num_token(tokens.next())?;
            let bytes: usize = num_token(tokens.next())?;
            if tokens.next().is_some() {
                return Err(ParseError::BadFormat);
            }
            Ok((Command::Store { verb, key, flags }, bytes))
        }
        b"get" | b"gets" => {
            let mut keys = Vec::new();
            for token in tokens {
                keys.push(key_token(Some(token))?);
            }
            if keys.is_empty() {
                return Err(ParseError::BadFormat);
            }
            Ok((
                Command::Retrieve {
                    keys,
                    with_cas: name == b"gets",
                },
                0,
            ))
        }
        b"delete" => {
            let key = key_token(tokens.next())?;
            if tokens.next().is_some() {
                return Err(ParseError::BadFormat);
            }
            Ok((Command::Delete { key }, 0))
        }
        b"stats" => {
            if tokens.next().is_some() {
                return Err(ParseError::BadFormat);
            }
            Ok((Command::Stats, 0))
        }
        other => Err(ParseError::UnknownCommand(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

fn key_token(token: Option<&[u8]>) -> Result<Vec<u8>, ParseError> {
    let token = token.ok_or(ParseError::BadFormat)?;
    if token.len() > MAX_KEY_LEN {
        return Err(ParseError::KeyTooLong);
    }
    if token.iter().any(|b| b.is_ascii_control()) {
        return Err(ParseError::BadFormat);
    }
    Ok(token.to_vec())
}

fn num_token<T: core::str::FromStr>(token: Option<&[u8]>) -> Result<T, ParseError> {
    let token = token.ok_or(ParseError::BadFormat)?;
    let text = core::str::from_utf8(token).map_err(|_| ParseError::BadFormat)?;
    text.parse().map_err(|_| ParseError::BadFormat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Result<(Command, usize), ParseError> {
        let mut parser = Parser::new();
        let (consumed, complete) = parser.parse(input)?;
        assert!(complete, "expected a complete header");
        assert_eq!(consumed, input.len());
        Ok(parser.build().expect("complete parser must build"))
    }

    #[test]
    fn test_set_header() {
        let (cmd, bulk) = parse_all(b"set foo 0 0 3\r\n").unwrap();
        assert_eq!(
            cmd,
            Command::Store {
                verb: StorageVerb::Set,
                key: b"foo".to_vec(),
                flags: 0,
            }
        );
        assert_eq!(bulk, 3);
    }

    #[test]
    fn test_all_storage_verbs() {
        for (text, verb) in [
            ("set", StorageVerb::Set),
            ("add", StorageVerb::Add),
            ("replace", StorageVerb::Replace),
            ("append", StorageVerb::Append),
            ("prepend", StorageVerb::Prepend),
        ] {
            let line = format!("{text} k 7 60 10\r\n");
            let (cmd, bulk) = parse_all(line.as_bytes()).unwrap();
            assert_eq!(
                cmd,
                Command::Store {
                    verb,
                    key: b"k".to_vec(),
                    flags: 7,
                }
            );
            assert_eq!(bulk, 10);
        }
    }

    #[test]
    fn test_get_multiple_keys() {
        let (cmd, bulk) = parse_all(b"get a b c\r\n").unwrap();
        assert_eq!(
            cmd,
            Command::Retrieve {
                keys: vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()],
                with_cas: false,
            }
        );
        assert_eq!(bulk, 0);
    }

    #[test]
    fn test_gets_sets_cas_flag() {
        let (cmd, _) = parse_all(b"gets k\r\n").unwrap();
        assert_eq!(
            cmd,
            Command::Retrieve {
                keys: vec![b"k".to_vec()],
                with_cas: true,
            }
        );
    }

    #[test]
    fn test_delete_and_stats() {
        let (cmd, bulk) = parse_all(b"delete foo\r\n").unwrap();
        assert_eq!(cmd, Command::Delete { key: b"foo".to_vec() });
        assert_eq!(bulk, 0);

        let (cmd, bulk) = parse_all(b"stats\r\n").unwrap();
        assert_eq!(cmd, Command::Stats);
        assert_eq!(bulk, 0);
    }

    #[test]
    fn test_byte_at_a_time() {
        let input = b"set foo 12 0 5\r\n";
        let mut parser = Parser::new();
        let mut complete = false;
        for (i, byte) in input.iter().enumerate() {
            let (consumed, done) = parser.parse(core::slice::from_ref(byte)).unwrap();
            assert_eq!(consumed, 1);
            complete = done;
            if i + 1 < input.len() {
                assert!(!done);
            }
        }
        assert!(complete);
        let (cmd, bulk) = parser.build().unwrap();
        assert_eq!(
            cmd,
            Command::Store {
                verb: StorageVerb::Set,
                key: b"foo".to_vec(),
                flags: 12,
            }
        );
        assert_eq!(bulk, 5);
    }

    #[test]
    fn test_stops_at_header_boundary() {
        // Trailing bytes past the terminator belong to the next state.
        let input = b"get a\r\nXYZ";
        let mut parser = Parser::new();
        let (consumed, complete) = parser.parse(input).unwrap();
        assert!(complete);
        assert_eq!(consumed, 7);
    }

    #[test]
    fn test_reset_enables_next_command() {
        let mut parser = Parser::new();
        let (_, complete) = parser.parse(b"get a\r\n").unwrap();
        assert!(complete);
        let _ = parser.build().unwrap();
        parser.reset();
        let (_, complete) = parser.parse(b"delete b\r\n").unwrap();
        assert!(complete);
        let (cmd, _) = parser.build().unwrap();
        assert_eq!(cmd, Command::Delete { key: b"b".to_vec() });
    }

    #[test]
    fn test_unknown_command() {
        let mut parser = Parser::new();
        assert_eq!(
            parser.parse(b"frobnicate k\r\n"),
            Err(ParseError::UnknownCommand("frobnicate".into()))
        );
    }

    #[test]
    fn test_bad_numeric_field() {
        let mut parser = Parser::new();
        assert_eq!(
            parser.parse(b"set k notanumber 0 3\r\n"),
            Err(ParseError::BadFormat)
        );
    }

    #[test]
    fn test_wrong_arity() {
        let mut parser = Parser::new();
        assert_eq!(parser.parse(b"set k 0 0\r\n"), Err(ParseError::BadFormat));
        parser.reset();
        assert_eq!(
            parser.parse(b"set k 0 0 3 extra\r\n"),
            Err(ParseError::BadFormat)
        );
        parser.reset();
        assert_eq!(parser.parse(b"get\r\n"), Err(ParseError::BadFormat));
        parser.reset();
        assert_eq!(
            parser.parse(b"delete a b\r\n"),
            Err(ParseError::BadFormat)
        );
    }

    #[test]
    fn test_bare_lf_rejected() {
        let mut parser = Parser::new();
        assert_eq!(parser.parse(b"get a\n"), Err(ParseError::BadFormat));
    }

    #[test]
    fn test_key_too_long() {
        let mut parser = Parser::new();
        let mut line = b"get ".to_vec();
        line.extend(std::iter::repeat(b'k').take(MAX_KEY_LEN + 1));
        line.extend_from_slice(b"\r\n");
        assert_eq!(parser.parse(&line), Err(ParseError::KeyTooLong));
    }

    #[test]
    fn test_header_too_long() {
        let mut parser = Parser::new();
        let line = vec![b'g'; MAX_HEADER_LEN + 1];
        assert_eq!(parser.parse(&line), Err(ParseError::HeaderTooLong));
    }

    #[test]
    fn test_repeated_spaces_tolerated() {
        let (cmd, bulk) = parse_all(b"set  k  1  0  2\r\n").unwrap();
        assert_eq!(
            cmd,
            Command::Store {
                verb: StorageVerb::Set,
                key: b"k".to_vec(),
                flags: 1,
            }
        );
        assert_eq!(bulk, 2);
    }

    #[test]
    fn test_empty_slice_consumes_nothing() {
        let mut parser = Parser::new();
        assert_eq!(parser.parse(b"").unwrap(), (0, false));
    }

    #[test]
    fn test_negative_exptime_accepted() {
        let (_, bulk) = parse_all(b"set k 0 -1 4\r\n").unwrap();
        assert_eq!(bulk, 4);
    }
}
