//! Executable commands built by the protocol parser.
//!
//! Each parsed header becomes a [`Command`] carrying its textual arguments.
//! Execution binds the command to a [`Storage`] backend and produces the
//! reply bytes without the trailing CRLF; the connection layer appends it.

use crate::storage::Storage;

/// Which store operation a storage command maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageVerb {
    /// `set`: unconditional store.
    Set,
    /// `add`: store only if absent.
    Add,
    /// `replace`: store only if present.
    Replace,
    /// `append`: extend an existing value at the end.
    Append,
    /// `prepend`: extend an existing value at the front.
    Prepend,
}

impl StorageVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageVerb::Set => "set",
            StorageVerb::Add => "add",
            StorageVerb::Replace => "replace",
            StorageVerb::Append => "append",
            StorageVerb::Prepend => "prepend",
        }
    }
}

/// A fully parsed command, ready to run once its bulk argument arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A storage command; the value arrives as the bulk argument.
    Store {
        verb: StorageVerb,
        key: Vec<u8>,
        flags: u32,
    },
    /// `get` / `gets` over one or more keys.
    Retrieve {
        keys: Vec<Vec<u8>>,
        with_cas: bool,
    },
    /// `delete` of a single key.
    Delete { key: Vec<u8> },
    /// `stats` counters dump.
    Stats,
}

impl Command {
    /// Wire name of the command, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Store { verb, .. } => verb.as_str(),
            Command::Retrieve { with_cas: false, .. } => "get",
            Command::Retrieve { with_cas: true, .. } => "gets",
            Command::Delete { .. } => "delete",
            Command::Stats => "stats",
        }
    }

    /// Runs the command against `store` with the bulk argument (already
    /// stripped of its trailing CRLF) and returns the reply without a
    /// trailing CRLF.
    pub fn execute(&self, store: &dyn Storage, arg: &[u8]) -> Vec<u8> {
        match self {
            Command::Store { verb, key, flags } => {
                let stored = match verb {
                    StorageVerb::Set => store.put(key, *flags, arg),
                    StorageVerb::Add => store.put_if_absent(key, *flags, arg),
                    StorageVerb::Replace => store.replace(key, *flags, arg),
                    StorageVerb::Append => store.append(key, arg),
                    StorageVerb::Prepend => store.prepend(key, arg),
                };
                if stored {
                    b"STORED".to_vec()
                } else if *verb == StorageVerb::Set {
                    // `set` only fails when the entry cannot fit at all.
                    b"SERVER_ERROR object too large for cache".to_vec()
                } else {
                    b"NOT_STORED".to_vec()
                }
            }
            Command::Retrieve { keys, with_cas } => {
                let mut reply = Vec::new();
                for key in keys {
                    if let Some(hit) = store.get(key) {
                        reply.extend_from_slice(b"VALUE ");
                        reply.extend_from_slice(key);
                        if *with_cas {
                            reply.extend_from_slice(
                                format!(" {} {} {}\r\n", hit.flags, hit.data.len(), hit.cas)
                                    .as_bytes(),
                            );
                        } else {
                            reply.extend_from_slice(
                                format!(" {} {}\r\n", hit.flags, hit.data.len()).as_bytes(),
                            );
                        }
                        reply.extend_from_slice(&hit.data);
                        reply.extend_from_slice(b"\r\n");
                    }
                }
                reply.extend_from_slice(b"END");
                reply
            }
            Command::Delete { key } => {
                if store.delete(key) {
                    b"DELETED".to_vec()
                } else {
                    b"NOT_FOUND".to_vec()
                }
            }
            Command::Stats => {
                let snapshot = store.stats();
                let mut reply = Vec::new();
                for (name, value) in snapshot.entries() {
                    reply.extend_from_slice(format!("STAT {name} {value}\r\n").as_bytes());
                }
                reply.extend_from_slice(b"END");
                reply
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::storage::SharedLru;

    fn make_store(max_size: u64) -> SharedLru {
        SharedLru::new(StoreConfig { max_size })
    }

    fn store_cmd(verb: StorageVerb, key: &[u8], flags: u32) -> Command {
        Command::Store {
            verb,
            key: key.to_vec(),
            flags,
        }
    }

    fn get_cmd(keys: &[&[u8]]) -> Command {
        Command::Retrieve {
            keys: keys.iter().map(|k| k.to_vec()).collect(),
            with_cas: false,
        }
    }

    #[test]
    fn test_set_then_get() {
        let store = make_store(1024);
        let reply = store_cmd(StorageVerb::Set, b"foo", 0).execute(&store, b"bar");
        assert_eq!(reply, b"STORED");

        let reply = get_cmd(&[b"foo"]).execute(&store, b"");
        assert_eq!(reply, b"VALUE foo 0 3\r\nbar\r\nEND");
    }

    #[test]
    fn test_get_missing_is_bare_end() {
        let store = make_store(1024);
        let reply = get_cmd(&[b"missing"]).execute(&store, b"");
        assert_eq!(reply, b"END");
    }

    #[test]
    fn test_multi_key_get_skips_misses() {
        let store = make_store(1024);
        store_cmd(StorageVerb::Set, b"a", 1).execute(&store, b"1");
        store_cmd(StorageVerb::Set, b"c", 3).execute(&store, b"333");
        let reply = get_cmd(&[b"a", b"b", b"c"]).execute(&store, b"");
        assert_eq!(reply, b"VALUE a 1 1\r\n1\r\nVALUE c 3 3\r\n333\r\nEND");
    }

    #[test]
    fn test_gets_appends_cas_column() {
        let store = make_store(1024);
        store_cmd(StorageVerb::Set, b"k", 0).execute(&store, b"v");
        let reply = Command::Retrieve {
            keys: vec![b"k".to_vec()],
            with_cas: true,
        }
        .execute(&store, b"");
        assert_eq!(reply, b"VALUE k 0 1 1\r\nv\r\nEND");
    }

    #[test]
    fn test_add_and_replace_conditions() {
        let store = make_store(1024);
        assert_eq!(
            store_cmd(StorageVerb::Replace, b"k", 0).execute(&store, b"v"),
            b"NOT_STORED"
        );
        assert_eq!(
            store_cmd(StorageVerb::Add, b"k", 0).execute(&store, b"v"),
            b"STORED"
        );
        assert_eq!(
            store_cmd(StorageVerb::Add, b"k", 0).execute(&store, b"w"),
            b"NOT_STORED"
        );
        assert_eq!(
            store_cmd(StorageVerb::Replace, b"k", 0).execute(&store, b"w"),
            b"STORED"
        );
    }

    #[test]
    fn test_append_prepend() {
        let store = make_store(1024);
        assert_eq!(
            store_cmd(StorageVerb::Append, b"k", 0).execute(&store, b"x"),
            b"NOT_STORED"
        );
        store_cmd(StorageVerb::Set, b"k", 0).execute(&store, b"mid");
        store_cmd(StorageVerb::Append, b"k", 0).execute(&store, b"-end");
        store_cmd(StorageVerb::Prepend, b"k", 0).execute(&store, b"start-");
        let reply = get_cmd(&[b"k"]).execute(&store, b"");
        assert_eq!(reply, b"VALUE k 0 13\r\nstart-mid-end\r\nEND");
    }

    #[test]
    fn test_oversized_set_reports_server_error() {
        let store = make_store(8);
        let reply = store_cmd(StorageVerb::Set, b"too", 0).execute(&store, b"1234567");
        assert_eq!(reply, b"SERVER_ERROR object too large for cache");
    }

    #[test]
    fn test_delete_replies() {
        let store = make_store(1024);
        assert_eq!(
            Command::Delete { key: b"k".to_vec() }.execute(&store, b""),
            b"NOT_FOUND"
        );
        store_cmd(StorageVerb::Set, b"k", 0).execute(&store, b"v");
        assert_eq!(
            Command::Delete { key: b"k".to_vec() }.execute(&store, b""),
            b"DELETED"
        );
    }

    #[test]
    fn test_stats_shape() {
        let store = make_store(1024);
        store_cmd(StorageVerb::Set, b"k", 0).execute(&store, b"v");
        let reply = Command::Stats.execute(&store, b"");
        let text = String::from_utf8(reply).unwrap();
        assert!(text.starts_with("STAT cmd_get "));
        assert!(text.contains("STAT curr_items 1\r\n"));
        assert!(text.contains("STAT limit_maxbytes 1024\r\n"));
        assert!(text.ends_with("END"));
    }

    #[test]
    fn test_command_names() {
        assert_eq!(store_cmd(StorageVerb::Set, b"k", 0).name(), "set");
        assert_eq!(get_cmd(&[b"k"]).name(), "get");
        assert_eq!(Command::Stats.name(), "stats");
    }
}
