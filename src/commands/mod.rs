//! Commands and replies of the list-store wire protocol.
//!
//! Only the capabilities the timeline store uses are modeled. Commands
//! encode as arrays of bulk strings; replies are parsed incrementally so a
//! cancelled read never loses a partial frame (see [`codec`]).

mod codec;

use bytes::Bytes;

use crate::entry::Entry;

pub type Result<T, E = CommandError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("I/O related error")]
    Io(#[from] std::io::Error),
    #[error("Protocol corruption: {0}")]
    Protocol(String),
    #[error("Unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply {
        expected: &'static str,
        got: &'static str,
    },
}

/// A single call to the store.
#[derive(Clone, Debug)]
pub enum Command {
    Exists { key: String },
    /// Append, creating the list when it does not exist.
    RPush { key: String, value: Bytes },
    /// Append only if the list exists; replies 0 otherwise.
    RPushX { key: String, value: Bytes },
    /// Prepend only if the list exists; replies 0 otherwise.
    LPushX { key: String, value: Bytes },
    /// Remove occurrences of `value`. `count` 0 removes them all.
    LRem { key: String, count: i64, value: Bytes },
    /// Insert `value` before `pivot` in newest-first traversal order, i.e.
    /// on the tail side of the occurrence nearest the tail. Replies the new
    /// length, or -1 when the pivot is absent.
    LInsertBefore { key: String, pivot: Bytes, value: Bytes },
    LRange { key: String, start: i64, stop: i64 },
    LLen { key: String },
    LTrim { key: String, start: i64, stop: i64 },
    Del { key: String },
    Rename { from: String, to: String },
    Keys { pattern: String },
    Ping,
    Quit,
}

impl Command {
    /// Command name for logs and stats.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Exists { .. } => "EXISTS",
            Self::RPush { .. } => "RPUSH",
            Self::RPushX { .. } => "RPUSHX",
            Self::LPushX { .. } => "LPUSHX",
            Self::LRem { .. } => "LREM",
            Self::LInsertBefore { .. } => "LINSERT",
            Self::LRange { .. } => "LRANGE",
            Self::LLen { .. } => "LLEN",
            Self::LTrim { .. } => "LTRIM",
            Self::Del { .. } => "DEL",
            Self::Rename { .. } => "RENAME",
            Self::Keys { .. } => "KEYS",
            Self::Ping => "PING",
            Self::Quit => "QUIT",
        }
    }
}

/// A single response from the store, in submission order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    Status(String),
    /// Store-reported failure for this one call. The connection is fine.
    Error(String),
    Integer(i64),
    Bulk(Option<Bytes>),
    Multi(Vec<Reply>),
}

impl Reply {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::Bulk(_) => "bulk",
            Self::Multi(_) => "multi",
        }
    }

    pub fn into_integer(self) -> Result<i64> {
        match self {
            Self::Integer(n) => Ok(n),
            other => Err(unexpected("integer", &other)),
        }
    }

    pub fn into_status(self) -> Result<String> {
        match self {
            Self::Status(s) => Ok(s),
            other => Err(unexpected("status", &other)),
        }
    }

    pub fn into_multi(self) -> Result<Vec<Reply>> {
        match self {
            Self::Multi(replies) => Ok(replies),
            other => Err(unexpected("multi", &other)),
        }
    }

    pub fn into_bulk(self) -> Result<Option<Bytes>> {
        match self {
            Self::Bulk(data) => Ok(data),
            other => Err(unexpected("bulk", &other)),
        }
    }

    /// Interpret a multi-bulk reply as a newest-last window of entries.
    pub fn into_entries(self) -> Result<Vec<Entry>> {
        self.into_multi()?
            .into_iter()
            .map(|reply| Ok(Entry::from(reply.into_bulk()?.unwrap_or_default())))
            .collect()
    }
}

fn unexpected(expected: &'static str, got: &Reply) -> CommandError {
    CommandError::UnexpectedReply {
        expected,
        got: got.kind(),
    }
}
