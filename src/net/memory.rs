use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;

use super::{Connector, Result, StoreConnection};
use crate::commands::{Command, CommandError, Reply};

/// In-memory list store used in development and tests.
///
/// Implements the same list semantics as the real store, including removal
/// of keys whose list becomes empty. Cloning shares the underlying state,
/// so every connection made from the same store observes the same lists.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    lists: Arc<Mutex<HashMap<String, VecDeque<Bytes>>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a store-reported error, or
    /// recover. Lets tests drive the error-accounting paths.
    pub fn fail_all(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Direct view of one list, newest last. Test helper.
    #[must_use]
    pub fn list(&self, key: &str) -> Vec<Bytes> {
        let lists = self.lists.lock().expect("store lock poisoned");
        lists.get(key).map(|l| l.iter().cloned().collect()).unwrap_or_default()
    }

    fn execute(&self, cmd: &Command) -> Reply {
        if self.failing.load(Ordering::Relaxed) {
            return Reply::Error("ERR injected failure".to_owned());
        }
        let mut lists = self.lists.lock().expect("store lock poisoned");

        match cmd {
            Command::Exists { key } => Reply::Integer(i64::from(lists.contains_key(key))),
            Command::RPush { key, value } => {
                let list = lists.entry(key.clone()).or_default();
                list.push_back(value.clone());
                Reply::Integer(list.len() as i64)
            }
            Command::RPushX { key, value } => match lists.get_mut(key) {
                Some(list) => {
                    list.push_back(value.clone());
                    Reply::Integer(list.len() as i64)
                }
                None => Reply::Integer(0),
            },
            Command::LPushX { key, value } => match lists.get_mut(key) {
                Some(list) => {
                    list.push_front(value.clone());
                    Reply::Integer(list.len() as i64)
                }
                None => Reply::Integer(0),
            },
            Command::LRem { key, count: _, value } => {
                let Some(list) = lists.get_mut(key) else {
                    return Reply::Integer(0);
                };
                let before = list.len();
                list.retain(|v| v != value);
                let removed = before - list.len();
                let now_empty = list.is_empty();
                if now_empty {
                    lists.remove(key);
                }
                Reply::Integer(removed as i64)
            }
            Command::LInsertBefore { key, pivot, value } => {
                let Some(list) = lists.get_mut(key) else {
                    return Reply::Integer(0);
                };
                // Pivot resolution follows newest-first traversal: nearest
                // to the tail, insert on its tail side.
                match list.iter().rposition(|v| v == pivot) {
                    Some(at) => {
                        list.insert(at + 1, value.clone());
                        Reply::Integer(list.len() as i64)
                    }
                    None => Reply::Integer(-1),
                }
            }
            Command::LRange { key, start, stop } => {
                let Some(list) = lists.get(key) else {
                    return Reply::Multi(Vec::new());
                };
                let (start, stop) = window(*start, *stop, list.len());
                if start > stop {
                    return Reply::Multi(Vec::new());
                }
                let replies = list
                    .iter()
                    .skip(start)
                    .take(stop - start + 1)
                    .map(|v| Reply::Bulk(Some(v.clone())))
                    .collect();
                Reply::Multi(replies)
            }
            Command::LLen { key } => {
                Reply::Integer(lists.get(key).map_or(0, |l| l.len() as i64))
            }
            Command::LTrim { key, start, stop } => {
                let now_empty = match lists.get_mut(key) {
                    Some(list) => {
                        let (start, stop) = window(*start, *stop, list.len());
                        if start > stop {
                            list.clear();
                        } else {
                            let kept: VecDeque<_> = list
                                .iter()
                                .skip(start)
                                .take(stop - start + 1)
                                .cloned()
                                .collect();
                            *list = kept;
                        }
                        list.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    lists.remove(key);
                }
                Reply::Status("OK".to_owned())
            }
            Command::Del { key } => Reply::Integer(i64::from(lists.remove(key).is_some())),
            Command::Rename { from, to } => match lists.remove(from) {
                Some(list) => {
                    lists.insert(to.clone(), list);
                    Reply::Status("OK".to_owned())
                }
                None => Reply::Error("ERR no such key".to_owned()),
            },
            Command::Keys { pattern } => {
                let mut keys: Vec<_> = lists
                    .keys()
                    .filter(|k| pattern == "*" || k.as_str() == pattern.as_str())
                    .cloned()
                    .collect();
                keys.sort();
                Reply::Multi(
                    keys.into_iter()
                        .map(|k| Reply::Bulk(Some(Bytes::from(k.into_bytes()))))
                        .collect(),
                )
            }
            Command::Ping => Reply::Status("PONG".to_owned()),
            Command::Quit => Reply::Status("OK".to_owned()),
        }
    }
}

/// Resolve a start/stop index pair the way the store does: negative
/// indices count from the tail, then both are clamped to the list. A
/// resolved `start > stop` means an empty window.
fn window(start: i64, stop: i64, len: usize) -> (usize, usize) {
    let len = len as i64;
    let resolve = |idx: i64| if idx < 0 { len + idx } else { idx };
    let start = resolve(start).max(0);
    let stop = resolve(stop).min(len - 1);
    if start > stop || stop < 0 {
        (1, 0)
    } else {
        (start as usize, stop as usize)
    }
}

/// One pipelined session against a [`MemoryStore`].
///
/// Commands execute at send time; their replies queue up FIFO and are
/// consumed by `recv`, mirroring how responses stream back over a real
/// connection.
#[derive(Debug)]
pub struct MemoryConnection {
    store: MemoryStore,
    pending: VecDeque<Reply>,
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn send(&mut self, cmd: &Command) -> Result<(), CommandError> {
        let reply = self.store.execute(cmd);
        self.pending.push_back(reply);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), CommandError> {
        Ok(())
    }

    async fn recv(&mut self) -> Result<Reply, CommandError> {
        loop {
            if let Some(reply) = self.pending.pop_front() {
                return Ok(reply);
            }
            // Nothing inflight; behave like an idle wire.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn close(&mut self) {
        self.pending.clear();
    }
}

/// Hands out connections to a shared [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnector {
    label: String,
    store: MemoryStore,
}

impl MemoryConnector {
    #[must_use]
    pub fn new(label: impl Into<String>, store: MemoryStore) -> Self {
        Self {
            label: label.into(),
            store,
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        Ok(Box::new(MemoryConnection {
            store: self.store.clone(),
            pending: VecDeque::new(),
        }))
    }

    fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::MemoryStore;
    use crate::commands::{Command, Reply};

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn seed(store: &MemoryStore, key: &str, values: &[&str]) {
        for v in values {
            store.execute(&Command::RPush {
                key: key.to_owned(),
                value: b(v),
            });
        }
    }

    #[test]
    fn rpushx_requires_existing_list() {
        let store = MemoryStore::new();
        let reply = store.execute(&Command::RPushX {
            key: "t".to_owned(),
            value: b("e1"),
        });
        assert_eq!(reply, Reply::Integer(0));
        assert!(store.list("t").is_empty());

        seed(&store, "t", &["e1"]);
        let reply = store.execute(&Command::RPushX {
            key: "t".to_owned(),
            value: b("e2"),
        });
        assert_eq!(reply, Reply::Integer(2));
    }

    #[test]
    fn lrange_resolves_negative_indices() {
        let store = MemoryStore::new();
        seed(&store, "t", &["a", "b", "c", "d"]);

        let reply = store.execute(&Command::LRange {
            key: "t".to_owned(),
            start: -3,
            stop: -2,
        });
        assert_eq!(
            reply,
            Reply::Multi(vec![Reply::Bulk(Some(b("b"))), Reply::Bulk(Some(b("c")))])
        );

        // Window larger than the list clamps to the whole list.
        let reply = store.execute(&Command::LRange {
            key: "t".to_owned(),
            start: -100,
            stop: -1,
        });
        assert_eq!(reply.into_multi().unwrap().len(), 4);

        // Offset past the head yields nothing.
        let reply = store.execute(&Command::LRange {
            key: "t".to_owned(),
            start: 0,
            stop: -5,
        });
        assert_eq!(reply, Reply::Multi(Vec::new()));
    }

    #[test]
    fn ltrim_keeps_tail_and_drops_empty_lists() {
        let store = MemoryStore::new();
        seed(&store, "t", &["a", "b", "c", "d", "e"]);

        store.execute(&Command::LTrim {
            key: "t".to_owned(),
            start: -2,
            stop: -1,
        });
        assert_eq!(store.list("t"), vec![b("d"), b("e")]);

        store.execute(&Command::LTrim {
            key: "t".to_owned(),
            start: 1,
            stop: 0,
        });
        assert!(store.list("t").is_empty());
        assert_eq!(
            store.execute(&Command::Exists { key: "t".to_owned() }),
            Reply::Integer(0)
        );
    }

    #[test]
    fn lrem_removes_every_occurrence() {
        let store = MemoryStore::new();
        seed(&store, "t", &["x", "a", "x", "b", "x"]);

        let reply = store.execute(&Command::LRem {
            key: "t".to_owned(),
            count: 0,
            value: b("x"),
        });
        assert_eq!(reply, Reply::Integer(3));
        assert_eq!(store.list("t"), vec![b("a"), b("b")]);
    }

    #[test]
    fn linsert_targets_occurrence_nearest_tail() {
        let store = MemoryStore::new();
        seed(&store, "t", &["p", "a", "p", "b"]);

        let reply = store.execute(&Command::LInsertBefore {
            key: "t".to_owned(),
            pivot: b("p"),
            value: b("new"),
        });
        assert_eq!(reply, Reply::Integer(5));
        assert_eq!(
            store.list("t"),
            vec![b("p"), b("a"), b("p"), b("new"), b("b")]
        );

        let reply = store.execute(&Command::LInsertBefore {
            key: "t".to_owned(),
            pivot: b("absent"),
            value: b("new"),
        });
        assert_eq!(reply, Reply::Integer(-1));
    }

    #[test]
    fn rename_moves_and_overwrites() {
        let store = MemoryStore::new();
        seed(&store, "tmp", &["a"]);
        seed(&store, "t", &["stale"]);

        let reply = store.execute(&Command::Rename {
            from: "tmp".to_owned(),
            to: "t".to_owned(),
        });
        assert_eq!(reply, Reply::Status("OK".to_owned()));
        assert_eq!(store.list("t"), vec![b("a")]);
        assert!(store.list("tmp").is_empty());

        let reply = store.execute(&Command::Rename {
            from: "missing".to_owned(),
            to: "t".to_owned(),
        });
        assert!(matches!(reply, Reply::Error(_)));
    }
}
