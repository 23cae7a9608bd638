//! The pipelined replica client.
//!
//! A [`ReplicaClient`] multiplexes many concurrent logical calls onto one
//! store connection. Callers never touch the connection: submissions land
//! in a staging queue, a dedicated worker coalesces them into batches,
//! writes each batch in one burst, and consumes responses front-to-back
//! from the inflight pipeline (the store answers strictly in submission
//! order). This amortizes round trips, keeps per-call latency bounded, and
//! turns sustained store errors into a liveness signal for the owning
//! pool.
//!
//! The per-call timeout is a *polling granularity*, not a hard deadline: a
//! pipeline head that has not answered yet is re-queued at the front and
//! tried again on the next tick, preserving wire FIFO without per-request
//! deadline tracking. The trade-off is that one slow response can hold up
//! the queue head; hosts with chronic latency are caught by the error
//! accounting, not by per-op timeouts.

mod worker;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rand::Rng;
use tokio::{
    sync::{mpsc, oneshot, watch, Mutex},
    task::JoinHandle,
    time::{timeout, Instant},
};

use self::worker::Worker;
use crate::{
    commands::{Command, Reply},
    entry::{Entry, KEY_LIST},
    errors::{Error, Result},
    net::Connector,
    policy::StorePolicy,
};

/// State shared between the client handle and its worker.
#[derive(Debug)]
pub(crate) struct Shared {
    label: String,
    error_limit: usize,
    /// Calls in staging, batch and pipeline together.
    inflight: AtomicUsize,
    error_count: AtomicUsize,
    timeout_count: AtomicUsize,
    alive: AtomicBool,
    /// Set when `error_count` crossed `error_limit`; tells the pool to
    /// open the auto-disable window for this host.
    tripped: AtomicBool,
}

impl Shared {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }
}

/// A call queued for submission, together with its reply slot. Calls whose
/// result nobody wants (trims, heartbeats) carry no sender.
struct QueuedCall {
    cmd: Command,
    reply_tx: Option<oneshot::Sender<Result<Reply>>>,
    offered_at: Instant,
}

/// An accepted submission. Await it with [`Pending::wait`] to receive the
/// reply, or drop it for fire-and-forget semantics; the call itself is
/// submitted either way.
#[derive(Debug)]
pub struct Pending {
    rx: oneshot::Receiver<Result<Reply>>,
    shared: Arc<Shared>,
}

impl Pending {
    /// Wait for the reply, up to `deadline`.
    pub async fn wait(self, deadline: Duration) -> Result<Reply> {
        let Self { rx, shared } = self;
        match timeout(deadline, rx).await {
            Err(_elapsed) => {
                shared.timeout_count.fetch_add(1, Ordering::Relaxed);
                Err(Error::CallTimeout)
            }
            Ok(Err(_dropped)) => Err(Error::Closed),
            Ok(Ok(result)) => result,
        }
    }
}

/// Single-connection pipelined client to one replica host.
pub struct ReplicaClient {
    shared: Arc<Shared>,
    policy: StorePolicy,
    staging: mpsc::UnboundedSender<QueuedCall>,
    stop: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ReplicaClient {
    /// Open a connection through `connector` and start the worker.
    ///
    /// `error_limit` is the cumulative error count after which the client
    /// marks itself dead; pass the pool's auto-disable limit, or
    /// `usize::MAX` for a standalone client.
    pub async fn connect(
        connector: &dyn Connector,
        policy: StorePolicy,
        error_limit: usize,
    ) -> Result<Self> {
        let conn = connector.connect().await?;
        let shared = Arc::new(Shared {
            label: connector.label().to_owned(),
            error_limit,
            inflight: AtomicUsize::new(0),
            error_count: AtomicUsize::new(0),
            timeout_count: AtomicUsize::new(0),
            alive: AtomicBool::new(true),
            tripped: AtomicBool::new(false),
        });
        let (staging_tx, staging_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Worker::new(
            Arc::clone(&shared),
            policy.clone(),
            conn,
            staging_rx,
            stop_rx,
        );

        Ok(Self {
            shared,
            policy,
            staging: staging_tx,
            stop: stop_tx,
            worker: Mutex::new(Some(tokio::spawn(worker.run()))),
        })
    }

    /// Append `entry` if the timeline exists; replies with the new length,
    /// 0 when the timeline is absent and the entry was dropped. Timelines
    /// come into existence through live copy or atomic replace, never
    /// through plain appends, which keeps retried appends to deleted
    /// timelines harmless.
    pub fn push(&self, timeline: &str, entry: Entry) -> Result<Pending> {
        self.submit(Command::RPushX {
            key: timeline.to_owned(),
            value: entry.into_bytes(),
        })
    }

    /// Remove every occurrence of `entry`; replies with the removed count.
    pub fn pop(&self, timeline: &str, entry: Entry) -> Result<Pending> {
        self.submit(Command::LRem {
            key: timeline.to_owned(),
            count: 0,
            value: entry.into_bytes(),
        })
    }

    /// Insert `entry` just newer than `after`. Replies with the new
    /// length, or -1 when `after` is absent (already trimmed away) and
    /// nothing was inserted.
    pub fn push_after(&self, timeline: &str, after: Entry, entry: Entry) -> Result<Pending> {
        self.submit(Command::LInsertBefore {
            key: timeline.to_owned(),
            pivot: after.into_bytes(),
            value: entry.into_bytes(),
        })
    }

    /// Keep only the newest `keep` entries. Fire and forget.
    pub fn trim(&self, timeline: &str, keep: usize) -> Result<()> {
        if keep == 0 {
            return self.submit_forget(Command::Del {
                key: timeline.to_owned(),
            });
        }
        self.submit_forget(Command::LTrim {
            key: timeline.to_owned(),
            start: -(keep as i64),
            stop: -1,
        })
    }

    /// A newest-first window of `timeline`: up to `length` entries
    /// starting `offset` back from the newest. `length <= 0` reads from
    /// `offset` all the way to the oldest entry.
    pub async fn get(&self, timeline: &str, offset: usize, length: isize) -> Result<Vec<Entry>> {
        let (start, stop) = range_window(offset, length);
        let reply = self
            .submit(Command::LRange {
                key: timeline.to_owned(),
                start,
                stop,
            })?
            .wait(self.policy.call_timeout)
            .await?;
        let mut entries = reply.into_entries().map_err(Error::from)?;
        entries.reverse();
        Ok(entries)
    }

    pub async fn size(&self, timeline: &str) -> Result<usize> {
        let reply = self
            .submit(Command::LLen {
                key: timeline.to_owned(),
            })?
            .wait(self.policy.call_timeout)
            .await?;
        Ok(reply.into_integer().map_err(Error::from)?.max(0) as usize)
    }

    pub async fn exists(&self, timeline: &str) -> Result<bool> {
        let reply = self
            .submit(Command::Exists {
                key: timeline.to_owned(),
            })?
            .wait(self.policy.call_timeout)
            .await?;
        Ok(reply.into_integer().map_err(Error::from)? != 0)
    }

    pub async fn delete(&self, timeline: &str) -> Result<()> {
        self.submit(Command::Del {
            key: timeline.to_owned(),
        })?
        .wait(self.policy.call_timeout)
        .await?;
        Ok(())
    }

    /// Replace the contents of `timeline` with `entries` (newest first)
    /// without a reader ever observing a torn state: the entries are
    /// pushed into a collision-checked temporary list, which is then
    /// renamed over the target in one step. Empty input is a no-op. On
    /// failure the target is untouched and the temporary list is orphaned.
    pub async fn set_atomically(&self, timeline: &str, entries: &[Entry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let temp = self.reserve_temp_name(timeline).await?;

        // Oldest pushed first so the newest ends up at the tail. The first
        // push is unconditional; it is what creates the list.
        let reversed: Vec<&Entry> = entries.iter().rev().collect();
        for chunk in reversed.chunks(self.policy.batch_size) {
            let pendings = chunk
                .iter()
                .map(|entry| {
                    self.submit(Command::RPush {
                        key: temp.clone(),
                        value: (*entry).clone().into_bytes(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            for pending in pendings {
                pending.wait(self.policy.call_timeout).await?;
            }
        }

        self.submit(Command::Rename {
            from: temp,
            to: timeline.to_owned(),
        })?
        .wait(self.policy.call_timeout)
        .await?;
        Ok(())
    }

    /// Begin a live copy into `timeline`: drop whatever is there and leave
    /// exactly the empty sentinel, so the timeline exists and live appends
    /// land while the backfill runs.
    pub async fn set_live_start(&self, timeline: &str) -> Result<()> {
        self.delete(timeline).await?;
        self.submit(Command::RPush {
            key: timeline.to_owned(),
            value: Entry::sentinel().into_bytes(),
        })?
        .wait(self.policy.call_timeout)
        .await?;
        Ok(())
    }

    /// Backfill `entries` (newest first) underneath a live-appending
    /// timeline by prepending them on the old side. A no-op when the
    /// timeline does not exist, which makes a backfill against a timeline
    /// whose sentinel step never ran harmless.
    pub async fn set_live(&self, timeline: &str, entries: &[Entry]) -> Result<()> {
        for chunk in entries.chunks(self.policy.batch_size) {
            let pendings = chunk
                .iter()
                .map(|entry| {
                    self.submit(Command::LPushX {
                        key: timeline.to_owned(),
                        value: entry.clone().into_bytes(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            for pending in pendings {
                pending.wait(self.policy.call_timeout).await?;
            }
        }
        Ok(())
    }

    /// Capture the current set of timeline names into the reserved
    /// [`KEY_LIST`] list and reply with its size. Used by copy and
    /// migration drivers to page through [`Self::get_keys`].
    pub async fn make_key_list(&self) -> Result<usize> {
        let reply = self
            .submit(Command::Keys {
                pattern: "*".to_owned(),
            })?
            .wait(self.policy.keys_timeout)
            .await?;
        let keys = reply
            .into_multi()
            .map_err(Error::from)?
            .into_iter()
            .map(|r| {
                Ok(String::from_utf8_lossy(&r.into_bulk()?.unwrap_or_default()).into_owned())
            })
            .collect::<Result<Vec<_>, crate::commands::CommandError>>()?
            .into_iter()
            .filter(|key| key != KEY_LIST)
            .collect::<Vec<_>>();

        // Clear the previous snapshot before rebuilding.
        self.submit(Command::LTrim {
            key: KEY_LIST.to_owned(),
            start: 1,
            stop: 0,
        })?
        .wait(self.policy.call_timeout)
        .await?;

        for chunk in keys.chunks(self.policy.batch_size) {
            let pendings = chunk
                .iter()
                .map(|key| {
                    self.submit(Command::RPush {
                        key: KEY_LIST.to_owned(),
                        value: bytes::Bytes::from(key.clone().into_bytes()),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            for pending in pendings {
                pending.wait(self.policy.call_timeout).await?;
            }
        }

        // A final length read forces the whole refresh through the
        // pipeline before the caller proceeds.
        let len = self
            .submit(Command::LLen {
                key: KEY_LIST.to_owned(),
            })?
            .wait(self.policy.call_timeout)
            .await?
            .into_integer()
            .map_err(Error::from)?;
        Ok(len.max(0) as usize)
    }

    /// A slice of the key-list snapshot.
    pub async fn get_keys(&self, offset: usize, count: usize) -> Result<Vec<String>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let reply = self
            .submit(Command::LRange {
                key: KEY_LIST.to_owned(),
                start: offset as i64,
                stop: (offset + count - 1) as i64,
            })?
            .wait(self.policy.keys_timeout)
            .await?;
        reply
            .into_multi()
            .map_err(Error::from)?
            .into_iter()
            .map(|r| {
                Ok(String::from_utf8_lossy(&r.into_bulk().map_err(Error::from)?.unwrap_or_default())
                    .into_owned())
            })
            .collect()
    }

    pub async fn delete_key_list(&self) -> Result<()> {
        self.delete(KEY_LIST).await
    }

    /// Signal the worker to stop, then wait for it to drain: staging is
    /// flushed into a final submission and every inflight call is
    /// delivered (bounded wait each) before the connection closes.
    pub async fn shutdown(&self) {
        let _ignored = self.stop.send(true);
        if let Some(handle) = self.worker.lock().await.take() {
            let _join = handle.await;
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.shared.is_alive()
    }

    /// Calls currently staged, batched, or on the wire.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.shared.inflight.load(Ordering::Relaxed)
    }

    /// Cumulative store-reported and unknown errors.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.shared.error_count.load(Ordering::Relaxed)
    }

    /// Cumulative caller-observed response timeouts.
    #[must_use]
    pub fn timeout_count(&self) -> usize {
        self.shared.timeout_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub(crate) fn tripped(&self) -> bool {
        self.shared.tripped.load(Ordering::Relaxed)
    }

    fn submit(&self, cmd: Command) -> Result<Pending> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(cmd, Some(tx))?;
        Ok(Pending {
            rx,
            shared: Arc::clone(&self.shared),
        })
    }

    fn submit_forget(&self, cmd: Command) -> Result<()> {
        self.enqueue(cmd, None)
    }

    fn enqueue(
        &self,
        cmd: Command,
        reply_tx: Option<oneshot::Sender<Result<Reply>>>,
    ) -> Result<()> {
        if !self.shared.is_alive() {
            return Err(Error::Closed);
        }
        let previous = self.shared.inflight.fetch_add(1, Ordering::Relaxed);
        if previous >= self.policy.pipeline_max_size {
            self.shared.inflight.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::Overloaded);
        }
        let call = QueuedCall {
            cmd,
            reply_tx,
            offered_at: Instant::now(),
        };
        self.staging.send(call).map_err(|_closed| {
            self.shared.inflight.fetch_sub(1, Ordering::Relaxed);
            Error::Closed
        })
    }

    async fn reserve_temp_name(&self, base: &str) -> Result<String> {
        loop {
            let name = temp_name(base);
            if !self.exists(&name).await? {
                return Ok(name);
            }
        }
    }
}

/// Unique scratch name for the atomic-replace staging list:
/// `base~<wallclock millis>~<31 random bits>`.
fn temp_name(base: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let random = rand::thread_rng().gen::<u32>() >> 1;
    format!("{base}~{millis}~{random}")
}

/// Translate a newest-first window into store indices. Index -1 is the
/// newest entry; the reply arrives oldest-first and is reversed by the
/// caller.
fn range_window(offset: usize, length: isize) -> (i64, i64) {
    let stop = -(offset as i64) - 1;
    let start = if length <= 0 {
        0
    } else {
        stop - length as i64 + 1
    };
    (start, stop)
}
