use std::{collections::VecDeque, sync::atomic::Ordering, sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{sleep, timeout, Instant},
};
use tracing::{debug, error, trace, warn};

use super::{QueuedCall, Shared};
use crate::{
    commands::{Command, CommandError, Reply},
    errors::{Error, Result},
    net::StoreConnection,
    policy::StorePolicy,
};

/// Wait on the staging queue when there is nothing else to do.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// A call that has been written to the connection and is waiting for its
/// response. Responses arrive in submission order, so the inflight deque
/// is consumed strictly front-to-back.
struct InflightCall {
    name: &'static str,
    reply_tx: Option<oneshot::Sender<Result<Reply>>>,
    submitted_at: Instant,
}

/// The single owner of one store connection.
///
/// Only the worker touches the wire; callers hand their calls over through
/// the staging queue and the worker batches, submits, and delivers. All
/// I/O is strictly serial.
pub(super) struct Worker {
    shared: Arc<Shared>,
    policy: StorePolicy,
    conn: Box<dyn StoreConnection>,
    staging: mpsc::UnboundedReceiver<QueuedCall>,
    stop: watch::Receiver<bool>,
    batch: VecDeque<QueuedCall>,
    pipeline: VecDeque<InflightCall>,
    last_activity: Instant,
}

impl Worker {
    pub(super) fn new(
        shared: Arc<Shared>,
        policy: StorePolicy,
        conn: Box<dyn StoreConnection>,
        staging: mpsc::UnboundedReceiver<QueuedCall>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            shared,
            policy,
            conn,
            staging,
            stop,
            batch: VecDeque::new(),
            pipeline: VecDeque::new(),
            last_activity: Instant::now(),
        }
    }

    pub(super) async fn run(mut self) {
        debug!(client = %self.shared.label, "replica client worker started");

        while self.shared.is_alive() && !*self.stop.borrow() {
            while let Ok(call) = self.staging.try_recv() {
                self.batch.push_back(call);
            }

            if self.batch_due() {
                if let Err(err) = self.flush_batch().await {
                    self.die(&err).await;
                    return;
                }
            } else if !self.pipeline.is_empty() {
                if let Err(err) = self.await_head().await {
                    self.die(&err).await;
                    return;
                }
            } else {
                self.idle_wait().await;
            }
        }

        self.drain().await;
        debug!(client = %self.shared.label, "replica client worker stopped");
    }

    fn batch_due(&self) -> bool {
        match self.batch.front() {
            None => false,
            Some(oldest) => {
                self.batch.len() >= self.policy.batch_size
                    || oldest.offered_at.elapsed() >= self.policy.batch_timeout
            }
        }
    }

    /// Write every batched call to the connection in one burst and move it
    /// onto the pipeline.
    async fn flush_batch(&mut self) -> Result<(), CommandError> {
        while let Some(call) = self.batch.pop_front() {
            match self.conn.send(&call.cmd).await {
                Ok(()) => self.pipeline.push_back(InflightCall {
                    name: call.cmd.name(),
                    reply_tx: call.reply_tx,
                    submitted_at: Instant::now(),
                }),
                Err(err) => {
                    self.respond(call.reply_tx, Err(Error::Closed));
                    return Err(err);
                }
            }
        }
        self.conn.flush().await?;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Wait for the response to the oldest inflight call.
    async fn await_head(&mut self) -> Result<(), CommandError> {
        let head = self.pipeline.pop_front().expect("pipeline checked non-empty");
        match timeout(self.policy.call_timeout, self.conn.recv()).await {
            // Polling granularity, not a deadline: put the head back and
            // try again next tick. FIFO order is preserved.
            Err(_elapsed) => {
                self.pipeline.push_front(head);
                Ok(())
            }
            Ok(Ok(reply)) => {
                self.last_activity = Instant::now();
                self.deliver(head, reply);
                Ok(())
            }
            Ok(Err(err)) => {
                self.respond(
                    head.reply_tx,
                    Err(Error::Command(CommandError::Protocol(err.to_string()))),
                );
                Err(err)
            }
        }
    }

    /// Nothing to flush and nothing inflight: sleep on the staging queue,
    /// bounded by the age the oldest batched call has left.
    async fn idle_wait(&mut self) {
        let wait = match self.batch.front() {
            Some(oldest) => self
                .policy
                .batch_timeout
                .saturating_sub(oldest.offered_at.elapsed()),
            None => IDLE_WAIT,
        };
        tokio::select! {
            _changed = self.stop.changed() => {}
            call = self.staging.recv() => match call {
                Some(call) => self.batch.push_back(call),
                // Every handle is gone; nothing can arrive anymore.
                None => self.shared.alive.store(false, Ordering::Relaxed),
            },
            () = sleep(wait) => self.maybe_heartbeat(),
        }
    }

    fn maybe_heartbeat(&mut self) {
        if self.batch.is_empty()
            && self.pipeline.is_empty()
            && self.last_activity.elapsed() >= self.policy.heartbeat_interval
        {
            self.shared.inflight.fetch_add(1, Ordering::Relaxed);
            self.batch.push_back(QueuedCall {
                cmd: Command::Ping,
                reply_tx: None,
                offered_at: Instant::now(),
            });
        }
    }

    fn deliver(&mut self, call: InflightCall, reply: Reply) {
        let elapsed = call.submitted_at.elapsed();
        trace!(client = %self.shared.label, cmd = call.name, ?elapsed, "call completed");
        match reply {
            Reply::Error(message) => {
                warn!(
                    client = %self.shared.label,
                    cmd = call.name,
                    %message,
                    "store reported an error",
                );
                self.charge_error();
                self.respond(call.reply_tx, Err(Error::Store(message)));
            }
            reply => self.respond(call.reply_tx, Ok(reply)),
        }
    }

    fn respond(&self, reply_tx: Option<oneshot::Sender<Result<Reply>>>, result: Result<Reply>) {
        self.shared.inflight.fetch_sub(1, Ordering::Relaxed);
        if let Some(tx) = reply_tx {
            let _receiver_gone = tx.send(result);
        }
    }

    fn charge_error(&self) {
        let count = self.shared.error_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.shared.error_limit {
            warn!(
                client = %self.shared.label,
                count,
                "error limit crossed, disabling client",
            );
            self.shared.tripped.store(true, Ordering::Relaxed);
            self.shared.alive.store(false, Ordering::Relaxed);
        }
    }

    /// Connection-level failure: the client is dead. Fail everything that
    /// is still queued and close.
    async fn die(&mut self, err: &CommandError) {
        error!(
            client = %self.shared.label,
            error = %err,
            "connection failure, shutting down client",
        );
        self.shared.alive.store(false, Ordering::Relaxed);
        self.charge_error();
        self.fail_all_queued();
        self.conn.close().await;
    }

    fn fail_all_queued(&mut self) {
        while let Some(call) = self.pipeline.pop_front() {
            self.respond(call.reply_tx, Err(Error::Closed));
        }
        while let Some(call) = self.batch.pop_front() {
            self.respond(call.reply_tx, Err(Error::Closed));
        }
        while let Ok(call) = self.staging.try_recv() {
            self.respond(call.reply_tx, Err(Error::Closed));
        }
    }

    /// Graceful shutdown: pull any late submissions into a final batch,
    /// submit them, then deliver every inflight response with a bounded
    /// wait each. Only then does the connection close.
    async fn drain(&mut self) {
        self.shared.alive.store(false, Ordering::Relaxed);

        while let Ok(call) = self.staging.try_recv() {
            self.batch.push_back(call);
        }
        if let Err(err) = self.flush_batch().await {
            warn!(client = %self.shared.label, error = %err, "flush failed during drain");
            self.fail_all_queued();
            self.conn.close().await;
            return;
        }

        while let Some(call) = self.pipeline.pop_front() {
            match timeout(self.policy.call_timeout, self.conn.recv()).await {
                Ok(Ok(reply)) => self.deliver(call, reply),
                Ok(Err(err)) => {
                    warn!(client = %self.shared.label, error = %err, "connection failed during drain");
                    self.respond(
                        call.reply_tx,
                        Err(Error::Command(CommandError::Protocol(err.to_string()))),
                    );
                    self.fail_all_queued();
                    break;
                }
                Err(_elapsed) => {
                    self.shared.timeout_count.fetch_add(1, Ordering::Relaxed);
                    self.respond(call.reply_tx, Err(Error::CallTimeout));
                }
            }
        }
        self.conn.close().await;
    }
}
