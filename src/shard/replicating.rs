use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use tracing::warn;

use super::{ReplicaShard, Timelines};
use crate::{
    entry::Entry,
    errors::{Error, Result},
    jobs::{JobQueue, WriteJob},
};

/// Fan-out over a replica set.
///
/// Every write is dispatched to all replicas; the caller sees success as
/// soon as one replica took it, and each failed replica (short of
/// backpressure) turns into a retryable [`WriteJob`]. All retried
/// operations are idempotent: appends only land on existing timelines,
/// removals take every occurrence, inserts skip absent pivots, and
/// deletes are deletes. Reads go to a single replica, chosen
/// weight-proportionally among the available ones, falling through on
/// error until the set is exhausted.
pub struct ReplicatingShard {
    replicas: Vec<Arc<ReplicaShard>>,
    jobs: Arc<dyn JobQueue>,
}

impl ReplicatingShard {
    /// # Panics
    ///
    /// Panics when `replicas` is empty.
    #[must_use]
    pub fn new(replicas: Vec<Arc<ReplicaShard>>, jobs: Arc<dyn JobQueue>) -> Self {
        assert!(!replicas.is_empty(), "a shard needs at least one replica");
        Self { replicas, jobs }
    }

    #[must_use]
    pub fn replicas(&self) -> &[Arc<ReplicaShard>] {
        &self.replicas
    }

    pub async fn close(&self) {
        for replica in &self.replicas {
            replica.close().await;
        }
    }

    /// Settle a fan-out: success iff at least one replica succeeded, the
    /// last error otherwise. Retryable failures are enqueued through
    /// `job` (when the operation has a retry form).
    fn settle(
        &self,
        results: Vec<(&str, Result<()>)>,
        job: impl Fn(&str) -> Option<WriteJob>,
    ) -> Result<()> {
        let mut succeeded = false;
        let mut last_error = None;
        for (replica, result) in results {
            match result {
                Ok(()) => succeeded = true,
                Err(err) => {
                    warn!(replica, error = %err, "replica write failed");
                    if err.is_retryable() {
                        if let Some(job) = job(replica) {
                            self.jobs.enqueue(job);
                        }
                    }
                    last_error = Some(err);
                }
            }
        }
        if succeeded {
            Ok(())
        } else {
            Err(last_error.unwrap_or(Error::HostDown))
        }
    }

    /// The order in which to try replicas for one read: a
    /// weight-proportional random permutation of the available ones.
    async fn read_plan(&self) -> Result<Vec<Arc<ReplicaShard>>> {
        let mut candidates = Vec::with_capacity(self.replicas.len());
        for replica in &self.replicas {
            if replica.is_available().await {
                candidates.push(Arc::clone(replica));
            }
        }
        if candidates.is_empty() {
            return Err(Error::HostDown);
        }

        let mut plan = Vec::with_capacity(candidates.len());
        while !candidates.is_empty() {
            let picked = pick_weighted(&candidates);
            plan.push(candidates.swap_remove(picked));
        }
        Ok(plan)
    }
}

/// Index of a weight-proportional random pick.
fn pick_weighted(candidates: &[Arc<ReplicaShard>]) -> usize {
    let total: u64 = candidates
        .iter()
        .map(|replica| u64::from(replica.weight().max(1)))
        .sum();
    let mut roll = rand::thread_rng().gen_range(0..total);
    for (index, replica) in candidates.iter().enumerate() {
        let weight = u64::from(replica.weight().max(1));
        if roll < weight {
            return index;
        }
        roll -= weight;
    }
    candidates.len() - 1
}

#[async_trait]
impl Timelines for ReplicatingShard {
    async fn push(&self, timeline: &str, entry: Entry) -> Result<()> {
        let results = join_all(self.replicas.iter().map(|replica| {
            let entry = entry.clone();
            async move { (replica.label(), replica.push(timeline, entry).await) }
        }))
        .await;
        self.settle(results, |replica| {
            Some(WriteJob::push(replica, timeline, &entry))
        })
    }

    async fn pop(&self, timeline: &str, entry: Entry) -> Result<()> {
        let results = join_all(self.replicas.iter().map(|replica| {
            let entry = entry.clone();
            async move { (replica.label(), replica.pop(timeline, entry).await) }
        }))
        .await;
        self.settle(results, |replica| {
            Some(WriteJob::pop(replica, timeline, &entry))
        })
    }

    async fn push_after(&self, timeline: &str, after: Entry, entry: Entry) -> Result<()> {
        let results = join_all(self.replicas.iter().map(|replica| {
            let after = after.clone();
            let entry = entry.clone();
            async move {
                (
                    replica.label(),
                    replica.push_after(timeline, after, entry).await,
                )
            }
        }))
        .await;
        self.settle(results, |replica| {
            Some(WriteJob::push_after(replica, timeline, &after, &entry))
        })
    }

    async fn get(&self, timeline: &str, offset: usize, length: isize) -> Result<Vec<Entry>> {
        let mut last_error = None;
        for replica in self.read_plan().await? {
            match replica.get(timeline, offset, length).await {
                Ok(entries) => return Ok(entries),
                Err(err) => {
                    warn!(replica = replica.label(), error = %err, "read failed, trying next replica");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or(Error::HostDown))
    }

    async fn size(&self, timeline: &str) -> Result<usize> {
        let mut last_error = None;
        for replica in self.read_plan().await? {
            match replica.size(timeline).await {
                Ok(size) => return Ok(size),
                Err(err) => {
                    warn!(replica = replica.label(), error = %err, "read failed, trying next replica");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or(Error::HostDown))
    }

    async fn delete(&self, timeline: &str) -> Result<()> {
        let results = join_all(
            self.replicas
                .iter()
                .map(|replica| async move { (replica.label(), replica.delete(timeline).await) }),
        )
        .await;
        self.settle(results, |replica| Some(WriteJob::delete(replica, timeline)))
    }

    async fn trim(&self, timeline: &str, keep: usize) -> Result<()> {
        let results = join_all(
            self.replicas
                .iter()
                .map(|replica| async move { (replica.label(), replica.trim(timeline, keep).await) }),
        )
        .await;
        // Fire and forget all the way down; a replica that missed the
        // trim converges on the next bound crossing.
        if let Err(err) = self.settle(results, |_| None) {
            warn!(timeline, error = %err, "trim failed on every replica");
        }
        Ok(())
    }

    /// Retries of bulk replaces and live copies belong to the copy
    /// drivers, so fan-out failures here produce no write jobs.
    async fn set_atomically(&self, timeline: &str, entries: &[Entry]) -> Result<()> {
        let results = join_all(self.replicas.iter().map(|replica| async move {
            (
                replica.label(),
                replica.set_atomically(timeline, entries).await,
            )
        }))
        .await;
        self.settle(results, |_| None)
    }

    async fn set_live_start(&self, timeline: &str) -> Result<()> {
        let results = join_all(self.replicas.iter().map(|replica| async move {
            (replica.label(), replica.set_live_start(timeline).await)
        }))
        .await;
        self.settle(results, |_| None)
    }

    async fn set_live(&self, timeline: &str, entries: &[Entry]) -> Result<()> {
        let results = join_all(self.replicas.iter().map(|replica| async move {
            (replica.label(), replica.set_live(timeline, entries).await)
        }))
        .await;
        self.settle(results, |_| None)
    }

    async fn make_key_list(&self) -> Result<usize> {
        let results = join_all(
            self.replicas
                .iter()
                .map(|replica| async move { (replica.label(), replica.make_key_list().await) }),
        )
        .await;

        let mut best = None;
        let mut last_error = None;
        for (replica, result) in results {
            match result {
                Ok(count) => best = Some(best.map_or(count, |known: usize| known.max(count))),
                Err(err) => {
                    warn!(replica, error = %err, "key-list refresh failed");
                    last_error = Some(err);
                }
            }
        }
        best.ok_or_else(|| last_error.unwrap_or(Error::HostDown))
    }

    async fn get_keys(&self, offset: usize, count: usize) -> Result<Vec<String>> {
        let mut last_error = None;
        for replica in self.read_plan().await? {
            match replica.get_keys(offset, count).await {
                Ok(keys) => return Ok(keys),
                Err(err) => {
                    warn!(replica = replica.label(), error = %err, "read failed, trying next replica");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or(Error::HostDown))
    }

    async fn delete_key_list(&self) -> Result<()> {
        let results = join_all(self.replicas.iter().map(|replica| async move {
            (replica.label(), replica.delete_key_list().await)
        }))
        .await;
        self.settle(results, |_| None)
    }
}
