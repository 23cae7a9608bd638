use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::Timelines;
use crate::{
    client::ReplicaClient,
    entry::Entry,
    errors::{Error, Result},
    net::Connector,
    policy::{PoolPolicy, StorePolicy, TrimConfig},
    pool::ClientPool,
};

/// One logical timeline store at one replica host.
///
/// Reads route through the read pool and writes through the write pool,
/// so a read-heavy workload cannot starve the write path of a client (and
/// the other way around). Writes that report a length past the upper trim
/// bound schedule a best-effort trim on the same client before the number
/// is discarded.
pub struct ReplicaShard {
    label: String,
    weight: u32,
    policy: StorePolicy,
    trim: TrimConfig,
    read_pool: ClientPool,
    write_pool: ClientPool,
}

impl ReplicaShard {
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        policy: StorePolicy,
        pool_policy: PoolPolicy,
        trim: TrimConfig,
        weight: u32,
    ) -> Self {
        Self {
            label: connector.label().to_owned(),
            weight,
            read_pool: ClientPool::new(Arc::clone(&connector), policy.clone(), pool_policy.clone()),
            write_pool: ClientPool::new(connector, policy.clone(), pool_policy),
            policy,
            trim,
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Read-selection weight within a replica set.
    #[must_use]
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Whether the read side of this replica accepts checkouts.
    pub async fn is_available(&self) -> bool {
        !self.read_pool.is_disabled().await
    }

    pub async fn close(&self) {
        self.read_pool.close().await;
        self.write_pool.close().await;
    }

    /// Settle a length-returning write: trigger a trim when the timeline
    /// grew past its upper bound, then drop the number.
    fn settle_length(&self, client: &ReplicaClient, timeline: &str, length: i64) {
        let bounds = self.trim.bounds_for(timeline);
        if length > bounds.upper as i64 {
            debug!(
                timeline,
                length,
                lower = bounds.lower,
                "timeline crossed its upper bound, trimming",
            );
            // Trims are fire and forget; a failed submission must not fail
            // the write that triggered it.
            if let Err(err) = client.trim(timeline, bounds.lower) {
                warn!(timeline, error = %err, "trim submission failed");
            }
        }
    }
}

#[async_trait]
impl Timelines for ReplicaShard {
    async fn push(&self, timeline: &str, entry: Entry) -> Result<()> {
        let client = self.write_pool.checkout().await?;
        let length = client
            .push(timeline, entry)?
            .wait(self.policy.call_timeout)
            .await?
            .into_integer()
            .map_err(Error::from)?;
        self.settle_length(&client, timeline, length);
        Ok(())
    }

    async fn pop(&self, timeline: &str, entry: Entry) -> Result<()> {
        let client = self.write_pool.checkout().await?;
        client
            .pop(timeline, entry)?
            .wait(self.policy.call_timeout)
            .await?;
        Ok(())
    }

    async fn push_after(&self, timeline: &str, after: Entry, entry: Entry) -> Result<()> {
        let client = self.write_pool.checkout().await?;
        let length = client
            .push_after(timeline, after, entry)?
            .wait(self.policy.call_timeout)
            .await?
            .into_integer()
            .map_err(Error::from)?;
        // -1 means the pivot was already trimmed away and nothing was
        // inserted.
        self.settle_length(&client, timeline, length);
        Ok(())
    }

    async fn get(&self, timeline: &str, offset: usize, length: isize) -> Result<Vec<Entry>> {
        self.read_pool
            .checkout()
            .await?
            .get(timeline, offset, length)
            .await
    }

    async fn size(&self, timeline: &str) -> Result<usize> {
        self.read_pool.checkout().await?.size(timeline).await
    }

    async fn delete(&self, timeline: &str) -> Result<()> {
        self.write_pool.checkout().await?.delete(timeline).await
    }

    async fn trim(&self, timeline: &str, keep: usize) -> Result<()> {
        self.write_pool.checkout().await?.trim(timeline, keep)
    }

    async fn set_atomically(&self, timeline: &str, entries: &[Entry]) -> Result<()> {
        self.write_pool
            .checkout()
            .await?
            .set_atomically(timeline, entries)
            .await
    }

    async fn set_live_start(&self, timeline: &str) -> Result<()> {
        self.write_pool
            .checkout()
            .await?
            .set_live_start(timeline)
            .await
    }

    async fn set_live(&self, timeline: &str, entries: &[Entry]) -> Result<()> {
        self.write_pool
            .checkout()
            .await?
            .set_live(timeline, entries)
            .await
    }

    async fn make_key_list(&self) -> Result<usize> {
        self.write_pool.checkout().await?.make_key_list().await
    }

    async fn get_keys(&self, offset: usize, count: usize) -> Result<Vec<String>> {
        self.read_pool
            .checkout()
            .await?
            .get_keys(offset, count)
            .await
    }

    async fn delete_key_list(&self) -> Result<()> {
        self.write_pool.checkout().await?.delete_key_list().await
    }
}
