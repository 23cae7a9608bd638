//! Timeline shards.
//!
//! A [`ReplicaShard`] is one logical timeline store at one replica host; a
//! [`ReplicatingShard`] fans writes out across a replica set and picks one
//! replica for reads. Both expose the same [`Timelines`] capability set,
//! so job workers and service handlers are written against the trait and
//! never care how many replicas stand behind it.

pub use self::{replica::ReplicaShard, replicating::ReplicatingShard};

mod replica;
mod replicating;

use async_trait::async_trait;

use crate::{entry::Entry, errors::Result};

/// Operations every timeline store exposes.
///
/// Ordering is newest-first everywhere: `get(t, 0, 1)` is the newest
/// entry, and appends become position 0.
#[async_trait]
pub trait Timelines: Send + Sync {
    /// Append `entry` if `timeline` exists; silently dropped otherwise.
    async fn push(&self, timeline: &str, entry: Entry) -> Result<()>;

    /// Remove every occurrence of `entry`.
    async fn pop(&self, timeline: &str, entry: Entry) -> Result<()>;

    /// Insert `entry` just newer than `after`; skipped when `after` has
    /// already been trimmed away.
    async fn push_after(&self, timeline: &str, after: Entry, entry: Entry) -> Result<()>;

    /// A newest-first window: up to `length` entries starting `offset`
    /// back from the newest; `length <= 0` reads through to the oldest.
    async fn get(&self, timeline: &str, offset: usize, length: isize) -> Result<Vec<Entry>>;

    async fn size(&self, timeline: &str) -> Result<usize>;

    async fn delete(&self, timeline: &str) -> Result<()>;

    /// Best-effort trim to the newest `keep` entries.
    async fn trim(&self, timeline: &str, keep: usize) -> Result<()>;

    /// Atomically replace the timeline with `entries` (newest first).
    async fn set_atomically(&self, timeline: &str, entries: &[Entry]) -> Result<()>;

    /// Start a live copy: reset the timeline to exactly the empty
    /// sentinel so live appends land while the backfill runs.
    async fn set_live_start(&self, timeline: &str) -> Result<()>;

    /// Backfill `entries` (newest first) underneath live traffic.
    async fn set_live(&self, timeline: &str, entries: &[Entry]) -> Result<()>;

    /// Snapshot all timeline names into the reserved key list.
    async fn make_key_list(&self) -> Result<usize>;

    /// Page through the key-list snapshot.
    async fn get_keys(&self, offset: usize, count: usize) -> Result<Vec<String>>;

    async fn delete_key_list(&self) -> Result<()>;
}
