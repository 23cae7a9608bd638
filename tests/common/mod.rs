#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use once_cell::sync::Lazy;
use riptide::{
    jobs::{JobPolicy, JobQueue, MemoryJobQueue},
    net::{MemoryConnector, MemoryStore},
    policy::{PoolPolicy, StorePolicy, TrimConfig},
    Entry, ReplicaShard, ReplicatingShard,
};

pub fn init_logger() {
    static LOGGER: Lazy<()> = Lazy::new(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
    Lazy::force(&LOGGER);
}

pub fn entry(data: &str) -> Entry {
    Entry::from(data)
}

/// Store policy tuned for tests: flush almost immediately, but leave the
/// call deadline generous so slow CI machines do not flake.
pub fn fast_policy() -> StorePolicy {
    StorePolicy {
        batch_timeout: Duration::from_millis(1),
        call_timeout: Duration::from_millis(500),
        ..StorePolicy::default()
    }
}

pub fn shard_on(store: &MemoryStore, label: &str, trim: TrimConfig) -> ReplicaShard {
    shard_with(store, label, trim, PoolPolicy::default())
}

pub fn shard_with(
    store: &MemoryStore,
    label: &str,
    trim: TrimConfig,
    pool_policy: PoolPolicy,
) -> ReplicaShard {
    ReplicaShard::new(
        Arc::new(MemoryConnector::new(label, store.clone())),
        fast_policy(),
        pool_policy,
        trim,
        1,
    )
}

/// A replicating shard over one memory store per replica, plus its write
/// job queue.
pub fn replicating(stores: &[MemoryStore]) -> (ReplicatingShard, Arc<MemoryJobQueue>) {
    let jobs = Arc::new(MemoryJobQueue::new("write", JobPolicy::writes()));
    let replicas = stores
        .iter()
        .enumerate()
        .map(|(index, store)| {
            Arc::new(shard_on(
                store,
                &format!("replica-{index}"),
                TrimConfig::default(),
            ))
        })
        .collect();
    let shard = ReplicatingShard::new(replicas, Arc::clone(&jobs) as Arc<dyn JobQueue>);
    (shard, jobs)
}
