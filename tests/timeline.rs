//! End-to-end timeline behavior over the in-memory store, through the real
//! client, pool, and shard stack.

use std::time::Duration;

use riptide::{
    errors::Error,
    jobs::WriteJob,
    net::MemoryStore,
    policy::{PoolPolicy, TrimBounds, TrimConfig},
    Entry, Timelines,
};

mod common;

#[tokio::test]
async fn append_and_get() {
    common::init_logger();

    let stores = [MemoryStore::new(), MemoryStore::new()];
    let (shard, _jobs) = common::replicating(&stores);

    // Newest first: e3 is the newest entry of the replacement.
    let entries = [common::entry("e3"), common::entry("e2"), common::entry("e1")];
    shard.set_atomically("home:42", &entries).await.unwrap();

    let got = shard.get("home:42", 0, 10).await.unwrap();
    assert_eq!(got, entries);

    // Every replica converged on the same list, oldest to newest.
    for store in &stores {
        assert_eq!(
            store.list("home:42"),
            vec![
                common::entry("e1").into_bytes(),
                common::entry("e2").into_bytes(),
                common::entry("e3").into_bytes(),
            ]
        );
    }
    shard.close().await;
}

#[tokio::test]
async fn insert_before() {
    common::init_logger();

    let stores = [MemoryStore::new(), MemoryStore::new()];
    let (shard, _jobs) = common::replicating(&stores);

    let entries = [common::entry("e3"), common::entry("e2"), common::entry("e1")];
    shard.set_atomically("home:42", &entries).await.unwrap();

    shard
        .push_after("home:42", common::entry("e2"), common::entry("e2b"))
        .await
        .unwrap();

    let got = shard.get("home:42", 0, 10).await.unwrap();
    assert_eq!(
        got,
        [
            common::entry("e3"),
            common::entry("e2b"),
            common::entry("e2"),
            common::entry("e1"),
        ]
    );
    shard.close().await;
}

#[tokio::test]
async fn live_copy() {
    common::init_logger();

    let stores = [MemoryStore::new(), MemoryStore::new()];
    let (shard, _jobs) = common::replicating(&stores);

    // The destination starts as just the sentinel, so live appends land.
    shard.set_live_start("home:99").await.unwrap();
    shard.push("home:99", common::entry("l1")).await.unwrap();
    shard.push("home:99", common::entry("l2")).await.unwrap();

    // Backfill the historical entries underneath the live traffic.
    let history = [common::entry("h1"), common::entry("h2")];
    shard.set_live("home:99", &history).await.unwrap();

    let got = shard.get("home:99", 0, 10).await.unwrap();
    assert_eq!(
        got,
        [
            common::entry("l2"),
            common::entry("l1"),
            Entry::sentinel(),
            common::entry("h1"),
            common::entry("h2"),
        ]
    );
    assert!(got[2].is_sentinel());

    for store in &stores {
        assert_eq!(store.list("home:99"), stores[0].list("home:99"));
    }
    shard.close().await;
}

#[tokio::test]
async fn sequential_pushes_stay_under_the_upper_bound() {
    common::init_logger();

    let store = MemoryStore::new();
    let shard = common::shard_on(
        &store,
        "trimmed",
        TrimConfig::new(TrimBounds::new(3, 5)),
    );

    shard
        .set_atomically("home:7", &[common::entry("e1")])
        .await
        .unwrap();
    for name in ["e2", "e3", "e4", "e5", "e6", "e7"] {
        shard.push("home:7", common::entry(name)).await.unwrap();
    }

    // Crossing the upper bound at e6 trimmed down to the newest three;
    // e7 then appended on top.
    assert_eq!(shard.size("home:7").await.unwrap(), 4);
    let got = shard.get("home:7", 0, 3).await.unwrap();
    assert_eq!(
        got,
        [common::entry("e7"), common::entry("e6"), common::entry("e5")]
    );
    shard.close().await;
}

#[tokio::test]
async fn auto_disable_and_recovery() {
    common::init_logger();

    let store = MemoryStore::new();
    let shard = common::shard_with(
        &store,
        "flaky",
        TrimConfig::default(),
        PoolPolicy {
            auto_disable_error_limit: 3,
            auto_disable_duration: Duration::from_millis(200),
            ..PoolPolicy::default()
        },
    );
    store.fail_all(true);

    // Every call fails on the store; the third one crosses the limit.
    for _ in 0..3 {
        let err = shard.pop("home:1", common::entry("e1")).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)), "got {err:?}");
    }

    // The host is now disabled for the cooldown window.
    let err = shard.pop("home:1", common::entry("e1")).await.unwrap_err();
    assert!(matches!(err, Error::HostDown), "got {err:?}");

    // After the window a fresh client is built and service resumes.
    store.fail_all(false);
    tokio::time::sleep(Duration::from_millis(250)).await;
    shard.pop("home:1", common::entry("e1")).await.unwrap();
    shard.close().await;
}

#[tokio::test]
async fn failed_replica_becomes_a_retry_job() {
    common::init_logger();

    let stores = [MemoryStore::new(), MemoryStore::new()];
    let (shard, jobs) = common::replicating(&stores);

    shard
        .set_atomically("home:7", &[common::entry("e1")])
        .await
        .unwrap();

    // One replica starts failing; writes still succeed through the other.
    stores[1].fail_all(true);
    shard.push("home:7", common::entry("e2")).await.unwrap();

    assert_eq!(
        jobs.pop(),
        Some(WriteJob::push("replica-1", "home:7", &common::entry("e2")))
    );
    assert!(jobs.pop().is_none());

    // Reads fall through the failing replica to a healthy one.
    let got = shard.get("home:7", 0, 10).await.unwrap();
    assert_eq!(got, [common::entry("e2"), common::entry("e1")]);
    shard.close().await;
}

#[tokio::test]
async fn retried_writes_are_idempotent() {
    common::init_logger();

    let store = MemoryStore::new();
    let shard = common::shard_on(&store, "solo", TrimConfig::default());

    // Appends to a deleted timeline are dropped, so replays are no-ops.
    shard.push("ghost", common::entry("e1")).await.unwrap();
    shard.push("ghost", common::entry("e1")).await.unwrap();
    assert_eq!(shard.size("ghost").await.unwrap(), 0);

    let entries = [common::entry("e2"), common::entry("e1")];
    shard.set_atomically("home:3", &entries).await.unwrap();

    // Removals take every occurrence; a second round changes nothing.
    shard.pop("home:3", common::entry("e1")).await.unwrap();
    shard.pop("home:3", common::entry("e1")).await.unwrap();
    assert_eq!(shard.get("home:3", 0, 10).await.unwrap(), [common::entry("e2")]);

    // Inserts against an already-trimmed pivot are skipped.
    shard
        .push_after("home:3", common::entry("e1"), common::entry("e1b"))
        .await
        .unwrap();
    assert_eq!(shard.size("home:3").await.unwrap(), 1);

    shard.delete("home:3").await.unwrap();
    shard.delete("home:3").await.unwrap();
    assert_eq!(shard.size("home:3").await.unwrap(), 0);
    shard.close().await;
}

#[tokio::test]
async fn backfill_without_live_start_is_a_noop() {
    common::init_logger();

    let store = MemoryStore::new();
    let shard = common::shard_on(&store, "solo", TrimConfig::default());

    // The sentinel step never ran, so the prepend must not create the
    // timeline.
    shard
        .set_live("home:5", &[common::entry("h1")])
        .await
        .unwrap();
    assert_eq!(shard.size("home:5").await.unwrap(), 0);
    shard.close().await;
}

#[tokio::test]
async fn key_list_snapshot() {
    common::init_logger();

    let store = MemoryStore::new();
    let shard = common::shard_on(&store, "solo", TrimConfig::default());

    shard
        .set_atomically("home:1", &[common::entry("a")])
        .await
        .unwrap();
    shard
        .set_atomically("mentions:2", &[common::entry("b")])
        .await
        .unwrap();

    assert_eq!(shard.make_key_list().await.unwrap(), 2);
    assert_eq!(
        shard.get_keys(0, 10).await.unwrap(),
        vec!["home:1".to_owned(), "mentions:2".to_owned()]
    );
    assert_eq!(
        shard.get_keys(1, 1).await.unwrap(),
        vec!["mentions:2".to_owned()]
    );

    // Rebuilding replaces the previous snapshot and never lists itself.
    assert_eq!(shard.make_key_list().await.unwrap(), 2);

    shard.delete_key_list().await.unwrap();
    assert!(shard.get_keys(0, 10).await.unwrap().is_empty());
    shard.close().await;
}
