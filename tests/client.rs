//! Behavior of the pipelined replica client itself.

use std::time::Duration;

use riptide::{
    commands::Reply,
    errors::Error,
    net::{MemoryConnector, MemoryStore},
    policy::StorePolicy,
    ReplicaClient,
};

mod common;

async fn client_on(store: &MemoryStore, policy: StorePolicy) -> ReplicaClient {
    ReplicaClient::connect(
        &MemoryConnector::new("client", store.clone()),
        policy,
        usize::MAX,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn responses_are_delivered_in_submission_order() {
    common::init_logger();

    let store = MemoryStore::new();
    let client = client_on(&store, common::fast_policy()).await;

    client
        .set_atomically("t", &[common::entry("e1")])
        .await
        .unwrap();

    let first = client.push("t", common::entry("e2")).unwrap();
    let second = client.push("t", common::entry("e3")).unwrap();

    // The reported lengths prove the wire order matched submission order.
    let deadline = Duration::from_secs(1);
    assert_eq!(first.wait(deadline).await.unwrap(), Reply::Integer(2));
    assert_eq!(second.wait(deadline).await.unwrap(), Reply::Integer(3));
    client.shutdown().await;
}

#[tokio::test]
async fn submissions_past_the_pipeline_limit_are_rejected() {
    common::init_logger();

    let store = MemoryStore::new();
    // A batch that never flushes on its own, so submissions pile up.
    let client = client_on(
        &store,
        StorePolicy {
            pipeline_max_size: 2,
            batch_timeout: Duration::from_secs(60),
            ..StorePolicy::default()
        },
    )
    .await;

    let first = client.push("t", common::entry("e1")).unwrap();
    let second = client.push("t", common::entry("e2")).unwrap();
    let err = client.push("t", common::entry("e3")).unwrap_err();
    assert!(matches!(err, Error::Overloaded), "got {err:?}");
    assert_eq!(client.inflight(), 2);

    // Shutdown still flushes and delivers what was accepted.
    client.shutdown().await;
    let deadline = Duration::from_secs(1);
    assert_eq!(first.wait(deadline).await.unwrap(), Reply::Integer(0));
    assert_eq!(second.wait(deadline).await.unwrap(), Reply::Integer(0));
    assert_eq!(client.inflight(), 0);

    let err = client.push("t", common::entry("e4")).unwrap_err();
    assert!(matches!(err, Error::Closed), "got {err:?}");
}

#[tokio::test]
async fn caller_timeouts_are_counted() {
    common::init_logger();

    let store = MemoryStore::new();
    let client = client_on(
        &store,
        StorePolicy {
            batch_timeout: Duration::from_secs(60),
            ..StorePolicy::default()
        },
    )
    .await;

    let pending = client.push("t", common::entry("e1")).unwrap();
    let err = pending.wait(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, Error::CallTimeout), "got {err:?}");
    assert_eq!(client.timeout_count(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn pipelined_pushes_converge_to_the_lower_bound() {
    common::init_logger();

    let store = MemoryStore::new();
    let client = client_on(&store, common::fast_policy()).await;
    let (lower, upper) = (3, 5);

    client
        .set_atomically("home:7", &[common::entry("e1")])
        .await
        .unwrap();

    // Concurrent writers: every push is on the wire before any reply is
    // looked at, so both bound crossings trim after the fact.
    let pendings: Vec<_> = ["e2", "e3", "e4", "e5", "e6", "e7"]
        .into_iter()
        .map(|name| client.push("home:7", common::entry(name)).unwrap())
        .collect();

    for pending in pendings {
        let length = pending
            .wait(Duration::from_secs(1))
            .await
            .unwrap()
            .into_integer()
            .unwrap();
        if length > upper {
            client.trim("home:7", lower as usize).unwrap();
        }
    }

    assert_eq!(client.size("home:7").await.unwrap(), 3);
    assert_eq!(
        client.get("home:7", 0, 10).await.unwrap(),
        [common::entry("e7"), common::entry("e6"), common::entry("e5")]
    );
    client.shutdown().await;
}
