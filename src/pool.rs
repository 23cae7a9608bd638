//! Per-host pools of replica clients.

use std::sync::Arc;

use tokio::{
    sync::Mutex,
    time::{timeout, Instant},
};
use tracing::{debug, warn};

use crate::{
    client::ReplicaClient,
    errors::{Error, Result},
    net::Connector,
    policy::{PoolPolicy, StorePolicy},
};

struct PoolState {
    clients: Vec<Arc<ReplicaClient>>,
    disabled_until: Option<Instant>,
}

struct PoolInner {
    connector: Arc<dyn Connector>,
    store_policy: StorePolicy,
    policy: PoolPolicy,
    state: Mutex<PoolState>,
}

/// Owns up to `pool_size` pipelined clients for one replica host.
///
/// Checkout returns the least-loaded alive client, creating one while
/// under capacity. A client that crossed the auto-disable error limit is
/// shut down and removed, and the host refuses checkouts with `HostDown`
/// for the cooldown window before a fresh client may be built.
pub struct ClientPool(Arc<PoolInner>);

impl ClientPool {
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        store_policy: StorePolicy,
        policy: PoolPolicy,
    ) -> Self {
        Self(Arc::new(PoolInner {
            connector,
            store_policy,
            policy,
            state: Mutex::new(PoolState {
                clients: Vec::new(),
                disabled_until: None,
            }),
        }))
    }

    #[must_use]
    pub fn label(&self) -> &str {
        self.0.connector.label()
    }

    /// Check a client out, bounded by the pool timeout.
    pub async fn checkout(&self) -> Result<Arc<ReplicaClient>> {
        timeout(self.0.policy.pool_timeout, self.acquire())
            .await
            .map_err(|_elapsed| Error::PoolTimeout)?
    }

    /// Whether the host is currently inside its auto-disable window.
    pub async fn is_disabled(&self) -> bool {
        let state = self.0.state.lock().await;
        state
            .disabled_until
            .map_or(false, |until| Instant::now() < until)
    }

    pub async fn close(&self) {
        let mut state = self.0.state.lock().await;
        for client in state.clients.drain(..) {
            client.shutdown().await;
        }
    }

    async fn acquire(&self) -> Result<Arc<ReplicaClient>> {
        let inner = &*self.0;
        let mut state = inner.state.lock().await;

        // Cull clients that died since the last checkout. One that tripped
        // the error limit opens the disable window for the whole host.
        let mut tripped = false;
        let (alive, dead): (Vec<_>, Vec<_>) = state
            .clients
            .drain(..)
            .partition(|client| client.is_alive());
        state.clients = alive;
        for client in dead {
            tripped |= client.tripped();
            client.shutdown().await;
        }
        if tripped {
            warn!(
                host = inner.connector.label(),
                cooldown = ?inner.policy.auto_disable_duration,
                "host disabled after sustained errors",
            );
            state.disabled_until = Some(Instant::now() + inner.policy.auto_disable_duration);
        }

        if let Some(until) = state.disabled_until {
            if Instant::now() < until {
                return Err(Error::HostDown);
            }
            state.disabled_until = None;
        }

        if state.clients.len() < inner.policy.pool_size {
            let client = Arc::new(
                ReplicaClient::connect(
                    &*inner.connector,
                    inner.store_policy.clone(),
                    inner.policy.auto_disable_error_limit,
                )
                .await?,
            );
            debug!(host = inner.connector.label(), "created replica client");
            state.clients.push(Arc::clone(&client));
            return Ok(client);
        }

        state
            .clients
            .iter()
            .min_by_key(|client| client.inflight())
            .map(Arc::clone)
            .ok_or(Error::HostDown)
    }
}

impl Clone for ClientPool {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}
