//! Policy types encapsulate the tunable parameters of clients, pools, and
//! the per-timeline trim bounds. All policies are immutable after
//! construction; clients capture them when they are built.

use std::{collections::HashMap, time::Duration};

use serde::Deserialize;

/// Parameters for a single pipelined replica client and its connection.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StorePolicy {
    /// Number of pending calls coalesced before a batch is force-submitted
    /// to the connection.
    pub batch_size: usize,
    /// Maximum age of the oldest pending call before the batch is
    /// force-submitted regardless of its size.
    pub batch_timeout: Duration,
    /// Per-call wait for a response. This is a polling granularity rather
    /// than a strict deadline: the worker re-queues the pipeline head when
    /// the wait elapses and tries again on the next tick.
    pub call_timeout: Duration,
    /// Longer wait applied to key-enumeration calls.
    pub keys_timeout: Duration,
    /// Maximum total inflight calls (staging, batch and pipeline together).
    /// Submissions past this limit fail with `Overloaded`.
    pub pipeline_max_size: usize,
    /// Per-timeline TTL hint handed to the embedding service's eviction
    /// tooling. Timeline contents are volatile and recoverable from the
    /// source of truth, so nothing in this crate acts on it directly.
    pub expiration: Duration,
    /// Bound on establishing the TCP connection to the store.
    pub connect_timeout: Duration,
    /// Idle period after which the worker issues a fire-and-forget PING to
    /// keep the connection from being culled.
    pub heartbeat_interval: Duration,
}

impl StorePolicy {
    /// Default value for the [`Self::batch_size`] parameter.
    pub const DEFAULT_BATCH_SIZE: usize = 100;
    /// Default value for the [`Self::batch_timeout`] parameter.
    pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(10);
    /// Default value for the [`Self::call_timeout`] parameter.
    pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(200);
    /// Default value for the [`Self::connect_timeout`] parameter.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(50);
    /// Default value for the [`Self::expiration`] parameter.
    pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(21 * 24 * 60 * 60);
    /// Default value for the [`Self::heartbeat_interval`] parameter.
    pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(300);
    /// Default value for the [`Self::keys_timeout`] parameter.
    pub const DEFAULT_KEYS_TIMEOUT: Duration = Duration::from_secs(5);
    /// Default value for the [`Self::pipeline_max_size`] parameter.
    pub const DEFAULT_PIPELINE_MAX_SIZE: usize = 200;
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            batch_size: Self::DEFAULT_BATCH_SIZE,
            batch_timeout: Self::DEFAULT_BATCH_TIMEOUT,
            call_timeout: Self::DEFAULT_CALL_TIMEOUT,
            keys_timeout: Self::DEFAULT_KEYS_TIMEOUT,
            pipeline_max_size: Self::DEFAULT_PIPELINE_MAX_SIZE,
            expiration: Self::DEFAULT_EXPIRATION,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Parameters for a per-host pool of replica clients.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PoolPolicy {
    /// Maximum number of clients kept per pool. Read and write pools are
    /// separate instances, so a host typically carries twice this number.
    pub pool_size: usize,
    /// Bound on checking a client out of the pool, including the time to
    /// establish a fresh connection. Exceeding it fails with `PoolTimeout`.
    pub pool_timeout: Duration,
    /// Cumulative store-reported errors after which a client is shut down
    /// and its host disabled.
    pub auto_disable_error_limit: usize,
    /// Cooldown during which a disabled host refuses checkouts with
    /// `HostDown` before a fresh client may be created.
    pub auto_disable_duration: Duration,
}

impl PoolPolicy {
    /// Default value for the [`Self::auto_disable_duration`] parameter.
    pub const DEFAULT_AUTO_DISABLE_DURATION: Duration = Duration::from_secs(60);
    /// Default value for the [`Self::auto_disable_error_limit`] parameter.
    pub const DEFAULT_AUTO_DISABLE_ERROR_LIMIT: usize = 200;
    /// Default value for the [`Self::pool_size`] parameter.
    pub const DEFAULT_POOL_SIZE: usize = 1;
    /// Default value for the [`Self::pool_timeout`] parameter.
    pub const DEFAULT_POOL_TIMEOUT: Duration = Duration::from_secs(1);
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            pool_size: Self::DEFAULT_POOL_SIZE,
            pool_timeout: Self::DEFAULT_POOL_TIMEOUT,
            auto_disable_error_limit: Self::DEFAULT_AUTO_DISABLE_ERROR_LIMIT,
            auto_disable_duration: Self::DEFAULT_AUTO_DISABLE_DURATION,
        }
    }
}

/// Length bounds for one timeline class. Invariant: `0 < lower <= upper`.
///
/// After any write that settles, a timeline holds at most `upper` entries;
/// once `upper` is crossed a trim reduces it to the newest `lower`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub struct TrimBounds {
    pub lower: usize,
    pub upper: usize,
}

impl TrimBounds {
    /// # Panics
    ///
    /// Panics unless `0 < lower <= upper`.
    #[must_use]
    pub fn new(lower: usize, upper: usize) -> Self {
        assert!(lower > 0 && lower <= upper, "invalid trim bounds {lower}/{upper}");
        Self { lower, upper }
    }
}

impl Default for TrimBounds {
    fn default() -> Self {
        Self { lower: 800, upper: 850 }
    }
}

/// Per-timeline-class trim bounds.
///
/// The class of a timeline is the prefix of its name up to the first `:`
/// (`home:42` belongs to class `home`). Unmapped classes fall back to the
/// default bounds.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    pub default_bounds: TrimBounds,
    pub classes: HashMap<String, TrimBounds>,
}

impl TrimConfig {
    #[must_use]
    pub fn new(default_bounds: TrimBounds) -> Self {
        Self {
            default_bounds,
            classes: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>, bounds: TrimBounds) -> Self {
        self.classes.insert(class.into(), bounds);
        self
    }

    #[must_use]
    pub fn bounds_for(&self, timeline: &str) -> TrimBounds {
        let class = timeline.split(':').next().unwrap_or(timeline);
        self.classes
            .get(class)
            .copied()
            .unwrap_or(self.default_bounds)
    }
}
