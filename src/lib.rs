#![forbid(unsafe_code)]
#![warn(
    rust_2018_idioms,
    clippy::all,
    clippy::pedantic,
    clippy::clone_on_ref_ptr,
    clippy::get_unwrap,
    clippy::mem_forget,
    clippy::self_named_module_files,
    clippy::str_to_string,
    clippy::wildcard_imports,
    clippy::string_add,
    clippy::try_err,
    clippy::unreachable
)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::similar_names
)]

//! A sharded, replicated timeline store backed by Redis-like in-memory list
//! stores.
//!
//! For each named timeline (a per-user home feed, a mentions list, or
//! similar) the store maintains an ordered, bounded sequence of opaque byte
//! entries, newest at the tail. Writes fan out to every replica of a
//! timeline; reads return a windowed, newest-first slice from a single
//! replica.
//!
//! The heart of the crate is [`ReplicaClient`]: a single-connection
//! pipelining engine that multiplexes many concurrent calls onto one store
//! connection while enforcing batching, backpressure, per-call timeouts,
//! and an error-rate liveness signal. On top of it sit [`ClientPool`] (per
//! host, with auto-disable on error storms), [`ReplicaShard`] (one logical
//! timeline store at one replica) and [`ReplicatingShard`] (write fan-out
//! with idempotent retries, atomic bulk replace, and the live-copy
//! protocol). Both shard flavors expose the same [`Timelines`] capability
//! trait.
//!
//! # Examples
//!
//! Running against the in-memory development store:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use riptide::{
//!     net::{MemoryConnector, MemoryStore},
//!     policy::{PoolPolicy, StorePolicy, TrimConfig},
//!     Entry, ReplicaShard, Timelines,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let store = MemoryStore::new();
//!     let shard = ReplicaShard::new(
//!         Arc::new(MemoryConnector::new("dev", store)),
//!         StorePolicy::default(),
//!         PoolPolicy::default(),
//!         TrimConfig::default(),
//!         1,
//!     );
//!
//!     let entries = [Entry::from("newest"), Entry::from("oldest")];
//!     shard.set_atomically("home:42", &entries).await.unwrap();
//!     shard.push("home:42", Entry::from("fresh")).await.unwrap();
//!
//!     let got = shard.get("home:42", 0, 10).await.unwrap();
//!     assert_eq!(got[0], Entry::from("fresh"));
//!     shard.close().await;
//! }
//! ```

pub use entry::{Entry, KEY_LIST};
pub use errors::{Error, Result};
pub use pool::ClientPool;
pub use shard::{ReplicaShard, ReplicatingShard, Timelines};

pub use crate::client::{Pending, ReplicaClient};

pub mod client;
pub mod commands;
mod entry;
pub mod errors;
pub mod jobs;
pub mod net;
pub mod policy;
pub mod pool;
pub mod shard;
