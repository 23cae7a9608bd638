pub use self::{
    connection::{TcpConnection, TcpConnector},
    host::Host,
    memory::{MemoryConnector, MemoryStore},
};

mod connection;
mod host;
mod memory;

use async_trait::async_trait;

use crate::commands::{Command, CommandError, Reply};

type Result<T, E = NetError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("Could not open connection to `{0}`")]
    FailedOpening(String),
    #[error("I/O related error")]
    Io(#[from] std::io::Error),
}

/// One duplex connection to a store.
///
/// Sends enqueue commands; responses come back in submission order through
/// [`Self::recv`]. A connection is owned by exactly one worker, so none of
/// this needs to be synchronized.
#[async_trait]
pub trait StoreConnection: Send {
    /// Queue one command for submission. Whether bytes hit the wire
    /// immediately is up to the implementation; [`Self::flush`] forces it.
    async fn send(&mut self, cmd: &Command) -> Result<(), CommandError>;

    /// Push buffered commands out.
    async fn flush(&mut self) -> Result<(), CommandError>;

    /// Receive the next reply, FIFO with respect to sends.
    ///
    /// Must be cancel safe: a caller that gives up waiting may call `recv`
    /// again later and still observe every reply exactly once.
    async fn recv(&mut self) -> Result<Reply, CommandError>;

    /// Close the connection, best effort.
    async fn close(&mut self);
}

/// Produces connections for one replica host. The seam between the client
/// pool and the transport, so development setups can swap the TCP store for
/// the in-memory one.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>>;

    /// Human-readable target for logs and job routing.
    fn label(&self) -> &str;
}
