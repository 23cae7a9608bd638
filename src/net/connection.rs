use async_trait::async_trait;
use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

use super::{Connector, Host, NetError, Result, StoreConnection};
use crate::{
    commands::{Command, CommandError, Reply},
    policy::StorePolicy,
};

/// A TCP connection speaking the list-store protocol.
///
/// Writes are buffered until [`StoreConnection::flush`] so a batch of
/// commands goes out in one burst; reads accumulate into a growable buffer
/// from which complete reply frames are cut. A read cancelled by a timeout
/// leaves any partial frame in the buffer for the next attempt.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl TcpConnection {
    pub async fn open(host: &Host, policy: &StorePolicy) -> Result<Self> {
        let stream = timeout(policy.connect_timeout, TcpStream::connect(host.address()))
            .await
            .map_err(|_| NetError::FailedOpening(host.address()))??;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
        })
    }
}

#[async_trait]
impl StoreConnection for TcpConnection {
    async fn send(&mut self, cmd: &Command) -> Result<(), CommandError> {
        cmd.encode(&mut self.write_buf);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), CommandError> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let data = self.write_buf.split();
        self.stream.write_all(&data).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Reply, CommandError> {
        loop {
            if let Some(reply) = Reply::decode(&mut self.read_buf)? {
                return Ok(reply);
            }
            let read = self.stream.read_buf(&mut self.read_buf).await?;
            if read == 0 {
                return Err(CommandError::Protocol(
                    "connection closed by store".to_owned(),
                ));
            }
        }
    }

    async fn close(&mut self) {
        // Best effort QUIT so the store drops the session cleanly.
        self.write_buf.clear();
        Command::Quit.encode(&mut self.write_buf);
        let data = self.write_buf.split();
        let _write = self.stream.write_all(&data).await;
        let _shutdown = self.stream.shutdown().await;
    }
}

/// Connects to one replica host over TCP.
#[derive(Debug)]
pub struct TcpConnector {
    host: Host,
    policy: StorePolicy,
    label: String,
}

impl TcpConnector {
    #[must_use]
    pub fn new(host: Host, policy: StorePolicy) -> Self {
        let label = host.address();
        Self {
            host,
            policy,
            label,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>> {
        Ok(Box::new(TcpConnection::open(&self.host, &self.policy).await?))
    }

    fn label(&self) -> &str {
        &self.label
    }
}
