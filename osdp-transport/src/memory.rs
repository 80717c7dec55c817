//! In-memory transport
//!
//! Two connected ends of a `tokio::io::duplex` pipe. Used to run a control
//! panel against a peripheral in one process.

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, trace};

use crate::{Transport, error::*};

const PIPE_CAPACITY: usize = 4096;

/// One end of an in-memory link
pub struct MemoryTransport {
    name: String,
    stream: Option<DuplexStream>,
    open: bool,
}

impl MemoryTransport {
    /// Create both ends of a link
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (Self, Self) {
        let (left, right) = tokio::io::duplex(PIPE_CAPACITY);
        (Self::new(a.into(), left), Self::new(b.into(), right))
    }

    fn new(name: String, stream: DuplexStream) -> Self {
        Self {
            name,
            stream: Some(stream),
            open: false,
        }
    }

    fn stream(&mut self) -> Result<&mut DuplexStream> {
        if !self.open {
            return Err(Error::NotOpen);
        }
        self.stream.as_mut().ok_or(Error::NotOpen)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&mut self) -> Result<()> {
        if self.open {
            return Err(Error::AlreadyOpen);
        }
        if self.stream.is_none() {
            return Err(Error::ConnectionClosed);
        }

        debug!(name = %self.name, "Memory transport opened");
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        if let Some(mut stream) = self.stream.take() {
            debug!(name = %self.name, "Memory transport closed");
            let _ = stream.shutdown().await;
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open && self.stream.is_some()
    }

    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = self.stream()?.read_buf(buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        trace!(name = %self.name, "Received {} bytes", n);
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        stream.write_all(data).await?;
        stream.flush().await?;

        trace!(name = %self.name, "Sent {} bytes", data.len());
        Ok(())
    }

    fn name(&self) -> String {
        format!("memory://{}", self.name)
    }
}
