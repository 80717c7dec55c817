//! Byte stream transports for OSDP links
//!
//! OSDP normally runs over RS-485; this crate puts the link behind the
//! [`Transport`] trait so the protocol engine can run over TCP (serial
//! servers, test rigs) or an in-memory pipe.

pub mod error;
pub mod memory;
pub mod tcp;

pub use error::{Error, Result};
pub use memory::MemoryTransport;
pub use tcp::{TcpListenerTransport, TcpTransport};

use async_trait::async_trait;
use bytes::BytesMut;

/// Nominal link speed reported by transports without a serial line
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// A full duplex byte stream to one OSDP link
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the link
    async fn open(&mut self) -> Result<()>;

    /// Close the link; closing a closed link is a no-op
    async fn close(&mut self) -> Result<()>;

    /// Check if open
    fn is_open(&self) -> bool;

    /// Append whatever bytes are available to `buf`, waiting for at least one
    ///
    /// Cancel safe: if the future is dropped no bytes are lost.
    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize>;

    /// Write all of `data`
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Line speed, used to size reply timeouts
    fn baud_rate(&self) -> u32 {
        DEFAULT_BAUD_RATE
    }

    /// Human readable name for logs
    fn name(&self) -> String;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn open(&mut self) -> Result<()> {
        (**self).open().await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize> {
        (**self).read(buf).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data).await
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}
