//! TCP transports
//!
//! [`TcpTransport`] dials out, e.g. to a serial device server in front of an
//! RS-485 bus. [`TcpListenerTransport`] waits for one peer, which lets a
//! peripheral be reached over the network.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::{DEFAULT_BAUD_RATE, Transport, error::*};

async fn read_stream(stream: &mut TcpStream, buf: &mut BytesMut) -> Result<usize> {
    let n = stream.read_buf(buf).await?;
    if n == 0 {
        return Err(Error::ConnectionClosed);
    }

    trace!("Received {} bytes: {:02X?}", n, &buf[buf.len() - n..]);
    Ok(n)
}

async fn write_stream(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
    trace!("Sending {} bytes: {:02X?}", data.len(), data);

    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

/// TCP client transport
pub struct TcpTransport {
    addr: String,
    port: u16,
    socket_addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    baud_rate: u32,
}

impl TcpTransport {
    /// Create new TCP transport
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            socket_addr: None,
            stream: None,
            connect_timeout: Duration::from_secs(5),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Baud rate of the serial line behind the device server
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Resolve address to SocketAddr
    async fn resolve_addr(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.socket_addr {
            return Ok(addr);
        }

        let addr_str = format!("{}:{}", self.addr, self.port);

        let addr = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr_str, e)))?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("No addresses found for {}", addr_str)))?;

        self.socket_addr = Some(addr);
        Ok(addr)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }

        let addr = self.resolve_addr().await?;

        debug!("Connecting to {}...", addr);

        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionTimeout)??;

        // Frames are small and latency bound
        stream.set_nodelay(true)?;

        debug!("Connected to {}", addr);

        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Disconnecting from {}...", self.name());
            let _ = stream.shutdown().await;
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(Error::NotOpen)?;
        read_stream(stream, buf).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(Error::NotOpen)?;
        write_stream(stream, data).await
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn name(&self) -> String {
        self.socket_addr
            .map(|addr| format!("tcp://{}", addr))
            .unwrap_or_else(|| format!("tcp://{}:{}", self.addr, self.port))
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("TCP transport dropped while still open");
        }
    }
}

/// TCP transport that accepts a single peer
pub struct TcpListenerTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    peer: Option<(TcpStream, SocketAddr)>,
}

impl TcpListenerTransport {
    /// Bind the listening socket; [`open`](Transport::open) waits for a peer
    pub async fn bind(addr: impl tokio::net::ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        debug!("Listening on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            peer: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer.as_ref().map(|(_, addr)| *addr)
    }
}

#[async_trait]
impl Transport for TcpListenerTransport {
    async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }

        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;

        debug!("Accepted connection from {}", addr);
        self.peer = Some((stream, addr));
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some((mut stream, addr)) = self.peer.take() {
            debug!("Closing connection from {}", addr);
            let _ = stream.shutdown().await;
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.peer.is_some()
    }

    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let (stream, _) = self.peer.as_mut().ok_or(Error::NotOpen)?;
        read_stream(stream, buf).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let (stream, _) = self.peer.as_mut().ok_or(Error::NotOpen)?;
        write_stream(stream, data).await
    }

    fn name(&self) -> String {
        format!("tcp-listen://{}", self.local_addr)
    }
}
