//! High-level error types

use crate::events::ConnectionId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] osdp_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] osdp_transport::Error),

    #[error("Type error: {0}")]
    Types(#[from] osdp_types::Error),

    /// The link stopped before the request completed
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    #[error("Device {address} not found on connection {connection}")]
    DeviceNotFound {
        connection: ConnectionId,
        address: u8,
    },

    #[error("Device {0} already added")]
    DeviceExists(u8),

    #[error("Device {0} not connected")]
    NotConnected(u8),

    #[error("File transfer failed: {0}")]
    FileTransfer(String),
}

impl Error {
    /// Check if error is recoverable (retry might succeed)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Core(err) => err.is_recoverable(),
            Self::Transport(err) => err.is_recoverable(),
            Self::NotConnected(_) => true,
            _ => false,
        }
    }

    /// Check if the device has to go through connection setup again
    pub fn requires_reconnect(&self) -> bool {
        match self {
            Self::Core(err) => err.requires_reconnect(),
            Self::Transport(_) => true,
            _ => false,
        }
    }
}
