//! Events published by the control panel

use std::fmt;

use chrono::{DateTime, Utc};
use osdp_core::payload::{
    FormattedCardData, KeypadData, LocalStatus, ManufacturerData, Nak, RawCardData, Reply,
};
use osdp_types::ReaderTamperStatus;

/// Identifies one link of a control panel
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something a device reported, or a change in its connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelEvent {
    pub connection_id: ConnectionId,
    pub address: u8,
    pub timestamp: DateTime<Utc>,
    pub kind: PanelEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEventKind {
    ConnectionStatus {
        is_connected: bool,
        is_secure_channel_established: bool,
        is_using_default_key: bool,
    },
    CardRead(RawCardData),
    FormattedCardRead(FormattedCardData),
    KeypadEntry(KeypadData),
    LocalStatus(LocalStatus),
    InputStatus(Vec<bool>),
    OutputStatus(Vec<bool>),
    ReaderStatus(Vec<ReaderTamperStatus>),
    ManufacturerReply(ManufacturerData),
    Nak(Nak),
}

impl PanelEventKind {
    /// Event carried by a reply, if the reply reports anything
    pub fn from_reply(reply: &Reply) -> Option<Self> {
        let kind = match reply {
            Reply::RawReaderData(data) => Self::CardRead(data.clone()),
            Reply::FormattedReaderData(data) => Self::FormattedCardRead(data.clone()),
            Reply::KeypadData(data) => Self::KeypadEntry(data.clone()),
            Reply::LocalStatusReport(status) => Self::LocalStatus(*status),
            Reply::InputStatusReport(states) => Self::InputStatus(states.clone()),
            Reply::OutputStatusReport(states) => Self::OutputStatus(states.clone()),
            Reply::ReaderStatusReport(readers) => Self::ReaderStatus(readers.clone()),
            Reply::ManufacturerSpecific(data) => Self::ManufacturerReply(data.clone()),
            Reply::Nak(nak) => Self::Nak(nak.clone()),
            _ => return None,
        };
        Some(kind)
    }
}

impl PanelEvent {
    pub(crate) fn new(connection_id: ConnectionId, address: u8, kind: PanelEventKind) -> Self {
        Self {
            connection_id,
            address,
            timestamp: Utc::now(),
            kind,
        }
    }
}

impl fmt::Display for PanelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} pd {}: ",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.connection_id,
            self.address
        )?;

        match &self.kind {
            PanelEventKind::ConnectionStatus {
                is_connected,
                is_secure_channel_established,
                is_using_default_key,
            } => write!(
                f,
                "connected={} secure={} default_key={}",
                is_connected, is_secure_channel_established, is_using_default_key
            ),
            PanelEventKind::CardRead(data) => write!(f, "card {}", data),
            PanelEventKind::FormattedCardRead(data) => write!(f, "card {}", data),
            PanelEventKind::KeypadEntry(data) => write!(f, "keypad {}", data),
            PanelEventKind::LocalStatus(status) => write!(f, "local status {}", status),
            PanelEventKind::InputStatus(states) => write!(f, "inputs {:?}", states),
            PanelEventKind::OutputStatus(states) => write!(f, "outputs {:?}", states),
            PanelEventKind::ReaderStatus(readers) => write!(f, "readers {:?}", readers),
            PanelEventKind::ManufacturerReply(data) => {
                write!(f, "manufacturer {}", hex::encode_upper(&data.data))
            }
            PanelEventKind::Nak(nak) => write!(f, "NAK {}", nak),
        }
    }
}
