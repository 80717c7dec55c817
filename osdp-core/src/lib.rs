//! # osdp-core
//!
//! Protocol engine for the Open Supervised Device Protocol.
//!
//! This crate provides the transport-agnostic pieces:
//! - Frame parsing and building, CRC-16 and checksum
//! - Control byte and link sequence numbers
//! - Secure channel: key derivation, MAC chain, payload encryption
//! - Command and reply payload codecs
//! - Host and peripheral session state machines
//!
//! Nothing here does I/O; the `osdp` crate drives these types over a
//! transport.

pub mod checksum;
pub mod code;
pub mod constants;
pub mod control;
mod crypto;
pub mod error;
pub mod message;
pub mod payload;
pub mod peripheral;
pub mod reader;
pub mod secure_channel;
pub mod security;
pub mod security_block;
pub mod session;

pub use code::{CommandCode, ReplyCode};
pub use control::{Control, LinkSequence};
pub use error::{Error, Result};
pub use message::{FrameHeader, IncomingMessage, OutgoingMessage};
pub use payload::{Command, PayloadData, Reply};
pub use peripheral::{PeripheralAction, PeripheralSession};
pub use reader::FrameReader;
pub use secure_channel::{MessageDirection, SecureChannel, SharedSecurityContext};
pub use security::SecurityContext;
pub use security_block::{SecurityBlock, SecurityBlockType};
pub use session::{DeviceSession, ReceivedReply, SessionState};

/// Protocol revision the engine implements
pub const PROTOCOL_VERSION: &str = "2.1.7";
