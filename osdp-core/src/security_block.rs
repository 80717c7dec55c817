//! Security control block of a frame
//!
//! ```text
//! [Len][Type][Data...]
//! ```
//!
//! `Len` counts itself. Handshake blocks carry one data byte, session blocks
//! carry none.

use std::fmt;

use crate::error::{Error, Result};

/// Security block type byte
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SecurityBlockType {
    /// `osdp_CHLNG`
    BeginNewSecureConnectionSequence,
    /// `osdp_CCRYPT`
    SecureConnectionSequenceStep2,
    /// `osdp_SCRYPT`
    SecureConnectionSequenceStep3,
    /// `osdp_RMAC_I`
    SecureConnectionSequenceStep4,
    /// Command with MAC, payload in clear
    CommandMessageWithNoDataSecurity,
    /// Reply with MAC, payload in clear
    ReplyMessageWithNoDataSecurity,
    /// Command with MAC and encrypted payload
    CommandMessageWithDataSecurity,
    /// Reply with MAC and encrypted payload
    ReplyMessageWithDataSecurity,
    Unknown(u8),
}

impl SecurityBlockType {
    /// Session message types: a MAC follows the payload
    pub fn is_session_message(self) -> bool {
        matches!(
            self,
            Self::CommandMessageWithNoDataSecurity
                | Self::ReplyMessageWithNoDataSecurity
                | Self::CommandMessageWithDataSecurity
                | Self::ReplyMessageWithDataSecurity
        )
    }

    /// Payload is encrypted
    pub fn has_data_security(self) -> bool {
        matches!(
            self,
            Self::CommandMessageWithDataSecurity | Self::ReplyMessageWithDataSecurity
        )
    }

    /// One of the four handshake steps
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            Self::BeginNewSecureConnectionSequence
                | Self::SecureConnectionSequenceStep2
                | Self::SecureConnectionSequenceStep3
                | Self::SecureConnectionSequenceStep4
        )
    }
}

impl From<u8> for SecurityBlockType {
    fn from(value: u8) -> Self {
        match value {
            0x11 => Self::BeginNewSecureConnectionSequence,
            0x12 => Self::SecureConnectionSequenceStep2,
            0x13 => Self::SecureConnectionSequenceStep3,
            0x14 => Self::SecureConnectionSequenceStep4,
            0x15 => Self::CommandMessageWithNoDataSecurity,
            0x16 => Self::ReplyMessageWithNoDataSecurity,
            0x17 => Self::CommandMessageWithDataSecurity,
            0x18 => Self::ReplyMessageWithDataSecurity,
            other => Self::Unknown(other),
        }
    }
}

impl From<SecurityBlockType> for u8 {
    fn from(block_type: SecurityBlockType) -> u8 {
        match block_type {
            SecurityBlockType::BeginNewSecureConnectionSequence => 0x11,
            SecurityBlockType::SecureConnectionSequenceStep2 => 0x12,
            SecurityBlockType::SecureConnectionSequenceStep3 => 0x13,
            SecurityBlockType::SecureConnectionSequenceStep4 => 0x14,
            SecurityBlockType::CommandMessageWithNoDataSecurity => 0x15,
            SecurityBlockType::ReplyMessageWithNoDataSecurity => 0x16,
            SecurityBlockType::CommandMessageWithDataSecurity => 0x17,
            SecurityBlockType::ReplyMessageWithDataSecurity => 0x18,
            SecurityBlockType::Unknown(value) => value,
        }
    }
}

impl fmt::Display for SecurityBlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", u8::from(*self))
    }
}

/// Parsed or outgoing security block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityBlock {
    block_type: SecurityBlockType,
    data: Vec<u8>,
}

impl SecurityBlock {
    /// Build the block a payload asks for
    ///
    /// Handshake types carry the key flag: `0x00` for SCBK-D, `0x01` for
    /// SCBK. `RMAC_I` always carries `0x01` (accepted).
    pub fn new(block_type: SecurityBlockType, using_default_key: bool) -> Self {
        let data = match block_type {
            SecurityBlockType::SecureConnectionSequenceStep4 => vec![0x01],
            t if t.is_handshake() => vec![u8::from(!using_default_key)],
            _ => Vec::new(),
        };

        Self { block_type, data }
    }

    /// Block with explicit data bytes
    pub fn with_data(block_type: SecurityBlockType, data: Vec<u8>) -> Self {
        Self { block_type, data }
    }

    /// Decode a block from the start of `bytes`
    ///
    /// # Errors
    ///
    /// Fails when the declared length is below 2 or runs past `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let len = *bytes.first().ok_or_else(|| {
            Error::MalformedSecurityBlock("missing security block length".into())
        })? as usize;

        if len < 2 {
            return Err(Error::MalformedSecurityBlock(format!(
                "length {} too small",
                len
            )));
        }

        if len > bytes.len() {
            return Err(Error::MalformedSecurityBlock(format!(
                "length {} overruns frame ({} bytes left)",
                len,
                bytes.len()
            )));
        }

        Ok(Self {
            block_type: SecurityBlockType::from(bytes[1]),
            data: bytes[2..len].to_vec(),
        })
    }

    pub fn block_type(&self) -> SecurityBlockType {
        self.block_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Encoded size, including the length byte
    pub fn size(&self) -> usize {
        2 + self.data.len()
    }

    /// Whether the sender says it used SCBK-D (handshake blocks only)
    pub fn uses_default_key(&self) -> bool {
        self.block_type.is_handshake() && self.data.first().copied().unwrap_or(0) == 0x00
    }

    pub fn encode(&self, buf: &mut impl bytes::BufMut) {
        buf.put_u8(self.size() as u8);
        buf.put_u8(self.block_type.into());
        buf.put_slice(&self.data);
    }
}
