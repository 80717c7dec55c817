//! OSDP function codes
//!
//! The byte after the header (and security block, if any) selects the
//! command or reply carried by a frame. Values are fixed by the OSDP
//! specification and must stay verbatim for interoperability.

use std::fmt;

use crate::error::{Error, Result};

/// Command function codes (ACU to PD)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    // Status and identification
    Poll = 0x60,
    IdReport = 0x61,
    DeviceCapabilities = 0x62,
    LocalStatus = 0x64,
    InputStatus = 0x65,
    OutputStatus = 0x66,
    ReaderStatus = 0x67,

    // Output and reader control
    OutputControl = 0x68,
    ReaderLedControl = 0x69,
    ReaderBuzzerControl = 0x6A,
    ReaderTextOutput = 0x6B,
    CommunicationSet = 0x6E,

    // Secure channel
    KeySet = 0x75,
    Challenge = 0x76,
    ServerCryptogram = 0x77,

    // Transfers and vendor extensions
    MaxReplySize = 0x7B,
    FileTransfer = 0x7C,
    ManufacturerSpecific = 0x80,
    Abort = 0xA2,
    PivData = 0xA3,
    KeepActive = 0xA7,
}

impl CommandCode {
    /// Get command name
    pub fn name(self) -> &'static str {
        match self {
            Self::Poll => "osdp_POLL",
            Self::IdReport => "osdp_ID",
            Self::DeviceCapabilities => "osdp_CAP",
            Self::LocalStatus => "osdp_LSTAT",
            Self::InputStatus => "osdp_ISTAT",
            Self::OutputStatus => "osdp_OSTAT",
            Self::ReaderStatus => "osdp_RSTAT",
            Self::OutputControl => "osdp_OUT",
            Self::ReaderLedControl => "osdp_LED",
            Self::ReaderBuzzerControl => "osdp_BUZ",
            Self::ReaderTextOutput => "osdp_TEXT",
            Self::CommunicationSet => "osdp_COMSET",
            Self::KeySet => "osdp_KEYSET",
            Self::Challenge => "osdp_CHLNG",
            Self::ServerCryptogram => "osdp_SCRYPT",
            Self::MaxReplySize => "osdp_ACURXSIZE",
            Self::FileTransfer => "osdp_FILETRANSFER",
            Self::ManufacturerSpecific => "osdp_MFG",
            Self::Abort => "osdp_ABORT",
            Self::PivData => "osdp_PIVDATA",
            Self::KeepActive => "osdp_KEEPACTIVE",
        }
    }

    /// Check if this command is a step of the secure channel handshake
    pub fn is_handshake(self) -> bool {
        matches!(self, Self::Challenge | Self::ServerCryptogram)
    }
}

impl From<CommandCode> for u8 {
    fn from(code: CommandCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for CommandCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x60 => Ok(Self::Poll),
            0x61 => Ok(Self::IdReport),
            0x62 => Ok(Self::DeviceCapabilities),
            0x64 => Ok(Self::LocalStatus),
            0x65 => Ok(Self::InputStatus),
            0x66 => Ok(Self::OutputStatus),
            0x67 => Ok(Self::ReaderStatus),
            0x68 => Ok(Self::OutputControl),
            0x69 => Ok(Self::ReaderLedControl),
            0x6A => Ok(Self::ReaderBuzzerControl),
            0x6B => Ok(Self::ReaderTextOutput),
            0x6E => Ok(Self::CommunicationSet),
            0x75 => Ok(Self::KeySet),
            0x76 => Ok(Self::Challenge),
            0x77 => Ok(Self::ServerCryptogram),
            0x7B => Ok(Self::MaxReplySize),
            0x7C => Ok(Self::FileTransfer),
            0x80 => Ok(Self::ManufacturerSpecific),
            0xA2 => Ok(Self::Abort),
            0xA3 => Ok(Self::PivData),
            0xA7 => Ok(Self::KeepActive),
            _ => Err(Error::UnknownCommand(value)),
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), *self as u8)
    }
}

/// Reply function codes (PD to ACU)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReplyCode {
    Ack = 0x40,
    Nak = 0x41,
    PdIdReport = 0x45,
    PdCapabilities = 0x46,
    LocalStatusReport = 0x48,
    InputStatusReport = 0x49,
    OutputStatusReport = 0x4A,
    ReaderStatusReport = 0x4B,
    RawReaderData = 0x50,
    FormattedReaderData = 0x51,
    KeypadData = 0x53,
    CommunicationConfiguration = 0x54,
    ClientCryptogram = 0x76,
    InitialRMac = 0x78,
    Busy = 0x79,
    FileTransferStatus = 0x7A,
    PivData = 0x80,
    ManufacturerSpecific = 0x90,
}

impl ReplyCode {
    /// Get reply name
    pub fn name(self) -> &'static str {
        match self {
            Self::Ack => "osdp_ACK",
            Self::Nak => "osdp_NAK",
            Self::PdIdReport => "osdp_PDID",
            Self::PdCapabilities => "osdp_PDCAP",
            Self::LocalStatusReport => "osdp_LSTATR",
            Self::InputStatusReport => "osdp_ISTATR",
            Self::OutputStatusReport => "osdp_OSTATR",
            Self::ReaderStatusReport => "osdp_RSTATR",
            Self::RawReaderData => "osdp_RAW",
            Self::FormattedReaderData => "osdp_FMT",
            Self::KeypadData => "osdp_KEYPAD",
            Self::CommunicationConfiguration => "osdp_COM",
            Self::ClientCryptogram => "osdp_CCRYPT",
            Self::InitialRMac => "osdp_RMAC_I",
            Self::Busy => "osdp_BUSY",
            Self::FileTransferStatus => "osdp_FTSTAT",
            Self::PivData => "osdp_PIVDATAR",
            Self::ManufacturerSpecific => "osdp_MFGREP",
        }
    }

    /// Check if this reply is a step of the secure channel handshake
    pub fn is_handshake(self) -> bool {
        matches!(self, Self::ClientCryptogram | Self::InitialRMac)
    }
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for ReplyCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x40 => Ok(Self::Ack),
            0x41 => Ok(Self::Nak),
            0x45 => Ok(Self::PdIdReport),
            0x46 => Ok(Self::PdCapabilities),
            0x48 => Ok(Self::LocalStatusReport),
            0x49 => Ok(Self::InputStatusReport),
            0x4A => Ok(Self::OutputStatusReport),
            0x4B => Ok(Self::ReaderStatusReport),
            0x50 => Ok(Self::RawReaderData),
            0x51 => Ok(Self::FormattedReaderData),
            0x53 => Ok(Self::KeypadData),
            0x54 => Ok(Self::CommunicationConfiguration),
            0x76 => Ok(Self::ClientCryptogram),
            0x78 => Ok(Self::InitialRMac),
            0x79 => Ok(Self::Busy),
            0x7A => Ok(Self::FileTransferStatus),
            0x80 => Ok(Self::PivData),
            0x90 => Ok(Self::ManufacturerSpecific),
            _ => Err(Error::UnknownReply(value)),
        }
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.name(), *self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_code_conversion() {
        assert_eq!(u8::from(CommandCode::Poll), 0x60);
        assert_eq!(CommandCode::try_from(0x75).unwrap(), CommandCode::KeySet);
    }

    #[test]
    fn test_reply_code_conversion() {
        assert_eq!(u8::from(ReplyCode::Ack), 0x40);
        assert_eq!(ReplyCode::try_from(0x78).unwrap(), ReplyCode::InitialRMac);
    }

    #[test]
    fn test_every_command_code_round_trips() {
        for raw in 0..=u8::MAX {
            if let Ok(code) = CommandCode::try_from(raw) {
                assert_eq!(u8::from(code), raw);
            }
        }
    }

    #[test]
    fn test_unknown_codes() {
        assert_eq!(CommandCode::try_from(0x63), Err(Error::UnknownCommand(0x63)));
        assert_eq!(ReplyCode::try_from(0x42), Err(Error::UnknownReply(0x42)));
    }

    #[test]
    fn test_handshake_codes() {
        assert!(CommandCode::Challenge.is_handshake());
        assert!(!CommandCode::Poll.is_handshake());
        assert!(ReplyCode::ClientCryptogram.is_handshake());
    }

    #[test]
    fn test_display() {
        assert_eq!(CommandCode::Poll.to_string(), "osdp_POLL(0x60)");
    }
}
