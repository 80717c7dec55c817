//! Status and error codes reported by peripheral devices

use std::fmt;

/// Reason code carried by a `NAK` reply
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NakErrorCode {
    NoError,
    /// CRC or checksum of the command was wrong
    BadChecksumOrCrc,
    InvalidCommandLength,
    UnknownCommandCode,
    UnexpectedSequenceNumber,
    /// Security block type not supported or security conditions not met
    UnsupportedSecurityBlock,
    /// Command needs an encrypted channel
    EncryptionRequired,
    BioTypeNotSupported,
    BioFormatNotSupported,
    UnableToProcessCommand,
    Unknown(u8),
}

impl NakErrorCode {
    /// Whether this NAK means the secure channel has to be set up again
    pub fn is_security_failure(self) -> bool {
        matches!(self, Self::UnsupportedSecurityBlock | Self::EncryptionRequired)
    }
}

impl From<u8> for NakErrorCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::NoError,
            0x01 => Self::BadChecksumOrCrc,
            0x02 => Self::InvalidCommandLength,
            0x03 => Self::UnknownCommandCode,
            0x04 => Self::UnexpectedSequenceNumber,
            0x05 => Self::UnsupportedSecurityBlock,
            0x06 => Self::EncryptionRequired,
            0x07 => Self::BioTypeNotSupported,
            0x08 => Self::BioFormatNotSupported,
            0x09 => Self::UnableToProcessCommand,
            other => Self::Unknown(other),
        }
    }
}

impl From<NakErrorCode> for u8 {
    fn from(code: NakErrorCode) -> u8 {
        match code {
            NakErrorCode::NoError => 0x00,
            NakErrorCode::BadChecksumOrCrc => 0x01,
            NakErrorCode::InvalidCommandLength => 0x02,
            NakErrorCode::UnknownCommandCode => 0x03,
            NakErrorCode::UnexpectedSequenceNumber => 0x04,
            NakErrorCode::UnsupportedSecurityBlock => 0x05,
            NakErrorCode::EncryptionRequired => 0x06,
            NakErrorCode::BioTypeNotSupported => 0x07,
            NakErrorCode::BioFormatNotSupported => 0x08,
            NakErrorCode::UnableToProcessCommand => 0x09,
            NakErrorCode::Unknown(value) => value,
        }
    }
}

impl fmt::Display for NakErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(value) => write!(f, "Unknown(0x{:02X})", value),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

/// Tamper state of a reader as reported by `RSTATR`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ReaderTamperStatus {
    Normal,
    NotConnected,
    Tamper,
    Unknown(u8),
}

impl From<u8> for ReaderTamperStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Normal,
            1 => Self::NotConnected,
            2 => Self::Tamper,
            other => Self::Unknown(other),
        }
    }
}

impl From<ReaderTamperStatus> for u8 {
    fn from(status: ReaderTamperStatus) -> u8 {
        match status {
            ReaderTamperStatus::Normal => 0,
            ReaderTamperStatus::NotConnected => 1,
            ReaderTamperStatus::Tamper => 2,
            ReaderTamperStatus::Unknown(value) => value,
        }
    }
}

/// Status detail of a `FTSTAT` reply
///
/// Positive values report progress, negative values abort the transfer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FileTransferStatusCode {
    OkToProceed,
    FileContentsProcessed,
    RebootingNow,
    FinishingFileTransfer,
    Abort,
    UnrecognizedFileContents,
    FileDataUnacceptable,
    Unknown(i16),
}

impl FileTransferStatusCode {
    /// The PD will not accept more fragments
    pub fn is_failure(self) -> bool {
        match self {
            Self::Abort | Self::UnrecognizedFileContents | Self::FileDataUnacceptable => true,
            Self::Unknown(value) => value < 0,
            _ => false,
        }
    }

    /// The PD accepted the whole file
    pub fn is_complete(self) -> bool {
        matches!(self, Self::FileContentsProcessed | Self::RebootingNow)
    }
}

impl From<i16> for FileTransferStatusCode {
    fn from(value: i16) -> Self {
        match value {
            0 => Self::OkToProceed,
            1 => Self::FileContentsProcessed,
            2 => Self::RebootingNow,
            3 => Self::FinishingFileTransfer,
            -1 => Self::Abort,
            -2 => Self::UnrecognizedFileContents,
            -3 => Self::FileDataUnacceptable,
            other => Self::Unknown(other),
        }
    }
}

impl From<FileTransferStatusCode> for i16 {
    fn from(code: FileTransferStatusCode) -> i16 {
        match code {
            FileTransferStatusCode::OkToProceed => 0,
            FileTransferStatusCode::FileContentsProcessed => 1,
            FileTransferStatusCode::RebootingNow => 2,
            FileTransferStatusCode::FinishingFileTransfer => 3,
            FileTransferStatusCode::Abort => -1,
            FileTransferStatusCode::UnrecognizedFileContents => -2,
            FileTransferStatusCode::FileDataUnacceptable => -3,
            FileTransferStatusCode::Unknown(value) => value,
        }
    }
}
