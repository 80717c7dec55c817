//! Error types for osdp-core

use osdp_types::NakErrorCode;

/// Result type alias for osdp-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core protocol errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Frame is too short to be valid
    #[error("Frame too short: expected at least {expected} bytes, got {actual} bytes")]
    FrameTooShort {
        expected: usize,
        actual: usize,
    },

    /// Frame exceeds the largest supported size
    #[error("Frame too large: {size} bytes (max: {max} bytes)")]
    FrameTooLarge {
        size: usize,
        max: usize,
    },

    /// First byte is not the start of message marker
    #[error("Invalid start of message: 0x{0:02X}")]
    InvalidStartOfMessage(u8),

    /// Length field disagrees with the received byte count
    #[error("Length mismatch: header declares {declared} bytes, frame has {actual} bytes")]
    LengthMismatch {
        declared: usize,
        actual: usize,
    },

    /// Security block length runs past the frame
    #[error("Malformed security block: {0}")]
    MalformedSecurityBlock(String),

    /// Unknown command function code
    #[error("Unknown command code: 0x{0:02X}")]
    UnknownCommand(u8),

    /// Unknown reply function code
    #[error("Unknown reply code: 0x{0:02X}")]
    UnknownReply(u8),

    /// Payload length does not fit the function code
    #[error("Invalid payload length for {name}: expected {expected}, got {actual} bytes")]
    InvalidPayloadLength {
        name: &'static str,
        expected: String,
        actual: usize,
    },

    /// Payload content could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Coded field outside its value range
    #[error("Invalid field value: {0}")]
    Types(#[from] osdp_types::Error),

    /// Cryptogram check of the secure channel handshake failed
    #[error("Secure channel authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Operation needs an established secure channel
    #[error("Secure channel not established")]
    SecureChannelNotEstablished,

    /// Received MAC does not match the computed one
    #[error("MAC mismatch on message from address {address}")]
    MacMismatch {
        address: u8,
    },

    /// Plain message received while the secure channel is up
    #[error("Unsecured message from address {address} on secure channel")]
    UnsecuredMessage {
        address: u8,
    },

    /// Encrypted payload could not be decrypted
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Invalid session state
    #[error("Invalid session state: {0}")]
    InvalidSessionState(String),

    /// Device answered with a NAK
    #[error("Device {address} returned NAK: {code}")]
    Nak {
        address: u8,
        code: NakErrorCode,
    },

    /// Reply does not belong to the outstanding command
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// No reply within the retry budget
    #[error("Timeout waiting for reply from address {address} after {attempts} attempts")]
    Timeout {
        address: u8,
        attempts: usize,
    },
}

impl Error {
    /// Build a length error for a payload variant
    pub fn payload_length(name: &'static str, expected: impl Into<String>, actual: usize) -> Self {
        Self::InvalidPayloadLength {
            name,
            expected: expected.into(),
            actual,
        }
    }

    /// Check if error is recoverable (retry might succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::FrameTooShort { .. }
                | Self::LengthMismatch { .. }
                | Self::InvalidStartOfMessage(_)
        )
    }

    /// Check if error only concerns the bytes of one frame
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. }
                | Self::FrameTooLarge { .. }
                | Self::InvalidStartOfMessage(_)
                | Self::LengthMismatch { .. }
                | Self::MalformedSecurityBlock(_)
        )
    }

    /// Check if error invalidates the secure channel
    pub fn is_security_error(&self) -> bool {
        match self {
            Self::AuthenticationFailed(_)
            | Self::SecureChannelNotEstablished
            | Self::MacMismatch { .. }
            | Self::UnsecuredMessage { .. }
            | Self::DecryptionFailed(_) => true,
            Self::Nak { code, .. } => code.is_security_failure(),
            _ => false,
        }
    }

    /// Check if error requires the device to be connected again
    pub fn requires_reconnect(&self) -> bool {
        self.is_security_error()
            || matches!(self, Self::Timeout { .. } | Self::InvalidSessionState(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let timeout = Error::Timeout {
            address: 1,
            attempts: 4,
        };
        assert!(timeout.is_recoverable());
        assert!(timeout.requires_reconnect());
        assert!(!timeout.is_security_error());

        let mac = Error::MacMismatch { address: 1 };
        assert!(mac.is_security_error());
        assert!(mac.requires_reconnect());
        assert!(!mac.is_framing_error());

        assert!(Error::InvalidStartOfMessage(0xFF).is_framing_error());
        assert!(Error::UnsecuredMessage { address: 2 }.is_security_error());
    }

    #[test]
    fn test_nak_classes() {
        let unknown = Error::Nak {
            address: 1,
            code: NakErrorCode::UnknownCommandCode,
        };
        assert!(!unknown.is_security_error());

        let security = Error::Nak {
            address: 1,
            code: NakErrorCode::EncryptionRequired,
        };
        assert!(security.is_security_error());
        assert!(security.requires_reconnect());
    }
}
