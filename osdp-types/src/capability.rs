//! PD capability function codes

use std::fmt;

/// Function described by one capability record of a `PDCAP` reply
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CapabilityFunction {
    ContactStatusMonitoring,
    OutputControl,
    CardDataFormat,
    ReaderLedControl,
    ReaderAudibleOutput,
    ReaderTextOutput,
    TimeKeeping,
    CheckCharacterSupport,
    CommunicationSecurity,
    ReceiveBufferSize,
    LargestCombinedMessageSize,
    SmartCardSupport,
    Readers,
    Biometrics,
    SecurePinEntry,
    OsdpVersion,
    Unknown(u8),
}

impl From<u8> for CapabilityFunction {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::ContactStatusMonitoring,
            2 => Self::OutputControl,
            3 => Self::CardDataFormat,
            4 => Self::ReaderLedControl,
            5 => Self::ReaderAudibleOutput,
            6 => Self::ReaderTextOutput,
            7 => Self::TimeKeeping,
            8 => Self::CheckCharacterSupport,
            9 => Self::CommunicationSecurity,
            10 => Self::ReceiveBufferSize,
            11 => Self::LargestCombinedMessageSize,
            12 => Self::SmartCardSupport,
            13 => Self::Readers,
            14 => Self::Biometrics,
            15 => Self::SecurePinEntry,
            16 => Self::OsdpVersion,
            other => Self::Unknown(other),
        }
    }
}

impl From<CapabilityFunction> for u8 {
    fn from(function: CapabilityFunction) -> u8 {
        match function {
            CapabilityFunction::ContactStatusMonitoring => 1,
            CapabilityFunction::OutputControl => 2,
            CapabilityFunction::CardDataFormat => 3,
            CapabilityFunction::ReaderLedControl => 4,
            CapabilityFunction::ReaderAudibleOutput => 5,
            CapabilityFunction::ReaderTextOutput => 6,
            CapabilityFunction::TimeKeeping => 7,
            CapabilityFunction::CheckCharacterSupport => 8,
            CapabilityFunction::CommunicationSecurity => 9,
            CapabilityFunction::ReceiveBufferSize => 10,
            CapabilityFunction::LargestCombinedMessageSize => 11,
            CapabilityFunction::SmartCardSupport => 12,
            CapabilityFunction::Readers => 13,
            CapabilityFunction::Biometrics => 14,
            CapabilityFunction::SecurePinEntry => 15,
            CapabilityFunction::OsdpVersion => 16,
            CapabilityFunction::Unknown(value) => value,
        }
    }
}

impl fmt::Display for CapabilityFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(value) => write!(f, "Unknown(0x{:02X})", value),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_function_round_trip() {
        for raw in 0..=u8::MAX {
            assert_eq!(u8::from(CapabilityFunction::from(raw)), raw);
        }
    }

    #[test]
    fn test_capability_function_known_codes() {
        assert_eq!(CapabilityFunction::from(9), CapabilityFunction::CommunicationSecurity);
        assert_eq!(CapabilityFunction::from(0x55), CapabilityFunction::Unknown(0x55));
    }
}
