//! Coded fields of the reader and output control commands

use std::fmt;

use crate::error::{Error, Result};

/// Reader LED colour
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LedColor {
    Black = 0,
    Red = 1,
    Green = 2,
    Amber = 3,
    Blue = 4,
    Magenta = 5,
    Cyan = 6,
    White = 7,
}

impl From<LedColor> for u8 {
    fn from(color: LedColor) -> u8 {
        color as u8
    }
}

impl TryFrom<u8> for LedColor {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Black),
            1 => Ok(Self::Red),
            2 => Ok(Self::Green),
            3 => Ok(Self::Amber),
            4 => Ok(Self::Blue),
            5 => Ok(Self::Magenta),
            6 => Ok(Self::Cyan),
            7 => Ok(Self::White),
            _ => Err(Error::invalid_code("LED colour", value)),
        }
    }
}

impl fmt::Display for LedColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Control code for the temporary part of an LED record
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TemporaryLedControlCode {
    /// Leave the temporary state untouched
    Nop = 0,
    /// Cancel any temporary operation and show the permanent state
    Cancel = 1,
    /// Set the temporary state and start the timer
    SetTemporaryAndStartTimer = 2,
}

impl From<TemporaryLedControlCode> for u8 {
    fn from(code: TemporaryLedControlCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for TemporaryLedControlCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Nop),
            1 => Ok(Self::Cancel),
            2 => Ok(Self::SetTemporaryAndStartTimer),
            _ => Err(Error::invalid_code("temporary LED control", value)),
        }
    }
}

/// Control code for the permanent part of an LED record
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PermanentLedControlCode {
    Nop = 0,
    SetPermanentState = 1,
}

impl From<PermanentLedControlCode> for u8 {
    fn from(code: PermanentLedControlCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for PermanentLedControlCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Nop),
            1 => Ok(Self::SetPermanentState),
            _ => Err(Error::invalid_code("permanent LED control", value)),
        }
    }
}

/// Buzzer tone
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ToneCode {
    /// Deprecated "no tone" code, kept for older readers
    NoTone = 0,
    Off = 1,
    Default = 2,
}

impl From<ToneCode> for u8 {
    fn from(code: ToneCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for ToneCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::NoTone),
            1 => Ok(Self::Off),
            2 => Ok(Self::Default),
            _ => Err(Error::invalid_code("tone", value)),
        }
    }
}

/// Output control code
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OutputControlCode {
    Nop = 0,
    PermanentStateOffAbortTimedOperation = 1,
    PermanentStateOnAbortTimedOperation = 2,
    PermanentStateOffAllowTimedOperation = 3,
    PermanentStateOnAllowTimedOperation = 4,
    TemporaryStateOnResumePermanentState = 5,
    TemporaryStateOffResumePermanentState = 6,
}

impl From<OutputControlCode> for u8 {
    fn from(code: OutputControlCode) -> u8 {
        code as u8
    }
}

impl TryFrom<u8> for OutputControlCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Nop),
            1 => Ok(Self::PermanentStateOffAbortTimedOperation),
            2 => Ok(Self::PermanentStateOnAbortTimedOperation),
            3 => Ok(Self::PermanentStateOffAllowTimedOperation),
            4 => Ok(Self::PermanentStateOnAllowTimedOperation),
            5 => Ok(Self::TemporaryStateOnResumePermanentState),
            6 => Ok(Self::TemporaryStateOffResumePermanentState),
            _ => Err(Error::invalid_code("output control", value)),
        }
    }
}

/// Text output mode
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TextCommand {
    PermanentTextNoWrap = 1,
    PermanentTextWithWrap = 2,
    TemporaryTextNoWrap = 3,
    TemporaryTextWithWrap = 4,
}

impl From<TextCommand> for u8 {
    fn from(command: TextCommand) -> u8 {
        command as u8
    }
}

impl TryFrom<u8> for TextCommand {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::PermanentTextNoWrap),
            2 => Ok(Self::PermanentTextWithWrap),
            3 => Ok(Self::TemporaryTextNoWrap),
            4 => Ok(Self::TemporaryTextWithWrap),
            _ => Err(Error::invalid_code("text command", value)),
        }
    }
}

/// Key type carried by the key set command
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Secure channel base key
    SecureChannelBaseKey,
    Unknown(u8),
}

impl From<KeyType> for u8 {
    fn from(key_type: KeyType) -> u8 {
        match key_type {
            KeyType::SecureChannelBaseKey => 0x01,
            KeyType::Unknown(value) => value,
        }
    }
}

impl From<u8> for KeyType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::SecureChannelBaseKey,
            other => Self::Unknown(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_led_color_conversion() {
        assert_eq!(u8::from(LedColor::Amber), 3);
        assert_eq!(LedColor::try_from(7).unwrap(), LedColor::White);
        assert!(LedColor::try_from(8).is_err());
    }

    #[test]
    fn test_output_control_code_conversion() {
        for raw in 0..=6u8 {
            let code = OutputControlCode::try_from(raw).unwrap();
            assert_eq!(u8::from(code), raw);
        }
        assert!(OutputControlCode::try_from(7).is_err());
    }

    #[test]
    fn test_key_type_keeps_unknown_value() {
        assert_eq!(KeyType::from(0x01), KeyType::SecureChannelBaseKey);
        assert_eq!(u8::from(KeyType::from(0x42)), 0x42);
    }
}
