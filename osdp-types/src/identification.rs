//! Tags of the extended identification report

use std::fmt;

/// Tag of one extended identification record
///
/// Tags outside the known set are kept as `Unknown` with their raw value so a
/// report from a newer or vendor-extended device can be forwarded unchanged.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IdentificationTag {
    Manufacturer,
    ProductName,
    SerialNumber,
    FirmwareVersion,
    HardwareDescription,
    Url,
    ConfigurationReference,
    /// Any other tag value
    ///
    /// Meant for values outside `0x01..=0x07`. A known value stored here
    /// encodes to the same byte and decodes as the named tag; use
    /// [`IdentificationTag::from`] to build tags from raw bytes.
    Unknown(u8),
}

impl From<u8> for IdentificationTag {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Self::Manufacturer,
            0x02 => Self::ProductName,
            0x03 => Self::SerialNumber,
            0x04 => Self::FirmwareVersion,
            0x05 => Self::HardwareDescription,
            0x06 => Self::Url,
            0x07 => Self::ConfigurationReference,
            other => Self::Unknown(other),
        }
    }
}

impl From<IdentificationTag> for u8 {
    fn from(tag: IdentificationTag) -> u8 {
        match tag {
            IdentificationTag::Manufacturer => 0x01,
            IdentificationTag::ProductName => 0x02,
            IdentificationTag::SerialNumber => 0x03,
            IdentificationTag::FirmwareVersion => 0x04,
            IdentificationTag::HardwareDescription => 0x05,
            IdentificationTag::Url => 0x06,
            IdentificationTag::ConfigurationReference => 0x07,
            IdentificationTag::Unknown(value) => value,
        }
    }
}

impl fmt::Display for IdentificationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(value) => write!(f, "Tag(0x{:02X})", value),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tag_is_preserved() {
        let tag = IdentificationTag::from(0x0A);
        assert_eq!(tag, IdentificationTag::Unknown(0x0A));
        assert_eq!(u8::from(tag), 0x0A);
        assert_eq!(tag.to_string(), "Tag(0x0A)");
    }

    #[test]
    fn test_known_value_in_unknown_normalises() {
        let raw = IdentificationTag::Unknown(0x02);
        assert_eq!(IdentificationTag::from(u8::from(raw)), IdentificationTag::ProductName);
        assert_eq!(IdentificationTag::from(0x02), IdentificationTag::ProductName);
    }
}
