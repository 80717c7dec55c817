//! Extended identification report
//!
//! The extended form of `osdp_PDID` is a list of tagged records:
//!
//! ```text
//! [Tag][Len LSB][Len MSB][UTF-8 value ...] [Tag] ...
//! ```

use std::fmt;

use bytes::{BufMut, BytesMut};
use byteorder::{ByteOrder, LittleEndian};
use osdp_types::IdentificationTag;

use super::PayloadData;
use crate::error::{Error, Result};

const RECORD_HEADER_SIZE: usize = 3;

/// One tagged value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentificationRecord {
    pub tag: IdentificationTag,
    pub value: String,
}

impl IdentificationRecord {
    pub fn new(tag: IdentificationTag, value: impl Into<String>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }
}

/// Extended `osdp_PDID` body
///
/// Records keep their order. Unknown tags are kept with their raw value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedIdentification {
    pub records: Vec<IdentificationRecord>,
}

impl ExtendedIdentification {
    pub fn new(records: Vec<IdentificationRecord>) -> Self {
        Self { records }
    }

    pub fn with(mut self, tag: IdentificationTag, value: impl Into<String>) -> Self {
        self.records.push(IdentificationRecord::new(tag, value));
        self
    }

    /// First value carrying `tag`
    pub fn get(&self, tag: IdentificationTag) -> Option<&str> {
        self.records
            .iter()
            .find(|record| record.tag == tag)
            .map(|record| record.value.as_str())
    }

    pub fn manufacturer(&self) -> Option<&str> {
        self.get(IdentificationTag::Manufacturer)
    }

    pub fn product_name(&self) -> Option<&str> {
        self.get(IdentificationTag::ProductName)
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.get(IdentificationTag::SerialNumber)
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.get(IdentificationTag::FirmwareVersion)
    }
}

impl PayloadData for ExtendedIdentification {
    fn encode(&self, buf: &mut BytesMut) {
        for record in &self.records {
            let value = &record.value.as_bytes()[..record.value.len().min(u16::MAX as usize)];
            buf.put_u8(record.tag.into());
            buf.put_u16_le(value.len() as u16);
            buf.put_slice(value);
        }
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let mut records = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            if rest.len() < RECORD_HEADER_SIZE {
                return Err(Error::Decode(format!(
                    "truncated identification record header: {} bytes",
                    rest.len()
                )));
            }

            let tag = IdentificationTag::from(rest[0]);
            let len = LittleEndian::read_u16(&rest[1..3]) as usize;
            let end = RECORD_HEADER_SIZE + len;
            if rest.len() < end {
                return Err(Error::Decode(format!(
                    "identification record {} declares {} bytes, {} left",
                    tag,
                    len,
                    rest.len() - RECORD_HEADER_SIZE
                )));
            }

            let value = std::str::from_utf8(&rest[RECORD_HEADER_SIZE..end])
                .map_err(|e| Error::Decode(format!("identification record {}: {}", tag, e)))?;
            records.push(IdentificationRecord::new(tag, value));
            rest = &rest[end..];
        }

        Ok(Self { records })
    }
}

impl fmt::Display for ExtendedIdentification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for record in &self.records {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", record.tag, record.value)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unknown_tag_round_trips() {
        let report = ExtendedIdentification::default()
            .with(IdentificationTag::Manufacturer, "Acme")
            .with(IdentificationTag::Unknown(0x0A), "vendor blob ✓");

        let bytes = report.to_bytes();
        let decoded = ExtendedIdentification::decode(&bytes).unwrap();

        assert_eq!(decoded, report);
        assert_eq!(decoded.records[1].tag, IdentificationTag::Unknown(0x0A));
        assert_eq!(u8::from(decoded.records[1].tag), 0x0A);
        assert_eq!(decoded.get(IdentificationTag::Unknown(0x0A)), Some("vendor blob ✓"));
    }

    #[test]
    fn test_record_layout() {
        let report = ExtendedIdentification::default().with(IdentificationTag::SerialNumber, "42");
        assert_eq!(report.to_bytes().as_ref(), &[0x03, 0x02, 0x00, b'4', b'2']);
    }

    #[test]
    fn test_truncated_record_fails() {
        assert!(matches!(
            ExtendedIdentification::decode(&[0x01, 0x05, 0x00, b'a']),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            ExtendedIdentification::decode(&[0x01, 0x05]),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_fails() {
        assert!(ExtendedIdentification::decode(&[0x02, 0x01, 0x00, 0xFF]).is_err());
    }

    #[test]
    fn test_empty_report() {
        let decoded = ExtendedIdentification::decode(&[]).unwrap();
        assert!(decoded.records.is_empty());
        assert_eq!(decoded.manufacturer(), None);
    }
}
