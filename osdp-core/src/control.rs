//! Control byte and per-link sequence numbering

use std::fmt;

use bitflags::bitflags;

use crate::constants::{CHECKSUM_SIZE, CRC_SIZE};

bitflags! {
    /// Flag bits of the control byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ControlFlags: u8 {
        /// Two-byte CRC trailer instead of the checksum
        const CRC            = 0b0000_0100;
        /// Security control block follows the header
        const SECURITY_BLOCK = 0b0000_1000;
    }
}

const SEQUENCE_MASK: u8 = 0b0000_0011;

/// Decoded control byte
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Control {
    sequence: u8,
    use_crc: bool,
    has_security_block: bool,
}

impl Control {
    /// Sequence is reduced to its two low bits
    pub fn new(sequence: u8, use_crc: bool, has_security_block: bool) -> Self {
        Self {
            sequence: sequence & SEQUENCE_MASK,
            use_crc,
            has_security_block,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        let flags = ControlFlags::from_bits_truncate(byte);
        Self {
            sequence: byte & SEQUENCE_MASK,
            use_crc: flags.contains(ControlFlags::CRC),
            has_security_block: flags.contains(ControlFlags::SECURITY_BLOCK),
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut flags = ControlFlags::empty();
        flags.set(ControlFlags::CRC, self.use_crc);
        flags.set(ControlFlags::SECURITY_BLOCK, self.has_security_block);
        flags.bits() | self.sequence
    }

    pub fn sequence(self) -> u8 {
        self.sequence
    }

    pub fn use_crc(self) -> bool {
        self.use_crc
    }

    pub fn has_security_block(self) -> bool {
        self.has_security_block
    }

    /// Copy with the security block flag set or cleared
    pub fn with_security_block(self, has_security_block: bool) -> Self {
        Self {
            has_security_block,
            ..self
        }
    }

    /// Size of the CRC or checksum trailer
    pub fn trailer_size(self) -> usize {
        if self.use_crc {
            CRC_SIZE
        } else {
            CHECKSUM_SIZE
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seq={} {}{}",
            self.sequence,
            if self.use_crc { "CRC" } else { "CKSUM" },
            if self.has_security_block { " SCB" } else { "" }
        )
    }
}

/// Next value of the 2-bit sequence ring
pub fn next_sequence(sequence: u8) -> u8 {
    (sequence + 1) & SEQUENCE_MASK
}

/// Sequence number and trailer mode of one link
///
/// The ACU advances the sequence after every accepted reply. A retry reuses
/// the current value. Reconnecting starts over at zero, which tells the PD to
/// drop any cached reply.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LinkSequence {
    sequence: u8,
    use_crc: bool,
}

impl LinkSequence {
    pub fn new(use_crc: bool) -> Self {
        Self {
            sequence: 0,
            use_crc,
        }
    }

    pub fn current(&self) -> u8 {
        self.sequence
    }

    pub fn use_crc(&self) -> bool {
        self.use_crc
    }

    pub fn set_use_crc(&mut self, use_crc: bool) {
        self.use_crc = use_crc;
    }

    /// Move to the next sequence number and return it
    pub fn advance(&mut self) -> u8 {
        self.sequence = next_sequence(self.sequence);
        self.sequence
    }

    pub fn reset(&mut self) {
        self.sequence = 0;
    }

    /// Control byte for the current sequence
    pub fn control(&self, has_security_block: bool) -> Control {
        Control::new(self.sequence, self.use_crc, has_security_block)
    }
}

impl Default for LinkSequence {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_control_byte_layout() {
        let control = Control::from_byte(0x0E);
        assert_eq!(control.sequence(), 2);
        assert!(control.use_crc());
        assert!(control.has_security_block());
        assert_eq!(control.to_byte(), 0x0E);

        let control = Control::from_byte(0x00);
        assert_eq!(control.trailer_size(), CHECKSUM_SIZE);
        assert!(!control.has_security_block());
    }

    #[test]
    fn test_control_ignores_reserved_bits() {
        let control = Control::from_byte(0xF5);
        assert_eq!(control.sequence(), 1);
        assert!(control.use_crc());
        assert_eq!(control.to_byte(), 0x05);
    }

    #[test]
    fn test_sequence_ring() {
        let mut link = LinkSequence::new(true);
        let seen: Vec<u8> = (0..8).map(|_| link.advance()).collect();
        assert_eq!(seen, vec![1, 2, 3, 0, 1, 2, 3, 0]);
    }

    #[test]
    fn test_sequence_reset() {
        let mut link = LinkSequence::new(false);
        link.advance();
        link.advance();
        link.reset();

        assert_eq!(link.current(), 0);
        assert_eq!(link.control(false).to_byte(), 0x00);
    }

    #[test]
    fn test_display() {
        assert_eq!(Control::from_byte(0x0D).to_string(), "seq=1 CRC SCB");
    }

    proptest! {
        #[test]
        fn prop_advance_is_plus_one_mod_four(start in 0u8..4, steps in 1usize..32) {
            let mut link = LinkSequence::new(true);
            for _ in 0..start {
                link.advance();
            }

            for _ in 0..steps {
                let before = link.current();
                let after = link.advance();
                prop_assert_eq!(after, (before + 1) % 4);
            }
        }

        #[test]
        fn prop_control_byte_round_trip(sequence in 0u8..4, use_crc: bool, scb: bool) {
            let control = Control::new(sequence, use_crc, scb);
            prop_assert_eq!(Control::from_byte(control.to_byte()), control);
        }
    }
}
