//! Frame integrity trailers
//!
//! OSDP frames end with either a CRC-16 or an 8-bit checksum, selected by
//! bit 2 of the control byte. Both cover every byte of the frame before the
//! trailer.
//!
//! ```text
//! CRC-16:   poly 0x1021, init 0x1D0F, no reflection, sent LSB first
//! checksum: two's complement of the 8-bit sum
//! ```

use tracing::trace;

const CRC_POLYNOMIAL: u16 = 0x1021;
const CRC_INITIAL: u16 = 0x1D0F;

const CRC_TABLE: [u16; 256] = build_crc_table();

const fn build_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut value = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            value = if value & 0x8000 != 0 {
                (value << 1) ^ CRC_POLYNOMIAL
            } else {
                value << 1
            };
            bit += 1;
        }
        table[i] = value;
        i += 1;
    }
    table
}

/// Calculate the CRC-16 of a frame body
///
/// # Examples
///
/// ```
/// use osdp_core::checksum;
///
/// let crc = checksum::crc16(&[0x53, 0x00, 0x08, 0x00, 0x04, 0x60]);
/// assert!(checksum::verify_crc16(&[0x53, 0x00, 0x08, 0x00, 0x04, 0x60], crc));
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    let crc = data.iter().fold(CRC_INITIAL, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[((crc >> 8) ^ byte as u16) as usize & 0xFF]
    });

    trace!(
        len = data.len(),
        crc = format!("0x{:04X}", crc),
        "Calculated CRC-16"
    );

    crc
}

/// Calculate the 8-bit checksum of a frame body
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte));
    sum.wrapping_neg()
}

/// Verify CRC-16
pub fn verify_crc16(data: &[u8], expected: u16) -> bool {
    crc16(data) == expected
}

/// Verify checksum
pub fn verify_checksum(data: &[u8], expected: u8) -> bool {
    checksum(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_known_frame() {
        let body = [
            0x53, 0x00, 0x1C, 0x00, 0x0E, 0x02, 0x17, 0x75, 0x01, 0x10, 0x00, 0x01, 0x02, 0x03,
            0x04, 0x05, 0x06, 0x07, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07,
        ];

        assert_eq!(crc16(&body), 0xF2F8);
    }

    #[test]
    fn test_crc16_empty_is_initial_value() {
        assert_eq!(crc16(&[]), CRC_INITIAL);
    }

    #[test]
    fn test_checksum_sums_to_zero() {
        let body = [0x53, 0x00, 0x08, 0x00, 0x00, 0x62, 0x00];
        let sum = body
            .iter()
            .fold(checksum(&body), |sum, &byte| sum.wrapping_add(byte));

        assert_eq!(sum, 0);
    }

    #[test]
    fn test_checksum_verify() {
        let body = vec![0xAB, 0xCD];
        let value = checksum(&body);

        assert!(verify_checksum(&body, value));
        assert!(!verify_checksum(&body, value.wrapping_add(1)));
    }

    #[test]
    fn test_crc16_verify() {
        let body = vec![1, 2, 3];
        let value = crc16(&body);

        assert!(verify_crc16(&body, value));
        assert!(!verify_crc16(&body, value ^ 0x0100));
    }

    #[test]
    fn test_crc16_detects_single_bit_flip() {
        let body = vec![0x53, 0x01, 0x09, 0x00, 0x05, 0x61, 0x00];
        let reference = crc16(&body);

        for index in 0..body.len() {
            for bit in 0..8 {
                let mut corrupted = body.clone();
                corrupted[index] ^= 1 << bit;
                assert_ne!(crc16(&corrupted), reference);
            }
        }
    }
}
