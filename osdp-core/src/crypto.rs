//! AES-128 primitives used by the secure channel
//!
//! Key derivation and cryptograms use single-block ECB encryption, payloads
//! use CBC without padding (the caller pads), and the MAC is a CBC chain whose
//! last block is encrypted under a second key.

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};

use crate::constants::{BLOCK_SIZE, PADDING_MARKER};

/// One AES block, also the size of every key and cryptogram
pub(crate) type Block = [u8; BLOCK_SIZE];

fn cipher(key: &Block) -> Aes128 {
    Aes128::new(GenericArray::from_slice(key))
}

fn xor_in_place(block: &mut Block, other: &Block) {
    for (byte, mask) in block.iter_mut().zip(other.iter()) {
        *byte ^= mask;
    }
}

/// Encrypt up to 16 bytes in ECB mode, zero padding short input
pub(crate) fn encrypt_block(key: &Block, input: &[u8]) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    let len = input.len().min(BLOCK_SIZE);
    block[..len].copy_from_slice(&input[..len]);

    let mut data = GenericArray::clone_from_slice(&block);
    cipher(key).encrypt_block(&mut data);
    block.copy_from_slice(&data);
    block
}

/// Encrypt block-aligned data in place using CBC
pub(crate) fn cbc_encrypt(key: &Block, iv: &Block, data: &mut [u8]) {
    debug_assert_eq!(data.len() % BLOCK_SIZE, 0);

    let cipher = cipher(key);
    let mut chain = *iv;
    for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);
        xor_in_place(&mut block, &chain);

        let mut encrypted = GenericArray::clone_from_slice(&block);
        cipher.encrypt_block(&mut encrypted);
        chunk.copy_from_slice(&encrypted);
        chain.copy_from_slice(chunk);
    }
}

/// Decrypt block-aligned data in place using CBC
pub(crate) fn cbc_decrypt(key: &Block, iv: &Block, data: &mut [u8]) {
    debug_assert_eq!(data.len() % BLOCK_SIZE, 0);

    let cipher = cipher(key);
    let mut chain = *iv;
    for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
        let mut ciphertext = [0u8; BLOCK_SIZE];
        ciphertext.copy_from_slice(chunk);

        let mut decrypted = GenericArray::clone_from_slice(&ciphertext);
        cipher.decrypt_block(&mut decrypted);

        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&decrypted);
        xor_in_place(&mut block, &chain);
        chunk.copy_from_slice(&block);
        chain = ciphertext;
    }
}

/// Append the padding marker and zero-fill to the next block boundary
///
/// Block-aligned input still gains a full block so the marker is always
/// present.
pub(crate) fn pad(data: &[u8]) -> Vec<u8> {
    let padded_len = (data.len() / BLOCK_SIZE + 1) * BLOCK_SIZE;
    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(data);
    padded.push(PADDING_MARKER);
    padded.resize(padded_len, 0);
    padded
}

/// Strip padding by scanning back from the end for the marker
pub(crate) fn unpad(data: &[u8]) -> Option<&[u8]> {
    let marker = data.iter().rposition(|&byte| byte != 0)?;
    (data[marker] == PADDING_MARKER).then(|| &data[..marker])
}

/// Compute the full 16-byte MAC of a framed message
///
/// All blocks but the last are encrypted under `smac1`, the last under
/// `smac2`. A partial last block is padded with the marker.
pub(crate) fn mac(smac1: &Block, smac2: &Block, iv: &Block, message: &[u8]) -> Block {
    let first = cipher(smac1);
    let last = cipher(smac2);
    let block_count = message.len().div_ceil(BLOCK_SIZE).max(1);

    let mut chain = *iv;
    for index in 0..block_count {
        let start = index * BLOCK_SIZE;
        let chunk = &message[start.min(message.len())..(start + BLOCK_SIZE).min(message.len())];

        let mut block = [0u8; BLOCK_SIZE];
        block[..chunk.len()].copy_from_slice(chunk);
        if chunk.len() < BLOCK_SIZE {
            block[chunk.len()] = PADDING_MARKER;
        }
        xor_in_place(&mut block, &chain);

        let mut data = GenericArray::clone_from_slice(&block);
        if index + 1 == block_count {
            last.encrypt_block(&mut data);
        } else {
            first.encrypt_block(&mut data);
        }
        chain.copy_from_slice(&data);
    }

    chain
}

/// Bitwise complement of a block, used as the payload IV
pub(crate) fn complement(block: &Block) -> Block {
    let mut out = *block;
    for byte in out.iter_mut() {
        *byte = !*byte;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const KEY: Block = *b"0123456789:;<=>?";

    #[test]
    fn test_pad_partial_block() {
        let padded = pad(&[1, 2, 3]);
        assert_eq!(padded.len(), 16);
        assert_eq!(&padded[..4], &[1, 2, 3, PADDING_MARKER]);
        assert!(padded[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pad_aligned_input_gains_full_block() {
        let data = [0xAA; 16];
        let padded = pad(&data);

        assert_eq!(padded.len(), 32);
        assert_eq!(padded[16], PADDING_MARKER);
        assert!(padded[17..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unpad() {
        assert_eq!(unpad(&pad(&[1, 2, 3])), Some(&[1u8, 2, 3][..]));
        assert_eq!(unpad(&pad(&[])), Some(&[][..]));
        assert_eq!(unpad(&[0u8; 16]), None);
        assert_eq!(unpad(&[1, 2, 3, 0]), None);
    }

    #[test]
    fn test_cbc_round_trip() {
        let iv = [0x5A; 16];
        let plain = pad(b"card reader 1");
        let mut data = plain.clone();

        cbc_encrypt(&KEY, &iv, &mut data);
        assert_ne!(data, plain);

        cbc_decrypt(&KEY, &iv, &mut data);
        assert_eq!(data, plain);
    }

    #[test]
    fn test_encrypt_block_zero_pads_short_input() {
        let mut padded = [0u8; 16];
        padded[..2].copy_from_slice(&[0x01, 0x82]);

        assert_eq!(encrypt_block(&KEY, &[0x01, 0x82]), encrypt_block(&KEY, &padded));
    }

    #[test]
    fn test_mac_depends_on_iv_and_message() {
        let smac1 = [1u8; 16];
        let smac2 = [2u8; 16];
        let message = [0x53, 0x01, 0x0E, 0x00, 0x0D, 0x02, 0x15, 0x60];

        let reference = mac(&smac1, &smac2, &[0u8; 16], &message);
        assert_ne!(reference, mac(&smac1, &smac2, &[1u8; 16], &message));
        assert_ne!(reference, mac(&smac1, &smac2, &[0u8; 16], &message[..7]));
    }

    #[test]
    fn test_complement() {
        assert_eq!(complement(&[0x0F; 16]), [0xF0; 16]);
    }
}
