//! Protocol constants

/// Start of message marker, first byte of every frame
pub const START_OF_MESSAGE: u8 = 0x53;

/// Address byte flag set on replies sent by a PD
pub const REPLY_FLAG: u8 = 0x80;

/// Mask selecting the 7-bit device address
pub const ADDRESS_MASK: u8 = 0x7F;

/// Address every PD answers to
pub const BROADCAST_ADDRESS: u8 = 0x7F;

/// SOM, address, two length bytes and control byte
pub const HEADER_SIZE: usize = 5;

/// Transmitted part of a message authentication code
pub const MAC_SIZE: usize = 4;

/// CRC-16 trailer size
pub const CRC_SIZE: usize = 2;

/// Checksum trailer size
pub const CHECKSUM_SIZE: usize = 1;

/// Smallest possible frame: header, function code and checksum
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + 1 + CHECKSUM_SIZE;

/// Largest frame accepted from the wire
pub const MAX_FRAME_SIZE: usize = 1440;

/// Well-known secure channel base key (SCBK-D)
pub const DEFAULT_SECURE_CHANNEL_KEY: [u8; 16] = *b"0123456789:;<=>?";

/// Marker byte that starts the padding of encrypted data and MAC input
pub const PADDING_MARKER: u8 = 0x80;

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// Default interval between polls of one device (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Default time to wait for a reply (milliseconds)
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 200;

/// Delay before a command answered with BUSY is sent again (milliseconds)
pub const DEFAULT_BUSY_RETRY_DELAY_MS: u64 = 50;

/// Maximum retries of one command before the device is marked offline
pub const MAX_RETRIES: usize = 3;

/// Default serial line speed
pub const DEFAULT_BAUD_RATE: u32 = 9600;
