//! Frame reassembly from a byte stream

use bytes::{Buf, Bytes, BytesMut};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace};

use crate::constants::{HEADER_SIZE, MAX_FRAME_SIZE, MIN_FRAME_SIZE, START_OF_MESSAGE};

/// Cuts complete frames out of transport reads
///
/// Bytes before a start of message marker are dropped. A header with an
/// impossible length is treated as noise: the reader skips its marker and
/// searches again from the next byte.
#[derive(Debug, Default)]
pub struct FrameReader {
    buffer: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_FRAME_SIZE),
        }
    }

    /// Buffer that transport reads append to
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet returned as a frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything buffered, e.g. after a timeout
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.buffer.iter().position(|&b| b == START_OF_MESSAGE) {
                Some(0) => {}
                Some(start) => {
                    trace!(skipped = start, "Discarding bytes before start of message");
                    self.buffer.advance(start);
                }
                None => {
                    self.buffer.clear();
                    return None;
                }
            }

            if self.buffer.len() < HEADER_SIZE {
                return None;
            }

            let length = LittleEndian::read_u16(&self.buffer[2..4]) as usize;
            if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&length) {
                debug!(length, "Impossible frame length, resynchronising");
                self.buffer.advance(1);
                continue;
            }

            if self.buffer.len() < length {
                return None;
            }

            return Some(self.buffer.split_to(length).freeze());
        }
    }
}
