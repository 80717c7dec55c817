//! Command and reply payloads
//!
//! [`Command`] and [`Reply`] are closed sets with one variant per function
//! code. Each variant knows the security block it needs on a secure link and
//! its own wire layout. Multi-byte fields are little-endian.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, Result};

pub mod command;
pub mod identification;
pub mod reply;

pub use command::{
    Command, CommunicationConfiguration, EncryptionKey, FileTransferFragment, GetPivData,
    IdReportType, ManufacturerData, OutputControl, PermanentLed, PivOffset,
    ReaderBuzzerControl, ReaderLedControl, ReaderTextOutput, TemporaryLed,
};
pub use identification::{ExtendedIdentification, IdentificationRecord};
pub use reply::{
    Capability, ClientCryptogram, DeviceCapabilities, DeviceIdentification, FileTransferActions,
    FileTransferStatus, FormattedCardData, KeypadData, LocalStatus, Nak, PivDataReply,
    RawCardData, Reply,
};

/// Binary layout of one payload body
pub trait PayloadData: Sized {
    /// Append the encoded body to `buf`
    fn encode(&self, buf: &mut BytesMut);

    /// Decode a complete body
    fn decode(data: &[u8]) -> Result<Self>;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

pub(crate) fn expect_len(name: &'static str, data: &[u8], len: usize) -> Result<()> {
    if data.len() != len {
        return Err(Error::payload_length(name, len.to_string(), data.len()));
    }
    Ok(())
}

pub(crate) fn expect_min_len(name: &'static str, data: &[u8], min: usize) -> Result<()> {
    if data.len() < min {
        return Err(Error::payload_length(name, format!("at least {}", min), data.len()));
    }
    Ok(())
}

/// Length must be a whole number of fixed-size records
pub(crate) fn expect_records(name: &'static str, data: &[u8], record: usize) -> Result<()> {
    if data.len() % record != 0 {
        return Err(Error::payload_length(
            name,
            format!("a multiple of {}", record),
            data.len(),
        ));
    }
    Ok(())
}

pub(crate) fn array<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[..N]);
    out
}
