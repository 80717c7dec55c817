//! Value types shared by OSDP command and reply payloads
//!
//! Everything here is a plain value: enums for the coded fields of the
//! protocol (LED colours, output control codes, NAK reasons, ...) and their
//! byte conversions. Codes that the protocol leaves open for vendors keep the
//! raw byte in an `Unknown` variant so they survive a decode/encode cycle.

pub mod capability;
pub mod control;
pub mod error;
pub mod identification;
pub mod status;

pub use capability::CapabilityFunction;
pub use control::{
    KeyType, LedColor, OutputControlCode, PermanentLedControlCode, TemporaryLedControlCode,
    TextCommand, ToneCode,
};
pub use error::{Error, Result};
pub use identification::IdentificationTag;
pub use status::{FileTransferStatusCode, NakErrorCode, ReaderTamperStatus};
