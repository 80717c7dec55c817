//! Commands sent by the ACU

use std::fmt;

use bytes::{BufMut, BytesMut};
use byteorder::{ByteOrder, LittleEndian};
use osdp_types::{
    KeyType, LedColor, OutputControlCode, PermanentLedControlCode, TemporaryLedControlCode,
    TextCommand, ToneCode,
};

use super::{array, expect_len, expect_min_len, expect_records, PayloadData};
use crate::{
    code::CommandCode,
    control::Control,
    error::{Error, Result},
    message::OutgoingMessage,
    secure_channel::SecureChannel,
    security_block::{SecurityBlock, SecurityBlockType},
};

/// A command and its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Poll,
    IdReport(IdReportType),
    DeviceCapabilities,
    LocalStatus,
    InputStatus,
    OutputStatus,
    ReaderStatus,
    OutputControl(Vec<OutputControl>),
    ReaderLedControl(Vec<ReaderLedControl>),
    ReaderBuzzerControl(ReaderBuzzerControl),
    ReaderTextOutput(ReaderTextOutput),
    CommunicationSet(CommunicationConfiguration),
    KeySet(EncryptionKey),
    /// Server random of a new secure channel
    Challenge([u8; 8]),
    ServerCryptogram([u8; 16]),
    /// Largest reply the ACU can receive
    MaxReplySize(u16),
    FileTransfer(FileTransferFragment),
    ManufacturerSpecific(ManufacturerData),
    Abort,
    PivData(GetPivData),
    /// Keep the secure channel alive for this many milliseconds
    KeepActive(u16),
}

impl Command {
    pub fn code(&self) -> CommandCode {
        match self {
            Self::Poll => CommandCode::Poll,
            Self::IdReport(_) => CommandCode::IdReport,
            Self::DeviceCapabilities => CommandCode::DeviceCapabilities,
            Self::LocalStatus => CommandCode::LocalStatus,
            Self::InputStatus => CommandCode::InputStatus,
            Self::OutputStatus => CommandCode::OutputStatus,
            Self::ReaderStatus => CommandCode::ReaderStatus,
            Self::OutputControl(_) => CommandCode::OutputControl,
            Self::ReaderLedControl(_) => CommandCode::ReaderLedControl,
            Self::ReaderBuzzerControl(_) => CommandCode::ReaderBuzzerControl,
            Self::ReaderTextOutput(_) => CommandCode::ReaderTextOutput,
            Self::CommunicationSet(_) => CommandCode::CommunicationSet,
            Self::KeySet(_) => CommandCode::KeySet,
            Self::Challenge(_) => CommandCode::Challenge,
            Self::ServerCryptogram(_) => CommandCode::ServerCryptogram,
            Self::MaxReplySize(_) => CommandCode::MaxReplySize,
            Self::FileTransfer(_) => CommandCode::FileTransfer,
            Self::ManufacturerSpecific(_) => CommandCode::ManufacturerSpecific,
            Self::Abort => CommandCode::Abort,
            Self::PivData(_) => CommandCode::PivData,
            Self::KeepActive(_) => CommandCode::KeepActive,
        }
    }

    /// Security block this command needs on a secure link
    pub fn security_block_type(&self) -> SecurityBlockType {
        let payload = self.to_bytes();
        self.block_type_for(&payload)
    }

    fn block_type_for(&self, payload: &[u8]) -> SecurityBlockType {
        match self {
            Self::Challenge(_) => SecurityBlockType::BeginNewSecureConnectionSequence,
            Self::ServerCryptogram(_) => SecurityBlockType::SecureConnectionSequenceStep3,
            _ if payload.is_empty() => SecurityBlockType::CommandMessageWithNoDataSecurity,
            _ => SecurityBlockType::CommandMessageWithDataSecurity,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Poll
            | Self::LocalStatus
            | Self::InputStatus
            | Self::OutputStatus
            | Self::ReaderStatus
            | Self::Abort => {}
            Self::IdReport(report_type) => buf.put_u8((*report_type).into()),
            Self::DeviceCapabilities => buf.put_u8(0x00),
            Self::OutputControl(outputs) => outputs.iter().for_each(|o| o.encode(buf)),
            Self::ReaderLedControl(leds) => leds.iter().for_each(|l| l.encode(buf)),
            Self::ReaderBuzzerControl(buzzer) => buzzer.encode(buf),
            Self::ReaderTextOutput(text) => text.encode(buf),
            Self::CommunicationSet(config) => config.encode(buf),
            Self::KeySet(key) => key.encode(buf),
            Self::Challenge(random) => buf.put_slice(random),
            Self::ServerCryptogram(cryptogram) => buf.put_slice(cryptogram),
            Self::MaxReplySize(size) => buf.put_u16_le(*size),
            Self::FileTransfer(fragment) => fragment.encode(buf),
            Self::ManufacturerSpecific(data) => data.encode(buf),
            Self::PivData(request) => request.encode(buf),
            Self::KeepActive(time) => buf.put_u16_le(*time),
        }
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode the payload of a command with a known code
    pub fn decode(code: CommandCode, data: &[u8]) -> Result<Self> {
        let name = code.name();
        let command = match code {
            CommandCode::Poll => expect_len(name, data, 0).map(|_| Self::Poll)?,
            CommandCode::LocalStatus => expect_len(name, data, 0).map(|_| Self::LocalStatus)?,
            CommandCode::InputStatus => expect_len(name, data, 0).map(|_| Self::InputStatus)?,
            CommandCode::OutputStatus => expect_len(name, data, 0).map(|_| Self::OutputStatus)?,
            CommandCode::ReaderStatus => expect_len(name, data, 0).map(|_| Self::ReaderStatus)?,
            CommandCode::Abort => expect_len(name, data, 0).map(|_| Self::Abort)?,
            CommandCode::IdReport => {
                expect_len(name, data, 1)?;
                Self::IdReport(IdReportType::from(data[0]))
            }
            CommandCode::DeviceCapabilities => {
                expect_len(name, data, 1)?;
                Self::DeviceCapabilities
            }
            CommandCode::OutputControl => {
                Self::OutputControl(decode_records(name, data, OutputControl::SIZE)?)
            }
            CommandCode::ReaderLedControl => {
                Self::ReaderLedControl(decode_records(name, data, ReaderLedControl::SIZE)?)
            }
            CommandCode::ReaderBuzzerControl => {
                Self::ReaderBuzzerControl(ReaderBuzzerControl::decode(data)?)
            }
            CommandCode::ReaderTextOutput => Self::ReaderTextOutput(ReaderTextOutput::decode(data)?),
            CommandCode::CommunicationSet => {
                Self::CommunicationSet(CommunicationConfiguration::decode(data)?)
            }
            CommandCode::KeySet => Self::KeySet(EncryptionKey::decode(data)?),
            CommandCode::Challenge => {
                expect_len(name, data, 8)?;
                Self::Challenge(array(data))
            }
            CommandCode::ServerCryptogram => {
                expect_len(name, data, 16)?;
                Self::ServerCryptogram(array(data))
            }
            CommandCode::MaxReplySize => {
                expect_len(name, data, 2)?;
                Self::MaxReplySize(LittleEndian::read_u16(data))
            }
            CommandCode::FileTransfer => Self::FileTransfer(FileTransferFragment::decode(data)?),
            CommandCode::ManufacturerSpecific => {
                Self::ManufacturerSpecific(ManufacturerData::decode(data)?)
            }
            CommandCode::PivData => Self::PivData(GetPivData::decode(data)?),
            CommandCode::KeepActive => {
                expect_len(name, data, 2)?;
                Self::KeepActive(LittleEndian::read_u16(data))
            }
        };

        Ok(command)
    }

    /// Decode from a raw function code
    pub fn parse(function_code: u8, data: &[u8]) -> Result<Self> {
        Self::decode(CommandCode::try_from(function_code)?, data)
    }

    /// Frame description for this command
    ///
    /// With a channel the frame carries the security block this command
    /// needs; the key flag of handshake blocks follows the channel's key.
    pub fn to_message(
        &self,
        address: u8,
        control: Control,
        channel: Option<&SecureChannel>,
    ) -> OutgoingMessage {
        let payload = self.to_bytes();
        let block_type = self.block_type_for(&payload);
        let message = OutgoingMessage::command(address, control, self.code().into(), payload);

        match channel {
            Some(channel) => message.with_security_block(SecurityBlock::new(
                block_type,
                channel.is_using_default_key(),
            )),
            None => message,
        }
    }

    /// Encode a complete frame, with MAC and encryption when `channel` is
    /// established
    pub fn build_frame(
        &self,
        address: u8,
        control: Control,
        channel: Option<&SecureChannel>,
    ) -> Result<BytesMut> {
        self.to_message(address, control, channel).encode(channel)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.code().name();
        match self {
            Self::IdReport(report_type) => write!(f, "{} {:?}", name, report_type),
            Self::OutputControl(outputs) => {
                write!(f, "{}", name)?;
                outputs.iter().try_for_each(|o| write!(f, " [{}]", o))
            }
            Self::ReaderLedControl(leds) => {
                write!(f, "{}", name)?;
                leds.iter().try_for_each(|l| write!(f, " [{}]", l))
            }
            Self::ReaderBuzzerControl(buzzer) => write!(f, "{} {}", name, buzzer),
            Self::ReaderTextOutput(text) => write!(f, "{} {}", name, text),
            Self::CommunicationSet(config) => write!(f, "{} {}", name, config),
            Self::KeySet(key) => write!(f, "{} {}", name, key),
            Self::Challenge(random) => write!(f, "{} rnd={}", name, hex::encode(random)),
            Self::ServerCryptogram(_) => write!(f, "{}", name),
            Self::MaxReplySize(size) => write!(f, "{} {} bytes", name, size),
            Self::FileTransfer(fragment) => write!(f, "{} {}", name, fragment),
            Self::ManufacturerSpecific(data) => write!(f, "{} {}", name, data),
            Self::PivData(request) => write!(f, "{} {}", name, request),
            Self::KeepActive(time) => write!(f, "{} {} ms", name, time),
            _ => write!(f, "{}", name),
        }
    }
}

fn decode_records<T: PayloadData>(name: &'static str, data: &[u8], size: usize) -> Result<Vec<T>> {
    expect_min_len(name, data, size)?;
    expect_records(name, data, size)?;
    data.chunks_exact(size).map(T::decode).collect()
}

/// Which identification report the ACU asks for
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IdReportType {
    /// Fixed 12-byte `osdp_PDID`
    Standard,
    /// Tagged records in `osdp_PDID`
    Extended,
    Unknown(u8),
}

impl From<u8> for IdReportType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Standard,
            0x01 => Self::Extended,
            other => Self::Unknown(other),
        }
    }
}

impl From<IdReportType> for u8 {
    fn from(report_type: IdReportType) -> u8 {
        match report_type {
            IdReportType::Standard => 0x00,
            IdReportType::Extended => 0x01,
            IdReportType::Unknown(value) => value,
        }
    }
}

/// One record of `osdp_OUT`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OutputControl {
    pub output_number: u8,
    pub control_code: OutputControlCode,
    /// Timer in 100 ms units
    pub timer: u16,
}

impl OutputControl {
    pub const SIZE: usize = 4;
}

impl PayloadData for OutputControl {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.output_number);
        buf.put_u8(self.control_code.into());
        buf.put_u16_le(self.timer);
    }

    fn decode(data: &[u8]) -> Result<Self> {
        expect_len("osdp_OUT", data, Self::SIZE)?;
        Ok(Self {
            output_number: data[0],
            control_code: OutputControlCode::try_from(data[1])?,
            timer: LittleEndian::read_u16(&data[2..4]),
        })
    }
}

impl fmt::Display for OutputControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "output {}: {:?} timer={}",
            self.output_number, self.control_code, self.timer
        )
    }
}

/// Temporary part of an LED record
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TemporaryLed {
    pub control_code: TemporaryLedControlCode,
    /// On time in 100 ms units
    pub on_time: u8,
    pub off_time: u8,
    pub on_color: LedColor,
    pub off_color: LedColor,
    /// Duration of the temporary state in 100 ms units
    pub timer: u16,
}

impl Default for TemporaryLed {
    fn default() -> Self {
        Self {
            control_code: TemporaryLedControlCode::Nop,
            on_time: 0,
            off_time: 0,
            on_color: LedColor::Black,
            off_color: LedColor::Black,
            timer: 0,
        }
    }
}

/// Permanent part of an LED record
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PermanentLed {
    pub control_code: PermanentLedControlCode,
    pub on_time: u8,
    pub off_time: u8,
    pub on_color: LedColor,
    pub off_color: LedColor,
}

impl PermanentLed {
    /// Steady colour
    pub fn solid(color: LedColor) -> Self {
        Self {
            control_code: PermanentLedControlCode::SetPermanentState,
            on_time: 1,
            off_time: 0,
            on_color: color,
            off_color: LedColor::Black,
        }
    }
}

impl Default for PermanentLed {
    fn default() -> Self {
        Self {
            control_code: PermanentLedControlCode::Nop,
            on_time: 0,
            off_time: 0,
            on_color: LedColor::Black,
            off_color: LedColor::Black,
        }
    }
}

/// One record of `osdp_LED`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReaderLedControl {
    pub reader_number: u8,
    pub led_number: u8,
    pub temporary: TemporaryLed,
    pub permanent: PermanentLed,
}

impl ReaderLedControl {
    pub const SIZE: usize = 14;
}

impl PayloadData for ReaderLedControl {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.reader_number);
        buf.put_u8(self.led_number);

        let t = &self.temporary;
        buf.put_u8(t.control_code.into());
        buf.put_u8(t.on_time);
        buf.put_u8(t.off_time);
        buf.put_u8(t.on_color.into());
        buf.put_u8(t.off_color.into());
        buf.put_u16_le(t.timer);

        let p = &self.permanent;
        buf.put_u8(p.control_code.into());
        buf.put_u8(p.on_time);
        buf.put_u8(p.off_time);
        buf.put_u8(p.on_color.into());
        buf.put_u8(p.off_color.into());
    }

    fn decode(data: &[u8]) -> Result<Self> {
        expect_len("osdp_LED", data, Self::SIZE)?;
        Ok(Self {
            reader_number: data[0],
            led_number: data[1],
            temporary: TemporaryLed {
                control_code: TemporaryLedControlCode::try_from(data[2])?,
                on_time: data[3],
                off_time: data[4],
                on_color: LedColor::try_from(data[5])?,
                off_color: LedColor::try_from(data[6])?,
                timer: LittleEndian::read_u16(&data[7..9]),
            },
            permanent: PermanentLed {
                control_code: PermanentLedControlCode::try_from(data[9])?,
                on_time: data[10],
                off_time: data[11],
                on_color: LedColor::try_from(data[12])?,
                off_color: LedColor::try_from(data[13])?,
            },
        })
    }
}

impl fmt::Display for ReaderLedControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reader {} led {}: temporary {:?} {}/{}, permanent {:?} {}/{}",
            self.reader_number,
            self.led_number,
            self.temporary.control_code,
            self.temporary.on_color,
            self.temporary.off_color,
            self.permanent.control_code,
            self.permanent.on_color,
            self.permanent.off_color
        )
    }
}

/// `osdp_BUZ`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReaderBuzzerControl {
    pub reader_number: u8,
    pub tone: ToneCode,
    /// On time in 100 ms units
    pub on_time: u8,
    pub off_time: u8,
    /// Number of cycles, 0 for continuous
    pub count: u8,
}

impl PayloadData for ReaderBuzzerControl {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.reader_number);
        buf.put_u8(self.tone.into());
        buf.put_u8(self.on_time);
        buf.put_u8(self.off_time);
        buf.put_u8(self.count);
    }

    fn decode(data: &[u8]) -> Result<Self> {
        expect_len("osdp_BUZ", data, 5)?;
        Ok(Self {
            reader_number: data[0],
            tone: ToneCode::try_from(data[1])?,
            on_time: data[2],
            off_time: data[3],
            count: data[4],
        })
    }
}

impl fmt::Display for ReaderBuzzerControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reader {}: {:?} on={} off={} count={}",
            self.reader_number, self.tone, self.on_time, self.off_time, self.count
        )
    }
}

/// `osdp_TEXT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderTextOutput {
    pub reader_number: u8,
    pub command: TextCommand,
    /// Seconds a temporary text stays up
    pub temporary_time: u8,
    pub row: u8,
    pub column: u8,
    /// At most 255 bytes are sent
    pub text: String,
}

impl PayloadData for ReaderTextOutput {
    fn encode(&self, buf: &mut BytesMut) {
        // At most 255 bytes, cut on a character boundary
        let mut end = self.text.len().min(u8::MAX as usize);
        while !self.text.is_char_boundary(end) {
            end -= 1;
        }
        let text = &self.text.as_bytes()[..end];
        buf.put_u8(self.reader_number);
        buf.put_u8(self.command.into());
        buf.put_u8(self.temporary_time);
        buf.put_u8(self.row);
        buf.put_u8(self.column);
        buf.put_u8(text.len() as u8);
        buf.put_slice(text);
    }

    fn decode(data: &[u8]) -> Result<Self> {
        expect_min_len("osdp_TEXT", data, 6)?;
        let length = data[5] as usize;
        expect_len("osdp_TEXT", data, 6 + length)?;

        let text = String::from_utf8(data[6..].to_vec())
            .map_err(|e| Error::Decode(format!("osdp_TEXT text is not UTF-8: {}", e)))?;

        Ok(Self {
            reader_number: data[0],
            command: TextCommand::try_from(data[1])?,
            temporary_time: data[2],
            row: data[3],
            column: data[4],
            text,
        })
    }
}

impl fmt::Display for ReaderTextOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reader {} row {} col {}: {:?}",
            self.reader_number, self.row, self.column, self.text
        )
    }
}

/// Address and baud rate, used by `osdp_COMSET` and `osdp_COM`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CommunicationConfiguration {
    pub address: u8,
    pub baud_rate: u32,
}

impl PayloadData for CommunicationConfiguration {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.address);
        buf.put_u32_le(self.baud_rate);
    }

    fn decode(data: &[u8]) -> Result<Self> {
        expect_len("communication configuration", data, 5)?;
        Ok(Self {
            address: data[0],
            baud_rate: LittleEndian::read_u32(&data[1..5]),
        })
    }
}

impl fmt::Display for CommunicationConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "address={} baud={}", self.address, self.baud_rate)
    }
}

/// `osdp_KEYSET`
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    pub key_type: KeyType,
    pub key: Vec<u8>,
}

impl EncryptionKey {
    /// New secure channel base key
    pub fn secure_channel_base_key(key: [u8; 16]) -> Self {
        Self {
            key_type: KeyType::SecureChannelBaseKey,
            key: key.to_vec(),
        }
    }

    /// The key as an SCBK, if it is one
    pub fn as_base_key(&self) -> Option<[u8; 16]> {
        match self.key_type {
            KeyType::SecureChannelBaseKey if self.key.len() == 16 => Some(array(&self.key)),
            _ => None,
        }
    }
}

impl PayloadData for EncryptionKey {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.key_type.into());
        buf.put_u8(self.key.len() as u8);
        buf.put_slice(&self.key);
    }

    fn decode(data: &[u8]) -> Result<Self> {
        expect_min_len("osdp_KEYSET", data, 2)?;
        expect_len("osdp_KEYSET", data, 2 + data[1] as usize)?;
        Ok(Self {
            key_type: KeyType::from(data[0]),
            key: data[2..].to_vec(),
        })
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key_type", &self.key_type)
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl fmt::Display for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({} bytes)", self.key_type, self.key.len())
    }
}

/// One fragment of `osdp_FILETRANSFER`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferFragment {
    pub file_type: u8,
    pub total_size: u32,
    pub offset: u32,
    pub data: Vec<u8>,
}

impl PayloadData for FileTransferFragment {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.file_type);
        buf.put_u32_le(self.total_size);
        buf.put_u32_le(self.offset);
        buf.put_u16_le(self.data.len() as u16);
        buf.put_slice(&self.data);
    }

    fn decode(data: &[u8]) -> Result<Self> {
        expect_min_len("osdp_FILETRANSFER", data, 11)?;
        let fragment_len = LittleEndian::read_u16(&data[9..11]) as usize;
        expect_len("osdp_FILETRANSFER", data, 11 + fragment_len)?;

        Ok(Self {
            file_type: data[0],
            total_size: LittleEndian::read_u32(&data[1..5]),
            offset: LittleEndian::read_u32(&data[5..9]),
            data: data[11..].to_vec(),
        })
    }
}

impl fmt::Display for FileTransferFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type={} offset={} len={} total={}",
            self.file_type,
            self.offset,
            self.data.len(),
            self.total_size
        )
    }
}

/// Vendor code and opaque data, used by `osdp_MFG` and `osdp_MFGREP`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerData {
    pub vendor_code: [u8; 3],
    pub data: Vec<u8>,
}

impl PayloadData for ManufacturerData {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.vendor_code);
        buf.put_slice(&self.data);
    }

    fn decode(data: &[u8]) -> Result<Self> {
        expect_min_len("manufacturer data", data, 3)?;
        Ok(Self {
            vendor_code: array(data),
            data: data[3..].to_vec(),
        })
    }
}

impl fmt::Display for ManufacturerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vendor={} data={}",
            hex::encode_upper(self.vendor_code),
            hex::encode_upper(&self.data)
        )
    }
}

/// Offset field of `osdp_PIVDATA`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PivOffset {
    /// Deprecated one-byte form
    Short(u8),
    Long(u16),
}

impl PivOffset {
    pub fn value(self) -> u16 {
        match self {
            Self::Short(offset) => offset as u16,
            Self::Long(offset) => offset,
        }
    }
}

/// `osdp_PIVDATA`: read part of a PIV data object
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GetPivData {
    pub object_id: [u8; 3],
    pub element_id: u8,
    pub offset: PivOffset,
}

impl GetPivData {
    pub fn new(object_id: [u8; 3], element_id: u8, offset: u16) -> Self {
        Self {
            object_id,
            element_id,
            offset: PivOffset::Long(offset),
        }
    }

    /// Request using the one-byte offset some older readers expect
    #[deprecated(note = "use `GetPivData::new` with a two-byte offset")]
    pub fn with_short_offset(object_id: [u8; 3], element_id: u8, offset: u8) -> Self {
        Self {
            object_id,
            element_id,
            offset: PivOffset::Short(offset),
        }
    }
}

impl PayloadData for GetPivData {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.object_id);
        buf.put_u8(self.element_id);
        match self.offset {
            PivOffset::Short(offset) => buf.put_u8(offset),
            PivOffset::Long(offset) => buf.put_u16_le(offset),
        }
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let offset = match data.len() {
            5 => PivOffset::Short(data[4]),
            6 => PivOffset::Long(LittleEndian::read_u16(&data[4..6])),
            actual => return Err(Error::payload_length("osdp_PIVDATA", "5 or 6", actual)),
        };

        Ok(Self {
            object_id: array(data),
            element_id: data[3],
            offset,
        })
    }
}

impl fmt::Display for GetPivData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "object={} element={} offset={}",
            hex::encode_upper(self.object_id),
            self.element_id,
            self.offset.value()
        )
    }
}
