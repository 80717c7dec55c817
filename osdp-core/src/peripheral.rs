//! Peripheral side state of the link
//!
//! [`PeripheralSession`] decides what happens to every received command
//! before any application code sees it: repeated sequence numbers get the
//! cached reply, security violations get a NAK, and the secure channel
//! handshake is answered here. What is left is handed out as
//! [`PeripheralAction::Dispatch`].

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use osdp_types::NakErrorCode;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::{
    constants::{BROADCAST_ADDRESS, DEFAULT_SECURE_CHANNEL_KEY},
    control::{Control, next_sequence},
    error::{Error, Result},
    message::{FrameHeader, IncomingMessage},
    payload::{ClientCryptogram, Command, Reply},
    secure_channel::{SecureChannel, SharedSecurityContext},
    security::SecurityContext,
    security_block::SecurityBlockType,
};

/// What to do with a received frame
#[derive(Debug)]
pub enum PeripheralAction {
    /// Not for this device, or corrupted
    Ignore,

    /// Send this frame back as is
    Send(BytesMut),

    /// Hand the command to the application and answer with
    /// [`PeripheralSession::reply`]
    Dispatch {
        command: Command,
        message: IncomingMessage,
    },
}

/// Peripheral side session
#[derive(Debug)]
pub struct PeripheralSession {
    address: u8,
    client_uid: [u8; 8],
    key: Option<[u8; 16]>,
    install_mode: bool,
    require_secure_channel: bool,
    context: SharedSecurityContext,
    command_channel: SecureChannel,
    reply_channel: SecureChannel,
    last_sequence: Option<u8>,
    last_reply: Option<Bytes>,
    pending: Option<Command>,
}

impl PeripheralSession {
    /// Create a session for `address`
    ///
    /// `client_uid` is reported in `osdp_CCRYPT`. Without a `key` the device
    /// only accepts SCBK-D.
    pub fn new(address: u8, client_uid: [u8; 8], key: Option<[u8; 16]>) -> Self {
        let context = Arc::new(Mutex::new(SecurityContext::new(key)));
        let (command_channel, reply_channel) = SecureChannel::pair(context.clone());

        Self {
            address,
            client_uid,
            key,
            install_mode: false,
            require_secure_channel: false,
            context,
            command_channel,
            reply_channel,
            last_sequence: None,
            last_reply: None,
            pending: None,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Accept SCBK-D even with a key configured
    pub fn set_install_mode(&mut self, install_mode: bool) {
        self.install_mode = install_mode;
    }

    pub fn is_install_mode(&self) -> bool {
        self.install_mode
    }

    /// Refuse everything but the handshake until the channel is up
    pub fn set_require_secure_channel(&mut self, required: bool) {
        self.require_secure_channel = required;
    }

    pub fn is_secure_channel_established(&self) -> bool {
        self.command_channel.is_security_established()
    }

    /// Base key currently configured, `None` for SCBK-D only
    pub fn key(&self) -> Option<[u8; 16]> {
        self.key
    }

    /// Process one received frame
    ///
    /// # Errors
    ///
    /// Frames that cannot be parsed at all. Nothing should be sent back.
    pub fn receive(&mut self, frame: &[u8]) -> Result<PeripheralAction> {
        let header = FrameHeader::peek(frame)?;
        if header.is_reply
            || (header.address != self.address && header.address != BROADCAST_ADDRESS)
        {
            return Ok(PeripheralAction::Ignore);
        }

        let sequence = header.control.sequence();
        if sequence != 0 && self.last_sequence == Some(sequence) {
            if let Some(cached) = &self.last_reply {
                debug!(sequence, "Repeated command, resending last reply");
                return Ok(PeripheralAction::Send(BytesMut::from(&cached[..])));
            }
        }

        let message = match IncomingMessage::parse(frame, Some(&self.command_channel)) {
            Ok(message) => message,
            Err(err) if err.is_security_error() => {
                warn!(error = %err, "Dropping secure channel");
                self.drop_secure_channel();
                return self.reject(header.control, NakErrorCode::UnsupportedSecurityBlock);
            }
            Err(err) => return Err(err),
        };

        if !message.is_data_correct() {
            debug!("Ignoring corrupted command");
            return Ok(PeripheralAction::Ignore);
        }

        if sequence == 0 {
            self.last_reply = None;
        } else if let Some(last) = self.last_sequence {
            // A repeat without a cached reply follows BUSY and is processed again
            if sequence != last && sequence != next_sequence(last) {
                warn!(expected = next_sequence(last), actual = sequence, "Unexpected sequence");
                return self.reject(message.control(), NakErrorCode::UnexpectedSequenceNumber);
            }
        }

        if let Some(code) = self.check_security(&message) {
            return self.reject(message.control(), code);
        }

        let command = match Command::parse(message.function_code(), message.payload()) {
            Ok(command) => command,
            Err(err) => {
                warn!(error = %err, "Command rejected");
                let code = match err {
                    Error::UnknownCommand(_) => NakErrorCode::UnknownCommandCode,
                    Error::InvalidPayloadLength { .. } => NakErrorCode::InvalidCommandLength,
                    _ => NakErrorCode::UnableToProcessCommand,
                };
                return self.respond(&message, &Reply::nak(code), false).map(PeripheralAction::Send);
            }
        };

        trace!("Received {}", command);

        match command {
            Command::Challenge(server_random) => self.answer_challenge(&message, &server_random),
            Command::ServerCryptogram(cryptogram) => {
                self.answer_server_cryptogram(&message, &cryptogram)
            }
            Command::KeySet(_) if !self.is_secure_channel_established() => {
                self.reject(message.control(), NakErrorCode::EncryptionRequired)
            }
            command => {
                self.pending = Some(command.clone());
                Ok(PeripheralAction::Dispatch { command, message })
            }
        }
    }

    /// Encode the application's reply to a dispatched command
    ///
    /// An accepted `osdp_KEYSET` installs the new key and an accepted
    /// `osdp_COMSET` moves the device to the new address, both after the
    /// reply is built.
    pub fn reply(&mut self, message: &IncomingMessage, reply: &Reply) -> Result<BytesMut> {
        let secure = message.is_secure();
        let frame = self.respond(message, reply, secure)?;

        match (self.pending.take(), reply) {
            (Some(Command::KeySet(key)), Reply::Ack) => {
                if let Some(key) = key.as_base_key() {
                    self.key = Some(key);
                    self.install_mode = false;
                    self.drop_secure_channel();
                    info!("Secure channel base key replaced");
                }
            }
            (Some(Command::CommunicationSet(_)), Reply::CommunicationConfiguration(applied)) => {
                info!(from = self.address, to = applied.address, "Address changed");
                self.address = applied.address;
                self.last_sequence = None;
                self.last_reply = None;
            }
            _ => {}
        }

        Ok(frame)
    }

    fn check_security(&mut self, message: &IncomingMessage) -> Option<NakErrorCode> {
        let established = self.is_secure_channel_established();
        let handshake = message
            .security_block_type()
            .is_some_and(SecurityBlockType::is_handshake);

        if message.is_secure() {
            if !established {
                warn!("Secure message without a secure channel");
                return Some(NakErrorCode::UnsupportedSecurityBlock);
            }

            if !message.is_valid_mac() {
                warn!("MAC mismatch, dropping secure channel");
                self.drop_secure_channel();
                return Some(NakErrorCode::UnsupportedSecurityBlock);
            }

            return None;
        }

        if handshake {
            return None;
        }

        if established {
            if self.require_secure_channel {
                return Some(NakErrorCode::EncryptionRequired);
            }
            debug!("Plain command, leaving secure channel");
            self.drop_secure_channel();
        } else if self.require_secure_channel {
            return Some(NakErrorCode::EncryptionRequired);
        }

        None
    }

    fn answer_challenge(
        &mut self,
        message: &IncomingMessage,
        server_random: &[u8; 8],
    ) -> Result<PeripheralAction> {
        let wants_default = message
            .security_block()
            .is_none_or(|block| block.uses_default_key());

        let key = match (wants_default, self.key) {
            (true, None) => DEFAULT_SECURE_CHANNEL_KEY,
            (true, Some(_)) if self.install_mode => DEFAULT_SECURE_CHANNEL_KEY,
            (false, Some(key)) => key,
            _ => {
                warn!(default_key = wants_default, "Challenge for a key this device does not hold");
                return self.reject(message.control(), NakErrorCode::UnsupportedSecurityBlock);
            }
        };

        let ccrypt = {
            let mut context = self.context.lock();
            context.reset(Some(key));
            let cryptogram = context.initialize_as_peripheral(server_random);
            ClientCryptogram {
                client_uid: self.client_uid,
                client_random: *context.client_random(),
                cryptogram,
            }
        };

        debug!(default_key = wants_default, "Answering secure channel challenge");
        self.respond(message, &Reply::ClientCryptogram(ccrypt), true)
            .map(PeripheralAction::Send)
    }

    fn answer_server_cryptogram(
        &mut self,
        message: &IncomingMessage,
        cryptogram: &[u8; 16],
    ) -> Result<PeripheralAction> {
        let rmac = {
            let context = self.context.lock();
            context
                .verify_server_cryptogram(cryptogram)
                .and_then(|_| context.initial_rmac())
        };

        let rmac = match rmac {
            Ok(rmac) => rmac,
            Err(err) => {
                warn!(error = %err, "Server cryptogram rejected");
                self.drop_secure_channel();
                return self.reject(message.control(), NakErrorCode::UnsupportedSecurityBlock);
            }
        };

        let frame = self.respond(message, &Reply::InitialRMac(rmac), true)?;
        self.context.lock().establish(rmac)?;

        info!("Secure channel established");
        Ok(PeripheralAction::Send(frame))
    }

    /// Plain NAK that leaves the sequence bookkeeping alone
    fn reject(&self, control: Control, code: NakErrorCode) -> Result<PeripheralAction> {
        let control = Control::new(control.sequence(), control.use_crc(), false);
        Reply::nak(code)
            .build_frame(self.address, control, None)
            .map(PeripheralAction::Send)
    }

    fn respond(&mut self, message: &IncomingMessage, reply: &Reply, secure: bool) -> Result<BytesMut> {
        let control = Control::new(message.sequence(), message.control().use_crc(), false);
        let channel = secure.then_some(&self.reply_channel);
        let frame = reply.build_frame(self.address, control, channel)?;

        self.last_sequence = Some(message.sequence());
        self.last_reply = (!matches!(reply, Reply::Busy)).then(|| Bytes::copy_from_slice(&frame));

        trace!("Sending {}", reply);
        Ok(frame)
    }

    fn drop_secure_channel(&mut self) {
        self.context.lock().reset(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        payload::IdReportType,
        message::OutgoingMessage,
        payload::{CommunicationConfiguration, EncryptionKey},
        security::tests::SERVER_RANDOM,
        security_block::SecurityBlock,
        session::DeviceSession,
    };
    use pretty_assertions::assert_eq;

    const UID: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    fn command_frame(address: u8, sequence: u8, command: &Command) -> BytesMut {
        command
            .build_frame(address, Control::new(sequence, true, false), None)
            .unwrap()
    }

    fn sent(action: PeripheralAction) -> BytesMut {
        match action {
            PeripheralAction::Send(frame) => frame,
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    fn reply_of(frame: &[u8]) -> Reply {
        let message = IncomingMessage::parse(frame, None).unwrap();
        Reply::parse(message.function_code(), message.payload()).unwrap()
    }

    fn dispatch(pd: &mut PeripheralSession, frame: &[u8]) -> (Command, IncomingMessage) {
        match pd.receive(frame).unwrap() {
            PeripheralAction::Dispatch { command, message } => (command, message),
            other => panic!("expected dispatch, got {:?}", other),
        }
    }

    #[test]
    fn test_dispatches_plain_command() {
        let mut pd = PeripheralSession::new(1, UID, None);
        let frame = command_frame(1, 0, &Command::IdReport(IdReportType::Standard));

        let (command, message) = dispatch(&mut pd, &frame);
        assert_eq!(command, Command::IdReport(IdReportType::Standard));
        assert_eq!(message.address(), 1);
    }

    #[test]
    fn test_ignores_other_address_and_replies() {
        let mut pd = PeripheralSession::new(1, UID, None);
        assert!(matches!(
            pd.receive(&command_frame(2, 0, &Command::Poll)).unwrap(),
            PeripheralAction::Ignore
        ));

        let reply = Reply::Ack
            .build_frame(1, Control::new(0, true, false), None)
            .unwrap();
        assert!(matches!(pd.receive(&reply).unwrap(), PeripheralAction::Ignore));
    }

    #[test]
    fn test_broadcast_is_accepted() {
        let mut pd = PeripheralSession::new(9, UID, None);
        let (command, message) = dispatch(&mut pd, &command_frame(BROADCAST_ADDRESS, 0, &Command::Poll));
        assert_eq!(command, Command::Poll);

        let frame = pd.reply(&message, &Reply::Ack).unwrap();
        assert_eq!(IncomingMessage::parse(&frame, None).unwrap().address(), 9);
    }

    #[test]
    fn test_ignores_corrupted_frame() {
        let mut pd = PeripheralSession::new(1, UID, None);
        let mut frame = command_frame(1, 0, &Command::Poll);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        assert!(matches!(pd.receive(&frame).unwrap(), PeripheralAction::Ignore));
    }

    #[test]
    fn test_repeated_sequence_gets_cached_reply() {
        let mut pd = PeripheralSession::new(1, UID, None);

        let (_, message) = dispatch(&mut pd, &command_frame(1, 0, &Command::Poll));
        pd.reply(&message, &Reply::Ack).unwrap();

        let (_, message) = dispatch(&mut pd, &command_frame(1, 1, &Command::LocalStatus));
        let first = pd
            .reply(&message, &Reply::LocalStatusReport(Default::default()))
            .unwrap();

        let again = sent(pd.receive(&command_frame(1, 1, &Command::LocalStatus)).unwrap());
        assert_eq!(again, first);
    }

    #[test]
    fn test_busy_is_not_cached() {
        let mut pd = PeripheralSession::new(1, UID, None);
        dispatch(&mut pd, &command_frame(1, 0, &Command::Poll));

        let (_, message) = dispatch(&mut pd, &command_frame(1, 1, &Command::Poll));
        pd.reply(&message, &Reply::Busy).unwrap();

        dispatch(&mut pd, &command_frame(1, 1, &Command::Poll));
    }

    #[test]
    fn test_unexpected_sequence_is_nak() {
        let mut pd = PeripheralSession::new(1, UID, None);
        let (_, message) = dispatch(&mut pd, &command_frame(1, 0, &Command::Poll));
        pd.reply(&message, &Reply::Ack).unwrap();

        let frame = sent(pd.receive(&command_frame(1, 3, &Command::Poll)).unwrap());
        assert_eq!(reply_of(&frame), Reply::nak(NakErrorCode::UnexpectedSequenceNumber));

        // Still expecting 1
        dispatch(&mut pd, &command_frame(1, 1, &Command::Poll));
    }

    #[test]
    fn test_sequence_zero_resets() {
        let mut pd = PeripheralSession::new(1, UID, None);
        let (_, message) = dispatch(&mut pd, &command_frame(1, 2, &Command::Poll));
        pd.reply(&message, &Reply::Ack).unwrap();

        dispatch(&mut pd, &command_frame(1, 0, &Command::Poll));
    }

    #[test]
    fn test_unknown_command_is_nak() {
        let mut pd = PeripheralSession::new(1, UID, None);
        let frame = OutgoingMessage::command(
            1,
            Control::new(0, true, false),
            0x7F,
            Bytes::new(),
        )
        .encode(None)
        .unwrap();

        let reply = sent(pd.receive(&frame).unwrap());
        assert_eq!(reply_of(&reply), Reply::nak(NakErrorCode::UnknownCommandCode));
    }

    #[test]
    fn test_bad_payload_length_is_nak() {
        let mut pd = PeripheralSession::new(1, UID, None);
        let frame = OutgoingMessage::command(
            1,
            Control::new(0, true, false),
            0x6A,
            Bytes::from_static(&[0x00, 0x02]),
        )
        .encode(None)
        .unwrap();

        let reply = sent(pd.receive(&frame).unwrap());
        assert_eq!(reply_of(&reply), Reply::nak(NakErrorCode::InvalidCommandLength));
    }

    #[test]
    fn test_required_secure_channel_refuses_plain_commands() {
        let mut pd = PeripheralSession::new(1, UID, None);
        pd.set_require_secure_channel(true);

        let reply = sent(pd.receive(&command_frame(1, 0, &Command::Poll)).unwrap());
        assert_eq!(reply_of(&reply), Reply::nak(NakErrorCode::EncryptionRequired));
    }

    #[test]
    fn test_keyset_requires_secure_channel() {
        let mut pd = PeripheralSession::new(1, UID, None);
        let keyset = Command::KeySet(EncryptionKey::secure_channel_base_key([7; 16]));

        let reply = sent(pd.receive(&command_frame(1, 0, &keyset)).unwrap());
        assert_eq!(reply_of(&reply), Reply::nak(NakErrorCode::EncryptionRequired));
        assert_eq!(pd.key(), None);
    }

    #[test]
    fn test_challenge_answer_matches_host() {
        let mut pd = PeripheralSession::new(1, UID, None);
        let mut host = DeviceSession::new(1, true, true, None);

        let challenge = host.connect();
        let frame = host.build_command(&challenge).unwrap();
        let reply_frame = sent(pd.receive(&frame).unwrap());

        let message = IncomingMessage::parse(&reply_frame, None).unwrap();
        assert_eq!(
            message.security_block_type(),
            Some(SecurityBlockType::SecureConnectionSequenceStep2)
        );
        assert!(message.security_block().unwrap().uses_default_key());

        match reply_of(&reply_frame) {
            Reply::ClientCryptogram(ccrypt) => {
                assert_eq!(ccrypt.client_uid, UID);
                host.context()
                    .lock()
                    .initialize_as_host(&ccrypt.client_random, &ccrypt.cryptogram)
                    .unwrap();
            }
            other => panic!("expected CCRYPT, got {}", other),
        }
    }

    #[test]
    fn test_install_mode_accepts_default_key() {
        let mut pd = PeripheralSession::new(1, UID, Some([0x44; 16]));
        let mut host = DeviceSession::new(1, true, true, None);
        let challenge = host.connect();
        let frame = host.build_command(&challenge).unwrap();

        let refused = sent(pd.receive(&frame).unwrap());
        assert_eq!(reply_of(&refused), Reply::nak(NakErrorCode::UnsupportedSecurityBlock));

        pd.set_install_mode(true);
        let challenge = host.connect();
        let frame = host.build_command(&challenge).unwrap();
        let accepted = sent(pd.receive(&frame).unwrap());
        assert!(matches!(reply_of(&accepted), Reply::ClientCryptogram(_)));
    }

    #[test]
    fn test_wrong_server_cryptogram_is_nak() {
        let mut pd = PeripheralSession::new(1, UID, None);
        let handshake_frame = |sequence, command: &Command| {
            command
                .to_message(1, Control::new(sequence, true, false), None)
                .with_security_block(SecurityBlock::new(command.security_block_type(), true))
                .encode(None)
                .unwrap()
        };

        sent(pd.receive(&handshake_frame(0, &Command::Challenge(SERVER_RANDOM))).unwrap());
        let reply = sent(
            pd.receive(&handshake_frame(1, &Command::ServerCryptogram([0; 16])))
                .unwrap(),
        );

        assert_eq!(reply_of(&reply), Reply::nak(NakErrorCode::UnsupportedSecurityBlock));
        assert!(!pd.is_secure_channel_established());
    }

    #[test]
    fn test_secure_command_without_channel_is_nak() {
        let mut pd = PeripheralSession::new(1, UID, None);
        let frame = Command::Poll
            .to_message(1, Control::new(0, true, false), None)
            .with_security_block(SecurityBlock::new(
                SecurityBlockType::CommandMessageWithNoDataSecurity,
                true,
            ))
            .encode(None)
            .unwrap();

        let reply = sent(pd.receive(&frame).unwrap());
        assert_eq!(reply_of(&reply), Reply::nak(NakErrorCode::UnsupportedSecurityBlock));
    }

    #[test]
    fn test_comset_moves_address_after_reply() {
        let mut pd = PeripheralSession::new(1, UID, None);
        let config = CommunicationConfiguration {
            address: 12,
            baud_rate: 38400,
        };

        let (command, message) = dispatch(&mut pd, &command_frame(1, 0, &Command::CommunicationSet(config)));
        assert_eq!(command, Command::CommunicationSet(config));

        let frame = pd
            .reply(&message, &Reply::CommunicationConfiguration(config))
            .unwrap();
        assert_eq!(IncomingMessage::parse(&frame, None).unwrap().address(), 1);
        assert_eq!(pd.address(), 12);

        dispatch(&mut pd, &command_frame(12, 0, &Command::Poll));
    }
}
