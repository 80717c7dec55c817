//! Host side state of one peripheral device
//!
//! A session tracks, for one PD address on a link:
//! - Link sequence number and trailer mode
//! - Secure channel context and the handshake step
//! - Connection state
//!
//! It does no I/O. The bus task builds frames with
//! [`build_command`](DeviceSession::build_command), feeds received frames to
//! [`receive_reply`](DeviceSession::receive_reply) and drives the state with
//! the result.

use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::{
    control::LinkSequence,
    error::{Error, Result},
    message::{FrameHeader, IncomingMessage},
    payload::{Command, Reply},
    secure_channel::{SecureChannel, SharedSecurityContext},
    security::SecurityContext,
};

/// Connection state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not talking to the device
    Disconnected,

    /// Secure channel handshake in progress
    SecureChannelPending,

    /// Secure channel up, commands flow
    Established,

    /// Plain link up, commands flow
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    Idle,
    AwaitingClientCryptogram,
    AwaitingInitialRMac,
}

/// A reply that belongs to the outstanding command
#[derive(Debug, Clone)]
pub struct ReceivedReply {
    pub message: IncomingMessage,
    pub reply: Reply,
}

/// Host side session of one device
#[derive(Debug)]
pub struct DeviceSession {
    address: u8,
    sequence: LinkSequence,
    secure_channel: bool,
    context: SharedSecurityContext,
    command_channel: SecureChannel,
    reply_channel: SecureChannel,
    state: SessionState,
    handshake: Handshake,
}

impl DeviceSession {
    /// Create a disconnected session
    ///
    /// With `secure_channel` set, the session runs the handshake on connect
    /// using `key`, or SCBK-D when `None`.
    pub fn new(address: u8, use_crc: bool, secure_channel: bool, key: Option<[u8; 16]>) -> Self {
        let context = Arc::new(Mutex::new(SecurityContext::new(key)));
        let (command_channel, reply_channel) = SecureChannel::pair(context.clone());

        Self {
            address,
            sequence: LinkSequence::new(use_crc),
            secure_channel,
            context,
            command_channel,
            reply_channel,
            state: SessionState::Disconnected,
            handshake: Handshake::Idle,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Follow an accepted `osdp_COMSET`
    pub fn set_address(&mut self, address: u8) {
        debug!(from = self.address, to = address, "Device address changed");
        self.address = address;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Commands can flow
    pub fn is_online(&self) -> bool {
        matches!(self.state, SessionState::Established | SessionState::Ready)
    }

    pub fn uses_secure_channel(&self) -> bool {
        self.secure_channel
    }

    pub fn is_secure_channel_established(&self) -> bool {
        self.command_channel.is_security_established()
    }

    /// Whether the secure channel runs on SCBK-D; always false on a plain link
    pub fn is_using_default_key(&self) -> bool {
        self.secure_channel && self.command_channel.is_using_default_key()
    }

    pub fn sequence(&self) -> u8 {
        self.sequence.current()
    }

    pub fn context(&self) -> &SharedSecurityContext {
        &self.context
    }

    /// Start (or restart) talking to the device
    ///
    /// Resets the sequence to zero. Returns the first command to send: the
    /// challenge on a secure link, a poll otherwise.
    pub fn connect(&mut self) -> Command {
        self.sequence.reset();

        if self.secure_channel {
            let mut context = self.context.lock();
            context.reset(None);
            self.state = SessionState::SecureChannelPending;
            self.handshake = Handshake::AwaitingClientCryptogram;

            debug!(address = self.address, "Starting secure channel handshake");
            Command::Challenge(*context.server_random())
        } else {
            self.state = SessionState::Disconnected;
            self.handshake = Handshake::Idle;
            Command::Poll
        }
    }

    /// Drop back to `Disconnected`; the next connect starts over
    pub fn disconnect(&mut self) {
        if self.state != SessionState::Disconnected {
            info!(address = self.address, "Device disconnected");
        }

        self.state = SessionState::Disconnected;
        self.handshake = Handshake::Idle;
        self.sequence.reset();
        self.context.lock().reset(None);
    }

    /// Install a new base key; the channel has to be set up again
    pub fn rotate_key(&mut self, key: [u8; 16]) {
        self.context.lock().reset(Some(key));
        self.state = SessionState::Disconnected;
        self.handshake = Handshake::Idle;
        self.sequence.reset();

        info!(address = self.address, "Secure channel key rotated");
    }

    /// Encode `command` at the current sequence number
    ///
    /// # Errors
    ///
    /// On a secure link only handshake commands may be sent before the
    /// channel is established.
    pub fn build_command(&self, command: &Command) -> Result<BytesMut> {
        if self.secure_channel
            && !self.is_secure_channel_established()
            && !command.code().is_handshake()
        {
            return Err(Error::SecureChannelNotEstablished);
        }

        let channel = self.secure_channel.then_some(&self.command_channel);
        let frame = command.build_frame(self.address, self.sequence.control(false), channel)?;

        trace!(address = self.address, sequence = self.sequence.current(), "Sending {}", command);
        Ok(frame)
    }

    /// Check a received frame against the outstanding `command`
    ///
    /// Returns `None` for frames to skip: other addresses, commands, stale
    /// sequence numbers and corrupted frames.
    ///
    /// # Errors
    ///
    /// - MAC mismatch, or a plain reply on an established channel
    /// - Reply payload that does not decode. The device has already moved
    ///   on, so the sequence advances as for an accepted reply.
    pub fn receive_reply(
        &mut self,
        command: &Command,
        frame: &[u8],
    ) -> Result<Option<ReceivedReply>> {
        let header = FrameHeader::peek(frame)?;
        if !header.is_reply || header.address != self.address {
            trace!(address = header.address, "Skipping frame for another device");
            return Ok(None);
        }

        if header.control.sequence() != self.sequence.current() {
            debug!(
                expected = self.sequence.current(),
                actual = header.control.sequence(),
                "Skipping reply with stale sequence"
            );
            return Ok(None);
        }

        let channel = self.secure_channel.then_some(&self.reply_channel);
        let message = IncomingMessage::parse(frame, channel)?;

        if !message.is_data_correct() {
            return Ok(None);
        }

        if self.is_secure_channel_established() {
            if !message.is_secure() {
                warn!(address = self.address, "Plain reply on secure channel");
                return Err(Error::UnsecuredMessage {
                    address: self.address,
                });
            }

            if !message.is_valid_mac() {
                return Err(Error::MacMismatch {
                    address: self.address,
                });
            }
        }

        let reply = match Reply::decode_for(command, message.function_code(), message.payload()) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(address = self.address, error = %err, "Undecodable reply to {}", command.code());
                self.sequence.advance();
                return Err(err);
            }
        };
        trace!(address = self.address, "Received {}", reply);

        Ok(Some(ReceivedReply { message, reply }))
    }

    /// Move past an accepted reply
    ///
    /// `BUSY` does not count: the command is sent again with the same
    /// sequence number. A plain link comes up on its first reply.
    pub fn accept_reply(&mut self, reply: &Reply) {
        if matches!(reply, Reply::Busy) {
            return;
        }

        self.sequence.advance();

        if !self.secure_channel && self.state == SessionState::Disconnected {
            self.state = SessionState::Ready;
            info!(address = self.address, "Device online");
        }
    }

    /// Drive the handshake with the reply to a handshake command
    ///
    /// Returns the next command to send, or `None` once the channel is
    /// established.
    ///
    /// # Errors
    ///
    /// Any unexpected reply or failed cryptogram check. The caller should
    /// [`disconnect`](Self::disconnect).
    pub fn handle_handshake_reply(&mut self, reply: &Reply) -> Result<Option<Command>> {
        match (self.handshake, reply) {
            (Handshake::AwaitingClientCryptogram, Reply::ClientCryptogram(ccrypt)) => {
                let mut context = self.context.lock();
                context.initialize_as_host(&ccrypt.client_random, &ccrypt.cryptogram)?;
                self.handshake = Handshake::AwaitingInitialRMac;

                debug!(
                    address = self.address,
                    client_uid = %hex::encode(ccrypt.client_uid),
                    "Client cryptogram accepted"
                );
                Ok(Some(Command::ServerCryptogram(*context.server_cryptogram())))
            }
            (Handshake::AwaitingInitialRMac, Reply::InitialRMac(rmac)) => {
                let mut context = self.context.lock();
                if context.initial_rmac()? != *rmac {
                    return Err(Error::AuthenticationFailed(
                        "initial R-MAC does not match".into(),
                    ));
                }

                context.establish(*rmac)?;
                self.handshake = Handshake::Idle;
                self.state = SessionState::Established;

                info!(
                    address = self.address,
                    default_key = context.is_using_default_key(),
                    "Secure channel established"
                );
                Ok(None)
            }
            (_, Reply::Nak(nak)) => Err(Error::Nak {
                address: self.address,
                code: nak.code,
            }),
            (step, other) => Err(Error::UnexpectedReply(format!(
                "{} during handshake step {:?}",
                other, step
            ))),
        }
    }
}
