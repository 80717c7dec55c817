//! Peripheral device API
//!
//! A [`Peripheral`] answers one control panel over a transport. Commands are
//! handed to a [`CommandHandler`]; the handshake, sequence checks and the
//! secure channel are handled before it sees anything. Card reads and other
//! device-originated reports are queued through a [`PeripheralHandle`] and
//! go out as replies to `osdp_POLL`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use osdp_core::payload::{
    CommunicationConfiguration, EncryptionKey, FileTransferFragment, GetPivData, IdReportType,
    KeypadData, ManufacturerData, OutputControl, RawCardData, ReaderBuzzerControl,
    ReaderLedControl, ReaderTextOutput,
};
use osdp_core::{Command, FrameReader, PeripheralAction, PeripheralSession, Reply};
use osdp_transport::Transport;
use osdp_types::NakErrorCode;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::{
    error::{Error, Result},
    options::PeripheralOptions,
};

fn unsupported() -> Reply {
    Reply::nak(NakErrorCode::UnknownCommandCode)
}

/// Application side of a peripheral
///
/// Every method has a default that refuses the command with NAK
/// `UnknownCommandCode`, so a handler only implements what the device
/// supports. `osdp_POLL` and the secure channel handshake never reach the
/// handler.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn id_report(&self, _kind: IdReportType) -> Reply {
        unsupported()
    }

    async fn device_capabilities(&self) -> Reply {
        unsupported()
    }

    async fn local_status(&self) -> Reply {
        unsupported()
    }

    async fn input_status(&self) -> Reply {
        unsupported()
    }

    async fn output_status(&self) -> Reply {
        unsupported()
    }

    async fn reader_status(&self) -> Reply {
        unsupported()
    }

    async fn output_control(&self, _controls: &[OutputControl]) -> Reply {
        unsupported()
    }

    async fn reader_led_control(&self, _leds: &[ReaderLedControl]) -> Reply {
        unsupported()
    }

    async fn reader_buzzer_control(&self, _buzzer: &ReaderBuzzerControl) -> Reply {
        unsupported()
    }

    async fn reader_text_output(&self, _text: &ReaderTextOutput) -> Reply {
        unsupported()
    }

    /// Reply with `Reply::CommunicationConfiguration` to accept; the device
    /// moves to the reported address afterwards
    async fn communication_configuration(&self, _config: &CommunicationConfiguration) -> Reply {
        unsupported()
    }

    /// Reply with `Reply::Ack` to accept; the key is installed afterwards
    async fn key_set(&self, _key: &EncryptionKey) -> Reply {
        unsupported()
    }

    async fn max_reply_size(&self, _size: u16) -> Reply {
        unsupported()
    }

    async fn file_transfer(&self, _fragment: &FileTransferFragment) -> Reply {
        unsupported()
    }

    async fn manufacturer_specific(&self, _data: &ManufacturerData) -> Reply {
        unsupported()
    }

    async fn abort(&self) -> Reply {
        unsupported()
    }

    async fn piv_data(&self, _request: &GetPivData) -> Reply {
        unsupported()
    }

    async fn keep_active(&self, _milliseconds: u16) -> Reply {
        unsupported()
    }
}

/// Handler that supports nothing beyond polling
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl CommandHandler for NoopHandler {}

async fn dispatch(handler: &dyn CommandHandler, command: &Command) -> Reply {
    match command {
        Command::IdReport(kind) => handler.id_report(*kind).await,
        Command::DeviceCapabilities => handler.device_capabilities().await,
        Command::LocalStatus => handler.local_status().await,
        Command::InputStatus => handler.input_status().await,
        Command::OutputStatus => handler.output_status().await,
        Command::ReaderStatus => handler.reader_status().await,
        Command::OutputControl(controls) => handler.output_control(controls).await,
        Command::ReaderLedControl(leds) => handler.reader_led_control(leds).await,
        Command::ReaderBuzzerControl(buzzer) => handler.reader_buzzer_control(buzzer).await,
        Command::ReaderTextOutput(text) => handler.reader_text_output(text).await,
        Command::CommunicationSet(config) => handler.communication_configuration(config).await,
        Command::KeySet(key) => handler.key_set(key).await,
        Command::MaxReplySize(size) => handler.max_reply_size(*size).await,
        Command::FileTransfer(fragment) => handler.file_transfer(fragment).await,
        Command::ManufacturerSpecific(data) => handler.manufacturer_specific(data).await,
        Command::Abort => handler.abort().await,
        Command::PivData(request) => handler.piv_data(request).await,
        Command::KeepActive(milliseconds) => handler.keep_active(*milliseconds).await,
        Command::Poll | Command::Challenge(_) | Command::ServerCryptogram(_) => {
            Reply::nak(NakErrorCode::UnableToProcessCommand)
        }
    }
}

/// Cloneable access to a running peripheral
#[derive(Clone)]
pub struct PeripheralHandle {
    queue: Arc<Mutex<VecDeque<Reply>>>,
    stop: Arc<watch::Sender<bool>>,
}

impl PeripheralHandle {
    /// Report a card read on the next poll
    pub fn queue_card_read(&self, card: RawCardData) {
        self.queue_reply(Reply::RawReaderData(card));
    }

    /// Report keypad input on the next poll
    pub fn queue_keypad(&self, keys: KeypadData) {
        self.queue_reply(Reply::KeypadData(keys));
    }

    /// Answer a future poll with `reply`
    pub fn queue_reply(&self, reply: Reply) {
        trace!("Queued {}", reply);
        self.queue.lock().push_back(reply);
    }

    /// Replies waiting for a poll
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Make [`Peripheral::run`] return
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// An OSDP peripheral device
pub struct Peripheral<T> {
    transport: T,
    session: PeripheralSession,
    reader: FrameReader,
    handler: Box<dyn CommandHandler>,
    queue: Arc<Mutex<VecDeque<Reply>>>,
    stop_sender: Arc<watch::Sender<bool>>,
    stop: watch::Receiver<bool>,
}

impl<T: Transport> Peripheral<T> {
    pub fn new(
        transport: T,
        options: PeripheralOptions,
        handler: impl CommandHandler + 'static,
    ) -> Self {
        let mut session = PeripheralSession::new(options.address, options.client_uid, options.key);
        session.set_install_mode(options.install_mode);
        session.set_require_secure_channel(options.require_secure_channel);

        let (stop_sender, stop) = watch::channel(false);

        Self {
            transport,
            session,
            reader: FrameReader::new(),
            handler: Box::new(handler),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            stop_sender: Arc::new(stop_sender),
            stop,
        }
    }

    pub fn handle(&self) -> PeripheralHandle {
        PeripheralHandle {
            queue: self.queue.clone(),
            stop: self.stop_sender.clone(),
        }
    }

    pub fn address(&self) -> u8 {
        self.session.address()
    }

    /// Serve the control panel until stopped or the link closes
    pub async fn run(mut self) -> Result<()> {
        if !self.transport.is_open() {
            self.transport.open().await?;
        }
        info!(address = self.address(), transport = %self.transport.name(), "Peripheral started");

        let result = self.serve().await;

        let _ = self.transport.close().await;
        info!(address = self.address(), "Peripheral stopped");

        match result {
            Err(Error::Cancelled) => Ok(()),
            Err(Error::Transport(osdp_transport::Error::ConnectionClosed)) => {
                info!("Link closed by control panel");
                Ok(())
            }
            other => other,
        }
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            while let Some(frame) = self.reader.next_frame() {
                self.process(&frame).await?;
            }

            let read = tokio::select! {
                _ = self.stop.wait_for(|&stop| stop) => return Err(Error::Cancelled),
                read = self.transport.read(self.reader.buffer_mut()) => read,
            };
            read?;
        }
    }

    fn next_report(&self) -> Reply {
        self.queue.lock().pop_front().unwrap_or(Reply::Ack)
    }

    async fn process(&mut self, frame: &[u8]) -> Result<()> {
        let action = match self.session.receive(frame) {
            Ok(action) => action,
            Err(err) => {
                debug!(error = %err, "Discarding frame");
                return Ok(());
            }
        };

        let frame = match action {
            PeripheralAction::Ignore => return Ok(()),
            PeripheralAction::Send(frame) => frame,
            PeripheralAction::Dispatch { command, message } => {
                let reply = match command {
                    Command::Poll => self.next_report(),
                    command => dispatch(self.handler.as_ref(), &command).await,
                };

                if let Reply::Nak(nak) = &reply {
                    warn!(address = self.address(), code = %nak.code, "Refusing command");
                }

                match self.session.reply(&message, &reply) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(address = self.address(), error = %err, "Cannot encode {}", reply);
                        return Ok(());
                    }
                }
            }
        };

        self.transport.write(&frame).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osdp_core::{Control, IncomingMessage};
    use osdp_transport::MemoryTransport;
    use pretty_assertions::assert_eq;

    struct Reader;

    #[async_trait]
    impl CommandHandler for Reader {
        async fn local_status(&self) -> Reply {
            Reply::LocalStatusReport(Default::default())
        }
    }

    fn card() -> RawCardData {
        RawCardData {
            reader_number: 0,
            format: 1,
            bit_count: 26,
            data: vec![0x12, 0x34, 0x56, 0x40],
        }
    }

    async fn exchange(acu: &mut MemoryTransport, sequence: u8, command: &Command) -> Reply {
        let frame = command
            .build_frame(1, Control::new(sequence, true, false), None)
            .unwrap();
        acu.write(&frame).await.unwrap();

        let mut reader = FrameReader::new();
        loop {
            if let Some(frame) = reader.next_frame() {
                let message = IncomingMessage::parse(&frame, None).unwrap();
                return Reply::decode_for(command, message.function_code(), message.payload())
                    .unwrap();
            }
            acu.read(reader.buffer_mut()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_dispatch_defaults_to_nak() {
        assert_eq!(
            dispatch(&NoopHandler, &Command::LocalStatus).await,
            Reply::nak(NakErrorCode::UnknownCommandCode)
        );
        assert_eq!(
            dispatch(&Reader, &Command::LocalStatus).await,
            Reply::LocalStatusReport(Default::default())
        );
    }

    #[tokio::test]
    async fn test_poll_delivers_queued_reports() {
        let (mut acu, pd) = MemoryTransport::pair("acu", "pd");
        acu.open().await.unwrap();

        let peripheral = Peripheral::new(pd, PeripheralOptions::new(1), Reader);
        let handle = peripheral.handle();
        let task = tokio::spawn(peripheral.run());

        assert_eq!(exchange(&mut acu, 0, &Command::Poll).await, Reply::Ack);

        handle.queue_card_read(card());
        assert_eq!(handle.pending(), 1);
        assert_eq!(
            exchange(&mut acu, 1, &Command::Poll).await,
            Reply::RawReaderData(card())
        );
        assert_eq!(handle.pending(), 0);

        assert_eq!(
            exchange(&mut acu, 2, &Command::LocalStatus).await,
            Reply::LocalStatusReport(Default::default())
        );
        assert_eq!(
            exchange(&mut acu, 3, &Command::InputStatus).await,
            Reply::nak(NakErrorCode::UnknownCommandCode)
        );

        handle.stop();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_ends_when_link_closes() {
        let (mut acu, pd) = MemoryTransport::pair("acu", "pd");
        acu.open().await.unwrap();

        let task = tokio::spawn(Peripheral::new(pd, PeripheralOptions::new(1), NoopHandler).run());
        acu.close().await.unwrap();

        task.await.unwrap().unwrap();
    }
}
