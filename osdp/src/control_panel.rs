//! Access control unit API

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use osdp_core::payload::{
    CommunicationConfiguration, DeviceCapabilities, DeviceIdentification, EncryptionKey,
    ExtendedIdentification, FileTransferStatus, GetPivData, IdReportType, LocalStatus,
    ManufacturerData, OutputControl, PivDataReply, ReaderBuzzerControl, ReaderLedControl,
    ReaderTextOutput,
};
use osdp_core::{Command, Reply};
use osdp_transport::Transport;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    bus::{Bus, BusRequest, DeviceStatus},
    error::{Error, Result},
    events::{ConnectionId, PanelEvent},
    file_transfer,
    options::{BusOptions, DeviceOptions},
};

const REQUEST_QUEUE_SIZE: usize = 64;
const EVENT_QUEUE_SIZE: usize = 256;

struct BusHandle {
    requests: mpsc::Sender<BusRequest>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Control panel driving any number of OSDP links
///
/// Each link runs in its own task; methods only pass requests to it. All
/// methods take `&self`, so the panel can be shared behind an `Arc`.
///
/// # Examples
///
/// ```no_run
/// use osdp::{BusOptions, ControlPanel, DeviceOptions};
/// use osdp_transport::TcpTransport;
///
/// #[tokio::main]
/// async fn main() -> osdp::Result<()> {
///     let panel = ControlPanel::new();
///     let id = panel.start_connection(TcpTransport::new("10.0.0.5", 4001), BusOptions::default());
///     panel.add_device(id, DeviceOptions::new(1).with_secure_channel(None)).await?;
///
///     let mut events = panel.subscribe();
///     while let Ok(event) = events.recv().await {
///         println!("{}", event);
///     }
///     Ok(())
/// }
/// ```
pub struct ControlPanel {
    buses: Mutex<HashMap<ConnectionId, BusHandle>>,
    next_id: AtomicU64,
    events: broadcast::Sender<PanelEvent>,
}

impl Default for ControlPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPanel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_QUEUE_SIZE);
        Self {
            buses: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    /// Start a bus task for `transport`
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_connection(
        &self,
        transport: impl Transport + 'static,
        options: BusOptions,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (requests, receiver) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let (stop, stop_receiver) = watch::channel(false);

        let bus = Bus::new(id, transport, options, receiver, self.events.clone(), stop_receiver);
        let task = tokio::spawn(bus.run());

        self.buses.lock().insert(
            id,
            BusHandle {
                requests,
                stop,
                task,
            },
        );

        info!(connection = %id, "Connection started");
        id
    }

    /// Stop one link; pending commands complete with [`Error::Cancelled`]
    pub async fn shutdown_connection(&self, id: ConnectionId) -> Result<()> {
        let handle = self
            .buses
            .lock()
            .remove(&id)
            .ok_or(Error::ConnectionNotFound(id))?;

        let _ = handle.stop.send(true);
        if let Err(err) = handle.task.await {
            debug!(connection = %id, error = %err, "Bus task ended abnormally");
        }

        info!(connection = %id, "Connection shut down");
        Ok(())
    }

    /// Stop every link
    pub async fn shutdown(&self) {
        let ids: Vec<ConnectionId> = self.buses.lock().keys().copied().collect();
        for id in ids {
            let _ = self.shutdown_connection(id).await;
        }
    }

    /// Receive connection changes and device reports from all links
    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.events.subscribe()
    }

    async fn request<R>(
        &self,
        id: ConnectionId,
        make: impl FnOnce(oneshot::Sender<Result<R>>) -> BusRequest,
    ) -> Result<R> {
        let sender = self
            .buses
            .lock()
            .get(&id)
            .map(|handle| handle.requests.clone())
            .ok_or(Error::ConnectionNotFound(id))?;

        let (reply, receiver) = oneshot::channel();
        sender
            .send(make(reply))
            .await
            .map_err(|_| Error::Cancelled)?;

        receiver.await.map_err(|_| Error::Cancelled)?
    }

    /// Add a device; the bus connects it in the background
    pub async fn add_device(&self, id: ConnectionId, options: DeviceOptions) -> Result<()> {
        self.request(id, |reply| BusRequest::AddDevice { options, reply })
            .await
    }

    pub async fn remove_device(&self, id: ConnectionId, address: u8) -> Result<()> {
        self.request(id, |reply| BusRequest::RemoveDevice { address, reply })
            .await
    }

    pub async fn device_status(&self, id: ConnectionId, address: u8) -> Result<DeviceStatus> {
        self.request(id, |reply| BusRequest::Status { address, reply })
            .await
    }

    /// Send any command and wait for its reply
    ///
    /// # Errors
    ///
    /// - `NotConnected` while the device is offline
    /// - `Core(Nak { .. })` when the device refuses the command
    /// - `Core(Timeout { .. })` when the retries run out
    pub async fn send_command(
        &self,
        id: ConnectionId,
        address: u8,
        command: Command,
    ) -> Result<Reply> {
        self.request(id, |reply| BusRequest::Command {
            address,
            command,
            reply,
        })
        .await
    }

    async fn expect_ack(&self, id: ConnectionId, address: u8, command: Command) -> Result<()> {
        match self.send_command(id, address, command).await? {
            Reply::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn id_report(&self, id: ConnectionId, address: u8) -> Result<DeviceIdentification> {
        match self
            .send_command(id, address, Command::IdReport(IdReportType::Standard))
            .await?
        {
            Reply::PdIdReport(identification) => Ok(identification),
            other => Err(unexpected(other)),
        }
    }

    pub async fn extended_id_report(
        &self,
        id: ConnectionId,
        address: u8,
    ) -> Result<ExtendedIdentification> {
        match self
            .send_command(id, address, Command::IdReport(IdReportType::Extended))
            .await?
        {
            Reply::ExtendedIdReport(identification) => Ok(identification),
            other => Err(unexpected(other)),
        }
    }

    pub async fn device_capabilities(
        &self,
        id: ConnectionId,
        address: u8,
    ) -> Result<DeviceCapabilities> {
        match self
            .send_command(id, address, Command::DeviceCapabilities)
            .await?
        {
            Reply::PdCapabilities(capabilities) => Ok(capabilities),
            other => Err(unexpected(other)),
        }
    }

    pub async fn local_status(&self, id: ConnectionId, address: u8) -> Result<LocalStatus> {
        match self.send_command(id, address, Command::LocalStatus).await? {
            Reply::LocalStatusReport(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    /// Drive outputs; returns the output states when the device reports them
    pub async fn output_control(
        &self,
        id: ConnectionId,
        address: u8,
        controls: Vec<OutputControl>,
    ) -> Result<Option<Vec<bool>>> {
        match self
            .send_command(id, address, Command::OutputControl(controls))
            .await?
        {
            Reply::Ack => Ok(None),
            Reply::OutputStatusReport(states) => Ok(Some(states)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn reader_led_control(
        &self,
        id: ConnectionId,
        address: u8,
        leds: Vec<ReaderLedControl>,
    ) -> Result<()> {
        self.expect_ack(id, address, Command::ReaderLedControl(leds))
            .await
    }

    pub async fn reader_buzzer_control(
        &self,
        id: ConnectionId,
        address: u8,
        buzzer: ReaderBuzzerControl,
    ) -> Result<()> {
        self.expect_ack(id, address, Command::ReaderBuzzerControl(buzzer))
            .await
    }

    pub async fn reader_text_output(
        &self,
        id: ConnectionId,
        address: u8,
        text: ReaderTextOutput,
    ) -> Result<()> {
        self.expect_ack(id, address, Command::ReaderTextOutput(text))
            .await
    }

    /// Change the device's address and baud rate; returns the settings it applied
    pub async fn communication_configuration(
        &self,
        id: ConnectionId,
        address: u8,
        config: CommunicationConfiguration,
    ) -> Result<CommunicationConfiguration> {
        match self
            .send_command(id, address, Command::CommunicationSet(config))
            .await?
        {
            Reply::CommunicationConfiguration(applied) => Ok(applied),
            other => Err(unexpected(other)),
        }
    }

    /// Install a new secure channel base key
    ///
    /// Needs an established secure channel. The device reconnects with the
    /// new key afterwards.
    pub async fn encryption_key_set(
        &self,
        id: ConnectionId,
        address: u8,
        key: [u8; 16],
    ) -> Result<()> {
        let command = Command::KeySet(EncryptionKey::secure_channel_base_key(key));
        self.expect_ack(id, address, command).await
    }

    /// Send vendor data; `None` when the device only acknowledges it
    pub async fn manufacturer_specific(
        &self,
        id: ConnectionId,
        address: u8,
        data: ManufacturerData,
    ) -> Result<Option<ManufacturerData>> {
        match self
            .send_command(id, address, Command::ManufacturerSpecific(data))
            .await?
        {
            Reply::Ack => Ok(None),
            Reply::ManufacturerSpecific(reply) => Ok(Some(reply)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn piv_data(
        &self,
        id: ConnectionId,
        address: u8,
        request: GetPivData,
    ) -> Result<PivDataReply> {
        match self
            .send_command(id, address, Command::PivData(request))
            .await?
        {
            Reply::PivData(data) => Ok(data),
            other => Err(unexpected(other)),
        }
    }

    /// Send a whole file in fragments, see [`file_transfer`](crate::file_transfer)
    pub async fn file_transfer(
        &self,
        id: ConnectionId,
        address: u8,
        file_type: u8,
        data: &[u8],
    ) -> Result<FileTransferStatus> {
        file_transfer::send_file(self, id, address, file_type, data).await
    }
}

impl Drop for ControlPanel {
    fn drop(&mut self) {
        for handle in self.buses.get_mut().values() {
            let _ = handle.stop.send(true);
        }
    }
}

fn unexpected(reply: Reply) -> Error {
    osdp_core::Error::UnexpectedReply(reply.to_string()).into()
}
