//! Per-link task of the control panel
//!
//! A [`Bus`] owns one transport and every device on it. The link is half
//! duplex, so devices are serviced one after another with at most one
//! command in flight. Requests arrive over an `mpsc` channel and are answered
//! through `oneshot` senders; a `watch` flag stops the task.

use std::collections::{BTreeMap, VecDeque};

use osdp_core::{Command, DeviceSession, FrameReader, ReceivedReply, Reply, SessionState};
use osdp_transport::Transport;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, sleep, sleep_until};
use tracing::{debug, info, trace, warn};

use crate::{
    error::{Error, Result},
    events::{ConnectionId, PanelEvent, PanelEventKind},
    options::{BusOptions, DeviceOptions},
};

/// Request sent to a bus task
pub(crate) enum BusRequest {
    AddDevice {
        options: DeviceOptions,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveDevice {
        address: u8,
        reply: oneshot::Sender<Result<()>>,
    },
    Command {
        address: u8,
        command: Command,
        reply: oneshot::Sender<Result<Reply>>,
    },
    Status {
        address: u8,
        reply: oneshot::Sender<Result<DeviceStatus>>,
    },
}

/// Snapshot of one device's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub address: u8,
    pub state: SessionState,
    pub is_connected: bool,
    pub is_secure_channel_established: bool,
    pub is_using_default_key: bool,
}

/// Resolves once the stop flag is raised or the panel is gone
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|&stop| stop).await;
}

struct PendingCommand {
    command: Command,
    reply: oneshot::Sender<Result<Reply>>,
}

struct Device {
    options: DeviceOptions,
    session: DeviceSession,
    queue: VecDeque<PendingCommand>,
    next_poll: Instant,
    next_connect: Instant,
}

impl Device {
    fn new(options: DeviceOptions) -> Self {
        let session = DeviceSession::new(
            options.address,
            options.use_crc,
            options.secure_channel,
            options.key,
        );

        Self {
            options,
            session,
            queue: VecDeque::new(),
            next_poll: Instant::now(),
            next_connect: Instant::now(),
        }
    }

    fn address(&self) -> u8 {
        self.session.address()
    }

    fn status(&self) -> DeviceStatus {
        DeviceStatus {
            address: self.address(),
            state: self.session.state(),
            is_connected: self.session.is_online(),
            is_secure_channel_established: self.session.is_secure_channel_established(),
            is_using_default_key: self.session.is_using_default_key(),
        }
    }

    fn fail_queue(&mut self, error: impl Fn() -> Error) {
        for pending in self.queue.drain(..) {
            let _ = pending.reply.send(Err(error()));
        }
    }

    /// When this device next needs the link
    fn next_due(&self) -> Instant {
        if !self.session.is_online() {
            self.next_connect
        } else if !self.queue.is_empty() {
            Instant::now()
        } else {
            self.next_poll
        }
    }
}

struct Publisher {
    id: ConnectionId,
    events: broadcast::Sender<PanelEvent>,
}

impl Publisher {
    fn publish(&self, address: u8, kind: PanelEventKind) {
        // No subscribers is fine
        let _ = self.events.send(PanelEvent::new(self.id, address, kind));
    }

    fn reply(&self, address: u8, reply: &Reply) {
        if let Some(kind) = PanelEventKind::from_reply(reply) {
            trace!(connection = %self.id, address, "Publishing {}", reply);
            self.publish(address, kind);
        }
    }

    fn status(&self, device: &Device) {
        let status = device.status();
        self.publish(
            status.address,
            PanelEventKind::ConnectionStatus {
                is_connected: status.is_connected,
                is_secure_channel_established: status.is_secure_channel_established,
                is_using_default_key: status.is_using_default_key,
            },
        );
    }
}

/// Transport side of a link
struct Link<T> {
    transport: T,
    reader: FrameReader,
    stop: watch::Receiver<bool>,
    options: BusOptions,
    failed: bool,
}

impl<T: Transport> Link<T> {
    fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    async fn open(&mut self) -> Result<()> {
        self.transport.open().await?;
        self.reader.clear();
        self.failed = false;
        Ok(())
    }

    async fn pause(&mut self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = stopped(&mut self.stop) => Err(Error::Cancelled),
            _ = sleep(duration) => Ok(()),
        }
    }

    fn fail(&mut self, err: osdp_transport::Error) -> Error {
        self.failed = true;
        err.into()
    }

    /// Send `command` and wait for its reply, with retries
    ///
    /// A timeout resends the same frame; `BUSY` waits and sends the command
    /// again with a fresh MAC. Both count against the retry budget.
    async fn transact(
        &mut self,
        session: &mut DeviceSession,
        command: &Command,
    ) -> Result<ReceivedReply> {
        let address = session.address();
        let mut frame = session.build_command(command)?;
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.reader.clear();

            let written = self.transport.write(&frame).await;
            written.map_err(|err| self.fail(err))?;

            match self.receive(session, command).await? {
                Some(received) => {
                    session.accept_reply(&received.reply);
                    if !matches!(received.reply, Reply::Busy) {
                        return Ok(received);
                    }

                    debug!(address, attempts, "Device busy");
                    if attempts > self.options.max_retries {
                        return Err(osdp_core::Error::Timeout { address, attempts }.into());
                    }

                    self.pause(self.options.busy_retry_delay).await?;
                    frame = session.build_command(command)?;
                }
                None => {
                    warn!(address, attempts, "Reply timeout for {}", command.code());
                    if attempts > self.options.max_retries {
                        return Err(osdp_core::Error::Timeout { address, attempts }.into());
                    }
                }
            }
        }
    }

    /// Wait for the reply to `command`, `None` on timeout
    async fn receive(
        &mut self,
        session: &mut DeviceSession,
        command: &Command,
    ) -> Result<Option<ReceivedReply>> {
        let deadline = Instant::now() + self.options.reply_timeout;

        loop {
            while let Some(frame) = self.reader.next_frame() {
                match session.receive_reply(command, &frame) {
                    Ok(Some(received)) => return Ok(Some(received)),
                    Ok(None) => {}
                    Err(err) if err.is_framing_error() => {
                        debug!(error = %err, "Discarding frame");
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            let read = tokio::select! {
                _ = stopped(&mut self.stop) => return Err(Error::Cancelled),
                _ = sleep_until(deadline) => return Ok(None),
                read = self.transport.read(self.reader.buffer_mut()) => read,
            };
            read.map_err(|err| self.fail(err))?;
        }
    }
}

/// Bring a device online: handshake on a secure link, first poll otherwise
async fn connect<T: Transport>(
    link: &mut Link<T>,
    device: &mut Device,
    publisher: &Publisher,
) -> Result<()> {
    let mut command = device.session.connect();

    loop {
        let received = link.transact(&mut device.session, &command).await?;

        if !device.session.uses_secure_channel() {
            publisher.reply(device.address(), &received.reply);
            return Ok(());
        }

        match device.session.handle_handshake_reply(&received.reply)? {
            Some(next) => command = next,
            None => return Ok(()),
        }
    }
}

/// Run one command on an online device
async fn execute<T: Transport>(
    link: &mut Link<T>,
    device: &mut Device,
    command: &Command,
    publisher: &Publisher,
) -> Result<Reply> {
    let address = device.address();
    let received = link.transact(&mut device.session, command).await?;
    let reply = received.reply;

    publisher.reply(address, &reply);

    match (command, &reply) {
        (_, Reply::Nak(nak)) => {
            return Err(osdp_core::Error::Nak {
                address,
                code: nak.code,
            }
            .into());
        }
        (Command::KeySet(key), Reply::Ack) => {
            if let Some(key) = key.as_base_key() {
                device.options.key = Some(key);
                device.session.rotate_key(key);
                device.next_connect = Instant::now();
                publisher.status(device);
            }
        }
        (Command::CommunicationSet(_), Reply::CommunicationConfiguration(applied)) => {
            if applied.address != address {
                device.session.set_address(applied.address);
                device.options.address = applied.address;
            }
            if applied.baud_rate != link.transport.baud_rate() {
                info!(address, baud_rate = applied.baud_rate, "Device changed baud rate");
            }
        }
        _ => {}
    }

    Ok(reply)
}

fn go_offline(device: &mut Device, publisher: &Publisher, delay: Duration) {
    let was_online = device.session.is_online();
    let address = device.address();

    device.session.disconnect();
    device.next_connect = Instant::now() + delay;
    device.fail_queue(|| Error::NotConnected(address));

    if was_online {
        publisher.status(device);
    }
}

/// One link with its devices
pub(crate) struct Bus<T> {
    link: Link<T>,
    devices: BTreeMap<u8, Device>,
    requests: mpsc::Receiver<BusRequest>,
    publisher: Publisher,
}

impl<T: Transport> Bus<T> {
    pub(crate) fn new(
        id: ConnectionId,
        transport: T,
        options: BusOptions,
        requests: mpsc::Receiver<BusRequest>,
        events: broadcast::Sender<PanelEvent>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            link: Link {
                transport,
                reader: FrameReader::new(),
                stop,
                options,
                failed: false,
            },
            devices: BTreeMap::new(),
            requests,
            publisher: Publisher { id, events },
        }
    }

    fn id(&self) -> ConnectionId {
        self.publisher.id
    }

    pub(crate) async fn run(mut self) {
        info!(connection = %self.id(), transport = %self.link.transport.name(), "Bus started");

        while !self.link.is_stopped() {
            match self.step().await {
                Ok(()) => {}
                Err(Error::Cancelled) => break,
                Err(err) => warn!(connection = %self.id(), error = %err, "Bus error"),
            }
        }

        self.finish().await;
    }

    async fn step(&mut self) -> Result<()> {
        if !self.link.transport.is_open() {
            if let Err(err) = self.link.open().await {
                warn!(connection = %self.id(), error = %err, "Failed to open transport");
                let retry = Instant::now() + self.link.options.reconnect_delay;
                return self.idle_until(retry).await;
            }
            info!(connection = %self.id(), "Transport opened");
        }

        let addresses: Vec<u8> = self.devices.keys().copied().collect();
        for address in addresses {
            if self.link.is_stopped() {
                return Err(Error::Cancelled);
            }

            self.service(address).await?;

            if self.link.failed {
                return self.link_lost().await;
            }
        }

        let wake = self
            .devices
            .values()
            .map(Device::next_due)
            .min()
            .unwrap_or_else(|| Instant::now() + self.link.options.poll_interval);

        self.idle_until(wake).await
    }

    /// Handle requests until `deadline`
    async fn idle_until(&mut self, deadline: Instant) -> Result<()> {
        let request = tokio::select! {
            _ = stopped(&mut self.link.stop) => return Err(Error::Cancelled),
            _ = sleep_until(deadline) => return Ok(()),
            request = self.requests.recv() => request,
        };

        match request {
            Some(request) => {
                self.handle_request(request);
                Ok(())
            }
            None => Err(Error::Cancelled),
        }
    }

    fn handle_request(&mut self, request: BusRequest) {
        let connection = self.id();

        match request {
            BusRequest::AddDevice { options, reply } => {
                let result = if self.devices.contains_key(&options.address) {
                    Err(Error::DeviceExists(options.address))
                } else {
                    debug!(connection = %connection, ?options, "Adding device");
                    self.devices.insert(options.address, Device::new(options));
                    Ok(())
                };
                let _ = reply.send(result);
            }
            BusRequest::RemoveDevice { address, reply } => {
                let result = match self.devices.remove(&address) {
                    Some(mut device) => {
                        debug!(connection = %connection, address, "Removing device");
                        device.fail_queue(|| Error::Cancelled);
                        Ok(())
                    }
                    None => Err(Error::DeviceNotFound {
                        connection,
                        address,
                    }),
                };
                let _ = reply.send(result);
            }
            BusRequest::Command {
                address,
                command,
                reply,
            } => match self.devices.get_mut(&address) {
                Some(device) if device.session.is_online() => {
                    device.queue.push_back(PendingCommand { command, reply });
                }
                Some(_) => {
                    let _ = reply.send(Err(Error::NotConnected(address)));
                }
                None => {
                    let _ = reply.send(Err(Error::DeviceNotFound {
                        connection,
                        address,
                    }));
                }
            },
            BusRequest::Status { address, reply } => {
                let result = self
                    .devices
                    .get(&address)
                    .map(Device::status)
                    .ok_or(Error::DeviceNotFound {
                        connection,
                        address,
                    });
                let _ = reply.send(result);
            }
        }
    }

    /// Give one device its turn on the link
    ///
    /// Only cancellation is returned as an error; everything else is
    /// reported to the caller of the command or logged.
    async fn service(&mut self, address: u8) -> Result<()> {
        let options = self.link.options.clone();
        let Some(device) = self.devices.get_mut(&address) else {
            return Ok(());
        };
        let now = Instant::now();

        if !device.session.is_online() {
            if now < device.next_connect {
                return Ok(());
            }

            match connect(&mut self.link, device, &self.publisher).await {
                Ok(()) => {
                    info!(
                        connection = %self.publisher.id,
                        address,
                        secure = device.session.is_secure_channel_established(),
                        "Device connected"
                    );
                    device.next_poll = Instant::now() + options.poll_interval;
                    self.publisher.status(device);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    warn!(connection = %self.publisher.id, address, error = %err, "Connection attempt failed");
                    go_offline(device, &self.publisher, options.reconnect_delay);
                }
            }
            return Ok(());
        }

        if let Some(pending) = device.queue.pop_front() {
            let result = execute(&mut self.link, device, &pending.command, &self.publisher).await;

            match &result {
                Err(Error::Cancelled) => {
                    let _ = pending.reply.send(Err(Error::Cancelled));
                    return Err(Error::Cancelled);
                }
                Err(err) if err.requires_reconnect() => {
                    warn!(address, error = %err, "Command failed, reconnecting");
                    go_offline(device, &self.publisher, options.reconnect_delay);
                }
                _ => {}
            }
            let _ = pending.reply.send(result);

            // osdp_COMSET may have moved the device
            let new_address = device.address();
            if new_address != address {
                self.move_device(address, new_address);
            }
            return Ok(());
        }

        if now >= device.next_poll {
            device.next_poll = now + options.poll_interval;

            match execute(&mut self.link, device, &Command::Poll, &self.publisher).await {
                Ok(_) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) if err.requires_reconnect() => {
                    warn!(address, error = %err, "Poll failed, reconnecting");
                    go_offline(device, &self.publisher, options.reconnect_delay);
                }
                Err(err) => debug!(address, error = %err, "Poll answered with error"),
            }
        }

        Ok(())
    }

    /// File a device under the address it moved to
    ///
    /// A device already registered there is dropped and its queued
    /// commands are cancelled.
    fn move_device(&mut self, old_address: u8, new_address: u8) {
        let Some(device) = self.devices.remove(&old_address) else {
            return;
        };

        debug!(connection = %self.id(), old_address, new_address, "Device changed address");
        if let Some(mut displaced) = self.devices.insert(new_address, device) {
            warn!(
                connection = %self.id(),
                address = new_address,
                "Device moved onto an address in use, dropping the previous device"
            );
            displaced.fail_queue(|| Error::Cancelled);
        }
    }

    async fn link_lost(&mut self) -> Result<()> {
        warn!(connection = %self.id(), "Transport failed, reopening");

        let _ = self.link.transport.close().await;
        let delay = self.link.options.reconnect_delay;
        for device in self.devices.values_mut() {
            go_offline(device, &self.publisher, delay);
        }

        self.idle_until(Instant::now() + delay).await
    }

    async fn finish(&mut self) {
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            match request {
                BusRequest::AddDevice { reply, .. } | BusRequest::RemoveDevice { reply, .. } => {
                    let _ = reply.send(Err(Error::Cancelled));
                }
                BusRequest::Command { reply, .. } => {
                    let _ = reply.send(Err(Error::Cancelled));
                }
                BusRequest::Status { reply, .. } => {
                    let _ = reply.send(Err(Error::Cancelled));
                }
            }
        }

        for device in self.devices.values_mut() {
            device.fail_queue(|| Error::Cancelled);
            if device.session.is_online() {
                device.session.disconnect();
                self.publisher.status(device);
            }
        }

        if let Err(err) = self.link.transport.close().await {
            debug!(error = %err, "Error closing transport");
        }
        info!(connection = %self.id(), "Bus stopped");
    }
}
