//! Control panel and peripheral talking over an in-memory link

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use osdp::payload::{
    Capability, DeviceCapabilities, DeviceIdentification, FileTransferActions,
    FileTransferFragment, FileTransferStatus, IdReportType, LocalStatus, OutputControl,
    RawCardData,
};
use osdp::{
    BusOptions, CommandHandler, ConnectionId, ControlPanel, DeviceOptions, Error, NakErrorCode,
    PanelEvent, PanelEventKind, Peripheral, PeripheralHandle, PeripheralOptions, Reply,
};
use osdp_core::FrameReader;
use osdp_transport::{MemoryTransport, Transport};
use osdp_types::{CapabilityFunction, FileTransferStatusCode, OutputControlCode};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

const KEY: [u8; 16] = [
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F,
];

fn identification() -> DeviceIdentification {
    DeviceIdentification {
        vendor_code: [0x5C, 0x26, 0x23],
        model_number: 2,
        version: 1,
        serial_number: 0xCAFE,
        firmware_major: 3,
        firmware_minor: 1,
        firmware_build: 7,
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

#[derive(Default)]
struct TestReader {
    file: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl CommandHandler for TestReader {
    async fn id_report(&self, _kind: IdReportType) -> Reply {
        Reply::PdIdReport(identification())
    }

    async fn device_capabilities(&self) -> Reply {
        Reply::PdCapabilities(DeviceCapabilities {
            capabilities: vec![Capability::new(CapabilityFunction::ReceiveBufferSize, 0x60, 0x00)],
        })
    }

    async fn local_status(&self) -> Reply {
        Reply::LocalStatusReport(LocalStatus {
            tamper: true,
            power_failure: false,
        })
    }

    async fn key_set(&self, _key: &osdp::payload::EncryptionKey) -> Reply {
        Reply::Ack
    }

    async fn file_transfer(&self, fragment: &FileTransferFragment) -> Reply {
        let mut file = self.file.lock();
        if fragment.offset as usize == file.len() {
            file.extend_from_slice(&fragment.data);
        }

        let status = if file.len() == fragment.total_size as usize {
            FileTransferStatusCode::FileContentsProcessed
        } else {
            FileTransferStatusCode::OkToProceed
        };

        Reply::FileTransferStatus(FileTransferStatus {
            action: FileTransferActions::empty(),
            delay: 0,
            status,
            update_message_max: 0,
        })
    }
}

/// Answers `osdp_LSTAT` after an optional delay, with `BUSY` for the first
/// `busy` calls or with a fixed NAK
#[derive(Default)]
struct Scripted {
    calls: Arc<AtomicUsize>,
    busy: usize,
    delay: Option<Duration>,
    nak: Option<NakErrorCode>,
}

#[async_trait]
impl CommandHandler for Scripted {
    async fn local_status(&self) -> Reply {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(code) = self.nak {
            return Reply::nak(code);
        }
        if call < self.busy {
            return Reply::Busy;
        }
        Reply::LocalStatusReport(LocalStatus::default())
    }
}

struct Setup {
    panel: Arc<ControlPanel>,
    id: ConnectionId,
    events: broadcast::Receiver<PanelEvent>,
    handle: PeripheralHandle,
}

fn bus_options() -> BusOptions {
    BusOptions::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_reply_timeout(Duration::from_millis(200))
        .with_reconnect_delay(Duration::from_millis(50))
}

async fn setup(device: DeviceOptions, peripheral: PeripheralOptions, handler: TestReader) -> Setup {
    setup_with(device, peripheral, handler, bus_options()).await
}

async fn setup_with(
    device: DeviceOptions,
    peripheral: PeripheralOptions,
    handler: impl CommandHandler + 'static,
    options: BusOptions,
) -> Setup {
    let (acu, pd) = MemoryTransport::pair("acu", "pd");

    let peripheral = Peripheral::new(pd, peripheral, handler);
    let handle = peripheral.handle();
    tokio::spawn(peripheral.run());

    let panel = Arc::new(ControlPanel::new());
    let events = panel.subscribe();
    let id = panel.start_connection(acu, options);
    panel.add_device(id, device).await.unwrap();

    Setup {
        panel,
        id,
        events,
        handle,
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<PanelEvent>,
    mut matches: impl FnMut(&PanelEventKind) -> bool,
) -> PanelEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if matches(&event.kind) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

async fn wait_connected(events: &mut broadcast::Receiver<PanelEvent>) -> PanelEventKind {
    wait_for(events, |kind| {
        matches!(kind, PanelEventKind::ConnectionStatus { is_connected: true, .. })
    })
    .await
    .kind
}

#[tokio::test]
async fn test_plain_link_commands() {
    let mut setup = setup(
        DeviceOptions::new(1),
        PeripheralOptions::new(1),
        TestReader::default(),
    )
    .await;

    assert_eq!(
        wait_connected(&mut setup.events).await,
        PanelEventKind::ConnectionStatus {
            is_connected: true,
            is_secure_channel_established: false,
            is_using_default_key: false,
        }
    );

    let panel = &setup.panel;
    assert_eq!(panel.id_report(setup.id, 1).await.unwrap(), identification());
    assert_eq!(
        panel.local_status(setup.id, 1).await.unwrap(),
        LocalStatus {
            tamper: true,
            power_failure: false,
        }
    );

    let status = panel.device_status(setup.id, 1).await.unwrap();
    assert!(status.is_connected);
    assert!(!status.is_secure_channel_established);

    let refused = panel
        .output_control(
            setup.id,
            1,
            vec![OutputControl {
                output_number: 0,
                control_code: OutputControlCode::PermanentStateOnAbortTimedOperation,
                timer: 0,
            }],
        )
        .await;
    match refused {
        Err(Error::Core(osdp_core::Error::Nak { address, code })) => {
            assert_eq!(address, 1);
            assert_eq!(code, NakErrorCode::UnknownCommandCode);
        }
        other => panic!("expected NAK, got {:?}", other),
    }

    // The link survives a refused command
    assert!(panel.device_status(setup.id, 1).await.unwrap().is_connected);

    panel.shutdown().await;
}

#[tokio::test]
async fn test_card_read_is_published() {
    let mut setup = setup(
        DeviceOptions::new(1),
        PeripheralOptions::new(1),
        TestReader::default(),
    )
    .await;
    wait_connected(&mut setup.events).await;

    setup.handle.queue_card_read(card());

    let event = wait_for(&mut setup.events, |kind| {
        matches!(kind, PanelEventKind::CardRead(_))
    })
    .await;
    assert_eq!(event.connection_id, setup.id);
    assert_eq!(event.address, 1);
    assert_eq!(event.kind, PanelEventKind::CardRead(card()));

    setup.panel.shutdown().await;
}

#[tokio::test]
async fn test_secure_channel_with_default_key() {
    let mut setup = setup(
        DeviceOptions::new(1).with_secure_channel(None),
        PeripheralOptions::new(1),
        TestReader::default(),
    )
    .await;

    assert_eq!(
        wait_connected(&mut setup.events).await,
        PanelEventKind::ConnectionStatus {
            is_connected: true,
            is_secure_channel_established: true,
            is_using_default_key: true,
        }
    );

    assert_eq!(setup.panel.id_report(setup.id, 1).await.unwrap(), identification());

    setup.handle.queue_card_read(card());
    wait_for(&mut setup.events, |kind| {
        matches!(kind, PanelEventKind::CardRead(_))
    })
    .await;

    setup.panel.shutdown().await;
}

#[tokio::test]
async fn test_secure_channel_with_configured_key() {
    let mut setup = setup(
        DeviceOptions::new(1).with_secure_channel(Some(KEY)),
        PeripheralOptions::new(1).with_key(KEY),
        TestReader::default(),
    )
    .await;

    assert_eq!(
        wait_connected(&mut setup.events).await,
        PanelEventKind::ConnectionStatus {
            is_connected: true,
            is_secure_channel_established: true,
            is_using_default_key: false,
        }
    );
    assert_eq!(
        setup.panel.local_status(setup.id, 1).await.unwrap(),
        LocalStatus {
            tamper: true,
            power_failure: false,
        }
    );

    setup.panel.shutdown().await;
}

#[tokio::test]
async fn test_key_set_moves_to_new_key() {
    let mut setup = setup(
        DeviceOptions::new(1).with_secure_channel(None),
        PeripheralOptions::new(1).with_install_mode(true),
        TestReader::default(),
    )
    .await;
    wait_connected(&mut setup.events).await;

    setup
        .panel
        .encryption_key_set(setup.id, 1, KEY)
        .await
        .unwrap();

    wait_for(&mut setup.events, |kind| {
        matches!(
            kind,
            PanelEventKind::ConnectionStatus {
                is_connected: true,
                is_secure_channel_established: true,
                is_using_default_key: false,
            }
        )
    })
    .await;

    assert_eq!(setup.panel.id_report(setup.id, 1).await.unwrap(), identification());

    setup.panel.shutdown().await;
}

#[tokio::test]
async fn test_file_transfer() {
    let handler = TestReader::default();
    let file = handler.file.clone();

    let mut setup = setup(DeviceOptions::new(1), PeripheralOptions::new(1), handler).await;
    wait_connected(&mut setup.events).await;

    let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let status = setup
        .panel
        .file_transfer(setup.id, 1, 1, &data)
        .await
        .unwrap();

    assert_eq!(status.status, FileTransferStatusCode::FileContentsProcessed);
    assert_eq!(*file.lock(), data);

    setup.panel.shutdown().await;
}

#[tokio::test]
async fn test_unknown_device_and_connection() {
    let mut setup = setup(
        DeviceOptions::new(1),
        PeripheralOptions::new(1),
        TestReader::default(),
    )
    .await;
    wait_connected(&mut setup.events).await;

    assert!(matches!(
        setup.panel.id_report(setup.id, 9).await,
        Err(Error::DeviceNotFound { address: 9, .. })
    ));
    assert!(matches!(
        setup.panel.add_device(setup.id, DeviceOptions::new(1)).await,
        Err(Error::DeviceExists(1))
    ));

    setup.panel.shutdown_connection(setup.id).await.unwrap();

    assert!(matches!(
        setup.panel.id_report(setup.id, 1).await,
        Err(Error::ConnectionNotFound(_))
    ));
}

#[tokio::test]
async fn test_shutdown_reports_disconnect() {
    let mut setup = setup(
        DeviceOptions::new(1),
        PeripheralOptions::new(1),
        TestReader::default(),
    )
    .await;
    wait_connected(&mut setup.events).await;

    setup.panel.shutdown().await;

    wait_for(&mut setup.events, |kind| {
        matches!(kind, PanelEventKind::ConnectionStatus { is_connected: false, .. })
    })
    .await;
}

#[tokio::test]
async fn test_undecodable_reply_keeps_link_in_step() {
    let mut setup = setup(
        DeviceOptions::new(1),
        PeripheralOptions::new(1),
        TestReader::default(),
    )
    .await;
    wait_connected(&mut setup.events).await;

    // The reader answers with the standard report, which is not a valid
    // extended one
    assert!(matches!(
        setup.panel.extended_id_report(setup.id, 1).await,
        Err(Error::Core(osdp_core::Error::Decode(_)))
    ));

    assert_eq!(
        setup.panel.local_status(setup.id, 1).await.unwrap(),
        LocalStatus {
            tamper: true,
            power_failure: false,
        }
    );
    assert!(setup.panel.device_status(setup.id, 1).await.unwrap().is_connected);

    setup.panel.shutdown().await;
}

#[tokio::test]
async fn test_silent_device_gets_identical_retries() {
    let (acu, mut pd) = MemoryTransport::pair("acu", "pd");
    pd.open().await.unwrap();

    let frames = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let received = frames.clone();
    tokio::spawn(async move {
        let mut reader = FrameReader::new();
        loop {
            while let Some(frame) = reader.next_frame() {
                received.lock().push(frame);
            }
            if pd.read(reader.buffer_mut()).await.is_err() {
                return;
            }
        }
    });

    let panel = ControlPanel::new();
    let options = bus_options()
        .with_reply_timeout(Duration::from_millis(50))
        .with_max_retries(2)
        .with_reconnect_delay(Duration::from_secs(10));
    let id = panel.start_connection(acu, options);
    panel.add_device(id, DeviceOptions::new(1)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;

    let frames = frames.lock().clone();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|frame| *frame == frames[0]));

    let status = panel.device_status(id, 1).await.unwrap();
    assert!(!status.is_connected);
    assert!(matches!(
        panel.local_status(id, 1).await,
        Err(Error::NotConnected(1))
    ));

    panel.shutdown().await;
}

#[tokio::test]
async fn test_timeout_disconnects_device() {
    let handler = Scripted {
        delay: Some(Duration::from_secs(1)),
        ..Default::default()
    };
    let options = bus_options()
        .with_reply_timeout(Duration::from_millis(100))
        .with_max_retries(2);
    let mut setup =
        setup_with(DeviceOptions::new(1), PeripheralOptions::new(1), handler, options).await;
    wait_connected(&mut setup.events).await;

    match setup.panel.local_status(setup.id, 1).await {
        Err(Error::Core(osdp_core::Error::Timeout { address, attempts })) => {
            assert_eq!(address, 1);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected timeout, got {:?}", other),
    }

    wait_for(&mut setup.events, |kind| {
        matches!(kind, PanelEventKind::ConnectionStatus { is_connected: false, .. })
    })
    .await;

    setup.panel.shutdown().await;
}

#[tokio::test]
async fn test_busy_command_is_sent_again() {
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = Scripted {
        calls: calls.clone(),
        busy: 2,
        ..Default::default()
    };
    let options = bus_options().with_busy_retry_delay(Duration::from_millis(10));
    let mut setup = setup_with(
        DeviceOptions::new(1).with_secure_channel(None),
        PeripheralOptions::new(1),
        handler,
        options,
    )
    .await;
    wait_connected(&mut setup.events).await;

    assert_eq!(
        setup.panel.local_status(setup.id, 1).await.unwrap(),
        LocalStatus::default()
    );
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Still on the same secure channel
    let status = setup.panel.device_status(setup.id, 1).await.unwrap();
    assert!(status.is_connected);
    assert!(status.is_secure_channel_established);

    setup.panel.shutdown().await;
}

#[tokio::test]
async fn test_endless_busy_runs_out_of_retries() {
    let handler = Scripted {
        busy: usize::MAX,
        ..Default::default()
    };
    let options = bus_options()
        .with_busy_retry_delay(Duration::from_millis(10))
        .with_max_retries(2);
    let mut setup =
        setup_with(DeviceOptions::new(1), PeripheralOptions::new(1), handler, options).await;
    wait_connected(&mut setup.events).await;

    assert!(matches!(
        setup.panel.local_status(setup.id, 1).await,
        Err(Error::Core(osdp_core::Error::Timeout { attempts: 3, .. }))
    ));

    setup.panel.shutdown().await;
}

#[tokio::test]
async fn test_security_nak_forces_reconnect() {
    let handler = Scripted {
        nak: Some(NakErrorCode::EncryptionRequired),
        ..Default::default()
    };
    let mut setup = setup_with(
        DeviceOptions::new(1).with_secure_channel(None),
        PeripheralOptions::new(1),
        handler,
        bus_options(),
    )
    .await;
    wait_connected(&mut setup.events).await;

    match setup.panel.local_status(setup.id, 1).await {
        Err(Error::Core(osdp_core::Error::Nak { code, .. })) => {
            assert_eq!(code, NakErrorCode::EncryptionRequired);
        }
        other => panic!("expected NAK, got {:?}", other),
    }

    wait_for(&mut setup.events, |kind| {
        matches!(kind, PanelEventKind::ConnectionStatus { is_connected: false, .. })
    })
    .await;
    assert_eq!(
        wait_connected(&mut setup.events).await,
        PanelEventKind::ConnectionStatus {
            is_connected: true,
            is_secure_channel_established: true,
            is_using_default_key: true,
        }
    );

    setup.panel.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_cancels_command_in_flight() {
    let handler = Scripted {
        delay: Some(Duration::from_secs(5)),
        ..Default::default()
    };
    let options = bus_options().with_reply_timeout(Duration::from_secs(2));
    let mut setup =
        setup_with(DeviceOptions::new(1), PeripheralOptions::new(1), handler, options).await;
    wait_connected(&mut setup.events).await;

    let panel = setup.panel.clone();
    let id = setup.id;
    let pending = tokio::spawn(async move { panel.local_status(id, 1).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    setup.panel.shutdown_connection(setup.id).await.unwrap();

    assert!(matches!(pending.await.unwrap(), Err(Error::Cancelled)));
}
