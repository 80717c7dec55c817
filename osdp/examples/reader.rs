//! Peripheral example
//!
//! Simulates a card reader listening on TCP. Every ten seconds it reports a
//! 26-bit card read on the next poll.
//!
//! ```text
//! OSDP_LISTEN=127.0.0.1:4001 cargo run --example reader
//! ```

use std::time::Duration;

use async_trait::async_trait;
use osdp::payload::{
    Capability, DeviceCapabilities, DeviceIdentification, IdReportType, LocalStatus,
    RawCardData, ReaderBuzzerControl, ReaderLedControl,
};
use osdp::{CommandHandler, Peripheral, PeripheralOptions, Reply};
use osdp_transport::TcpListenerTransport;
use osdp_types::CapabilityFunction;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct DemoReader;

#[async_trait]
impl CommandHandler for DemoReader {
    async fn id_report(&self, _kind: IdReportType) -> Reply {
        Reply::PdIdReport(DeviceIdentification {
            vendor_code: [0x5C, 0x26, 0x23],
            model_number: 1,
            version: 1,
            serial_number: 0x0000_1234,
            firmware_major: 1,
            firmware_minor: 0,
            firmware_build: 0,
        })
    }

    async fn device_capabilities(&self) -> Reply {
        Reply::PdCapabilities(DeviceCapabilities {
            capabilities: vec![
                Capability::new(CapabilityFunction::CardDataFormat, 1, 0),
                Capability::new(CapabilityFunction::CheckCharacterSupport, 1, 0),
                Capability::new(CapabilityFunction::CommunicationSecurity, 1, 1),
                Capability::new(CapabilityFunction::ReceiveBufferSize, 0x00, 0x04),
            ],
        })
    }

    async fn local_status(&self) -> Reply {
        Reply::LocalStatusReport(LocalStatus::default())
    }

    async fn reader_led_control(&self, leds: &[ReaderLedControl]) -> Reply {
        for led in leds {
            info!("LED: {}", led);
        }
        Reply::Ack
    }

    async fn reader_buzzer_control(&self, buzzer: &ReaderBuzzerControl) -> Reply {
        info!(tone = ?buzzer.tone, count = buzzer.count, "Beep");
        Reply::Ack
    }
}

#[tokio::main]
async fn main() -> osdp::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let listen = std::env::var("OSDP_LISTEN").unwrap_or_else(|_| "127.0.0.1:4001".to_string());
    let transport = TcpListenerTransport::bind(listen).await?;
    println!("Listening on {}", transport.local_addr());

    // No key configured: accepts the default key
    let options = PeripheralOptions::new(1).with_client_uid([0x5C, 0x26, 0x23, 0, 0, 0, 0x12, 0x34]);
    let peripheral = Peripheral::new(transport, options, DemoReader);
    let handle = peripheral.handle();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.tick().await;
        loop {
            interval.tick().await;
            handle.queue_card_read(RawCardData {
                reader_number: 0,
                format: 1,
                bit_count: 26,
                data: vec![0x12, 0x34, 0x56, 0x40],
            });
        }
    });

    peripheral.run().await
}
