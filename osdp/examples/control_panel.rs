//! Control panel example
//!
//! Connects to a reader over TCP (a serial server or the `reader` example),
//! prints every event and beeps on each card read.
//!
//! ```text
//! OSDP_ADDR=127.0.0.1 OSDP_PORT=4001 OSDP_KEY=000102030405060708090a0b0c0d0e0f \
//!     cargo run --example control_panel
//! ```

use osdp::payload::ReaderBuzzerControl;
use osdp::{BusOptions, ControlPanel, DeviceOptions, PanelEventKind};
use osdp_transport::TcpTransport;
use osdp_types::ToneCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> osdp::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let ip = std::env::var("OSDP_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("OSDP_PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(4001);

    // Secure channel with the given key, or the default key when unset
    let key = std::env::var("OSDP_KEY").ok().and_then(|key| {
        let bytes = hex::decode(key).ok()?;
        <[u8; 16]>::try_from(bytes).ok()
    });

    let panel = ControlPanel::new();
    let mut events = panel.subscribe();

    let id = panel.start_connection(TcpTransport::new(ip, port), BusOptions::default());
    panel
        .add_device(id, DeviceOptions::new(1).with_name("front door").with_secure_channel(key))
        .await?;

    println!("Waiting for events");

    while let Ok(event) = events.recv().await {
        println!("{}", event);

        match event.kind {
            PanelEventKind::ConnectionStatus { is_connected: true, .. } => {
                match panel.id_report(id, event.address).await {
                    Ok(identification) => println!("  {}", identification),
                    Err(err) => println!("  id report failed: {}", err),
                }
            }
            PanelEventKind::CardRead(_) => {
                let beep = ReaderBuzzerControl {
                    reader_number: 0,
                    tone: ToneCode::Default,
                    on_time: 2,
                    off_time: 0,
                    count: 1,
                };
                if let Err(err) = panel.reader_buzzer_control(id, event.address, beep).await {
                    println!("  buzzer failed: {}", err);
                }
            }
            _ => {}
        }
    }

    panel.shutdown().await;
    Ok(())
}
