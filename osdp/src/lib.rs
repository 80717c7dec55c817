//! # osdp
//!
//! Async implementation of the Open Supervised Device Protocol (OSDP), the
//! RS-485 protocol between access control panels and card readers.
//!
//! ## Features
//!
//! - Control panel (ACU) driving many devices over many links
//! - Peripheral device (PD) side with a pluggable command handler
//! - Secure Channel with AES-128 session keys and MAC chaining
//! - File transfer, PIV data and manufacturer specific commands
//! - Async/await API using Tokio
//!
//! ## Quick Start
//!
//! ```no_run
//! use osdp::{BusOptions, ControlPanel, DeviceOptions, PanelEventKind};
//! use osdp_transport::TcpTransport;
//!
//! #[tokio::main]
//! async fn main() -> osdp::Result<()> {
//!     let panel = ControlPanel::new();
//!     let mut events = panel.subscribe();
//!
//!     // One link, one reader on address 1
//!     let id = panel.start_connection(TcpTransport::new("10.0.0.5", 4001), BusOptions::default());
//!     panel.add_device(id, DeviceOptions::new(1)).await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let PanelEventKind::ConnectionStatus { is_connected: true, .. } = event.kind {
//!             let identification = panel.id_report(id, event.address).await?;
//!             println!("{}", identification);
//!         }
//!     }
//!
//!     panel.shutdown().await;
//!     Ok(())
//! }
//! ```

mod bus;
pub mod control_panel;
pub mod error;
pub mod events;
pub mod file_transfer;
pub mod options;
pub mod peripheral;

// Re-exports
pub use bus::DeviceStatus;
pub use control_panel::ControlPanel;
pub use error::{Error, Result};
pub use events::{ConnectionId, PanelEvent, PanelEventKind};
pub use options::{BusOptions, DeviceOptions, PeripheralOptions};
pub use peripheral::{CommandHandler, NoopHandler, Peripheral, PeripheralHandle};

// Re-export protocol types
pub use osdp_core::{payload, Command, Reply, SessionState, PROTOCOL_VERSION};
pub use osdp_types::NakErrorCode;
