//! File transfer to a peripheral (`osdp_FILETRANSFER`)
//!
//! The file is cut into fragments no larger than the device's receive
//! buffer allows. After each fragment the device answers `osdp_FTSTAT`,
//! which may ask for a pause or a different fragment size. Once all data is
//! sent, empty fragments keep the exchange going until the device reports it
//! has processed the file.

use std::time::Duration;

use osdp_core::constants::MAX_FRAME_SIZE;
use osdp_core::payload::{FileTransferFragment, FileTransferStatus};
use osdp_core::{Command, Reply};
use tracing::{debug, info, warn};

use crate::{
    control_panel::ControlPanel,
    error::{Error, Result},
    events::ConnectionId,
};

/// Fragment size when the device does not report a receive buffer
pub const DEFAULT_FRAGMENT_SIZE: usize = 128;

/// Bytes of a frame that are not fragment data: header, security block,
/// function code, fragment header, MAC, CRC and worst-case padding
const FRAGMENT_OVERHEAD: usize = 5 + 3 + 1 + 11 + 4 + 2 + 16;

/// Largest fragment that still fits in one frame
pub const MAX_FRAGMENT_SIZE: usize = MAX_FRAME_SIZE - FRAGMENT_OVERHEAD;

/// Empty fragments sent while waiting for the device to finish
const MAX_FINISHING_POLLS: usize = 100;

/// Fragment size for a device receive buffer of `buffer_size` bytes
pub fn fragment_size(buffer_size: Option<u16>) -> usize {
    match buffer_size {
        Some(size) if (size as usize) > FRAGMENT_OVERHEAD => fit_message(size),
        _ => DEFAULT_FRAGMENT_SIZE,
    }
}

/// Fragment data that fits a message of `message_size` bytes
fn fit_message(message_size: u16) -> usize {
    (message_size as usize)
        .saturating_sub(FRAGMENT_OVERHEAD)
        .clamp(1, MAX_FRAGMENT_SIZE)
}

/// Progress of one transfer, updated from each `osdp_FTSTAT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TransferState {
    pub(crate) offset: usize,
    pub(crate) fragment_size: usize,
    pub(crate) delay: Duration,
}

impl TransferState {
    pub(crate) fn new(fragment_size: usize) -> Self {
        Self {
            offset: 0,
            fragment_size,
            delay: Duration::ZERO,
        }
    }

    /// Next fragment of `data`, empty once everything is sent
    pub(crate) fn fragment(&self, file_type: u8, data: &[u8]) -> FileTransferFragment {
        let end = (self.offset + self.fragment_size).min(data.len());
        FileTransferFragment {
            file_type,
            total_size: data.len() as u32,
            offset: self.offset as u32,
            data: data[self.offset.min(data.len())..end].to_vec(),
        }
    }

    /// Apply the device's answer to `sent`; `Some` ends the transfer
    pub(crate) fn update(
        &mut self,
        sent: &FileTransferFragment,
        reply: Reply,
    ) -> Result<Option<FileTransferStatus>> {
        self.offset += sent.data.len();

        let status = match reply {
            Reply::FileTransferStatus(status) => status,
            Reply::Ack => {
                self.delay = Duration::ZERO;
                return Ok(None);
            }
            other => {
                return Err(osdp_core::Error::UnexpectedReply(other.to_string()).into());
            }
        };

        if status.status.is_failure() {
            return Err(Error::FileTransfer(format!("device reported {:?}", status.status)));
        }

        if status.update_message_max > 0 {
            self.fragment_size = fit_message(status.update_message_max);
        }
        self.delay = Duration::from_millis(status.delay as u64);

        Ok(status.status.is_complete().then_some(status))
    }
}

/// Send `data` as file `file_type` to the device at `address`
pub(crate) async fn send_file(
    panel: &ControlPanel,
    id: ConnectionId,
    address: u8,
    file_type: u8,
    data: &[u8],
) -> Result<FileTransferStatus> {
    let buffer_size = panel
        .device_capabilities(id, address)
        .await
        .ok()
        .and_then(|capabilities| capabilities.receive_buffer_size());

    let mut state = TransferState::new(fragment_size(buffer_size));
    let mut finishing_polls = 0;

    info!(
        address,
        file_type,
        size = data.len(),
        fragment_size = state.fragment_size,
        "Starting file transfer"
    );

    loop {
        let fragment = state.fragment(file_type, data);
        if fragment.data.is_empty() {
            finishing_polls += 1;
            if finishing_polls > MAX_FINISHING_POLLS {
                warn!(address, "Device did not finish file transfer");
                return Err(Error::FileTransfer("device did not finish processing".into()));
            }
        }

        debug!(address, offset = fragment.offset, len = fragment.data.len(), "Sending fragment");
        let reply = panel
            .send_command(id, address, Command::FileTransfer(fragment.clone()))
            .await?;

        if let Some(status) = state.update(&fragment, reply)? {
            info!(address, status = ?status.status, "File transfer complete");
            return Ok(status);
        }

        if !state.delay.is_zero() {
            tokio::time::sleep(state.delay).await;
        }
    }
}
