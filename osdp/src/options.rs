//! Configuration of links, devices and peripherals

use std::time::Duration;

use osdp_core::constants::{
    DEFAULT_BUSY_RETRY_DELAY_MS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_REPLY_TIMEOUT_MS, MAX_RETRIES,
};

/// Timing of one link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusOptions {
    /// Time between polls of an idle device
    pub poll_interval: Duration,

    /// How long to wait for a reply before sending again
    pub reply_timeout: Duration,

    /// Retransmissions after the first attempt
    pub max_retries: usize,

    /// Pause before repeating a command the device answered with `BUSY`
    pub busy_retry_delay: Duration,

    /// Pause before reconnecting an offline device or reopening the transport
    pub reconnect_delay: Duration,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            reply_timeout: Duration::from_millis(DEFAULT_REPLY_TIMEOUT_MS),
            max_retries: MAX_RETRIES,
            busy_retry_delay: Duration::from_millis(DEFAULT_BUSY_RETRY_DELAY_MS),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

impl BusOptions {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_busy_retry_delay(mut self, delay: Duration) -> Self {
        self.busy_retry_delay = delay;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// One PD on a link, as seen from the control panel
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceOptions {
    pub address: u8,
    pub name: String,
    pub use_crc: bool,
    pub secure_channel: bool,

    /// Secure channel base key, SCBK-D when `None`
    pub key: Option<[u8; 16]>,
}

impl DeviceOptions {
    /// Plain link with CRC trailers
    pub fn new(address: u8) -> Self {
        Self {
            address,
            name: format!("pd-{}", address),
            use_crc: true,
            secure_channel: false,
            key: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Use the 1-byte checksum instead of CRC-16
    pub fn with_checksum(mut self) -> Self {
        self.use_crc = false;
        self
    }

    /// Run the secure channel with `key`, or SCBK-D when `None`
    pub fn with_secure_channel(mut self, key: Option<[u8; 16]>) -> Self {
        self.secure_channel = true;
        self.key = key;
        self
    }
}

impl std::fmt::Debug for DeviceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceOptions")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("use_crc", &self.use_crc)
            .field("secure_channel", &self.secure_channel)
            .field("has_key", &self.key.is_some())
            .finish()
    }
}

/// Local device settings of a peripheral
#[derive(Clone, PartialEq, Eq)]
pub struct PeripheralOptions {
    pub address: u8,

    /// Reported in `osdp_CCRYPT`
    pub client_uid: [u8; 8],

    /// Secure channel base key, SCBK-D only when `None`
    pub key: Option<[u8; 16]>,

    /// Accept SCBK-D while a key is configured
    pub install_mode: bool,

    pub require_secure_channel: bool,
}

impl PeripheralOptions {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            client_uid: [0; 8],
            key: None,
            install_mode: false,
            require_secure_channel: false,
        }
    }

    pub fn with_client_uid(mut self, uid: [u8; 8]) -> Self {
        self.client_uid = uid;
        self
    }

    pub fn with_key(mut self, key: [u8; 16]) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_install_mode(mut self, install_mode: bool) -> Self {
        self.install_mode = install_mode;
        self
    }

    pub fn with_require_secure_channel(mut self, required: bool) -> Self {
        self.require_secure_channel = required;
        self
    }
}

impl std::fmt::Debug for PeripheralOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralOptions")
            .field("address", &self.address)
            .field("client_uid", &hex::encode(self.client_uid))
            .field("has_key", &self.key.is_some())
            .field("install_mode", &self.install_mode)
            .field("require_secure_channel", &self.require_secure_channel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bus_defaults() {
        let options = BusOptions::default();
        assert_eq!(options.poll_interval, Duration::from_millis(200));
        assert_eq!(options.max_retries, 3);

        let options = options.with_max_retries(1).with_reply_timeout(Duration::from_millis(50));
        assert_eq!(options.max_retries, 1);
        assert_eq!(options.reply_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_device_builders() {
        let options = DeviceOptions::new(3)
            .with_checksum()
            .with_secure_channel(Some([1; 16]));

        assert_eq!(options.name, "pd-3");
        assert!(!options.use_crc);
        assert!(options.secure_channel);
        let debug = format!("{:?}", options);
        assert!(debug.contains("has_key: true"));
        assert!(!debug.contains("[1, 1"));
    }
}
