//! Per-direction MAC and payload encryption over a shared security context
//!
//! Both directions of one link share a single [`SecurityContext`] so the MAC
//! chain stays consistent: a command MAC is computed from the last reply MAC
//! and becomes the IV of the next reply MAC, and so on.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::{
    constants::{BLOCK_SIZE, MAC_SIZE},
    crypto,
    error::{Error, Result},
    security::SecurityContext,
};

/// Security context shared by the two channels of one link
pub type SharedSecurityContext = Arc<Mutex<SecurityContext>>;

/// Direction of traffic a channel protects
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MessageDirection {
    /// ACU to PD; chains from the R-MAC and stores the C-MAC
    Command,
    /// PD to ACU; chains from the C-MAC and stores the R-MAC
    Reply,
}

/// Secure channel for one direction of a link
#[derive(Debug, Clone)]
pub struct SecureChannel {
    context: SharedSecurityContext,
    direction: MessageDirection,
}

impl SecureChannel {
    pub fn new(context: SharedSecurityContext, direction: MessageDirection) -> Self {
        Self { context, direction }
    }

    /// Command and reply channels over the same context
    pub fn pair(context: SharedSecurityContext) -> (Self, Self) {
        (
            Self::new(context.clone(), MessageDirection::Command),
            Self::new(context, MessageDirection::Reply),
        )
    }

    pub fn direction(&self) -> MessageDirection {
        self.direction
    }

    pub fn context(&self) -> &SharedSecurityContext {
        &self.context
    }

    pub fn is_security_established(&self) -> bool {
        self.context.lock().is_security_established()
    }

    pub fn is_using_default_key(&self) -> bool {
        self.context.lock().is_using_default_key()
    }

    /// MAC a framed message and advance the chain
    ///
    /// `message` is the frame from SOM up to, not including, the MAC. Returns
    /// the transmitted 4-byte prefix.
    pub fn generate_mac(&self, message: &[u8]) -> Result<[u8; MAC_SIZE]> {
        let mut context = self.context.lock();
        if !context.is_security_established() {
            return Err(Error::SecureChannelNotEstablished);
        }

        let (smac1, smac2) = context.mac_keys();
        let full = match self.direction {
            MessageDirection::Command => {
                let mac = crypto::mac(smac1, smac2, context.rmac(), message);
                context.set_cmac(mac);
                mac
            }
            MessageDirection::Reply => {
                let mac = crypto::mac(smac1, smac2, context.cmac(), message);
                context.set_rmac(mac);
                mac
            }
        };

        let mut mac = [0u8; MAC_SIZE];
        mac.copy_from_slice(&full[..MAC_SIZE]);

        trace!(direction = ?self.direction, mac = %hex::encode(mac), "Generated MAC");
        Ok(mac)
    }

    fn payload_iv(&self, context: &SecurityContext) -> [u8; BLOCK_SIZE] {
        match self.direction {
            MessageDirection::Command => crypto::complement(context.rmac()),
            MessageDirection::Reply => crypto::complement(context.cmac()),
        }
    }

    /// Pad and encrypt a payload
    pub fn encrypt_payload(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let context = self.context.lock();
        if !context.is_security_established() {
            return Err(Error::SecureChannelNotEstablished);
        }

        let mut data = crypto::pad(plain);
        crypto::cbc_encrypt(context.enc_key(), &self.payload_iv(&context), &mut data);
        Ok(data)
    }

    /// Decrypt a payload and strip its padding
    pub fn decrypt_payload(&self, cipher: &[u8]) -> Result<Vec<u8>> {
        let context = self.context.lock();
        if !context.is_security_established() {
            return Err(Error::SecureChannelNotEstablished);
        }

        if cipher.is_empty() || cipher.len() % BLOCK_SIZE != 0 {
            return Err(Error::DecryptionFailed(format!(
                "{} bytes is not a whole number of blocks",
                cipher.len()
            )));
        }

        let mut data = cipher.to_vec();
        crypto::cbc_decrypt(context.enc_key(), &self.payload_iv(&context), &mut data);

        let plain_len = crypto::unpad(&data)
            .ok_or_else(|| Error::DecryptionFailed("padding marker not found".into()))?
            .len();
        data.truncate(plain_len);
        Ok(data)
    }
}
