//! Secure channel key material and handshake
//!
//! The secure channel is set up with a three-pass mutual authentication:
//!
//! ```text
//! ACU                                   PD
//!  | osdp_CHLNG   (server random)        |
//!  |------------------------------------>|  derive keys, client cryptogram
//!  | osdp_CCRYPT  (uid, client random,   |
//!  |               client cryptogram)    |
//!  |<------------------------------------|
//!  | initialize_as_host: verify,         |
//!  | derive keys, server cryptogram      |
//!  | osdp_SCRYPT  (server cryptogram)    |
//!  |------------------------------------>|  verify, initial R-MAC
//!  | osdp_RMAC_I  (initial R-MAC)        |
//!  |<------------------------------------|
//!  | establish                           |  establish
//! ```
//!
//! Session keys are derived from the base key with single-block AES-ECB over
//! a two-byte tag followed by the first six bytes of the server random.

use std::fmt;

use rand::RngCore;
use tracing::{debug, warn};

use crate::{
    constants::DEFAULT_SECURE_CHANNEL_KEY,
    crypto::{self, Block},
    error::{Error, Result},
};

/// Size of the server and client random challenges
pub const RANDOM_SIZE: usize = 8;

/// Size of keys, cryptograms and full MACs
pub const KEY_SIZE: usize = 16;

const ENC_KEY_TAG: [u8; 2] = [0x01, 0x82];
const SMAC1_KEY_TAG: [u8; 2] = [0x01, 0x01];
const SMAC2_KEY_TAG: [u8; 2] = [0x01, 0x02];

fn derive_key(base_key: &Block, tag: [u8; 2], server_random: &[u8; RANDOM_SIZE]) -> Block {
    let mut input = [0u8; RANDOM_SIZE];
    input[..2].copy_from_slice(&tag);
    input[2..].copy_from_slice(&server_random[..RANDOM_SIZE - 2]);
    crypto::encrypt_block(base_key, &input)
}

fn concat(first: &[u8; RANDOM_SIZE], second: &[u8; RANDOM_SIZE]) -> Block {
    let mut block = [0u8; KEY_SIZE];
    block[..RANDOM_SIZE].copy_from_slice(first);
    block[RANDOM_SIZE..].copy_from_slice(second);
    block
}

/// Key material of one logical secure channel
///
/// Derived keys are only meaningful once `is_initialized()` is true; MAC
/// chaining and payload encryption additionally need
/// `is_security_established()`.
#[derive(Clone)]
pub struct SecurityContext {
    key: Block,
    server_random: [u8; RANDOM_SIZE],
    client_random: [u8; RANDOM_SIZE],
    server_cryptogram: Block,
    client_cryptogram: Block,
    enc: Block,
    smac1: Block,
    smac2: Block,
    rmac: Block,
    cmac: Block,
    is_initialized: bool,
    is_security_established: bool,
    is_using_default_key: bool,
}

impl SecurityContext {
    /// Create a context for `key`, or for the default key when `None`
    pub fn new(key: Option<[u8; KEY_SIZE]>) -> Self {
        let mut context = Self {
            key: DEFAULT_SECURE_CHANNEL_KEY,
            server_random: [0; RANDOM_SIZE],
            client_random: [0; RANDOM_SIZE],
            server_cryptogram: [0; KEY_SIZE],
            client_cryptogram: [0; KEY_SIZE],
            enc: [0; KEY_SIZE],
            smac1: [0; KEY_SIZE],
            smac2: [0; KEY_SIZE],
            rmac: [0; KEY_SIZE],
            cmac: [0; KEY_SIZE],
            is_initialized: false,
            is_security_established: false,
            is_using_default_key: true,
        };
        context.reset(key);
        context
    }

    /// Start over, optionally with a new base key
    ///
    /// Generates a fresh server random and drops all session state. Passing
    /// `None` keeps the current key.
    pub fn reset(&mut self, key: Option<[u8; KEY_SIZE]>) {
        if let Some(key) = key {
            self.key = key;
        }
        self.is_using_default_key = self.key == DEFAULT_SECURE_CHANNEL_KEY;

        rand::thread_rng().fill_bytes(&mut self.server_random);
        self.clear_session();

        debug!(
            using_default_key = self.is_using_default_key,
            "Security context reset"
        );
    }

    fn clear_session(&mut self) {
        self.client_random = [0; RANDOM_SIZE];
        self.server_cryptogram = [0; KEY_SIZE];
        self.client_cryptogram = [0; KEY_SIZE];
        self.enc = [0; KEY_SIZE];
        self.smac1 = [0; KEY_SIZE];
        self.smac2 = [0; KEY_SIZE];
        self.rmac = [0; KEY_SIZE];
        self.cmac = [0; KEY_SIZE];
        self.is_initialized = false;
        self.is_security_established = false;
    }

    fn derive_session_keys(&mut self) {
        self.enc = derive_key(&self.key, ENC_KEY_TAG, &self.server_random);
        self.smac1 = derive_key(&self.key, SMAC1_KEY_TAG, &self.server_random);
        self.smac2 = derive_key(&self.key, SMAC2_KEY_TAG, &self.server_random);
    }

    /// Verify the PD's cryptogram and compute the server cryptogram (ACU side)
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` if the client cryptogram was not made
    /// with the same base key and challenge. The context stays uninitialized.
    pub fn initialize_as_host(
        &mut self,
        client_random: &[u8; RANDOM_SIZE],
        client_cryptogram: &[u8; KEY_SIZE],
    ) -> Result<()> {
        self.clear_session();

        let enc = derive_key(&self.key, ENC_KEY_TAG, &self.server_random);
        let expected = crypto::encrypt_block(&enc, &concat(&self.server_random, client_random));
        if expected != *client_cryptogram {
            warn!("Client cryptogram rejected");
            return Err(Error::AuthenticationFailed(
                "client cryptogram does not match".into(),
            ));
        }

        self.derive_session_keys();
        self.client_random = *client_random;
        self.client_cryptogram = *client_cryptogram;
        self.server_cryptogram =
            crypto::encrypt_block(&self.enc, &concat(client_random, &self.server_random));
        self.is_initialized = true;

        debug!("Secure channel initialized as host");
        Ok(())
    }

    /// Answer an ACU challenge (PD side)
    ///
    /// Generates the client random, derives the session keys and returns the
    /// client cryptogram to send back.
    pub fn initialize_as_peripheral(
        &mut self,
        server_random: &[u8; RANDOM_SIZE],
    ) -> [u8; KEY_SIZE] {
        let mut client_random = [0u8; RANDOM_SIZE];
        rand::thread_rng().fill_bytes(&mut client_random);
        self.initialize_as_peripheral_with(server_random, &client_random)
    }

    pub(crate) fn initialize_as_peripheral_with(
        &mut self,
        server_random: &[u8; RANDOM_SIZE],
        client_random: &[u8; RANDOM_SIZE],
    ) -> [u8; KEY_SIZE] {
        self.clear_session();
        self.server_random = *server_random;
        self.client_random = *client_random;
        self.derive_session_keys();

        self.client_cryptogram =
            crypto::encrypt_block(&self.enc, &concat(server_random, client_random));
        self.server_cryptogram =
            crypto::encrypt_block(&self.enc, &concat(client_random, server_random));
        self.is_initialized = true;

        debug!("Secure channel initialized as peripheral");
        self.client_cryptogram
    }

    /// Check the cryptogram the ACU sent in `osdp_SCRYPT` (PD side)
    pub fn verify_server_cryptogram(&self, cryptogram: &[u8; KEY_SIZE]) -> Result<()> {
        if !self.is_initialized {
            return Err(Error::InvalidSessionState(
                "server cryptogram received before challenge".into(),
            ));
        }

        if self.server_cryptogram != *cryptogram {
            warn!("Server cryptogram rejected");
            return Err(Error::AuthenticationFailed(
                "server cryptogram does not match".into(),
            ));
        }

        Ok(())
    }

    /// Initial R-MAC: the server cryptogram encrypted under S-MAC1 then S-MAC2
    pub fn initial_rmac(&self) -> Result<[u8; KEY_SIZE]> {
        if !self.is_initialized {
            return Err(Error::InvalidSessionState(
                "initial R-MAC requested before handshake".into(),
            ));
        }

        let first = crypto::encrypt_block(&self.smac1, &self.server_cryptogram);
        Ok(crypto::encrypt_block(&self.smac2, &first))
    }

    /// Complete the handshake with the initial R-MAC
    pub fn establish(&mut self, rmac: [u8; KEY_SIZE]) -> Result<()> {
        if !self.is_initialized {
            return Err(Error::InvalidSessionState(
                "cannot establish secure channel before initialization".into(),
            ));
        }

        self.rmac = rmac;
        self.is_security_established = true;

        debug!("Secure channel established");
        Ok(())
    }

    /// Server random sent in `osdp_CHLNG`
    pub fn server_random(&self) -> &[u8; RANDOM_SIZE] {
        &self.server_random
    }

    pub fn client_random(&self) -> &[u8; RANDOM_SIZE] {
        &self.client_random
    }

    pub fn client_cryptogram(&self) -> &[u8; KEY_SIZE] {
        &self.client_cryptogram
    }

    /// Server cryptogram sent in `osdp_SCRYPT`
    pub fn server_cryptogram(&self) -> &[u8; KEY_SIZE] {
        &self.server_cryptogram
    }

    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    pub fn is_security_established(&self) -> bool {
        self.is_security_established
    }

    pub fn is_using_default_key(&self) -> bool {
        self.is_using_default_key
    }

    pub(crate) fn enc_key(&self) -> &Block {
        &self.enc
    }

    pub(crate) fn mac_keys(&self) -> (&Block, &Block) {
        (&self.smac1, &self.smac2)
    }

    pub(crate) fn rmac(&self) -> &Block {
        &self.rmac
    }

    pub(crate) fn cmac(&self) -> &Block {
        &self.cmac
    }

    pub(crate) fn set_rmac(&mut self, rmac: Block) {
        self.rmac = rmac;
    }

    pub(crate) fn set_cmac(&mut self, cmac: Block) {
        self.cmac = cmac;
    }

    #[cfg(test)]
    pub(crate) fn set_server_random(&mut self, server_random: [u8; RANDOM_SIZE]) {
        self.server_random = server_random;
    }
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("server_random", &hex::encode(self.server_random))
            .field("is_initialized", &self.is_initialized)
            .field("is_security_established", &self.is_security_established)
            .field("is_using_default_key", &self.is_using_default_key)
            .finish_non_exhaustive()
    }
}
