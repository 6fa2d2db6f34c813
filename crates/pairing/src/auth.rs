//! SPAKE2 exchange and the record cipher derived from it.
//!
//! The suite is the one the daemon verifies bit-for-bit: SPAKE2 over NIST
//! P-256 with the `adb pair client` / `adb pair server` role identities,
//! HKDF-SHA256 key derivation, and AES-128-GCM with little-endian counter
//! nonces for the peer-info records. The group math lives in the
//! `spake2` module.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::PairingError;
use crate::spake2::Spake2P256;

const CLIENT_NAME: &[u8] = b"adb pair client\0";
const SERVER_NAME: &[u8] = b"adb pair server\0";

/// HKDF info string for the record cipher key.
const CIPHER_KEY_INFO: &[u8] = b"adb pairing_auth aes-128-gcm key";

/// Record cipher key length (AES-128).
const CIPHER_KEY_LEN: usize = 16;

/// GCM nonce length.
const NONCE_LEN: usize = 12;

/// Which half of the exchange this context plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// An in-flight SPAKE2 exchange.
///
/// `msg` is this side's outbound SPAKE2 message; feed the peer's message to
/// [`finish`](Self::finish) to derive the record cipher.
pub struct PairingExchange {
    state: Spake2P256,
    pub msg: Vec<u8>,
}

impl PairingExchange {
    /// Starts an exchange keyed on `pairing code ‖ exported keying material`.
    pub fn new(role: Role, password: &[u8]) -> Result<Self, PairingError> {
        let state = Spake2P256::start(role, password)?;
        let msg = state.share().to_vec();
        Ok(Self { state, msg })
    }

    /// Completes the exchange and derives the record cipher.
    pub fn finish(self, peer_msg: &[u8]) -> Result<RecordCipher, PairingError> {
        let shared = self.state.finish(peer_msg, CLIENT_NAME, SERVER_NAME)?;

        let mut key = [0u8; CIPHER_KEY_LEN];
        Hkdf::<Sha256>::new(None, &shared)
            .expand(CIPHER_KEY_INFO, &mut key)
            .map_err(|e| PairingError::Protocol(format!("HKDF expand failed: {e}")))?;

        Ok(RecordCipher::new(&key))
    }
}

/// AES-128-GCM over pairing records.
///
/// Nonces are u64 counters, little-endian, zero-extended to 12 bytes;
/// send and receive directions count independently.
pub struct RecordCipher {
    cipher: Aes128Gcm,
    tx_counter: u64,
    rx_counter: u64,
}

impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCipher")
            .field("tx_counter", &self.tx_counter)
            .field("rx_counter", &self.rx_counter)
            .finish_non_exhaustive()
    }
}

impl RecordCipher {
    fn new(key: &[u8; CIPHER_KEY_LEN]) -> Self {
        Self {
            cipher: Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key)),
            tx_counter: 0,
            rx_counter: 0,
        }
    }

    /// Encrypts one outbound record.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, PairingError> {
        let nonce = counter_nonce(self.tx_counter);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| PairingError::Protocol("record encryption failed".into()))?;
        self.tx_counter += 1;
        Ok(ciphertext)
    }

    /// Decrypts one inbound record.
    ///
    /// A failure here after a completed SPAKE2 exchange means the two sides
    /// never agreed on a secret, i.e. the pairing code was wrong.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, PairingError> {
        let nonce = counter_nonce(self.rx_counter);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| PairingError::InvalidPairingCode)?;
        self.rx_counter += 1;
        Ok(plaintext)
    }
}

fn counter_nonce(counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    nonce
}
