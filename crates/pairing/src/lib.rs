//! Pairing client for the wireless-debugging daemon.
//!
//! Pairing provisions this node's signing key into the daemon's authorized
//! list. The exchange runs over TLS; both sides derive a shared secret with
//! SPAKE2 over P-256 keyed on `pairing code ‖ TLS exported keying material`,
//! then swap AES-128-GCM-encrypted peer-info records carrying their public
//! keys.
//!
//! # Record framing
//!
//! ```text
//! HEADER (6 bytes): [version:u8 = 1] [type:u8] [payload_len:u32 BE]
//! TYPES:            0 = SPAKE2_MSG, 1 = PEER_INFO
//! payload_len <= 16384
//! ```

pub mod auth;
pub mod client;
pub mod frame;

mod spake2;

pub use client::{PairingClient, PairingState};

/// Errors surfaced by pairing.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    /// The peer-info record would not decrypt: the two sides derived
    /// different SPAKE2 secrets, which in practice means the code was wrong.
    #[error("pairing code rejected")]
    InvalidPairingCode,

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// The TLS stack could not export RFC 5705 keying material. Pairing is
    /// impossible without it.
    #[error("TLS keying-material export failed: {0}")]
    TlsExport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("identity error: {0}")]
    Identity(#[from] looptap_identity::IdentityError),
}
