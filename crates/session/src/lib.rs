//! ADB session client and the process-wide session manager.
//!
//! A session is one connected, authenticated transport to the daemon: TCP,
//! optionally upgraded to TLS mid-handshake, carrying multiplexed logical
//! streams. The manager owns the single active session and serializes
//! command dispatch over it.

pub mod client;
pub mod manager;
pub mod sync;

mod transport;

pub use client::AdbSession;
pub use manager::{SessionManager, SessionStatus};

use std::time::Duration;

use looptap_wire::WireError;

/// TCP connect deadline.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-read deadline on an established session. Exceeding it leaves the
/// session in an unrecoverable state; callers disconnect and reconnect.
pub const READ_TIMEOUT: Duration = Duration::from_secs(8);

/// How long a command waits for the dispatch gate before giving up
/// with [`SessionError::Busy`].
pub const SHELL_GATE_TIMEOUT: Duration = Duration::from_millis(300);

/// `CNXN` protocol version.
pub const CNXN_VERSION: u32 = 0x0100_0001;

/// `STLS` protocol version.
pub const STLS_VERSION: u32 = 0x0100_0000;

/// Identity banner sent in `CNXN`.
pub const SYSTEM_IDENTITY: &str = "host::";

/// `AUTH` sub-types.
pub const AUTH_TOKEN: u32 = 1;
pub const AUTH_SIGNATURE: u32 = 2;
pub const AUTH_RSAPUBLICKEY: u32 = 3;

/// Errors surfaced by sessions and the manager.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("read deadline exceeded")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("daemon rejected authentication")]
    AuthRejected,

    #[error("file transfer failed: {0}")]
    SyncFailed(String),

    #[error("another command is in flight")]
    Busy,

    #[error("no active session")]
    NoActiveSession,

    #[error("identity error: {0}")]
    Identity(#[from] looptap_identity::IdentityError),
}

impl From<WireError> for SessionError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => SessionError::Network(e),
            WireError::BadMessage(msg) => SessionError::Protocol(msg),
        }
    }
}
