//! The node's HTTP control surface.
//!
//! A thin adapter over the session manager: every control route translates
//! its request into a shell/exec/sync operation, dispatches it through the
//! shared session, and wraps the result in the `{code, message, data}`
//! envelope. Binary routes (screenshot, XML dump) stream their payloads
//! directly.

pub mod handlers;
pub mod server;

pub use server::{ApiConfig, ApiServer, ApiState};

/// Errors from running the API server.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
