//! The process-wide session manager.
//!
//! One session is active at a time and every command goes through it. Two
//! locks with distinct jobs: the dispatch gate bounds how long a caller
//! waits for its turn (300 ms, then `Busy`), and the session slot guards
//! the transport itself. `disconnect` takes only the slot, so it can
//! proceed while other callers queue on the gate.

use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use looptap_identity::Identity;

use crate::client::AdbSession;
use crate::{SHELL_GATE_TIMEOUT, SessionError};

struct ActiveSession {
    session: AdbSession,
    host: IpAddr,
    port: u16,
}

/// Snapshot of the manager's connection state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
}

/// Owns the single active ADB session and serializes dispatch over it.
pub struct SessionManager {
    identity: Arc<Identity>,
    active: Mutex<Option<ActiveSession>>,
    shell_gate: Mutex<()>,
}

impl SessionManager {
    pub fn new(identity: Arc<Identity>) -> Self {
        Self {
            identity,
            active: Mutex::new(None),
            shell_gate: Mutex::new(()),
        }
    }

    /// Connects to the daemon, replacing any existing session.
    pub async fn connect(
        &self,
        host: IpAddr,
        port: u16,
        keep_alive: bool,
    ) -> Result<(), SessionError> {
        let session = AdbSession::connect(host, port, &self.identity, keep_alive).await?;

        let mut slot = self.active.lock().await;
        if let Some(old) = slot.take() {
            debug!(host = %old.host, port = old.port, "replacing existing session");
            old.session.close().await;
        }
        *slot = Some(ActiveSession {
            session,
            host,
            port,
        });
        info!(%host, port, "session active");
        Ok(())
    }

    /// Closes the active session, if any.
    pub async fn disconnect(&self) {
        if let Some(active) = self.active.lock().await.take() {
            active.session.close().await;
            info!(host = %active.host, port = active.port, "session closed");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn status(&self) -> SessionStatus {
        match self.active.lock().await.as_ref() {
            Some(active) => SessionStatus {
                connected: true,
                host: Some(active.host),
                port: Some(active.port),
                tls: Some(active.session.is_tls()),
            },
            None => SessionStatus::default(),
        }
    }

    /// Runs a shell command and returns its output trimmed of surrounding
    /// whitespace.
    pub async fn execute_shell(&self, command: &str) -> Result<String, SessionError> {
        let raw = self.execute_shell_raw(command).await?;
        Ok(String::from_utf8_lossy(&raw).trim().to_string())
    }

    /// Runs a shell command and returns the raw output bytes.
    pub async fn execute_shell_raw(&self, command: &str) -> Result<Vec<u8>, SessionError> {
        let _gate = self.acquire_gate().await?;
        let mut slot = self.active.lock().await;
        let active = slot.as_mut().ok_or(SessionError::NoActiveSession)?;
        active.session.shell_output(command).await
    }

    /// Runs an `exec:` command (raw binary stream, e.g. `screencap -p`).
    pub async fn execute_exec_raw(&self, command: &str) -> Result<Vec<u8>, SessionError> {
        let _gate = self.acquire_gate().await?;
        let mut slot = self.active.lock().await;
        let active = slot.as_mut().ok_or(SessionError::NoActiveSession)?;
        active.session.open_exec(command).await
    }

    /// Pulls a file and returns its bytes.
    pub async fn pull_file_bytes(&self, path: &str) -> Result<Vec<u8>, SessionError> {
        let _gate = self.acquire_gate().await?;
        let mut slot = self.active.lock().await;
        let active = slot.as_mut().ok_or(SessionError::NoActiveSession)?;
        active.session.pull_file(path).await
    }

    /// Pulls a file and returns it as (lossy) UTF-8 text.
    pub async fn pull_file_text(&self, path: &str) -> Result<String, SessionError> {
        let bytes = self.pull_file_bytes(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn acquire_gate(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, SessionError> {
        tokio::time::timeout(SHELL_GATE_TIMEOUT, self.shell_gate.lock())
            .await
            .map_err(|_| SessionError::Busy)
    }
}
