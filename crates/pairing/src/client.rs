//! The pairing state machine and its TLS transport.

use std::net::IpAddr;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use looptap_identity::Identity;

use crate::PairingError;
use crate::auth::{PairingExchange, Role};
use crate::frame::{PacketKind, read_packet, write_packet};

/// RFC 5705 export label. The trailing NUL is part of the label.
pub const EXPORT_LABEL: &[u8] = b"adb-label\0";

/// Exported keying-material length.
pub const EXPORT_LEN: usize = 64;

/// Fixed size of the encrypted peer-info plaintext.
const PEER_INFO_LEN: usize = 8192;

/// Peer-info record type for an ADB-encoded RSA public key.
const PEER_INFO_TYPE_ADB_PUBKEY: u8 = 0;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(8);

/// Pairing progress. Linear; terminal on success or any error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Ready,
    ExchangingMsgs,
    ExchangingPeerInfo,
    Stopped,
}

/// One-shot pairing client.
pub struct PairingClient {
    host: IpAddr,
    port: u16,
    code: String,
    state: PairingState,
}

impl PairingClient {
    /// Creates a client for the daemon's pairing endpoint with the 6-digit
    /// code the device is showing.
    pub fn new(host: IpAddr, port: u16, code: impl Into<String>) -> Self {
        Self {
            host,
            port,
            code: code.into(),
            state: PairingState::Ready,
        }
    }

    /// Current position in the pairing state machine.
    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Runs the pairing exchange to completion.
    ///
    /// On success the daemon has stored `identity`'s public key and regular
    /// sessions can authenticate. The client is consumed; pairing is not
    /// restartable mid-flight.
    pub async fn pair(mut self, identity: &Identity) -> Result<(), PairingError> {
        info!(host = %self.host, port = self.port, "pairing with daemon");

        // TCP + TLS. The TLS handshake must finish before anything else:
        // the SPAKE2 password is bound to this session's keying material.
        let tcp = tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((self.host, self.port)),
        )
        .await
        .map_err(|_| timeout_err("pairing connect"))??;
        tcp.set_nodelay(true)?;

        let connector = TlsConnector::from(identity.tls_client_config()?);
        let server_name = ServerName::try_from(self.host.to_string())
            .map_err(|e| PairingError::Protocol(format!("bad server name: {e}")))?;
        let mut tls = connector.connect(server_name, tcp).await?;

        // RFC 5705 export keyed to this exact TLS session.
        let (_, conn) = tls.get_ref();
        let exported = conn
            .export_keying_material([0u8; EXPORT_LEN], EXPORT_LABEL, None)
            .map_err(|e| PairingError::TlsExport(e.to_string()))?;

        let mut password = Vec::with_capacity(self.code.len() + EXPORT_LEN);
        password.extend_from_slice(self.code.as_bytes());
        password.extend_from_slice(&exported);

        // SPAKE2 message exchange.
        self.state = PairingState::ExchangingMsgs;
        let exchange = PairingExchange::new(Role::Client, &password)?;
        write_packet(&mut tls, PacketKind::Spake2Msg, &exchange.msg).await?;

        let (kind, peer_msg) = tokio::time::timeout(READ_TIMEOUT, read_packet(&mut tls))
            .await
            .map_err(|_| timeout_err("SPAKE2 exchange"))??;
        if kind != PacketKind::Spake2Msg {
            self.state = PairingState::Stopped;
            return Err(PairingError::Protocol(format!(
                "expected SPAKE2_MSG, got {kind:?}"
            )));
        }
        let mut cipher = exchange.finish(&peer_msg)?;
        debug!("SPAKE2 exchange complete");

        // Encrypted peer-info swap.
        self.state = PairingState::ExchangingPeerInfo;
        let mut peer_info = [0u8; PEER_INFO_LEN];
        peer_info[0] = PEER_INFO_TYPE_ADB_PUBKEY;
        let public_key = identity.adb_public_key();
        if public_key.len() >= PEER_INFO_LEN {
            self.state = PairingState::Stopped;
            return Err(PairingError::Protocol(format!(
                "public key of {} bytes does not fit a peer-info record",
                public_key.len()
            )));
        }
        peer_info[1..1 + public_key.len()].copy_from_slice(public_key);

        let sealed = cipher.encrypt(&peer_info)?;
        write_packet(&mut tls, PacketKind::PeerInfo, &sealed).await?;

        let (kind, sealed_peer) = tokio::time::timeout(READ_TIMEOUT, read_packet(&mut tls))
            .await
            .map_err(|_| timeout_err("peer-info exchange"))??;
        if kind != PacketKind::PeerInfo {
            self.state = PairingState::Stopped;
            return Err(PairingError::Protocol(format!(
                "expected PEER_INFO, got {kind:?}"
            )));
        }

        // This decrypt is the code check: a wrong code yields a different
        // SPAKE2 secret and the record will not authenticate.
        let result = cipher.decrypt(&sealed_peer);
        self.state = PairingState::Stopped;
        let peer = result?;
        if peer.len() != PEER_INFO_LEN {
            return Err(PairingError::Protocol(format!(
                "peer-info record is {} bytes, expected {PEER_INFO_LEN}",
                peer.len()
            )));
        }

        let _ = tls.shutdown().await;
        info!("pairing complete, key installed on daemon");
        Ok(())
    }
}

fn timeout_err(what: &str) -> PairingError {
    PairingError::Network(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("{what} timed out"),
    ))
}
