//! The ADB session client: handshake, authentication, and the stream
//! multiplexer.

use std::net::{IpAddr, SocketAddr};

use rustls::pki_types::ServerName;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpSocket;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};

use looptap_identity::Identity;
use looptap_wire::{Command, Message, read_message, write_message};

use crate::sync::{SyncEvent, SyncReader, recv_request};
use crate::transport::Transport;
use crate::{
    AUTH_RSAPUBLICKEY, AUTH_SIGNATURE, AUTH_TOKEN, CNXN_VERSION, CONNECT_TIMEOUT, READ_TIMEOUT,
    STLS_VERSION, SYSTEM_IDENTITY, SessionError,
};

/// A connected, authenticated ADB session.
///
/// All operations take `&mut self`: exclusive access is what serializes
/// writes, so messages are never interleaved mid-payload.
pub struct AdbSession {
    transport: Transport,
    next_local_id: u32,
    banner: Option<String>,
}

impl std::fmt::Debug for AdbSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdbSession")
            .field("next_local_id", &self.next_local_id)
            .field("banner", &self.banner)
            .finish_non_exhaustive()
    }
}

impl AdbSession {
    /// Connects and authenticates against the daemon's connect endpoint.
    ///
    /// Handles both authentication shapes: the `STLS` upgrade (where the
    /// TLS handshake itself is the authentication) and the token/signature/
    /// public-key dance on plaintext transports.
    pub async fn connect(
        host: IpAddr,
        port: u16,
        identity: &Identity,
        keep_alive: bool,
    ) -> Result<Self, SessionError> {
        let addr = SocketAddr::new(host, port);
        let socket = match host {
            IpAddr::V4(_) => TcpSocket::new_v4()?,
            IpAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_keepalive(keep_alive)?;

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, socket.connect(addr))
            .await
            .map_err(|_| SessionError::Timeout)??;
        stream.set_nodelay(true)?;
        debug!(%addr, "TCP connected, starting ADB handshake");

        let mut transport = Transport::Plain(stream);

        let mut cnxn_payload = SYSTEM_IDENTITY.as_bytes().to_vec();
        cnxn_payload.push(0);
        write_message(
            &mut transport,
            &Message::new(
                Command::Cnxn,
                CNXN_VERSION,
                looptap_wire::MAX_PAYLOAD as u32,
                cnxn_payload,
            ),
        )
        .await?;

        let banner = loop {
            let msg = read_timed(&mut transport).await?;
            match msg.command {
                Command::Stls => {
                    write_message(
                        &mut transport,
                        &Message::empty(Command::Stls, STLS_VERSION, 0),
                    )
                    .await?;
                    transport = upgrade_to_tls(transport, host, identity).await?;
                    debug!("transport upgraded to TLS");
                }
                Command::Auth => {
                    break handle_auth(&mut transport, msg, identity).await?;
                }
                Command::Cnxn => {
                    break parse_banner(&msg.payload);
                }
                other => {
                    return Err(SessionError::Protocol(format!(
                        "unexpected {other} during handshake"
                    )));
                }
            }
        };

        debug!(banner = banner.as_deref().unwrap_or(""), "session established");
        Ok(Self {
            transport,
            next_local_id: 1,
            banner,
        })
    }

    /// The device banner from the daemon's `CNXN` (e.g. `device::...`).
    pub fn device_banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// `true` once the transport has been upgraded to TLS.
    pub fn is_tls(&self) -> bool {
        self.transport.is_tls()
    }

    /// Runs `shell:<command>` (line-buffered text, no tty), streaming output
    /// chunks into `sink`.
    pub async fn open_shell(
        &mut self,
        command: &str,
        sink: &mpsc::Sender<Vec<u8>>,
    ) -> Result<(), SessionError> {
        let service = format!("shell:{command}");
        self.run_stream(&service, &mut |data| {
            // A full sink drops output rather than stalling the multiplexer.
            if sink.try_send(data.to_vec()).is_err() {
                warn!("shell sink full, dropping {} bytes", data.len());
            }
        })
        .await
    }

    /// Runs `exec:<command>` (raw binary stream) and returns the collected
    /// output.
    pub async fn open_exec(&mut self, command: &str) -> Result<Vec<u8>, SessionError> {
        let service = format!("exec:{command}");
        let mut out = Vec::new();
        self.run_stream(&service, &mut |data| out.extend_from_slice(data))
            .await?;
        Ok(out)
    }

    /// Runs `shell:<command>` and returns the collected output.
    pub async fn shell_output(&mut self, command: &str) -> Result<Vec<u8>, SessionError> {
        let service = format!("shell:{command}");
        let mut out = Vec::new();
        self.run_stream(&service, &mut |data| out.extend_from_slice(data))
            .await?;
        Ok(out)
    }

    /// Pulls a file over the sync sub-protocol.
    pub async fn pull_file(&mut self, path: &str) -> Result<Vec<u8>, SessionError> {
        let local_id = self.alloc_local_id();
        self.write(Message::open(local_id, "sync:")).await?;

        // Wait for the open to be acknowledged.
        let remote_id = loop {
            let msg = self.read().await?;
            if msg.arg1 != local_id {
                self.answer_foreign(&msg).await?;
                continue;
            }
            match msg.command {
                Command::Okay => break msg.arg0,
                Command::Clse => {
                    self.write(Message::clse(local_id, msg.arg0)).await?;
                    return Err(SessionError::Protocol("sync service refused".into()));
                }
                other => {
                    return Err(SessionError::Protocol(format!(
                        "unexpected {other} while opening sync stream"
                    )));
                }
            }
        };

        self.write(Message::wrte(local_id, remote_id, recv_request(path)))
            .await?;

        let mut parser = SyncReader::new();
        let mut content = Vec::new();
        let mut saw_data = false;

        loop {
            let msg = self.read().await?;
            if msg.arg1 != local_id {
                self.answer_foreign(&msg).await?;
                continue;
            }
            match msg.command {
                // Ack of our RECV write.
                Command::Okay => {}
                Command::Wrte => {
                    self.write(Message::okay(local_id, remote_id)).await?;
                    for event in parser.feed(&msg.payload)? {
                        match event {
                            SyncEvent::Data(chunk) => {
                                saw_data = true;
                                content.extend_from_slice(&chunk);
                            }
                            SyncEvent::Done => {
                                // Some daemon versions delay their CLSE;
                                // close eagerly instead of waiting.
                                self.write(Message::clse(local_id, remote_id)).await?;
                                trace!(bytes = content.len(), "pull complete");
                                return Ok(content);
                            }
                            SyncEvent::Fail(reason) => {
                                let _ = self.write(Message::clse(local_id, remote_id)).await;
                                return Err(SessionError::SyncFailed(reason));
                            }
                        }
                    }
                }
                Command::Clse => {
                    self.write(Message::clse(local_id, msg.arg0)).await?;
                    if saw_data && !content.is_empty() {
                        // Early close after real content: deliver what we got.
                        return Ok(content);
                    }
                    return Err(SessionError::Protocol(
                        "sync stream closed before DONE".into(),
                    ));
                }
                other => {
                    return Err(SessionError::Protocol(format!(
                        "unexpected {other} on sync stream"
                    )));
                }
            }
        }
    }

    /// Closes the session socket. Errors on shutdown are ignored; the
    /// session is gone either way.
    pub async fn close(mut self) {
        let _ = self.transport.shutdown().await;
    }

    /// Opens `service` and forwards every `WRTE` payload to `on_data` until
    /// the peer closes the stream.
    async fn run_stream(
        &mut self,
        service: &str,
        on_data: &mut (dyn FnMut(&[u8]) + Send),
    ) -> Result<(), SessionError> {
        let local_id = self.alloc_local_id();
        trace!(service, local_id, "opening stream");
        self.write(Message::open(local_id, service)).await?;

        let mut remote_id: Option<u32> = None;
        loop {
            let msg = self.read().await?;
            if msg.arg1 != local_id {
                self.answer_foreign(&msg).await?;
                continue;
            }
            match msg.command {
                Command::Okay => {
                    // First OKAY acknowledges the open and carries the
                    // peer's stream id.
                    if remote_id.is_none() {
                        remote_id = Some(msg.arg0);
                    }
                }
                Command::Wrte => {
                    let rid = remote_id.ok_or_else(|| {
                        SessionError::Protocol("WRTE before stream was acknowledged".into())
                    })?;
                    on_data(&msg.payload);
                    self.write(Message::okay(local_id, rid)).await?;
                }
                Command::Clse => {
                    self.write(Message::clse(local_id, msg.arg0)).await?;
                    if remote_id.is_none() {
                        return Err(SessionError::Protocol(format!(
                            "service '{service}' refused"
                        )));
                    }
                    return Ok(());
                }
                other => {
                    return Err(SessionError::Protocol(format!(
                        "unexpected {other} on stream {local_id}"
                    )));
                }
            }
        }
    }

    /// Answers a message routed to a stream we do not own. The daemon can
    /// interleave streams during sync; a courteous ack keeps it moving.
    async fn answer_foreign(&mut self, msg: &Message) -> Result<(), SessionError> {
        trace!(command = %msg.command, arg0 = msg.arg0, arg1 = msg.arg1, "foreign stream message");
        match msg.command {
            Command::Wrte => self.write(Message::okay(msg.arg1, msg.arg0)).await,
            Command::Clse => self.write(Message::clse(msg.arg1, msg.arg0)).await,
            _ => Ok(()),
        }
    }

    fn alloc_local_id(&mut self) -> u32 {
        next_stream_id(&mut self.next_local_id)
    }

    async fn read(&mut self) -> Result<Message, SessionError> {
        read_timed(&mut self.transport).await
    }

    async fn write(&mut self, msg: Message) -> Result<(), SessionError> {
        write_message(&mut self.transport, &msg)
            .await
            .map_err(Into::into)
    }
}

async fn read_timed(transport: &mut Transport) -> Result<Message, SessionError> {
    match tokio::time::timeout(READ_TIMEOUT, read_message(transport)).await {
        Ok(Ok(msg)) => {
            trace!(command = %msg.command, arg0 = msg.arg0, arg1 = msg.arg1, len = msg.payload.len(), "recv");
            Ok(msg)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(SessionError::Timeout),
    }
}

/// The token/signature/public-key exchange on plaintext transports.
///
/// Returns the device banner from the final `CNXN`.
async fn handle_auth(
    transport: &mut Transport,
    first: Message,
    identity: &Identity,
) -> Result<Option<String>, SessionError> {
    if first.arg0 != AUTH_TOKEN {
        return Err(SessionError::Protocol(format!(
            "unexpected AUTH type {}",
            first.arg0
        )));
    }

    let signature = identity.sign_token(&first.payload)?;
    write_message(
        transport,
        &Message::new(Command::Auth, AUTH_SIGNATURE, 0, signature),
    )
    .await?;

    let msg = read_auth_reply(transport).await?;
    if msg.command == Command::Cnxn {
        return Ok(parse_banner(&msg.payload));
    }

    // The daemon does not know our key yet. Offer it; on the first attempt
    // this pops the authorization prompt on the device.
    debug!("signature not accepted, offering public key");
    write_message(
        transport,
        &Message::new(
            Command::Auth,
            AUTH_RSAPUBLICKEY,
            0,
            identity.adb_public_key().to_vec(),
        ),
    )
    .await?;

    let msg = read_auth_reply(transport).await?;
    match msg.command {
        Command::Cnxn => Ok(parse_banner(&msg.payload)),
        _ => Err(SessionError::AuthRejected),
    }
}

/// Reads the daemon's next answer during authentication, mapping a closed
/// connection to rejection.
async fn read_auth_reply(transport: &mut Transport) -> Result<Message, SessionError> {
    match read_timed(transport).await {
        Ok(msg) => Ok(msg),
        Err(SessionError::Network(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(SessionError::AuthRejected)
        }
        Err(e) => Err(e),
    }
}

async fn upgrade_to_tls(
    transport: Transport,
    host: IpAddr,
    identity: &Identity,
) -> Result<Transport, SessionError> {
    let Transport::Plain(tcp) = transport else {
        return Err(SessionError::Protocol("duplicate STLS upgrade".into()));
    };

    let connector = TlsConnector::from(identity.tls_client_config()?);
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| SessionError::Protocol(format!("bad server name: {e}")))?;
    let tls = connector.connect(server_name, tcp).await?;
    Ok(Transport::Tls(Box::new(tls)))
}

/// Advances the stream id counter: monotonic, wrapping from `u32::MAX`
/// back to 1, never 0.
fn next_stream_id(counter: &mut u32) -> u32 {
    let id = *counter;
    *counter = if id == u32::MAX { 1 } else { id + 1 };
    id
}

fn parse_banner(payload: &[u8]) -> Option<String> {
    if payload.is_empty() {
        return None;
    }
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    Some(String::from_utf8_lossy(&payload[..end]).into_owned())
}
