//! Session client driven against a scripted daemon on loopback.
//!
//! Each test spawns a task that plays the daemon's half of the exchange
//! message by message, so every assertion covers real framing on a real
//! socket.

use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use tokio::net::{TcpListener, TcpStream};

use looptap_identity::Identity;
use looptap_session::{AdbSession, SessionError, SessionManager};
use looptap_wire::{Command, Message, read_message, write_message};

const DAEMON_STREAM_ID: u32 = 100;

fn test_identity() -> Arc<Identity> {
    static IDENTITY: OnceLock<(tempfile::TempDir, Arc<Identity>)> = OnceLock::new();
    let (_, identity) = IDENTITY.get_or_init(|| {
        let tmp = tempfile::tempdir().unwrap();
        let identity = Arc::new(Identity::load_or_create(tmp.path(), "daemon-test").unwrap());
        (tmp, identity)
    });
    identity.clone()
}

async fn bind() -> (TcpListener, IpAddr, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr.ip(), addr.port())
}

/// Accepts the TCP connection and answers the plaintext `CNXN` handshake.
async fn accept_with_cnxn(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let msg = read_message(&mut stream).await.unwrap();
    assert_eq!(msg.command, Command::Cnxn);
    assert_eq!(msg.payload, b"host::\0");

    write_message(
        &mut stream,
        &Message::new(
            Command::Cnxn,
            0x0100_0001,
            0x10_0000,
            b"device::ro.product.name=mock;\0".to_vec(),
        ),
    )
    .await
    .unwrap();
    stream
}

/// Serves one `shell:`/`exec:` stream: ack the open, write `output`, close.
async fn serve_stream(stream: &mut TcpStream, expected_service: &str, output: &[u8]) {
    let open = read_message(stream).await.unwrap();
    assert_eq!(open.command, Command::Open);
    assert_eq!(open.payload, [expected_service.as_bytes(), b"\0"].concat());
    let client_id = open.arg0;

    write_message(stream, &Message::okay(DAEMON_STREAM_ID, client_id))
        .await
        .unwrap();
    write_message(
        stream,
        &Message::wrte(DAEMON_STREAM_ID, client_id, output.to_vec()),
    )
    .await
    .unwrap();

    let ack = read_message(stream).await.unwrap();
    assert_eq!(ack.command, Command::Okay);
    assert_eq!(ack.arg0, client_id);
    assert_eq!(ack.arg1, DAEMON_STREAM_ID);

    write_message(stream, &Message::clse(DAEMON_STREAM_ID, client_id))
        .await
        .unwrap();
    let clse = read_message(stream).await.unwrap();
    assert_eq!(clse.command, Command::Clse);
}

#[tokio::test]
async fn plain_handshake_and_shell_output() {
    let (listener, host, port) = bind().await;
    let daemon = tokio::spawn(async move {
        let mut stream = accept_with_cnxn(&listener).await;
        serve_stream(&mut stream, "shell:echo hi", b"hi\n").await;
    });

    let identity = test_identity();
    let mut session = AdbSession::connect(host, port, &identity, false)
        .await
        .unwrap();
    assert_eq!(
        session.device_banner(),
        Some("device::ro.product.name=mock;")
    );
    assert!(!session.is_tls());

    let out = session.shell_output("echo hi").await.unwrap();
    assert_eq!(out, b"hi\n");

    session.close().await;
    daemon.await.unwrap();
}

#[tokio::test]
async fn auth_signature_round_verifies() {
    let (listener, host, port) = bind().await;
    let identity = test_identity();
    let public = identity.public_key().clone();

    let daemon = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let msg = read_message(&mut stream).await.unwrap();
        assert_eq!(msg.command, Command::Cnxn);

        let token = [0x42u8; 20];
        write_message(
            &mut stream,
            &Message::new(Command::Auth, 1, 0, token.to_vec()),
        )
        .await
        .unwrap();

        let sig = read_message(&mut stream).await.unwrap();
        assert_eq!(sig.command, Command::Auth);
        assert_eq!(sig.arg0, 2);
        public
            .verify(Pkcs1v15Sign::new::<Sha1>(), &token, &sig.payload)
            .expect("daemon-side signature check");

        write_message(
            &mut stream,
            &Message::new(Command::Cnxn, 0x0100_0001, 0x10_0000, b"device::\0".to_vec()),
        )
        .await
        .unwrap();
    });

    let session = AdbSession::connect(host, port, &identity, false)
        .await
        .unwrap();
    assert_eq!(session.device_banner(), Some("device::"));
    session.close().await;
    daemon.await.unwrap();
}

#[tokio::test]
async fn auth_offers_public_key_when_unknown() {
    let (listener, host, port) = bind().await;
    let identity = test_identity();
    let expected_key = identity.adb_public_key().to_vec();

    let daemon = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_message(&mut stream).await.unwrap();

        write_message(
            &mut stream,
            &Message::new(Command::Auth, 1, 0, vec![0x11; 20]),
        )
        .await
        .unwrap();

        // Ignore the signature; pretend the key is unknown and challenge
        // again.
        let sig = read_message(&mut stream).await.unwrap();
        assert_eq!(sig.arg0, 2);
        write_message(
            &mut stream,
            &Message::new(Command::Auth, 1, 0, vec![0x22; 20]),
        )
        .await
        .unwrap();

        let offer = read_message(&mut stream).await.unwrap();
        assert_eq!(offer.command, Command::Auth);
        assert_eq!(offer.arg0, 3);
        assert_eq!(offer.payload, expected_key);

        write_message(
            &mut stream,
            &Message::new(Command::Cnxn, 0x0100_0001, 0x10_0000, b"device::\0".to_vec()),
        )
        .await
        .unwrap();
    });

    let session = AdbSession::connect(host, port, &identity, false)
        .await
        .unwrap();
    session.close().await;
    daemon.await.unwrap();
}

#[tokio::test]
async fn auth_rejection_after_public_key() {
    let (listener, host, port) = bind().await;
    let daemon = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_message(&mut stream).await.unwrap();
        write_message(
            &mut stream,
            &Message::new(Command::Auth, 1, 0, vec![0x33; 20]),
        )
        .await
        .unwrap();
        read_message(&mut stream).await.unwrap(); // signature
        write_message(
            &mut stream,
            &Message::new(Command::Auth, 1, 0, vec![0x44; 20]),
        )
        .await
        .unwrap();
        read_message(&mut stream).await.unwrap(); // public key offer
        // Close without CNXN: the user declined the prompt.
        drop(stream);
    });

    let identity = test_identity();
    let err = AdbSession::connect(host, port, &identity, false)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AuthRejected));
    daemon.await.unwrap();
}

#[tokio::test]
async fn stls_upgrade_completes_handshake() {
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio_rustls::TlsAcceptor;

    let (listener, host, port) = bind().await;
    let daemon = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let msg = read_message(&mut stream).await.unwrap();
        assert_eq!(msg.command, Command::Cnxn);

        write_message(&mut stream, &Message::empty(Command::Stls, 0x0100_0000, 0))
            .await
            .unwrap();
        let reply = read_message(&mut stream).await.unwrap();
        assert_eq!(reply.command, Command::Stls);
        assert_eq!(reply.arg0, 0x0100_0000);

        let certified =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = CertificateDer::from(certified.cert.der().to_vec());
        let key =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .unwrap();
        let mut tls = TlsAcceptor::from(Arc::new(config))
            .accept(stream)
            .await
            .unwrap();

        // TLS handshake is the authentication; greet over the new transport.
        write_message(
            &mut tls,
            &Message::new(
                Command::Cnxn,
                0x0100_0001,
                0x10_0000,
                b"device::tls=1;\0".to_vec(),
            ),
        )
        .await
        .unwrap();
    });

    let identity = test_identity();
    let session = AdbSession::connect(host, port, &identity, false)
        .await
        .unwrap();
    assert!(session.is_tls());
    assert_eq!(session.device_banner(), Some("device::tls=1;"));
    session.close().await;
    daemon.await.unwrap();
}

fn sync_packet(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut p = id.to_vec();
    p.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    p.extend_from_slice(payload);
    p
}

/// Serves the sync open + RECV request, then runs `script` for the data
/// phase.
async fn serve_sync_open(stream: &mut TcpStream, expected_path: &str) -> u32 {
    let open = read_message(stream).await.unwrap();
    assert_eq!(open.command, Command::Open);
    assert_eq!(open.payload, b"sync:\0");
    let client_id = open.arg0;

    write_message(stream, &Message::okay(DAEMON_STREAM_ID, client_id))
        .await
        .unwrap();

    let recv = read_message(stream).await.unwrap();
    assert_eq!(recv.command, Command::Wrte);
    let mut expected = b"RECV".to_vec();
    expected.extend_from_slice(&(expected_path.len() as u32).to_le_bytes());
    expected.extend_from_slice(expected_path.as_bytes());
    assert_eq!(recv.payload, expected);

    write_message(stream, &Message::okay(DAEMON_STREAM_ID, client_id))
        .await
        .unwrap();
    client_id
}

async fn send_sync_frame(stream: &mut TcpStream, client_id: u32, frame: Vec<u8>) {
    write_message(stream, &Message::wrte(DAEMON_STREAM_ID, client_id, frame))
        .await
        .unwrap();
    let ack = read_message(stream).await.unwrap();
    assert_eq!(ack.command, Command::Okay);
}

#[tokio::test]
async fn pull_file_reassembles_data_frames() {
    let (listener, host, port) = bind().await;
    let daemon = tokio::spawn(async move {
        let mut stream = accept_with_cnxn(&listener).await;
        let client_id = serve_sync_open(&mut stream, "/any").await;

        send_sync_frame(&mut stream, client_id, sync_packet(b"DATA", b"abc")).await;
        send_sync_frame(&mut stream, client_id, sync_packet(b"DATA", b"defgh")).await;
        send_sync_frame(&mut stream, client_id, sync_packet(b"DONE", &[])).await;

        // The client closes eagerly after DONE instead of waiting for ours.
        let clse = read_message(&mut stream).await.unwrap();
        assert_eq!(clse.command, Command::Clse);
        assert_eq!(clse.arg0, client_id);
        assert_eq!(clse.arg1, DAEMON_STREAM_ID);
    });

    let identity = test_identity();
    let mut session = AdbSession::connect(host, port, &identity, false)
        .await
        .unwrap();
    let content = session.pull_file("/any").await.unwrap();
    assert_eq!(content, b"abcdefgh");

    session.close().await;
    daemon.await.unwrap();
}

#[tokio::test]
async fn pull_file_packet_straddles_wrte_frames() {
    let (listener, host, port) = bind().await;
    let daemon = tokio::spawn(async move {
        let mut stream = accept_with_cnxn(&listener).await;
        let client_id = serve_sync_open(&mut stream, "/straddle").await;

        // One DATA packet split across two WRTE frames, header cut in half.
        let packet = sync_packet(b"DATA", b"spanning payload");
        let (first, second) = packet.split_at(6);
        send_sync_frame(&mut stream, client_id, first.to_vec()).await;

        let mut rest = second.to_vec();
        rest.extend_from_slice(&sync_packet(b"DONE", &[]));
        send_sync_frame(&mut stream, client_id, rest).await;

        let clse = read_message(&mut stream).await.unwrap();
        assert_eq!(clse.command, Command::Clse);
    });

    let identity = test_identity();
    let mut session = AdbSession::connect(host, port, &identity, false)
        .await
        .unwrap();
    let content = session.pull_file("/straddle").await.unwrap();
    assert_eq!(content, b"spanning payload");

    session.close().await;
    daemon.await.unwrap();
}

#[tokio::test]
async fn pull_file_fail_packet_maps_to_sync_failed() {
    let (listener, host, port) = bind().await;
    let daemon = tokio::spawn(async move {
        let mut stream = accept_with_cnxn(&listener).await;
        let client_id = serve_sync_open(&mut stream, "/missing").await;
        send_sync_frame(
            &mut stream,
            client_id,
            sync_packet(b"FAIL", b"No such file or directory"),
        )
        .await;
        let clse = read_message(&mut stream).await.unwrap();
        assert_eq!(clse.command, Command::Clse);
    });

    let identity = test_identity();
    let mut session = AdbSession::connect(host, port, &identity, false)
        .await
        .unwrap();
    let err = session.pull_file("/missing").await.unwrap_err();
    match err {
        SessionError::SyncFailed(reason) => assert_eq!(reason, "No such file or directory"),
        other => panic!("expected SyncFailed, got {other:?}"),
    }

    session.close().await;
    daemon.await.unwrap();
}

#[tokio::test]
async fn pull_file_early_close_returns_partial_content() {
    let (listener, host, port) = bind().await;
    let daemon = tokio::spawn(async move {
        let mut stream = accept_with_cnxn(&listener).await;
        let client_id = serve_sync_open(&mut stream, "/partial").await;
        send_sync_frame(&mut stream, client_id, sync_packet(b"DATA", b"half")).await;
        // Close without DONE.
        write_message(&mut stream, &Message::clse(DAEMON_STREAM_ID, client_id))
            .await
            .unwrap();
        let clse = read_message(&mut stream).await.unwrap();
        assert_eq!(clse.command, Command::Clse);
    });

    let identity = test_identity();
    let mut session = AdbSession::connect(host, port, &identity, false)
        .await
        .unwrap();
    let content = session.pull_file("/partial").await.unwrap();
    assert_eq!(content, b"half");

    session.close().await;
    daemon.await.unwrap();
}

#[tokio::test]
async fn pull_file_empty_close_is_protocol_error() {
    let (listener, host, port) = bind().await;
    let daemon = tokio::spawn(async move {
        let mut stream = accept_with_cnxn(&listener).await;
        let client_id = serve_sync_open(&mut stream, "/empty").await;
        write_message(&mut stream, &Message::clse(DAEMON_STREAM_ID, client_id))
            .await
            .unwrap();
        let clse = read_message(&mut stream).await.unwrap();
        assert_eq!(clse.command, Command::Clse);
    });

    let identity = test_identity();
    let mut session = AdbSession::connect(host, port, &identity, false)
        .await
        .unwrap();
    let err = session.pull_file("/empty").await.unwrap_err();
    assert!(matches!(err, SessionError::Protocol(_)));

    session.close().await;
    daemon.await.unwrap();
}

#[tokio::test]
async fn foreign_stream_messages_get_courteous_acks() {
    let (listener, host, port) = bind().await;
    let daemon = tokio::spawn(async move {
        let mut stream = accept_with_cnxn(&listener).await;

        let open = read_message(&mut stream).await.unwrap();
        assert_eq!(open.command, Command::Open);
        let client_id = open.arg0;

        write_message(&mut stream, &Message::okay(DAEMON_STREAM_ID, client_id))
            .await
            .unwrap();

        // Interleave a write for a stream the client never opened.
        write_message(&mut stream, &Message::wrte(200, 77, b"noise".to_vec()))
            .await
            .unwrap();
        let courteous = read_message(&mut stream).await.unwrap();
        assert_eq!(courteous.command, Command::Okay);
        assert_eq!(courteous.arg0, 77);
        assert_eq!(courteous.arg1, 200);

        // Back to the real stream.
        write_message(
            &mut stream,
            &Message::wrte(DAEMON_STREAM_ID, client_id, b"real".to_vec()),
        )
        .await
        .unwrap();
        let ack = read_message(&mut stream).await.unwrap();
        assert_eq!(ack.command, Command::Okay);
        write_message(&mut stream, &Message::clse(DAEMON_STREAM_ID, client_id))
            .await
            .unwrap();
        read_message(&mut stream).await.unwrap();
    });

    let identity = test_identity();
    let mut session = AdbSession::connect(host, port, &identity, false)
        .await
        .unwrap();
    let out = session.shell_output("noisy").await.unwrap();
    assert_eq!(out, b"real");

    session.close().await;
    daemon.await.unwrap();
}

#[tokio::test]
async fn manager_returns_busy_while_shell_in_flight() {
    let (listener, host, port) = bind().await;
    let daemon = tokio::spawn(async move {
        let mut stream = accept_with_cnxn(&listener).await;

        let open = read_message(&mut stream).await.unwrap();
        let client_id = open.arg0;
        // Hold the stream open long enough for a second caller to hit the
        // dispatch gate timeout.
        tokio::time::sleep(Duration::from_millis(700)).await;
        write_message(&mut stream, &Message::okay(DAEMON_STREAM_ID, client_id))
            .await
            .unwrap();
        write_message(
            &mut stream,
            &Message::wrte(DAEMON_STREAM_ID, client_id, b"slow\n".to_vec()),
        )
        .await
        .unwrap();
        read_message(&mut stream).await.unwrap();
        write_message(&mut stream, &Message::clse(DAEMON_STREAM_ID, client_id))
            .await
            .unwrap();
        read_message(&mut stream).await.unwrap();
    });

    let mgr = Arc::new(SessionManager::new(test_identity()));
    mgr.connect(host, port, false).await.unwrap();

    let mgr_slow = mgr.clone();
    let slow = tokio::spawn(async move { mgr_slow.execute_shell("slow").await });

    // Give the first call time to take the gate.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let err = mgr.execute_shell("second").await.unwrap_err();
    assert!(matches!(err, SessionError::Busy));

    assert_eq!(slow.await.unwrap().unwrap(), "slow");
    mgr.disconnect().await;
    daemon.await.unwrap();
}

#[tokio::test]
async fn manager_trims_shell_output() {
    let (listener, host, port) = bind().await;
    let daemon = tokio::spawn(async move {
        let mut stream = accept_with_cnxn(&listener).await;
        serve_stream(&mut stream, "shell:getprop ro.product.model", b"Pixel 9\n").await;
    });

    let mgr = SessionManager::new(test_identity());
    mgr.connect(host, port, false).await.unwrap();
    let out = mgr.execute_shell("getprop ro.product.model").await.unwrap();
    assert_eq!(out, "Pixel 9");

    let status = mgr.status().await;
    assert!(status.connected);
    assert_eq!(status.port, Some(port));

    mgr.disconnect().await;
    assert!(!mgr.is_connected().await);
    daemon.await.unwrap();
}
