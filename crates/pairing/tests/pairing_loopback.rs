//! Pairing exchange against a scripted endpoint on loopback.
//!
//! The fake endpoint mirrors the daemon's half of the protocol: TLS accept,
//! RFC 5705 export, SPAKE2 server role, encrypted peer-info swap.

use std::sync::{Arc, OnceLock};

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use looptap_identity::Identity;
use looptap_pairing::auth::{PairingExchange, Role};
use looptap_pairing::frame::{PacketKind, read_packet, write_packet};
use looptap_pairing::{PairingClient, PairingError};

const EXPORT_LABEL: &[u8] = b"adb-label\0";
const PEER_INFO_LEN: usize = 8192;

fn test_identity() -> &'static Identity {
    static IDENTITY: OnceLock<(tempfile::TempDir, Identity)> = OnceLock::new();
    let (_, identity) = IDENTITY.get_or_init(|| {
        let tmp = tempfile::tempdir().unwrap();
        let identity = Identity::load_or_create(tmp.path(), "pair-test").unwrap();
        (tmp, identity)
    });
    identity
}

fn server_tls_acceptor() -> TlsAcceptor {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = CertificateDer::from(certified.cert.der().to_vec());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Drives one scripted pairing exchange with `code` as the server-side
/// pairing password component.
async fn run_pairing_endpoint(listener: TcpListener, code: &str) {
    let (tcp, _) = listener.accept().await.unwrap();
    tcp.set_nodelay(true).unwrap();
    let mut tls = server_tls_acceptor().accept(tcp).await.unwrap();

    let (_, conn) = tls.get_ref();
    let exported = conn
        .export_keying_material([0u8; 64], EXPORT_LABEL, None)
        .unwrap();

    let mut password = code.as_bytes().to_vec();
    password.extend_from_slice(&exported);

    let exchange = PairingExchange::new(Role::Server, &password).unwrap();
    let (kind, client_msg) = read_packet(&mut tls).await.unwrap();
    assert_eq!(kind, PacketKind::Spake2Msg);
    write_packet(&mut tls, PacketKind::Spake2Msg, &exchange.msg)
        .await
        .unwrap();
    let mut cipher = exchange.finish(&client_msg).unwrap();

    // Receive the client's sealed record (undecryptable on mismatch, which
    // is fine; the daemon answers with its own record regardless), then
    // send ours.
    let (kind, sealed_client) = read_packet(&mut tls).await.unwrap();
    assert_eq!(kind, PacketKind::PeerInfo);
    let _ = cipher.decrypt(&sealed_client);

    let mut peer_info = [0u8; PEER_INFO_LEN];
    peer_info[0] = 0;
    let banner = b"QAAAAfake-device-key device\0";
    peer_info[1..1 + banner.len()].copy_from_slice(banner);
    let sealed = cipher.encrypt(&peer_info).unwrap();
    write_packet(&mut tls, PacketKind::PeerInfo, &sealed)
        .await
        .unwrap();
}

#[tokio::test]
async fn pairing_succeeds_with_matching_code() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let endpoint = tokio::spawn(run_pairing_endpoint(listener, "123456"));

    let client = PairingClient::new(addr.ip(), addr.port(), "123456");
    client.pair(test_identity()).await.unwrap();

    endpoint.await.unwrap();
}

#[tokio::test]
async fn pairing_code_mismatch_is_invalid_code() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let endpoint = tokio::spawn(run_pairing_endpoint(listener, "000001"));

    let client = PairingClient::new(addr.ip(), addr.port(), "000000");
    let err = client.pair(test_identity()).await.unwrap_err();
    assert!(matches!(err, PairingError::InvalidPairingCode));

    endpoint.await.unwrap();
}

#[tokio::test]
async fn pairing_against_closed_port_is_network_error() {
    // Bind then drop to get a port nothing is listening on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = PairingClient::new(addr.ip(), addr.port(), "123456");
    let err = client.pair(test_identity()).await.unwrap_err();
    assert!(matches!(
        err,
        PairingError::Network(_) | PairingError::Protocol(_)
    ));
}
