//! TLS material derived from the signing key.
//!
//! The daemon requires mutual TLS, but neither side validates a chain: our
//! certificate only exists so the handshake can complete, and the daemon's
//! certificate is accepted unconditionally. Trust was already established
//! by pairing.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};

use crate::IdentityError;

/// Builds the self-signed certificate adbd sees during TLS handshakes.
///
/// CN=`00`, serial 1, fixed validity window, mirroring what the platform
/// ADB implementation presents.
pub fn self_signed_cert(pkcs8_der: &[u8]) -> Result<Vec<u8>, IdentityError> {
    let key_pair = rcgen::KeyPair::try_from(pkcs8_der)?;

    let mut params = rcgen::CertificateParams::default();
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "00");
    params.serial_number = Some(rcgen::SerialNumber::from(vec![0x01]));
    params.not_before = rcgen::date_time_ymd(2024, 1, 1);
    params.not_after = rcgen::date_time_ymd(2049, 1, 1);

    let cert = params.self_signed(&key_pair)?;
    Ok(cert.der().to_vec())
}

/// Client config presenting `cert_der`/`pkcs8_der` and trusting any peer.
pub fn client_config(
    cert_der: Vec<u8>,
    pkcs8_der: Vec<u8>,
) -> Result<Arc<rustls::ClientConfig>, IdentityError> {
    let cert = CertificateDer::from(cert_der);
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pkcs8_der));

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_client_auth_cert(vec![cert], key)?;

    Ok(Arc::new(config))
}

/// Accepts every server certificate.
///
/// The peer is authenticated by possession of a paired key, not by chain
/// validation; see the module docs.
#[derive(Debug)]
pub struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
        ]
    }
}
