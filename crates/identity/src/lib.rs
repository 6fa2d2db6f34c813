//! The node's signing identity.
//!
//! One RSA-2048 key is generated on first run and kept for the life of the
//! installation. The wireless-debugging daemon learns its public half during
//! pairing and every later session authenticates by signing the daemon's
//! 20-byte challenge with it. The private key never touches disk in the
//! clear: it is wrapped with AES-256-GCM under a vault key provisioned next
//! to the preference store.

pub mod encoding;
pub mod keystore;
pub mod tls;

use std::path::Path;
use std::sync::Arc;

use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use tracing::{debug, info};

use crate::keystore::{PREF_KEY_ADBKEY, PrefStore, open_key, seal_key, vault_key};

/// RSA modulus size in bits.
pub const KEY_BITS: usize = 2048;

/// Length of the daemon's AUTH challenge.
pub const TOKEN_LEN: usize = 20;

/// Errors from identity management.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("preference store error: {0}")]
    Prefs(#[from] serde_json::Error),

    #[error("stored key is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("key vault unavailable: {0}")]
    Vault(String),

    #[error("key unwrap failed (vault key changed or record corrupt)")]
    Unwrap,

    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("PKCS#8 error: {0}")]
    Pkcs8(String),

    #[error("certificate error: {0}")]
    Cert(#[from] rcgen::Error),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("AUTH token must be {TOKEN_LEN} bytes, got {0}")]
    BadTokenLength(usize),
}

/// The process-persistent signing identity.
///
/// Immutable once created; all fields are derived from the single RSA key.
pub struct Identity {
    key: RsaPrivateKey,
    public: RsaPublicKey,
    name: String,
    pkcs8_der: Vec<u8>,
    cert_der: Vec<u8>,
    adb_public_key: Vec<u8>,
}

impl Identity {
    /// Loads the identity from the preference store under `data_dir`,
    /// generating and persisting a fresh key on first run.
    ///
    /// `name` is the label appended to the ADB public-key encoding; the
    /// daemon shows it in its paired-devices list.
    pub fn load_or_create(data_dir: &Path, name: &str) -> Result<Self, IdentityError> {
        let prefs = PrefStore::new(data_dir.join("prefs.json"))?;
        let vault = vault_key(data_dir)?;

        let pkcs8_der = match prefs.get(PREF_KEY_ADBKEY) {
            Some(encoded) => {
                use base64::Engine as _;
                let wrapped = base64::engine::general_purpose::STANDARD.decode(encoded)?;
                let der = open_key(&wrapped, &vault)?;
                debug!("loaded signing key from preference store");
                der
            }
            None => {
                info!("no signing key found, generating RSA-{KEY_BITS}");
                let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS)?;
                let der = key
                    .to_pkcs8_der()
                    .map_err(|e| IdentityError::Pkcs8(e.to_string()))?
                    .as_bytes()
                    .to_vec();

                use base64::Engine as _;
                let wrapped = seal_key(&der, &vault)?;
                prefs.set(
                    PREF_KEY_ADBKEY,
                    &base64::engine::general_purpose::STANDARD.encode(wrapped),
                )?;
                der
            }
        };

        let mut key = RsaPrivateKey::from_pkcs8_der(&pkcs8_der)
            .map_err(|e| IdentityError::Pkcs8(e.to_string()))?;
        key.precompute()?;
        let public = RsaPublicKey::from(&key);

        let cert_der = tls::self_signed_cert(&pkcs8_der)?;
        let adb_public_key = encoding::encode_adb_public_key(&public, name);

        Ok(Self {
            key,
            public,
            name: name.to_string(),
            pkcs8_der,
            cert_der,
            adb_public_key,
        })
    }

    /// Signs the daemon's AUTH challenge.
    ///
    /// Raw PKCS#1 v1.5 over the 20-byte token with the SHA-1 DigestInfo
    /// prefix; the token itself stands in for the digest, exactly as adbd
    /// verifies it. Output is always 256 bytes.
    pub fn sign_token(&self, token: &[u8]) -> Result<Vec<u8>, IdentityError> {
        if token.len() != TOKEN_LEN {
            return Err(IdentityError::BadTokenLength(token.len()));
        }
        Ok(self.key.sign(Pkcs1v15Sign::new::<Sha1>(), token)?)
    }

    /// The ADB-encoded public key (`base64(montgomery words) <name>\0`),
    /// as offered in `AUTH RSAPUBLICKEY` and the pairing peer-info record.
    pub fn adb_public_key(&self) -> &[u8] {
        &self.adb_public_key
    }

    /// The label baked into [`Self::adb_public_key`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The public half of the signing key.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// The identity's self-signed certificate, DER-encoded.
    pub fn certificate_der(&self) -> &[u8] {
        &self.cert_der
    }

    /// Builds a rustls client config presenting this identity's certificate
    /// and accepting any peer certificate. Trust comes from the pairing
    /// step, not PKI.
    pub fn tls_client_config(&self) -> Result<Arc<rustls::ClientConfig>, IdentityError> {
        tls::client_config(self.cert_der.clone(), self.pkcs8_der.clone())
    }
}
