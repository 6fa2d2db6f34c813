//! At-rest protection for the signing key.
//!
//! The PKCS#8-encoded private key is wrapped with AES-256-GCM under a vault
//! key kept alongside the preference store (`vault.key`, created 0600 on
//! first run). The wrapped blob layout is `IV(12) ‖ ciphertext ‖ tag(16)`
//! with the literal `"adbkey"` zero-padded to 16 bytes as AAD.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use tracing::debug;

use crate::IdentityError;

/// Preference key holding the wrapped private key.
pub const PREF_KEY_ADBKEY: &str = "adbkey";

/// GCM IV length.
const IV_LEN: usize = 12;

/// GCM tag length.
const TAG_LEN: usize = 16;

/// Vault key length (AES-256).
const VAULT_KEY_LEN: usize = 32;

/// AAD bound into the key wrap: `"adbkey"` zero-padded to 16 bytes.
const KEY_WRAP_AAD: [u8; 16] = *b"adbkey\0\0\0\0\0\0\0\0\0\0";

/// Wraps the PKCS#8 DER under the vault key.
pub fn seal_key(pkcs8_der: &[u8], vault: &[u8; VAULT_KEY_LEN]) -> Result<Vec<u8>, IdentityError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(vault));

    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: pkcs8_der,
                aad: &KEY_WRAP_AAD,
            },
        )
        .map_err(|_| IdentityError::Unwrap)?;

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Unwraps a blob produced by [`seal_key`].
pub fn open_key(wrapped: &[u8], vault: &[u8; VAULT_KEY_LEN]) -> Result<Vec<u8>, IdentityError> {
    if wrapped.len() < IV_LEN + TAG_LEN {
        return Err(IdentityError::Unwrap);
    }
    let (iv, ciphertext) = wrapped.split_at(IV_LEN);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(vault));
    cipher
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: ciphertext,
                aad: &KEY_WRAP_AAD,
            },
        )
        .map_err(|_| IdentityError::Unwrap)
}

/// Loads the vault key, provisioning it on first run.
///
/// Failure here is fatal for the identity: without the vault key the wrapped
/// signing key cannot be opened or created.
pub fn vault_key(data_dir: &Path) -> Result<[u8; VAULT_KEY_LEN], IdentityError> {
    let path = data_dir.join("vault.key");

    if path.exists() {
        let bytes = std::fs::read(&path)?;
        let key: [u8; VAULT_KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::Vault(format!("{path:?} has unexpected length")))?;
        return Ok(key);
    }

    let mut key = [0u8; VAULT_KEY_LEN];
    rand::rngs::OsRng.fill_bytes(&mut key);

    std::fs::create_dir_all(data_dir)?;
    std::fs::write(&path, key)?;
    restrict_permissions(&path)?;
    debug!("provisioned vault key at {path:?}");
    Ok(key)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Minimal persistent key-value store backing the identity record.
///
/// Values are cached in memory and persisted to a JSON file on every write.
pub struct PrefStore {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl PrefStore {
    /// Opens the store, loading existing values from disk.
    pub fn new(path: PathBuf) -> Result<Self, IdentityError> {
        let values = if path.exists() {
            let data = std::fs::read_to_string(&path)?;
            serde_json::from_str(&data)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// Returns the value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().unwrap().get(key).cloned()
    }

    /// Stores `value` under `key` and persists the store.
    pub fn set(&self, key: &str, value: &str) -> Result<(), IdentityError> {
        {
            let mut map = self.values.write().unwrap();
            map.insert(key.to_string(), value.to_string());
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), IdentityError> {
        let map = self.values.read().unwrap();
        let json = serde_json::to_string_pretty(&*map)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!("persisted {} preference(s) to {:?}", map.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let vault = [7u8; VAULT_KEY_LEN];
        let secret = b"pkcs8 bytes stand-in";

        let wrapped = seal_key(secret, &vault).unwrap();
        assert_eq!(wrapped.len(), IV_LEN + secret.len() + TAG_LEN);

        let opened = open_key(&wrapped, &vault).unwrap();
        assert_eq!(opened, secret);
    }

    #[test]
    fn open_with_wrong_vault_key_fails() {
        let wrapped = seal_key(b"secret", &[1u8; VAULT_KEY_LEN]).unwrap();
        let err = open_key(&wrapped, &[2u8; VAULT_KEY_LEN]).unwrap_err();
        assert!(matches!(err, IdentityError::Unwrap));
    }

    #[test]
    fn tampered_blob_fails() {
        let vault = [3u8; VAULT_KEY_LEN];
        let mut wrapped = seal_key(b"secret", &vault).unwrap();
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0x01;
        assert!(open_key(&wrapped, &vault).is_err());
    }

    #[test]
    fn truncated_blob_fails() {
        let vault = [3u8; VAULT_KEY_LEN];
        assert!(open_key(&[0u8; 10], &vault).is_err());
    }

    #[test]
    fn aad_is_padded_literal() {
        assert_eq!(&KEY_WRAP_AAD[..6], b"adbkey");
        assert!(KEY_WRAP_AAD[6..].iter().all(|&b| b == 0));
        assert_eq!(KEY_WRAP_AAD.len(), 16);
    }

    #[test]
    fn vault_key_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let first = vault_key(tmp.path()).unwrap();
        let second = vault_key(tmp.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn pref_store_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prefs.json");

        {
            let store = PrefStore::new(path.clone()).unwrap();
            assert!(store.get("adbkey").is_none());
            store.set("adbkey", "AAAA").unwrap();
        }

        let store = PrefStore::new(path).unwrap();
        assert_eq!(store.get("adbkey").unwrap(), "AAAA");
    }
}
