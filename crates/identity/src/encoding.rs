//! ADB public-key encoding.
//!
//! adbd stores trusted signers in a Montgomery-friendly form so it can
//! verify signatures without a big-number division at check time:
//!
//! ```text
//! [word_count:u32][n0inv:u32][modulus words:u32*64][rr words:u32*64][exponent:u32]
//! ```
//!
//! all little-endian, 524 bytes total for RSA-2048, followed by base64
//! (no wrap), a space, the key's name label, and a NUL.

use rsa::BigUint;
use rsa::RsaPublicKey;
use rsa::traits::PublicKeyParts;

/// Modulus size in 32-bit words.
const WORD_COUNT: usize = 64;

/// Encoded binary size: 3 scalar words + modulus + rr.
const ENCODED_LEN: usize = 4 * 3 + WORD_COUNT * 4 * 2;

/// Encodes `key` in the form adbd accepts as a trusted signer.
pub fn encode_adb_public_key(key: &RsaPublicKey, name: &str) -> Vec<u8> {
    let n = key.n();
    let n_words = to_words(n);
    let n0inv = inv_mod_u32(n_words[0]).wrapping_neg();

    // rr = (2^2048)^2 mod n, the Montgomery conversion constant.
    let rr = (BigUint::from(1u8) << (WORD_COUNT * 32 * 2)) % n;

    let mut binary = Vec::with_capacity(ENCODED_LEN);
    binary.extend_from_slice(&(WORD_COUNT as u32).to_le_bytes());
    binary.extend_from_slice(&n0inv.to_le_bytes());
    for word in &n_words {
        binary.extend_from_slice(&word.to_le_bytes());
    }
    for word in &to_words(&rr) {
        binary.extend_from_slice(&word.to_le_bytes());
    }
    let e_bytes = key.e().to_bytes_le();
    let mut e_word = [0u8; 4];
    let take = e_bytes.len().min(4);
    e_word[..take].copy_from_slice(&e_bytes[..take]);
    binary.extend_from_slice(&e_word);

    use base64::Engine as _;
    let mut out = base64::engine::general_purpose::STANDARD
        .encode(&binary)
        .into_bytes();
    out.push(b' ');
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out
}

/// Little-endian 32-bit words, zero-padded to the fixed word count.
fn to_words(value: &BigUint) -> [u32; WORD_COUNT] {
    let bytes = value.to_bytes_le();
    let mut words = [0u32; WORD_COUNT];
    for (i, chunk) in bytes.chunks(4).enumerate().take(WORD_COUNT) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        words[i] = u32::from_le_bytes(word);
    }
    words
}

/// Inverse of an odd word mod 2^32 by Newton-Hensel lifting.
fn inv_mod_u32(n0: u32) -> u32 {
    debug_assert!(n0 & 1 == 1);
    let mut x = n0; // correct to 3 bits for odd n0
    for _ in 0..5 {
        x = x.wrapping_mul(2u32.wrapping_sub(n0.wrapping_mul(x)));
    }
    x
}
