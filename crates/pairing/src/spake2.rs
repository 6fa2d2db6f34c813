//! SPAKE2 over NIST P-256.
//!
//! The pinned RustCrypto `spake2` crate only offers the Ed25519 group, and
//! the daemon requires P-256, so the group math lives here, built on the
//! `p256` arithmetic backend. The construction is the CFRG SPAKE2 (RFC
//! 9382) with the standard P-256 seed points M and N:
//!
//! ```text
//! w  = SHA-256(password) mod n
//! pA = x*G + w*M        (client, random x)
//! pB = y*G + w*N        (server, random y)
//! K  = x*(pB - w*N) = y*(pA - w*M)
//! secret = SHA-256(len-prefixed: A, B, pA, pB, K, w)
//! ```
//!
//! Shares travel as 33-byte compressed SEC1 points. A peer share that is
//! not on the curve, or is the identity, is rejected before any secret is
//! derived.

use p256::elliptic_curve::ops::Reduce;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{AffinePoint, EncodedPoint, NonZeroScalar, ProjectivePoint, Scalar, U256};
use sha2::{Digest, Sha256};

use crate::PairingError;
use crate::auth::Role;

/// RFC 9382 seed point M (compressed SEC1), the client-side mask.
const M_BYTES: [u8; 33] = [
    0x02, 0x88, 0x6e, 0x2f, 0x97, 0xac, 0xe4, 0x6e, 0x55, 0xba, 0x9d, 0xd7, 0x24, 0x25, 0x79,
    0xf2, 0x99, 0x3b, 0x64, 0xe1, 0x6e, 0xf3, 0xdc, 0xab, 0x95, 0xaf, 0xd4, 0x97, 0x33, 0x3d,
    0x8f, 0xa1, 0x2f,
];

/// RFC 9382 seed point N (compressed SEC1), the server-side mask.
const N_BYTES: [u8; 33] = [
    0x03, 0xd8, 0xbb, 0xd6, 0xc6, 0x39, 0xc6, 0x29, 0x37, 0xb0, 0x4d, 0x99, 0x7f, 0x38, 0xc3,
    0x77, 0x07, 0x19, 0xc6, 0x29, 0xd7, 0x01, 0x4d, 0x49, 0xa2, 0x4b, 0x4f, 0x98, 0xba, 0xa1,
    0x29, 0x2b, 0x49,
];

/// One side of a P-256 SPAKE2 exchange.
pub(crate) struct Spake2P256 {
    role: Role,
    w: Scalar,
    secret: Scalar,
    own_share: Vec<u8>,
}

impl Spake2P256 {
    /// Derives the password scalar, picks the ephemeral scalar, and
    /// computes this side's masked share.
    pub(crate) fn start(role: Role, password: &[u8]) -> Result<Self, PairingError> {
        let w = password_scalar(password);
        let secret = *NonZeroScalar::random(&mut rand::rngs::OsRng);

        let mask = match role {
            Role::Client => decode_point(&M_BYTES)?,
            Role::Server => decode_point(&N_BYTES)?,
        };
        let share = ProjectivePoint::GENERATOR * secret + mask * w;

        Ok(Self {
            role,
            w,
            secret,
            own_share: encode_point(&share),
        })
    }

    /// This side's outbound share (33-byte compressed SEC1 point).
    pub(crate) fn share(&self) -> &[u8] {
        &self.own_share
    }

    /// Unmasks the peer's share and hashes the RFC 9382 transcript into
    /// the 32-byte shared secret.
    pub(crate) fn finish(
        self,
        peer_share: &[u8],
        client_identity: &[u8],
        server_identity: &[u8],
    ) -> Result<Vec<u8>, PairingError> {
        let peer_point = decode_point(peer_share)?;

        let peer_mask = match self.role {
            Role::Client => decode_point(&N_BYTES)?,
            Role::Server => decode_point(&M_BYTES)?,
        };
        let k = (peer_point - peer_mask * self.w) * self.secret;
        if k == ProjectivePoint::IDENTITY {
            return Err(PairingError::Protocol(
                "degenerate SPAKE2 shared element".into(),
            ));
        }

        let (client_share, server_share) = match self.role {
            Role::Client => (self.own_share.as_slice(), peer_share),
            Role::Server => (peer_share, self.own_share.as_slice()),
        };

        let mut transcript = Vec::new();
        for part in [
            client_identity,
            server_identity,
            client_share,
            server_share,
            encode_point(&k).as_slice(),
            self.w.to_bytes().as_slice(),
        ] {
            transcript.extend_from_slice(&(part.len() as u64).to_le_bytes());
            transcript.extend_from_slice(part);
        }

        Ok(Sha256::digest(&transcript).to_vec())
    }
}

/// `SHA-256(password) mod n`, the memorable-secret scalar.
fn password_scalar(password: &[u8]) -> Scalar {
    let digest = Sha256::digest(password);
    <Scalar as Reduce<U256>>::reduce(U256::from_be_slice(digest.as_slice()))
}

fn encode_point(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

/// Decodes a SEC1 point, rejecting off-curve encodings and the identity.
fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint, PairingError> {
    let encoded = EncodedPoint::from_bytes(bytes)
        .map_err(|_| PairingError::Protocol("malformed SPAKE2 point".into()))?;
    let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| PairingError::Protocol("SPAKE2 point not on curve".into()))?;
    let point = ProjectivePoint::from(affine);
    if point == ProjectivePoint::IDENTITY {
        return Err(PairingError::Protocol("SPAKE2 point is the identity".into()));
    }
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT_ID: &[u8] = b"adb pair client\0";
    const SERVER_ID: &[u8] = b"adb pair server\0";

    fn run_exchange(client_pw: &[u8], server_pw: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let client = Spake2P256::start(Role::Client, client_pw).unwrap();
        let server = Spake2P256::start(Role::Server, server_pw).unwrap();
        let client_share = client.share().to_vec();
        let server_share = server.share().to_vec();
        (
            client.finish(&server_share, CLIENT_ID, SERVER_ID).unwrap(),
            server.finish(&client_share, CLIENT_ID, SERVER_ID).unwrap(),
        )
    }

    #[test]
    fn seed_points_decode() {
        decode_point(&M_BYTES).unwrap();
        decode_point(&N_BYTES).unwrap();
    }

    #[test]
    fn shares_are_compressed_points() {
        let side = Spake2P256::start(Role::Client, b"123456").unwrap();
        assert_eq!(side.share().len(), 33);
        assert!(side.share()[0] == 0x02 || side.share()[0] == 0x03);
    }

    #[test]
    fn matching_passwords_agree() {
        let (client_secret, server_secret) = run_exchange(b"123456-ekm", b"123456-ekm");
        assert_eq!(client_secret, server_secret);
        assert_eq!(client_secret.len(), 32);
    }

    #[test]
    fn mismatched_passwords_disagree() {
        let (client_secret, server_secret) = run_exchange(b"000000", b"000001");
        assert_ne!(client_secret, server_secret);
    }

    #[test]
    fn exchanges_are_randomized() {
        let a = Spake2P256::start(Role::Client, b"pw").unwrap();
        let b = Spake2P256::start(Role::Client, b"pw").unwrap();
        assert_ne!(a.share(), b.share());
    }

    #[test]
    fn off_curve_share_is_rejected() {
        let client = Spake2P256::start(Role::Client, b"pw").unwrap();
        let mut bogus = client.share().to_vec();
        // Valid prefix, garbage x coordinate.
        bogus[1..].fill(0xFF);
        let err = Spake2P256::start(Role::Server, b"pw")
            .unwrap()
            .finish(&bogus, CLIENT_ID, SERVER_ID)
            .unwrap_err();
        assert!(matches!(err, PairingError::Protocol(_)));
    }

    #[test]
    fn truncated_share_is_rejected() {
        let err = Spake2P256::start(Role::Server, b"pw")
            .unwrap()
            .finish(&[0x02, 0x01], CLIENT_ID, SERVER_ID)
            .unwrap_err();
        assert!(matches!(err, PairingError::Protocol(_)));
    }

    #[test]
    fn password_scalar_is_deterministic() {
        assert_eq!(password_scalar(b"123456"), password_scalar(b"123456"));
        assert_ne!(password_scalar(b"123456"), password_scalar(b"123457"));
    }
}
