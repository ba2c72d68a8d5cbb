//! # Ephemeral Key Agreement (PFS)
//!
//! Fresh X25519 keys per session, ECDH, and HKDF-SHA256 session-key
//! derivation.
//!
//! Perfect Forward Secrecy means that even if a device's identity key is
//! later extracted, recorded session traffic stays sealed: the identity key
//! never touches the session key. It only *authenticates* the merchant's
//! ephemeral key, out of band, through the signed QR payload.
//!
//! ## Protocol Flow
//!
//! 1. The merchant generates an ephemeral pair and shows its public half in
//!    a signed QR code.
//! 2. The payer generates its own pair and sends the raw public key as the
//!    first message on the link.
//! 3. The merchant computes the shared secret, derives the session key and
//!    replies with its raw public key.
//! 4. The payer computes the same secret and derives the same key.
//!
//! ## Key Derivation
//!
//! The raw X25519 output is NOT used as an AES key. It goes through
//! HKDF-SHA256 (extract, then expand) with a fixed all-zero salt and the
//! info string `CBDC_SESSION`. The fixed salt is fine only because the input
//! secret is unique per session; reusing ephemeral keys across unrelated
//! sessions would break that assumption.

use std::fmt;

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroize;

use crate::config::{AES_KEY_LENGTH, EPHEMERAL_KEY_LENGTH, HKDF_INFO, HKDF_SALT};

/// Errors in the ephemeral key exchange.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PfsError {
    #[error("key agreement failed: {0}")]
    KeyAgreement(&'static str),

    #[error("session key derivation failed")]
    KeyDerivationFailed,
}

// ---------------------------------------------------------------------------
// EphemeralKeyPair
// ---------------------------------------------------------------------------

/// A per-session X25519 key pair.
///
/// The secret is zeroized when the pair is dropped. A merchant keeps one
/// pair for as long as its QR code is on screen, so the secret must be
/// usable for more than one agreement; that is why this wraps a
/// `StaticSecret` rather than a single-use `EphemeralSecret`.
#[derive(Clone)]
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a fresh pair from `OsRng`.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The raw 32-byte public key, as sent on the wire and shown in the QR.
    pub fn public_key_bytes(&self) -> [u8; EPHEMERAL_KEY_LENGTH] {
        self.public.to_bytes()
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EphemeralKeyPair(pub={})",
            hex::encode(&self.public.as_bytes()[..4])
        )
    }
}

/// Generate a fresh ephemeral key pair.
pub fn generate_ephemeral_key_pair() -> EphemeralKeyPair {
    EphemeralKeyPair::generate()
}

// ---------------------------------------------------------------------------
// ECDH
// ---------------------------------------------------------------------------

/// Compute the X25519 shared secret with a peer's raw public key.
///
/// # Errors
///
/// [`PfsError::KeyAgreement`] if `peer_public` is not exactly 32 bytes, or
/// if it is a low-order point that forces an all-zero shared secret. The
/// second case is how a malicious peer would try to pin the session key to
/// a known value.
pub fn ecdh(local: &EphemeralKeyPair, peer_public: &[u8]) -> Result<SharedSecret, PfsError> {
    let peer: [u8; EPHEMERAL_KEY_LENGTH] = peer_public
        .try_into()
        .map_err(|_| PfsError::KeyAgreement("peer key has wrong length"))?;
    let shared = local.secret.diffie_hellman(&PublicKey::from(peer));
    if !shared.was_contributory() {
        return Err(PfsError::KeyAgreement("peer key is a low-order point"));
    }
    Ok(shared)
}

// ---------------------------------------------------------------------------
// Session Key
// ---------------------------------------------------------------------------

/// A 256-bit AES session key. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; AES_KEY_LENGTH]);

impl SessionKey {
    pub fn as_bytes(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.0
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}

/// HKDF-SHA256 extract-then-expand to a 32-byte key.
pub fn derive_session_key(
    shared_secret: &[u8],
    salt: &[u8],
    info: &[u8],
) -> Result<SessionKey, PfsError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared_secret);
    let mut okm = [0u8; AES_KEY_LENGTH];
    hk.expand(info, &mut okm)
        .map_err(|_| PfsError::KeyDerivationFailed)?;
    Ok(SessionKey(okm))
}

/// ECDH followed by HKDF with the protocol's fixed salt and info.
pub fn agree_session_key(
    local: &EphemeralKeyPair,
    peer_public: &[u8],
) -> Result<SessionKey, PfsError> {
    let shared = ecdh(local, peer_public)?;
    derive_session_key(shared.as_bytes(), &HKDF_SALT, HKDF_INFO)
}
