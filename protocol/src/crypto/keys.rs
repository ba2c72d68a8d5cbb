//! # Identity Keys
//!
//! Ed25519 keypairs, public keys and signatures for OFFCASH devices.
//!
//! Every device has exactly one long-lived identity keypair. It signs the
//! tokens the device mints, the transfers it sends, the receipts it issues
//! as a merchant, and the QR bootstrap payloads it displays. The private
//! half normally lives behind a [`KeyCustody`](super::custody::KeyCustody)
//! implementation and never leaves it.
//!
//! ## Wire representation
//!
//! Public keys and signatures travel inside JSON as lowercase hex strings.
//! Parsing only checks the length; whether the bytes are a valid curve point
//! is decided at verification time, where a bad key simply fails to verify.
//!
//! ## Security considerations
//!
//! - Private keys are zeroized on drop (thanks, ed25519-dalek).
//! - Key generation uses `OsRng`.
//! - Secret bytes are never logged. `Debug` prints the public key only.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

use crate::config::{SIGNATURE_LENGTH, VERIFYING_KEY_LENGTH};

/// Errors that can occur during key parsing.
///
/// Intentionally vague about *why* something failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or bad encoding")]
    InvalidSecretKey,

    #[error("invalid public key bytes: wrong length or bad encoding")]
    InvalidPublicKey,

    #[error("invalid signature bytes: expected {SIGNATURE_LENGTH} bytes")]
    InvalidSignature,
}

/// A device identity keypair wrapping an Ed25519 signing key.
///
/// `IdentityKeypair` intentionally does NOT implement `Serialize`.
/// Persisting a private key should be a deliberate act; use
/// [`secret_key_bytes`](Self::secret_key_bytes) explicitly.
///
/// # Examples
///
/// ```
/// use offcash_protocol::crypto::IdentityKeypair;
///
/// let kp = IdentityKeypair::generate();
/// let sig = kp.sign(b"token body");
/// assert!(kp.public_key().verify(b"token body", &sig));
/// ```
pub struct IdentityKeypair {
    signing_key: SigningKey,
}

/// The public half of a device identity.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentityPublicKey {
    bytes: [u8; VERIFYING_KEY_LENGTH],
}

/// An Ed25519 signature. Always 64 bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    bytes: [u8; SIGNATURE_LENGTH],
}

impl IdentityKeypair {
    /// Generate a fresh keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Construct a keypair deterministically from a 32-byte seed.
    ///
    /// Used by custodians restoring a persisted key and by tests that need
    /// reproducible identities.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Reconstruct a keypair from a hex-encoded 32-byte seed.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let seed: [u8; 32] = decode_hex_array(hex_str).ok_or(KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Returns the public key associated with this keypair.
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Sign a message. Ed25519 signatures are deterministic.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            bytes: self.signing_key.sign(message).to_bytes(),
        }
    }

    /// Export the raw 32-byte seed.
    ///
    /// **Handle with extreme care.** Only custodians persisting the key
    /// should ever call this.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl Clone for IdentityKeypair {
    /// Cloning a keypair is allowed but should make you uncomfortable.
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secret key material in debug output.
        write!(f, "IdentityKeypair(pub={})", self.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// IdentityPublicKey
// ---------------------------------------------------------------------------

impl IdentityPublicKey {
    /// Create a public key from raw bytes. No curve check is done here.
    pub fn from_bytes(bytes: [u8; VERIFYING_KEY_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Parse a hex-encoded public key. Only the length is validated.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        decode_hex_array(s)
            .map(Self::from_bytes)
            .ok_or(KeyError::InvalidPublicKey)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; VERIFYING_KEY_LENGTH] {
        &self.bytes
    }

    /// Verify a signature against this public key.
    ///
    /// Returns `false` for anything that isn't a valid signature by this
    /// key, including a public key that isn't a curve point. Never panics.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let dalek_sig = DalekSignature::from_bytes(&signature.bytes);
        verifying_key.verify(message, &dalek_sig).is_ok()
    }

    /// Hex-encoded representation. 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// First eight hex characters, for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.bytes[..4])
    }
}

impl Hash for IdentityPublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({})", self.short_hex())
    }
}

impl Serialize for IdentityPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for IdentityPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

impl Signature {
    /// Create a signature from raw bytes.
    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Parse a hex-encoded signature.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        decode_hex_array(s)
            .map(Self::from_bytes)
            .ok_or(KeyError::InvalidSignature)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.bytes[..8]))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Decode a hex string into a fixed-size array. `None` on bad hex or length.
pub(crate) fn decode_hex_array<const N: usize>(s: &str) -> Option<[u8; N]> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}
