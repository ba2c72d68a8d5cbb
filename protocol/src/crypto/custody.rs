//! # Key Custody
//!
//! The device identity key is the one secret that turns a bag of JSON into
//! money. On a phone it sits in a hardware keystore and the private half is
//! never exported; the protocol only ever asks for two things: "what is your
//! public key" and "sign these bytes".
//!
//! [`KeyCustody`] is that capability. Implementations here:
//!
//! - [`SoftwareKeyCustody`] — an in-memory key, injected from configuration
//!   or generated on the spot. Tests and simulations.
//! - [`SledKeyCustody`] — persists the seed in a sled tree. Opening is
//!   idempotent: the first open generates the key, every later open returns
//!   the same one.
//!
//! A secure-enclave binding would be a third implementation; nothing in the
//! protocol needs to change for it.

use sled::Tree;
use thiserror::Error;
use tracing::info;

use super::keys::{IdentityKeypair, IdentityPublicKey, Signature};

/// Signing capability over a device identity key.
///
/// Contract: private key material is never accessible through this trait,
/// and repeated construction over the same backing store yields the same key.
pub trait KeyCustody: Send + Sync {
    /// The identity public key.
    fn public_key(&self) -> IdentityPublicKey;

    /// Sign `message` with the identity private key.
    fn sign(&self, message: &[u8]) -> Signature;
}

/// Errors from persistent custodians.
#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("key store error: {0}")]
    Store(#[from] sled::Error),

    #[error("stored identity key is corrupt")]
    CorruptKey,
}

// ---------------------------------------------------------------------------
// SoftwareKeyCustody
// ---------------------------------------------------------------------------

/// An identity key held in process memory.
#[derive(Debug, Clone)]
pub struct SoftwareKeyCustody {
    keypair: IdentityKeypair,
}

impl SoftwareKeyCustody {
    /// Wrap an existing keypair (configuration-injected key).
    pub fn new(keypair: IdentityKeypair) -> Self {
        Self { keypair }
    }

    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self::new(IdentityKeypair::generate())
    }

    /// Deterministic identity from a seed. Test fixtures only.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::new(IdentityKeypair::from_seed(seed))
    }
}

impl KeyCustody for SoftwareKeyCustody {
    fn public_key(&self) -> IdentityPublicKey {
        self.keypair.public_key()
    }

    fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }
}

// ---------------------------------------------------------------------------
// SledKeyCustody
// ---------------------------------------------------------------------------

/// Key under which the identity seed is stored.
const IDENTITY_KEY: &[u8] = b"device_identity_seed";

/// An identity key persisted in a sled tree.
///
/// The seed is written once and flushed before `open` returns, so a crash
/// right after first launch cannot leave the device with two identities.
pub struct SledKeyCustody {
    keypair: IdentityKeypair,
}

impl SledKeyCustody {
    /// Load the identity from `tree`, generating and persisting it if absent.
    pub fn open(tree: &Tree) -> Result<Self, CustodyError> {
        if let Some(stored) = tree.get(IDENTITY_KEY)? {
            let seed: [u8; 32] = stored
                .as_ref()
                .try_into()
                .map_err(|_| CustodyError::CorruptKey)?;
            return Ok(Self {
                keypair: IdentityKeypair::from_seed(&seed),
            });
        }

        let keypair = IdentityKeypair::generate();
        let seed = keypair.secret_key_bytes();
        // compare_and_swap so two concurrent first-opens agree on one key.
        let outcome = tree.compare_and_swap(IDENTITY_KEY, None as Option<&[u8]>, Some(&seed[..]))?;
        tree.flush()?;

        match outcome {
            Ok(()) => {
                info!(pubkey = %keypair.public_key().short_hex(), "generated device identity");
                Ok(Self { keypair })
            }
            Err(_) => Self::open(tree),
        }
    }
}

impl KeyCustody for SledKeyCustody {
    fn public_key(&self) -> IdentityPublicKey {
        self.keypair.public_key()
    }

    fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_tree() -> Tree {
        let db = sled::Config::new().temporary(true).open().unwrap();
        db.open_tree("identity").unwrap()
    }

    #[test]
    fn software_custody_signs_verifiably() {
        let custody = SoftwareKeyCustody::generate();
        let sig = custody.sign(b"payload");
        assert!(custody.public_key().verify(b"payload", &sig));
    }

    #[test]
    fn sled_custody_is_idempotent() {
        let tree = temp_tree();
        let first = SledKeyCustody::open(&tree).unwrap();
        let second = SledKeyCustody::open(&tree).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn sled_custody_rejects_corrupt_seed() {
        let tree = temp_tree();
        tree.insert(IDENTITY_KEY, &b"short"[..]).unwrap();
        assert!(matches!(
            SledKeyCustody::open(&tree),
            Err(CustodyError::CorruptKey)
        ));
    }
}
