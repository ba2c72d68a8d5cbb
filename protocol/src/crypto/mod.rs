//! # Cryptographic Primitives for OFFCASH
//!
//! Every signature, every key agreement, every sealed message flows through
//! here. We deliberately chose boring, well-audited cryptography:
//!
//! - **Ed25519** for identity signatures (tokens, transfers, receipts, QR).
//! - **X25519** for per-session ephemeral key agreement.
//! - **HKDF-SHA256** to turn the raw agreement output into a session key.
//! - **AES-256-GCM** for the encrypted transfer/accept exchange.
//!
//! Everything here is a thin, type-safe wrapper around audited
//! implementations. If you're tempted to optimize these functions, please
//! reconsider.

pub mod custody;
pub mod encryption;
pub mod keys;
pub mod pfs;
pub mod signatures;

pub use custody::{KeyCustody, SledKeyCustody, SoftwareKeyCustody};
pub use encryption::{aead_decrypt, aead_encrypt, EncryptionError};
pub use keys::{IdentityKeypair, IdentityPublicKey, KeyError, Signature};
pub use pfs::{
    agree_session_key, derive_session_key, ecdh, generate_ephemeral_key_pair, EphemeralKeyPair,
    PfsError, SessionKey,
};
pub use signatures::{sign, verify};
