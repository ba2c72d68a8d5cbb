//! # Digital Signatures
//!
//! Ed25519 signing and verification over canonical JSON bodies.
//!
//! Every signed object in OFFCASH (token, transfer, accept receipt, QR
//! payload) is signed the same way: build the object *without* its
//! signature field, serialize it to JSON with a fixed field order, sign the
//! UTF-8 bytes. Verification rebuilds the same body from the parsed object
//! and checks the signature over the rebuilt bytes.
//!
//! ## Why struct-driven canonical form
//!
//! The field order comes from the Rust struct declaration, which serde_json
//! preserves. It never depends on map iteration order or on how the peer
//! happened to lay out its JSON. Two devices that agree on the struct agree
//! on the bytes.

use serde::Serialize;

use super::custody::KeyCustody;
use super::keys::{IdentityKeypair, IdentityPublicKey, Signature};

/// Serialize a signing body to its canonical byte form.
///
/// Bodies are plain structs of strings, integers and hex-encoded keys, so
/// serialization cannot fail in practice; the `Result` is kept so callers
/// surface the impossible case instead of panicking.
pub fn canonical_bytes<T: Serialize>(body: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(body)
}

/// Sign raw bytes with a keypair held by the caller.
pub fn sign(keypair: &IdentityKeypair, message: &[u8]) -> Signature {
    keypair.sign(message)
}

/// Verify an Ed25519 signature. Returns `false` on any failure.
pub fn verify(public_key: &IdentityPublicKey, message: &[u8], signature: &Signature) -> bool {
    public_key.verify(message, signature)
}

/// Sign the canonical bytes of `body` through a key custodian.
pub fn sign_body<T: Serialize>(
    custody: &dyn KeyCustody,
    body: &T,
) -> Result<Signature, serde_json::Error> {
    let bytes = canonical_bytes(body)?;
    Ok(custody.sign(&bytes))
}

/// Verify a signature over the canonical bytes of `body`.
///
/// A body that fails to serialize verifies as `false`.
pub fn verify_body<T: Serialize>(
    public_key: &IdentityPublicKey,
    body: &T,
    signature: &Signature,
) -> bool {
    match canonical_bytes(body) {
        Ok(bytes) => verify(public_key, &bytes, signature),
        Err(_) => false,
    }
}
