//! # AES-256-GCM Encryption
//!
//! Authenticated encryption for session traffic. Every application message
//! that crosses the proximity link after the handshake goes through here.
//!
//! ## Nonce management
//!
//! GCM is notoriously unforgiving about nonce reuse. Our strategy: random
//! 96-bit nonces from a CSPRNG, one per message. Session keys live for one
//! connection and carry a handful of messages, so the birthday bound is not
//! a concern.
//!
//! ## Wire format
//!
//! ```text
//! nonce (12 bytes) || ciphertext || tag (16 bytes)
//! ```
//!
//! The tag is appended by AES-GCM itself; we only prepend the nonce.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// Errors that can occur during encryption/decryption.
///
/// The difference between "wrong key" and "corrupted ciphertext" is none of
/// an attacker's business, so both are [`EncryptionError::AuthenticationFailed`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("authentication failed -- wrong key or tampered ciphertext")]
    AuthenticationFailed,

    #[error("ciphertext too short: must be at least {} bytes", AES_NONCE_LENGTH + AES_TAG_LENGTH)]
    CiphertextTooShort,
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
///
/// `associated_data`, when given, is authenticated but not encrypted and
/// must be supplied again, byte for byte, at decryption.
///
/// # Example
///
/// ```
/// use offcash_protocol::crypto::encryption::{aead_decrypt, aead_encrypt};
///
/// let key = [0x42u8; 32];
/// let sealed = aead_encrypt(&key, b"TOKEN_TRANSFER", None).unwrap();
/// assert_eq!(aead_decrypt(&key, &sealed, None).unwrap(), b"TOKEN_TRANSFER");
/// ```
pub fn aead_encrypt(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    associated_data: Option<&[u8]>,
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let payload = Payload {
        msg: plaintext,
        aad: associated_data.unwrap_or_default(),
    };
    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`aead_encrypt`].
///
/// # Errors
///
/// [`EncryptionError::CiphertextTooShort`] if the frame cannot even hold a
/// nonce and a tag; [`EncryptionError::AuthenticationFailed`] for a wrong
/// key, mismatched associated data, or any modified byte.
pub fn aead_decrypt(
    key: &[u8; AES_KEY_LENGTH],
    data: &[u8],
    associated_data: Option<&[u8]>,
) -> Result<Vec<u8>, EncryptionError> {
    if data.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let (nonce_bytes, ciphertext) = data.split_at(AES_NONCE_LENGTH);
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::AuthenticationFailed)?;
    let nonce = Nonce::from_slice(nonce_bytes);

    let payload = Payload {
        msg: ciphertext,
        aad: associated_data.unwrap_or_default(),
    };
    cipher
        .decrypt(nonce, payload)
        .map_err(|_| EncryptionError::AuthenticationFailed)
}
