//! # Bearer Tokens
//!
//! A [`Token`] is a fixed-denomination unit of digital cash. Whoever holds
//! the JSON holds the money, so everything interesting about a token is in
//! its signature: the minting device signs every field except the signature
//! itself, in declaration order, and that signature stays with the token for
//! its entire lifetime. Tokens are **never re-signed** on transfer; custody
//! evidence travels separately in a [`ChainProof`](super::proof::ChainProof).
//!
//! ## Wire form
//!
//! ```json
//! {"serial":"…","amount":100,"issuer_id":"CBDC-DEV-ISSUER",
//!  "timestamp":1717171717000,"device_public_key":"ab…","signature":"cd…"}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{is_valid_denomination, now_millis};
use crate::crypto::custody::KeyCustody;
use crate::crypto::keys::{IdentityPublicKey, Signature};
use crate::crypto::signatures::{sign_body, verify_body};

/// Errors that can occur when minting a token.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("amount {0} is not a valid denomination")]
    InvalidDenomination(u64),

    #[error("token encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A signed bearer token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// UUIDv4 assigned at mint. Unique across every wallet.
    pub serial: String,
    /// Face value in minor currency units.
    pub amount: u64,
    pub issuer_id: String,
    /// Mint time, Unix milliseconds.
    pub timestamp: u64,
    /// Identity key of the minting device.
    pub device_public_key: IdentityPublicKey,
    pub signature: Signature,
}

/// The signed portion of a token.
#[derive(Serialize)]
struct TokenBody<'a> {
    serial: &'a str,
    amount: u64,
    issuer_id: &'a str,
    timestamp: u64,
    device_public_key: &'a IdentityPublicKey,
}

impl Token {
    /// Mint a new token signed by `custody`.
    ///
    /// # Errors
    ///
    /// [`TokenError::InvalidDenomination`] unless `amount` is one of
    /// [`DENOMINATIONS`](crate::config::DENOMINATIONS).
    pub fn mint(
        custody: &dyn KeyCustody,
        amount: u64,
        issuer_id: &str,
    ) -> Result<Self, TokenError> {
        if !is_valid_denomination(amount) {
            return Err(TokenError::InvalidDenomination(amount));
        }

        let serial = Uuid::new_v4().to_string();
        let timestamp = now_millis();
        let device_public_key = custody.public_key();

        let signature = sign_body(
            custody,
            &TokenBody {
                serial: &serial,
                amount,
                issuer_id,
                timestamp,
                device_public_key: &device_public_key,
            },
        )?;

        Ok(Self {
            serial,
            amount,
            issuer_id: issuer_id.to_string(),
            timestamp,
            device_public_key,
            signature,
        })
    }

    /// Check the mint signature against `device_public_key`.
    ///
    /// Any change to any field after minting makes this return `false`.
    pub fn verify_signature(&self) -> bool {
        verify_body(&self.device_public_key, &self.body(), &self.signature)
    }

    fn body(&self) -> TokenBody<'_> {
        TokenBody {
            serial: &self.serial,
            amount: self.amount,
            issuer_id: &self.issuer_id,
            timestamp: self.timestamp,
            device_public_key: &self.device_public_key,
        }
    }

    /// First eight characters of the serial, for logs.
    pub fn short_serial(&self) -> &str {
        self.serial.get(..8).unwrap_or(&self.serial)
    }
}
