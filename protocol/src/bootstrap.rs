//! # QR Bootstrap
//!
//! The merchant's QR code is the root of trust for a payment. It carries
//! everything a payer needs to find the merchant and to know it is talking
//! to the right device:
//!
//! ```json
//! {"pos_id":"3f9a2c1e","service_id":"com.example.cbdc.CBDC_SERVICE",
//!  "ephemeral_public_key":"…","nonce":"…","timestamp":1717171717000,
//!  "signature":"…","merchant_public_key":"…"}
//! ```
//!
//! The signature covers `pos_id`, the route field, `ephemeral_public_key`,
//! `nonce` and `timestamp`, in that order, and is made with the merchant's
//! identity key. A payer that verified the QR can therefore pin the
//! ephemeral key it later receives over the radio: nobody in between can
//! swap it without breaking the signature.
//!
//! ## Route field
//!
//! Older merchants advertise under a GATT-style `service_uuid`; current ones
//! use `service_id`. Both are accepted. When both appear, `service_id` wins,
//! and the signature is checked over whichever name won.

use std::time::Duration;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{
    now_millis, BOOTSTRAP_NONCE_LENGTH, EPHEMERAL_KEY_LENGTH, MERCHANT_ENDPOINT_PREFIX,
};
use crate::crypto::custody::KeyCustody;
use crate::crypto::keys::{decode_hex_array, IdentityPublicKey, Signature};
use crate::crypto::signatures::{sign_body, verify_body};

/// Errors from building or reading a bootstrap payload.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The text is not a well-formed payload. No partial result is returned.
    #[error("invalid format: {0}")]
    Parse(String),

    #[error("bootstrap signature does not verify")]
    InvalidSignature,

    #[error("bootstrap payload is stale")]
    Stale,

    #[error("encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A decoded (or freshly built) merchant QR payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapPayload {
    pub pos_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_uuid: Option<String>,
    /// Hex-encoded raw X25519 public key.
    pub ephemeral_public_key: String,
    /// Hex-encoded random nonce.
    pub nonce: String,
    /// Creation time, Unix milliseconds.
    pub timestamp: u64,
    pub signature: Signature,
    pub merchant_public_key: IdentityPublicKey,
}

/// The signed portion. Exactly one route field is populated.
#[derive(Serialize)]
struct BootstrapBody<'a> {
    pos_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_uuid: Option<&'a str>,
    ephemeral_public_key: &'a str,
    nonce: &'a str,
    timestamp: u64,
}

impl BootstrapPayload {
    /// Build and sign a payload for `pos_id`.
    pub fn create(
        custody: &dyn KeyCustody,
        pos_id: &str,
        ephemeral_public_key: &[u8; EPHEMERAL_KEY_LENGTH],
        service_id: &str,
    ) -> Result<Self, BootstrapError> {
        let mut nonce = [0u8; BOOTSTRAP_NONCE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let ephemeral_hex = hex::encode(ephemeral_public_key);
        let nonce_hex = hex::encode(nonce);
        let timestamp = now_millis();

        let signature = sign_body(
            custody,
            &BootstrapBody {
                pos_id,
                service_id: Some(service_id),
                service_uuid: None,
                ephemeral_public_key: &ephemeral_hex,
                nonce: &nonce_hex,
                timestamp,
            },
        )?;

        Ok(Self {
            pos_id: pos_id.to_string(),
            service_id: Some(service_id.to_string()),
            service_uuid: None,
            ephemeral_public_key: ephemeral_hex,
            nonce: nonce_hex,
            timestamp,
            signature,
            merchant_public_key: custody.public_key(),
        })
    }

    /// Build, sign and serialize in one go. The result is what goes into
    /// the QR image.
    pub fn encode(
        custody: &dyn KeyCustody,
        pos_id: &str,
        ephemeral_public_key: &[u8; EPHEMERAL_KEY_LENGTH],
        service_id: &str,
    ) -> Result<String, BootstrapError> {
        Self::create(custody, pos_id, ephemeral_public_key, service_id)?.to_json()
    }

    pub fn to_json(&self) -> Result<String, BootstrapError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse scanned QR text.
    ///
    /// # Errors
    ///
    /// [`BootstrapError::Parse`] for malformed JSON, missing fields, a
    /// missing route field, or an ephemeral key that is not 32 hex bytes.
    pub fn decode(text: &str) -> Result<Self, BootstrapError> {
        let payload: Self =
            serde_json::from_str(text.trim()).map_err(|e| BootstrapError::Parse(e.to_string()))?;

        if payload.service_id.is_none() && payload.service_uuid.is_none() {
            return Err(BootstrapError::Parse(
                "missing service_id / service_uuid".into(),
            ));
        }
        if payload.pos_id.is_empty() {
            return Err(BootstrapError::Parse("empty pos_id".into()));
        }
        if decode_hex_array::<EPHEMERAL_KEY_LENGTH>(&payload.ephemeral_public_key).is_none() {
            return Err(BootstrapError::Parse(
                "ephemeral_public_key is not a 32-byte hex key".into(),
            ));
        }
        Ok(payload)
    }

    /// The route the merchant advertises under, preferring `service_id`.
    pub fn route(&self) -> &str {
        self.service_id
            .as_deref()
            .or(self.service_uuid.as_deref())
            .unwrap_or_default()
    }

    /// Check the merchant signature over the canonical body.
    pub fn verify(&self) -> bool {
        let (service_id, service_uuid) = match (&self.service_id, &self.service_uuid) {
            (Some(id), _) => (Some(id.as_str()), None),
            (None, Some(uuid)) => (None, Some(uuid.as_str())),
            (None, None) => return false,
        };
        verify_body(
            &self.merchant_public_key,
            &BootstrapBody {
                pos_id: &self.pos_id,
                service_id,
                service_uuid,
                ephemeral_public_key: &self.ephemeral_public_key,
                nonce: &self.nonce,
                timestamp: self.timestamp,
            },
            &self.signature,
        )
    }

    /// `true` if the payload is no older than `max_age` at `now_ms`.
    ///
    /// Timestamps further in the future than `max_age` are also rejected;
    /// a clock that far off means something is wrong.
    pub fn is_fresh(&self, now_ms: u64, max_age: Duration) -> bool {
        let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        now_ms.abs_diff(self.timestamp) <= max_age_ms
    }

    /// Signature and freshness in one call.
    pub fn validate(&self, now_ms: u64, max_age: Duration) -> Result<(), BootstrapError> {
        if !self.verify() {
            return Err(BootstrapError::InvalidSignature);
        }
        if !self.is_fresh(now_ms, max_age) {
            return Err(BootstrapError::Stale);
        }
        Ok(())
    }

    /// Raw bytes of the merchant's ephemeral key.
    pub fn ephemeral_key_bytes(&self) -> Result<[u8; EPHEMERAL_KEY_LENGTH], BootstrapError> {
        decode_hex_array(&self.ephemeral_public_key)
            .ok_or_else(|| BootstrapError::Parse("bad ephemeral_public_key".into()))
    }

    /// The name the merchant advertises under on the radio.
    pub fn endpoint_name(&self) -> String {
        format!("{MERCHANT_ENDPOINT_PREFIX}{}", self.pos_id)
    }
}

/// A fresh point-of-sale id: the first eight characters of a UUIDv4.
pub fn generate_pos_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
