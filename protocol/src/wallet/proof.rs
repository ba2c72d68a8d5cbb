//! # Transfers, Receipts and Chain Proofs
//!
//! The two signed statements exchanged during a payment:
//!
//! - [`Transfer`]: the payer says "I hand token `S` to point of sale `P`".
//! - [`AcceptReceipt`]: the merchant says "point of sale `P` took token `S`".
//!
//! Both are signed the same way as tokens: every field except `signature`,
//! in declaration order, as compact JSON. The receiving wallet files the
//! pair as a [`ChainProof`] next to the token.

use serde::{Deserialize, Serialize};

use crate::config::now_millis;
use crate::crypto::custody::KeyCustody;
use crate::crypto::keys::{IdentityPublicKey, Signature};
use crate::crypto::signatures::{sign_body, verify_body};

use super::token::Token;

/// Discriminator carried in the `type` field of protocol messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    TokenTransfer,
    Accept,
}

// ---------------------------------------------------------------------------
// Transfer
// ---------------------------------------------------------------------------

/// A payer-signed hand-over of one token to one point of sale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub token_serial: String,
    pub pos_id: String,
    pub timestamp: u64,
    pub payer_public_key: IdentityPublicKey,
    pub signature: Signature,
}

#[derive(Serialize)]
struct TransferBody<'a> {
    #[serde(rename = "type")]
    kind: MessageKind,
    token_serial: &'a str,
    pos_id: &'a str,
    timestamp: u64,
    payer_public_key: &'a IdentityPublicKey,
}

impl Transfer {
    /// Sign a transfer of `token` to `pos_id`.
    pub fn sign(
        custody: &dyn KeyCustody,
        token: &Token,
        pos_id: &str,
    ) -> Result<Self, serde_json::Error> {
        let timestamp = now_millis();
        let payer_public_key = custody.public_key();
        let signature = sign_body(
            custody,
            &TransferBody {
                kind: MessageKind::TokenTransfer,
                token_serial: &token.serial,
                pos_id,
                timestamp,
                payer_public_key: &payer_public_key,
            },
        )?;

        Ok(Self {
            kind: MessageKind::TokenTransfer,
            token_serial: token.serial.clone(),
            pos_id: pos_id.to_string(),
            timestamp,
            payer_public_key,
            signature,
        })
    }

    /// Verify the payer signature over the canonical body.
    pub fn verify_signature(&self) -> bool {
        verify_body(
            &self.payer_public_key,
            &TransferBody {
                kind: self.kind,
                token_serial: &self.token_serial,
                pos_id: &self.pos_id,
                timestamp: self.timestamp,
                payer_public_key: &self.payer_public_key,
            },
            &self.signature,
        )
    }
}

// ---------------------------------------------------------------------------
// AcceptReceipt
// ---------------------------------------------------------------------------

/// A merchant-signed acknowledgement that a token was taken.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptReceipt {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub token_serial: String,
    pub pos_id: String,
    pub timestamp: u64,
    pub merchant_public_key: IdentityPublicKey,
    pub signature: Signature,
}

#[derive(Serialize)]
struct AcceptBody<'a> {
    #[serde(rename = "type")]
    kind: MessageKind,
    token_serial: &'a str,
    pos_id: &'a str,
    timestamp: u64,
    merchant_public_key: &'a IdentityPublicKey,
}

impl AcceptReceipt {
    /// Sign an acceptance of `token_serial` at `pos_id`.
    pub fn sign(
        custody: &dyn KeyCustody,
        token_serial: &str,
        pos_id: &str,
    ) -> Result<Self, serde_json::Error> {
        let timestamp = now_millis();
        let merchant_public_key = custody.public_key();
        let signature = sign_body(
            custody,
            &AcceptBody {
                kind: MessageKind::Accept,
                token_serial,
                pos_id,
                timestamp,
                merchant_public_key: &merchant_public_key,
            },
        )?;

        Ok(Self {
            kind: MessageKind::Accept,
            token_serial: token_serial.to_string(),
            pos_id: pos_id.to_string(),
            timestamp,
            merchant_public_key,
            signature,
        })
    }

    pub fn verify_signature(&self) -> bool {
        verify_body(
            &self.merchant_public_key,
            &AcceptBody {
                kind: self.kind,
                token_serial: &self.token_serial,
                pos_id: &self.pos_id,
                timestamp: self.timestamp,
                merchant_public_key: &self.merchant_public_key,
            },
            &self.signature,
        )
    }
}

// ---------------------------------------------------------------------------
// ChainProof / WalletEntry
// ---------------------------------------------------------------------------

/// Custody evidence attached to a received token.
///
/// The current protocol supports a single hop, so `transfer_chain` always
/// holds exactly one element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainProof {
    pub transfer_chain: Vec<Transfer>,
    pub accept_receipt: AcceptReceipt,
}

impl ChainProof {
    pub fn single_hop(transfer: Transfer, accept_receipt: AcceptReceipt) -> Self {
        Self {
            transfer_chain: vec![transfer],
            accept_receipt,
        }
    }

    /// Every signature in the chain verifies and every statement names
    /// `serial`.
    pub fn verify_for(&self, serial: &str) -> bool {
        !self.transfer_chain.is_empty()
            && self
                .transfer_chain
                .iter()
                .all(|t| t.token_serial == serial && t.verify_signature())
            && self.accept_receipt.token_serial == serial
            && self.accept_receipt.verify_signature()
    }
}

/// One ledger row: a token plus, for received tokens, its chain proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub token: Token,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_proof: Option<ChainProof>,
}

impl WalletEntry {
    pub fn minted(token: Token) -> Self {
        Self {
            token,
            chain_proof: None,
        }
    }

    pub fn received(token: Token, chain_proof: ChainProof) -> Self {
        Self {
            token,
            chain_proof: Some(chain_proof),
        }
    }
}
