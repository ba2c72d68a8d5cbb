//! Application messages carried inside an established session.
//!
//! Two of them, both JSON and both tagged with a `type` field:
//!
//! ```text
//! TOKEN_TRANSFER  {type, token:{…}, transfer:{…}}      payer → merchant
//! ACCEPT          {type, token_serial, pos_id, …}       merchant → payer
//! ```

use serde::{Deserialize, Serialize};

use super::error::PaymentError;
use crate::wallet::{AcceptReceipt, MessageKind, Token, Transfer};

/// The payer's hand-over: the untouched token plus the signed transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransferMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub token: Token,
    pub transfer: Transfer,
}

impl TokenTransferMessage {
    pub fn new(token: Token, transfer: Transfer) -> Self {
        Self {
            kind: MessageKind::TokenTransfer,
            token,
            transfer,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolMessage {
    TokenTransfer(TokenTransferMessage),
    Accept(AcceptReceipt),
}

/// Just enough of a message to route it.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: MessageKind,
}

impl ProtocolMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::TokenTransfer(_) => MessageKind::TokenTransfer,
            Self::Accept(_) => MessageKind::Accept,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PaymentError> {
        let bytes = match self {
            Self::TokenTransfer(m) => serde_json::to_vec(m)?,
            Self::Accept(r) => serde_json::to_vec(r)?,
        };
        Ok(bytes)
    }

    /// Parse a decrypted frame. Unknown or missing `type` is a parse error.
    pub fn decode(bytes: &[u8]) -> Result<Self, PaymentError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        match envelope.kind {
            MessageKind::TokenTransfer => Ok(Self::TokenTransfer(serde_json::from_slice(bytes)?)),
            MessageKind::Accept => Ok(Self::Accept(serde_json::from_slice(bytes)?)),
        }
    }
}
