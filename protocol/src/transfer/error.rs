//! The error every payment-level operation returns.

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::session::SessionError;
use crate::transport::TransportError;
use crate::wallet::{LedgerError, StoreError};

/// Why a payment step failed.
///
/// Nothing is retried automatically. A rejected transfer never leaves
/// either ledger half-changed.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Malformed message, QR text or field mismatch.
    #[error("invalid format: {0}")]
    Parse(String),

    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("key agreement failed: {0}")]
    KeyAgreement(String),

    /// An encrypted frame did not authenticate.
    #[error("message authentication failed")]
    Authentication,

    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u64, available: u64 },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A bounded wait ran out. Carries the stage that timed out.
    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A payment is already queued or in flight on this session.
    #[error("a payment is already pending")]
    PaymentPending,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("peer disconnected")]
    Disconnected,

    /// The scanned QR code is older than the configured maximum age.
    #[error("bootstrap payload expired")]
    Expired,
}

impl From<SessionError> for PaymentError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::KeyAgreement(reason) => Self::KeyAgreement(reason),
            SessionError::Authentication => Self::Authentication,
            SessionError::Terminated => Self::Disconnected,
            SessionError::NotEstablished | SessionError::Encryption => {
                Self::InvalidState(e.to_string())
            }
        }
    }
}

impl From<BootstrapError> for PaymentError {
    fn from(e: BootstrapError) -> Self {
        match e {
            BootstrapError::Parse(reason) => Self::Parse(reason),
            BootstrapError::InvalidSignature => {
                Self::SignatureVerification("bootstrap payload".into())
            }
            BootstrapError::Stale => Self::Expired,
            BootstrapError::Encoding(e) => Self::Parse(e.to_string()),
        }
    }
}

impl From<StoreError> for PaymentError {
    fn from(e: StoreError) -> Self {
        Self::Ledger(LedgerError::Store(e))
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
