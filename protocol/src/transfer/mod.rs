//! # Transfer Protocol
//!
//! The payment itself, run inside a [`SecureSession`](crate::session::SecureSession)
//! on top of a [`Transport`](crate::transport::Transport).
//!
//! ```text
//!  payer                                         merchant
//!  ─────                                         ────────
//!  scan QR, verify ─────────────────────────────  show signed QR
//!  discover "CBDC-Merchant-{pos_id}" ◀──────────  advertise
//!  connect ─────────────────────────────────────▶ accept one payer
//!  X25519 hello ────────────────────────────────▶ X25519 reply
//!  TOKEN_TRANSFER {token, transfer} ────────────▶ verify, file, sign receipt
//!  verify receipt, delete token ◀──────────────── ACCEPT {…}
//! ```
//!
//! ```text
//! error.rs     — PaymentError
//! messages.rs  — TOKEN_TRANSFER / ACCEPT encoding
//! payer.rs     — PayerSession state machine
//! merchant.rs  — MerchantSession state machine
//! ```

pub mod error;
pub mod merchant;
pub mod messages;
pub mod payer;

pub use error::PaymentError;
pub use merchant::{MerchantEvent, MerchantSession, MerchantState};
pub use messages::{ProtocolMessage, TokenTransferMessage};
pub use payer::{PayerSession, PayerState};
