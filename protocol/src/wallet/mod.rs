//! # Wallet Module
//!
//! Where the money lives on an OFFCASH device: bearer tokens, the custody
//! evidence attached to received ones, and the ledger that owns them.
//!
//! ## Architecture
//!
//! ```text
//! token.rs   — Token: mint, signature check
//! proof.rs   — Transfer, AcceptReceipt, ChainProof, WalletEntry
//! ledger.rs  — WalletLedger: balance, exact change, atomic add/remove
//! store.rs   — LedgerStore trait, sled and in-memory stores, DeviceDb
//! ```
//!
//! ## Design Principles
//!
//! 1. **All amounts are `u64` in minor units.** No floating point, so
//!    "exact change" means exact equality.
//!
//! 2. **Tokens are never re-signed.** The mint signature is the token's
//!    identity; custody is tracked beside it, not inside it.
//!
//! 3. **Persist, then publish.** A ledger change is visible only after the
//!    store accepted it.

pub mod ledger;
pub mod proof;
pub mod store;
pub mod token;

pub use ledger::{LedgerError, WalletLedger};
pub use proof::{AcceptReceipt, ChainProof, MessageKind, Transfer, WalletEntry};
pub use store::{DeviceDb, LedgerStore, MemoryLedgerStore, SledLedgerStore, StoreError};
pub use token::{Token, TokenError};
