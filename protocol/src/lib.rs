// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # OFFCASH Protocol — Core Library
//!
//! Digital cash that works where the network doesn't: two phones, one QR
//! code, a short-range radio link, and no issuer online at payment time.
//!
//! A merchant shows a signed QR code. The payer scans it, finds the merchant
//! over the radio, runs an ephemeral X25519 handshake pinned to the key in
//! the QR, and hands over a signed bearer token inside AES-256-GCM. The
//! merchant checks everything, files the token with a custody proof and
//! answers with a signed receipt. The payer deletes the token. Done.
//!
//! ## Architecture
//!
//! - **config** — Protocol constants and the runtime `ProtocolConfig`.
//! - **crypto** — Ed25519, X25519, HKDF, AES-GCM, key custody. Don't roll your own.
//! - **wallet** — Tokens, chain proofs, the ledger and its sled store.
//! - **bootstrap** — The signed QR payload.
//! - **session** — Per-connection handshake and AEAD framing.
//! - **transport** — The abstract proximity link, plus an in-memory one.
//! - **transfer** — Wire messages and the payer/merchant state machines.
//!
//! ## Design Philosophy
//!
//! 1. Correctness over cleverness. Greedy change-making, one token per
//!    message, one payer per merchant at a time.
//! 2. Nothing private leaves a [`crypto::KeyCustody`].
//! 3. A rejected payment changes nothing, on either device.
//! 4. If it touches money, it has tests. Plural.

pub mod bootstrap;
pub mod config;
pub mod crypto;
pub mod session;
pub mod transfer;
pub mod transport;
pub mod wallet;

pub use bootstrap::{BootstrapError, BootstrapPayload};
pub use config::ProtocolConfig;
pub use session::{SecureSession, SessionError};
pub use transfer::{MerchantEvent, MerchantSession, PayerSession, PaymentError};
pub use transport::{MemoryMedium, MemoryTransport, Transport, TransportEvent};
pub use wallet::{Token, WalletLedger};
