//! # Wallet Ledger
//!
//! The set of tokens this device owns, keyed by serial.
//!
//! ## Mutation model
//!
//! Every mutation runs as a scoped read-modify-write under a single write
//! lock: clone the map, apply the change, persist the full result, and only
//! then swap it in. If the store refuses the write, the in-memory ledger is
//! untouched and the caller gets the error. A reader never sees a state that
//! was not persisted.
//!
//! ## Exact change
//!
//! [`WalletLedger::select_tokens_for_amount`] is greedy: largest tokens
//! first, take anything that still fits. It is fast and predictable but not
//! a subset-sum solver. With `{50, 20, 20, 20}` and a target of `60` it
//! takes `50` first and then cannot reach `60`, even though `20+20+20`
//! would. We keep that behavior; callers get
//! [`LedgerError::NoExactCombination`] and can ask for a different amount.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crypto::custody::KeyCustody;

use super::proof::{ChainProof, WalletEntry};
use super::store::{LedgerStore, MemoryLedgerStore, StoreError};
use super::token::{Token, TokenError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// The serial is already in the ledger.
    #[error("duplicate token serial: {0}")]
    DuplicateSerial(String),

    #[error("zero-amount operations are not permitted")]
    ZeroAmount,

    /// The greedy selection could not hit the target exactly.
    #[error("no exact combination of tokens for amount {target}")]
    NoExactCombination { target: u64 },
}

// ---------------------------------------------------------------------------
// WalletLedger
// ---------------------------------------------------------------------------

/// Owned tokens, persisted through a [`LedgerStore`].
///
/// `WalletLedger` is `Sync`; share it with `Arc<WalletLedger>`.
pub struct WalletLedger {
    entries: RwLock<BTreeMap<String, WalletEntry>>,
    store: Box<dyn LedgerStore>,
}

impl WalletLedger {
    /// Load the ledger from `store`.
    ///
    /// If the persisted array somehow contains the same serial twice, the
    /// last occurrence wins and a warning is logged.
    pub fn open(store: Box<dyn LedgerStore>) -> Result<Self, LedgerError> {
        let mut entries = BTreeMap::new();
        for entry in store.load()? {
            let serial = entry.token.serial.clone();
            if entries.insert(serial.clone(), entry).is_some() {
                warn!(serial = %serial, "duplicate serial in persisted ledger");
            }
        }
        debug!(tokens = entries.len(), "ledger loaded");

        Ok(Self {
            entries: RwLock::new(entries),
            store,
        })
    }

    /// An empty ledger backed by memory only.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            store: Box::new(MemoryLedgerStore::new()),
        }
    }

    /// Apply `f` to a copy of the ledger, persist it, then publish it.
    fn mutate<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, WalletEntry>) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        let mut guard = self.entries.write();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        let snapshot: Vec<WalletEntry> = next.values().cloned().collect();
        self.store.save(&snapshot)?;
        *guard = next;
        Ok(out)
    }

    // -- Mutations ----------------------------------------------------------

    /// Mint a fresh token with `custody` and add it to the ledger.
    pub fn mint(
        &self,
        custody: &dyn KeyCustody,
        amount: u64,
        issuer_id: &str,
    ) -> Result<Token, LedgerError> {
        let token = Token::mint(custody, amount, issuer_id)?;
        self.mutate(|entries| {
            if entries.contains_key(&token.serial) {
                return Err(LedgerError::DuplicateSerial(token.serial.clone()));
            }
            entries.insert(token.serial.clone(), WalletEntry::minted(token.clone()));
            Ok(())
        })?;
        info!(serial = %token.short_serial(), amount, "minted token");
        Ok(token)
    }

    /// Add a token received from a payer together with its custody proof.
    pub fn add_received(&self, token: Token, proof: ChainProof) -> Result<(), LedgerError> {
        let serial = token.serial.clone();
        let amount = token.amount;
        self.mutate(move |entries| {
            if entries.contains_key(&token.serial) {
                return Err(LedgerError::DuplicateSerial(token.serial));
            }
            entries.insert(token.serial.clone(), WalletEntry::received(token, proof));
            Ok(())
        })?;
        info!(serial = %serial, amount, "received token");
        Ok(())
    }

    /// Remove the entry for `serial`. Returns whether it was present.
    ///
    /// Removing an absent serial is not an error and does not touch the
    /// store.
    pub fn delete(&self, serial: &str) -> Result<bool, LedgerError> {
        if !self.contains(serial) {
            return Ok(false);
        }
        let removed = self.mutate(|entries| Ok(entries.remove(serial).is_some()))?;
        if removed {
            debug!(serial, "deleted token");
        }
        Ok(removed)
    }

    // -- Queries ------------------------------------------------------------

    pub fn get(&self, serial: &str) -> Option<WalletEntry> {
        self.entries.read().get(serial).cloned()
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.entries.read().contains_key(serial)
    }

    /// All tokens, ordered by serial.
    pub fn tokens(&self) -> Vec<Token> {
        self.entries
            .read()
            .values()
            .map(|e| e.token.clone())
            .collect()
    }

    /// All entries including chain proofs, ordered by serial.
    pub fn entries(&self) -> Vec<WalletEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Sum of every token amount.
    pub fn balance(&self) -> u64 {
        self.entries
            .read()
            .values()
            .map(|e| e.token.amount)
            .fold(0u64, u64::saturating_add)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Greedy exact-change selection. See the module docs for its limits.
    pub fn select_tokens_for_amount(&self, target: u64) -> Result<Vec<Token>, LedgerError> {
        if target == 0 {
            return Err(LedgerError::ZeroAmount);
        }

        let mut candidates = self.tokens();
        // Ties broken by serial so the same wallet always picks the same set.
        candidates.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.serial.cmp(&b.serial)));

        let mut selected = Vec::new();
        let mut sum = 0u64;
        for token in candidates {
            if sum == target {
                break;
            }
            if sum.saturating_add(token.amount) <= target {
                sum += token.amount;
                selected.push(token);
            }
        }

        if sum != target {
            debug!(target, reached = sum, "no exact combination");
            return Err(LedgerError::NoExactCombination { target });
        }
        Ok(selected)
    }
}

impl std::fmt::Debug for WalletLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletLedger")
            .field("tokens", &self.len())
            .field("balance", &self.balance())
            .finish()
    }
}
