//! # Wallet Persistence
//!
//! Durable storage for the ledger and the device identity, built on sled.
//!
//! ## Tree Layout
//!
//! | Tree       | Key                    | Value                          |
//! |------------|------------------------|--------------------------------|
//! | `wallet`   | `tokens`               | JSON array of [`WalletEntry`]  |
//! | `identity` | `device_identity_seed` | 32-byte Ed25519 seed           |
//!
//! The whole ledger is one value. A wallet holds tens of tokens, not
//! millions, and writing it as a single key makes every save atomic for
//! free: sled either has the old array or the new one, never half of each.
//! Every save is flushed before it returns.

use std::path::Path;

use parking_lot::Mutex;
use sled::{Db, Tree};
use thiserror::Error;

use super::proof::WalletEntry;

/// Errors that can occur while loading or saving the ledger.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Backing storage for a [`WalletLedger`](super::ledger::WalletLedger).
///
/// `save` receives the complete ledger and must either persist all of it
/// or return an error, leaving the previous state intact.
pub trait LedgerStore: Send + Sync {
    fn load(&self) -> Result<Vec<WalletEntry>, StoreError>;
    fn save(&self, entries: &[WalletEntry]) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// DeviceDb
// ---------------------------------------------------------------------------

/// The device's sled database with its two trees opened.
#[derive(Debug, Clone)]
pub struct DeviceDb {
    db: Db,
    wallet: Tree,
    identity: Tree,
}

impl DeviceDb {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// A database that lives in a temp directory and disappears on drop.
    pub fn open_temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let wallet = db.open_tree("wallet")?;
        let identity = db.open_tree("identity")?;
        Ok(Self {
            db,
            wallet,
            identity,
        })
    }

    /// Tree holding the device identity seed.
    pub fn identity_tree(&self) -> &Tree {
        &self.identity
    }

    /// A ledger store over the `wallet` tree.
    pub fn ledger_store(&self) -> SledLedgerStore {
        SledLedgerStore::new(self.wallet.clone())
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SledLedgerStore
// ---------------------------------------------------------------------------

const TOKENS_KEY: &[u8] = b"tokens";

/// Ledger persisted as a single JSON array under one sled key.
#[derive(Debug, Clone)]
pub struct SledLedgerStore {
    tree: Tree,
}

impl SledLedgerStore {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }
}

impl LedgerStore for SledLedgerStore {
    fn load(&self) -> Result<Vec<WalletEntry>, StoreError> {
        match self.tree.get(TOKENS_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, entries: &[WalletEntry]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(entries)?;
        self.tree.insert(TOKENS_KEY, bytes)?;
        self.tree.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryLedgerStore
// ---------------------------------------------------------------------------

/// Volatile store for tests and simulations.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    entries: Mutex<Vec<WalletEntry>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> Result<Vec<WalletEntry>, StoreError> {
        Ok(self.entries.lock().clone())
    }

    fn save(&self, entries: &[WalletEntry]) -> Result<(), StoreError> {
        *self.entries.lock() = entries.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ISSUER_ID;
    use crate::crypto::custody::SoftwareKeyCustody;
    use crate::wallet::token::Token;

    fn entry(amount: u64) -> WalletEntry {
        let custody = SoftwareKeyCustody::generate();
        WalletEntry::minted(Token::mint(&custody, amount, DEFAULT_ISSUER_ID).unwrap())
    }

    #[test]
    fn empty_store_loads_nothing() {
        let db = DeviceDb::open_temporary().unwrap();
        assert!(db.ledger_store().load().unwrap().is_empty());
    }

    #[test]
    fn sled_store_roundtrip() {
        let db = DeviceDb::open_temporary().unwrap();
        let store = db.ledger_store();
        let entries = vec![entry(100), entry(5)];
        store.save(&entries).unwrap();
        assert_eq!(store.load().unwrap(), entries);
    }

    #[test]
    fn persisted_as_json_array() {
        let db = DeviceDb::open_temporary().unwrap();
        let store = db.ledger_store();
        store.save(&[entry(20)]).unwrap();

        let raw = db.wallet.get(TOKENS_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["token"]["amount"], 20);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let entries = vec![entry(200)];
        {
            let db = DeviceDb::open(dir.path()).unwrap();
            db.ledger_store().save(&entries).unwrap();
        }
        let db = DeviceDb::open(dir.path()).unwrap();
        assert_eq!(db.ledger_store().load().unwrap(), entries);
    }

    #[test]
    fn corrupt_value_is_an_error() {
        let db = DeviceDb::open_temporary().unwrap();
        db.wallet.insert(TOKENS_KEY, &b"not json"[..]).unwrap();
        assert!(matches!(
            db.ledger_store().load(),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryLedgerStore::new();
        let entries = vec![entry(1), entry(2)];
        store.save(&entries).unwrap();
        assert_eq!(store.load().unwrap(), entries);
    }
}
