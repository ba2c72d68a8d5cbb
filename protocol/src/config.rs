//! # Protocol Configuration & Constants
//!
//! Every magic number in OFFCASH lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! Two kinds of values live in this file:
//!
//! - **Wire constants** — key lengths, HKDF parameters, message framing.
//!   Changing any of these breaks interoperability with every device already
//!   in the field. Don't.
//! - **Runtime knobs** — timeouts and identifiers collected in
//!   [`ProtocolConfig`], which the device binary can load from a file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The full version string.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519 for identity signatures: tokens, transfers, receipts, QR codes.
pub const SIGNING_ALGORITHM: &str = "Ed25519";

/// Ed25519 public key length in bytes.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// X25519 for the per-session ephemeral key agreement.
pub const KEY_EXCHANGE_ALGORITHM: &str = "X25519";

/// X25519 public key length. Handshake messages are exactly this long.
pub const EPHEMERAL_KEY_LENGTH: usize = 32;

/// AES-256-GCM for session traffic.
pub const SYMMETRIC_ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. 12 bytes. Not 16. Not 8. Twelve.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// HKDF salt: 32 zero bytes.
///
/// A fixed salt is only acceptable because the HKDF input (the X25519
/// output) is unique per session. Both ephemeral keys are fresh, so two
/// sessions never feed the same secret into the KDF.
pub const HKDF_SALT: [u8; 32] = [0u8; 32];

/// HKDF info string binding derived keys to this protocol.
pub const HKDF_INFO: &[u8] = b"CBDC_SESSION";

/// Length of the random nonce embedded in the QR bootstrap payload.
pub const BOOTSTRAP_NONCE_LENGTH: usize = 12;

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// The denominations a token may carry, in smallest currency units.
///
/// Tokens are notes, not balances: a wallet holding 250 holds a set of
/// notes that happen to sum to 250. Anything outside this list is rejected
/// at mint and at receipt.
pub const DENOMINATIONS: [u64; 10] = [1, 2, 5, 10, 20, 50, 100, 200, 500, 2000];

/// Default issuer identifier stamped on locally minted tokens.
pub const DEFAULT_ISSUER_ID: &str = "CBDC-DEV-ISSUER";

/// Returns `true` if `amount` is one of the supported [`DENOMINATIONS`].
pub fn is_valid_denomination(amount: u64) -> bool {
    DENOMINATIONS.contains(&amount)
}

// ---------------------------------------------------------------------------
// Proximity Transport
// ---------------------------------------------------------------------------

/// Service identifier advertised by merchants and filtered on by payers.
pub const SERVICE_ID: &str = "com.example.cbdc.CBDC_SERVICE";

/// Legacy GATT service UUID. Older QR codes carry this under `service_uuid`.
pub const LEGACY_SERVICE_UUID: &str = "0000cbd1-0000-1000-8000-00805f9b34fb";

/// Prefix of the endpoint name a merchant advertises under. The POS ID is
/// appended so payers can pick the right merchant out of a crowded room.
pub const MERCHANT_ENDPOINT_PREFIX: &str = "CBDC-Merchant-";

/// Endpoint name payers use when requesting a connection.
pub const PAYER_ENDPOINT_NAME: &str = "CBDC-Payer";

/// How long a discovered endpoint stays usable for a direct reconnect.
pub const ENDPOINT_CACHE_TTL: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Default bound on endpoint discovery.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on connect + handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound on waiting for the merchant's ACCEPT.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(15);

/// QR codes older than this are refused by payers.
pub const BOOTSTRAP_MAX_AGE: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Runtime knobs for a payment session.
///
/// Defaults match the constants above. Devices that need different
/// behavior (slow radios, test rigs) load a JSON file into this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Service identifier used for advertise/discover.
    pub service_id: String,
    /// Issuer identifier stamped on minted tokens.
    pub issuer_id: String,
    /// Discovery timeout in milliseconds.
    pub discovery_timeout_ms: u64,
    /// Connect + handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// ACCEPT wait timeout in milliseconds.
    pub accept_timeout_ms: u64,
    /// Maximum accepted QR age in milliseconds.
    pub bootstrap_max_age_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            service_id: SERVICE_ID.to_string(),
            issuer_id: DEFAULT_ISSUER_ID.to_string(),
            discovery_timeout_ms: DISCOVERY_TIMEOUT.as_millis() as u64,
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            accept_timeout_ms: ACCEPT_TIMEOUT.as_millis() as u64,
            bootstrap_max_age_ms: BOOTSTRAP_MAX_AGE.as_millis() as u64,
        }
    }
}

impl ProtocolConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn bootstrap_max_age(&self) -> Duration {
        Duration::from_millis(self.bootstrap_max_age_ms)
    }
}

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Current Unix time in milliseconds.
///
/// Every timestamp on the wire uses this clock. Devices are offline, so
/// nothing here is trusted for ordering across devices; it is metadata.
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
