//! Recently discovered merchant endpoints, keyed by point-of-sale id.
//!
//! Discovery is the slow part of a payment. A payer that saw a merchant a
//! moment ago can reconnect straight away instead of scanning again. Entries
//! expire after [`ENDPOINT_CACHE_TTL`]: radios move, ids get reassigned.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::EndpointId;
use crate::config::{ENDPOINT_CACHE_TTL, MERCHANT_ENDPOINT_PREFIX};

/// Extract the pos id from an advertised name like `CBDC-Merchant-3f9a2c1e`.
pub fn pos_id_from_endpoint_name(name: &str) -> Option<&str> {
    name.strip_prefix(MERCHANT_ENDPOINT_PREFIX)
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Clone)]
struct CachedEndpoint {
    id: EndpointId,
    seen: Instant,
}

#[derive(Debug)]
pub struct EndpointCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedEndpoint>>,
}

impl Default for EndpointCache {
    fn default() -> Self {
        Self::new(ENDPOINT_CACHE_TTL)
    }
}

impl EndpointCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a discovery. Names that are not merchant names are ignored.
    /// Returns the pos id when the name was recorded. Expired entries are
    /// dropped on the way.
    pub fn record(&self, id: &EndpointId, name: &str) -> Option<String> {
        let pos_id = pos_id_from_endpoint_name(name)?.to_string();
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.seen.elapsed() < self.ttl);
        entries.insert(
            pos_id.clone(),
            CachedEndpoint {
                id: id.clone(),
                seen: Instant::now(),
            },
        );
        Some(pos_id)
    }

    /// The endpoint for `pos_id`, if seen within the TTL.
    pub fn lookup(&self, pos_id: &str) -> Option<EndpointId> {
        let mut entries = self.entries.lock();
        match entries.get(pos_id) {
            Some(e) if e.seen.elapsed() < self.ttl => Some(e.id.clone()),
            Some(_) => {
                entries.remove(pos_id);
                None
            }
            None => None,
        }
    }

    /// Forget every entry pointing at `id`.
    pub fn forget(&self, id: &EndpointId) {
        self.entries.lock().retain(|_, e| &e.id != id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
