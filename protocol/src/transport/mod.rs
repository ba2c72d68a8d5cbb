//! # Proximity Transport
//!
//! The protocol never talks to a radio directly. It talks to a
//! [`Transport`]: something that can advertise a name, discover names,
//! open a link to a discovered endpoint and move opaque byte frames over
//! it. Whether that is a BLE GATT characteristic, a nearby-connections API
//! or an in-process channel pair is the implementor's business.
//!
//! ## Events, not callbacks
//!
//! Everything that happens *to* a transport (an endpoint showing up, a link
//! coming up, a frame arriving) is delivered as a [`TransportEvent`] on a
//! single channel, taken once with [`Transport::take_events`]. The state
//! machines in [`crate::transfer`] select on that channel with timeouts.
//!
//! ## Guarantees expected of implementations
//!
//! - Frames on one link arrive in send order, whole, at most once.
//! - `connect` emits `Connected` (or `ConnectionFailed`) on the caller's
//!   channel and `Connected` on the peer's.
//! - `disconnect` emits `Disconnected` on both sides.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod cache;
pub mod memory;

pub use cache::{pos_id_from_endpoint_name, EndpointCache};
pub use memory::{MemoryMedium, MemoryTransport};

/// Opaque handle for a remote endpoint, assigned by the transport.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub String);

impl EndpointId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointId({})", self.0)
    }
}

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    EndpointFound {
        id: EndpointId,
        name: String,
        service_id: String,
    },
    EndpointLost {
        id: EndpointId,
    },
    Connected {
        id: EndpointId,
    },
    ConnectionFailed {
        id: EndpointId,
        reason: String,
    },
    Disconnected {
        id: EndpointId,
    },
    Received {
        from: EndpointId,
        bytes: Vec<u8>,
    },
}

/// Errors a transport operation can return synchronously.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(EndpointId),

    #[error("not connected to {0}")]
    NotConnected(EndpointId),

    #[error("transport is closed")]
    Closed,

    #[error("transport error: {0}")]
    Other(String),
}

/// A short-range, intermittently available byte channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start advertising under `name` for `service_id`.
    async fn advertise(&self, name: &str, service_id: &str) -> Result<(), TransportError>;

    async fn stop_advertising(&self) -> Result<(), TransportError>;

    /// Start looking for endpoints advertising `service_id`.
    async fn discover(&self, service_id: &str) -> Result<(), TransportError>;

    async fn stop_discovery(&self) -> Result<(), TransportError>;

    /// Request a link. The outcome arrives as an event.
    async fn connect(&self, endpoint: &EndpointId) -> Result<(), TransportError>;

    /// Send one frame over an open link.
    async fn send(&self, endpoint: &EndpointId, bytes: Vec<u8>) -> Result<(), TransportError>;

    async fn disconnect(&self, endpoint: &EndpointId) -> Result<(), TransportError>;

    /// The event stream. Returns `Some` exactly once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;
}
