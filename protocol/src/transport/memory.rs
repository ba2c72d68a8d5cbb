//! In-process transport.
//!
//! A [`MemoryMedium`] plays the role of the air: every [`MemoryTransport`]
//! created from it can see the others' advertisements and open links to
//! them. Frames are delivered through unbounded tokio channels, so order is
//! preserved and nothing is ever lost while both ends exist.
//!
//! Used by the integration tests and by `offcash simulate`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use super::{EndpointId, Transport, TransportError, TransportEvent};

#[derive(Debug)]
struct Node {
    name: String,
    advertising: Option<String>,
    discovering: Option<String>,
    links: HashSet<EndpointId>,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Debug, Default)]
struct MediumState {
    next_id: u64,
    nodes: HashMap<EndpointId, Node>,
}

impl MediumState {
    fn emit(&self, to: &EndpointId, event: TransportEvent) {
        if let Some(node) = self.nodes.get(to) {
            // A dropped receiver just means nobody is listening any more.
            let _ = node.tx.send(event);
        }
    }
}

/// The shared medium all in-memory endpoints live on.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    state: Arc<Mutex<MediumState>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint with a display `name`.
    pub fn endpoint(&self, name: &str) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = EndpointId(format!("mem-{}", state.next_id));
        state.nodes.insert(
            id.clone(),
            Node {
                name: name.to_string(),
                advertising: None,
                discovering: None,
                links: HashSet::new(),
                tx,
            },
        );
        MemoryTransport {
            id,
            state: Arc::clone(&self.state),
            events: Mutex::new(Some(rx)),
        }
    }
}

/// One endpoint on a [`MemoryMedium`].
#[derive(Debug)]
pub struct MemoryTransport {
    id: EndpointId,
    state: Arc<Mutex<MediumState>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl MemoryTransport {
    /// This endpoint's id as seen by its peers.
    pub fn id(&self) -> &EndpointId {
        &self.id
    }

    fn unlink(state: &mut MediumState, a: &EndpointId, b: &EndpointId) -> bool {
        let had = state
            .nodes
            .get_mut(a)
            .map(|n| n.links.remove(b))
            .unwrap_or(false);
        if let Some(n) = state.nodes.get_mut(b) {
            n.links.remove(a);
        }
        had
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn advertise(&self, name: &str, service_id: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let node = state.nodes.get_mut(&self.id).ok_or(TransportError::Closed)?;
        node.name = name.to_string();
        node.advertising = Some(service_id.to_string());

        let watchers: Vec<EndpointId> = state
            .nodes
            .iter()
            .filter(|(id, n)| **id != self.id && n.discovering.as_deref() == Some(service_id))
            .map(|(id, _)| id.clone())
            .collect();
        for w in watchers {
            state.emit(
                &w,
                TransportEvent::EndpointFound {
                    id: self.id.clone(),
                    name: name.to_string(),
                    service_id: service_id.to_string(),
                },
            );
        }
        trace!(id = %self.id, name, "advertising");
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let service = match state.nodes.get_mut(&self.id) {
            Some(node) => node.advertising.take(),
            None => return Err(TransportError::Closed),
        };
        if let Some(service) = service {
            let watchers: Vec<EndpointId> = state
                .nodes
                .iter()
                .filter(|(id, n)| {
                    **id != self.id && n.discovering.as_deref() == Some(service.as_str())
                })
                .map(|(id, _)| id.clone())
                .collect();
            for w in watchers {
                state.emit(&w, TransportEvent::EndpointLost { id: self.id.clone() });
            }
        }
        Ok(())
    }

    async fn discover(&self, service_id: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let node = state.nodes.get_mut(&self.id).ok_or(TransportError::Closed)?;
        node.discovering = Some(service_id.to_string());

        let visible: Vec<TransportEvent> = state
            .nodes
            .iter()
            .filter(|(id, n)| **id != self.id && n.advertising.as_deref() == Some(service_id))
            .map(|(id, n)| TransportEvent::EndpointFound {
                id: id.clone(),
                name: n.name.clone(),
                service_id: service_id.to_string(),
            })
            .collect();
        for event in visible {
            state.emit(&self.id, event);
        }
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let node = state.nodes.get_mut(&self.id).ok_or(TransportError::Closed)?;
        node.discovering = None;
        Ok(())
    }

    async fn connect(&self, endpoint: &EndpointId) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let reachable = state
            .nodes
            .get(endpoint)
            .map(|n| n.advertising.is_some())
            .unwrap_or(false);
        if !reachable {
            state.emit(
                &self.id,
                TransportEvent::ConnectionFailed {
                    id: endpoint.clone(),
                    reason: "endpoint not advertising".into(),
                },
            );
            return Ok(());
        }

        if let Some(n) = state.nodes.get_mut(&self.id) {
            n.links.insert(endpoint.clone());
        }
        if let Some(n) = state.nodes.get_mut(endpoint) {
            n.links.insert(self.id.clone());
        }
        state.emit(&self.id, TransportEvent::Connected { id: endpoint.clone() });
        state.emit(endpoint, TransportEvent::Connected { id: self.id.clone() });
        trace!(from = %self.id, to = %endpoint, "link up");
        Ok(())
    }

    async fn send(&self, endpoint: &EndpointId, bytes: Vec<u8>) -> Result<(), TransportError> {
        let state = self.state.lock();
        let linked = state
            .nodes
            .get(&self.id)
            .map(|n| n.links.contains(endpoint))
            .unwrap_or(false);
        if !linked {
            return Err(TransportError::NotConnected(endpoint.clone()));
        }
        state.emit(
            endpoint,
            TransportEvent::Received {
                from: self.id.clone(),
                bytes,
            },
        );
        Ok(())
    }

    async fn disconnect(&self, endpoint: &EndpointId) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if Self::unlink(&mut state, &self.id, endpoint) {
            state.emit(&self.id, TransportEvent::Disconnected { id: endpoint.clone() });
            state.emit(endpoint, TransportEvent::Disconnected { id: self.id.clone() });
            trace!(from = %self.id, to = %endpoint, "link down");
        }
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events.lock().take()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        let Some(node) = state.nodes.remove(&self.id) else {
            return;
        };
        for peer in &node.links {
            if let Some(n) = state.nodes.get_mut(peer) {
                n.links.remove(&self.id);
            }
            state.emit(peer, TransportEvent::Disconnected { id: self.id.clone() });
        }
        if let Some(service) = node.advertising {
            let watchers: Vec<EndpointId> = state
                .nodes
                .iter()
                .filter(|(_, n)| n.discovering.as_deref() == Some(service.as_str()))
                .map(|(id, _)| id.clone())
                .collect();
            for w in watchers {
                state.emit(&w, TransportEvent::EndpointLost { id: self.id.clone() });
            }
        }
    }
}
