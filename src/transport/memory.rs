// In-memory Overlay
// Routes calls between endpoints of one process; records every delivery for assertions

use crate::identity::PeerKey;
use crate::rpc::Method;
use crate::transport::{InboundCall, Overlay, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

const INBOUND_QUEUE: usize = 256;

/// A call that reached its target's inbound queue
#[derive(Debug, Clone)]
pub struct Delivery {
    pub from: PeerKey,
    pub to: PeerKey,
    pub method: Method,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct NetworkInner {
    endpoints: HashMap<PeerKey, mpsc::Sender<InboundCall>>,
    deliveries: Vec<Delivery>,
}

/// Shared switchboard; clones refer to the same network
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkInner> {
        // A panicked test thread must not wedge the others
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach a reachable endpoint
    pub fn join(&self, key: PeerKey) -> (MemoryOverlay, mpsc::Receiver<InboundCall>) {
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        self.lock().endpoints.insert(key, tx);
        (self.connect(key), rx)
    }

    /// Attach an endpoint that only sends (client role)
    pub fn connect(&self, key: PeerKey) -> MemoryOverlay {
        MemoryOverlay {
            local: key,
            network: self.clone(),
        }
    }

    /// Detach an endpoint; later calls to it fail with UnknownPeer
    pub fn leave(&self, key: &PeerKey) {
        self.lock().endpoints.remove(key);
    }

    /// Every delivery so far, in order
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.lock().deliveries.clone()
    }

    /// Number of deliveries of a method to one endpoint
    pub fn delivery_count(&self, to: &PeerKey, method: Method) -> usize {
        self.lock()
            .deliveries
            .iter()
            .filter(|d| &d.to == to && d.method == method)
            .count()
    }
}

/// One endpoint of a MemoryNetwork
#[derive(Clone)]
pub struct MemoryOverlay {
    local: PeerKey,
    network: MemoryNetwork,
}

#[async_trait]
impl Overlay for MemoryOverlay {
    fn local_key(&self) -> PeerKey {
        self.local
    }

    async fn request(
        &self,
        peer: &PeerKey,
        method: Method,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        let endpoint = self
            .network
            .lock()
            .endpoints
            .get(peer)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeer(peer.short()))?;

        let (call, response) = InboundCall::new(method, payload.clone());
        endpoint.send(call).await.map_err(|_| TransportError::Closed)?;

        self.network.lock().deliveries.push(Delivery {
            from: self.local,
            to: *peer,
            method,
            payload,
        });

        response.await.map_err(|_| TransportError::NoResponse)
    }
}
