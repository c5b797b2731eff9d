// Auction Node - The server role
//
// Owns one AuctionState and handles inbound calls strictly one at a time.
// Every accepted transition is announced to all registered peers through
// `logging`; bids are relayed to all registered peers through `bid`.
// Handlers never wait on the network. A `bidding` answer is deferred until
// every relayed `bid` has been answered, while the loop keeps serving, so a
// node listed in its own registry still handles its own relays.

use crate::auction::{AuctionError, AuctionEvent, AuctionState};
use crate::identity::PeerKey;
use crate::node::NodeConfig;
use crate::rpc::{
    serve, AuctionParams, LogMessage, Reply, RpcHandler, RpcRequest, RpcResponse,
};
use crate::storage::{AuctionStore, StoreError};
use crate::sync::{
    BroadcastConfig, BroadcastCoordinator, BroadcastHandle, PeerRegistry, RegistryError,
};
use crate::transport::{InboundCall, Overlay, SwarmOverlay, TransportError};
use std::future::Future;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Log target for lines received through `logging`
pub const PEER_LOG_TARGET: &str = "auctionmesh::peer_log";

/// Failures that stop a node
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// One auction node
pub struct AuctionNode<O: Overlay> {
    key: PeerKey,
    state: AuctionState,
    registry: PeerRegistry,
    broadcaster: BroadcastCoordinator<O>,
    snapshot: watch::Sender<AuctionState>,
}

impl<O: Overlay> AuctionNode<O> {
    /// Create a node with no auction open. It is not registered yet.
    pub fn new(overlay: O, registry: PeerRegistry, broadcast: BroadcastConfig) -> Self {
        let (snapshot, _) = watch::channel(AuctionState::new());
        Self {
            key: overlay.local_key(),
            state: AuctionState::new(),
            registry,
            broadcaster: BroadcastCoordinator::new(overlay, broadcast),
            snapshot,
        }
    }

    pub fn key(&self) -> PeerKey {
        self.key
    }

    pub fn state(&self) -> &AuctionState {
        &self.state
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Receiver that sees the state after every handled call
    pub fn subscribe(&self) -> watch::Receiver<AuctionState> {
        self.snapshot.subscribe()
    }

    /// Add this node to the registry and log who is known.
    ///
    /// Returns the registry as it stands after this node joined.
    pub fn register(&self) -> Result<Vec<PeerKey>, NodeError> {
        self.registry.register(self.key)?;
        let peers = self.registry.load()?;

        info!(key = %self.key, "Public key");
        let clients: Vec<String> = peers.iter().map(PeerKey::short).collect();
        info!(count = peers.len(), "Clients: {:?}", clients);
        Ok(peers)
    }

    /// Take this node out of the registry
    pub fn unregister(&self) -> Result<bool, NodeError> {
        let removed = self.registry.remove(&self.key)?;
        if removed {
            info!(key = %self.key.short(), "Removed from registry");
        }
        Ok(removed)
    }

    /// Serve inbound calls until the channel closes or `shutdown` resolves,
    /// then unregister.
    pub async fn run<F>(
        mut self,
        mut inbound: mpsc::Receiver<InboundCall>,
        shutdown: F,
    ) -> Result<(), NodeError>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            served = serve(&mut inbound, &mut self) => served,
            _ = shutdown => {
                info!(key = %self.key.short(), "Shutting down");
                Ok(())
            }
        };

        if let Err(e) = &result {
            error!(key = %self.key.short(), error = %e, "Node stopped");
        }

        match self.unregister() {
            Ok(_) => result,
            Err(e) if result.is_ok() => Err(e),
            Err(e) => {
                warn!(error = %e, "Could not unregister after failure");
                result
            }
        }
    }

    fn announce(&self, event: &AuctionEvent) -> Result<(), NodeError> {
        let line = event.announcement(&self.key);
        debug!(announcement = %line, "Announcing");

        let peers = self.registry.load()?;
        // Detached; the coordinator logs its own failures
        drop(self.broadcaster.broadcast(peers, &RpcRequest::logging(line)));
        Ok(())
    }

    fn relay_bid(&self, params: AuctionParams) -> Result<BroadcastHandle, NodeError> {
        let peers = self.registry.load()?;
        debug!(
            item_id = params.item_id,
            price = params.price,
            peers = peers.len(),
            "Relaying bid"
        );
        let request = RpcRequest::bid(self.key, params.item_id, params.price);
        Ok(self.broadcaster.broadcast(peers, &request))
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.state.clone());
    }
}

impl<O: Overlay> RpcHandler for AuctionNode<O> {
    type Error = NodeError;

    fn handle(&mut self, request: RpcRequest) -> Result<Reply, NodeError> {
        let method = request.method();
        let mut relay = None;

        let outcome: Result<Option<AuctionEvent>, AuctionError> = match request {
            RpcRequest::Logging(LogMessage { message }) => {
                info!(target: PEER_LOG_TARGET, "{}", message);
                Ok(None)
            }
            RpcRequest::OpenPicAuction(params) => {
                self.state.open(params.item_id, params.price).map(Some)
            }
            RpcRequest::Bidding(params) => match params.validate() {
                Ok(()) => {
                    relay = Some(self.relay_bid(params)?);
                    Ok(None)
                }
                Err(e) => Err(e),
            },
            RpcRequest::Bid(notice) => self
                .state
                .accept_bid(notice.item_id, notice.bidder, notice.price)
                .map(Some),
            RpcRequest::ClosePicAuction => self.state.close().map(Some),
        };

        let response = match outcome {
            Ok(Some(event)) => {
                self.announce(&event)?;
                RpcResponse::success()
            }
            Ok(None) => RpcResponse::success(),
            Err(e) => {
                // Most bid rejections are just relays reaching the wrong seller
                debug!(%method, kind = ?e.kind(), reason = %e, "Rejected");
                RpcResponse::from(e)
            }
        };

        self.publish();

        Ok(match relay {
            Some(relay) => Reply::deferred(async move {
                // Failed sends were already reported by the coordinator
                if let Err(e) = relay.wait().await {
                    warn!(error = %e, "Bid relay aborted");
                }
                response
            }),
            None => response.into(),
        })
    }
}

impl AuctionNode<SwarmOverlay> {
    /// Bring a node up on the libp2p overlay: load or create its seed, start
    /// listening and register it.
    pub fn start(
        store: &AuctionStore,
        config: &NodeConfig,
    ) -> Result<(Self, mpsc::Receiver<InboundCall>), NodeError> {
        config.validate()?;

        let keypair = store.node_keypair(config.seed_label.as_deref())?;
        let (overlay, inbound) = SwarmOverlay::start(&keypair, &config.overlay)?;

        let node = AuctionNode::new(
            overlay,
            PeerRegistry::new(store.clone()),
            config.broadcast.clone(),
        );
        node.register()?;

        Ok((node, inbound))
    }
}
