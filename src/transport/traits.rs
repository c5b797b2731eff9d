// Overlay Traits and Core Types
// Defines the abstract Overlay trait and the inbound call type shared by all implementations

use crate::identity::PeerKey;
use crate::rpc::Method;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// OVERLAY CONFIG
// ============================================================================

/// Configuration for joining the overlay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Interface to listen on
    pub listen_address: String,
    /// Port to listen on (0 for random)
    pub listen_port: u16,
    /// Multiaddr dialed once at startup to join the overlay
    pub bootstrap: Option<String>,
    /// How long a request waits for the target's address to be discovered
    pub resolve_timeout_ms: u64,
    /// Idle connections are closed after this many seconds
    pub idle_timeout_secs: u64,
    /// Capacity of the inbound call queue
    pub inbound_queue: usize,
    /// Discover peers on the local network through mdns
    pub mdns: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: 0,
            bootstrap: None,
            resolve_timeout_ms: 3_000,
            idle_timeout_secs: 60,
            inbound_queue: 256,
            mdns: true,
        }
    }
}

impl OverlayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listen_address(mut self, addr: &str) -> Self {
        self.listen_address = addr.to_string();
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: Option<String>) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_resolve_timeout_ms(mut self, ms: u64) -> Self {
        self.resolve_timeout_ms = ms;
        self
    }

    pub fn with_inbound_queue(mut self, capacity: usize) -> Self {
        self.inbound_queue = capacity;
        self
    }

    pub fn with_mdns(mut self, enabled: bool) -> Self {
        self.mdns = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.inbound_queue == 0 {
            return Err(TransportError::InvalidConfig(
                "inbound_queue cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Overlay-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Overlay setup failed: {0}")]
    Setup(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Peer dropped the request without responding")]
    NoResponse,

    #[error("Overlay is shut down")]
    Closed,
}

// ============================================================================
// INBOUND CALL
// ============================================================================

/// A call delivered to this node, answered exactly once through `respond`
#[derive(Debug)]
pub struct InboundCall {
    pub method: Method,
    pub payload: Vec<u8>,
    reply: oneshot::Sender<Vec<u8>>,
}

impl InboundCall {
    /// Create a call and the receiver its response arrives on
    pub fn new(method: Method, payload: Vec<u8>) -> (Self, oneshot::Receiver<Vec<u8>>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                method,
                payload,
                reply,
            },
            rx,
        )
    }

    /// Send the response; false if the caller has gone away
    pub fn respond(self, payload: Vec<u8>) -> bool {
        self.reply.send(payload).is_ok()
    }
}

// ============================================================================
// OVERLAY TRAIT
// ============================================================================

/// Request/response transport addressed by peer key.
///
/// Implementations deliver inbound calls on the receiver they hand out when
/// started. A request to the local key must be delivered to that receiver too.
#[async_trait]
pub trait Overlay: Clone + Send + Sync + 'static {
    /// Key this endpoint is reachable under
    fn local_key(&self) -> PeerKey;

    /// Send one call and wait for its single response
    async fn request(
        &self,
        peer: &PeerKey,
        method: Method,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError>;
}
