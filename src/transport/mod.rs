// Transport module - THE WIRE (abstract)
// Overlay network the auction protocol runs on: libp2p for real nodes, in-memory for tests

mod memory;
mod swarm;
mod traits;

pub use traits::{InboundCall, Overlay, OverlayConfig, TransportError};

pub use swarm::SwarmOverlay;

pub use memory::{Delivery, MemoryNetwork, MemoryOverlay};
