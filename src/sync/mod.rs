// Sync module - WHO NODES TALK TO
// Durable peer registry and best-effort fan-out to every registered peer

mod broadcast;
mod peer;

pub use broadcast::{
    BroadcastConfig, BroadcastCoordinator, BroadcastError, BroadcastHandle, BroadcastReport,
};
pub use peer::{PeerRegistry, RegistryError};
