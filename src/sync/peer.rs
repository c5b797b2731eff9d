// Peer Registry - Durable list of reachable nodes
//
// One value under `dht-peers` in the shared store, rewritten whole on every
// change. Concurrent writers race: the last write wins.

use crate::identity::PeerKey;
use crate::storage::{keys, AuctionStore, StoreError};
use thiserror::Error;

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Corrupt peer registry: {0}")]
    Corrupt(String),
}

/// Registry of peer keys kept in the store.
///
/// Entries are not deduplicated; registering twice yields two entries.
#[derive(Clone)]
pub struct PeerRegistry {
    store: AuctionStore,
}

impl PeerRegistry {
    pub fn new(store: AuctionStore) -> Self {
        Self { store }
    }

    /// Every registered key, in registration order
    pub fn load(&self) -> Result<Vec<PeerKey>, RegistryError> {
        match self.store.get_raw(keys::PEERS)? {
            Some(bytes) => {
                postcard::from_bytes(&bytes).map_err(|e| RegistryError::Corrupt(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Append a key
    pub fn register(&self, peer: PeerKey) -> Result<(), RegistryError> {
        let mut peers = self.load()?;
        peers.push(peer);
        self.save(&peers)
    }

    /// Remove the first entry equal to `peer`; true if one was removed
    pub fn remove(&self, peer: &PeerKey) -> Result<bool, RegistryError> {
        let mut peers = self.load()?;
        let removed = match peers.iter().position(|p| p == peer) {
            Some(index) => {
                peers.remove(index);
                true
            }
            None => false,
        };
        self.save(&peers)?;
        Ok(removed)
    }

    fn save(&self, peers: &[PeerKey]) -> Result<(), RegistryError> {
        let bytes = postcard::to_allocvec(peers).map_err(|e| RegistryError::Corrupt(e.to_string()))?;
        self.store.put_raw(keys::PEERS, &bytes)?;
        self.store.flush()?;
        Ok(())
    }
}
