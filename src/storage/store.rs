// AuctionStore - Persistent key-value storage using sled
//
// Holds what a node must remember across restarts:
// - Keypair seeds (one per hosted node, optionally labelled)
// - The shared peer registry

use crate::identity::{random_seed, NodeKeypair, SEED_LEN};
use std::path::Path;
use thiserror::Error;

/// Well-known keys
pub mod keys {
    pub const SEED: &[u8] = b"dht-seed";
    pub const SEED_PREFIX: &[u8] = b"dht-seed:";
    pub const PEERS: &[u8] = b"dht-peers";
}

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Corrupt value under {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// Persistent key-value store shared by every node hosted in a process.
///
/// Cloning is cheap and clones see the same database.
#[derive(Clone)]
pub struct AuctionStore {
    db: sled::Db,
}

impl AuctionStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.db.is_empty())
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    // ========================================================================
    // RAW KEY-VALUE OPERATIONS
    // ========================================================================

    /// Put raw bytes
    pub fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    /// Get raw bytes
    pub fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    /// Delete a key
    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.db.remove(key)?;
        Ok(())
    }

    // ========================================================================
    // SEED PERSISTENCE
    // ========================================================================

    fn seed_key(label: Option<&str>) -> Vec<u8> {
        match label {
            Some(label) => [keys::SEED_PREFIX, label.as_bytes()].concat(),
            None => keys::SEED.to_vec(),
        }
    }

    /// Load the seed stored under a label (or the default seed key)
    pub fn load_seed(&self, label: Option<&str>) -> Result<Option<[u8; SEED_LEN]>, StoreError> {
        let key = Self::seed_key(label);
        match self.get_raw(&key)? {
            Some(bytes) => {
                let seed: [u8; SEED_LEN] =
                    bytes.as_slice().try_into().map_err(|_| StoreError::Corrupt {
                        key: String::from_utf8_lossy(&key).into_owned(),
                        reason: format!("expected {} seed bytes, got {}", SEED_LEN, bytes.len()),
                    })?;
                Ok(Some(seed))
            }
            None => Ok(None),
        }
    }

    /// Get the seed, generating and persisting one on first use
    pub fn get_or_create_seed(&self, label: Option<&str>) -> Result<[u8; SEED_LEN], StoreError> {
        if let Some(seed) = self.load_seed(label)? {
            return Ok(seed);
        }

        let seed = random_seed();
        self.put_raw(&Self::seed_key(label), &seed)?;
        self.flush()?;
        Ok(seed)
    }

    /// Stable keypair for the node using this seed label
    pub fn node_keypair(&self, label: Option<&str>) -> Result<NodeKeypair, StoreError> {
        Ok(NodeKeypair::from_seed(self.get_or_create_seed(label)?))
    }
}
