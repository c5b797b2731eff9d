use ed25519_dalek::SigningKey;
use libp2p::PeerId;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of the seed a node keypair is derived from
pub const SEED_LEN: usize = 32;

/// Length of a public key
pub const KEY_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum KeypairError {
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    #[error("Invalid key bytes: {0}")]
    InvalidBytes(String),
}

/// Public identifier of a node: its raw ed25519 public key.
///
/// The same bytes address the node on the overlay and attribute bids to it.
/// Nothing here proves that whoever presents a key owns it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerKey([u8; KEY_LEN]);

impl PeerKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeypairError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| KeypairError::InvalidLength {
            expected: KEY_LEN,
            got: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Parse a 64-character hex string
    pub fn from_hex(s: &str) -> Result<Self, KeypairError> {
        let bytes = hex::decode(s.trim()).map_err(|e| KeypairError::InvalidHex(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Lowercase hex encoding of the whole key
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Display-only truncation: first 2 and last 5 hex characters
    pub fn short(&self) -> String {
        let full = self.to_hex();
        format!("{}...{}", &full[..2], &full[full.len() - 5..])
    }

    /// Overlay address of this key.
    ///
    /// Fails if the bytes are not a valid ed25519 point, which can happen for
    /// keys that arrived in a payload rather than from a keypair.
    pub fn to_peer_id(&self) -> Result<PeerId, KeypairError> {
        let public = libp2p::identity::ed25519::PublicKey::try_from_bytes(&self.0)
            .map_err(|e| KeypairError::InvalidBytes(e.to_string()))?;
        Ok(libp2p::identity::PublicKey::from(public).to_peer_id())
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerKey({})", self.short())
    }
}

impl FromStr for PeerKey {
    type Err = KeypairError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for PeerKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Hex on the wire so JSON payloads stay readable
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PeerKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PeerKeyVisitor;

        impl<'de> serde::de::Visitor<'de> for PeerKeyVisitor {
            type Value = PeerKey;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a 64-character hex public key")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                PeerKey::from_hex(v).map_err(|e| E::custom(e.to_string()))
            }
        }

        deserializer.deserialize_str(PeerKeyVisitor)
    }
}

/// Fresh random seed material
pub fn random_seed() -> [u8; SEED_LEN] {
    let mut seed = [0u8; SEED_LEN];
    OsRng.fill_bytes(&mut seed);
    seed
}

/// Ed25519 keypair deterministically derived from a 32-byte seed
#[derive(Clone)]
pub struct NodeKeypair {
    seed: [u8; SEED_LEN],
    signing_key: SigningKey,
}

impl NodeKeypair {
    /// Derive the keypair for a seed
    pub fn from_seed(seed: [u8; SEED_LEN]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        Self { seed, signing_key }
    }

    /// Create from seed bytes of unchecked length
    pub fn from_seed_bytes(bytes: &[u8]) -> Result<Self, KeypairError> {
        let seed: [u8; SEED_LEN] = bytes.try_into().map_err(|_| KeypairError::InvalidLength {
            expected: SEED_LEN,
            got: bytes.len(),
        })?;
        Ok(Self::from_seed(seed))
    }

    /// Keypair from a throwaway random seed (client role)
    pub fn ephemeral() -> Self {
        Self::from_seed(random_seed())
    }

    /// Public identifier of this keypair
    pub fn peer_key(&self) -> PeerKey {
        PeerKey(self.signing_key.verifying_key().to_bytes())
    }

    /// The same key material as a libp2p identity
    pub fn to_libp2p(&self) -> Result<libp2p::identity::Keypair, KeypairError> {
        // ed25519_from_bytes zeroizes its argument, hand it a copy
        let seed = self.seed;
        libp2p::identity::Keypair::ed25519_from_bytes(seed)
            .map_err(|e| KeypairError::InvalidBytes(e.to_string()))
    }
}

impl fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKeypair")
            .field("peer_key", &self.peer_key())
            .finish_non_exhaustive()
    }
}
