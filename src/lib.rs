// auctionmesh - Peer-to-peer single-item auctions
//
// Every node sells at most one item at a time. Bids are handed to any node,
// which relays them to every peer it knows; the seller whose item matches
// accepts or rejects them. Transitions are announced to all peers.

pub mod auction;
pub mod identity;
pub mod node;
pub mod rpc;
pub mod storage;
pub mod sync;
pub mod transport;

pub use auction::{AuctionError, AuctionEvent, AuctionState, Bid};
pub use identity::{NodeKeypair, PeerKey};
pub use node::{AuctionClient, AuctionNode, NodeConfig, NodeError};
pub use rpc::{Method, RpcGateway, RpcRequest, RpcResponse};
pub use storage::AuctionStore;
pub use sync::{BroadcastConfig, BroadcastCoordinator, PeerRegistry};
pub use transport::{MemoryNetwork, Overlay, SwarmOverlay};
