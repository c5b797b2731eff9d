// Node module - WHO RUNS IT
// Server and client roles assembled from store, registry, overlay and gateway

mod client;
mod config;
mod server;

pub use client::{AuctionClient, ClientError, WALKTHROUGH_PEERS};
pub use config::{NodeConfig, BOOTSTRAP_ADDRESS, CLIENT_PORT, SERVER_PORT, STORE_PATH};
pub use server::{AuctionNode, NodeError, PEER_LOG_TARGET};
