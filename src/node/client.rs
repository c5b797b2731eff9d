// Auction Client - The client role
//
// Drives remote nodes through the RPC and prints what it asked for and what
// came back. Holds no auction state of its own.

use crate::identity::{NodeKeypair, PeerKey};
use crate::node::NodeConfig;
use crate::rpc::{GatewayError, RpcGateway, RpcRequest, RpcResponse};
use crate::transport::{Overlay, SwarmOverlay, TransportError};
use thiserror::Error;
use tracing::info;

/// Peers the reference walkthrough needs
pub const WALKTHROUGH_PEERS: usize = 3;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Please run at least {required} nodes, found {found}")]
    NotEnoughPeers { required: usize, found: usize },
}

pub struct AuctionClient<O: Overlay> {
    gateway: RpcGateway<O>,
}

impl<O: Overlay> AuctionClient<O> {
    pub fn new(overlay: O) -> Self {
        Self {
            gateway: RpcGateway::new(overlay),
        }
    }

    pub fn gateway(&self) -> &RpcGateway<O> {
        &self.gateway
    }

    /// Ask `seller` to put an item up for sale
    pub async fn open_pic_auction(
        &self,
        seller: &PeerKey,
        item_id: u64,
        price: f64,
    ) -> Result<RpcResponse, ClientError> {
        info!(
            "Client[{}] opens auction: sell Pic#{} for {} USDt",
            seller.short(),
            item_id,
            price
        );
        let response = self
            .gateway
            .request(seller, &RpcRequest::open_pic_auction(item_id, price))
            .await?;
        info!("{}", response);
        Ok(response)
    }

    /// Ask `relay` to bid on an item in its own name. Returns once every
    /// registered peer has answered the relayed bid.
    pub async fn bidding(
        &self,
        relay: &PeerKey,
        item_id: u64,
        price: f64,
    ) -> Result<RpcResponse, ClientError> {
        let response = self
            .gateway
            .request(relay, &RpcRequest::bidding(item_id, price))
            .await?;
        info!(
            "Client[{}] makes bid : -> Pic#{} with {} USDt",
            relay.short(),
            item_id,
            price
        );
        info!("{}", response);
        Ok(response)
    }

    /// Ask `seller` to sell to its highest bidder
    pub async fn close_pic_auction(&self, seller: &PeerKey) -> Result<RpcResponse, ClientError> {
        info!("Client[{}] close auction", seller.short());
        let response = self
            .gateway
            .request(seller, &RpcRequest::ClosePicAuction)
            .await?;
        info!("{}", response);
        Ok(response)
    }

    /// Two auctions, four relayed bids, one sale, across the first three peers
    pub async fn walkthrough(&self, peers: &[PeerKey]) -> Result<Vec<RpcResponse>, ClientError> {
        let [p1, p2, p3] = match peers {
            [p1, p2, p3, ..] => [*p1, *p2, *p3],
            _ => {
                return Err(ClientError::NotEnoughPeers {
                    required: WALKTHROUGH_PEERS,
                    found: peers.len(),
                })
            }
        };

        info!(">>> Test case");
        let mut responses = Vec::with_capacity(7);

        responses.push(self.open_pic_auction(&p1, 1, 75.0).await?);
        responses.push(self.open_pic_auction(&p2, 2, 60.0).await?);

        for (relay, item_id, price) in [(p2, 1, 75.0), (p3, 1, 75.5), (p3, 2, 75.5), (p2, 1, 80.0)] {
            responses.push(self.bidding(&relay, item_id, price).await?);
        }

        responses.push(self.close_pic_auction(&p1).await?);
        info!(">>> Test completed!");

        Ok(responses)
    }
}

impl AuctionClient<SwarmOverlay> {
    /// Join the overlay under a throwaway identity
    pub fn connect(config: &NodeConfig) -> Result<Self, ClientError> {
        let keypair = NodeKeypair::ephemeral();
        // Client endpoints serve nothing; inbound calls are dropped with the receiver
        let (overlay, _inbound) = SwarmOverlay::start(&keypair, &config.overlay)?;
        Ok(Self::new(overlay))
    }
}
