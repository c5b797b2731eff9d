// Auction State - The per-node auction lifecycle
//
// Closed -> Open -> (bids, each strictly higher) -> Closed
//
// A node sells at most one item at a time. Every accepted transition yields an
// AuctionEvent; announcing it to peers is the caller's job.

use crate::identity::PeerKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejections produced by the auction state machine.
///
/// The display strings are the `msg` returned to remote callers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuctionError {
    #[error("Invalid Picture ID or Price.")]
    InvalidItemOrPrice,

    #[error("Opened auction exists on this client, please close it first!")]
    AuctionAlreadyOpen,

    #[error("Should be bigger than last bid Price")]
    BidTooLow,

    #[error("No opened auction")]
    NoActiveAuction,
}

/// Broad category of an auction rejection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range item id / price
    Validation,
    /// The transition violates the state machine
    StateConflict,
}

impl AuctionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuctionError::InvalidItemOrPrice => ErrorKind::Validation,
            AuctionError::AuctionAlreadyOpen
            | AuctionError::BidTooLow
            | AuctionError::NoActiveAuction => ErrorKind::StateConflict,
        }
    }
}

/// Range check shared by auction-open and bid-relay requests
pub fn validate_item_and_price(item_id: u64, price: f64) -> Result<(), AuctionError> {
    if item_id > 0 && price.is_finite() && price > 0.0 {
        Ok(())
    } else {
        Err(AuctionError::InvalidItemOrPrice)
    }
}

/// A bid as recorded by the seller
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub bidder: PeerKey,
    pub price: f64,
}

/// The auction a node currently runs
#[derive(Clone, Debug, PartialEq)]
pub struct OpenAuction {
    item_id: u64,
    ask_price: f64,
    highest_bid: Option<Bid>,
}

impl OpenAuction {
    pub fn item_id(&self) -> u64 {
        self.item_id
    }

    pub fn ask_price(&self) -> f64 {
        self.ask_price
    }

    pub fn highest_bid(&self) -> Option<&Bid> {
        self.highest_bid.as_ref()
    }
}

/// Accepted transitions, ready to be announced
#[derive(Clone, Debug, PartialEq)]
pub enum AuctionEvent {
    Opened { item_id: u64, ask_price: f64 },
    BidAccepted { item_id: u64, bid: Bid },
    Closed { item_id: u64, winner: Bid },
}

impl AuctionEvent {
    /// Human-readable line broadcast to peers through `logging`
    pub fn announcement(&self, owner: &PeerKey) -> String {
        match self {
            AuctionEvent::Opened { item_id, ask_price } => format!(
                "Client[{}] opens auction: sell Pic#{} for {} USDt",
                owner.short(),
                item_id,
                ask_price
            ),
            AuctionEvent::BidAccepted { item_id, bid } => format!(
                "Client[{}] makes bid for Client[{}]: Pic#{} with {} USDt",
                bid.bidder.short(),
                owner.short(),
                item_id,
                bid.price
            ),
            AuctionEvent::Closed { item_id, winner } => format!(
                "Client[{}] close auction: sell Pic#{} for {} USDt to Client[{}]",
                owner.short(),
                item_id,
                winner.price,
                winner.bidder.short()
            ),
        }
    }
}

/// Auction state owned by a single node
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuctionState {
    open: Option<OpenAuction>,
}

impl AuctionState {
    /// A node with no auction running
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if an auction is open
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// The running auction, if any
    pub fn current(&self) -> Option<&OpenAuction> {
        self.open.as_ref()
    }

    /// Item on sale, if any
    pub fn item_id(&self) -> Option<u64> {
        self.open.as_ref().map(|a| a.item_id)
    }

    /// Ask price of the running auction
    pub fn ask_price(&self) -> Option<f64> {
        self.open.as_ref().map(|a| a.ask_price)
    }

    /// Best bid accepted so far
    pub fn highest_bid(&self) -> Option<&Bid> {
        self.open.as_ref().and_then(|a| a.highest_bid.as_ref())
    }

    /// Put an item up for sale
    pub fn open(&mut self, item_id: u64, ask_price: f64) -> Result<AuctionEvent, AuctionError> {
        if self.open.is_some() {
            return Err(AuctionError::AuctionAlreadyOpen);
        }
        validate_item_and_price(item_id, ask_price)?;

        self.open = Some(OpenAuction {
            item_id,
            ask_price,
            highest_bid: None,
        });

        Ok(AuctionEvent::Opened { item_id, ask_price })
    }

    /// Consider a bid against the running auction.
    ///
    /// The first bid may equal the ask; later bids must beat the highest one.
    pub fn accept_bid(
        &mut self,
        item_id: u64,
        bidder: PeerKey,
        price: f64,
    ) -> Result<AuctionEvent, AuctionError> {
        let auction = self
            .open
            .as_mut()
            .ok_or(AuctionError::InvalidItemOrPrice)?;

        // Written so that NaN never passes
        if auction.item_id != item_id || !(price >= auction.ask_price) {
            return Err(AuctionError::InvalidItemOrPrice);
        }

        if let Some(current) = &auction.highest_bid {
            if price <= current.price {
                return Err(AuctionError::BidTooLow);
            }
        }

        let bid = Bid { bidder, price };
        auction.highest_bid = Some(bid);

        Ok(AuctionEvent::BidAccepted { item_id, bid })
    }

    /// Sell to the highest bidder and reset.
    ///
    /// An auction without bids stays open.
    pub fn close(&mut self) -> Result<AuctionEvent, AuctionError> {
        let (item_id, winner) = match &self.open {
            Some(OpenAuction {
                item_id,
                highest_bid: Some(winner),
                ..
            }) => (*item_id, *winner),
            _ => return Err(AuctionError::NoActiveAuction),
        };

        self.open = None;

        Ok(AuctionEvent::Closed { item_id, winner })
    }
}
