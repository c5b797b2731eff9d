// Auction module - WHAT A NODE SELLS
// Per-node auction state machine and the events it announces

mod state;

pub use state::{
    validate_item_and_price, AuctionError, AuctionEvent, AuctionState, Bid, ErrorKind,
    OpenAuction,
};
