// Protocol - Method catalogue and payload schemas
//
// Every remote call is a method name plus a JSON payload:
// - logging:          {"message": string}
// - openPicAuction:   {"itemId": u64, "price": f64}
// - bidding:          {"itemId": u64, "price": f64}
// - bid:              {"bidder": hex key, "itemId": u64, "price": f64}
// - closePicAuction:  {}
// Every reply is {"status": bool, "msg": string}.

use crate::auction::{validate_item_and_price, AuctionError};
use crate::identity::PeerKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Stream protocol negotiated on the overlay; bump on incompatible payload changes
pub const RPC_PROTOCOL: &str = "/auctionmesh/rpc/1.0.0";

/// Protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed request: {0}")]
    Malformed(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),
}

/// Remote methods a node answers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Method {
    Logging,
    OpenPicAuction,
    Bidding,
    Bid,
    ClosePicAuction,
}

impl Method {
    pub const ALL: [Method; 5] = [
        Method::Logging,
        Method::OpenPicAuction,
        Method::Bidding,
        Method::Bid,
        Method::ClosePicAuction,
    ];

    /// Wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Logging => "logging",
            Method::OpenPicAuction => "openPicAuction",
            Method::Bidding => "bidding",
            Method::Bid => "bid",
            Method::ClosePicAuction => "closePicAuction",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownMethod(s.to_string()))
    }
}

// ============================================================================
// PAYLOADS
// ============================================================================

/// Free-form line written to the receiving node's log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogMessage {
    pub message: String,
}

/// Item and price, used to open an auction or to ask a relay to bid
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuctionParams {
    pub item_id: u64,
    pub price: f64,
}

impl AuctionParams {
    /// Both values must be strictly positive
    pub fn validate(&self) -> Result<(), AuctionError> {
        validate_item_and_price(self.item_id, self.price)
    }
}

/// Bid relayed to every peer; `bidder` is the relay's key
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BidNotice {
    pub bidder: PeerKey,
    pub item_id: u64,
    pub price: f64,
}

// ============================================================================
// REQUEST
// ============================================================================

/// A decoded inbound call
#[derive(Clone, Debug, PartialEq)]
pub enum RpcRequest {
    Logging(LogMessage),
    OpenPicAuction(AuctionParams),
    Bidding(AuctionParams),
    Bid(BidNotice),
    ClosePicAuction,
}

impl RpcRequest {
    pub fn logging(message: impl Into<String>) -> Self {
        RpcRequest::Logging(LogMessage {
            message: message.into(),
        })
    }

    pub fn open_pic_auction(item_id: u64, price: f64) -> Self {
        RpcRequest::OpenPicAuction(AuctionParams { item_id, price })
    }

    pub fn bidding(item_id: u64, price: f64) -> Self {
        RpcRequest::Bidding(AuctionParams { item_id, price })
    }

    pub fn bid(bidder: PeerKey, item_id: u64, price: f64) -> Self {
        RpcRequest::Bid(BidNotice {
            bidder,
            item_id,
            price,
        })
    }

    /// Get the method this request is sent as
    pub fn method(&self) -> Method {
        match self {
            RpcRequest::Logging(_) => Method::Logging,
            RpcRequest::OpenPicAuction(_) => Method::OpenPicAuction,
            RpcRequest::Bidding(_) => Method::Bidding,
            RpcRequest::Bid(_) => Method::Bid,
            RpcRequest::ClosePicAuction => Method::ClosePicAuction,
        }
    }

    /// Serialize the payload (the method travels separately)
    pub fn to_payload(&self) -> Vec<u8> {
        let encoded = match self {
            RpcRequest::Logging(m) => serde_json::to_vec(m),
            RpcRequest::OpenPicAuction(p) | RpcRequest::Bidding(p) => serde_json::to_vec(p),
            RpcRequest::Bid(b) => serde_json::to_vec(b),
            RpcRequest::ClosePicAuction => Ok(b"{}".to_vec()),
        };
        // Plain structs of strings and numbers always serialize
        encoded.expect("Failed to encode request payload")
    }

    /// Decode and schema-check the payload of an inbound call
    pub fn decode(method: Method, payload: &[u8]) -> Result<Self, ProtocolError> {
        fn parse<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, ProtocolError> {
            serde_json::from_slice(payload).map_err(|e| ProtocolError::Malformed(e.to_string()))
        }

        match method {
            Method::Logging => parse(payload).map(RpcRequest::Logging),
            Method::OpenPicAuction => parse(payload).map(RpcRequest::OpenPicAuction),
            Method::Bidding => parse(payload).map(RpcRequest::Bidding),
            Method::Bid => parse(payload).map(RpcRequest::Bid),
            Method::ClosePicAuction => {
                // Older clients send {"id": 0}; any object (or nothing) is fine
                if !payload.is_empty() {
                    parse::<serde_json::Map<String, serde_json::Value>>(payload)?;
                }
                Ok(RpcRequest::ClosePicAuction)
            }
        }
    }
}

// ============================================================================
// RESPONSE
// ============================================================================

/// Reply to every call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub status: bool,
    pub msg: String,
}

impl RpcResponse {
    pub const SUCCESS: &'static str = "Success";

    pub fn success() -> Self {
        Self {
            status: true,
            msg: Self::SUCCESS.to_string(),
        }
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self {
            status: false,
            msg: msg.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Failed to encode response")
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedResponse(e.to_string()))
    }
}

impl From<AuctionError> for RpcResponse {
    fn from(err: AuctionError) -> Self {
        RpcResponse::rejected(err.to_string())
    }
}

impl From<&ProtocolError> for RpcResponse {
    fn from(err: &ProtocolError) -> Self {
        RpcResponse::rejected(err.to_string())
    }
}

impl fmt::Display for RpcResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{status: {}, msg: {}}}", self.status, self.msg)
    }
}
