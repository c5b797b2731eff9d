// Rpc module - WHAT NODES SAY
// Method catalogue, payload schemas and the request/response gateway

mod gateway;
mod protocol;

pub use gateway::{dispatch, serve, GatewayError, Reply, RpcGateway, RpcHandler};
pub use protocol::{
    AuctionParams, BidNotice, LogMessage, Method, ProtocolError, RpcRequest, RpcResponse,
    RPC_PROTOCOL,
};
