// Gateway Tests
// Tests for client requests and server-side dispatch over the in-memory overlay

use auctionmesh::identity::{NodeKeypair, PeerKey};
use auctionmesh::rpc::{
    dispatch, serve, GatewayError, Method, Reply, RpcGateway, RpcHandler, RpcRequest,
    RpcResponse,
};
use auctionmesh::transport::{InboundCall, MemoryNetwork, TransportError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Records what it was asked and answers with the method name
#[derive(Default)]
struct Recorder {
    seen: Vec<RpcRequest>,
    fail_on_close: bool,
}

impl RpcHandler for Recorder {
    type Error = String;

    fn handle(&mut self, request: RpcRequest) -> Result<Reply, String> {
        if self.fail_on_close && request == RpcRequest::ClosePicAuction {
            return Err("store unavailable".to_string());
        }
        let msg = request.method().to_string();
        self.seen.push(request);
        Ok(RpcResponse { status: true, msg }.into())
    }
}

/// Holds every `bidding` answer until its gate opens
struct Gated {
    gates: Vec<oneshot::Receiver<()>>,
}

impl RpcHandler for Gated {
    type Error = String;

    fn handle(&mut self, request: RpcRequest) -> Result<Reply, String> {
        let response = RpcResponse::rejected(request.method().as_str());
        match request {
            RpcRequest::Bidding(_) => {
                let gate = self.gates.pop().ok_or("no gate left")?;
                Ok(Reply::deferred(async move {
                    let _ = gate.await;
                    response
                }))
            }
            _ => Ok(response.into()),
        }
    }
}

fn peer() -> PeerKey {
    NodeKeypair::ephemeral().peer_key()
}

// ============================================================================
// DISPATCH
// ============================================================================

#[test]
fn test_dispatch_decodes_and_answers() {
    let mut handler = Recorder::default();
    let (call, mut reply) = InboundCall::new(Method::Bidding, br#"{"itemId":1,"price":75}"#.to_vec());

    dispatch(&mut handler, call).unwrap();

    assert_eq!(handler.seen, vec![RpcRequest::bidding(1, 75.0)]);
    let response = RpcResponse::from_bytes(&reply.try_recv().unwrap()).unwrap();
    assert_eq!(response.msg, "bidding");
}

#[test]
fn test_dispatch_rejects_malformed_without_handler() {
    let mut handler = Recorder::default();
    let (call, mut reply) = InboundCall::new(Method::OpenPicAuction, b"{}".to_vec());

    dispatch(&mut handler, call).unwrap();

    assert!(handler.seen.is_empty());
    let response = RpcResponse::from_bytes(&reply.try_recv().unwrap()).unwrap();
    assert!(!response.status);
    assert!(response.msg.starts_with("Malformed request"));
}

#[test]
fn test_handler_error_sends_no_reply() {
    let mut handler = Recorder {
        fail_on_close: true,
        ..Default::default()
    };
    let (call, mut reply) = InboundCall::new(Method::ClosePicAuction, b"{}".to_vec());

    let result = dispatch(&mut handler, call);

    assert_eq!(result, Err("store unavailable".to_string()));
    assert!(reply.try_recv().is_err());
}

// ============================================================================
// REQUEST / SERVE
// ============================================================================

#[tokio::test]
async fn test_request_roundtrip() {
    let network = MemoryNetwork::new();
    let server_key = peer();
    let (_, mut inbound) = network.join(server_key);

    let server = tokio::spawn(async move {
        let mut handler = Recorder::default();
        serve(&mut inbound, &mut handler).await.unwrap();
        handler.seen
    });

    let gateway = RpcGateway::new(network.connect(peer()));
    let response = gateway
        .request(&server_key, &RpcRequest::open_pic_auction(1, 75.0))
        .await
        .unwrap();
    assert_eq!(response.msg, "openPicAuction");

    let response = gateway
        .request(&server_key, &RpcRequest::ClosePicAuction)
        .await
        .unwrap();
    assert_eq!(response.msg, "closePicAuction");

    // Closing the endpoint ends the serve loop
    network.leave(&server_key);
    let seen = server.await.unwrap();
    assert_eq!(
        seen,
        vec![
            RpcRequest::open_pic_auction(1, 75.0),
            RpcRequest::ClosePicAuction
        ]
    );
}

#[tokio::test]
async fn test_request_unknown_peer() {
    let network = MemoryNetwork::new();
    let gateway = RpcGateway::new(network.connect(peer()));

    let result = gateway
        .request(&peer(), &RpcRequest::logging("anyone?"))
        .await;

    assert!(matches!(
        result,
        Err(GatewayError::Transport(TransportError::UnknownPeer(_)))
    ));
}

#[tokio::test]
async fn test_request_garbled_reply() {
    let network = MemoryNetwork::new();
    let server_key = peer();
    let (_, mut inbound) = network.join(server_key);

    tokio::spawn(async move {
        while let Some(call) = inbound.recv().await {
            call.respond(b"garbage".to_vec());
        }
    });

    let gateway = RpcGateway::new(network.connect(peer()));
    let result = gateway.request(&server_key, &RpcRequest::ClosePicAuction).await;

    assert!(matches!(result, Err(GatewayError::Protocol(_))));
}

#[tokio::test]
async fn test_deferred_reply_does_not_block_serve() {
    let network = MemoryNetwork::new();
    let server_key = peer();
    let (_, mut inbound) = network.join(server_key);
    let (open_gate, gate) = oneshot::channel();

    tokio::spawn(async move {
        let mut handler = Gated { gates: vec![gate] };
        serve(&mut inbound, &mut handler).await
    });

    let gateway = RpcGateway::new(network.connect(peer()));
    let held = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.request(&server_key, &RpcRequest::bidding(1, 2.0)).await })
    };

    // The close is answered while the bid is still held
    let response = gateway
        .request(&server_key, &RpcRequest::ClosePicAuction)
        .await
        .unwrap();
    assert_eq!(response.msg, "closePicAuction");
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!held.is_finished());

    open_gate.send(()).unwrap();
    let response = held.await.unwrap().unwrap();
    assert_eq!(response.msg, "bidding");
}

#[tokio::test]
async fn test_handler_error_stops_serve() {
    let network = MemoryNetwork::new();
    let server_key = peer();
    let (_, mut inbound) = network.join(server_key);

    let server = tokio::spawn(async move {
        let mut handler = Recorder {
            fail_on_close: true,
            ..Default::default()
        };
        serve(&mut inbound, &mut handler).await
    });

    let gateway = RpcGateway::new(network.connect(peer()));
    let result = gateway.request(&server_key, &RpcRequest::ClosePicAuction).await;

    assert!(matches!(
        result,
        Err(GatewayError::Transport(TransportError::NoResponse))
    ));
    assert_eq!(server.await.unwrap(), Err("store unavailable".to_string()));
}
