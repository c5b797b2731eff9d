// RpcGateway - Both ends of a remote call
//
// Client side: encode an RpcRequest, send it over the overlay, decode the reply.
// Server side: decode an InboundCall, hand it to an RpcHandler, answer it,
// either at once or when the handler's pending work finishes.

use crate::identity::PeerKey;
use crate::rpc::{ProtocolError, RpcRequest, RpcResponse};
use crate::transport::{InboundCall, Overlay, TransportError};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Client-side call failures
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Issues typed requests over an overlay
#[derive(Clone)]
pub struct RpcGateway<O: Overlay> {
    overlay: O,
}

impl<O: Overlay> RpcGateway<O> {
    pub fn new(overlay: O) -> Self {
        Self { overlay }
    }

    pub fn overlay(&self) -> &O {
        &self.overlay
    }

    pub fn local_key(&self) -> PeerKey {
        self.overlay.local_key()
    }

    /// Send one request and wait for its response. No retry.
    pub async fn request(
        &self,
        target: &PeerKey,
        request: &RpcRequest,
    ) -> Result<RpcResponse, GatewayError> {
        let method = request.method();
        debug!(peer = %target.short(), %method, "Sending request");

        let reply = self
            .overlay
            .request(target, method, request.to_payload())
            .await?;

        Ok(RpcResponse::from_bytes(&reply)?)
    }
}

// ============================================================================
// SERVER SIDE
// ============================================================================

/// How a handler answers one call
pub enum Reply {
    /// Answer now
    Ready(RpcResponse),
    /// Answer when the future resolves; the serving loop does not wait for it
    Deferred(Pin<Box<dyn Future<Output = RpcResponse> + Send>>),
}

impl Reply {
    pub fn deferred<F>(response: F) -> Self
    where
        F: Future<Output = RpcResponse> + Send + 'static,
    {
        Reply::Deferred(Box::pin(response))
    }
}

impl From<RpcResponse> for Reply {
    fn from(response: RpcResponse) -> Self {
        Reply::Ready(response)
    }
}

/// Something that answers decoded requests.
///
/// An `Err` is fatal to the serving loop: the call in flight gets no reply.
pub trait RpcHandler {
    type Error;

    fn handle(&mut self, request: RpcRequest) -> Result<Reply, Self::Error>;
}

/// Decode one inbound call, run it through the handler and answer it.
///
/// A deferred reply is answered from its own task, so this must run inside a
/// tokio runtime when the handler defers.
pub fn dispatch<H: RpcHandler>(handler: &mut H, call: InboundCall) -> Result<(), H::Error> {
    let reply = match RpcRequest::decode(call.method, &call.payload) {
        Ok(request) => handler.handle(request)?,
        Err(e) => {
            warn!(method = %call.method, error = %e, "Rejecting malformed request");
            Reply::Ready(RpcResponse::from(&e))
        }
    };

    match reply {
        Reply::Ready(response) => answer(call, response),
        Reply::Deferred(pending) => {
            tokio::spawn(async move {
                let response = pending.await;
                answer(call, response);
            });
        }
    }
    Ok(())
}

fn answer(call: InboundCall, response: RpcResponse) {
    if !call.respond(response.to_bytes()) {
        debug!("Caller went away before the response was sent");
    }
}

/// Answer inbound calls one at a time until the channel closes
pub async fn serve<H: RpcHandler>(
    inbound: &mut mpsc::Receiver<InboundCall>,
    handler: &mut H,
) -> Result<(), H::Error> {
    while let Some(call) = inbound.recv().await {
        dispatch(handler, call)?;
    }
    Ok(())
}
