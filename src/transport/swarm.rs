// Swarm Overlay - libp2p implementation of the overlay network
//
// TCP + noise + yamux, with:
// - request_response (JSON codec) carrying the RPC
// - identify and (optionally) mdns feeding peer addresses
//
// One driver task owns the Swarm. Handles talk to it over channels; inbound
// requests are surfaced as InboundCalls and answered through their oneshot.

use crate::identity::{NodeKeypair, PeerKey};
use crate::rpc::{Method, RPC_PROTOCOL};
use crate::transport::{InboundCall, Overlay, OverlayConfig, TransportError};
use async_trait::async_trait;
use libp2p::futures::StreamExt;
use libp2p::request_response::{self, OutboundRequestId, ProtocolSupport, ResponseChannel};
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{identify, mdns, noise, tcp, yamux, Multiaddr, PeerId, StreamProtocol, Swarm};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const IDENTIFY_PROTOCOL: &str = "/auctionmesh/id/1.0.0";
const COMMAND_QUEUE: usize = 256;
const PARKED_SWEEP: Duration = Duration::from_millis(200);

/// Request frame on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireRequest {
    method: Method,
    payload: Vec<u8>,
}

/// Response frame on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireResponse {
    payload: Vec<u8>,
}

#[derive(NetworkBehaviour)]
struct OverlayBehaviour {
    rpc: request_response::json::Behaviour<WireRequest, WireResponse>,
    identify: identify::Behaviour,
    mdns: Toggle<mdns::tokio::Behaviour>,
}

type ReplySender = oneshot::Sender<Result<Vec<u8>, TransportError>>;

enum Command {
    Request {
        peer: PeerId,
        request: WireRequest,
        reply: ReplySender,
    },
}

/// Request waiting for its target's address to show up
struct ParkedRequest {
    request: WireRequest,
    reply: ReplySender,
    deadline: Instant,
}

// ============================================================================
// HANDLE
// ============================================================================

/// Handle to a running libp2p overlay endpoint
#[derive(Clone)]
pub struct SwarmOverlay {
    local: PeerKey,
    commands: mpsc::Sender<Command>,
    inbound: mpsc::Sender<InboundCall>,
    listening: watch::Receiver<Vec<Multiaddr>>,
}

impl SwarmOverlay {
    /// Start listening and spawn the driver task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        keypair: &NodeKeypair,
        config: &OverlayConfig,
    ) -> Result<(Self, mpsc::Receiver<InboundCall>), TransportError> {
        config.validate()?;

        let identity = keypair
            .to_libp2p()
            .map_err(|e| TransportError::Setup(e.to_string()))?;
        let mut swarm = build_swarm(identity, config)?;

        let listen = format!("/ip4/{}/tcp/{}", config.listen_address, config.listen_port)
            .parse::<Multiaddr>()
            .map_err(|e| TransportError::InvalidAddress(e.to_string()))?;
        swarm
            .listen_on(listen)
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        if let Some(bootstrap) = &config.bootstrap {
            let address = bootstrap
                .parse::<Multiaddr>()
                .map_err(|e| TransportError::InvalidAddress(e.to_string()))?;
            // Unreachable bootstrap is not fatal; mdns may still find peers
            if let Err(e) = swarm.dial(address.clone()) {
                warn!(%address, error = %e, "Bootstrap dial failed");
            }
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue);
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let (listening_tx, listening_rx) = watch::channel(Vec::new());

        let driver = SwarmDriver {
            swarm,
            commands: command_rx,
            inbound: inbound_tx.clone(),
            responses_tx,
            responses_rx,
            pending_outbound: HashMap::new(),
            pending_inbound: HashMap::new(),
            next_inbound_id: 0,
            known: HashSet::new(),
            parked: HashMap::new(),
            resolve_timeout: Duration::from_millis(config.resolve_timeout_ms),
            listening: listening_tx,
        };
        tokio::spawn(driver.run());

        let overlay = Self {
            local: keypair.peer_key(),
            commands: command_tx,
            inbound: inbound_tx,
            listening: listening_rx,
        };
        Ok((overlay, inbound_rx))
    }

    /// Addresses this endpoint accepts connections on. Waits until the first
    /// listener is bound.
    pub async fn listen_addrs(&self) -> Result<Vec<Multiaddr>, TransportError> {
        let mut listening = self.listening.clone();
        let addrs = listening
            .wait_for(|addrs| !addrs.is_empty())
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(addrs.to_vec())
    }
}

fn build_swarm(
    identity: libp2p::identity::Keypair,
    config: &OverlayConfig,
) -> Result<Swarm<OverlayBehaviour>, TransportError> {
    let idle_timeout = Duration::from_secs(config.idle_timeout_secs);

    let swarm = libp2p::SwarmBuilder::with_existing_identity(identity)
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| TransportError::Setup(e.to_string()))?
        .with_behaviour(|key| {
            let rpc = request_response::json::Behaviour::new(
                [(StreamProtocol::new(RPC_PROTOCOL), ProtocolSupport::Full)],
                request_response::Config::default(),
            );
            let identify = identify::Behaviour::new(identify::Config::new(
                IDENTIFY_PROTOCOL.to_string(),
                key.public(),
            ));
            let mdns = if config.mdns {
                Some(mdns::tokio::Behaviour::new(
                    mdns::Config::default(),
                    key.public().to_peer_id(),
                )?)
            } else {
                None
            };
            Ok(OverlayBehaviour {
                rpc,
                identify,
                mdns: Toggle::from(mdns),
            })
        })
        .map_err(|e| TransportError::Setup(e.to_string()))?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(idle_timeout))
        .build();

    Ok(swarm)
}

#[async_trait]
impl Overlay for SwarmOverlay {
    fn local_key(&self) -> PeerKey {
        self.local
    }

    async fn request(
        &self,
        peer: &PeerKey,
        method: Method,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, TransportError> {
        // libp2p cannot dial itself; hand the call straight to our own queue
        if *peer == self.local {
            let (call, response) = InboundCall::new(method, payload);
            self.inbound.send(call).await.map_err(|_| TransportError::Closed)?;
            return response.await.map_err(|_| TransportError::NoResponse);
        }

        let peer_id = peer
            .to_peer_id()
            .map_err(|e| TransportError::InvalidAddress(e.to_string()))?;
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Request {
                peer: peer_id,
                request: WireRequest { method, payload },
                reply,
            })
            .await
            .map_err(|_| TransportError::Closed)?;

        response.await.map_err(|_| TransportError::Closed)?
    }
}

// ============================================================================
// DRIVER
// ============================================================================

struct SwarmDriver {
    swarm: Swarm<OverlayBehaviour>,
    commands: mpsc::Receiver<Command>,
    inbound: mpsc::Sender<InboundCall>,
    responses_tx: mpsc::UnboundedSender<(u64, Option<Vec<u8>>)>,
    responses_rx: mpsc::UnboundedReceiver<(u64, Option<Vec<u8>>)>,
    pending_outbound: HashMap<OutboundRequestId, ReplySender>,
    pending_inbound: HashMap<u64, ResponseChannel<WireResponse>>,
    next_inbound_id: u64,
    known: HashSet<PeerId>,
    parked: HashMap<PeerId, Vec<ParkedRequest>>,
    resolve_timeout: Duration,
    listening: watch::Sender<Vec<Multiaddr>>,
}

impl SwarmDriver {
    async fn run(mut self) {
        let mut sweep = tokio::time::interval(PARKED_SWEEP);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every handle is gone
                    None => break,
                },
                Some((id, payload)) = self.responses_rx.recv() => self.send_response(id, payload),
                event = self.swarm.select_next_some() => self.handle_event(event),
                _ = sweep.tick() => self.release_expired(),
            }
        }

        debug!("Overlay driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Request {
                peer,
                request,
                reply,
            } => {
                if self.known.contains(&peer) || self.swarm.is_connected(&peer) {
                    self.send_request(peer, request, reply);
                } else {
                    debug!(%peer, "Address unknown, waiting for discovery");
                    self.parked.entry(peer).or_default().push(ParkedRequest {
                        request,
                        reply,
                        deadline: Instant::now() + self.resolve_timeout,
                    });
                }
            }
        }
    }

    fn send_request(&mut self, peer: PeerId, request: WireRequest, reply: ReplySender) {
        let id = self.swarm.behaviour_mut().rpc.send_request(&peer, request);
        self.pending_outbound.insert(id, reply);
    }

    fn send_response(&mut self, id: u64, payload: Option<Vec<u8>>) {
        let Some(channel) = self.pending_inbound.remove(&id) else {
            return;
        };
        match payload {
            Some(payload) => {
                if self
                    .swarm
                    .behaviour_mut()
                    .rpc
                    .send_response(channel, WireResponse { payload })
                    .is_err()
                {
                    debug!("Caller went away before the response was sent");
                }
            }
            // Dropping the channel tells the caller the request failed
            None => debug!("Handler dropped an inbound request"),
        }
    }

    fn mark_known(&mut self, peer: PeerId) {
        self.known.insert(peer);
        if let Some(parked) = self.parked.remove(&peer) {
            for p in parked {
                self.send_request(peer, p.request, p.reply);
            }
        }
    }

    /// Give up waiting for discovery; libp2p reports the dial failure if any
    fn release_expired(&mut self) {
        let now = Instant::now();
        let peers: Vec<PeerId> = self.parked.keys().copied().collect();

        for peer in peers {
            let Some(queue) = self.parked.remove(&peer) else {
                continue;
            };
            let (due, waiting): (Vec<_>, Vec<_>) =
                queue.into_iter().partition(|p| p.deadline <= now);
            if !waiting.is_empty() {
                self.parked.insert(peer, waiting);
            }
            for p in due {
                debug!(%peer, "Peer not discovered in time, dialing anyway");
                self.send_request(peer, p.request, p.reply);
            }
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<OverlayBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "Overlay listening");
                self.listening.send_modify(|addrs| addrs.push(address));
            }
            SwarmEvent::ExpiredListenAddr { address, .. } => {
                self.listening.send_modify(|addrs| addrs.retain(|a| a != &address));
            }
            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!(peer = %peer_id, "Connection established");
                self.mark_known(peer_id);
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                debug!(peer = ?peer_id, %error, "Dial failed");
            }
            SwarmEvent::Behaviour(OverlayBehaviourEvent::Mdns(mdns::Event::Discovered(found))) => {
                for (peer_id, address) in found {
                    self.swarm.add_peer_address(peer_id, address);
                    self.mark_known(peer_id);
                }
            }
            SwarmEvent::Behaviour(OverlayBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                for address in info.listen_addrs {
                    self.swarm.add_peer_address(peer_id, address);
                }
                self.mark_known(peer_id);
            }
            SwarmEvent::Behaviour(OverlayBehaviourEvent::Rpc(event)) => self.handle_rpc(event),
            _ => {}
        }
    }

    fn handle_rpc(&mut self, event: request_response::Event<WireRequest, WireResponse>) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => self.accept_inbound(peer, request, channel),
                request_response::Message::Response {
                    request_id,
                    response,
                } => {
                    if let Some(reply) = self.pending_outbound.remove(&request_id) {
                        let _ = reply.send(Ok(response.payload));
                    }
                }
            },
            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                debug!(%peer, %error, "Outbound request failed");
                if let Some(reply) = self.pending_outbound.remove(&request_id) {
                    let _ = reply.send(Err(TransportError::RequestFailed(error.to_string())));
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                warn!(%peer, %error, "Inbound request failed");
            }
            _ => {}
        }
    }

    fn accept_inbound(
        &mut self,
        peer: PeerId,
        request: WireRequest,
        channel: ResponseChannel<WireResponse>,
    ) {
        debug!(%peer, method = %request.method, "Inbound request");
        let (call, response) = InboundCall::new(request.method, request.payload);

        if let Err(e) = self.inbound.try_send(call) {
            // Nobody serving (client role) or the node is backed up
            warn!(%peer, error = %e, "Dropping inbound request");
            return;
        }

        let id = self.next_inbound_id;
        self.next_inbound_id += 1;
        self.pending_inbound.insert(id, channel);

        let responses = self.responses_tx.clone();
        tokio::spawn(async move {
            let payload = response.await.ok();
            let _ = responses.send((id, payload));
        });
    }
}
