// Broadcast Coordinator - Fan one request out to many peers
//
// Best-effort delivery:
// - Runs in its own task, so the caller never waits on the network
// - At most `max_in_flight` requests outstanding at once
// - Responses are not interpreted; failures are collected into a report

use crate::identity::PeerKey;
use crate::rpc::{Method, RpcRequest};
use crate::transport::{Overlay, TransportError};
use std::collections::VecDeque;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for fan-out
#[derive(Clone, Debug)]
pub struct BroadcastConfig {
    /// Maximum concurrent requests per broadcast
    pub max_in_flight: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { max_in_flight: 8 }
    }
}

impl BroadcastConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max concurrent requests
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn validate(&self) -> Result<(), BroadcastError> {
        if self.max_in_flight == 0 {
            return Err(BroadcastError::InvalidConfig(
                "max_in_flight cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one broadcast
#[derive(Debug)]
pub struct BroadcastReport {
    pub method: Method,
    /// Number of peers a request was issued to
    pub attempted: usize,
    /// Number of peers that answered
    pub delivered: usize,
    pub failures: Vec<(PeerKey, TransportError)>,
    /// Requests whose task panicked or was cancelled
    pub aborted: usize,
}

impl BroadcastReport {
    fn new(method: Method) -> Self {
        Self {
            method,
            attempted: 0,
            delivered: 0,
            failures: Vec::new(),
            aborted: 0,
        }
    }

    /// Every attempted peer answered
    pub fn is_complete(&self) -> bool {
        self.delivered == self.attempted
    }
}

/// A running broadcast. Dropping it detaches the broadcast.
pub struct BroadcastHandle {
    method: Method,
    task: JoinHandle<BroadcastReport>,
}

impl BroadcastHandle {
    pub fn method(&self) -> Method {
        self.method
    }

    /// Wait for every request to finish
    pub async fn wait(self) -> Result<BroadcastReport, JoinError> {
        self.task.await
    }
}

/// Issues the same request to a list of peers
#[derive(Clone)]
pub struct BroadcastCoordinator<O: Overlay> {
    overlay: O,
    config: BroadcastConfig,
}

impl<O: Overlay> BroadcastCoordinator<O> {
    pub fn new(overlay: O, config: BroadcastConfig) -> Self {
        Self { overlay, config }
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Start a broadcast. Must be called from within a tokio runtime.
    pub fn broadcast(&self, peers: Vec<PeerKey>, request: &RpcRequest) -> BroadcastHandle {
        let method = request.method();
        let payload = request.to_payload();
        let overlay = self.overlay.clone();
        let max_in_flight = self.config.max_in_flight.max(1);

        let task = tokio::spawn(async move {
            let report = fan_out(overlay, peers, method, payload, max_in_flight).await;

            if !report.failures.is_empty() || report.aborted > 0 {
                let failed: Vec<String> = report
                    .failures
                    .iter()
                    .map(|(peer, e)| format!("{}: {}", peer.short(), e))
                    .collect();
                warn!(
                    %method,
                    attempted = report.attempted,
                    delivered = report.delivered,
                    aborted = report.aborted,
                    failures = ?failed,
                    "Broadcast incomplete"
                );
            } else {
                debug!(%method, delivered = report.delivered, "Broadcast complete");
            }

            report
        });

        BroadcastHandle { method, task }
    }
}

async fn fan_out<O: Overlay>(
    overlay: O,
    peers: Vec<PeerKey>,
    method: Method,
    payload: Vec<u8>,
    max_in_flight: usize,
) -> BroadcastReport {
    let mut report = BroadcastReport::new(method);
    let mut queue: VecDeque<PeerKey> = peers.into();
    let mut in_flight = JoinSet::new();

    loop {
        while in_flight.len() < max_in_flight {
            let Some(peer) = queue.pop_front() else {
                break;
            };
            let overlay = overlay.clone();
            let payload = payload.clone();
            report.attempted += 1;
            in_flight.spawn(async move {
                let result = overlay.request(&peer, method, payload).await;
                (peer, result)
            });
        }

        match in_flight.join_next().await {
            Some(Ok((_, Ok(_)))) => report.delivered += 1,
            Some(Ok((peer, Err(e)))) => report.failures.push((peer, e)),
            Some(Err(_)) => report.aborted += 1,
            None => break,
        }
    }

    report
}
