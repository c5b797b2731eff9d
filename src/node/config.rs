// Node Configuration - Deployment defaults and builders

use crate::node::NodeError;
use crate::sync::BroadcastConfig;
use crate::transport::OverlayConfig;
use std::path::PathBuf;

/// Port a server node listens on
pub const SERVER_PORT: u16 = 40001;

/// Port a client endpoint listens on
pub const CLIENT_PORT: u16 = 50001;

/// Fixed overlay entry point dialed at startup
pub const BOOTSTRAP_ADDRESS: &str = "/ip4/127.0.0.1/tcp/30001";

/// Default location of the shared store
pub const STORE_PATH: &str = "./db/rpc-server";

/// Configuration for one auction node
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Directory of the sled store holding seeds and the registry
    pub store_path: PathBuf,
    /// Seed label; None uses the unlabelled `dht-seed` key
    pub seed_label: Option<String>,
    pub overlay: OverlayConfig,
    pub broadcast: BroadcastConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(STORE_PATH),
            seed_label: None,
            overlay: OverlayConfig::default()
                .with_listen_port(SERVER_PORT)
                .with_bootstrap(Some(BOOTSTRAP_ADDRESS.to_string())),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Server preset
    pub fn new() -> Self {
        Self::default()
    }

    /// Client preset: client port, same bootstrap
    pub fn client() -> Self {
        let mut config = Self::default();
        config.overlay = config.overlay.with_listen_port(CLIENT_PORT);
        config
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    pub fn with_seed_label(mut self, label: Option<String>) -> Self {
        self.seed_label = label;
        self
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.overlay = self.overlay.with_listen_port(port);
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: Option<String>) -> Self {
        self.overlay = self.overlay.with_bootstrap(bootstrap);
        self
    }

    pub fn with_resolve_timeout_ms(mut self, ms: u64) -> Self {
        self.overlay = self.overlay.with_resolve_timeout_ms(ms);
        self
    }

    pub fn with_broadcast(mut self, broadcast: BroadcastConfig) -> Self {
        self.broadcast = broadcast;
        self
    }

    /// Config of the `index`-th node hosted by one process.
    ///
    /// Lane 0 is this config unchanged; lane i listens on port + i and keeps
    /// its own seed under the label `lane-i`.
    pub fn lane(&self, index: u16) -> Result<Self, NodeError> {
        if index == 0 {
            return Ok(self.clone());
        }

        let mut lane = self.clone();
        if self.overlay.listen_port != 0 {
            let port = self.overlay.listen_port.checked_add(index).ok_or_else(|| {
                NodeError::InvalidConfig(format!("lane {} overflows the port range", index))
            })?;
            lane.overlay.listen_port = port;
        }
        lane.seed_label = Some(match &self.seed_label {
            Some(label) => format!("{}-lane-{}", label, index),
            None => format!("lane-{}", index),
        });
        Ok(lane)
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        self.overlay.validate()?;
        self.broadcast
            .validate()
            .map_err(|e| NodeError::InvalidConfig(e.to_string()))?;
        Ok(())
    }
}
