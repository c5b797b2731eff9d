// Node Scenario Tests
// Several auction nodes and a client on one in-memory overlay, sharing one store

use auctionmesh::auction::AuctionState;
use auctionmesh::identity::{NodeKeypair, PeerKey};
use auctionmesh::node::{AuctionClient, AuctionNode, ClientError, NodeError};
use auctionmesh::rpc::{Method, RpcResponse};
use auctionmesh::storage::{keys, AuctionStore};
use auctionmesh::sync::{BroadcastConfig, PeerRegistry};
use auctionmesh::transport::{MemoryNetwork, MemoryOverlay, Overlay, TransportError};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct RunningNode {
    key: PeerKey,
    state: watch::Receiver<AuctionState>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), NodeError>>,
}

struct Mesh {
    store: AuctionStore,
    network: MemoryNetwork,
    nodes: Vec<RunningNode>,
    _dir: TempDir,
}

impl Mesh {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = AuctionStore::open(dir.path()).unwrap();
        Self {
            store,
            network: MemoryNetwork::new(),
            nodes: Vec::new(),
            _dir: dir,
        }
    }

    fn with_nodes(count: usize) -> Self {
        let mut mesh = Self::new();
        for _ in 0..count {
            mesh.spawn_node();
        }
        mesh
    }

    fn registry(&self) -> PeerRegistry {
        PeerRegistry::new(self.store.clone())
    }

    fn spawn_node(&mut self) -> PeerKey {
        let key = NodeKeypair::ephemeral().peer_key();
        let (overlay, inbound) = self.network.join(key);

        let node = AuctionNode::new(overlay, self.registry(), BroadcastConfig::default());
        node.register().unwrap();
        let state = node.subscribe();

        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(node.run(inbound, async move {
            let _ = stopped.await;
        }));

        self.nodes.push(RunningNode {
            key,
            state,
            stop,
            task,
        });
        key
    }

    fn key(&self, index: usize) -> PeerKey {
        self.nodes[index].key
    }

    fn keys(&self) -> Vec<PeerKey> {
        self.nodes.iter().map(|n| n.key).collect()
    }

    fn client(&self) -> AuctionClient<MemoryOverlay> {
        let overlay = self.network.connect(NodeKeypair::ephemeral().peer_key());
        AuctionClient::new(overlay)
    }

    fn state(&self, index: usize) -> AuctionState {
        self.nodes[index].state.borrow().clone()
    }

    /// Wait until node `index` holds exactly this highest bid
    async fn wait_for_bid(&mut self, index: usize, bidder: PeerKey, price: f64) {
        let rx = &mut self.nodes[index].state;
        let result = tokio::time::timeout(
            WAIT,
            rx.wait_for(|s| {
                s.highest_bid()
                    .map_or(false, |b| b.bidder == bidder && b.price == price)
            }),
        )
        .await;
        assert!(result.is_ok(), "node {} never saw bid {}", index, price);
    }

    /// Wait until every node has received `count` calls of `method`
    async fn wait_for_deliveries(&self, method: Method, count: usize) {
        let network = self.network.clone();
        let keys = self.keys();
        let reached = tokio::time::timeout(WAIT, async move {
            loop {
                if keys
                    .iter()
                    .all(|k| network.delivery_count(k, method) >= count)
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(reached.is_ok(), "{} did not reach every node", method);
    }

    async fn stop(&mut self, index: usize) -> Result<(), NodeError> {
        let node = self.nodes.remove(index);
        let _ = node.stop.send(());
        node.task.await.unwrap()
    }
}

fn ok(response: &RpcResponse) {
    assert!(response.is_success(), "expected success, got {}", response);
}

/// Whether some node was told, through `logging`, a line containing `text`
fn announced(network: &MemoryNetwork, text: &str) -> bool {
    network
        .deliveries()
        .iter()
        .filter(|d| d.method == Method::Logging)
        .any(|d| String::from_utf8_lossy(&d.payload).contains(text))
}

// ============================================================================
// REFERENCE WALKTHROUGH
// ============================================================================

#[tokio::test]
async fn test_two_auctions_four_bids_one_sale() {
    let mut mesh = Mesh::with_nodes(3);
    let client = mesh.client();
    let (p1, p2, p3) = (mesh.key(0), mesh.key(1), mesh.key(2));

    // 1-2: two sellers
    ok(&client.open_pic_auction(&p1, 1, 75.0).await.unwrap());
    ok(&client.open_pic_auction(&p2, 2, 60.0).await.unwrap());
    assert_eq!(mesh.state(0).item_id(), Some(1));
    assert_eq!(mesh.state(1).item_id(), Some(2));
    assert!(!mesh.state(2).is_open());

    // 3: P2 bids the ask on P1's item
    ok(&client.bidding(&p2, 1, 75.0).await.unwrap());
    mesh.wait_for_bid(0, p2, 75.0).await;

    // 4: P3 outbids
    ok(&client.bidding(&p3, 1, 75.5).await.unwrap());
    mesh.wait_for_bid(0, p3, 75.5).await;

    // 5: P3 bids on P2's item
    ok(&client.bidding(&p3, 2, 75.5).await.unwrap());
    mesh.wait_for_bid(1, p3, 75.5).await;

    // 6: P2 outbids on P1's item
    ok(&client.bidding(&p2, 1, 80.0).await.unwrap());
    mesh.wait_for_bid(0, p2, 80.0).await;

    // 7: P1 sells
    ok(&client.close_pic_auction(&p1).await.unwrap());
    assert!(!mesh.state(0).is_open());

    // P2's auction is untouched
    let p2_state = mesh.state(1);
    assert_eq!(p2_state.item_id(), Some(2));
    assert_eq!(p2_state.highest_bid().map(|b| b.bidder), Some(p3));

    // Two opens, four accepted bids, one close
    mesh.wait_for_deliveries(Method::Logging, 7).await;
}

#[tokio::test]
async fn test_walkthrough_runs_all_steps() {
    let mesh = Mesh::with_nodes(3);
    let client = mesh.client();

    let responses = client.walkthrough(&mesh.keys()).await.unwrap();

    assert_eq!(responses.len(), 7);
    for response in &responses {
        ok(response);
    }
    assert!(!mesh.state(0).is_open());
    assert_eq!(mesh.state(1).highest_bid().map(|b| b.price), Some(75.5));

    let sale = format!("sell Pic#1 for 80 USDt to Client[{}]", mesh.key(1).short());
    mesh.wait_for_deliveries(Method::Logging, 7).await;
    assert!(announced(&mesh.network, &sale));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bidding_answers_after_the_seller_took_the_bid() {
    for _ in 0..20 {
        let mut mesh = Mesh::with_nodes(3);
        let client = mesh.client();
        let (p1, p2) = (mesh.key(0), mesh.key(1));

        ok(&client.open_pic_auction(&p1, 1, 75.0).await.unwrap());
        ok(&client.bidding(&p2, 1, 75.0).await.unwrap());
        ok(&client.bidding(&p2, 1, 80.0).await.unwrap());

        // No waiting: the answer already implies the seller holds the bid
        let best = mesh.state(0).highest_bid().map(|b| (b.bidder, b.price));
        assert_eq!(best, Some((p2, 80.0)));

        ok(&client.close_pic_auction(&p1).await.unwrap());
        let sale = format!("sell Pic#1 for 80 USDt to Client[{}]", p2.short());
        mesh.wait_for_deliveries(Method::Logging, 4).await;
        assert!(announced(&mesh.network, &sale));

        for index in (0..3).rev() {
            mesh.stop(index).await.unwrap();
        }
    }
}

#[tokio::test]
async fn test_walkthrough_needs_three_peers() {
    let mesh = Mesh::with_nodes(2);
    let client = mesh.client();

    let result = client.walkthrough(&mesh.keys()).await;

    assert!(matches!(
        result,
        Err(ClientError::NotEnoughPeers {
            required: 3,
            found: 2
        })
    ));
    assert!(mesh.network.deliveries().is_empty());
}

// ============================================================================
// REJECTIONS
// ============================================================================

#[tokio::test]
async fn test_rejections_reach_the_client() {
    let mesh = Mesh::with_nodes(1);
    let client = mesh.client();
    let p1 = mesh.key(0);

    let response = client.close_pic_auction(&p1).await.unwrap();
    assert_eq!(response.msg, "No opened auction");

    ok(&client.open_pic_auction(&p1, 1, 75.0).await.unwrap());

    let response = client.open_pic_auction(&p1, 2, 10.0).await.unwrap();
    assert!(!response.status);
    assert_eq!(
        response.msg,
        "Opened auction exists on this client, please close it first!"
    );

    let response = client.close_pic_auction(&p1).await.unwrap();
    assert_eq!(response.msg, "No opened auction");
    assert!(mesh.state(0).is_open());

    let response = client.bidding(&p1, 0, 80.0).await.unwrap();
    assert_eq!(response.msg, "Invalid Picture ID or Price.");
    let response = client.bidding(&p1, 1, -1.0).await.unwrap();
    assert_eq!(response.msg, "Invalid Picture ID or Price.");
    assert_eq!(mesh.network.delivery_count(&p1, Method::Bid), 0);
}

#[tokio::test]
async fn test_malformed_payload_rejected() {
    let mesh = Mesh::with_nodes(1);
    let raw = mesh.network.connect(NodeKeypair::ephemeral().peer_key());

    let reply = raw
        .request(&mesh.key(0), Method::OpenPicAuction, br#"{"id":1,"picPrice":75}"#.to_vec())
        .await
        .unwrap();
    let response = RpcResponse::from_bytes(&reply).unwrap();

    assert!(!response.status);
    assert!(response.msg.starts_with("Malformed request"));
    assert!(!mesh.state(0).is_open());
}

#[tokio::test]
async fn test_low_bid_leaves_auction_alone() {
    let mut mesh = Mesh::with_nodes(2);
    let client = mesh.client();
    let (p1, p2) = (mesh.key(0), mesh.key(1));

    ok(&client.open_pic_auction(&p1, 1, 75.0).await.unwrap());
    ok(&client.bidding(&p2, 1, 90.0).await.unwrap());
    mesh.wait_for_bid(0, p2, 90.0).await;

    // Relaying still succeeds; the seller rejects the bid itself
    ok(&client.bidding(&p1, 1, 85.0).await.unwrap());

    let state = mesh.state(0);
    assert_eq!(state.highest_bid().map(|b| (b.bidder, b.price)), Some((p2, 90.0)));
}

// ============================================================================
// RELAY ROUTING
// ============================================================================

#[tokio::test]
async fn test_seller_relaying_its_own_bid() {
    let mut mesh = Mesh::with_nodes(2);
    let client = mesh.client();
    let p1 = mesh.key(0);

    ok(&client.open_pic_auction(&p1, 1, 75.0).await.unwrap());
    ok(&client.bidding(&p1, 1, 80.0).await.unwrap());

    // The bid looped back to P1 as a later inbound call, answered before
    // the relay itself was
    let best = mesh.state(0).highest_bid().map(|b| (b.bidder, b.price));
    assert_eq!(best, Some((p1, 80.0)));
    ok(&client.close_pic_auction(&p1).await.unwrap());
}

#[tokio::test]
async fn test_bid_fans_out_to_every_registered_node() {
    let mut mesh = Mesh::with_nodes(3);
    let client = mesh.client();
    let (p1, p2) = (mesh.key(0), mesh.key(1));

    ok(&client.open_pic_auction(&p1, 1, 75.0).await.unwrap());
    ok(&client.bidding(&p2, 1, 75.0).await.unwrap());
    mesh.wait_for_bid(0, p2, 75.0).await;
    mesh.wait_for_deliveries(Method::Bid, 1).await;

    for key in mesh.keys() {
        assert_eq!(mesh.network.delivery_count(&key, Method::Bid), 1);
    }
    assert!(mesh
        .network
        .deliveries()
        .iter()
        .filter(|d| d.method == Method::Bid)
        .all(|d| d.from == p2));
}

#[tokio::test]
async fn test_sellers_sharing_an_item_id_both_accept() {
    let mut mesh = Mesh::with_nodes(3);
    let client = mesh.client();
    let (p1, p2, p3) = (mesh.key(0), mesh.key(1), mesh.key(2));

    ok(&client.open_pic_auction(&p1, 7, 50.0).await.unwrap());
    ok(&client.open_pic_auction(&p2, 7, 40.0).await.unwrap());
    ok(&client.bidding(&p3, 7, 55.0).await.unwrap());

    mesh.wait_for_bid(0, p3, 55.0).await;
    mesh.wait_for_bid(1, p3, 55.0).await;
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_register_returns_whole_registry() {
    let mesh = Mesh::with_nodes(2);
    let key = NodeKeypair::ephemeral().peer_key();
    let (overlay, _inbound) = mesh.network.join(key);
    let node = AuctionNode::new(overlay, mesh.registry(), BroadcastConfig::default());

    let peers = node.register().unwrap();

    assert_eq!(peers, vec![mesh.key(0), mesh.key(1), key]);
}

#[tokio::test]
async fn test_shutdown_unregisters() {
    let mut mesh = Mesh::with_nodes(2);
    let (p1, p2) = (mesh.key(0), mesh.key(1));
    let registry = mesh.registry();
    assert_eq!(registry.load().unwrap(), vec![p1, p2]);

    mesh.stop(0).await.unwrap();

    assert_eq!(registry.load().unwrap(), vec![p2]);
}

#[tokio::test]
async fn test_registry_failure_stops_node() {
    let mut mesh = Mesh::with_nodes(1);
    let client = mesh.client();
    let p1 = mesh.key(0);

    mesh.store.put_raw(keys::PEERS, &[0xff, 0xff, 0xff]).unwrap();

    let result = client.bidding(&p1, 1, 80.0).await;
    assert!(matches!(
        result,
        Err(ClientError::Gateway(auctionmesh::rpc::GatewayError::Transport(
            TransportError::NoResponse
        )))
    ));

    let node = &mesh.nodes[0];
    let stopped = tokio::time::timeout(WAIT, async {
        while !node.task.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(stopped.is_ok(), "node kept serving after a registry failure");

    let result = mesh.stop(0).await;
    assert!(matches!(result, Err(NodeError::Registry(_))));
}
