// auctiond - run auction nodes or drive them as a client

use auctionmesh::node::{
    AuctionClient, AuctionNode, NodeConfig, NodeError, BOOTSTRAP_ADDRESS, SERVER_PORT, STORE_PATH,
};
use auctionmesh::sync::PeerRegistry;
use auctionmesh::{AuctionStore, PeerKey, SwarmOverlay};
use clap::{Args, Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "auctiond", version, about = "Peer-to-peer picture auctions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Host auction nodes until Ctrl-C, printing every registered key once up
    Serve {
        #[arg(long, default_value = STORE_PATH)]
        store: PathBuf,
        #[arg(long, default_value_t = SERVER_PORT)]
        port: u16,
        #[command(flatten)]
        net: NetArgs,
        /// Number of nodes hosted by this process
        #[arg(long, default_value_t = 1)]
        lanes: u16,
    },
    /// Ask a node to open an auction
    Open {
        #[arg(long)]
        peer: PeerKey,
        #[arg(long)]
        item: u64,
        #[arg(long)]
        price: f64,
        #[command(flatten)]
        net: NetArgs,
    },
    /// Ask a node to relay a bid
    Bid {
        #[arg(long)]
        peer: PeerKey,
        #[arg(long)]
        item: u64,
        #[arg(long)]
        price: f64,
        #[command(flatten)]
        net: NetArgs,
    },
    /// Ask a node to close its auction
    Close {
        #[arg(long)]
        peer: PeerKey,
        #[command(flatten)]
        net: NetArgs,
    },
    /// Run the reference scenario against three or more nodes
    Walkthrough {
        #[arg(long = "peer", required = true)]
        peers: Vec<PeerKey>,
        #[command(flatten)]
        net: NetArgs,
    },
}

#[derive(Args)]
struct NetArgs {
    /// Multiaddr dialed on startup
    #[arg(long, default_value = BOOTSTRAP_ADDRESS)]
    bootstrap: String,
    /// Rely on local discovery only
    #[arg(long)]
    no_bootstrap: bool,
}

impl NetArgs {
    fn bootstrap(&self) -> Option<String> {
        (!self.no_bootstrap).then(|| self.bootstrap.clone())
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,libp2p=warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Serve {
            store,
            port,
            net,
            lanes,
        } => {
            let config = NodeConfig::new()
                .with_store_path(store)
                .with_listen_port(port)
                .with_bootstrap(net.bootstrap());
            serve(config, lanes.max(1)).await
        }
        Command::Open {
            peer,
            item,
            price,
            net,
        } => {
            let client = connect(&net)?;
            client.open_pic_auction(&peer, item, price).await?;
            Ok(())
        }
        Command::Bid {
            peer,
            item,
            price,
            net,
        } => {
            let client = connect(&net)?;
            client.bidding(&peer, item, price).await?;
            Ok(())
        }
        Command::Close { peer, net } => {
            let client = connect(&net)?;
            client.close_pic_auction(&peer).await?;
            Ok(())
        }
        Command::Walkthrough { peers, net } => {
            let client = connect(&net)?;
            client.walkthrough(&peers).await?;
            Ok(())
        }
    }
}

fn connect(net: &NetArgs) -> Result<AuctionClient<SwarmOverlay>, Box<dyn Error>> {
    let config = NodeConfig::client().with_bootstrap(net.bootstrap());
    Ok(AuctionClient::connect(&config)?)
}

async fn serve(config: NodeConfig, lanes: u16) -> Result<(), Box<dyn Error>> {
    let store = AuctionStore::open(&config.store_path)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut nodes = JoinSet::new();

    match start_lanes(&store, &config, lanes, &shutdown_rx, &mut nodes) {
        // sled locks the store to this process; clients take their keys from here
        Ok(peers) => {
            println!("Running Nodes: {}", peers.len());
            for peer in &peers {
                println!("{}  {}", peer.short(), peer);
            }
        }
        Err(e) => {
            // Let the lanes already up unregister before bailing out
            let _ = shutdown_tx.send(true);
            while nodes.join_next().await.is_some() {}
            return Err(e);
        }
    }

    let mut stopped = None;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("Ctrl-C received"),
            Err(e) => error!(error = %e, "Cannot listen for Ctrl-C, shutting down"),
        },
        Some(joined) = nodes.join_next() => {
            // A node stopped on its own; take the rest down with it
            stopped = Some(joined);
        }
    }

    let _ = shutdown_tx.send(true);

    let mut result = stopped.map_or(Ok(()), lane_result);
    while let Some(joined) = nodes.join_next().await {
        result = result.and(lane_result(joined));
    }
    result
}

fn start_lanes(
    store: &AuctionStore,
    config: &NodeConfig,
    lanes: u16,
    shutdown: &watch::Receiver<bool>,
    nodes: &mut JoinSet<Result<(), NodeError>>,
) -> Result<Vec<PeerKey>, Box<dyn Error>> {
    for index in 0..lanes {
        let lane = config.lane(index)?;
        let (node, inbound) = AuctionNode::start(store, &lane)?;
        info!(lane = index, key = %node.key().short(), "Node started");

        let mut shutdown = shutdown.clone();
        nodes.spawn(node.run(inbound, async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        }));
    }
    Ok(PeerRegistry::new(store.clone()).load()?)
}

fn lane_result(
    joined: Result<Result<(), NodeError>, JoinError>,
) -> Result<(), Box<dyn Error>> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(e.into()),
    }
}
