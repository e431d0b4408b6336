//! `coind`: the full-node binary. Parses chain selection and networking
//! options, opens the SQLite-backed chain store, and runs the peer-to-peer
//! event loop until shutdown.

mod filters;
mod node;
mod peer;
mod peer_manager;
mod wire;

use clap::{Parser, ValueEnum};
use coin_core::{params_for, BlockChain, ChainKind, ChainParams, Storage};
use node::{Node, NodeConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChainArg {
    Bitcoin,
    Testnet3,
    Namecoin,
    Litecoin,
    Terracoin,
    Dogecoin,
}

impl From<ChainArg> for ChainKind {
    fn from(arg: ChainArg) -> Self {
        match arg {
            ChainArg::Bitcoin => ChainKind::Bitcoin,
            ChainArg::Testnet3 => ChainKind::Testnet3,
            ChainArg::Namecoin => ChainKind::Namecoin,
            ChainArg::Litecoin => ChainKind::Litecoin,
            ChainArg::Terracoin => ChainKind::Terracoin,
            ChainArg::Dogecoin => ChainKind::Dogecoin,
        }
    }
}

/// A full node for any chain in the Bitcoin family.
#[derive(Debug, Parser)]
#[command(name = "coind", version, about)]
struct Cli {
    /// Which currency's consensus rules and network to run.
    #[arg(long, value_enum, default_value = "bitcoin")]
    chain: ChainArg,

    /// Directory for the SQLite chain store; created if missing.
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Address to listen for peers on. Defaults to the chain's standard
    /// port on all interfaces.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Peers to dial on startup, e.g. `198.51.100.7:8333`.
    #[arg(long = "connect")]
    bootstrap: Vec<SocketAddr>,

    /// Tracing filter, e.g. `info`, `coind=debug,coin_core=info`.
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let chain_params = params_for(cli.chain.into());
    let default_port = chain_params.default_port();
    let bind_addr = cli.bind.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], default_port)));

    std::fs::create_dir_all(&cli.data_dir)?;
    let db_path = cli.data_dir.join("chain.sqlite3");
    let storage = Storage::open(db_path.to_string_lossy().as_ref())?;

    tracing::info!(chain = chain_params.name(), data_dir = %cli.data_dir.display(), %bind_addr, "starting node");

    let chain = BlockChain::open(chain_params, storage)?;
    tracing::info!(height = chain.best_height(), tip = %chain.best_hash(), "chain store opened");

    let node = Node::new(
        chain,
        NodeConfig {
            bind_addr,
            bootstrap_peers: cli.bootstrap,
            user_agent: format!("/coind:{}/", env!("CARGO_PKG_VERSION")),
        },
    );

    node.run().await?;
    Ok(())
}
