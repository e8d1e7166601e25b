// Path: crates/node/src/commands/run.rs
//! `cpc-node run`: start the chain, the P2P node and the proposer, then
//! wait for shutdown.

use crate::facade::ChainFacade;
use anyhow::{anyhow, Context, Result};
use clap::Args;
use cpc_chain::{BlockProposer, Blockchain, ChainOptions, Mempool, SyncStatus};
use cpc_networking::{P2pConfig, P2pHandle, P2pNode};
use cpc_types::{EconomicConfig, NetworkConfig};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// HTTP API bind host (the query surface lives out of tree).
    #[clap(long, default_value = "127.0.0.1")]
    pub host: String,

    /// HTTP API bind port.
    #[clap(long, default_value_t = 8000)]
    pub port: u16,

    /// P2P bind host.
    #[clap(long, default_value = "0.0.0.0")]
    pub p2p_host: String,

    /// P2P bind port.
    #[clap(long, default_value_t = 9000)]
    pub p2p_port: u16,

    /// Comma-separated bootstrap peers (host:port).
    #[clap(long, value_delimiter = ',')]
    pub peers: Vec<String>,

    /// Rebuild state from the block log before starting.
    #[clap(long)]
    pub rebuild_state: bool,

    /// Disable snapshot creation and snapshot fast-sync.
    #[clap(long)]
    pub no_snapshots: bool,
}

pub async fn run(datadir: &Path, network: &str, args: RunArgs) -> Result<()> {
    let network_config = NetworkConfig::named(network)
        .ok_or_else(|| anyhow!("unknown network profile: {network}"))?;
    let economy = EconomicConfig::standard();
    info!(
        network = %network_config.network_id,
        chain_id = %network_config.chain_id,
        datadir = %datadir.display(),
        "starting node"
    );

    // Chain
    let mut chain_opts = ChainOptions::new(datadir);
    chain_opts.enable_snapshots = !args.no_snapshots;
    let chain = Arc::new(
        Blockchain::open(network_config.clone(), economy, chain_opts)
            .map_err(|e| anyhow!("failed to open chain: {e}"))?,
    );
    if args.rebuild_state {
        info!("--rebuild-state requested");
        chain
            .rebuild_state_from_blocks()
            .map_err(|e| anyhow!("state rebuild failed: {e}"))?;
    }

    // Mempool and networking
    let mempool = Arc::new(Mempool::new(Arc::new(network_config.clone())));
    let facade = Arc::new(ChainFacade::new(chain.clone(), mempool.clone()));

    let bootstrap_peers = merge_peers(datadir, &args.peers);
    let p2p = P2pNode::new(
        P2pConfig {
            host: args.p2p_host.clone(),
            port: args.p2p_port,
            network_id: network_config.network_id.clone(),
            bootstrap_peers,
            accept_snapshots: !args.no_snapshots,
        },
        facade,
    );
    let p2p_handle = p2p
        .start()
        .await
        .map_err(|e| anyhow!("failed to start p2p node: {e}"))?;

    // Proposer
    let key_path = datadir.join("validator_key.hex");
    let mut proposer = if key_path.exists() {
        let priv_key = hex::decode(
            fs::read_to_string(&key_path)
                .context("reading validator key")?
                .trim(),
        )?;
        let mut proposer = BlockProposer::new(
            chain.clone(),
            mempool.clone(),
            Arc::new(P2pSyncProbe(p2p_handle.clone())),
            priv_key,
        )
        .map_err(|e| anyhow!("invalid validator key: {e}"))?;
        let broadcast_handle = p2p_handle.clone();
        proposer.set_block_callback(Arc::new(move |block| {
            broadcast_handle.broadcast_block(block);
        }));
        proposer.start();
        Some(proposer)
    } else {
        warn!("no validator key found; running as a non-producing node");
        None
    };

    info!(
        height = chain.height(),
        p2p = format!("{}:{}", args.p2p_host, args.p2p_port),
        "node is up"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    if let Some(proposer) = proposer.as_mut() {
        proposer.stop();
    }
    persist_peers(datadir, &p2p_handle);
    p2p_handle.shutdown();
    info!("clean shutdown");
    Ok(())
}

/// Known peers from the previous run merged with the CLI list.
fn merge_peers(datadir: &Path, cli_peers: &[String]) -> Vec<String> {
    let mut peers: Vec<String> = cli_peers
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect();
    let path = datadir.join("peers.json");
    if let Ok(raw) = fs::read_to_string(&path) {
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(saved) => {
                for peer in saved {
                    if !peers.contains(&peer) {
                        peers.push(peer);
                    }
                }
            }
            Err(e) => warn!(%e, "ignoring unreadable peers.json"),
        }
    }
    peers
}

/// Saves the learned peer set for the next start.
fn persist_peers(datadir: &Path, handle: &P2pHandle) {
    let peers = handle.known_peers();
    if peers.is_empty() {
        return;
    }
    let path = datadir.join("peers.json");
    match serde_json::to_string_pretty(&peers) {
        Ok(raw) => {
            if let Err(e) = fs::write(&path, raw) {
                warn!(%e, "failed to persist peers");
            }
        }
        Err(e) => warn!(%e, "failed to encode peers"),
    }
}

/// Adapter exposing the P2P sync state to the proposer's backpressure
/// check.
struct P2pSyncProbe(P2pHandle);

impl SyncStatus for P2pSyncProbe {
    fn is_syncing(&self) -> bool {
        self.0.is_syncing()
    }

    fn best_peer_height(&self) -> i64 {
        self.0.best_peer_height()
    }
}
