// Path: crates/node/src/main.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]

//! # ComputeChain Node
//!
//! The validator node binary: `init` scaffolds a data directory with a
//! validator key and genesis file, `run` starts the chain, the P2P node
//! and the block proposer.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod facade;

#[derive(Parser, Debug)]
#[clap(
    name = "cpc-node",
    version,
    about = "ComputeChain proof-of-stake node",
    long_about = "Runs a ComputeChain validator: deterministic state machine, \
round-robin block production, delegated staking and gossip-based networking."
)]
struct Cli {
    /// Data directory for keys, genesis, chain database and snapshots.
    #[clap(long, global = true, default_value = "./.computechain")]
    datadir: PathBuf,

    /// Network profile: devnet, testnet or mainnet.
    #[clap(long, global = true, default_value = "devnet")]
    network: String,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the node: create keys, genesis and the data directory.
    Init(commands::init::InitArgs),

    /// Run the node.
    Run(commands::run::RunArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => commands::init::run(&cli.datadir, &cli.network, args),
        Commands::Run(args) => commands::run::run(&cli.datadir, &cli.network, args).await,
    }
}
