// Path: crates/types/src/block.rs
//! Blocks and block headers.

use crate::tx::Transaction;
use crate::Gas;
use cpc_crypto::sha256_hex;
use serde::{Deserialize, Serialize};

/// A block header. The header hash (the chain's block identifier) is the
/// SHA-256 of the plain string concatenation of the eleven fields below in
/// declaration order, which every implementation must reproduce byte for
/// byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block number, starting at 0 for genesis.
    pub height: u64,
    /// Hex hash of the previous block header; 64 zeros at genesis.
    pub prev_hash: String,
    /// Unix timestamp, strictly greater than the previous block's.
    pub timestamp: u64,
    /// Chain identifier, e.g. `cpc-devnet-1`.
    pub chain_id: String,
    /// Consensus address of the proposer (`cpcvalcons1...`).
    pub proposer_address: String,
    /// Slot rounds elapsed past the expected slot.
    #[serde(default)]
    pub round: u64,
    /// Merkle root of the transaction hashes.
    pub tx_root: String,
    /// Merkle root of account state after applying this block's
    /// transactions (rewards excluded).
    pub state_root: String,
    /// Merkle root of `SUBMIT_RESULT` payload hashes; empty when none.
    #[serde(default)]
    pub compute_root: String,
    /// Total gas consumed by the block's transactions.
    #[serde(default)]
    pub gas_used: Gas,
    /// The block's own gas limit.
    #[serde(default)]
    pub gas_limit: Gas,
}

impl BlockHeader {
    /// Computes the canonical header hash as lowercase hex.
    pub fn hash_hex(&self) -> String {
        let preimage = format!(
            "{}{}{}{}{}{}{}{}{}{}{}",
            self.height,
            self.prev_hash,
            self.timestamp,
            self.chain_id,
            self.proposer_address,
            self.round,
            self.tx_root,
            self.state_root,
            self.compute_root,
            self.gas_used,
            self.gas_limit
        );
        sha256_hex(preimage.as_bytes())
    }
}

/// A full block: header, transaction list and the proposer's signature over
/// the header hash under the PQ envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The block header.
    pub header: BlockHeader,
    /// Transactions in application order.
    pub txs: Vec<Transaction>,
    /// Hex-encoded signature over the header hash.
    #[serde(default)]
    pub pq_signature: String,
    /// Identifier of the signature scheme used.
    #[serde(default = "default_scheme_id")]
    pub pq_sig_scheme_id: u32,
}

fn default_scheme_id() -> u32 {
    1
}

impl Block {
    /// The block identifier: its header hash.
    pub fn hash_hex(&self) -> String {
        self.header.hash_hex()
    }
}
