// Path: crates/types/src/compute.rs
//! The structured payload recorded by `SUBMIT_RESULT` transactions.

use serde::{Deserialize, Serialize};

/// A compute-result submission. Only the shape and the worker address are
/// validated on-chain; proof verification is deferred to a later phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeResult {
    /// Identifier of the task this result answers.
    pub task_id: String,
    /// Address of the worker that produced the result; must equal the
    /// transaction sender.
    pub worker_address: String,
    /// Hash of the result content.
    pub result_hash: String,
    /// Opaque proof blob (unverified in this version).
    #[serde(default)]
    pub proof: String,
    /// Worker-side nonce.
    #[serde(default)]
    pub nonce: u64,
    /// Worker signature over the result (unverified in this version).
    #[serde(default)]
    pub signature: String,
}
