// Path: crates/types/src/error.rs
//! Domain error types shared across the workspace.
//!
//! Every error enum implements [`ErrorCode`], assigning a stable,
//! machine-readable string to each variant so peers and operators can match
//! on failures without parsing display text.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors raised while validating or applying a single transaction.
#[derive(Debug, Error)]
pub enum TxError {
    /// The transaction carries no signature or public key.
    #[error("missing signature or pub_key")]
    MissingCredentials,
    /// The public key does not derive to the sender address.
    #[error("pub_key mismatch: derived {derived}, expected {expected}")]
    PubKeyMismatch {
        /// Address derived from the supplied public key.
        derived: String,
        /// The `from` address claimed by the transaction.
        expected: String,
    },
    /// The sender address or key material could not be decoded.
    #[error("invalid address format or key: {0}")]
    InvalidKeyMaterial(String),
    /// The ECDSA signature does not verify against the transaction hash.
    #[error("invalid signature")]
    InvalidSignature,
    /// The transaction nonce does not match the sender's account nonce.
    ///
    /// The proposer path distinguishes future nonces (kept in the mempool)
    /// from stale ones (evicted) by inspecting `expected` and `got`.
    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce {
        /// The sender account's current nonce.
        expected: u64,
        /// The nonce carried by the transaction.
        got: u64,
    },
    /// `gas_limit` is below the base cost of this transaction type.
    #[error("gas_limit {limit} too low (need {needed})")]
    GasLimitTooLow {
        /// The declared gas limit.
        limit: u64,
        /// The base gas of the transaction type.
        needed: u64,
    },
    /// `gas_price` is below the network minimum.
    #[error("gas_price {price} below minimum {min}")]
    GasPriceTooLow {
        /// The declared gas price.
        price: u128,
        /// The network minimum gas price.
        min: u128,
    },
    /// `fee` does not cover `base_gas * gas_price`.
    #[error("fee {fee} too low (need {needed})")]
    FeeTooLow {
        /// The declared fee.
        fee: u128,
        /// The required fee.
        needed: u128,
    },
    /// The sender cannot cover amount plus fee.
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance {
        /// The sender's balance.
        have: u128,
        /// The total cost of the transaction.
        need: u128,
    },
    /// A `TRANSFER` without a recipient.
    #[error("transfer must have a to address")]
    MissingRecipient,
    /// A required payload field is absent.
    #[error("payload must provide '{0}'")]
    MissingPayloadField(&'static str),
    /// The payload could not be interpreted for this transaction type.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// The referenced validator does not exist.
    #[error("validator {0} not found")]
    ValidatorNotFound(String),
    /// Unstaking more than the validator's power.
    #[error("insufficient stake: validator has {have}, trying to unstake {want}")]
    InsufficientStake {
        /// The validator's current power.
        have: u128,
        /// The amount requested.
        want: u128,
    },
    /// A metadata field exceeds its length bound.
    #[error("{field} too long (max {max} chars)")]
    MetadataTooLong {
        /// The offending field name.
        field: &'static str,
        /// The maximum permitted length.
        max: usize,
    },
    /// Commission must lie within [0, 1].
    #[error("commission rate must be between 0.0 and 1.0")]
    InvalidCommission,
    /// Only the registered reward address may perform this operation.
    #[error("only the validator owner can {0}")]
    NotValidatorOwner(&'static str),
    /// Delegating less than the network minimum.
    #[error("delegation amount {amount} below minimum {min}")]
    DelegationBelowMinimum {
        /// The offered amount.
        amount: u128,
        /// The network minimum delegation.
        min: u128,
    },
    /// No delegation exists for this (delegator, validator) pair.
    #[error("no delegation found from {delegator} to {validator}")]
    DelegationNotFound {
        /// The delegator address.
        delegator: String,
        /// The validator address.
        validator: String,
    },
    /// Undelegating more than is delegated.
    #[error("insufficient delegation: have {have}, trying to undelegate {want}")]
    InsufficientDelegation {
        /// The delegated amount.
        have: u128,
        /// The amount requested.
        want: u128,
    },
    /// Unjailing a validator that is not jailed.
    #[error("validator {0} is not jailed")]
    NotJailed(String),
    /// The unjail fee offered is below the fixed fee.
    #[error("insufficient unjail fee: need {need}, got {got}")]
    UnjailFeeTooLow {
        /// The required unjail fee.
        need: u128,
        /// The amount offered.
        got: u128,
    },
    /// A `SUBMIT_RESULT` payload whose worker is not the sender.
    #[error("worker address mismatch: payload {payload} vs tx {sender}")]
    WorkerMismatch {
        /// The worker address named by the payload.
        payload: String,
        /// The transaction sender.
        sender: String,
    },
    /// The state backend failed while applying the transaction.
    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl ErrorCode for TxError {
    fn code(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "TX_MISSING_CREDENTIALS",
            Self::PubKeyMismatch { .. } => "TX_PUBKEY_MISMATCH",
            Self::InvalidKeyMaterial(_) => "TX_INVALID_KEY",
            Self::InvalidSignature => "TX_INVALID_SIGNATURE",
            Self::InvalidNonce { .. } => "TX_INVALID_NONCE",
            Self::GasLimitTooLow { .. } => "TX_GAS_LIMIT_TOO_LOW",
            Self::GasPriceTooLow { .. } => "TX_GAS_PRICE_TOO_LOW",
            Self::FeeTooLow { .. } => "TX_FEE_TOO_LOW",
            Self::InsufficientBalance { .. } => "TX_INSUFFICIENT_BALANCE",
            Self::MissingRecipient => "TX_MISSING_RECIPIENT",
            Self::MissingPayloadField(_) => "TX_MISSING_PAYLOAD_FIELD",
            Self::InvalidPayload(_) => "TX_INVALID_PAYLOAD",
            Self::ValidatorNotFound(_) => "TX_VALIDATOR_NOT_FOUND",
            Self::InsufficientStake { .. } => "TX_INSUFFICIENT_STAKE",
            Self::MetadataTooLong { .. } => "TX_METADATA_TOO_LONG",
            Self::InvalidCommission => "TX_INVALID_COMMISSION",
            Self::NotValidatorOwner(_) => "TX_NOT_VALIDATOR_OWNER",
            Self::DelegationBelowMinimum { .. } => "TX_DELEGATION_BELOW_MIN",
            Self::DelegationNotFound { .. } => "TX_DELEGATION_NOT_FOUND",
            Self::InsufficientDelegation { .. } => "TX_INSUFFICIENT_DELEGATION",
            Self::NotJailed(_) => "TX_NOT_JAILED",
            Self::UnjailFeeTooLow { .. } => "TX_UNJAIL_FEE_TOO_LOW",
            Self::WorkerMismatch { .. } => "TX_WORKER_MISMATCH",
            Self::State(_) => "TX_STATE_ERROR",
        }
    }
}

impl TxError {
    /// True when this is a nonce error whose nonce lies in the future, i.e.
    /// the transaction may become valid once the gap fills. The proposer
    /// keeps such transactions in the mempool instead of evicting them.
    pub fn is_future_nonce(&self) -> bool {
        matches!(self, Self::InvalidNonce { expected, got } if got > expected)
    }
}

/// Errors related to the state engine or its backing store.
#[derive(Debug, Error)]
pub enum StateError {
    /// An error occurred in the storage backend.
    #[error("state backend error: {0}")]
    Backend(String),
    /// A stored entry could not be deserialized.
    #[error("decode error: {0}")]
    Decode(String),
    /// A value could not be serialized for storage.
    #[error("encode error: {0}")]
    Encode(String),
}

impl ErrorCode for StateError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STATE_BACKEND_ERROR",
            Self::Decode(_) => "STATE_DECODE_ERROR",
            Self::Encode(_) => "STATE_ENCODE_ERROR",
        }
    }
}

impl From<StorageError> for StateError {
    fn from(e: StorageError) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Errors raised by the embedded key-value store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The storage backend reported a failure.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A stored value was not valid UTF-8 / JSON.
    #[error("storage decode error: {0}")]
    Decode(String),
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "STORAGE_BACKEND_ERROR",
            Self::Decode(_) => "STORAGE_DECODE_ERROR",
        }
    }
}

/// Errors related to block validation and application.
#[derive(Debug, Error)]
pub enum BlockError {
    /// The block's height does not extend the current tip.
    #[error("invalid height: expected {expected}, got {got}")]
    InvalidHeight {
        /// The height that would extend the chain.
        expected: i64,
        /// The height of the received block.
        got: i64,
    },
    /// The block's `prev_hash` does not match the tip hash.
    #[error("invalid prev_hash: expected {expected}, got {got}")]
    MismatchedPrevHash {
        /// The hash of the current tip.
        expected: String,
        /// The `prev_hash` carried by the block.
        got: String,
    },
    /// The block's timestamp does not strictly increase.
    #[error("invalid timestamp: must be > {last}")]
    TimestampNotIncreasing {
        /// The timestamp of the previous block.
        last: u64,
    },
    /// The block's timestamp is too far ahead of wall-clock time.
    #[error("block timestamp too far in future: {ts} > now+{drift}s")]
    TimestampInFuture {
        /// The offending timestamp.
        ts: u64,
        /// The permitted drift in seconds.
        drift: u64,
    },
    /// The proposer is not the expected one for this (height, round).
    #[error("invalid proposer for round {round}: expected {expected}, got {got}")]
    InvalidProposer {
        /// The inferred round.
        round: u64,
        /// The address the selector expected.
        expected: String,
        /// The address in the header.
        got: String,
    },
    /// No proposer could be determined although validators exist.
    #[error("could not determine expected proposer")]
    NoProposer,
    /// The block signature is missing or does not verify.
    #[error("block signature verification failed: {0}")]
    InvalidSignature(String),
    /// A transaction inside the block failed to apply.
    #[error("transaction {hash} failed: {source}")]
    TxFailed {
        /// Hash of the offending transaction.
        hash: String,
        /// The underlying transaction error.
        #[source]
        source: TxError,
    },
    /// Declared `gas_used` does not match the re-executed total.
    #[error("gas used mismatch: expected {expected}, calculated {calculated}")]
    GasUsedMismatch {
        /// Gas declared by the header.
        expected: u64,
        /// Gas accumulated during simulation.
        calculated: u64,
    },
    /// The header's gas limit exceeds the network maximum.
    #[error("block gas limit exceeds network max: {limit} > {max}")]
    GasLimitExceedsNetwork {
        /// The header's gas limit.
        limit: u64,
        /// The network block gas limit.
        max: u64,
    },
    /// Gas used exceeds the block's own gas limit.
    #[error("gas used exceeds block limit: {used} > {limit}")]
    GasOverLimit {
        /// Gas consumed.
        used: u64,
        /// The block gas limit.
        limit: u64,
    },
    /// The recomputed state root differs from the header's.
    #[error("state root mismatch: expected {expected}, got {got}")]
    StateRootMismatch {
        /// Root from the header.
        expected: String,
        /// Root recomputed from simulation.
        got: String,
    },
    /// The recomputed compute root differs from the header's.
    #[error("compute root mismatch: expected {expected}, got {got}")]
    ComputeRootMismatch {
        /// Root from the header.
        expected: String,
        /// Root recomputed from the block's transactions.
        got: String,
    },
    /// A block is missing from storage during replay.
    #[error("missing block {0} during rebuild")]
    MissingBlock(u64),
    /// The storage layer failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    /// The state engine failed.
    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl ErrorCode for BlockError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidHeight { .. } => "BLOCK_INVALID_HEIGHT",
            Self::MismatchedPrevHash { .. } => "BLOCK_MISMATCHED_PREV_HASH",
            Self::TimestampNotIncreasing { .. } => "BLOCK_TIMESTAMP_NOT_INCREASING",
            Self::TimestampInFuture { .. } => "BLOCK_TIMESTAMP_IN_FUTURE",
            Self::InvalidProposer { .. } => "BLOCK_INVALID_PROPOSER",
            Self::NoProposer => "BLOCK_NO_PROPOSER",
            Self::InvalidSignature(_) => "BLOCK_INVALID_SIGNATURE",
            Self::TxFailed { .. } => "BLOCK_TX_FAILED",
            Self::GasUsedMismatch { .. } => "BLOCK_GAS_USED_MISMATCH",
            Self::GasLimitExceedsNetwork { .. } => "BLOCK_GAS_LIMIT_EXCEEDS_NETWORK",
            Self::GasOverLimit { .. } => "BLOCK_GAS_OVER_LIMIT",
            Self::StateRootMismatch { .. } => "BLOCK_STATE_ROOT_MISMATCH",
            Self::ComputeRootMismatch { .. } => "BLOCK_COMPUTE_ROOT_MISMATCH",
            Self::MissingBlock(_) => "BLOCK_MISSING",
            Self::Storage(_) => "BLOCK_STORAGE_ERROR",
            Self::State(_) => "BLOCK_STATE_ERROR",
        }
    }
}

/// Errors related to the consensus selector.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// No active validators are registered.
    #[error("validator set is empty")]
    EmptyValidatorSet,
}

impl ErrorCode for ConsensusError {
    fn code(&self) -> &'static str {
        match self {
            Self::EmptyValidatorSet => "CONSENSUS_EMPTY_SET",
        }
    }
}

/// Errors raised while admitting transactions to the mempool.
#[derive(Debug, Error)]
pub enum MempoolError {
    /// The transaction is already pooled.
    #[error("already in pool")]
    AlreadyInPool,
    /// The pool reached its size bound.
    #[error("mempool full")]
    PoolFull,
    /// The sender reached its per-account transaction cap.
    #[error("sender {0} exceeded per-account limit")]
    SenderLimitExceeded(String),
    /// Stateless validation failed.
    #[error(transparent)]
    Invalid(#[from] TxError),
}

impl ErrorCode for MempoolError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyInPool => "MEMPOOL_DUPLICATE",
            Self::PoolFull => "MEMPOOL_FULL",
            Self::SenderLimitExceeded(_) => "MEMPOOL_SENDER_LIMIT",
            Self::Invalid(_) => "MEMPOOL_INVALID_TX",
        }
    }
}

/// Errors related to snapshot creation and loading.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The snapshot system is disabled on this node.
    #[error("snapshot system not enabled")]
    Disabled,
    /// No snapshot exists at the requested height.
    #[error("snapshot at height {0} not found")]
    NotFound(u64),
    /// The embedded self-hash does not match the content.
    #[error("snapshot at height {0} failed hash verification")]
    HashMismatch(u64),
    /// The snapshot was taken on a different network.
    #[error("snapshot network mismatch: expected {expected}, got {got}")]
    NetworkMismatch {
        /// The local network id.
        expected: String,
        /// The network id inside the snapshot.
        got: String,
    },
    /// Reading or writing the snapshot file failed.
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    /// The snapshot content could not be (de)serialized.
    #[error("snapshot codec error: {0}")]
    Codec(String),
}

impl ErrorCode for SnapshotError {
    fn code(&self) -> &'static str {
        match self {
            Self::Disabled => "SNAPSHOT_DISABLED",
            Self::NotFound(_) => "SNAPSHOT_NOT_FOUND",
            Self::HashMismatch(_) => "SNAPSHOT_HASH_MISMATCH",
            Self::NetworkMismatch { .. } => "SNAPSHOT_NETWORK_MISMATCH",
            Self::Io(_) => "SNAPSHOT_IO_ERROR",
            Self::Codec(_) => "SNAPSHOT_CODEC_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_error_renders_structured_message() {
        let err = TxError::InvalidNonce {
            expected: 3,
            got: 7,
        };
        assert_eq!(err.to_string(), "invalid nonce: expected 3, got 7");
        assert!(err.is_future_nonce());

        let stale = TxError::InvalidNonce {
            expected: 7,
            got: 3,
        };
        assert!(!stale.is_future_nonce());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            TxError::InvalidSignature.code(),
            "TX_INVALID_SIGNATURE"
        );
        assert_eq!(
            BlockError::InvalidHeight {
                expected: 5,
                got: 9
            }
            .code(),
            "BLOCK_INVALID_HEIGHT"
        );
    }
}
