// Path: crates/types/src/tx.rs
//! Transactions: the fixed enumerated operation set of the chain.

use crate::{Amount, Gas};
use cpc_crypto::{sha256_hex, CryptoError};
use serde::{Deserialize, Serialize};

/// The enumerated transaction types. There is no VM; this set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    /// Move funds between accounts.
    Transfer,
    /// Register a validator or add self-stake.
    Stake,
    /// Withdraw self-stake from a validator.
    Unstake,
    /// Bond funds to an existing validator.
    Delegate,
    /// Release a bond from a validator.
    Undelegate,
    /// Edit validator metadata and commission.
    UpdateValidator,
    /// Pay the fixed fee for early release from jail.
    Unjail,
    /// Record a structured compute-result payload.
    SubmitResult,
}

impl TxType {
    /// The canonical wire name, as used in the hash preimage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transfer => "TRANSFER",
            Self::Stake => "STAKE",
            Self::Unstake => "UNSTAKE",
            Self::Delegate => "DELEGATE",
            Self::Undelegate => "UNDELEGATE",
            Self::UpdateValidator => "UPDATE_VALIDATOR",
            Self::Unjail => "UNJAIL",
            Self::SubmitResult => "SUBMIT_RESULT",
        }
    }
}

/// A signed transaction.
///
/// The hash domain is the UTF-8 concatenation of type, sender, recipient
/// (empty when absent), amount, fee, nonce and public key; the signature is
/// over that hash. Gas fields and payload are validated during application
/// but do not enter the hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// The operation this transaction performs.
    #[serde(rename = "type")]
    pub tx_type: TxType,
    /// Sender account address.
    pub from: String,
    /// Recipient address; `None` for operations without one.
    #[serde(default)]
    pub to: Option<String>,
    /// Amount in minimal units; meaning depends on `tx_type`.
    pub amount: Amount,
    /// Offered fee. The spent fee is exactly `base_gas * gas_price`; any
    /// excess is ignored.
    #[serde(default)]
    pub fee: Amount,
    /// Sender nonce; must equal the account nonce exactly.
    pub nonce: u64,
    /// Offered gas price in minimal units per gas unit.
    #[serde(default)]
    pub gas_price: Amount,
    /// Declared gas limit; must cover the type's base gas.
    #[serde(default)]
    pub gas_limit: Gas,
    /// Type-specific attributes (validator keys, compute results, ...).
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// Hex-encoded compressed public key of the sender.
    #[serde(default)]
    pub pub_key: String,
    /// Hex-encoded 64-byte signature over the transaction hash.
    #[serde(default)]
    pub signature: String,
    /// Client-side creation time (unix seconds); informational only.
    #[serde(default)]
    pub timestamp: u64,
}

impl Transaction {
    /// Computes the transaction hash as a lowercase hex string.
    pub fn hash_hex(&self) -> String {
        let to = self.to.as_deref().unwrap_or("");
        let preimage = format!(
            "{}{}{}{}{}{}{}",
            self.tx_type.as_str(),
            self.from,
            to,
            self.amount,
            self.fee,
            self.nonce,
            self.pub_key
        );
        sha256_hex(preimage.as_bytes())
    }

    /// Signs the transaction hash in place with the given private key.
    pub fn sign(&mut self, priv_bytes: &[u8]) -> Result<(), CryptoError> {
        let digest = hex::decode(self.hash_hex())?;
        let sig = cpc_crypto::sign(&digest, priv_bytes)?;
        self.signature = hex::encode(sig);
        Ok(())
    }

    /// Fetches a required string field from the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpc_crypto::{
        address_from_pubkey, generate_private_key, public_key_from_private, verify,
    };

    fn sample_tx() -> (Transaction, Vec<u8>) {
        let priv_key = generate_private_key();
        let pub_key = public_key_from_private(&priv_key).unwrap();
        let from = address_from_pubkey(&pub_key, "cpc").unwrap();
        let tx = Transaction {
            tx_type: TxType::Transfer,
            from,
            to: Some("cpc1recipient".into()),
            amount: 100,
            fee: 21_000_000,
            nonce: 0,
            gas_price: 1000,
            gas_limit: 21_000,
            payload: serde_json::Map::new(),
            pub_key: hex::encode(&pub_key),
            signature: String::new(),
            timestamp: 0,
        };
        (tx, priv_key.to_vec())
    }

    #[test]
    fn hash_ignores_gas_and_payload() {
        let (mut tx, _) = sample_tx();
        let h1 = tx.hash_hex();
        tx.gas_limit = 99_999;
        tx.payload
            .insert("k".into(), serde_json::Value::String("v".into()));
        assert_eq!(tx.hash_hex(), h1);
    }

    #[test]
    fn hash_covers_core_fields() {
        let (mut tx, _) = sample_tx();
        let h1 = tx.hash_hex();
        tx.amount += 1;
        assert_ne!(tx.hash_hex(), h1);
    }

    #[test]
    fn sign_produces_verifiable_signature() {
        let (mut tx, priv_key) = sample_tx();
        tx.sign(&priv_key).unwrap();
        let digest = hex::decode(tx.hash_hex()).unwrap();
        let sig = hex::decode(&tx.signature).unwrap();
        let pub_key = hex::decode(&tx.pub_key).unwrap();
        assert!(verify(&digest, &sig, &pub_key));
    }

    #[test]
    fn tx_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&TxType::UpdateValidator).unwrap(),
            "\"UPDATE_VALIDATOR\""
        );
        let t: TxType = serde_json::from_str("\"SUBMIT_RESULT\"").unwrap();
        assert_eq!(t, TxType::SubmitResult);
    }
}
