// Path: crates/state/src/engine.rs
//! The account/validator state engine.

use cpc_crypto::{address_from_pubkey, merkle_root, sha256, sha256_hex};
use cpc_storage::ChainStore;
use cpc_types::config::{base_gas, mul_rate};
use cpc_types::{
    Account, Amount, ComputeResult, Delegation, EconomicConfig, NetworkConfig,
    StateError, Transaction, TxError, TxType, Validator,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const ACCOUNT_PREFIX: &str = "acc:";
const VALIDATOR_PREFIX: &str = "val:";
const KEY_EPOCH_INDEX: &str = "epoch_index";
const KEY_TOTAL_MINTED: &str = "total_minted";
const KEY_TOTAL_BURNED: &str = "total_burned";

/// In-memory overlay over the persistent state table.
///
/// Reads fall through to the store; writes land in the overlay until
/// [`StateEngine::persist`] flushes them. [`StateEngine::clone_state`]
/// deep-copies the overlay (sharing only the store handle) so candidate
/// blocks can be trial-executed without touching live state.
#[derive(Clone)]
pub struct StateEngine {
    store: ChainStore,
    accounts: BTreeMap<String, Account>,
    validators: BTreeMap<String, Validator>,
    network: Arc<NetworkConfig>,
    economy: Arc<EconomicConfig>,
    /// Current epoch index; increments only at epoch boundaries.
    pub epoch_index: u64,
    /// Monotonic counter of all minted tokens.
    pub total_minted: Amount,
    /// Monotonic counter of all burned tokens.
    pub total_burned: Amount,
}

impl StateEngine {
    /// Creates an engine with an empty overlay on top of `store`.
    pub fn new(
        store: ChainStore,
        network: Arc<NetworkConfig>,
        economy: Arc<EconomicConfig>,
    ) -> Self {
        Self {
            store,
            accounts: BTreeMap::new(),
            validators: BTreeMap::new(),
            network,
            economy,
            epoch_index: 0,
            total_minted: 0,
            total_burned: 0,
        }
    }

    /// Deep copy for trial execution. The store handle is shared; every
    /// overlay entry and counter is copied.
    pub fn clone_state(&self) -> Self {
        self.clone()
    }

    /// Drops the overlay and resets counters; used before a rebuild.
    pub fn reset(&mut self) {
        self.accounts.clear();
        self.validators.clear();
        self.epoch_index = 0;
        self.total_minted = 0;
        self.total_burned = 0;
    }

    /// Returns the account at `address`, creating a zero account on first
    /// read.
    pub fn get_account(&self, address: &str) -> Result<Account, StateError> {
        if let Some(acc) = self.accounts.get(address) {
            return Ok(acc.clone());
        }
        if let Some(raw) = self
            .store
            .get_state(&format!("{ACCOUNT_PREFIX}{address}"))?
        {
            return serde_json::from_str(&raw).map_err(|e| StateError::Decode(e.to_string()));
        }
        Ok(Account::new(address))
    }

    /// Updates an account in the overlay.
    pub fn set_account(&mut self, account: Account) {
        self.accounts.insert(account.address.clone(), account);
    }

    /// Returns the validator at `address`, if registered.
    pub fn get_validator(&self, address: &str) -> Result<Option<Validator>, StateError> {
        if let Some(val) = self.validators.get(address) {
            return Ok(Some(val.clone()));
        }
        match self
            .store
            .get_state(&format!("{VALIDATOR_PREFIX}{address}"))?
        {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StateError::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    /// Updates a validator in the overlay.
    pub fn set_validator(&mut self, validator: Validator) {
        self.validators.insert(validator.address.clone(), validator);
    }

    /// Returns all validators, merging the store with the overlay.
    pub fn get_all_validators(&self) -> Result<Vec<Validator>, StateError> {
        let mut merged: BTreeMap<String, Validator> = BTreeMap::new();
        for (key, raw) in self.store.state_by_prefix(VALIDATOR_PREFIX)? {
            let addr = key.trim_start_matches(VALIDATOR_PREFIX).to_string();
            let val: Validator = serde_json::from_str(&raw)
                .map_err(|e| StateError::Decode(e.to_string()))?;
            merged.insert(addr, val);
        }
        for (addr, val) in &self.validators {
            merged.insert(addr.clone(), val.clone());
        }
        Ok(merged.into_values().collect())
    }

    /// Adds to the minted-token counter.
    pub fn mint(&mut self, amount: Amount) {
        self.total_minted += amount;
    }

    /// Adds to the burned-token counter.
    pub fn burn(&mut self, amount: Amount) {
        self.total_burned += amount;
    }

    /// Total circulating supply given the genesis premine.
    pub fn total_supply(&self, premine: Amount) -> Amount {
        premine + self.total_minted - self.total_burned
    }

    /// Writes every dirty overlay entry and the chain meta keys to storage.
    pub fn persist(&self) -> Result<(), StateError> {
        let mut entries: Vec<(String, String)> = Vec::new();
        for (addr, acc) in &self.accounts {
            let raw = serde_json::to_string(acc)
                .map_err(|e| StateError::Encode(e.to_string()))?;
            entries.push((format!("{ACCOUNT_PREFIX}{addr}"), raw));
        }
        for (addr, val) in &self.validators {
            let raw = serde_json::to_string(val)
                .map_err(|e| StateError::Encode(e.to_string()))?;
            entries.push((format!("{VALIDATOR_PREFIX}{addr}"), raw));
        }
        entries.push((KEY_EPOCH_INDEX.into(), self.epoch_index.to_string()));
        entries.push((KEY_TOTAL_MINTED.into(), self.total_minted.to_string()));
        entries.push((KEY_TOTAL_BURNED.into(), self.total_burned.to_string()));
        self.store
            .set_state_batch(entries.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
        Ok(())
    }

    /// Loads the persisted epoch index and mint/burn counters.
    pub fn load_meta(&mut self) -> Result<(), StateError> {
        if let Some(raw) = self.store.get_state(KEY_EPOCH_INDEX)? {
            self.epoch_index = raw
                .parse()
                .map_err(|e| StateError::Decode(format!("epoch_index: {e}")))?;
        }
        if let Some(raw) = self.store.get_state(KEY_TOTAL_MINTED)? {
            self.total_minted = raw
                .parse()
                .map_err(|e| StateError::Decode(format!("total_minted: {e}")))?;
        }
        if let Some(raw) = self.store.get_state(KEY_TOTAL_BURNED)? {
            self.total_burned = raw
                .parse()
                .map_err(|e| StateError::Decode(format!("total_burned: {e}")))?;
        }
        Ok(())
    }

    /// Applies one transaction. Either the entire transaction takes effect
    /// or none of it does: on any failure the overlay is restored to its
    /// pre-call content.
    ///
    /// `skip_crypto_check` is used by the proposer, which verified
    /// signatures on mempool admission already.
    pub fn apply_transaction(
        &mut self,
        tx: &Transaction,
        current_height: u64,
        skip_crypto_check: bool,
    ) -> Result<(), TxError> {
        let accounts_backup = self.accounts.clone();
        let validators_backup = self.validators.clone();
        let counters_backup = (self.total_minted, self.total_burned);
        match self.apply_inner(tx, current_height, skip_crypto_check) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.accounts = accounts_backup;
                self.validators = validators_backup;
                (self.total_minted, self.total_burned) = counters_backup;
                Err(e)
            }
        }
    }

    fn apply_inner(
        &mut self,
        tx: &Transaction,
        current_height: u64,
        skip_crypto_check: bool,
    ) -> Result<(), TxError> {
        // 0. Crypto verification
        if !skip_crypto_check {
            self.verify_tx_crypto(tx)?;
        }

        let mut sender = self.get_account(&tx.from)?;

        // 1. Nonce check. The exact wording of this error is a contract:
        // the proposer distinguishes future nonces by it.
        if tx.nonce != sender.nonce {
            return Err(TxError::InvalidNonce {
                expected: sender.nonce,
                got: tx.nonce,
            });
        }

        // 2. Gas and fee
        let base = base_gas(tx.tx_type);
        if tx.gas_limit < base {
            return Err(TxError::GasLimitTooLow {
                limit: tx.gas_limit,
                needed: base,
            });
        }
        if tx.gas_price < self.network.min_gas_price {
            return Err(TxError::GasPriceTooLow {
                price: tx.gas_price,
                min: self.network.min_gas_price,
            });
        }
        let needed_fee = base as Amount * tx.gas_price;
        if tx.fee < needed_fee {
            return Err(TxError::FeeTooLow {
                fee: tx.fee,
                needed: needed_fee,
            });
        }
        // The spent fee is exactly the needed fee; any excess in tx.fee is
        // ignored.
        let spent_fee = needed_fee;

        // 3. Total cost. UNSTAKE / UPDATE_VALIDATOR / UNDELEGATE move no
        // funds out of the sender; UNJAIL consumes its amount as the fee.
        let total_cost = match tx.tx_type {
            TxType::Unstake | TxType::UpdateValidator | TxType::Undelegate => spent_fee,
            _ => tx.amount + spent_fee,
        };
        if sender.balance < total_cost {
            return Err(TxError::InsufficientBalance {
                have: sender.balance,
                need: total_cost,
            });
        }

        // 4. Charge the sender
        sender.balance -= total_cost;
        sender.nonce += 1;
        self.set_account(sender);

        // 5. Dispatch by type
        match tx.tx_type {
            TxType::Transfer => self.apply_transfer(tx),
            TxType::Stake => self.apply_stake(tx, current_height),
            TxType::Unstake => self.apply_unstake(tx),
            TxType::Delegate => self.apply_delegate(tx, current_height),
            TxType::Undelegate => self.apply_undelegate(tx),
            TxType::UpdateValidator => self.apply_update_validator(tx),
            TxType::Unjail => self.apply_unjail(tx),
            TxType::SubmitResult => self.apply_submit_result(tx),
        }
    }

    fn verify_tx_crypto(&self, tx: &Transaction) -> Result<(), TxError> {
        if tx.signature.is_empty() || tx.pub_key.is_empty() {
            return Err(TxError::MissingCredentials);
        }
        let prefix = tx
            .from
            .split_once('1')
            .map(|(p, _)| p)
            .ok_or_else(|| TxError::InvalidKeyMaterial("no bech32 separator".into()))?;
        let pub_bytes = hex::decode(&tx.pub_key)
            .map_err(|e| TxError::InvalidKeyMaterial(e.to_string()))?;
        let derived = address_from_pubkey(&pub_bytes, prefix)
            .map_err(|e| TxError::InvalidKeyMaterial(e.to_string()))?;
        if derived != tx.from {
            return Err(TxError::PubKeyMismatch {
                derived,
                expected: tx.from.clone(),
            });
        }
        let digest = hex::decode(tx.hash_hex())
            .map_err(|e| TxError::InvalidKeyMaterial(e.to_string()))?;
        let sig = hex::decode(&tx.signature)
            .map_err(|e| TxError::InvalidKeyMaterial(e.to_string()))?;
        if !cpc_crypto::verify(&digest, &sig, &pub_bytes) {
            return Err(TxError::InvalidSignature);
        }
        Ok(())
    }

    /// Derives a validator's consensus address from a payload `pub_key`.
    fn validator_address_from_payload(&self, tx: &Transaction) -> Result<String, TxError> {
        let pub_key_hex = tx
            .payload_str("pub_key")
            .ok_or(TxError::MissingPayloadField("pub_key"))?;
        let pub_bytes = hex::decode(pub_key_hex)
            .map_err(|e| TxError::InvalidKeyMaterial(e.to_string()))?;
        address_from_pubkey(&pub_bytes, &self.network.bech32_prefix_cons)
            .map_err(|e| TxError::InvalidKeyMaterial(e.to_string()))
    }

    fn apply_transfer(&mut self, tx: &Transaction) -> Result<(), TxError> {
        let to = tx.to.as_deref().ok_or(TxError::MissingRecipient)?;
        let mut recipient = self.get_account(to)?;
        recipient.balance += tx.amount;
        self.set_account(recipient);
        Ok(())
    }

    fn apply_stake(&mut self, tx: &Transaction, current_height: u64) -> Result<(), TxError> {
        let pub_key_hex = tx
            .payload_str("pub_key")
            .ok_or(TxError::MissingPayloadField("pub_key"))?
            .to_string();
        let val_addr = self.validator_address_from_payload(tx)?;
        match self.get_validator(&val_addr)? {
            Some(mut val) => {
                val.power += tx.amount;
                val.self_stake += tx.amount;
                self.set_validator(val);
            }
            None => {
                // New validator: inactive until the next epoch rotation.
                let val = Validator::new(
                    val_addr,
                    pub_key_hex,
                    tx.amount,
                    tx.from.clone(),
                    current_height,
                );
                self.set_validator(val);
            }
        }
        Ok(())
    }

    fn apply_unstake(&mut self, tx: &Transaction) -> Result<(), TxError> {
        let val_addr = self.validator_address_from_payload(tx)?;
        let mut val = self
            .get_validator(&val_addr)?
            .ok_or_else(|| TxError::ValidatorNotFound(val_addr.clone()))?;

        if val.power < tx.amount {
            return Err(TxError::InsufficientStake {
                have: val.power,
                want: tx.amount,
            });
        }
        // Only self stake can be withdrawn; delegations leave via UNDELEGATE.
        if val.self_stake < tx.amount {
            return Err(TxError::InsufficientStake {
                have: val.self_stake,
                want: tx.amount,
            });
        }

        // A jailed validator pays a penalty on the way out; the penalty is
        // burned, not redistributed.
        let penalty = if val.is_jailed() {
            mul_rate(tx.amount, self.economy.unstake_penalty_rate)
        } else {
            0
        };
        let return_amount = tx.amount - penalty;

        val.power -= tx.amount;
        val.self_stake -= tx.amount;
        if val.power == 0 {
            val.is_active = false;
        }
        self.set_validator(val);

        let mut sender = self.get_account(&tx.from)?;
        sender.balance += return_amount;
        self.set_account(sender);

        if penalty > 0 {
            self.burn(penalty);
        }
        Ok(())
    }

    fn apply_delegate(&mut self, tx: &Transaction, current_height: u64) -> Result<(), TxError> {
        let val_addr = tx
            .payload_str("validator")
            .ok_or(TxError::MissingPayloadField("validator"))?
            .to_string();
        let mut val = self
            .get_validator(&val_addr)?
            .ok_or_else(|| TxError::ValidatorNotFound(val_addr.clone()))?;

        if tx.amount < self.network.min_delegation {
            return Err(TxError::DelegationBelowMinimum {
                amount: tx.amount,
                min: self.network.min_delegation,
            });
        }

        val.total_delegated += tx.amount;
        val.power += tx.amount;

        match val
            .delegations
            .iter_mut()
            .find(|d| d.delegator == tx.from)
        {
            Some(existing) => existing.amount += tx.amount,
            None => val.delegations.push(Delegation {
                delegator: tx.from.clone(),
                validator: val_addr,
                amount: tx.amount,
                created_height: current_height,
            }),
        }
        self.set_validator(val);
        Ok(())
    }

    fn apply_undelegate(&mut self, tx: &Transaction) -> Result<(), TxError> {
        let val_addr = tx
            .payload_str("validator")
            .ok_or(TxError::MissingPayloadField("validator"))?
            .to_string();
        let mut val = self
            .get_validator(&val_addr)?
            .ok_or_else(|| TxError::ValidatorNotFound(val_addr.clone()))?;

        let Some(pos) = val.delegations.iter().position(|d| d.delegator == tx.from)
        else {
            return Err(TxError::DelegationNotFound {
                delegator: tx.from.clone(),
                validator: val_addr,
            });
        };
        let Some(delegation) = val.delegations.get_mut(pos) else {
            return Err(TxError::DelegationNotFound {
                delegator: tx.from.clone(),
                validator: val_addr,
            });
        };
        if delegation.amount < tx.amount {
            return Err(TxError::InsufficientDelegation {
                have: delegation.amount,
                want: tx.amount,
            });
        }

        delegation.amount -= tx.amount;
        if delegation.amount == 0 {
            val.delegations.remove(pos);
        }
        val.total_delegated -= tx.amount;
        val.power -= tx.amount;
        self.set_validator(val);

        // The unbonding_delegations queue exists for a future timelock; the
        // current policy refunds immediately.
        let mut sender = self.get_account(&tx.from)?;
        sender.balance += tx.amount;
        self.set_account(sender);
        Ok(())
    }

    fn apply_update_validator(&mut self, tx: &Transaction) -> Result<(), TxError> {
        let val_addr = self.validator_address_from_payload(tx)?;
        let mut val = self
            .get_validator(&val_addr)?
            .ok_or_else(|| TxError::ValidatorNotFound(val_addr.clone()))?;

        if val.reward_address.as_deref() != Some(tx.from.as_str()) {
            return Err(TxError::NotValidatorOwner("update metadata"));
        }

        if let Some(name) = tx.payload_str("name") {
            if name.len() > 64 {
                return Err(TxError::MetadataTooLong {
                    field: "name",
                    max: 64,
                });
            }
            val.name = Some(name.to_string());
        }
        if let Some(website) = tx.payload_str("website") {
            if website.len() > 128 {
                return Err(TxError::MetadataTooLong {
                    field: "website",
                    max: 128,
                });
            }
            val.website = Some(website.to_string());
        }
        if let Some(description) = tx.payload_str("description") {
            if description.len() > 256 {
                return Err(TxError::MetadataTooLong {
                    field: "description",
                    max: 256,
                });
            }
            val.description = Some(description.to_string());
        }
        if let Some(rate) = tx.payload.get("commission_rate") {
            let rate = rate.as_f64().ok_or(TxError::InvalidCommission)?;
            if !(0.0..=1.0).contains(&rate) {
                return Err(TxError::InvalidCommission);
            }
            val.commission_rate = rate;
        }

        self.set_validator(val);
        Ok(())
    }

    fn apply_unjail(&mut self, tx: &Transaction) -> Result<(), TxError> {
        let val_addr = self.validator_address_from_payload(tx)?;
        let mut val = self
            .get_validator(&val_addr)?
            .ok_or_else(|| TxError::ValidatorNotFound(val_addr.clone()))?;

        if !val.is_jailed() {
            return Err(TxError::NotJailed(val_addr));
        }
        if val.reward_address.as_deref() != Some(tx.from.as_str()) {
            return Err(TxError::NotValidatorOwner("unjail"));
        }
        if tx.amount < self.economy.unjail_fee {
            return Err(TxError::UnjailFeeTooLow {
                need: self.economy.unjail_fee,
                got: tx.amount,
            });
        }

        val.jailed_until_height = 0;
        val.missed_blocks = 0;
        val.is_active = true;
        self.set_validator(val);

        // The unjail amount was already deducted from the sender; burn it.
        self.burn(tx.amount);
        debug!(validator = %tx.from, "validator released from jail");
        Ok(())
    }

    fn apply_submit_result(&mut self, tx: &Transaction) -> Result<(), TxError> {
        let value = serde_json::Value::Object(tx.payload.clone());
        let result: ComputeResult = serde_json::from_value(value)
            .map_err(|e| TxError::InvalidPayload(e.to_string()))?;
        if result.worker_address != tx.from {
            return Err(TxError::WorkerMismatch {
                payload: result.worker_address,
                sender: tx.from.clone(),
            });
        }
        // Proof verification is deferred; a structurally valid result with
        // the right worker is accepted as-is.
        Ok(())
    }

    /// Dumps every account as `address → serialized JSON`, merging the
    /// store with the overlay. Used to build snapshots.
    pub fn export_accounts(&self) -> Result<BTreeMap<String, String>, StateError> {
        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (key, raw) in self.store.state_by_prefix(ACCOUNT_PREFIX)? {
            merged.insert(key.trim_start_matches(ACCOUNT_PREFIX).to_string(), raw);
        }
        for (addr, acc) in &self.accounts {
            let raw = serde_json::to_string(acc)
                .map_err(|e| StateError::Encode(e.to_string()))?;
            merged.insert(addr.clone(), raw);
        }
        Ok(merged)
    }

    /// Dumps every validator as `address → serialized JSON`, merging the
    /// store with the overlay.
    pub fn export_validators(&self) -> Result<BTreeMap<String, String>, StateError> {
        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (key, raw) in self.store.state_by_prefix(VALIDATOR_PREFIX)? {
            merged.insert(key.trim_start_matches(VALIDATOR_PREFIX).to_string(), raw);
        }
        for (addr, val) in &self.validators {
            let raw = serde_json::to_string(val)
                .map_err(|e| StateError::Encode(e.to_string()))?;
            merged.insert(addr.clone(), raw);
        }
        Ok(merged)
    }

    /// Replaces the live state with a snapshot's content: accounts and
    /// validators are written through to storage, counters and the epoch
    /// index are restored, and the overlay is cleared.
    pub fn apply_snapshot(&mut self, snapshot: &cpc_types::Snapshot) -> Result<(), StateError> {
        // Entries are validated before anything is written.
        for raw in snapshot.accounts.values() {
            serde_json::from_str::<Account>(raw)
                .map_err(|e| StateError::Decode(e.to_string()))?;
        }
        for raw in snapshot.validators.values() {
            serde_json::from_str::<Validator>(raw)
                .map_err(|e| StateError::Decode(e.to_string()))?;
        }

        self.accounts.clear();
        self.validators.clear();
        let mut entries: Vec<(String, String)> = Vec::new();
        for (addr, raw) in &snapshot.accounts {
            entries.push((format!("{ACCOUNT_PREFIX}{addr}"), raw.clone()));
        }
        for (addr, raw) in &snapshot.validators {
            entries.push((format!("{VALIDATOR_PREFIX}{addr}"), raw.clone()));
        }
        self.epoch_index = snapshot.epoch_index;
        self.total_minted = snapshot.total_minted;
        self.total_burned = snapshot.total_burned;
        entries.push((KEY_EPOCH_INDEX.into(), self.epoch_index.to_string()));
        entries.push((KEY_TOTAL_MINTED.into(), self.total_minted.to_string()));
        entries.push((KEY_TOTAL_BURNED.into(), self.total_burned.to_string()));
        self.store
            .set_state_batch(entries.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
        Ok(())
    }

    /// Computes the Merkle root over all accounts, sorted by address.
    ///
    /// The leaf is `sha256(address || balance || nonce)`. Stake and
    /// delegation fields do not contribute; consensus on staking state is
    /// guaranteed by deterministic application order.
    pub fn compute_state_root(&self) -> Result<String, StateError> {
        let mut merged: BTreeMap<String, (Amount, u64)> = BTreeMap::new();
        for (key, raw) in self.store.state_by_prefix(ACCOUNT_PREFIX)? {
            let addr = key.trim_start_matches(ACCOUNT_PREFIX).to_string();
            let acc: Account = serde_json::from_str(&raw)
                .map_err(|e| StateError::Decode(e.to_string()))?;
            merged.insert(addr, (acc.balance, acc.nonce));
        }
        for (addr, acc) in &self.accounts {
            merged.insert(addr.clone(), (acc.balance, acc.nonce));
        }

        let leaves: Vec<[u8; 32]> = merged
            .iter()
            .map(|(addr, (balance, nonce))| {
                sha256(format!("{addr}{balance}{nonce}").as_bytes())
            })
            .collect();

        if leaves.is_empty() {
            return Ok(sha256_hex(b""));
        }
        Ok(hex::encode(merkle_root(&leaves)))
    }

    /// Credits every unbonding entry whose completion height has passed and
    /// removes it from its account's queue.
    pub fn process_unbonding_queue(&mut self, current_height: u64) -> Result<(), StateError> {
        let mut addresses: Vec<String> = self
            .store
            .state_by_prefix(ACCOUNT_PREFIX)?
            .into_keys()
            .map(|k| k.trim_start_matches(ACCOUNT_PREFIX).to_string())
            .collect();
        addresses.extend(self.accounts.keys().cloned());
        addresses.sort();
        addresses.dedup();

        for addr in addresses {
            let mut acc = self.get_account(&addr)?;
            if acc.unbonding_delegations.is_empty() {
                continue;
            }
            let (matured, pending): (Vec<_>, Vec<_>) = acc
                .unbonding_delegations
                .drain(..)
                .partition(|u| u.completion_height <= current_height);
            if matured.is_empty() {
                acc.unbonding_delegations = pending;
                continue;
            }
            let credited: Amount = matured.iter().map(|u| u.amount).sum();
            acc.balance += credited;
            acc.unbonding_delegations = pending;
            debug!(address = %addr, amount = credited, "unbonding entries matured");
            self.set_account(acc);
        }
        Ok(())
    }
}
