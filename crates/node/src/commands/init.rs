// Path: crates/node/src/commands/init.rs
//! `cpc-node init`: scaffold the data directory, validator key, faucet key
//! and a local genesis file.

use anyhow::{anyhow, Context, Result};
use clap::Args;
use cpc_crypto::{address_from_pubkey, generate_private_key, public_key_from_private};
use cpc_types::config::DECIMALS;
use cpc_types::{GenesisFile, GenesisValidator, NetworkConfig};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing genesis file.
    #[clap(long)]
    pub force: bool,
}

pub fn run(datadir: &Path, network: &str, args: InitArgs) -> Result<()> {
    let config = NetworkConfig::named(network)
        .ok_or_else(|| anyhow!("unknown network profile: {network}"))?;
    fs::create_dir_all(datadir).context("creating data directory")?;

    // Validator key
    let key_path = datadir.join("validator_key.hex");
    let val_priv = if key_path.exists() {
        println!("Validator key already exists at {}", key_path.display());
        hex::decode(fs::read_to_string(&key_path)?.trim())?
    } else {
        let priv_key = generate_private_key();
        fs::write(&key_path, hex::encode(priv_key))?;
        println!("Generated new validator key.");
        priv_key.to_vec()
    };
    let val_pub = public_key_from_private(&val_priv)?;
    let val_addr = address_from_pubkey(&val_pub, &config.bech32_prefix_cons)?;
    println!("Validator address: {val_addr}");
    println!("Validator pubkey:  {}", hex::encode(&val_pub));

    // Faucet / premine key (deterministic on devnet so local tooling can
    // always spend the premine).
    let faucet_path = datadir.join("faucet_key.hex");
    let faucet_priv = if faucet_path.exists() {
        hex::decode(fs::read_to_string(&faucet_path)?.trim())?
    } else {
        let priv_key = match &config.faucet_priv_key {
            Some(hex_key) => {
                println!("Using deterministic {network} faucet key.");
                hex::decode(hex_key)?
            }
            None => generate_private_key().to_vec(),
        };
        fs::write(&faucet_path, hex::encode(&priv_key))?;
        priv_key
    };
    let faucet_pub = public_key_from_private(&faucet_priv)?;
    let faucet_addr = address_from_pubkey(&faucet_pub, &config.bech32_prefix_acc)?;
    println!("Faucet address: {faucet_addr} (holds the premine, keep the key!)");

    // Genesis
    let genesis_path = datadir.join("genesis.json");
    if genesis_path.exists() && !args.force {
        println!(
            "Genesis already exists at {} (use --force to overwrite)",
            genesis_path.display()
        );
        return Ok(());
    }
    let genesis_stake = 2000 * DECIMALS;
    let mut genesis = GenesisFile {
        genesis_time: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        ..Default::default()
    };
    genesis.alloc.insert(faucet_addr, config.genesis_premine);
    genesis.validators.push(GenesisValidator {
        address: val_addr,
        pq_pub_key: hex::encode(&val_pub),
        power: genesis_stake,
        is_active: true,
        reward_address: None,
    });
    fs::write(&genesis_path, serde_json::to_string_pretty(&genesis)?)?;
    println!("Wrote genesis to {}", genesis_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_scaffolds_keys_and_genesis() {
        let dir = tempdir().unwrap();
        run(dir.path(), "devnet", InitArgs { force: false }).unwrap();

        assert!(dir.path().join("validator_key.hex").exists());
        assert!(dir.path().join("faucet_key.hex").exists());
        let genesis: GenesisFile = serde_json::from_str(
            &fs::read_to_string(dir.path().join("genesis.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(genesis.validators.len(), 1);
        assert!(genesis.validators[0].is_active);
        assert_eq!(genesis.alloc.len(), 1);
        assert!(genesis.genesis_time > 0);

        // Re-running is idempotent for keys.
        let key_before = fs::read_to_string(dir.path().join("validator_key.hex")).unwrap();
        run(dir.path(), "devnet", InitArgs { force: false }).unwrap();
        let key_after = fs::read_to_string(dir.path().join("validator_key.hex")).unwrap();
        assert_eq!(key_before, key_after);
    }

    #[test]
    fn unknown_network_fails() {
        let dir = tempdir().unwrap();
        assert!(run(dir.path(), "nonet", InitArgs { force: false }).is_err());
    }
}
