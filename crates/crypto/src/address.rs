// Path: crates/crypto/src/address.rs
//! Bech32 account and validator addresses.
//!
//! An address is `bech32(hrp, ripemd160(sha256(pubkey)))`. The human-readable
//! prefix distinguishes account (`cpc`), operator (`cpcvaloper`) and
//! consensus (`cpcvalcons`) addresses derived from the same key material.

use crate::error::CryptoError;
use crate::hash::{ripemd160, sha256};
use bech32::{FromBase32, ToBase32, Variant};

/// Derives the Bech32 address for a public key under the given prefix.
pub fn address_from_pubkey(pub_bytes: &[u8], prefix: &str) -> Result<String, CryptoError> {
    let h20 = ripemd160(&sha256(pub_bytes));
    bech32::encode(prefix, h20.to_base32(), Variant::Bech32)
        .map_err(|e| CryptoError::InvalidAddress(e.to_string()))
}

/// Decodes a Bech32 address into its prefix and 20-byte hash.
pub fn decode_address(addr: &str) -> Result<(String, Vec<u8>), CryptoError> {
    let (hrp, data, variant) =
        bech32::decode(addr).map_err(|e| CryptoError::InvalidAddress(e.to_string()))?;
    if variant != Variant::Bech32 {
        return Err(CryptoError::InvalidAddress(
            "expected bech32 (not bech32m) encoding".into(),
        ));
    }
    let bytes = Vec::<u8>::from_base32(&data)
        .map_err(|e| CryptoError::InvalidAddress(e.to_string()))?;
    Ok((hrp, bytes))
}

/// Checks whether `addr` is a well-formed address, optionally under an
/// expected prefix.
pub fn is_valid_address(addr: &str, expected_prefix: Option<&str>) -> bool {
    match decode_address(addr) {
        Ok((hrp, _)) => expected_prefix.map(|p| hrp == p).unwrap_or(true),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sign::{generate_private_key, public_key_from_private};

    #[test]
    fn address_round_trip() {
        let priv_key = generate_private_key();
        let pub_key = public_key_from_private(&priv_key).unwrap();
        let addr = address_from_pubkey(&pub_key, "cpc").unwrap();
        assert!(addr.starts_with("cpc1"));

        let (hrp, h20) = decode_address(&addr).unwrap();
        assert_eq!(hrp, "cpc");
        assert_eq!(h20, ripemd160(&sha256(&pub_key)).to_vec());
    }

    #[test]
    fn prefixes_produce_distinct_addresses() {
        let priv_key = generate_private_key();
        let pub_key = public_key_from_private(&priv_key).unwrap();
        let acc = address_from_pubkey(&pub_key, "cpc").unwrap();
        let cons = address_from_pubkey(&pub_key, "cpcvalcons").unwrap();
        assert_ne!(acc, cons);
        assert!(is_valid_address(&acc, Some("cpc")));
        assert!(is_valid_address(&cons, Some("cpcvalcons")));
        assert!(!is_valid_address(&acc, Some("cpcvalcons")));
    }

    #[test]
    fn rejects_garbage() {
        assert!(!is_valid_address("not-an-address", None));
        assert!(decode_address("cpc1qqqq").is_err());
    }
}
