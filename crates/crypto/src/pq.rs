// Path: crates/crypto/src/pq.rs
//! Post-quantum signature envelope.
//!
//! Blocks carry a `pq_sig_scheme_id` so the signature scheme can rotate
//! without changing the header format. Scheme 1 currently delegates to
//! ECDSA; public keys stay scheme-opaque byte strings end to end.

use crate::error::CryptoError;

/// Identifier of the active signature scheme, stored in every block.
pub const SCHEME_ID: u32 = 1;

/// Signs a message digest under the active PQ scheme.
pub fn sign(msg: &[u8], priv_bytes: &[u8]) -> Result<[u8; 64], CryptoError> {
    crate::sign::sign(msg, priv_bytes)
}

/// Verifies a PQ-envelope signature.
pub fn verify(msg: &[u8], sig: &[u8], pub_bytes: &[u8]) -> bool {
    crate::sign::verify(msg, sig, pub_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256;
    use crate::sign::{generate_private_key, public_key_from_private};

    #[test]
    fn envelope_round_trip() {
        let priv_key = generate_private_key();
        let pub_key = public_key_from_private(&priv_key).unwrap();
        let digest = sha256(b"header");
        let sig = sign(&digest, &priv_key).unwrap();
        assert!(verify(&digest, &sig, &pub_key));
        assert_eq!(SCHEME_ID, 1);
    }
}
