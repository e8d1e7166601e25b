// Path: crates/crypto/src/sign.rs
//! secp256k1 ECDSA key handling and fixed-width signatures.
//!
//! Signatures are the 64-byte `r || s` concatenation over a 32-byte message
//! digest; public keys travel as 33-byte SEC1 compressed points. Signing is
//! deterministic (RFC 6979), so the same key and digest always produce the
//! same bytes.

use crate::error::CryptoError;
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

/// Generates a random 32-byte private key.
pub fn generate_private_key() -> [u8; 32] {
    let key = SigningKey::random(&mut OsRng);
    key.to_bytes().into()
}

/// Derives the 33-byte compressed public key from a private key.
pub fn public_key_from_private(priv_bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key =
        SigningKey::from_slice(priv_bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
    Ok(key
        .verifying_key()
        .to_encoded_point(true)
        .as_bytes()
        .to_vec())
}

/// Signs a 32-byte message digest. Returns the 64-byte `r || s` signature.
pub fn sign(message_hash: &[u8], priv_bytes: &[u8]) -> Result<[u8; 64], CryptoError> {
    let key =
        SigningKey::from_slice(priv_bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
    let signature: Signature = key
        .sign_prehash(message_hash)
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    let mut out = [0u8; 64];
    out.copy_from_slice(&signature.to_bytes());
    Ok(out)
}

/// Verifies a 64-byte signature over a 32-byte message digest.
///
/// Returns `false` for malformed keys or signatures instead of erroring, so
/// callers can treat every failure mode as "not valid".
pub fn verify(message_hash: &[u8], signature: &[u8], pub_bytes: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_sec1_bytes(pub_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify_prehash(message_hash, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256;

    #[test]
    fn sign_verify_round_trip() {
        let priv_key = generate_private_key();
        let pub_key = public_key_from_private(&priv_key).unwrap();
        assert_eq!(pub_key.len(), 33);

        let digest = sha256(b"payload");
        let sig = sign(&digest, &priv_key).unwrap();
        assert!(verify(&digest, &sig, &pub_key));
    }

    #[test]
    fn verify_rejects_wrong_digest() {
        let priv_key = generate_private_key();
        let pub_key = public_key_from_private(&priv_key).unwrap();
        let sig = sign(&sha256(b"payload"), &priv_key).unwrap();
        assert!(!verify(&sha256(b"other"), &sig, &pub_key));
    }

    #[test]
    fn verify_rejects_garbage_inputs() {
        let digest = sha256(b"payload");
        assert!(!verify(&digest, &[0u8; 64], &[0u8; 33]));
        assert!(!verify(&digest, &[], &[]));
    }

    #[test]
    fn signing_is_deterministic() {
        let priv_key = generate_private_key();
        let digest = sha256(b"payload");
        assert_eq!(
            sign(&digest, &priv_key).unwrap(),
            sign(&digest, &priv_key).unwrap()
        );
    }
}
