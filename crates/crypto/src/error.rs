// Path: crates/crypto/src/error.rs
//! Error type shared by the crypto primitives.

use thiserror::Error;

/// Errors raised by key handling, signing and address codecs.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The provided private key bytes do not form a valid scalar.
    #[error("invalid private key")]
    InvalidPrivateKey,
    /// The provided public key bytes are not a valid SEC1 point.
    #[error("invalid public key")]
    InvalidPublicKey,
    /// A signature could not be parsed or produced.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    /// A Bech32 address failed to encode or decode.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Hex input could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}
