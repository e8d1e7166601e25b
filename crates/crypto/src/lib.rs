// Path: crates/crypto/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]

//! Cryptographic primitives for ComputeChain: SHA-256 / RIPEMD-160 hashing,
//! Merkle roots, secp256k1 ECDSA keys and signatures, Bech32 addresses and
//! the post-quantum signature envelope.

pub mod address;
pub mod error;
pub mod hash;
pub mod pq;
pub mod sign;

pub use address::{address_from_pubkey, decode_address, is_valid_address};
pub use error::CryptoError;
pub use hash::{merkle_root, ripemd160, sha256, sha256_hex};
pub use sign::{generate_private_key, public_key_from_private, sign, verify};
