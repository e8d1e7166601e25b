// Path: crates/types/src/codec.rs
//! Canonical JSON codec for all consensus-critical data.
//!
//! The wire protocol, the block log and the snapshot files all use JSON, so
//! every component must serialize through the same helpers to keep byte
//! representations identical. Struct fields serialize in declaration order;
//! [`sorted_json_string`] additionally re-keys maps for the snapshot
//! self-hash, which is defined over key-sorted compact JSON.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value as compact canonical JSON.
pub fn to_json_canonical<T: Serialize>(v: &T) -> Result<String, String> {
    serde_json::to_string(v).map_err(|e| format!("canonical encode failed: {e}"))
}

/// Decodes a value from a JSON byte slice, failing fast on malformed input.
pub fn from_json_slice<T: DeserializeOwned>(b: &[u8]) -> Result<T, String> {
    serde_json::from_slice(b).map_err(|e| format!("canonical decode failed: {e}"))
}

/// Decodes a value from a JSON string.
pub fn from_json_str<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    serde_json::from_str(s).map_err(|e| format!("canonical decode failed: {e}"))
}

/// Encodes a value as compact JSON with every object's keys sorted.
///
/// `serde_json::Value` keeps object members in a sorted map, so routing the
/// value through it yields a deterministic ordering regardless of struct
/// field declaration order.
pub fn sorted_json_string<T: Serialize>(v: &T) -> Result<String, String> {
    let value =
        serde_json::to_value(v).map_err(|e| format!("canonical encode failed: {e}"))?;
    serde_json::to_string(&value).map_err(|e| format!("canonical encode failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Sample {
        zebra: u32,
        alpha: String,
    }

    #[test]
    fn round_trip() {
        let s = Sample {
            zebra: 7,
            alpha: "x".into(),
        };
        let json = to_json_canonical(&s).unwrap();
        let back: Sample = from_json_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn sorted_encoding_reorders_keys() {
        let s = Sample {
            zebra: 7,
            alpha: "x".into(),
        };
        assert_eq!(
            sorted_json_string(&s).unwrap(),
            r#"{"alpha":"x","zebra":7}"#
        );
    }
}
