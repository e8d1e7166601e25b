// Path: crates/networking/src/protocol.rs
//! Wire protocol: newline-delimited UTF-8 JSON envelopes `{type, payload}`.

use crate::traits::SyncError;
use cpc_types::{Block, BlockHeader, Transaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Hard cap on a single frame.
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// The enumerated message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Handshake,
    Status,
    Ping,
    Pong,
    NewBlock,
    NewTx,
    GetBlocks,
    BlocksResponse,
    GetHeaders,
    HeadersResponse,
    Peers,
    GetSnapshot,
    SnapshotChunk,
}

/// The top-level frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Builds a frame from a typed payload.
    pub fn new<T: Serialize>(msg_type: MessageType, payload: &T) -> Result<Self, SyncError> {
        Ok(Self {
            msg_type,
            payload: serde_json::to_value(payload)
                .map_err(|e| SyncError::Decode(e.to_string()))?,
        })
    }

    /// Serializes the frame as one newline-terminated line.
    pub fn to_line(&self) -> Result<String, SyncError> {
        let mut line =
            serde_json::to_string(self).map_err(|e| SyncError::Decode(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }

    /// Deserializes the payload into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SyncError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| SyncError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub node_id: String,
    pub p2p_port: u16,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: u32,
    pub network_id: String,
    pub best_height: i64,
    #[serde(default)]
    pub best_hash: Option<String>,
    #[serde(default)]
    pub genesis_hash: Option<String>,
    #[serde(default)]
    pub latest_snapshot_height: Option<u64>,
}

fn default_protocol_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub node_id: String,
    pub best_height: i64,
    #[serde(default)]
    pub best_hash: Option<String>,
    #[serde(default)]
    pub genesis_hash: Option<String>,
    #[serde(default)]
    pub latest_snapshot_height: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingPayload {
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongPayload {
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlockPayload {
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTxPayload {
    pub tx: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    pub from_height: i64,
    pub to_height: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocksResponsePayload {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHeadersPayload {
    pub from_height: i64,
    pub to_height: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadersResponsePayload {
    pub headers: Vec<BlockHeader>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersPayload {
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSnapshotPayload {
    pub height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotChunkPayload {
    pub height: u64,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub data_b64: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_line_round_trip() {
        let payload = GetBlocksPayload {
            from_height: 3,
            to_height: 9,
        };
        let env = Envelope::new(MessageType::GetBlocks, &payload).unwrap();
        let line = env.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"type\":\"get_blocks\""));

        let parsed: Envelope = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed.msg_type, MessageType::GetBlocks);
        let back: GetBlocksPayload = parsed.decode().unwrap();
        assert_eq!(back.from_height, 3);
        assert_eq!(back.to_height, 9);
    }

    #[test]
    fn handshake_defaults_apply() {
        let raw = r#"{"node_id":"1.2.3.4:9000","p2p_port":9000,"network_id":"devnet","best_height":-1}"#;
        let hs: HandshakePayload = serde_json::from_str(raw).unwrap();
        assert_eq!(hs.protocol_version, 1);
        assert!(hs.genesis_hash.is_none());
        assert!(hs.latest_snapshot_height.is_none());
    }

    #[test]
    fn message_type_wire_names_are_snake_case() {
        assert_eq!(
            serde_json::to_string(&MessageType::SnapshotChunk).unwrap(),
            "\"snapshot_chunk\""
        );
        assert_eq!(
            serde_json::from_str::<MessageType>("\"headers_response\"").unwrap(),
            MessageType::HeadersResponse
        );
    }
}
