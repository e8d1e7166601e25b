// Path: crates/networking/src/peer.rs
//! Connected-peer bookkeeping.

use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

/// One connection, registered as an active peer after its handshake.
#[derive(Debug)]
pub struct Peer {
    /// Outbound frame queue, drained by the connection's writer task.
    pub sender: UnboundedSender<String>,
    /// Whether the handshake completed.
    pub active: bool,
    /// Whether we already sent our own handshake on this connection.
    pub handshake_sent: bool,
    /// The peer's advertised `host:port`.
    pub node_id: String,
    /// The peer's advertised listening port.
    pub p2p_port: u16,
    /// The address other nodes can use to reach this peer.
    pub persist_addr: String,
    /// The host we actually observe on the socket.
    pub real_host: String,
    /// Best height the peer reported.
    pub best_height: i64,
    /// Best hash the peer reported.
    pub best_hash: String,
    /// The peer's genesis hash, when known.
    pub genesis_hash: Option<String>,
    /// Newest snapshot the peer can serve.
    pub latest_snapshot_height: Option<u64>,
    /// Last time any frame arrived from this peer.
    pub last_seen: Instant,
}

impl Peer {
    /// A freshly accepted, not-yet-handshaken connection.
    pub fn unregistered(sender: UnboundedSender<String>, real_host: String) -> Self {
        Self {
            sender,
            active: false,
            handshake_sent: false,
            node_id: String::new(),
            p2p_port: 0,
            persist_addr: String::new(),
            real_host,
            best_height: -1,
            best_hash: String::new(),
            genesis_hash: None,
            latest_snapshot_height: None,
            last_seen: Instant::now(),
        }
    }

    /// Computes the address to persist and share for discovery: the
    /// advertised `node_id`, with the observed host substituted when the
    /// peer advertised a wildcard bind address.
    pub fn compute_persist_addr(node_id: &str, real_host: &str) -> String {
        match node_id.split_once(':') {
            Some(("0.0.0.0", port)) => format!("{real_host}:{port}"),
            _ => node_id.to_string(),
        }
    }

    /// Enqueues one frame for this peer. Errors are ignored; a dead writer
    /// is cleaned up by the connection teardown.
    pub fn send(&self, line: String) {
        let _ = self.sender.send(line);
    }
}
