// Path: crates/networking/src/node.rs
//! The P2P node: listener, outbound dials, gossip, liveness timers and the
//! fork-resolving synchronization state machine.

use crate::peer::Peer;
use crate::protocol::*;
use crate::traits::{ChainHooks, SyncError, SyncState};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cpc_types::{Block, BlockError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const MAX_BLOCKS_PER_MESSAGE: i64 = 500;
const MAX_HEADERS_PER_MESSAGE: i64 = 500;
const HEADER_SYNC_WINDOW: i64 = 200;
const SNAPSHOT_SYNC_THRESHOLD: i64 = 500;
const MAX_SNAPSHOT_CHUNK_BYTES: usize = 256 * 1024;
const STATUS_INTERVAL: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(15);
const PEER_TIMEOUT: Duration = Duration::from_secs(45);
const PEER_CLEANUP_INTERVAL: Duration = Duration::from_secs(15);
const SYNC_TIMEOUT: Duration = Duration::from_secs(30);
const HANDSHAKE_GRACE: Duration = Duration::from_secs(2);
const MAX_SYNC_ROLLBACKS: u32 = 50;
const BLOCK_CACHE_LIMIT: usize = (MAX_BLOCKS_PER_MESSAGE as usize) * 2;

/// Listening address, bootstrap peers and network identity.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    pub host: String,
    pub port: u16,
    pub network_id: String,
    pub bootstrap_peers: Vec<String>,
    /// Whether this node accepts snapshot fast-sync from peers.
    pub accept_snapshots: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPhase {
    Snapshot,
    Headers,
    Blocks,
}

struct SyncTracker {
    state: SyncState,
    syncing_with: Option<u64>,
    started_at: Option<Instant>,
    phase: Option<SyncPhase>,
    header_window_from: i64,
    rollback_count: u32,
}

impl SyncTracker {
    fn reset(&mut self, state: SyncState) {
        self.state = state;
        self.syncing_with = None;
        self.started_at = None;
        self.phase = None;
        self.rollback_count = 0;
    }

    fn timed_out(&self) -> bool {
        matches!(self.started_at, Some(at) if at.elapsed() > SYNC_TIMEOUT)
    }
}

struct SnapshotBuffer {
    total: u32,
    chunks: BTreeMap<u32, Vec<u8>>,
}

pub(crate) struct Shared {
    node_id: String,
    port: u16,
    network_id: String,
    accept_snapshots: bool,
    hooks: Arc<dyn ChainHooks>,
    peers: Mutex<HashMap<u64, Peer>>,
    known_peers: Mutex<BTreeSet<String>>,
    sync: Mutex<SyncTracker>,
    block_cache: Mutex<BTreeMap<u64, Block>>,
    snapshot_buffers: Mutex<HashMap<String, SnapshotBuffer>>,
    next_peer_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_addr: Mutex<Option<std::net::SocketAddr>>,
}

impl Shared {
    fn new(cfg: &P2pConfig, hooks: Arc<dyn ChainHooks>) -> Self {
        let initial = if cfg.bootstrap_peers.is_empty() {
            SyncState::Synced
        } else {
            SyncState::Syncing
        };
        Self {
            node_id: format!("{}:{}", cfg.host, cfg.port),
            port: cfg.port,
            network_id: cfg.network_id.clone(),
            accept_snapshots: cfg.accept_snapshots,
            hooks,
            peers: Mutex::new(HashMap::new()),
            known_peers: Mutex::new(cfg.bootstrap_peers.iter().cloned().collect()),
            sync: Mutex::new(SyncTracker {
                state: initial,
                syncing_with: None,
                started_at: None,
                phase: None,
                header_window_from: 0,
                rollback_count: 0,
            }),
            block_cache: Mutex::new(BTreeMap::new()),
            snapshot_buffers: Mutex::new(HashMap::new()),
            next_peer_id: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
            local_addr: Mutex::new(None),
        }
    }
}

/// The P2P node, constructed with the chain hook set and started once.
pub struct P2pNode {
    cfg: P2pConfig,
    shared: Arc<Shared>,
}

impl P2pNode {
    /// Builds a node; nothing runs until [`P2pNode::start`].
    pub fn new(cfg: P2pConfig, hooks: Arc<dyn ChainHooks>) -> Self {
        let shared = Arc::new(Shared::new(&cfg, hooks));
        Self { cfg, shared }
    }

    /// Binds the listener, spawns the background tasks and dials the
    /// bootstrap peers. Returns a cloneable handle.
    pub async fn start(self) -> Result<P2pHandle, SyncError> {
        let listener = TcpListener::bind((self.cfg.host.as_str(), self.cfg.port))
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        *self.shared.local_addr.lock() = listener.local_addr().ok();
        info!(addr = %self.shared.node_id, "p2p server listening");

        let shared = self.shared.clone();
        let accept = tokio::spawn({
            let shared = shared.clone();
            async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, addr)) => {
                            debug!(%addr, "incoming connection");
                            tokio::spawn(run_connection(shared.clone(), stream, false));
                        }
                        Err(e) => {
                            warn!(%e, "accept failed");
                        }
                    }
                }
            }
        });

        let timers = [
            tokio::spawn(status_loop(shared.clone())),
            tokio::spawn(ping_loop(shared.clone())),
            tokio::spawn(peer_cleanup_loop(shared.clone())),
        ];

        for peer in self.cfg.bootstrap_peers.clone() {
            tokio::spawn(connect_to_peer(shared.clone(), peer));
        }

        // Handshake grace period: if nobody answered, stop waiting so a
        // lone validator can produce.
        let grace = tokio::spawn({
            let shared = shared.clone();
            let had_bootstrap = !self.cfg.bootstrap_peers.is_empty();
            async move {
                if !had_bootstrap {
                    return;
                }
                tokio::time::sleep(HANDSHAKE_GRACE).await;
                let no_peers = shared.peers.lock().values().all(|p| !p.active);
                let mut sync = shared.sync.lock();
                if no_peers && sync.state == SyncState::Syncing {
                    info!("no active peers after grace period, switching to synced");
                    sync.reset(SyncState::Synced);
                }
            }
        });

        {
            let mut tasks = shared.tasks.lock();
            tasks.push(accept);
            tasks.extend(timers);
            tasks.push(grace);
        }
        Ok(P2pHandle { shared })
    }
}

/// Cloneable control handle over a running node.
#[derive(Clone)]
pub struct P2pHandle {
    shared: Arc<Shared>,
}

impl P2pHandle {
    /// Current synchronization state.
    pub fn sync_state(&self) -> SyncState {
        self.shared.sync.lock().state
    }

    /// True while a sync is in flight.
    pub fn is_syncing(&self) -> bool {
        self.sync_state() == SyncState::Syncing
    }

    /// The best height any active peer has reported (−1 when none).
    pub fn best_peer_height(&self) -> i64 {
        self.shared
            .peers
            .lock()
            .values()
            .filter(|p| p.active)
            .map(|p| p.best_height)
            .max()
            .unwrap_or(-1)
    }

    /// Number of handshaken peers.
    pub fn active_peer_count(&self) -> usize {
        self.shared.peers.lock().values().filter(|p| p.active).count()
    }

    /// All peer addresses learned so far (for persistence).
    pub fn known_peers(&self) -> Vec<String> {
        self.shared.known_peers.lock().iter().cloned().collect()
    }

    /// The socket address the listener actually bound.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.shared.local_addr.lock()
    }

    /// Gossips a freshly produced or applied block.
    pub fn broadcast_block(&self, block: &Block) {
        match Envelope::new(MessageType::NewBlock, &NewBlockPayload { block: block.clone() })
            .and_then(|e| e.to_line())
        {
            Ok(line) => broadcast(&self.shared, line),
            Err(e) => error!(%e, "failed to encode block broadcast"),
        }
    }

    /// Gossips a newly admitted transaction.
    pub fn broadcast_tx(&self, tx: &cpc_types::Transaction) {
        match Envelope::new(MessageType::NewTx, &NewTxPayload { tx: tx.clone() })
            .and_then(|e| e.to_line())
        {
            Ok(line) => broadcast(&self.shared, line),
            Err(e) => error!(%e, "failed to encode tx broadcast"),
        }
    }

    /// Aborts background tasks and drops all connections.
    pub fn shutdown(&self) {
        for task in self.shared.tasks.lock().drain(..) {
            task.abort();
        }
        self.shared.peers.lock().clear();
        info!("p2p node stopped");
    }
}

// ---- Connection lifecycle ----

async fn connect_to_peer(shared: Arc<Shared>, peer_address: String) {
    if peer_address == shared.node_id
        || peer_address == format!("127.0.0.1:{}", shared.port)
        || peer_address == format!("0.0.0.0:{}", shared.port)
    {
        return;
    }
    match TcpStream::connect(&peer_address).await {
        Ok(stream) => {
            info!(peer = %peer_address, "connected to peer");
            run_connection(shared, stream, true).await;
        }
        Err(e) => {
            warn!(peer = %peer_address, %e, "failed to connect");
        }
    }
}

async fn run_connection(shared: Arc<Shared>, stream: TcpStream, outbound: bool) {
    let real_host = stream
        .peer_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_default();
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let peer_id = shared.next_peer_id.fetch_add(1, Ordering::SeqCst);
    shared
        .peers
        .lock()
        .insert(peer_id, Peer::unregistered(tx, real_host));

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    if outbound {
        send_handshake(&shared, peer_id);
        if let Some(peer) = shared.peers.lock().get_mut(&peer_id) {
            peer.handshake_sent = true;
        }
    }

    let mut reader = BufReader::new(read_half);
    let mut buf: Vec<u8> = Vec::new();
    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_FRAME_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await;
        match read {
            Ok(0) => break,
            Ok(n) if n > MAX_FRAME_BYTES => {
                warn!("oversized frame, dropping connection");
                break;
            }
            Ok(_) => {
                if process_frame(&shared, peer_id, &buf).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(%e, "read loop ended");
                break;
            }
        }
    }

    teardown_peer(&shared, peer_id).await;
    writer.abort();
}

async fn teardown_peer(shared: &Arc<Shared>, peer_id: u64) {
    let was_sync_peer = {
        let mut sync = shared.sync.lock();
        if sync.syncing_with == Some(peer_id) && sync.state == SyncState::Syncing {
            warn!("sync peer disconnected, resetting sync state");
            sync.reset(SyncState::Idle);
            true
        } else {
            false
        }
    };
    shared.peers.lock().remove(&peer_id);
    if was_sync_peer {
        trigger_catchup_sync(shared, None).await;
    }
}

/// A closed-connection marker bubbled up by handlers that reject a peer.
struct CloseConnection;

async fn process_frame(
    shared: &Arc<Shared>,
    peer_id: u64,
    frame: &[u8],
) -> Result<(), CloseConnection> {
    let env: Envelope = match serde_json::from_slice(frame) {
        Ok(env) => env,
        Err(e) => {
            debug!(%e, "malformed frame dropped");
            return Ok(());
        }
    };
    match env.msg_type {
        MessageType::Handshake => handle_handshake(shared, peer_id, &env).await,
        MessageType::Status => {
            handle_status(shared, peer_id, &env).await;
            Ok(())
        }
        MessageType::Ping => {
            handle_ping(shared, peer_id, &env);
            Ok(())
        }
        MessageType::Pong => {
            touch_peer(shared, peer_id);
            Ok(())
        }
        MessageType::NewBlock => {
            handle_new_block(shared, peer_id, &env).await;
            Ok(())
        }
        MessageType::NewTx => {
            handle_new_tx(shared, &env).await;
            Ok(())
        }
        MessageType::GetBlocks => {
            handle_get_blocks(shared, peer_id, &env);
            Ok(())
        }
        MessageType::BlocksResponse => {
            handle_blocks_response(shared, peer_id, &env).await;
            Ok(())
        }
        MessageType::GetHeaders => {
            handle_get_headers(shared, peer_id, &env);
            Ok(())
        }
        MessageType::HeadersResponse => {
            handle_headers_response(shared, peer_id, &env).await;
            Ok(())
        }
        MessageType::Peers => {
            handle_peers(shared, &env);
            Ok(())
        }
        MessageType::GetSnapshot => {
            handle_get_snapshot(shared, peer_id, &env);
            Ok(())
        }
        MessageType::SnapshotChunk => {
            handle_snapshot_chunk(shared, peer_id, &env).await;
            Ok(())
        }
    }
}

// ---- Outbound helpers ----

fn send_to_peer(shared: &Arc<Shared>, peer_id: u64, line: String) {
    if let Some(peer) = shared.peers.lock().get(&peer_id) {
        peer.send(line);
    }
}

fn broadcast(shared: &Arc<Shared>, line: String) {
    for peer in shared.peers.lock().values() {
        peer.send(line.clone());
    }
}

fn handshake_payload(shared: &Shared) -> HandshakePayload {
    HandshakePayload {
        node_id: shared.node_id.clone(),
        p2p_port: shared.port,
        protocol_version: 1,
        network_id: shared.network_id.clone(),
        best_height: shared.hooks.current_height(),
        best_hash: Some(shared.hooks.last_hash()),
        genesis_hash: shared.hooks.genesis_hash(),
        latest_snapshot_height: shared.hooks.latest_snapshot_height(),
    }
}

fn send_handshake(shared: &Arc<Shared>, peer_id: u64) {
    match Envelope::new(MessageType::Handshake, &handshake_payload(shared))
        .and_then(|e| e.to_line())
    {
        Ok(line) => send_to_peer(shared, peer_id, line),
        Err(e) => error!(%e, "failed to encode handshake"),
    }
}

fn broadcast_handshake_update(shared: &Arc<Shared>) {
    if let Ok(line) = Envelope::new(MessageType::Handshake, &handshake_payload(shared))
        .and_then(|e| e.to_line())
    {
        broadcast(shared, line);
    }
}

fn send_peers(shared: &Arc<Shared>, peer_id: u64) {
    let peers: Vec<String> = shared.known_peers.lock().iter().cloned().collect();
    if let Ok(line) =
        Envelope::new(MessageType::Peers, &PeersPayload { peers }).and_then(|e| e.to_line())
    {
        send_to_peer(shared, peer_id, line);
    }
}

fn request_blocks(shared: &Arc<Shared>, peer_id: u64, from: i64, mut to: i64) {
    if to - from + 1 > MAX_BLOCKS_PER_MESSAGE {
        to = from + MAX_BLOCKS_PER_MESSAGE - 1;
    }
    if let Ok(line) = Envelope::new(
        MessageType::GetBlocks,
        &GetBlocksPayload {
            from_height: from,
            to_height: to,
        },
    )
    .and_then(|e| e.to_line())
    {
        send_to_peer(shared, peer_id, line);
    }
}

fn request_headers(shared: &Arc<Shared>, peer_id: u64, from: i64, mut to: i64) {
    if to - from + 1 > MAX_HEADERS_PER_MESSAGE {
        to = from + MAX_HEADERS_PER_MESSAGE - 1;
    }
    if let Ok(line) = Envelope::new(
        MessageType::GetHeaders,
        &GetHeadersPayload {
            from_height: from,
            to_height: to,
        },
    )
    .and_then(|e| e.to_line())
    {
        send_to_peer(shared, peer_id, line);
    }
}

fn touch_peer(shared: &Arc<Shared>, peer_id: u64) {
    if let Some(peer) = shared.peers.lock().get_mut(&peer_id) {
        peer.last_seen = Instant::now();
    }
}

// ---- Handlers ----

async fn handle_handshake(
    shared: &Arc<Shared>,
    peer_id: u64,
    env: &Envelope,
) -> Result<(), CloseConnection> {
    let payload: HandshakePayload = match env.decode() {
        Ok(p) => p,
        Err(e) => {
            debug!(%e, "bad handshake payload");
            return Ok(());
        }
    };

    let my_height = shared.hooks.current_height();

    // Repeated handshake on a live connection: refresh the peer's view and
    // maybe start catching up.
    let already_active = {
        let mut peers = shared.peers.lock();
        match peers.get_mut(&peer_id) {
            Some(peer) if peer.active => {
                peer.best_height = payload.best_height;
                peer.best_hash = payload.best_hash.clone().unwrap_or_default();
                peer.latest_snapshot_height = payload.latest_snapshot_height;
                peer.last_seen = Instant::now();
                true
            }
            _ => false,
        }
    };
    if already_active {
        let syncing = shared.sync.lock().state == SyncState::Syncing;
        if payload.best_height > my_height && !syncing {
            info!(
                peer_height = payload.best_height,
                my_height, "peer is ahead, triggering sync"
            );
            trigger_catchup_sync(shared, Some(payload.best_height)).await;
        }
        return Ok(());
    }

    if payload.network_id != shared.network_id {
        warn!(network = %payload.network_id, "wrong network, closing");
        return Err(CloseConnection);
    }
    let my_genesis = shared.hooks.genesis_hash();
    if let (Some(mine), Some(theirs)) = (&my_genesis, &payload.genesis_hash) {
        if mine != theirs {
            warn!("genesis mismatch, closing");
            return Err(CloseConnection);
        }
    }

    // Register the peer.
    let (persist_addr, peer_best, need_handshake) = {
        let mut peers = shared.peers.lock();
        let Some(peer) = peers.get_mut(&peer_id) else {
            return Err(CloseConnection);
        };
        peer.active = true;
        peer.node_id = payload.node_id.clone();
        peer.p2p_port = payload.p2p_port;
        peer.persist_addr = Peer::compute_persist_addr(&payload.node_id, &peer.real_host);
        peer.best_height = payload.best_height;
        peer.best_hash = payload.best_hash.clone().unwrap_or_default();
        peer.genesis_hash = payload.genesis_hash.clone();
        peer.latest_snapshot_height = payload.latest_snapshot_height;
        peer.last_seen = Instant::now();
        let need_handshake = !peer.handshake_sent;
        peer.handshake_sent = true;
        (peer.persist_addr.clone(), peer.best_height, need_handshake)
    };
    shared.known_peers.lock().insert(persist_addr.clone());
    info!(peer = %persist_addr, height = peer_best, "peer registered");

    if need_handshake {
        send_handshake(shared, peer_id);
    }
    send_peers(shared, peer_id);

    if peer_best > my_height {
        start_sync(shared, peer_id).await;
    } else {
        shared.sync.lock().state = SyncState::Synced;
    }
    Ok(())
}

async fn handle_status(shared: &Arc<Shared>, peer_id: u64, env: &Envelope) {
    let Ok(payload) = env.decode::<StatusPayload>() else {
        return;
    };
    let registered = {
        let mut peers = shared.peers.lock();
        match peers.get_mut(&peer_id) {
            Some(peer) if peer.active => {
                peer.best_height = payload.best_height;
                peer.best_hash = payload.best_hash.clone().unwrap_or_default();
                peer.latest_snapshot_height = payload.latest_snapshot_height;
                peer.last_seen = Instant::now();
                true
            }
            _ => false,
        }
    };
    if !registered {
        return;
    }
    let my_height = shared.hooks.current_height();
    let syncing = shared.sync.lock().state == SyncState::Syncing;
    if payload.best_height > my_height && !syncing {
        trigger_catchup_sync(shared, Some(payload.best_height)).await;
    }
}

fn handle_ping(shared: &Arc<Shared>, peer_id: u64, env: &Envelope) {
    touch_peer(shared, peer_id);
    let Ok(payload) = env.decode::<PingPayload>() else {
        return;
    };
    if let Ok(line) = Envelope::new(
        MessageType::Pong,
        &PongPayload {
            timestamp: payload.timestamp,
        },
    )
    .and_then(|e| e.to_line())
    {
        send_to_peer(shared, peer_id, line);
    }
}

async fn handle_new_block(shared: &Arc<Shared>, peer_id: u64, env: &Envelope) {
    // A wedged sync must not block gossip forever.
    {
        let mut sync = shared.sync.lock();
        if sync.state == SyncState::Syncing && sync.timed_out() {
            warn!("sync timed out during gossip, resetting");
            sync.reset(SyncState::Idle);
        }
    }

    let Ok(payload) = env.decode::<NewBlockPayload>() else {
        return;
    };
    let block = payload.block;
    let block_height = block.header.height;

    {
        let mut peers = shared.peers.lock();
        if let Some(peer) = peers.get_mut(&peer_id) {
            peer.best_height = peer.best_height.max(block_height as i64);
            peer.best_hash = block.hash_hex();
            peer.last_seen = Instant::now();
        }
    }

    let syncing = shared.sync.lock().state == SyncState::Syncing;
    if syncing {
        // Cache gossip while catching up; replayed after the sync.
        let mut cache = shared.block_cache.lock();
        if cache.len() < BLOCK_CACHE_LIMIT {
            cache.insert(block_height, block);
        }
        return;
    }

    match shared.hooks.apply_block(block).await {
        Ok(()) => {}
        Err(e) => {
            warn!(%e, "rejected gossiped block");
            if let BlockError::InvalidHeight { .. } = e {
                let my_height = shared.hooks.current_height();
                let incoming = block_height as i64;
                if incoming > my_height + 1 {
                    info!(
                        my_height,
                        incoming, "height gap detected, starting catchup sync"
                    );
                    trigger_catchup_sync(shared, Some(incoming)).await;
                } else if incoming < my_height {
                    // A lagging peer sent us an old block; let it know
                    // where the chain is.
                    debug!(incoming, my_height, "rebroadcasting handshake to lagging peer");
                    broadcast_handshake_update(shared);
                }
            }
        }
    }
}

async fn handle_new_tx(shared: &Arc<Shared>, env: &Envelope) {
    let Ok(payload) = env.decode::<NewTxPayload>() else {
        return;
    };
    if let Err(e) = shared.hooks.submit_transaction(payload.tx).await {
        debug!(%e, "gossiped transaction rejected");
    }
}

fn handle_get_blocks(shared: &Arc<Shared>, peer_id: u64, env: &Envelope) {
    let Ok(req) = env.decode::<GetBlocksPayload>() else {
        return;
    };
    let mut to = req.to_height;
    if to - req.from_height + 1 > MAX_BLOCKS_PER_MESSAGE {
        to = req.from_height + MAX_BLOCKS_PER_MESSAGE - 1;
    }
    let blocks = shared.hooks.blocks_range(req.from_height, to);
    if let Ok(line) = Envelope::new(MessageType::BlocksResponse, &BlocksResponsePayload { blocks })
        .and_then(|e| e.to_line())
    {
        send_to_peer(shared, peer_id, line);
    }
}

fn handle_get_headers(shared: &Arc<Shared>, peer_id: u64, env: &Envelope) {
    let Ok(req) = env.decode::<GetHeadersPayload>() else {
        return;
    };
    let mut to = req.to_height;
    if to - req.from_height + 1 > MAX_HEADERS_PER_MESSAGE {
        to = req.from_height + MAX_HEADERS_PER_MESSAGE - 1;
    }
    let headers = shared.hooks.headers_range(req.from_height, to);
    if let Ok(line) = Envelope::new(
        MessageType::HeadersResponse,
        &HeadersResponsePayload { headers },
    )
    .and_then(|e| e.to_line())
    {
        send_to_peer(shared, peer_id, line);
    }
}

async fn handle_blocks_response(shared: &Arc<Shared>, peer_id: u64, env: &Envelope) {
    {
        let sync = shared.sync.lock();
        if sync.state != SyncState::Syncing || sync.phase != Some(SyncPhase::Blocks) {
            return;
        }
    }
    let Ok(resp) = env.decode::<BlocksResponsePayload>() else {
        return;
    };
    if resp.blocks.is_empty() {
        info!("sync finished (no more blocks)");
        finish_sync(shared).await;
        return;
    }

    let peer_best = shared
        .peers
        .lock()
        .get(&peer_id)
        .map(|p| p.best_height)
        .unwrap_or(-1);

    let mut applied = 0usize;
    let mut last_height = 0u64;
    for block in resp.blocks {
        let height = block.header.height;
        match shared.hooks.apply_block(block).await {
            Ok(()) => {
                applied += 1;
                last_height = height;
            }
            Err(e) => {
                warn!(height, %e, "sync failed at block");
                let exhausted = {
                    let mut sync = shared.sync.lock();
                    sync.rollback_count += 1;
                    sync.rollback_count > MAX_SYNC_ROLLBACKS
                };
                if exhausted {
                    error!("giving up sync after too many rollbacks");
                    shared.sync.lock().reset(SyncState::Idle);
                    return;
                }
                // A prev_hash mismatch mid-sync means our tip is on the
                // losing fork: step back one block and re-request.
                if matches!(e, BlockError::MismatchedPrevHash { .. }) {
                    let target = shared.hooks.current_height() - 1;
                    if let Err(re) = shared.hooks.rollback_to_height(target).await {
                        error!(%re, "rollback failed during sync");
                        shared.sync.lock().reset(SyncState::Idle);
                        return;
                    }
                }
                let my_height = shared.hooks.current_height();
                if my_height < peer_best {
                    shared.sync.lock().started_at = Some(Instant::now());
                    request_blocks(shared, peer_id, my_height + 1, peer_best);
                } else {
                    shared.sync.lock().reset(SyncState::Idle);
                }
                return;
            }
        }
    }
    if applied > 0 {
        info!(applied, last_height, "synced blocks");
    }

    let my_height = shared.hooks.current_height();
    if my_height < peer_best {
        shared.sync.lock().started_at = Some(Instant::now());
        request_blocks(shared, peer_id, my_height + 1, peer_best);
    } else {
        info!("sync finished (caught up)");
        finish_sync(shared).await;
    }
}

async fn handle_headers_response(shared: &Arc<Shared>, peer_id: u64, env: &Envelope) {
    {
        let sync = shared.sync.lock();
        if sync.state != SyncState::Syncing || sync.phase != Some(SyncPhase::Headers) {
            return;
        }
    }
    let Ok(resp) = env.decode::<HeadersResponsePayload>() else {
        return;
    };
    if resp.headers.is_empty() {
        warn!("header sync failed: empty response");
        shared.sync.lock().reset(SyncState::Idle);
        return;
    }

    let mut headers = resp.headers;
    headers.sort_by_key(|h| h.height);

    // The common ancestor is the highest header whose hash matches our
    // local block at that height.
    let mut common_height: Option<i64> = None;
    for header in &headers {
        if let Some(local) = shared.hooks.block_by_height(header.height) {
            if local.hash_hex() == header.hash_hex() {
                common_height = Some(header.height as i64);
            }
        }
    }

    let peer_best = shared
        .peers
        .lock()
        .get(&peer_id)
        .map(|p| p.best_height)
        .unwrap_or(-1);
    let my_height = shared.hooks.current_height();

    let common_height = match common_height {
        Some(h) => h,
        None if my_height < 0 => -1,
        None => {
            let window_from = shared.sync.lock().header_window_from;
            if window_from == 0 {
                error!("header sync failed: no common ancestor found");
                shared.sync.lock().reset(SyncState::Idle);
                return;
            }
            // Slide the window backwards and retry.
            let new_to = window_from - 1;
            let new_from = (new_to - HEADER_SYNC_WINDOW + 1).max(0);
            {
                let mut sync = shared.sync.lock();
                sync.header_window_from = new_from;
                sync.started_at = Some(Instant::now());
            }
            info!(new_from, new_to, "no ancestor in window, sliding back");
            request_headers(shared, peer_id, new_from, new_to);
            return;
        }
    };

    if my_height > common_height {
        warn!(
            ancestor = common_height,
            my_height, "fork detected, rolling back to common ancestor"
        );
        if let Err(e) = shared.hooks.rollback_to_height(common_height).await {
            error!(%e, "rollback to ancestor failed");
            shared.sync.lock().reset(SyncState::Idle);
            return;
        }
    }

    {
        let mut sync = shared.sync.lock();
        sync.phase = Some(SyncPhase::Blocks);
        sync.started_at = Some(Instant::now());
    }
    request_blocks(shared, peer_id, common_height + 1, peer_best);
}

fn handle_peers(shared: &Arc<Shared>, env: &Envelope) {
    let Ok(payload) = env.decode::<PeersPayload>() else {
        return;
    };
    let mut discovered = 0;
    for addr in payload.peers {
        if addr == shared.node_id {
            continue;
        }
        let is_new = shared.known_peers.lock().insert(addr.clone());
        if is_new {
            discovered += 1;
            tokio::spawn(connect_to_peer(shared.clone(), addr));
        }
    }
    if discovered > 0 {
        info!(discovered, "discovered new peers via gossip");
    }
}

fn handle_get_snapshot(shared: &Arc<Shared>, peer_id: u64, env: &Envelope) {
    let Ok(req) = env.decode::<GetSnapshotPayload>() else {
        return;
    };
    let Some(bytes) = shared.hooks.snapshot_bytes(req.height) else {
        warn!(height = req.height, "snapshot not available for peer");
        return;
    };
    let total_chunks = bytes.len().div_ceil(MAX_SNAPSHOT_CHUNK_BYTES).max(1) as u32;
    for (idx, chunk) in bytes.chunks(MAX_SNAPSHOT_CHUNK_BYTES).enumerate() {
        let payload = SnapshotChunkPayload {
            height: req.height,
            chunk_index: idx as u32,
            total_chunks,
            data_b64: BASE64.encode(chunk),
        };
        if let Ok(line) =
            Envelope::new(MessageType::SnapshotChunk, &payload).and_then(|e| e.to_line())
        {
            send_to_peer(shared, peer_id, line);
        }
    }
}

async fn handle_snapshot_chunk(shared: &Arc<Shared>, peer_id: u64, env: &Envelope) {
    {
        let sync = shared.sync.lock();
        if sync.state != SyncState::Syncing || sync.phase != Some(SyncPhase::Snapshot) {
            return;
        }
    }
    let Ok(payload) = env.decode::<SnapshotChunkPayload>() else {
        return;
    };
    let (persist_addr, peer_best) = {
        let peers = shared.peers.lock();
        let Some(peer) = peers.get(&peer_id) else {
            return;
        };
        (peer.persist_addr.clone(), peer.best_height)
    };
    let Ok(chunk) = BASE64.decode(payload.data_b64.as_bytes()) else {
        warn!("invalid snapshot chunk encoding");
        return;
    };

    let key = format!("{persist_addr}:{}", payload.height);
    let assembled = {
        let mut buffers = shared.snapshot_buffers.lock();
        let buffer = buffers.entry(key.clone()).or_insert_with(|| SnapshotBuffer {
            total: payload.total_chunks,
            chunks: BTreeMap::new(),
        });
        buffer.chunks.insert(payload.chunk_index, chunk);
        if buffer.chunks.len() as u32 >= buffer.total {
            let data: Vec<u8> = buffer.chunks.values().flatten().copied().collect();
            buffers.remove(&key);
            Some(data)
        } else {
            None
        }
    };
    let Some(data) = assembled else {
        return;
    };

    info!(height = payload.height, peer = %persist_addr, "applying snapshot");
    let applied = shared
        .hooks
        .apply_snapshot_bytes(payload.height, data)
        .await;
    if !applied {
        error!("failed to apply snapshot; falling back to block sync");
    }

    {
        let mut sync = shared.sync.lock();
        sync.phase = Some(SyncPhase::Blocks);
        sync.started_at = Some(Instant::now());
    }
    request_blocks(shared, peer_id, payload.height as i64 + 1, peer_best);
}

// ---- Sync driving ----

async fn trigger_catchup_sync(shared: &Arc<Shared>, target_height: Option<i64>) {
    {
        let mut sync = shared.sync.lock();
        if sync.state == SyncState::Syncing {
            if sync.timed_out() {
                warn!("sync timed out, resetting to allow retry");
                sync.reset(SyncState::Idle);
            } else {
                return;
            }
        }
    }

    let best = {
        let mut peers = shared.peers.lock();
        let best_id = peers
            .iter()
            .filter(|(_, p)| p.active)
            .max_by_key(|(_, p)| (p.best_height, p.last_seen))
            .map(|(id, _)| *id);
        if let (Some(id), Some(target)) = (best_id, target_height) {
            if let Some(peer) = peers.get_mut(&id) {
                if target > peer.best_height {
                    peer.best_height = target;
                }
            }
        }
        best_id
    };
    match best {
        Some(peer_id) => start_sync(shared, peer_id).await,
        None => warn!("no active peers for catchup sync"),
    }
}

async fn start_sync(shared: &Arc<Shared>, peer_id: u64) {
    let (peer_best, peer_snapshot, persist_addr) = {
        let peers = shared.peers.lock();
        let Some(peer) = peers.get(&peer_id) else {
            return;
        };
        (
            peer.best_height,
            peer.latest_snapshot_height,
            peer.persist_addr.clone(),
        )
    };
    let my_height = shared.hooks.current_height();
    info!(peer = %persist_addr, my_height, peer_height = peer_best, "starting sync");

    let snapshot_target = peer_snapshot.filter(|snap| {
        shared.accept_snapshots && (*snap as i64) >= my_height + 1 + SNAPSHOT_SYNC_THRESHOLD
    });

    {
        let mut sync = shared.sync.lock();
        sync.state = SyncState::Syncing;
        sync.syncing_with = Some(peer_id);
        sync.started_at = Some(Instant::now());
        sync.rollback_count = 0;
        sync.phase = Some(if snapshot_target.is_some() {
            SyncPhase::Snapshot
        } else {
            SyncPhase::Headers
        });
        sync.header_window_from = (my_height - HEADER_SYNC_WINDOW).max(0);
    }

    if let Some(height) = snapshot_target {
        if let Ok(line) =
            Envelope::new(MessageType::GetSnapshot, &GetSnapshotPayload { height })
                .and_then(|e| e.to_line())
        {
            send_to_peer(shared, peer_id, line);
        }
        return;
    }

    let from = (my_height - HEADER_SYNC_WINDOW).max(0);
    request_headers(shared, peer_id, from, peer_best);
}

async fn finish_sync(shared: &Arc<Shared>) {
    shared.sync.lock().reset(SyncState::Synced);
    apply_cached_blocks(shared).await;
}

async fn apply_cached_blocks(shared: &Arc<Shared>) {
    let cached: Vec<Block> = {
        let mut cache = shared.block_cache.lock();
        let blocks = cache.values().cloned().collect();
        cache.clear();
        blocks
    };
    for block in cached {
        let height = block.header.height;
        if let Err(e) = shared.hooks.apply_block(block).await {
            debug!(height, %e, "failed to apply cached block");
        }
    }
}

// ---- Background loops ----

async fn status_loop(shared: Arc<Shared>) {
    loop {
        tokio::time::sleep(STATUS_INTERVAL).await;
        let payload = StatusPayload {
            node_id: shared.node_id.clone(),
            best_height: shared.hooks.current_height(),
            best_hash: Some(shared.hooks.last_hash()),
            genesis_hash: shared.hooks.genesis_hash(),
            latest_snapshot_height: shared.hooks.latest_snapshot_height(),
        };
        if let Ok(line) =
            Envelope::new(MessageType::Status, &payload).and_then(|e| e.to_line())
        {
            broadcast(&shared, line);
        }
    }
}

async fn ping_loop(shared: Arc<Shared>) {
    loop {
        tokio::time::sleep(PING_INTERVAL).await;
        let payload = PingPayload {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        };
        if let Ok(line) = Envelope::new(MessageType::Ping, &payload).and_then(|e| e.to_line())
        {
            broadcast(&shared, line);
        }
    }
}

async fn peer_cleanup_loop(shared: Arc<Shared>) {
    loop {
        tokio::time::sleep(PEER_CLEANUP_INTERVAL).await;
        {
            let mut peers = shared.peers.lock();
            peers.retain(|_, peer| {
                let alive = peer.last_seen.elapsed() <= PEER_TIMEOUT;
                if !alive {
                    warn!(peer = %peer.persist_addr, "peer timeout");
                }
                alive
            });
        }
        let lost_sync_peer = {
            let peers = shared.peers.lock();
            let sync = shared.sync.lock();
            sync.state == SyncState::Syncing
                && sync
                    .syncing_with
                    .map(|id| !peers.contains_key(&id))
                    .unwrap_or(true)
        };
        if lost_sync_peer {
            warn!("sync peer gone, retrying with another peer");
            shared.sync.lock().reset(SyncState::Idle);
            trigger_catchup_sync(&shared, None).await;
        }
    }
}
