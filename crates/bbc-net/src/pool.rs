use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bbc_chain::Chain;
use bbc_mempool::Mempool;
use bbc_primitives::{InvItem, InvType, NetworkParams};
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, Transaction, Txid};
use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::ban::BanList;
use crate::error::NetResult;
use crate::wire::Message;

const BLOCK_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const TX_TIMEOUT: Duration = Duration::from_secs(60);
const BROADCAST_TIMEOUT: Duration = Duration::from_secs(60);
const ORPHAN_FLOOD_WINDOW: Duration = Duration::from_secs(180);
const ORPHAN_FLOOD_LIMIT: u32 = 200;
const ORPHAN_FLOOD_BAN_SCORE: i32 = 100;
const DEFAULT_BAN_THRESHOLD: i32 = 100;
const DEFAULT_BAN_TIME: Duration = Duration::from_secs(24 * 60 * 60);
const WITNESS_VIOLATION_BAN_SCORE: i32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoadKind {
    Block,
    Tx,
}

struct LoadRequest {
    peer: SocketAddr,
    kind: LoadKind,
    requested_at: Instant,
}

struct BroadcastItem {
    message: Message,
    inserted_at: Instant,
    acked: bool,
}

/// A peer as seen by the sync driver: just enough to route outbound
/// messages to its I/O task and ask whether it is still alive (spec §4.5
/// "per-peer queues", "loader-peer designation").
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub outbound: mpsc::UnboundedSender<Message>,
    pub supports_witness: bool,
    pub start_height: i32,
}

/// The sync driver (spec §4.5): owns the peer set, the loader-peer
/// designation, the global in-flight request map, and the broadcast queue.
/// Drives headers-first/blocks-first sync via locators built from
/// `Chain::get_locator`.
pub struct Pool {
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    params: Arc<NetworkParams>,
    peers: Mutex<HashMap<SocketAddr, PeerHandle>>,
    loader: Mutex<Option<SocketAddr>>,
    requests: Mutex<HashMap<[u8; 32], LoadRequest>>,
    broadcasts: Mutex<HashMap<[u8; 32], BroadcastItem>>,
    bans: Mutex<BanList>,
    orphan_floods: Mutex<HashMap<IpAddr, (u32, Instant)>>,
}

impl Pool {
    pub fn new(chain: Arc<Chain>, mempool: Arc<Mempool>, params: Arc<NetworkParams>) -> Self {
        Pool {
            chain,
            mempool,
            params,
            peers: Mutex::new(HashMap::new()),
            loader: Mutex::new(None),
            requests: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(HashMap::new()),
            bans: Mutex::new(BanList::new(DEFAULT_BAN_THRESHOLD, DEFAULT_BAN_TIME)),
            orphan_floods: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        self.bans.lock().is_banned(ip)
    }

    /// Registers a newly handshaken peer, promoting it to loader if the
    /// pool currently has none (spec §4.5 "one peer per chain is the block
    /// download loader").
    pub fn add_peer(&self, handle: PeerHandle) {
        let addr = handle.addr;
        self.peers.lock().insert(addr, handle);
        let mut loader = self.loader.lock();
        if loader.is_none() {
            info!(%addr, "designating loader peer");
            *loader = Some(addr);
        }
    }

    /// Drops a peer, reassigning the loader role to another connected peer
    /// if it was the one that left, and releasing anything it had
    /// in-flight so it can be rerequested elsewhere.
    pub fn remove_peer(&self, addr: &SocketAddr) {
        self.peers.lock().remove(addr);
        self.requests.lock().retain(|_, req| req.peer != *addr);

        let mut loader = self.loader.lock();
        if *loader == Some(*addr) {
            *loader = self.peers.lock().keys().choose(&mut rand::thread_rng()).copied();
            if let Some(new_loader) = *loader {
                info!(%new_loader, old_loader = %addr, "reassigning loader peer");
            }
        }
    }

    pub fn is_loader(&self, addr: &SocketAddr) -> bool {
        *self.loader.lock() == Some(*addr)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Builds the next sync step for the loader peer: a `getheaders` with a
    /// locator rooted at the current tip (spec §4.5 "headers-first sync").
    pub fn next_sync_request(&self) -> NetResult<Option<Message>> {
        let loader = match *self.loader.lock() {
            Some(l) => l,
            None => return Ok(None),
        };
        if !self.peers.lock().contains_key(&loader) {
            return Ok(None);
        }
        let hashes = self.chain.get_locator(None)?;
        Ok(Some(Message::GetHeaders(crate::wire::Locator {
            version: 70016,
            hashes,
            stop: BlockHash::all_zeros(),
        })))
    }

    /// Builds a `getblocks` locator rooted at an orphan's known ancestor,
    /// used to pull the missing chain between it and our tip (spec §4.5
    /// "orphan handling: getblocks(locator, orphanRoot)").
    pub fn orphan_sync_request(&self, orphan_hash: &BlockHash) -> NetResult<Message> {
        let root = self.chain.get_orphan_root(orphan_hash);
        let hashes = self.chain.get_locator(None)?;
        Ok(Message::GetBlocks(crate::wire::Locator {
            version: 70016,
            hashes,
            stop: root,
        }))
    }

    pub fn send_to(&self, addr: &SocketAddr, message: Message) {
        if let Some(peer) = self.peers.lock().get(addr) {
            let _ = peer.outbound.send(message);
        }
    }

    /// Records that `addr` now has `hash` outstanding, so the sweep loop
    /// can time it out and reassign it.
    pub fn track_block_request(&self, hash: BlockHash, addr: SocketAddr) {
        self.requests.lock().insert(
            hash.to_byte_array(),
            LoadRequest { peer: addr, kind: LoadKind::Block, requested_at: Instant::now() },
        );
    }

    pub fn track_tx_request(&self, txid: Txid, addr: SocketAddr) {
        self.requests.lock().insert(
            txid.to_byte_array(),
            LoadRequest { peer: addr, kind: LoadKind::Tx, requested_at: Instant::now() },
        );
    }

    pub fn fulfill_request(&self, hash: &[u8; 32]) {
        self.requests.lock().remove(hash);
    }

    /// Sweeps the in-flight map for anything past its timeout, returning
    /// the hashes that need to be rerequested from a different peer (spec
    /// §4.5 "per-item timeouts: 20 min default for blocks, shorter for
    /// tx").
    pub fn sweep_timeouts(&self) -> Vec<([u8; 32], SocketAddr)> {
        let mut expired = Vec::new();
        self.requests.lock().retain(|hash, req| {
            let limit = match req.kind {
                LoadKind::Block => BLOCK_TIMEOUT,
                LoadKind::Tx => TX_TIMEOUT,
            };
            if req.requested_at.elapsed() >= limit {
                expired.push((*hash, req.peer));
                false
            } else {
                true
            }
        });
        expired
    }

    /// Inserts a transaction for broadcast and announces it via `inv` to
    /// every connected peer, respecting each peer's `feefilter` (spec §4.5
    /// "broadcast: insertion, inv announcement, ack on first getdata,
    /// reject on explicit peer reject, 60s default timeout").
    pub fn broadcast_tx(&self, tx: &Transaction) {
        let txid = tx.compute_txid();
        self.broadcasts.lock().insert(
            txid.to_byte_array(),
            BroadcastItem { message: Message::Tx(Box::new(tx.clone())), inserted_at: Instant::now(), acked: false },
        );
        let item = InvItem::new(InvType::Tx, txid.to_byte_array());
        let inv = Message::Inv(vec![item]);
        for peer in self.peers.lock().values() {
            let _ = peer.outbound.send(inv.clone());
        }
    }

    pub fn ack_broadcast(&self, hash: &[u8; 32]) {
        if let Some(item) = self.broadcasts.lock().get_mut(hash) {
            item.acked = true;
        }
    }

    pub fn reject_broadcast(&self, hash: &[u8; 32]) {
        self.broadcasts.lock().remove(hash);
    }

    /// Answers a `getdata` for a previously broadcast item, if we still
    /// have it queued.
    pub fn broadcast_payload(&self, hash: &[u8; 32]) -> Option<Message> {
        self.broadcasts.lock().get(hash).map(|item| item.message.clone())
    }

    /// Drops broadcasts that have sat unacked past `BROADCAST_TIMEOUT`.
    pub fn sweep_broadcasts(&self) {
        self.broadcasts
            .lock()
            .retain(|_, item| item.acked || item.inserted_at.elapsed() < BROADCAST_TIMEOUT);
    }

    /// Tracks an orphan block announcement from `ip`; returns `true` if
    /// this crossed the flood threshold and the peer should be banned
    /// (spec §4.5 "orphan handling: >200 orphans from one peer in 3
    /// minutes -> ban score +100").
    pub fn note_orphan(&self, ip: IpAddr) -> bool {
        let mut floods = self.orphan_floods.lock();
        let entry = floods.entry(ip).or_insert((0, Instant::now()));
        if entry.1.elapsed() >= ORPHAN_FLOOD_WINDOW {
            *entry = (0, Instant::now());
        }
        entry.0 += 1;
        if entry.0 > ORPHAN_FLOOD_LIMIT {
            drop(floods);
            return self.bans.lock().set_misbehavior(ip, ORPHAN_FLOOD_BAN_SCORE);
        }
        false
    }

    pub fn misbehave(&self, ip: IpAddr, score: i32) -> bool {
        self.bans.lock().set_misbehavior(ip, score)
    }

    /// Rejects witness-flagged inventory from a peer that never advertised
    /// `NODE_WITNESS` in its `version` message (spec §9 Open Question:
    /// "a witness getdata/tx/block from a non-witness peer scores 100").
    /// Returns `false` (and applies the ban score) when the items should be
    /// dropped rather than acted on; an unknown `addr` is treated as already
    /// gone and passes through so callers don't double-penalize a peer
    /// that's mid-disconnect.
    fn check_witness_policy(&self, addr: &SocketAddr, items: &[InvItem]) -> bool {
        let supports_witness = match self.peers.lock().get(addr) {
            Some(peer) => peer.supports_witness,
            None => return true,
        };
        if supports_witness || !items.iter().any(|item| item.witness) {
            return true;
        }
        warn!(%addr, "witness inventory from a non-witness peer");
        self.misbehave(addr.ip(), WITNESS_VIOLATION_BAN_SCORE);
        false
    }

    /// The pool-level policy gate an inbound-message loop runs every
    /// message through before acting on it. Currently enforces the
    /// witness-inventory policy above; returns `false` if the message
    /// violated policy and the connection should be dropped.
    pub fn handle_inbound(&self, addr: &SocketAddr, message: &Message) -> bool {
        match message {
            Message::Inv(items) | Message::GetData(items) | Message::NotFound(items) => {
                self.check_witness_policy(addr, items)
            }
            _ => true,
        }
    }

    pub fn params(&self) -> &Arc<NetworkParams> {
        &self.params
    }

    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbc_store::{Store, StoreMode};
    use bitcoin::block::Version as BlockVersion;
    use bitcoin::{CompactTarget, TxMerkleNode};
    use std::net::Ipv4Addr;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    fn setup() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let params = Arc::new(NetworkParams::regtest());
        let store = Arc::new(Store::open(dir.path(), params.clone(), StoreMode::Full).unwrap());
        let header = bitcoin::block::Header {
            version: BlockVersion::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_296_688_602,
            bits: CompactTarget::from_consensus(params.pow_limit_bits),
            nonce: 2,
        };
        let chain = Arc::new(Chain::new(store.clone(), params.clone(), header).unwrap());
        let mempool = Arc::new(Mempool::new(chain.clone(), store.clone(), params.clone()));
        (dir, Pool::new(chain, mempool, params))
    }

    fn handle(port: u16) -> (PeerHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PeerHandle { addr: addr(port), outbound: tx, supports_witness: true, start_height: 0 }, rx)
    }

    #[test]
    fn first_peer_becomes_loader_and_is_replaced_on_disconnect() {
        let (_dir, pool) = setup();
        let (a, _rx_a) = handle(1);
        let (b, _rx_b) = handle(2);
        let addr_a = a.addr;
        let addr_b = b.addr;
        pool.add_peer(a);
        pool.add_peer(b);
        assert!(pool.is_loader(&addr_a));
        assert!(!pool.is_loader(&addr_b));

        pool.remove_peer(&addr_a);
        assert!(pool.is_loader(&addr_b));
        assert_eq!(pool.peer_count(), 1);
    }

    #[test]
    fn orphan_flood_bans_after_limit() {
        let (_dir, pool) = setup();
        let ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let mut banned = false;
        for _ in 0..=ORPHAN_FLOOD_LIMIT {
            banned = pool.note_orphan(ip);
        }
        assert!(banned);
        assert!(pool.is_banned(&ip));
    }

    #[test]
    fn witness_inventory_from_non_witness_peer_is_banned() {
        let (_dir, pool) = setup();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer_addr = addr(4);
        pool.add_peer(PeerHandle {
            addr: peer_addr,
            outbound: tx,
            supports_witness: false,
            start_height: 0,
        });

        let plain = Message::Inv(vec![InvItem::new(InvType::Tx, [1u8; 32])]);
        assert!(pool.handle_inbound(&peer_addr, &plain));
        assert!(!pool.is_banned(&peer_addr.ip()));

        let witnessed = Message::GetData(vec![InvItem::new(InvType::Block, [2u8; 32]).with_witness()]);
        assert!(!pool.handle_inbound(&peer_addr, &witnessed));
        assert!(pool.is_banned(&peer_addr.ip()));
    }

    #[test]
    fn witness_inventory_from_witness_capable_peer_is_allowed() {
        let (_dir, pool) = setup();
        let (a, _rx_a) = handle(5);
        let peer_addr = a.addr;
        pool.add_peer(a);

        let witnessed = Message::Inv(vec![InvItem::new(InvType::Block, [3u8; 32]).with_witness()]);
        assert!(pool.handle_inbound(&peer_addr, &witnessed));
        assert!(!pool.is_banned(&peer_addr.ip()));
    }

    #[test]
    fn request_times_out_and_is_swept() {
        let (_dir, pool) = setup();
        let (a, _rx_a) = handle(3);
        let addr_a = a.addr;
        pool.add_peer(a);
        let txid = Txid::from_byte_array([9u8; 32]);
        pool.requests.lock().insert(
            txid.to_byte_array(),
            LoadRequest { peer: addr_a, kind: LoadKind::Tx, requested_at: Instant::now() - TX_TIMEOUT - Duration::from_secs(1) },
        );
        let expired = pool.sweep_timeouts();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].1, addr_a);
        assert!(pool.requests.lock().is_empty());
    }
}
