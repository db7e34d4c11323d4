use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bbc_primitives::{ChainEntry, Coin, NetworkParams, UndoRecord};
use bbc_script::{execute, verify, ScriptFlags, SignatureVersion, TransactionSignatureChecker};
use bbc_store::{Store, StoreMode};
use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::{Block, BlockHash, OutPoint, Transaction};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{ChainError, ChainResult};
use crate::events::{AddOutcome, ChainEvent};
use crate::orphan::OrphanPool;
use crate::pow::{check_proof_of_work, median_time_past, next_work_required};
use crate::state::EntryState;

const MAX_FUTURE_BLOCK_TIME_SECS: u32 = 2 * 60 * 60;
const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Which height or hash to reset the chain to (spec §4.2
/// `reset(to: Hash|Height)`).
#[derive(Clone, Copy, Debug)]
pub enum ResetTarget {
    Height(u32),
    Hash(BlockHash),
}

/// Flags controlling locktime/sequence comparison against the *proposed*
/// block rather than the current tip (used by the mempool, which must
/// evaluate finality against the next block to be mined).
#[derive(Clone, Copy, Debug)]
pub struct LockFlags {
    pub height: u32,
    pub median_time_past: u32,
    pub verify_sequence: bool,
}

/// Sole writer to the chain store (spec §4.2). Validates, connects,
/// disconnects, and reorganizes; owns the orphan pool and per-hash invalid
/// marks; and broadcasts `ChainEvent`s for the mempool and sync driver.
pub struct Chain {
    store: Arc<Store>,
    params: Arc<NetworkParams>,
    tip: RwLock<ChainEntry>,
    orphans: Mutex<OrphanPool>,
    invalid: Mutex<HashSet<BlockHash>>,
    events: broadcast::Sender<ChainEvent>,
}

impl Chain {
    pub fn new(store: Arc<Store>, params: Arc<NetworkParams>, genesis_header: bitcoin::block::Header) -> ChainResult<Self> {
        let tip = match store.tip()? {
            Some(hash) => store.entry(&hash)?.ok_or(ChainError::Orphan)?,
            None => {
                let genesis = ChainEntry::genesis(genesis_header);
                store.connect(&genesis, None, None, &[], &[])?;
                genesis
            }
        };
        let (events, _) = broadcast::channel(1024);
        Ok(Chain {
            store,
            params,
            tip: RwLock::new(tip),
            orphans: Mutex::new(OrphanPool::new()),
            invalid: Mutex::new(HashSet::new()),
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn tip(&self) -> ChainEntry {
        self.tip.read().clone()
    }

    fn emit(&self, event: ChainEvent) {
        let _ = self.events.send(event);
    }

    /// Spec §4.2 `add(block, source) -> Result<AddOutcome>`.
    pub fn add(&self, block: Block) -> ChainResult<AddOutcome> {
        let hash = block.block_hash();

        if self.invalid.lock().contains(&hash) {
            return Err(ChainError::KnownInvalid);
        }
        if self.store.entry(&hash)?.is_some() {
            self.emit(ChainEvent::Exists { hash });
            return Ok(AddOutcome::AlreadyKnown);
        }

        let parent = self.store.entry(&block.header.prev_blockhash)?;
        let Some(parent) = parent else {
            debug!(%hash, "parking orphan block with unknown parent");
            self.orphans.lock().insert(block);
            self.emit(ChainEvent::Orphan { hash });
            return Ok(AddOutcome::Orphaned);
        };

        let outcome = self.process_with_parent(block, parent)?;
        self.try_connect_orphans(hash)?;
        Ok(outcome)
    }

    fn process_with_parent(&self, block: Block, parent: ChainEntry) -> ChainResult<AddOutcome> {
        let hash = block.block_hash();
        if let Err(e) = self.check_header_sanity(&block, &parent) {
            warn!(%hash, error = %e, "rejecting invalid block");
            self.invalid.lock().insert(hash);
            self.emit(ChainEvent::Invalid { hash, reason: e.to_string() });
            return Err(e);
        }

        if let Some(checkpoint) = self.params.checkpoint_at(parent.height + 1) {
            if checkpoint.hash != hash {
                self.invalid.lock().insert(hash);
                return Err(ChainError::CheckpointMismatch { height: parent.height + 1 });
            }
        }

        let entry = parent.child(block.header);
        self.store.put_entry(&entry)?;

        let current_tip = self.tip();
        if parent.hash() == current_tip.hash() {
            self.connect_block(&entry, &block, &current_tip)?;
            self.emit(ChainEvent::Block { entry: entry.clone(), block });
            self.emit(ChainEvent::Full { tip: entry });
            return Ok(AddOutcome::Connected);
        }

        if entry.chainwork <= current_tip.chainwork {
            self.emit(ChainEvent::Fork { entry });
            return Ok(AddOutcome::SideBranch);
        }

        self.reorganize(&entry, &block)?;
        Ok(AddOutcome::Connected)
    }

    fn check_header_sanity(&self, block: &Block, parent: &ChainEntry) -> ChainResult<()> {
        let height = parent.height + 1;
        check_proof_of_work(&block.header, height)?;

        let expected_bits = next_work_required(&self.store, &self.params, parent, block.header.time)?;
        if block.header.bits.to_consensus() != expected_bits {
            return Err(ChainError::BadDifficultyBits {
                height,
                expected: expected_bits,
                got: block.header.bits.to_consensus(),
            });
        }

        let mtp = median_time_past(&self.store, parent)?;
        if block.header.time <= mtp {
            return Err(ChainError::TimeTooOld { height });
        }
        if block.header.time > now_adjusted() + MAX_FUTURE_BLOCK_TIME_SECS {
            return Err(ChainError::TimeTooNew { height });
        }
        Ok(())
    }

    /// Full contextual validation of `block` against `parent`'s tip state,
    /// followed by an atomic store write (spec §4.2 "Full contextual
    /// validation of a block").
    fn connect_block(&self, entry: &ChainEntry, block: &Block, _prev_tip: &ChainEntry) -> ChainResult<()> {
        if !merkle_root_matches(block) {
            return Err(ChainError::BadMerkleRoot);
        }
        if block.weight().to_wu() > self.params.max_block_weight as u64 {
            return Err(ChainError::BadBlockWeight);
        }

        let mut undo = UndoRecord::new();
        let mut spent = Vec::new();
        let mut created = Vec::new();
        let mut seen_txids = HashSet::new();
        let mut total_sigop_cost: u64 = 0;

        for (tx_index, tx) in block.txdata.iter().enumerate() {
            let txid = tx.compute_txid();
            if !self.params.is_bip30_exception(entry.height, &entry.hash()) && !seen_txids.insert(txid) {
                return Err(ChainError::Bip30Violation);
            }

            let is_coinbase = tx_index == 0;
            let mut input_value: u64 = 0;

            if !is_coinbase {
                for input in &tx.input {
                    let coin = self
                        .store
                        .coin(&input.previous_output)?
                        .ok_or(ChainError::MissingInput { txid })?;
                    if coin.is_coinbase && entry.height < coin.height + self.params.coinbase_maturity {
                        return Err(ChainError::PrematureCoinbaseSpend { height: entry.height });
                    }
                    input_value += coin.value;
                    spent.push(input.previous_output);
                    undo.push(coin);
                }

                let output_value: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
                if input_value < output_value {
                    return Err(ChainError::InputsBelowOutputs { txid });
                }

                let flags = ScriptFlags::standard() | ScriptFlags::MANDATORY;
                for (input_index, input) in tx.input.iter().enumerate() {
                    let coin = self.store.coin(&input.previous_output)?.ok_or(ChainError::MissingInput { txid })?;
                    let checker = TransactionSignatureChecker {
                        tx,
                        input_index,
                        amount: coin.value,
                    };
                    verify(&input.script_sig, &coin.script_pubkey, &input.witness, flags, &checker)?;
                    total_sigop_cost += estimate_sigop_cost(&coin.script_pubkey, &input.witness);
                }
            }

            for (vout, output) in tx.output.iter().enumerate() {
                let outpoint = OutPoint { txid, vout: vout as u32 };
                created.push((
                    outpoint,
                    Coin::new(output.value.to_sat(), output.script_pubkey.clone(), entry.height, is_coinbase, txid, vout as u32),
                ));
            }
        }

        if total_sigop_cost > self.params.max_block_sigop_cost as u64 {
            return Err(ChainError::BadSigopCost);
        }

        self.store.connect(entry, Some(block), Some(&undo), &spent, &created)?;
        if let StoreMode::Pruned { keep_blocks } = self.store.mode() {
            let _ = keep_blocks;
            self.store.run_prune_step(entry.height)?;
        }
        *self.tip.write() = entry.clone();
        Ok(())
    }

    fn disconnect_tip(&self) -> ChainResult<Block> {
        let tip = self.tip();
        let block = self.store.block(&tip.hash())?.ok_or(ChainError::Orphan)?;
        let undo = self.store.undo_record(&tip.hash())?.unwrap_or_default();

        let mut created = Vec::new();
        for tx in &block.txdata {
            let txid = tx.compute_txid();
            for (vout, _) in tx.output.iter().enumerate() {
                created.push(OutPoint { txid, vout: vout as u32 });
            }
        }

        let parent = self.store.entry(&tip.header.prev_blockhash)?.ok_or(ChainError::Orphan)?;
        self.store.disconnect(&tip.hash(), &parent.hash(), tip.height, &undo, &created)?;
        *self.tip.write() = parent;
        self.emit(ChainEvent::Fork { entry: tip });
        Ok(block)
    }

    /// Reorganizes onto `entry`'s branch: disconnects down to the common
    /// ancestor, then connects forward (spec §4.2 step 4-5).
    fn reorganize(&self, entry: &ChainEntry, new_tip_block: &Block) -> ChainResult<()> {
        info!(old_tip = %self.tip().hash(), new_tip = %entry.hash(), new_height = entry.height, "reorganizing chain");
        let mut to_connect = vec![(entry.clone(), new_tip_block.clone())];
        let mut cursor = entry.clone();
        while self.store.height_by_hash(&cursor.hash())?.is_none() || !self.is_main_chain(&cursor)? {
            let Some(parent) = self.store.entry(&cursor.header.prev_blockhash)? else {
                return Err(ChainError::Orphan);
            };
            if self.is_main_chain(&parent)? {
                break;
            }
            let block = self.store.block(&cursor.hash())?.ok_or(ChainError::Orphan)?;
            to_connect.push((parent.clone(), block));
            cursor = parent;
        }
        to_connect.reverse();
        let common_ancestor = self
            .store
            .entry(&to_connect.first().unwrap().0.header.prev_blockhash)?
            .ok_or(ChainError::Orphan)?;

        while self.tip().hash() != common_ancestor.hash() && self.tip().height > common_ancestor.height {
            self.disconnect_tip()?;
        }

        for (candidate_entry, candidate_block) in to_connect {
            let prev_tip = self.tip();
            self.connect_block(&candidate_entry, &candidate_block, &prev_tip)?;
            self.emit(ChainEvent::Block { entry: candidate_entry, block: candidate_block });
        }
        self.emit(ChainEvent::Full { tip: self.tip() });
        Ok(())
    }

    fn is_main_chain(&self, entry: &ChainEntry) -> ChainResult<bool> {
        Ok(self.store.hash_by_height(entry.height)? == Some(entry.hash()))
    }

    fn try_connect_orphans(&self, hash: BlockHash) -> ChainResult<()> {
        let children = self.orphans.lock().take_children(&hash);
        for child in children {
            let child_hash = child.block_hash();
            if let Some(parent) = self.store.entry(&hash)? {
                match self.process_with_parent(child, parent) {
                    Ok(_) => {
                        self.try_connect_orphans(child_hash)?;
                    }
                    Err(e) => {
                        self.invalid.lock().insert(child_hash);
                        self.emit(ChainEvent::Invalid { hash: child_hash, reason: e.to_string() });
                    }
                }
            }
        }
        Ok(())
    }

    /// Spec §4.2 `getLocator(from) -> [hash]`: an exponentially-spaced list
    /// of ancestor hashes from `from` (defaulting to the tip) back to
    /// genesis, used to let a peer find the common ancestor in O(log n)
    /// round trips.
    pub fn get_locator(&self, from: Option<BlockHash>) -> ChainResult<Vec<BlockHash>> {
        let start = match from {
            Some(hash) => self.store.entry(&hash)?.ok_or(ChainError::Orphan)?,
            None => self.tip(),
        };

        let mut locator = Vec::new();
        let mut step = 1u32;
        let mut height = start.height;
        loop {
            if let Some(hash) = self.store.hash_by_height(height)? {
                locator.push(hash);
            } else if let Some(entry) = self.ancestor_at_height(&start, height)? {
                locator.push(entry.hash());
            }
            if height == 0 {
                break;
            }
            if locator.len() >= 10 {
                step = step.saturating_mul(2);
            }
            height = height.saturating_sub(step);
        }
        Ok(locator)
    }

    fn ancestor_at_height(&self, from: &ChainEntry, height: u32) -> ChainResult<Option<ChainEntry>> {
        if height > from.height {
            return Ok(None);
        }
        let mut current = from.clone();
        while current.height > height {
            match self.store.entry(&current.header.prev_blockhash)? {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Spec §4.2 `getOrphanRoot(hash) -> hash`.
    pub fn get_orphan_root(&self, hash: &BlockHash) -> BlockHash {
        self.orphans.lock().root(hash)
    }

    /// Spec §4.2 `reset(to: Hash|Height)`: rewinds the tip to `target` by
    /// repeated disconnect. Used for manual chain surgery (e.g. recovering
    /// from a detected invalid block deep in the active chain).
    pub fn reset(&self, target: ResetTarget) -> ChainResult<()> {
        let target_height = match target {
            ResetTarget::Height(h) => h,
            ResetTarget::Hash(hash) => self.store.entry(&hash)?.ok_or(ChainError::Orphan)?.height,
        };
        while self.tip().height > target_height {
            self.disconnect_tip()?;
        }
        Ok(())
    }

    /// Spec §4.2 `checkFinal(tip, tx, lockFlags) -> bool`: whether `tx`'s
    /// nLockTime is satisfied as of `lockFlags` (mirrors Bitcoin Core's
    /// `IsFinalTx`, using `lockFlags.median_time_past` in place of the
    /// block's own adjusted time per BIP113).
    pub fn check_final(&self, tx: &Transaction, lock_flags: &LockFlags) -> bool {
        let raw_locktime = match tx.lock_time {
            LockTime::Blocks(h) => h.to_consensus_u32(),
            LockTime::Seconds(t) => t.to_consensus_u32(),
        };
        if raw_locktime == 0 {
            return true;
        }
        let comparator = if raw_locktime < LOCKTIME_THRESHOLD {
            lock_flags.height
        } else {
            lock_flags.median_time_past
        };
        if raw_locktime < comparator {
            return true;
        }
        tx.input.iter().all(|input| input.sequence.is_final())
    }

    /// Spec §4.2 `checkLocks(tip, tx, lockFlags) -> bool`: BIP68 relative
    /// locktime satisfaction across all inputs, resolving each input's base
    /// height/time from the coin it spends.
    pub fn check_locks(&self, tx: &Transaction, lock_flags: &LockFlags) -> ChainResult<bool> {
        if !lock_flags.verify_sequence || tx.version.0 < 2 {
            return Ok(true);
        }
        for input in &tx.input {
            if !input.sequence.is_relative_lock_time() {
                continue;
            }
            let Some(coin) = self.store.coin(&input.previous_output)? else {
                continue;
            };
            if input.sequence.is_height_locked() {
                let locked_delta = input.sequence.0 & 0x0000ffff;
                if lock_flags.height < coin.height + locked_delta {
                    return Ok(false);
                }
            } else {
                let coin_mtp = self
                    .store
                    .entry(&self.store.hash_by_height(coin.height)?.ok_or(ChainError::Orphan)?)?
                    .map(|e| e.header.time)
                    .unwrap_or(0);
                let locked_delta = (input.sequence.0 & 0x0000ffff) << 9;
                if lock_flags.median_time_past < coin_mtp + locked_delta {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

fn now_adjusted() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn merkle_root_matches(block: &Block) -> bool {
    block
        .compute_merkle_root()
        .map(|root| root == block.header.merkle_root)
        .unwrap_or(block.txdata.is_empty())
}

/// Spec §4.1 "per-block sigops cost ≤ 80 000 (witness-scaled)": legacy
/// sigops count 4x, witness program sigops count 1x. P2WPKH always spends
/// via exactly one CHECKSIG; P2WSH's sigops are counted out of the actual
/// witnessScript (the last witness stack item), not guessed from how many
/// items happen to be on the stack.
fn estimate_sigop_cost(script_pubkey: &bitcoin::ScriptBuf, witness: &bitcoin::Witness) -> u64 {
    if script_pubkey.is_p2wpkh() {
        1
    } else if script_pubkey.is_p2wsh() {
        witness
            .last()
            .map(|bytes| bitcoin::ScriptBuf::from_bytes(bytes.to_vec()).count_sigops() as u64)
            .unwrap_or(0)
    } else if script_pubkey.is_p2pkh() {
        4
    } else {
        script_pubkey.count_sigops() as u64 * 4
    }
}

pub type EntryStateMap = HashMap<BlockHash, EntryState>;
