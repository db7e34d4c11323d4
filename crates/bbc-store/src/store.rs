use std::path::Path;
use std::sync::Arc;

use bbc_primitives::{ChainEntry, Coin, NetworkParams, UndoRecord};
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::hashes::Hash;
use bitcoin::{Block, BlockHash, OutPoint};
use lru::LruCache;
use parking_lot::Mutex;
use sled::transaction::{ConflictableTransactionError, Transactional};
use sled::Tree;

use crate::error::{StoreError, StoreResult};
use crate::keys;

const TIP_KEY: &[u8] = b"tip";

/// How much of the chain this store keeps on disk (spec §4.3 "Pruning,
/// when enabled" and "SPV mode skips all ... writes").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreMode {
    Full,
    Pruned { keep_blocks: u32 },
    Spv,
}

/// The persistent chain store: one `sled::Tree` per key-space prefix from
/// spec §4.3, plus hot LRUs in front of the two prefixes consulted on every
/// header/locator/versionbits lookup (`e/`, `H/`) and a bounded coin cache.
pub struct Store {
    db: sled::Db,
    meta: Tree,
    entries: Tree,
    height_by_hash: Tree,
    hash_by_height: Tree,
    next_hash: Tree,
    blocks: Tree,
    undo: Tree,
    coins: Tree,
    versionbits: Tree,
    prune_queue: Tree,

    entry_cache: Mutex<LruCache<BlockHash, ChainEntry>>,
    hash_cache: Mutex<LruCache<u32, BlockHash>>,
    coin_cache: Mutex<LruCache<OutPoint, Coin>>,

    mode: StoreMode,
    params: Arc<NetworkParams>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>, params: Arc<NetworkParams>, mode: StoreMode) -> StoreResult<Self> {
        let db = sled::open(path)?;
        let cache_cap = (2 * params.retarget_interval as usize + 100)
            .try_into()
            .unwrap_or(usize::MAX);
        let cache_cap = std::num::NonZeroUsize::new(cache_cap).unwrap_or(std::num::NonZeroUsize::new(1).unwrap());
        let coin_cache_cap = std::num::NonZeroUsize::new(50_000).unwrap();

        Ok(Store {
            meta: db.open_tree("meta")?,
            entries: db.open_tree("e")?,
            height_by_hash: db.open_tree("h")?,
            hash_by_height: db.open_tree("H")?,
            next_hash: db.open_tree("n")?,
            blocks: db.open_tree("b")?,
            undo: db.open_tree("u")?,
            coins: db.open_tree("c")?,
            versionbits: db.open_tree("v")?,
            prune_queue: db.open_tree("bq")?,
            db,
            entry_cache: Mutex::new(LruCache::new(cache_cap)),
            hash_cache: Mutex::new(LruCache::new(cache_cap)),
            coin_cache: Mutex::new(LruCache::new(coin_cache_cap)),
            mode,
            params,
        })
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    pub fn tip(&self) -> StoreResult<Option<BlockHash>> {
        Ok(self
            .meta
            .get(TIP_KEY)?
            .map(|v| BlockHash::from_slice(&v).expect("32-byte tip value")))
    }

    fn set_tip_in(meta: &sled::transaction::TransactionalTree, hash: &BlockHash) -> Result<(), ConflictableTransactionError<StoreError>> {
        meta.insert(TIP_KEY, keys::hash_key(hash).to_vec())?;
        Ok(())
    }

    pub fn entry(&self, hash: &BlockHash) -> StoreResult<Option<ChainEntry>> {
        if let Some(e) = self.entry_cache.lock().get(hash) {
            return Ok(Some(e.clone()));
        }
        let value = self.entries.get(keys::hash_key(hash))?;
        let entry = value.map(|bytes| deserialize::<ChainEntry>(&bytes)).transpose()?;
        if let Some(ref e) = entry {
            self.entry_cache.lock().put(*hash, e.clone());
        }
        Ok(entry)
    }

    pub fn height_by_hash(&self, hash: &BlockHash) -> StoreResult<Option<u32>> {
        Ok(self
            .height_by_hash
            .get(keys::hash_key(hash))?
            .map(|v| u32::from_le_bytes(v.as_ref().try_into().expect("4-byte height"))))
    }

    pub fn hash_by_height(&self, height: u32) -> StoreResult<Option<BlockHash>> {
        if let Some(h) = self.hash_cache.lock().get(&height) {
            return Ok(Some(*h));
        }
        let value = self
            .hash_by_height
            .get(keys::height_key(height))?
            .map(|v| BlockHash::from_slice(&v).expect("32-byte hash"));
        if let Some(h) = value {
            self.hash_cache.lock().put(height, h);
        }
        Ok(value)
    }

    pub fn next_hash(&self, hash: &BlockHash) -> StoreResult<Option<BlockHash>> {
        Ok(self
            .next_hash
            .get(keys::hash_key(hash))?
            .map(|v| BlockHash::from_slice(&v).expect("32-byte hash")))
    }

    pub fn block(&self, hash: &BlockHash) -> StoreResult<Option<Block>> {
        let value = self.blocks.get(keys::hash_key(hash))?;
        value.map(|bytes| deserialize::<Block>(&bytes).map_err(StoreError::from)).transpose()
    }

    pub fn undo_record(&self, hash: &BlockHash) -> StoreResult<Option<UndoRecord>> {
        let value = self.undo.get(keys::hash_key(hash))?;
        value
            .map(|bytes| deserialize::<UndoRecord>(&bytes).map_err(StoreError::from))
            .transpose()
    }

    pub fn coin(&self, outpoint: &OutPoint) -> StoreResult<Option<Coin>> {
        if let Some(c) = self.coin_cache.lock().get(outpoint) {
            return Ok(Some(c.clone()));
        }
        let value = self.coins.get(keys::outpoint_key(outpoint))?;
        let coin = value.map(|bytes| deserialize::<Coin>(&bytes)).transpose()?;
        if let Some(ref c) = coin {
            self.coin_cache.lock().put(*outpoint, c.clone());
        }
        Ok(coin)
    }

    pub fn versionbits_state(&self, hash: &BlockHash, deployment: &str) -> StoreResult<Option<u8>> {
        let mut key = keys::hash_key(hash).to_vec();
        key.extend_from_slice(deployment.as_bytes());
        Ok(self.versionbits.get(key)?.map(|v| v[0]))
    }

    /// Writes header-index metadata unconditionally (used for orphan/headers
    /// bookkeeping prior to full block validation), without touching the
    /// main-chain height index or the UTXO set.
    pub fn put_entry(&self, entry: &ChainEntry) -> StoreResult<()> {
        let hash = entry.hash();
        self.entries.insert(keys::hash_key(&hash), serialize(entry))?;
        self.entry_cache.lock().put(hash, entry.clone());
        Ok(())
    }

    pub fn put_versionbits_state(&self, hash: &BlockHash, deployment: &str, state: u8) -> StoreResult<()> {
        let mut key = keys::hash_key(hash).to_vec();
        key.extend_from_slice(deployment.as_bytes());
        self.versionbits.insert(key, vec![state])?;
        Ok(())
    }

    /// Atomically applies a block connection: advances the tip, extends the
    /// main-chain height index, stores the block body/undo data (unless
    /// pruned/SPV), removes spent coins, inserts new coins, and maintains the
    /// pruning queue (spec §4.3 "All updates go through a single batch").
    #[allow(clippy::too_many_arguments)]
    pub fn connect(
        &self,
        entry: &ChainEntry,
        block: Option<&Block>,
        undo: Option<&UndoRecord>,
        spent: &[OutPoint],
        created: &[(OutPoint, Coin)],
    ) -> StoreResult<()> {
        let hash = entry.hash();
        let height = entry.height;
        let prev_hash = entry.header.prev_blockhash;

        let trees: &[&Tree] = &[
            &self.meta,
            &self.entries,
            &self.height_by_hash,
            &self.hash_by_height,
            &self.next_hash,
            &self.blocks,
            &self.undo,
            &self.prune_queue,
            &self.coins,
        ];

        let entry_bytes = serialize(entry);
        let block_bytes = block.map(serialize);
        let undo_bytes = undo.map(serialize);
        let store_bodies = !matches!(self.mode, StoreMode::Spv);
        let keep_blocks = match self.mode {
            StoreMode::Pruned { keep_blocks } => Some(keep_blocks),
            _ => None,
        };

        trees
            .transaction(|trees| {
                let (meta, entries, height_by_hash, hash_by_height, next_hash, blocks, undo_tree, prune_queue, coins) = (
                    &trees[0], &trees[1], &trees[2], &trees[3], &trees[4], &trees[5], &trees[6], &trees[7],
                    &trees[8],
                );

                Self::set_tip_in(meta, &hash)?;
                entries.insert(keys::hash_key(&hash).to_vec(), entry_bytes.clone())?;
                height_by_hash.insert(keys::hash_key(&hash).to_vec(), height.to_le_bytes().to_vec())?;
                hash_by_height.insert(keys::height_key(height).to_vec(), keys::hash_key(&hash).to_vec())?;
                next_hash.insert(keys::hash_key(&prev_hash).to_vec(), keys::hash_key(&hash).to_vec())?;

                if store_bodies {
                    if let Some(bytes) = &block_bytes {
                        blocks.insert(keys::hash_key(&hash).to_vec(), bytes.clone())?;
                    }
                    if let Some(bytes) = &undo_bytes {
                        undo_tree.insert(keys::hash_key(&hash).to_vec(), bytes.clone())?;
                    }
                    for outpoint in spent {
                        coins.remove(keys::outpoint_key(outpoint).to_vec())?;
                    }
                    for (outpoint, coin) in created {
                        coins.insert(keys::outpoint_key(outpoint).to_vec(), serialize(coin))?;
                    }
                }

                if let Some(keep) = keep_blocks {
                    let delete_height = height.saturating_sub(1);
                    prune_queue.remove(keys::height_key(delete_height).to_vec())?;
                    let schedule_height = height + keep;
                    prune_queue.insert(
                        keys::height_key(schedule_height).to_vec(),
                        keys::hash_key(&hash).to_vec(),
                    )?;
                }

                Ok::<_, ConflictableTransactionError<StoreError>>(())
            })
            .map_err(StoreError::from)?;

        self.entry_cache.lock().put(hash, entry.clone());
        self.hash_cache.lock().put(height, hash);
        {
            let mut cache = self.coin_cache.lock();
            for outpoint in spent {
                cache.pop(outpoint);
            }
            for (outpoint, coin) in created {
                cache.put(*outpoint, coin.clone());
            }
        }

        Ok(())
    }

    /// Reverses a `connect`: restores the previous tip, rewinds the height
    /// index, deletes the undo record, and puts removed coins back using it
    /// (spec §4.2 "Disconnect"). The block body itself is kept — a
    /// disconnected block may still be reconnected by a later reorg — only
    /// its undo record stops applying once it's no longer on the main chain.
    pub fn disconnect(&self, hash: &BlockHash, prev_hash: &BlockHash, height: u32, undo: &UndoRecord, created: &[OutPoint]) -> StoreResult<()> {
        let store_bodies = !matches!(self.mode, StoreMode::Spv);
        let trees: &[&Tree] = &[
            &self.meta,
            &self.height_by_hash,
            &self.hash_by_height,
            &self.next_hash,
            &self.undo,
            &self.coins,
        ];

        trees
            .transaction(|trees| {
                let (meta, height_by_hash, hash_by_height, next_hash, undo_tree, coins) =
                    (&trees[0], &trees[1], &trees[2], &trees[3], &trees[4], &trees[5]);
                Self::set_tip_in(meta, prev_hash)?;
                height_by_hash.remove(keys::hash_key(hash).to_vec())?;
                hash_by_height.remove(keys::height_key(height).to_vec())?;
                next_hash.remove(keys::hash_key(prev_hash).to_vec())?;

                if store_bodies {
                    undo_tree.remove(keys::hash_key(hash).to_vec())?;
                    for outpoint in created {
                        coins.remove(keys::outpoint_key(outpoint).to_vec())?;
                    }
                    for coin in &undo.coins {
                        let outpoint = OutPoint {
                            txid: coin.out_txid,
                            vout: coin.out_index,
                        };
                        coins.insert(keys::outpoint_key(&outpoint).to_vec(), serialize(coin))?;
                    }
                }
                Ok::<_, ConflictableTransactionError<StoreError>>(())
            })
            .map_err(StoreError::from)?;

        self.hash_cache.lock().pop(&height);
        self.entry_cache.lock().pop(hash);
        if store_bodies {
            let mut cache = self.coin_cache.lock();
            for outpoint in created {
                cache.pop(outpoint);
            }
            for coin in &undo.coins {
                let outpoint = OutPoint {
                    txid: coin.out_txid,
                    vout: coin.out_index,
                };
                cache.put(outpoint, coin.clone());
            }
        }
        Ok(())
    }

    /// Runs one pruning step at `current_height`: deletes any block/undo
    /// body whose scheduled deletion height has arrived. Never prunes below
    /// `prune_after_height` (spec §4.3 "Never prune below pruneAfterHeight").
    pub fn run_prune_step(&self, current_height: u32) -> StoreResult<()> {
        if current_height < self.params.prune_after_height {
            return Ok(());
        }
        if let Some(hash_bytes) = self.prune_queue.get(keys::height_key(current_height))? {
            let hash = BlockHash::from_slice(&hash_bytes).expect("32-byte hash");
            self.blocks.remove(keys::hash_key(&hash))?;
            self.undo.remove(keys::hash_key(&hash))?;
            self.prune_queue.remove(keys::height_key(current_height))?;
        }
        Ok(())
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
