use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bbc_chain::{Chain, LockFlags};
use bbc_primitives::{Coin, NetworkParams};
use bbc_script::{verify, ScriptFlags, TransactionSignatureChecker};
use bbc_store::Store;
use bitcoin::{OutPoint, Transaction, Txid};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::entry::{MempoolEntry, OrphanTx};
use crate::error::{MempoolError, MempoolResult};
use crate::events::MempoolEvent;
use crate::orphan::OrphanPool;
use crate::policy::{is_sane, is_standard};

/// The in-memory pool of not-yet-confirmed transactions (spec §4.4). The
/// chain engine is the sole writer of confirmed state; this struct is the
/// sole writer of unconfirmed state, consulting `Chain`/`Store` only for
/// reads (current tip, UTXO lookups).
pub struct Mempool {
    chain: Arc<Chain>,
    store: Arc<Store>,
    params: Arc<NetworkParams>,

    entries: RwLock<HashMap<Txid, MempoolEntry>>,
    spent_by: RwLock<HashMap<OutPoint, Txid>>,
    by_arrival: RwLock<BTreeMap<(u64, Txid), ()>>,
    orphans: RwLock<OrphanPool>,

    min_fee_rate: RwLock<f64>,
    last_decay: RwLock<u64>,
    free_budget: RwLock<f64>,
    last_free_refill: RwLock<u64>,

    events: tokio::sync::broadcast::Sender<MempoolEvent>,
}

/// Resolved input context needed for fee/priority/lock computation: the
/// coin being spent and whether it came from the confirmed UTXO set or
/// another mempool entry (unconfirmed ancestors don't have a store height).
enum ResolvedInput {
    Confirmed(Coin),
    InMempool { txid: Txid },
}

impl Mempool {
    pub fn new(chain: Arc<Chain>, store: Arc<Store>, params: Arc<NetworkParams>) -> Self {
        let (events, _) = tokio::sync::broadcast::channel(1024);
        Mempool {
            chain,
            store,
            params,
            entries: RwLock::new(HashMap::new()),
            spent_by: RwLock::new(HashMap::new()),
            by_arrival: RwLock::new(BTreeMap::new()),
            orphans: RwLock::new(OrphanPool::new(0)),
            min_fee_rate: RwLock::new(0.0),
            last_decay: RwLock::new(now()),
            free_budget: RwLock::new(0.0),
            last_free_refill: RwLock::new(now()),
            events,
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MempoolEvent> {
        self.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.entries.read().contains_key(txid)
    }

    pub fn get(&self, txid: &Txid) -> Option<MempoolEntry> {
        self.entries.read().get(txid).cloned()
    }

    fn emit(&self, event: MempoolEvent) {
        let _ = self.events.send(event);
    }

    /// Spec §4.4 `addTX(tx, isNew) -> Result<()>`: the full admission
    /// pipeline. Returns `Ok(())` once `tx` is resident in the pool (either
    /// immediately or, if an input is unresolved, parked as an orphan — in
    /// which case `Ok(())` still reflects "accepted for now").
    pub fn add_tx(&self, tx: Transaction) -> MempoolResult<()> {
        let txid = tx.compute_txid();

        if self.contains(&txid) || self.orphans.read().contains(&txid) {
            return Err(MempoolError::AlreadyKnown);
        }
        if !is_sane(&tx) {
            return Err(MempoolError::Empty);
        }
        if !is_standard(&tx) {
            return Err(MempoolError::NonStandard);
        }

        let tip = self.chain.tip();
        let lock_flags = LockFlags {
            height: tip.height + 1,
            median_time_past: bbc_chain::median_time_past(&self.store, &tip)?,
            verify_sequence: true,
        };
        if !self.chain.check_final(&tx, &lock_flags) {
            return Err(MempoolError::NonFinal);
        }

        for input in &tx.input {
            if let Some(spender) = self.spent_by.read().get(&input.previous_output) {
                if *spender != txid {
                    return Err(MempoolError::DoubleSpend);
                }
            }
        }

        let resolved = match self.resolve_inputs(&tx)? {
            Some(r) => r,
            None => {
                self.park_orphan(tx)?;
                return Ok(());
            }
        };

        if !self.chain.check_locks(&tx, &lock_flags)? {
            return Err(MempoolError::NonFinal);
        }

        let entries_guard = self.entries.read();
        let input_value: u64 = tx
            .input
            .iter()
            .zip(resolved.iter())
            .map(|(input, r)| match r {
                ResolvedInput::Confirmed(c) => c.value,
                ResolvedInput::InMempool { txid } => entries_guard
                    .get(txid)
                    .and_then(|e| e.tx.output.get(input.previous_output.vout as usize))
                    .map(|o| o.value.to_sat())
                    .unwrap_or(0),
            })
            .sum();
        drop(entries_guard);
        let output_value: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        if input_value < output_value {
            return Err(MempoolError::Chain(crate::error::ChainErrorWrapper(
                "inputs below outputs".into(),
            )));
        }
        let fee = input_value - output_value;
        let virtual_size = tx.weight().to_wu().div_ceil(4);

        self.check_fee_and_priority(&tx, fee, virtual_size, tip.height + 1, &resolved)?;
        self.check_ancestor_limit(&tx)?;
        self.check_scripts(&tx, &resolved)?;

        let entry = MempoolEntry {
            tx: tx.clone(),
            arrival_time: now(),
            height_at_entry: tip.height,
            virtual_size,
            fee,
            chain_input_value: input_value,
        };
        self.insert_entry(entry);
        self.emit(MempoolEvent::Added { txid });

        self.promote_orphans(txid)?;
        self.evict_to_capacity();
        Ok(())
    }

    /// Resolves every input's coin either from the confirmed UTXO set or
    /// from an in-mempool parent's outputs. Returns `None` (rather than an
    /// error) if any input is unresolved, signaling the orphan path (spec
    /// §4.4 step 6).
    fn resolve_inputs(&self, tx: &Transaction) -> MempoolResult<Option<Vec<ResolvedInput>>> {
        let entries = self.entries.read();
        let mut resolved = Vec::with_capacity(tx.input.len());
        for input in &tx.input {
            if let Some(parent) = entries.get(&input.previous_output.txid) {
                if (input.previous_output.vout as usize) >= parent.tx.output.len() {
                    return Err(MempoolError::Empty);
                }
                resolved.push(ResolvedInput::InMempool {
                    txid: input.previous_output.txid,
                });
                continue;
            }
            match self.store.coin(&input.previous_output)? {
                Some(coin) => resolved.push(ResolvedInput::Confirmed(coin)),
                None => return Ok(None),
            }
        }
        Ok(Some(resolved))
    }

    fn park_orphan(&self, tx: Transaction) -> MempoolResult<()> {
        let mut missing = HashSet::new();
        let entries = self.entries.read();
        for input in &tx.input {
            if entries.contains_key(&input.previous_output.txid) {
                continue;
            }
            if self.store.coin(&input.previous_output)?.is_none() {
                missing.insert(input.previous_output.txid);
            }
        }
        drop(entries);
        let txid = tx.compute_txid();
        debug!(%txid, missing_parents = missing.len(), "parking orphan transaction");
        self.orphans.write().insert(OrphanTx {
            tx,
            missing_parents: missing,
            arrival_time: now(),
        });
        self.emit(MempoolEvent::Orphaned { txid });
        Ok(())
    }

    /// Spec §4.4 step 7: `fee >= max(minRelayFeeRate, dynamicMinRate) *
    /// vsize`, with a free-relay exception for high-priority transactions
    /// bounded by a decaying per-period budget, and a sanity cap against
    /// implausibly large fees.
    fn check_fee_and_priority(
        &self,
        tx: &Transaction,
        fee: u64,
        virtual_size: u64,
        next_height: u32,
        resolved: &[ResolvedInput],
    ) -> MempoolResult<()> {
        self.decay_min_fee_rate();
        let dynamic_min = *self.min_fee_rate.read();
        let required_rate = (self.params.min_relay_fee_rate as f64 / 1000.0).max(dynamic_min);
        let rate = fee as f64 / virtual_size.max(1) as f64;

        if rate < required_rate {
            let input_heights: Vec<(OutPoint, u32, u64)> = tx
                .input
                .iter()
                .zip(resolved.iter())
                .filter_map(|(input, r)| match r {
                    ResolvedInput::Confirmed(coin) => {
                        Some((input.previous_output, coin.height, coin.value))
                    }
                    ResolvedInput::InMempool { .. } => None,
                })
                .collect();
            let entry_stub = MempoolEntry {
                tx: tx.clone(),
                arrival_time: now(),
                height_at_entry: next_height.saturating_sub(1),
                virtual_size,
                fee,
                chain_input_value: 0,
            };
            let priority = entry_stub.priority(next_height, &input_heights);

            if priority > self.params.free_threshold && self.spend_free_budget(virtual_size) {
                // allowed through the free-relay budget
            } else {
                return Err(MempoolError::InsufficientFee);
            }
        }

        let absurd_ceiling = (self.params.min_relay_fee_rate as f64 / 1000.0) * virtual_size as f64 * 10_000.0;
        if fee as f64 > absurd_ceiling.max(1_000_000.0) {
            return Err(MempoolError::AbsurdFee);
        }
        Ok(())
    }

    /// Refills and spends from a decaying per-period allowance of free-relay
    /// bytes, mirroring Bitcoin Core's `-limitfreerelay` bucket: `fee_halflife`
    /// controls how fast the allowance regenerates.
    fn spend_free_budget(&self, virtual_size: u64) -> bool {
        let t = now();
        let mut last = self.last_free_refill.write();
        let elapsed = t.saturating_sub(*last) as f64;
        let halflife = self.params.fee_halflife_secs.max(1) as f64;
        let mut budget = self.free_budget.write();
        *budget = (*budget + elapsed * (15_000.0 / halflife)).min(15_000.0);
        *last = t;
        if *budget >= virtual_size as f64 {
            *budget -= virtual_size as f64;
            true
        } else {
            false
        }
    }

    /// Spec §4.4 step 8 `ANCESTOR_LIMIT`: rejects a transaction whose
    /// unconfirmed-ancestor set (inputs spending other mempool entries,
    /// transitively) exceeds the bound.
    fn check_ancestor_limit(&self, tx: &Transaction) -> MempoolResult<()> {
        let entries = self.entries.read();
        let mut seen = HashSet::new();
        let mut stack: Vec<Txid> = tx.input.iter().map(|i| i.previous_output.txid).collect();
        while let Some(txid) = stack.pop() {
            if !seen.insert(txid) {
                continue;
            }
            if seen.len() > self.params.ancestor_limit {
                return Err(MempoolError::TooManyAncestors);
            }
            if let Some(parent) = entries.get(&txid) {
                stack.extend(parent.tx.input.iter().map(|i| i.previous_output.txid));
            }
        }
        Ok(())
    }

    /// Spec §4.4 step 9: verify under the full standard flag set first;
    /// transactions that fail standard-but-pass-mandatory verification are
    /// distinguished so callers can tell relay policy from consensus
    /// validity, per `ScriptFlags::MANDATORY` vs `ScriptFlags::standard()`.
    fn check_scripts(&self, tx: &Transaction, resolved: &[ResolvedInput]) -> MempoolResult<()> {
        let entries = self.entries.read();
        for (input_index, (input, r)) in tx.input.iter().zip(resolved.iter()).enumerate() {
            let (script_pubkey, amount) = match r {
                ResolvedInput::Confirmed(coin) => (coin.script_pubkey.clone(), coin.value),
                ResolvedInput::InMempool { txid } => {
                    let parent = entries.get(txid).ok_or(MempoolError::Empty)?;
                    let out = &parent.tx.output[input.previous_output.vout as usize];
                    (out.script_pubkey.clone(), out.value.to_sat())
                }
            };
            let checker = TransactionSignatureChecker {
                tx,
                input_index,
                amount,
            };
            let standard_flags = ScriptFlags::standard();
            if let Err(e) = verify(&input.script_sig, &script_pubkey, &input.witness, standard_flags, &checker) {
                let mandatory = ScriptFlags::MANDATORY;
                if verify(&input.script_sig, &script_pubkey, &input.witness, mandatory, &checker).is_err() {
                    return Err(MempoolError::MandatoryScriptCheckFailed(e.to_string()));
                }
                return Err(MempoolError::ScriptCheckFailed(e.to_string()));
            }
        }
        Ok(())
    }

    fn insert_entry(&self, entry: MempoolEntry) {
        let txid = entry.txid();
        for input in &entry.tx.input {
            self.spent_by.write().insert(input.previous_output, txid);
        }
        self.by_arrival.write().insert((entry.arrival_time, txid), ());
        self.entries.write().insert(txid, entry);
    }

    fn remove_entry(&self, txid: &Txid) -> Option<MempoolEntry> {
        let entry = self.entries.write().remove(txid)?;
        for input in &entry.tx.input {
            self.spent_by.write().remove(&input.previous_output);
        }
        self.by_arrival.write().remove(&(entry.arrival_time, *txid));
        Some(entry)
    }

    fn promote_orphans(&self, parent_txid: Txid) -> MempoolResult<()> {
        let waiting = self.orphans.write().take_waiting_on(&parent_txid);
        for orphan in waiting {
            let _ = self.add_tx(orphan.tx);
        }
        Ok(())
    }

    /// Spec §4.4 step 10 "removal on block acceptance": drop confirmed
    /// transactions from the pool, promote their former mempool-dependents'
    /// orphan entries to re-check, and note a bump for fee-rate recovery.
    pub fn remove_for_block(&self, confirmed: &[Transaction]) {
        for tx in confirmed.iter().rev() {
            let txid = tx.compute_txid();
            self.remove_entry(&txid);
            self.emit(MempoolEvent::Confirmed { txid });
        }
        *self.last_decay.write() = now();
    }

    /// Spec §4.4 step 10 "removal on disconnect": reinsert a disconnected
    /// block's non-coinbase transactions into the pool under the full
    /// admission pipeline so invalidated spends are re-evaluated.
    pub fn reinsert_for_disconnect(&self, disconnected: &[Transaction]) {
        for tx in disconnected.iter().skip(1) {
            let _ = self.add_tx(tx.clone());
        }
    }

    /// Spec §4.4 step 11: when the pool exceeds `mempool_max_bytes`, evict
    /// the lowest fee-rate entries until it fits, raising the dynamic
    /// minimum fee rate to the evicted transactions' rate (Bitcoin Core's
    /// `TrimToSize`).
    fn evict_to_capacity(&self) {
        let total_bytes: u64 = self.entries.read().values().map(|e| e.virtual_size).sum();
        if total_bytes <= self.params.mempool_max_bytes {
            return;
        }
        let mut by_rate: Vec<(f64, Txid)> = self
            .entries
            .read()
            .iter()
            .map(|(txid, e)| (e.fee_rate_sat_per_vb(), *txid))
            .collect();
        by_rate.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

        let mut bytes = total_bytes;
        let mut evicted_rate = 0.0;
        for (rate, txid) in by_rate {
            if bytes <= self.params.mempool_max_bytes {
                break;
            }
            if let Some(entry) = self.remove_entry(&txid) {
                bytes = bytes.saturating_sub(entry.virtual_size);
                evicted_rate = rate;
                self.emit(MempoolEvent::Evicted { txid });
            }
        }
        if evicted_rate > 0.0 {
            info!(bytes_over = total_bytes - self.params.mempool_max_bytes, new_min_fee_rate = evicted_rate, "evicting mempool entries to fit capacity");
            *self.min_fee_rate.write() = evicted_rate;
            *self.last_decay.write() = now();
        }
    }

    /// Halves the dynamic minimum fee rate every `fee_halflife_secs` of
    /// elapsed time since the last eviction/decay, so pressure-induced
    /// fee floors relax once the pool is no longer full.
    fn decay_min_fee_rate(&self) {
        let t = now();
        let mut last = self.last_decay.write();
        let elapsed = t.saturating_sub(*last);
        let halflife = self.params.fee_halflife_secs.max(1);
        if elapsed == 0 {
            return;
        }
        let halvings = elapsed as f64 / halflife as f64;
        let mut rate = self.min_fee_rate.write();
        *rate *= 0.5f64.powf(halvings);
        if *rate < 0.000_001 {
            *rate = 0.0;
        }
        *last = t;
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
