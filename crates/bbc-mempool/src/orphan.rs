use std::collections::HashMap;

use bitcoin::Txid;
use rand::seq::IteratorRandom;

use crate::entry::OrphanTx;

/// Transactions waiting on unresolved parents, capped at `MAX_ORPHAN_TX`
/// with random eviction (spec §4.4 step 6).
pub struct OrphanPool {
    max_size: usize,
    by_txid: HashMap<Txid, OrphanTx>,
    by_missing_parent: HashMap<Txid, Vec<Txid>>,
}

impl OrphanPool {
    pub fn new(max_size: usize) -> Self {
        OrphanPool {
            max_size,
            by_txid: HashMap::new(),
            by_missing_parent: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_txid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_txid.is_empty()
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.by_txid.contains_key(txid)
    }

    pub fn insert(&mut self, orphan: OrphanTx) {
        let txid = orphan.txid();
        for parent in &orphan.missing_parents {
            self.by_missing_parent.entry(*parent).or_default().push(txid);
        }
        self.by_txid.insert(txid, orphan);

        while self.by_txid.len() > self.max_size {
            self.evict_random();
        }
    }

    /// Returns orphans that were waiting on `parent_txid` so the caller can
    /// retry admitting them now that the parent landed (spec §4.4 step 10,
    /// "try to promote resolvable orphans transitively").
    pub fn take_waiting_on(&mut self, parent_txid: &Txid) -> Vec<OrphanTx> {
        let Some(waiting) = self.by_missing_parent.remove(parent_txid) else {
            return Vec::new();
        };
        waiting
            .into_iter()
            .filter_map(|txid| self.by_txid.remove(&txid))
            .collect()
    }

    fn evict_random(&mut self) {
        let mut rng = rand::thread_rng();
        let Some(&txid) = self.by_txid.keys().choose(&mut rng) else {
            return;
        };
        self.remove(&txid);
    }

    pub fn remove(&mut self, txid: &Txid) -> Option<OrphanTx> {
        let orphan = self.by_txid.remove(txid)?;
        for parent in &orphan.missing_parents {
            if let Some(list) = self.by_missing_parent.get_mut(parent) {
                list.retain(|t| t != txid);
                if list.is_empty() {
                    self.by_missing_parent.remove(parent);
                }
            }
        }
        Some(orphan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{hashes::Hash, Transaction};
    use std::collections::HashSet;

    fn tx() -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![],
        }
    }

    #[test]
    fn take_waiting_on_returns_and_removes() {
        let mut pool = OrphanPool::new(10);
        let parent = Txid::all_zeros();
        let orphan = OrphanTx {
            tx: tx(),
            missing_parents: HashSet::from([parent]),
            arrival_time: 0,
        };
        let txid = orphan.txid();
        pool.insert(orphan);
        assert!(pool.contains(&txid));

        let resolved = pool.take_waiting_on(&parent);
        assert_eq!(resolved.len(), 1);
        assert!(!pool.contains(&txid));
    }

    #[test]
    fn evicts_when_over_capacity() {
        let mut pool = OrphanPool::new(1);
        for i in 0..3u8 {
            let mut t = tx();
            t.lock_time = LockTime::from_consensus(i as u32);
            let parent = Txid::all_zeros();
            pool.insert(OrphanTx {
                tx: t,
                missing_parents: HashSet::from([parent]),
                arrival_time: i as u64,
            });
        }
        assert!(pool.len() <= 1);
    }
}
