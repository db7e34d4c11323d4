use std::collections::HashSet;

use bitcoin::{OutPoint, Transaction, Txid};

/// A transaction admitted into the mempool (spec §3 `MempoolEntry`).
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub arrival_time: u64,
    pub height_at_entry: u32,
    pub virtual_size: u64,
    pub fee: u64,
    pub chain_input_value: u64,
}

impl MempoolEntry {
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    pub fn fee_rate_sat_per_vb(&self) -> f64 {
        self.fee as f64 / self.virtual_size.max(1) as f64
    }

    /// Bitcoin Core's legacy "priority" metric: sum over inputs of
    /// `value * age-in-blocks`, divided by virtual size. Used by the
    /// free-relay gate (spec §4.4 step 7, `getPriority(height+1) >
    /// FREE_THRESHOLD`).
    pub fn priority(&self, current_height: u32, input_heights: &[(OutPoint, u32, u64)]) -> f64 {
        let mut sum = 0f64;
        for (_outpoint, height, value) in input_heights {
            let age = current_height.saturating_sub(*height);
            sum += *value as f64 * age as f64;
        }
        sum / self.virtual_size.max(1) as f64
    }
}

/// A transaction parked because one or more parents are unknown (spec §3
/// `OrphanTx`).
#[derive(Clone, Debug)]
pub struct OrphanTx {
    pub tx: Transaction,
    pub missing_parents: HashSet<Txid>,
    pub arrival_time: u64,
}

impl OrphanTx {
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }
}
