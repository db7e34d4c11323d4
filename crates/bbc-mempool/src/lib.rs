//! The mempool (spec §4.4): admission pipeline, orphan pool, and
//! fee/priority-gated eviction over not-yet-confirmed transactions.

mod entry;
mod error;
mod events;
mod orphan;
mod policy;
mod pool;

pub use entry::{MempoolEntry, OrphanTx};
pub use error::{ChainErrorWrapper, MempoolError, MempoolResult};
pub use events::MempoolEvent;
pub use pool::Mempool;

#[cfg(test)]
mod tests {
    use super::*;
    use bbc_chain::Chain;
    use bbc_primitives::{ChainEntry, Coin, NetworkParams};
    use bbc_store::{Store, StoreMode};
    use bitcoin::absolute::LockTime;
    use bitcoin::block::Version as BlockVersion;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version as TxVersion;
    use bitcoin::{
        Amount, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxMerkleNode, TxOut,
        Txid, Witness,
    };
    use std::sync::Arc;

    fn genesis_header(params: &NetworkParams) -> bitcoin::block::Header {
        bitcoin::block::Header {
            version: BlockVersion::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_296_688_602,
            bits: CompactTarget::from_consensus(params.pow_limit_bits),
            nonce: 2,
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<Store>, Arc<Chain>, Arc<NetworkParams>) {
        let dir = tempfile::tempdir().unwrap();
        let params = Arc::new(NetworkParams::regtest());
        let store = Arc::new(Store::open(dir.path(), params.clone(), StoreMode::Full).unwrap());
        let header = genesis_header(&params);
        let chain = Arc::new(Chain::new(store.clone(), params.clone(), header).unwrap());
        (dir, store, chain, params)
    }

    /// Seeds a spendable anyone-can-spend coin at height 1 without going
    /// through full block validation, so pool tests can exercise coin
    /// resolution/fee/script checks without constructing a valid PoW chain.
    fn seed_coin(store: &Store, tip: &ChainEntry, value: u64) -> (OutPoint, ChainEntry) {
        let header = bitcoin::block::Header {
            version: BlockVersion::ONE,
            prev_blockhash: tip.hash(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: tip.header.time + 1,
            bits: tip.header.bits,
            nonce: 0,
        };
        let entry = tip.child(header);
        let coinbase_txid = Txid::all_zeros();
        let outpoint = OutPoint {
            txid: coinbase_txid,
            vout: 0,
        };
        let coin = Coin::new(value, ScriptBuf::from(vec![0x51]), entry.height, false, coinbase_txid, 0);
        store.connect(&entry, None, None, &[], &[(outpoint, coin)]).unwrap();
        (outpoint, entry)
    }

    fn spend_tx(outpoint: OutPoint, value: u64) -> Transaction {
        Transaction {
            version: TxVersion::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(value),
                script_pubkey: ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::all_zeros()),
            }],
        }
    }

    #[test]
    fn rejects_insane_empty_transaction() {
        let (_dir, store, chain, params) = setup();
        let mempool = Mempool::new(chain, store, params);
        let tx = Transaction {
            version: TxVersion::ONE,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![],
        };
        assert_eq!(mempool.add_tx(tx), Err(MempoolError::Empty));
    }

    #[test]
    fn admits_transaction_spending_a_confirmed_coin() {
        let (_dir, store, chain, params) = setup();
        let tip = chain.tip();
        let (outpoint, _entry) = seed_coin(&store, &tip, 100_000);
        let mempool = Mempool::new(chain, store, params);

        let tx = spend_tx(outpoint, 99_900);
        let txid = tx.compute_txid();
        mempool.add_tx(tx).unwrap();

        assert!(mempool.contains(&txid));
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn rejects_double_spend_of_same_input() {
        let (_dir, store, chain, params) = setup();
        let tip = chain.tip();
        let (outpoint, _entry) = seed_coin(&store, &tip, 100_000);
        let mempool = Mempool::new(chain, store, params);

        let tx1 = spend_tx(outpoint, 99_900);
        mempool.add_tx(tx1).unwrap();

        let tx2 = spend_tx(outpoint, 99_800);
        assert_eq!(mempool.add_tx(tx2), Err(MempoolError::DoubleSpend));
    }

    #[test]
    fn parks_transaction_with_unknown_parent_as_orphan() {
        let (_dir, store, chain, params) = setup();
        let mempool = Mempool::new(chain, store, params);
        let unknown = OutPoint {
            txid: Txid::all_zeros(),
            vout: 5,
        };
        let tx = spend_tx(unknown, 1000);
        let txid = tx.compute_txid();
        mempool.add_tx(tx).unwrap();
        assert!(!mempool.contains(&txid));
    }
}
