//! The persistent chain store (spec §4.3): a `sled`-backed key space keyed
//! by block hash, height, and outpoint, with LRU caches in front of the hot
//! prefixes and a pruning queue for non-archival nodes.

pub mod error;
mod keys;
mod store;

pub use error::{StoreError, StoreResult};
pub use store::{Store, StoreMode};

#[cfg(test)]
mod tests {
    use super::*;
    use bbc_primitives::{ChainEntry, Coin, NetworkParams, UndoRecord};
    use bitcoin::absolute::LockTime;
    use bitcoin::block::Version;
    use bitcoin::hashes::Hash;
    use bitcoin::transaction::Version as TxVersion;
    use bitcoin::{Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Transaction, TxMerkleNode, Txid};
    use std::sync::Arc;

    fn header(prev: BlockHash, nonce: u32) -> bitcoin::block::Header {
        bitcoin::block::Header {
            version: Version::ONE,
            prev_blockhash: prev,
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_600_000_000,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce,
        }
    }

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let params = Arc::new(NetworkParams::regtest());
        let store = Store::open(dir.path(), params, StoreMode::Full).unwrap();
        (dir, store)
    }

    #[test]
    fn connect_advances_tip_and_height_index() {
        let (_dir, store) = open_store();
        let genesis = ChainEntry::genesis(header(BlockHash::all_zeros(), 0));
        let block = Block {
            header: genesis.header,
            txdata: vec![Transaction {
                version: TxVersion::ONE,
                lock_time: LockTime::ZERO,
                input: vec![],
                output: vec![],
            }],
        };
        store.connect(&genesis, Some(&block), None, &[], &[]).unwrap();

        assert_eq!(store.tip().unwrap(), Some(genesis.hash()));
        assert_eq!(store.hash_by_height(0).unwrap(), Some(genesis.hash()));
        assert_eq!(store.height_by_hash(&genesis.hash()).unwrap(), Some(0));
        assert!(store.block(&genesis.hash()).unwrap().is_some());
    }

    #[test]
    fn coins_created_and_spent_round_trip() {
        let (_dir, store) = open_store();
        let genesis = ChainEntry::genesis(header(BlockHash::all_zeros(), 1));
        let outpoint = OutPoint {
            txid: Txid::all_zeros(),
            vout: 0,
        };
        let coin = Coin::new(5_000_000_000, ScriptBuf::new(), 0, true, Txid::all_zeros(), 0);
        store
            .connect(&genesis, None, None, &[], &[(outpoint, coin.clone())])
            .unwrap();
        assert_eq!(store.coin(&outpoint).unwrap(), Some(coin));

        let child = genesis.child(header(genesis.hash(), 2));
        store.connect(&child, None, None, &[outpoint], &[]).unwrap();
        assert_eq!(store.coin(&outpoint).unwrap(), None);
    }

    #[test]
    fn disconnect_restores_previous_tip() {
        let (_dir, store) = open_store();
        let genesis = ChainEntry::genesis(header(BlockHash::all_zeros(), 3));
        store.connect(&genesis, None, None, &[], &[]).unwrap();
        let child = genesis.child(header(genesis.hash(), 4));
        store.connect(&child, None, None, &[], &[]).unwrap();
        assert_eq!(store.tip().unwrap(), Some(child.hash()));

        store
            .disconnect(&child.hash(), &genesis.hash(), child.height, &Default::default(), &[])
            .unwrap();
        assert_eq!(store.tip().unwrap(), Some(genesis.hash()));
        assert_eq!(store.hash_by_height(child.height).unwrap(), None);
    }

    #[test]
    fn disconnect_deletes_undo_record_and_restores_coins() {
        let (_dir, store) = open_store();
        let genesis = ChainEntry::genesis(header(BlockHash::all_zeros(), 5));
        store.connect(&genesis, None, None, &[], &[]).unwrap();

        let spent_outpoint = OutPoint {
            txid: Txid::all_zeros(),
            vout: 0,
        };
        let spent_coin = Coin::new(1_000_000_000, ScriptBuf::new(), 0, true, Txid::all_zeros(), 0);
        let new_outpoint = OutPoint {
            txid: Txid::all_zeros(),
            vout: 1,
        };
        let undo = UndoRecord {
            coins: vec![spent_coin.clone()],
        };
        let child = genesis.child(header(genesis.hash(), 6));
        store
            .connect(&child, None, Some(&undo), &[spent_outpoint], &[(new_outpoint, Coin::new(2_000_000_000, ScriptBuf::new(), 0, true, Txid::all_zeros(), 1))])
            .unwrap();
        assert!(store.undo_record(&child.hash()).unwrap().is_some());
        assert_eq!(store.coin(&spent_outpoint).unwrap(), None);

        store
            .disconnect(&child.hash(), &genesis.hash(), child.height, &undo, &[new_outpoint])
            .unwrap();

        assert_eq!(store.undo_record(&child.hash()).unwrap(), None);
        assert_eq!(store.coin(&spent_outpoint).unwrap(), Some(spent_coin));
        assert_eq!(store.coin(&new_outpoint).unwrap(), None);
    }
}
