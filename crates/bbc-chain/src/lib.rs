//! The chain engine (spec §4.2): sole writer to the chain store. Validates
//! headers and full blocks, maintains the tip, and reorganizes across
//! competing branches by cumulative chainwork.

pub mod engine;
pub mod error;
mod events;
mod orphan;
mod pow;
mod state;
mod versionbits;

pub use engine::{Chain, LockFlags, ResetTarget};
pub use error::{ChainError, ChainResult};
pub use events::{AddOutcome, ChainEvent};
pub use pow::{check_proof_of_work, median_time_past, next_work_required};
pub use state::EntryState;
pub use versionbits::{state_at as versionbits_state_at, ThresholdState};

#[cfg(test)]
mod tests {
    use super::*;
    use bbc_primitives::NetworkParams;
    use bbc_store::{Store, StoreMode};
    use bitcoin::block::Version;
    use bitcoin::hashes::Hash;
    use bitcoin::{BlockHash, CompactTarget, TxMerkleNode};
    use std::sync::Arc;

    fn genesis_header(params: &NetworkParams) -> bitcoin::block::Header {
        bitcoin::block::Header {
            version: Version::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_296_688_602,
            bits: CompactTarget::from_consensus(params.pow_limit_bits),
            nonce: 2,
        }
    }

    fn open_chain() -> (tempfile::TempDir, Chain) {
        let dir = tempfile::tempdir().unwrap();
        let params = Arc::new(NetworkParams::regtest());
        let store = Arc::new(Store::open(dir.path(), params.clone(), StoreMode::Full).unwrap());
        let header = genesis_header(&params);
        let chain = Chain::new(store, params, header).unwrap();
        (dir, chain)
    }

    #[test]
    fn new_chain_starts_at_genesis() {
        let (_dir, chain) = open_chain();
        assert_eq!(chain.tip().height, 0);
    }

    #[test]
    fn unknown_parent_is_parked_as_orphan() {
        let (_dir, chain) = open_chain();
        let orphan_block = bitcoin::Block {
            header: bitcoin::block::Header {
                version: Version::ONE,
                prev_blockhash: BlockHash::all_zeros(),
                merkle_root: TxMerkleNode::all_zeros(),
                time: 1,
                bits: CompactTarget::from_consensus(0x207fffff),
                nonce: 0,
            },
            txdata: vec![],
        };
        // prev_blockhash is all-zeros, which is not the actual genesis hash
        // of this chain, so this block's parent is unknown.
        let outcome = chain.add(orphan_block).unwrap();
        assert_eq!(outcome, AddOutcome::Orphaned);
    }

    #[test]
    fn get_locator_starts_from_tip() {
        let (_dir, chain) = open_chain();
        let locator = chain.get_locator(None).unwrap();
        assert_eq!(locator.first().copied(), Some(chain.tip().hash()));
    }
}
