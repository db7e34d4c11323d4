use std::collections::HashMap;

use bitcoin::{Block, BlockHash};

const MAX_ORPHAN_BLOCKS: usize = 750;

/// Blocks whose parent hasn't been seen yet, keyed by the missing parent's
/// hash so a later `add` of that parent can pull its children back in
/// (spec §4.2 step 2, "park B in the orphan pool keyed by prev-hash").
#[derive(Default)]
pub struct OrphanPool {
    by_parent: HashMap<BlockHash, Vec<Block>>,
    known: HashMap<BlockHash, BlockHash>,
}

impl OrphanPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.known.contains_key(hash)
    }

    pub fn insert(&mut self, block: Block) {
        let hash = block.block_hash();
        if self.known.contains_key(&hash) {
            return;
        }
        let parent = block.header.prev_blockhash;
        self.known.insert(hash, parent);
        self.by_parent.entry(parent).or_default().push(block);

        if self.known.len() > MAX_ORPHAN_BLOCKS {
            self.evict_oldest();
        }
    }

    /// Removes and returns all orphans whose parent is now `hash`, so the
    /// caller can attempt to connect them (spec §4.2 step 6, "scanning the
    /// orphan pool for children whose parent now exists").
    pub fn take_children(&mut self, hash: &BlockHash) -> Vec<Block> {
        let children = self.by_parent.remove(hash).unwrap_or_default();
        for child in &children {
            self.known.remove(&child.block_hash());
        }
        children
    }

    /// Walks from `hash` up through the orphan pool to find the deepest
    /// still-missing ancestor (spec §4.2 `getOrphanRoot(hash) -> hash`).
    pub fn root(&self, hash: &BlockHash) -> BlockHash {
        let mut current = *hash;
        while let Some(parent) = self.known.get(&current) {
            if *parent == current {
                break;
            }
            current = *parent;
        }
        current
    }

    fn evict_oldest(&mut self) {
        if let Some((&parent, _)) = self.by_parent.iter().next() {
            if let Some(blocks) = self.by_parent.remove(&parent) {
                for block in blocks {
                    self.known.remove(&block.block_hash());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::block::Version;
    use bitcoin::hashes::Hash;
    use bitcoin::CompactTarget;
    use bitcoin::TxMerkleNode;

    fn block(prev: BlockHash, nonce: u32) -> Block {
        Block {
            header: bitcoin::block::Header {
                version: Version::ONE,
                prev_blockhash: prev,
                merkle_root: TxMerkleNode::all_zeros(),
                time: 0,
                bits: CompactTarget::from_consensus(0),
                nonce,
            },
            txdata: vec![],
        }
    }

    #[test]
    fn take_children_returns_orphans_by_parent() {
        let mut pool = OrphanPool::new();
        let parent = BlockHash::all_zeros();
        let child = block(parent, 1);
        let child_hash = child.block_hash();
        pool.insert(child);
        assert!(pool.contains(&child_hash));

        let children = pool.take_children(&parent);
        assert_eq!(children.len(), 1);
        assert!(!pool.contains(&child_hash));
    }

    #[test]
    fn root_walks_to_deepest_missing_ancestor() {
        let mut pool = OrphanPool::new();
        let root_hash = BlockHash::all_zeros();
        let mid = block(root_hash, 1);
        let mid_hash = mid.block_hash();
        let tip = block(mid_hash, 2);
        let tip_hash = tip.block_hash();
        pool.insert(mid);
        pool.insert(tip);
        assert_eq!(pool.root(&tip_hash), root_hash);
    }
}
