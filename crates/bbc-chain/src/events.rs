use bbc_primitives::ChainEntry;
use bitcoin::{Block, BlockHash};

/// Broadcast to anything watching the chain (mempool eviction, sync driver
/// progress reporting). Spec §4.2 "Emits events
/// {block, fork, invalid, exists, orphan, full, chain-progress}".
#[derive(Clone, Debug)]
pub enum ChainEvent {
    Block { entry: ChainEntry, block: Block },
    Fork { entry: ChainEntry },
    Invalid { hash: BlockHash, reason: String },
    Exists { hash: BlockHash },
    Orphan { hash: BlockHash },
    Full { tip: ChainEntry },
    ChainProgress { height: u32, percent: f64 },
}

/// The result of `Chain::add` (spec §4.2 `add(block, source) ->
/// Result<AddOutcome>`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Connected,
    Orphaned,
    AlreadyKnown,
    SideBranch,
}
