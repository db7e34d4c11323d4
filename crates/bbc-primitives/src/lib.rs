//! Shared wire/consensus types for the node: coins, undo records, inventory
//! items, network parameters, and the chainwork accumulator.
//!
//! Block/transaction wire structures themselves are not redefined here — we
//! build on `bitcoin`'s `Transaction`, `Block`, `block::Header`, `Script`,
//! `OutPoint`, and hashing types rather than re-encode what the crate already
//! gets right.

pub mod adapter;
pub mod coin;
pub mod entry;
pub mod inv;
pub mod params;
pub mod varint;
pub mod work;

pub use adapter::Adapter;
pub use coin::{Coin, UndoRecord};
pub use entry::ChainEntry;
pub use inv::{InvItem, InvType, WITNESS_MASK};
pub use params::{Checkpoint, Deployment, NetworkParams};
pub use work::target_to_work;
