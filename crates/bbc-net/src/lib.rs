//! Peer-to-peer networking and the sync driver (spec §4.5): wire framing,
//! the peer handshake, and the pool that drives headers/blocks-first sync,
//! transaction broadcast, and ban scoring.

mod ban;
mod error;
mod peer;
mod pool;
mod wire;

pub use ban::BanList;
pub use error::{NetError, NetResult};
pub use peer::{Peer, PeerInfo};
pub use pool::{Pool, PeerHandle};
pub use wire::{
    encode_message, read_message, write_message, Command, CountedHeader, Locator, Message, NetAddr, Nonce,
    ServiceFlags, TimestampedAddr, VersionPayload, MAX_MESSAGE_SIZE,
};
