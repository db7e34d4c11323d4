//! Wire framing and message (de)serialization (spec §6), grounded in the
//! zebra-network `Message`/`Command` split (`other_examples/`) adapted to
//! Bitcoin's message set.

mod command;
mod framing;
mod message;
mod types;

pub use command::Command;
pub use framing::{encode_message, read_message, write_message, MAX_MESSAGE_SIZE};
pub use message::{CountedHeader, Locator, Message, VersionPayload};
pub use types::{NetAddr, Nonce, ServiceFlags, TimestampedAddr};
