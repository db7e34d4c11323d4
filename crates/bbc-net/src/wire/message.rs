use std::io;

use bbc_primitives::InvItem;
use bitcoin::consensus::encode::{self, Decodable, Encodable, VarInt};
use bitcoin::{block, Block, BlockHash, Transaction};

use crate::error::NetResult;
use crate::wire::command::Command;
use crate::wire::types::{decode_vec, encode_vec, NetAddr, Nonce, TimestampedAddr};

const MAX_INV_ENTRIES: u64 = 50_000;
const MAX_ADDR_ENTRIES: u64 = 1000;
const MAX_HEADERS: u64 = 2_000;

/// `getblocks`/`getheaders` share this payload shape: a protocol version,
/// a block locator (highest to lowest), and an optional stop hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locator {
    pub version: u32,
    pub hashes: Vec<BlockHash>,
    pub stop: BlockHash,
}

impl Encodable for Locator {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = self.version.consensus_encode(w)?;
        len += encode_vec(&self.hashes, w)?;
        len += self.stop.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for Locator {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(Locator {
            version: Decodable::consensus_decode(r)?,
            hashes: decode_vec(r, 2_000)?,
            stop: Decodable::consensus_decode(r)?,
        })
    }
}

/// A `headers` entry: a full block header plus its (always-zero on the
/// wire) transaction count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CountedHeader {
    pub header: block::Header,
}

impl Encodable for CountedHeader {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = self.header.consensus_encode(w)?;
        len += VarInt(0).consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for CountedHeader {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        let header = block::Header::consensus_decode(r)?;
        let _tx_count = VarInt::consensus_decode(r)?;
        Ok(CountedHeader { header })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionPayload {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub receiver: NetAddr,
    pub sender: NetAddr,
    pub nonce: Nonce,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl Encodable for VersionPayload {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = self.version.consensus_encode(w)?;
        len += self.services.consensus_encode(w)?;
        len += self.timestamp.consensus_encode(w)?;
        len += self.receiver.consensus_encode(w)?;
        len += self.sender.consensus_encode(w)?;
        len += self.nonce.consensus_encode(w)?;
        len += self.user_agent.as_bytes().to_vec().consensus_encode(w)?;
        len += self.start_height.consensus_encode(w)?;
        len += (self.relay as u8).consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for VersionPayload {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        let version = i32::consensus_decode(r)?;
        let services = u64::consensus_decode(r)?;
        let timestamp = i64::consensus_decode(r)?;
        let receiver = NetAddr::consensus_decode(r)?;
        let sender = NetAddr::consensus_decode(r)?;
        let nonce = u64::consensus_decode(r)?;
        let user_agent_bytes = Vec::<u8>::consensus_decode(r)?;
        let user_agent = String::from_utf8_lossy(&user_agent_bytes).into_owned();
        let start_height = i32::consensus_decode(r)?;
        let relay = u8::consensus_decode(r).unwrap_or(1) != 0;
        Ok(VersionPayload {
            version,
            services,
            timestamp,
            receiver,
            sender,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

/// The network message set, internal representation decoupled from the
/// 12-byte ASCII command name (spec §4.5 expansion, grounded in
/// `other_examples/` zebra-network's `Message`/`Command` split).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Verack,
    Ping(Nonce),
    Pong(Nonce),
    GetAddr,
    Addr(Vec<TimestampedAddr>),
    Inv(Vec<InvItem>),
    GetData(Vec<InvItem>),
    NotFound(Vec<InvItem>),
    GetBlocks(Locator),
    GetHeaders(Locator),
    Headers(Vec<CountedHeader>),
    Tx(Box<Transaction>),
    Block(Box<Block>),
    /// Carried opaquely: BIP37 filter *matching* is out of scope (spec §1),
    /// so a received `merkleblock` is kept as its raw payload rather than
    /// parsed into a partial merkle tree we'd never evaluate.
    MerkleBlock(Vec<u8>),
    Mempool,
    FilterLoad { filter: Vec<u8>, hash_funcs: u32, tweak: u32, flags: u8 },
    FilterAdd(Vec<u8>),
    FilterClear,
    Reject { message: String, code: u8, reason: String, data: Option<[u8; 32]> },
    SendHeaders,
    FeeFilter(u64),
    SendCmpct { announce: bool, version: u64 },
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Version(_) => Command::Version,
            Message::Verack => Command::Verack,
            Message::Ping(_) => Command::Ping,
            Message::Pong(_) => Command::Pong,
            Message::GetAddr => Command::GetAddr,
            Message::Addr(_) => Command::Addr,
            Message::Inv(_) => Command::Inv,
            Message::GetData(_) => Command::GetData,
            Message::NotFound(_) => Command::NotFound,
            Message::GetBlocks(_) => Command::GetBlocks,
            Message::GetHeaders(_) => Command::GetHeaders,
            Message::Headers(_) => Command::Headers,
            Message::Tx(_) => Command::Tx,
            Message::Block(_) => Command::Block,
            Message::MerkleBlock(_) => Command::MerkleBlock,
            Message::Mempool => Command::Mempool,
            Message::FilterLoad { .. } => Command::FilterLoad,
            Message::FilterAdd(_) => Command::FilterAdd,
            Message::FilterClear => Command::FilterClear,
            Message::Reject { .. } => Command::Reject,
            Message::SendHeaders => Command::SendHeaders,
            Message::FeeFilter(_) => Command::FeeFilter,
            Message::SendCmpct { .. } => Command::SendCmpct,
        }
    }

    pub fn encode_payload(&self) -> NetResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Message::Version(v) => {
                v.consensus_encode(&mut buf)?;
            }
            Message::Verack | Message::GetAddr | Message::Mempool | Message::FilterClear | Message::SendHeaders => {}
            Message::Ping(n) | Message::Pong(n) => {
                n.consensus_encode(&mut buf)?;
            }
            Message::Addr(items) => {
                encode_vec(items, &mut buf)?;
            }
            Message::Inv(items) | Message::GetData(items) | Message::NotFound(items) => {
                encode_vec(items, &mut buf)?;
            }
            Message::GetBlocks(l) | Message::GetHeaders(l) => {
                l.consensus_encode(&mut buf)?;
            }
            Message::Headers(h) => {
                encode_vec(h, &mut buf)?;
            }
            Message::Tx(tx) => {
                tx.consensus_encode(&mut buf)?;
            }
            Message::Block(b) => {
                b.consensus_encode(&mut buf)?;
            }
            Message::MerkleBlock(raw) => {
                buf.extend_from_slice(raw);
            }
            Message::FilterLoad { filter, hash_funcs, tweak, flags } => {
                filter.consensus_encode(&mut buf)?;
                hash_funcs.consensus_encode(&mut buf)?;
                tweak.consensus_encode(&mut buf)?;
                flags.consensus_encode(&mut buf)?;
            }
            Message::FilterAdd(data) => {
                data.consensus_encode(&mut buf)?;
            }
            Message::Reject { message, code, reason, data } => {
                message.as_bytes().to_vec().consensus_encode(&mut buf)?;
                code.consensus_encode(&mut buf)?;
                reason.as_bytes().to_vec().consensus_encode(&mut buf)?;
                if let Some(d) = data {
                    d.consensus_encode(&mut buf)?;
                }
            }
            Message::FeeFilter(rate) => {
                rate.consensus_encode(&mut buf)?;
            }
            Message::SendCmpct { announce, version } => {
                (*announce as u8).consensus_encode(&mut buf)?;
                version.consensus_encode(&mut buf)?;
            }
        }
        Ok(buf)
    }

    pub fn decode_payload(command: Command, payload: &[u8]) -> NetResult<Self> {
        if command == Command::MerkleBlock {
            return Ok(Message::MerkleBlock(payload.to_vec()));
        }
        let mut cursor = payload;
        let r = &mut cursor;
        Ok(match command {
            Command::Version => Message::Version(VersionPayload::consensus_decode(r)?),
            Command::Verack => Message::Verack,
            Command::GetAddr => Message::GetAddr,
            Command::Mempool => Message::Mempool,
            Command::FilterClear => Message::FilterClear,
            Command::SendHeaders => Message::SendHeaders,
            Command::Ping => Message::Ping(u64::consensus_decode(r)?),
            Command::Pong => Message::Pong(u64::consensus_decode(r)?),
            Command::Addr => Message::Addr(decode_vec(r, MAX_ADDR_ENTRIES)?),
            Command::Inv => Message::Inv(decode_vec(r, MAX_INV_ENTRIES)?),
            Command::GetData => Message::GetData(decode_vec(r, MAX_INV_ENTRIES)?),
            Command::NotFound => Message::NotFound(decode_vec(r, MAX_INV_ENTRIES)?),
            Command::GetBlocks => Message::GetBlocks(Locator::consensus_decode(r)?),
            Command::GetHeaders => Message::GetHeaders(Locator::consensus_decode(r)?),
            Command::Headers => Message::Headers(decode_vec(r, MAX_HEADERS)?),
            Command::Tx => Message::Tx(Box::new(Transaction::consensus_decode(r)?)),
            Command::Block => Message::Block(Box::new(Block::consensus_decode(r)?)),
            Command::FilterLoad => Message::FilterLoad {
                filter: Vec::<u8>::consensus_decode(r)?,
                hash_funcs: u32::consensus_decode(r)?,
                tweak: u32::consensus_decode(r)?,
                flags: u8::consensus_decode(r)?,
            },
            Command::FilterAdd => Message::FilterAdd(Vec::<u8>::consensus_decode(r)?),
            Command::Reject => {
                let message_bytes = Vec::<u8>::consensus_decode(r)?;
                let code = u8::consensus_decode(r)?;
                let reason_bytes = Vec::<u8>::consensus_decode(r)?;
                let mut data = [0u8; 32];
                let has_data = std::io::Read::read_exact(r, &mut data).is_ok();
                Message::Reject {
                    message: String::from_utf8_lossy(&message_bytes).into_owned(),
                    code,
                    reason: String::from_utf8_lossy(&reason_bytes).into_owned(),
                    data: has_data.then_some(data),
                }
            }
            Command::FeeFilter => Message::FeeFilter(u64::consensus_decode(r)?),
            Command::SendCmpct => Message::SendCmpct {
                announce: u8::consensus_decode(r)? != 0,
                version: u64::consensus_decode(r)?,
            },
        })
    }
}
