use std::io;

use bitcoin::block::Header as BlockHeader;
use bitcoin::consensus::encode::{self, Decodable, Encodable};
use bitcoin::pow::Work;
use bitcoin::BlockHash;

use crate::work::target_to_work;

/// A node in the block index: a header plus the derived facts the chain
/// engine and store need on every lookup so they never have to walk
/// ancestors to answer them (spec §4.3 `e/` prefix: "Header + height +
/// chainwork").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainEntry {
    pub header: BlockHeader,
    pub height: u32,
    pub chainwork: Work,
}

impl ChainEntry {
    pub fn genesis(header: BlockHeader) -> Self {
        let work = target_to_work(&header);
        ChainEntry {
            header,
            height: 0,
            chainwork: work,
        }
    }

    pub fn child(&self, header: BlockHeader) -> Self {
        let work = target_to_work(&header);
        ChainEntry {
            header,
            height: self.height + 1,
            chainwork: self.chainwork + work,
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.block_hash()
    }
}

impl Encodable for ChainEntry {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;
        len += self.header.consensus_encode(w)?;
        len += self.height.consensus_encode(w)?;
        let work_bytes = self.chainwork.to_be_bytes();
        w.write_all(&work_bytes)?;
        len += work_bytes.len();
        Ok(len)
    }
}

impl Decodable for ChainEntry {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        let header = BlockHeader::consensus_decode(r)?;
        let height = u32::consensus_decode(r)?;
        let mut work_bytes = [0u8; 32];
        r.read_exact(&mut work_bytes)
            .map_err(|e| encode::Error::Io(e.into()))?;
        let chainwork = Work::from_be_bytes(work_bytes);
        Ok(ChainEntry {
            header,
            height,
            chainwork,
        })
    }
}

impl PartialOrd for ChainEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChainEntry {
    /// More chainwork wins; ties break toward the entry seen first (lower
    /// height acts as a stable proxy since entries are only compared within
    /// a single store's candidate set).
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.chainwork
            .cmp(&other.chainwork)
            .then_with(|| other.height.cmp(&self.height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::block::Version;
    use bitcoin::hashes::Hash as _;
    use bitcoin::{CompactTarget, TxMerkleNode};

    fn header() -> BlockHeader {
        BlockHeader {
            version: Version::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1,
            bits: CompactTarget::from_consensus(0x1d00ffff),
            nonce: 0,
        }
    }

    #[test]
    fn child_accumulates_work_and_height() {
        let genesis = ChainEntry::genesis(header());
        let child = genesis.child(header());
        assert_eq!(child.height, 1);
        assert!(child.chainwork > genesis.chainwork);
    }

    #[test]
    fn round_trips_through_bytes() {
        let entry = ChainEntry::genesis(header());
        let mut bytes = Vec::new();
        entry.consensus_encode(&mut bytes).unwrap();
        let back = ChainEntry::consensus_decode(&mut &bytes[..]).unwrap();
        assert_eq!(entry, back);
    }
}
