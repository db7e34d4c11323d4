use std::io;

use bitcoin::consensus::encode::{self, Decodable, Encodable};

/// Inventory mask applied to `getdata` to request the witness serialization
/// of a transaction or block (spec §6).
pub const WITNESS_MASK: u32 = 0x4000_0000;

/// The `type` field of an `inv`/`getdata`/`notfound` entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvType {
    Error,
    Tx,
    Block,
    FilteredBlock,
}

impl InvType {
    fn to_consensus(self) -> u32 {
        match self {
            InvType::Error => 0,
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::FilteredBlock => 3,
        }
    }

    fn from_consensus(v: u32) -> Option<Self> {
        match v {
            0 => Some(InvType::Error),
            1 => Some(InvType::Tx),
            2 => Some(InvType::Block),
            3 => Some(InvType::FilteredBlock),
            _ => None,
        }
    }
}

/// A single `inv`/`getdata`/`notfound` entry: an item type (optionally
/// witness-masked) and the hash it refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InvItem {
    pub kind: InvType,
    pub witness: bool,
    pub hash: [u8; 32],
}

impl InvItem {
    pub fn new(kind: InvType, hash: [u8; 32]) -> Self {
        Self {
            kind,
            witness: false,
            hash,
        }
    }

    pub fn with_witness(mut self) -> Self {
        self.witness = true;
        self
    }
}

impl Encodable for InvItem {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut raw = self.kind.to_consensus();
        if self.witness {
            raw |= WITNESS_MASK;
        }
        let mut len = raw.consensus_encode(w)?;
        len += self.hash.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for InvItem {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        let raw = u32::consensus_decode(r)?;
        let witness = raw & WITNESS_MASK != 0;
        let kind = InvType::from_consensus(raw & !WITNESS_MASK)
            .ok_or_else(|| encode::Error::ParseFailed("unknown inventory type"))?;
        let hash = <[u8; 32]>::consensus_decode(r)?;
        Ok(InvItem {
            kind,
            witness,
            hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn witness_mask_round_trips() {
        let item = InvItem::new(InvType::Block, [1u8; 32]).with_witness();
        let mut bytes = Vec::new();
        item.consensus_encode(&mut bytes).unwrap();
        let back = InvItem::consensus_decode(&mut &bytes[..]).unwrap();
        assert_eq!(item, back);
        assert!(back.witness);
    }

    #[test]
    fn unmasked_defaults_no_witness() {
        let item = InvItem::new(InvType::Tx, [2u8; 32]);
        let mut bytes = Vec::new();
        item.consensus_encode(&mut bytes).unwrap();
        let back = InvItem::consensus_decode(&mut &bytes[..]).unwrap();
        assert!(!back.witness);
    }
}
