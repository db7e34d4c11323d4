use std::io;

use bitcoin::consensus::encode::{self, Decodable, Encodable, VarInt};
use bitcoin::{ScriptBuf, Txid};

/// An unspent output record, keyed externally by its outpoint.
///
/// Mirrors spec §3's `Coin` entity: value, script, the height it was mined
/// at, whether its transaction was a coinbase, and which transaction/index
/// produced it (kept so undo records can be replayed without a second
/// lookup).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coin {
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    pub height: u32,
    pub is_coinbase: bool,
    pub out_txid: Txid,
    pub out_index: u32,
}

impl Coin {
    pub fn new(
        value: u64,
        script_pubkey: ScriptBuf,
        height: u32,
        is_coinbase: bool,
        out_txid: Txid,
        out_index: u32,
    ) -> Self {
        Self {
            value,
            script_pubkey,
            height,
            is_coinbase,
            out_txid,
            out_index,
        }
    }
}

impl Encodable for Coin {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = 0;
        len += self.value.consensus_encode(w)?;
        len += self.script_pubkey.consensus_encode(w)?;
        len += self.height.consensus_encode(w)?;
        len += (self.is_coinbase as u8).consensus_encode(w)?;
        len += self.out_txid.consensus_encode(w)?;
        len += self.out_index.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for Coin {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(Coin {
            value: Decodable::consensus_decode(r)?,
            script_pubkey: Decodable::consensus_decode(r)?,
            height: Decodable::consensus_decode(r)?,
            is_coinbase: u8::consensus_decode(r)? != 0,
            out_txid: Decodable::consensus_decode(r)?,
            out_index: Decodable::consensus_decode(r)?,
        })
    }
}

/// The ordered list of coins removed when a block was connected, needed to
/// revert that connection (spec §3 `UndoRecord`, §4.3 `u/` prefix).
///
/// Coins are stored in the order their spending inputs appeared across the
/// block's transactions, so disconnect can restore them by replaying the
/// block's inputs in reverse and popping from the back.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UndoRecord {
    pub coins: Vec<Coin>,
}

impl UndoRecord {
    pub fn new() -> Self {
        Self { coins: Vec::new() }
    }

    pub fn push(&mut self, coin: Coin) {
        self.coins.push(coin);
    }
}

impl Encodable for UndoRecord {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = VarInt(self.coins.len() as u64).consensus_encode(w)?;
        for coin in &self.coins {
            len += coin.consensus_encode(w)?;
        }
        Ok(len)
    }
}

impl Decodable for UndoRecord {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        let count = VarInt::consensus_decode(r)?.0;
        let mut coins = Vec::with_capacity(count.min(1 << 20) as usize);
        for _ in 0..count {
            coins.push(Coin::consensus_decode(r)?);
        }
        Ok(UndoRecord { coins })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[test]
    fn coin_round_trips() {
        let coin = Coin::new(
            5_000_000_000,
            ScriptBuf::from_hex("76a914000000000000000000000000000000000000000088ac").unwrap(),
            0,
            true,
            Txid::all_zeros(),
            0,
        );
        let mut bytes = Vec::new();
        coin.consensus_encode(&mut bytes).unwrap();
        let back = Coin::consensus_decode(&mut &bytes[..]).unwrap();
        assert_eq!(coin, back);
    }

    #[test]
    fn undo_record_preserves_order() {
        let mut undo = UndoRecord::new();
        for i in 0..3u32 {
            undo.push(Coin::new(
                i as u64,
                ScriptBuf::new(),
                i,
                false,
                Txid::all_zeros(),
                i,
            ));
        }
        let mut bytes = Vec::new();
        undo.consensus_encode(&mut bytes).unwrap();
        let back = UndoRecord::consensus_decode(&mut &bytes[..]).unwrap();
        assert_eq!(undo, back);
        assert_eq!(back.coins[0].out_index, 0);
        assert_eq!(back.coins[2].out_index, 2);
    }
}
