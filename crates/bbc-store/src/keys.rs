use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, OutPoint, Txid};

pub fn hash_key(hash: &BlockHash) -> [u8; 32] {
    hash.to_byte_array()
}

pub fn height_key(height: u32) -> [u8; 4] {
    height.to_be_bytes()
}

pub fn outpoint_key(outpoint: &OutPoint) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(outpoint.txid.as_ref());
    key[32..].copy_from_slice(&outpoint.vout.to_be_bytes());
    key
}

pub fn txid_key(txid: &Txid) -> [u8; 32] {
    txid.to_byte_array()
}

pub fn decode_outpoint(bytes: &[u8]) -> OutPoint {
    let txid = Txid::from_slice(&bytes[..32]).expect("32-byte key");
    let vout = u32::from_be_bytes(bytes[32..36].try_into().unwrap());
    OutPoint { txid, vout }
}
