//! Compact-size (varint) codec.
//!
//! `bitcoin::consensus::encode::VarInt` already implements Bitcoin's
//! CompactSize rules (1/3/5/9-byte encodings with the `0xfd`/`0xfe`/`0xff`
//! prefixes); this module just re-exports it under the name spec §2/§9 use
//! ("compact-size (varint) codec") so call sites in this workspace don't
//! need to know it lives in `bitcoin::consensus::encode`.

pub use bitcoin::consensus::encode::VarInt;

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::consensus::encode::{Decodable, Encodable};

    fn round_trip(v: u64) -> usize {
        let mut bytes = Vec::new();
        VarInt(v).consensus_encode(&mut bytes).unwrap();
        let back = VarInt::consensus_decode(&mut &bytes[..]).unwrap();
        assert_eq!(back.0, v);
        bytes.len()
    }

    #[test]
    fn boundary_widths() {
        assert_eq!(round_trip(0xfc), 1);
        assert_eq!(round_trip(0xfd), 3);
        assert_eq!(round_trip(0xffff), 3);
        assert_eq!(round_trip(0x1_0000), 5);
        assert_eq!(round_trip(0xffff_ffff), 5);
        assert_eq!(round_trip(0x1_0000_0000), 9);
    }
}
