use bitcoin::block::Header as BlockHeader;
use bitcoin::pow::Work;

/// Computes the estimated amount of work (in hashes) represented by a
/// header's `bits` field, i.e. `targetToWork(entry.bits)` from spec §3's
/// invariant `chainwork = parent.chainwork + targetToWork(entry.bits)`.
///
/// `bitcoin::block::Header::work` already does this against the header's
/// own `bits`; this free function exists so callers validating a *candidate*
/// header (not yet wrapped in a `Header`) can compute it directly.
pub fn target_to_work(header: &BlockHeader) -> Work {
    header.work()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::block::Header;
    use bitcoin::hashes::Hash;
    use bitcoin::{BlockHash, CompactTarget, TxMerkleNode};

    fn header_with_bits(bits: u32) -> Header {
        Header {
            version: bitcoin::block::Version::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 0,
            bits: CompactTarget::from_consensus(bits),
            nonce: 0,
        }
    }

    #[test]
    fn lower_bits_value_means_more_work() {
        let easy = header_with_bits(0x1d00ffff);
        let hard = header_with_bits(0x1c00ffff);
        assert!(target_to_work(&hard) > target_to_work(&easy));
    }

    #[test]
    fn accumulates_additively() {
        let a = target_to_work(&header_with_bits(0x1d00ffff));
        let b = target_to_work(&header_with_bits(0x1d00ffff));
        let sum = a + b;
        assert!(sum > a);
    }
}
