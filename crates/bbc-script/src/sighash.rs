use bitcoin::ecdsa::EcdsaSighashType;
use bitcoin::sighash::SighashCache;
use bitcoin::{ScriptBuf, Transaction};

/// Identifies which sighash algorithm applies to the input currently being
/// checked (spec §4.1: "witness v0 programs use the BIP143 sighash;
/// everything else uses the legacy algorithm").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureVersion {
    Base,
    WitnessV0,
}

/// Computes the hash a signature commits to. Hashing itself is a supplied
/// primitive (spec Non-goals exclude reimplementing ECDSA/hash plumbing), so
/// this delegates entirely to `bitcoin::sighash::SighashCache`, which already
/// implements both the legacy algorithm (including the `SIGHASH_SINGLE`
/// out-of-range special case) and BIP143.
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &ScriptBuf,
    value: u64,
    sighash_type: EcdsaSighashType,
    version: SignatureVersion,
) -> [u8; 32] {
    let mut cache = SighashCache::new(tx);
    let hash = match version {
        SignatureVersion::Base => cache
            .legacy_signature_hash(input_index, script_code, sighash_type.to_u32())
            .expect("input_index validated by caller"),
        SignatureVersion::WitnessV0 => cache
            .p2wsh_signature_hash(
                input_index,
                script_code,
                bitcoin::Amount::from_sat(value),
                sighash_type,
            )
            .expect("input_index validated by caller"),
    };
    hash.to_byte_array()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{OutPoint, Sequence, TxIn, TxOut, Witness};

    fn dummy_tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: bitcoin::Amount::from_sat(1000),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn legacy_and_witness_v0_hashes_differ() {
        let tx = dummy_tx();
        let script = ScriptBuf::new();
        let legacy = signature_hash(&tx, 0, &script, 1000, EcdsaSighashType::All, SignatureVersion::Base);
        let witness = signature_hash(&tx, 0, &script, 1000, EcdsaSighashType::All, SignatureVersion::WitnessV0);
        assert_ne!(legacy, witness);
    }
}
