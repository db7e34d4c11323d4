use bitcoin::{ScriptBuf, Transaction};

/// `MAX_BLOCK_WEIGHT / 4` is the de facto standardness vsize ceiling (spec
/// §4.4 step 1 "isSane").
pub const MAX_STANDARD_TX_WEIGHT: u64 = 400_000;

/// Bitcoin Core's `MAX_STANDARD_VERSION`-equivalent: only version 1 and 2
/// transactions relay by default (spec §4.4 step 2 "isStandard").
const MAX_STANDARD_VERSION: i32 = 2;

/// Non-coinbase inputs must push data only into the legacy scriptSig;
/// redeem-script/witness execution happens elsewhere (spec §4.4 step 2,
/// mirrors `ScriptFlags::SIGPUSHONLY`).
fn script_sig_is_push_only(script: &ScriptBuf) -> bool {
    script.instructions().all(|i| match i {
        Ok(instr) => !matches!(instr, bitcoin::script::Instruction::Op(op) if op.to_u8() > 0x60),
        Err(_) => false,
    })
}

fn is_standard_output(script: &ScriptBuf) -> bool {
    script.is_p2pkh()
        || script.is_p2sh()
        || script.is_p2wpkh()
        || script.is_p2wsh()
        || script.is_p2tr()
        || script.is_op_return()
}

/// Spec §4.4 step 1 `isSane`: structural well-formedness independent of any
/// chain state — empty in/outs, overflowing/negative amounts, duplicate
/// inputs, oversize, coinbase shape.
pub fn is_sane(tx: &Transaction) -> bool {
    if tx.input.is_empty() || tx.output.is_empty() {
        return false;
    }
    if tx.is_coinbase() {
        return false;
    }
    let mut total: u64 = 0;
    for output in &tx.output {
        let sats = output.value.to_sat();
        if sats > bitcoin::Amount::MAX_MONEY.to_sat() {
            return false;
        }
        total = match total.checked_add(sats) {
            Some(t) if t <= bitcoin::Amount::MAX_MONEY.to_sat() => t,
            _ => return false,
        };
    }
    let mut seen = std::collections::HashSet::with_capacity(tx.input.len());
    for input in &tx.input {
        if !seen.insert(input.previous_output) {
            return false;
        }
    }
    if tx.weight().to_wu() > MAX_STANDARD_TX_WEIGHT {
        return false;
    }
    true
}

/// Spec §4.4 step 2 `isStandard`: relay policy independent of chain state —
/// version range, push-only scriptSigs, known output script templates, and
/// no premature witness data on a non-witness output.
pub fn is_standard(tx: &Transaction) -> bool {
    if tx.version.0 < 1 || tx.version.0 > MAX_STANDARD_VERSION {
        return false;
    }
    for input in &tx.input {
        if !script_sig_is_push_only(&input.script_sig) {
            return false;
        }
    }
    for output in &tx.output {
        if output.script_pubkey.is_op_return() {
            continue;
        }
        if !is_standard_output(&output.script_pubkey) {
            return false;
        }
    }
    if !tx.uses_segwit_serialization() && tx.input.iter().any(|i| !i.witness.is_empty()) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{hashes::Hash, Amount, OutPoint, Sequence, TxIn, TxOut, Txid, Witness};

    fn base_tx() -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::all_zeros(),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1000),
                script_pubkey: ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::all_zeros()),
            }],
        }
    }

    #[test]
    fn sane_tx_passes() {
        assert!(is_sane(&base_tx()));
    }

    #[test]
    fn duplicate_inputs_rejected() {
        let mut tx = base_tx();
        let dup = tx.input[0].clone();
        tx.input.push(dup);
        assert!(!is_sane(&tx));
    }

    #[test]
    fn standard_p2pkh_output_passes() {
        assert!(is_standard(&base_tx()));
    }

    #[test]
    fn bare_multisig_like_unknown_output_rejected() {
        let mut tx = base_tx();
        tx.output[0].script_pubkey = ScriptBuf::from(vec![0x51, 0x52, 0xae]);
        assert!(!is_standard(&tx));
    }
}
