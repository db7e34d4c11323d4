use bitcoin::blockdata::opcodes::all as op;
use bitcoin::blockdata::opcodes::Opcode;
use bitcoin::hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash};
use bitcoin::secp256k1::{self, ecdsa, Secp256k1};
use bitcoin::{PublicKey, ScriptBuf, Transaction};

use crate::error::{ScriptError, ScriptResult};
use crate::flags::ScriptFlags;
use crate::num::{cast_to_bool, ScriptNum};
use crate::sighash::{signature_hash, SignatureVersion};

const MAX_STACK_SIZE: usize = 1000;
const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
const MAX_OPS_PER_SCRIPT: usize = 201;
const MAX_SCRIPT_SIZE: usize = 10_000;
const MAX_PUBKEYS_PER_MULTISIG: i64 = 20;
const LOCKTIME_THRESHOLD: i64 = 500_000_000;

type Stack = Vec<Vec<u8>>;

/// Supplies the transaction-contextual facts the interpreter can't compute
/// on its own: signature validity and locktime/sequence satisfaction
/// against the spending transaction (spec §4.1's CHECKSIG/CLTV/CSV
/// opcodes). Kept as a trait so tests can exercise the stack machine with a
/// stub checker that never fails/always fails, without constructing a real
/// transaction.
pub trait SignatureChecker {
    fn check_sig(
        &self,
        sig: &[u8],
        pubkey: &[u8],
        script_code: &ScriptBuf,
        sig_version: SignatureVersion,
    ) -> bool;

    fn check_lock_time(&self, lock_time: i64) -> bool;
    fn check_sequence(&self, sequence: i64) -> bool;
}

/// A `SignatureChecker` backed by a real spending transaction and input
/// index, using `bitcoin`'s secp256k1 bindings for the actual ECDSA
/// verification (spec Non-goals: ECDSA math itself is a supplied
/// primitive, not reimplemented here).
pub struct TransactionSignatureChecker<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub amount: u64,
}

impl<'a> SignatureChecker for TransactionSignatureChecker<'a> {
    fn check_sig(
        &self,
        sig: &[u8],
        pubkey: &[u8],
        script_code: &ScriptBuf,
        sig_version: SignatureVersion,
    ) -> bool {
        if sig.is_empty() || pubkey.is_empty() {
            return false;
        }
        let (sighash_byte, der) = (sig[sig.len() - 1], &sig[..sig.len() - 1]);
        let sighash_type = match bitcoin::ecdsa::EcdsaSighashType::from_consensus(sighash_byte as u32) {
            t => t,
        };
        let Ok(pk) = PublicKey::from_slice(pubkey) else {
            return false;
        };
        let Ok(signature) = ecdsa::Signature::from_der(der) else {
            return false;
        };
        let hash = signature_hash(
            self.tx,
            self.input_index,
            script_code,
            self.amount,
            sighash_type,
            sig_version,
        );
        let Ok(msg) = secp256k1::Message::from_digest_slice(&hash) else {
            return false;
        };
        let secp = Secp256k1::verification_only();
        secp.verify_ecdsa(&msg, &signature, &pk.inner).is_ok()
    }

    fn check_lock_time(&self, lock_time: i64) -> bool {
        let tx_lock_time = self.tx.lock_time.to_consensus_u32() as i64;
        if !((tx_lock_time < LOCKTIME_THRESHOLD) == (lock_time < LOCKTIME_THRESHOLD)) {
            return false;
        }
        if lock_time > tx_lock_time {
            return false;
        }
        if self.tx.input[self.input_index].sequence.is_final() {
            return false;
        }
        true
    }

    fn check_sequence(&self, sequence: i64) -> bool {
        let tx_sequence = self.tx.input[self.input_index].sequence.0 as i64;
        if self.tx.version.0 < 2 {
            return false;
        }
        if tx_sequence & (1 << 31) != 0 {
            return false;
        }
        const DISABLE_FLAG: i64 = 1 << 31;
        const TYPE_FLAG: i64 = 1 << 22;
        const MASK: i64 = 0x0000ffff;
        if sequence & DISABLE_FLAG != 0 {
            return true;
        }
        if (tx_sequence & DISABLE_FLAG) != 0 {
            return false;
        }
        let tx_masked = tx_sequence & (TYPE_FLAG | MASK);
        let seq_masked = sequence & (TYPE_FLAG | MASK);
        if !((tx_masked < TYPE_FLAG) == (seq_masked < TYPE_FLAG)) {
            return false;
        }
        seq_masked <= tx_masked
    }
}

struct Interpreter<'a, C: SignatureChecker> {
    flags: ScriptFlags,
    checker: &'a C,
    op_count: usize,
    script_code: ScriptBuf,
    code_sep_pos: usize,
}

/// Executes `script` against `stack` in place (spec §4.1's byte-level
/// evaluation contract). `sig_version` selects legacy vs BIP143 semantics
/// for CHECKSIG/CHECKMULTISIG.
pub fn execute<C: SignatureChecker>(
    script: &ScriptBuf,
    stack: &mut Stack,
    flags: ScriptFlags,
    checker: &C,
    sig_version: SignatureVersion,
) -> ScriptResult<()> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }
    let mut interp = Interpreter {
        flags,
        checker,
        op_count: 0,
        script_code: script.clone(),
        code_sep_pos: 0,
    };
    interp.run(script, stack, sig_version)
}

/// Full scriptSig/scriptPubKey/witness verification pipeline: legacy
/// evaluation, P2SH re-evaluation of the redeem script, and witness program
/// dispatch (v0 P2WPKH/P2WSH), finishing with the `CLEANSTACK` check (spec
/// §4.1 "P2SH and witness v0 evaluation").
pub fn verify<C: SignatureChecker>(
    script_sig: &ScriptBuf,
    script_pubkey: &ScriptBuf,
    witness: &bitcoin::Witness,
    flags: ScriptFlags,
    checker: &C,
) -> ScriptResult<()> {
    if flags.contains(ScriptFlags::SIGPUSHONLY) && !script_sig.is_push_only() {
        return Err(ScriptError::SigPushOnly);
    }

    let mut stack: Stack = Vec::new();
    execute(script_sig, &mut stack, flags, checker, SignatureVersion::Base)?;
    let stack_copy = stack.clone();

    execute(script_pubkey, &mut stack, flags, checker, SignatureVersion::Base)?;
    if stack.last().map(|v| !cast_to_bool(v)).unwrap_or(true) {
        return Err(ScriptError::EqualVerify { ip: 0 });
    }

    let mut had_witness = false;

    if flags.contains(ScriptFlags::P2SH) && script_pubkey.is_p2sh() {
        if !script_sig.is_push_only() {
            return Err(ScriptError::SigPushOnly);
        }
        let mut p2sh_stack = stack_copy;
        let redeem_script = ScriptBuf::from_bytes(
            p2sh_stack
                .pop()
                .ok_or(ScriptError::InvalidStackOperation { ip: 0 })?,
        );
        execute(&redeem_script, &mut p2sh_stack, flags, checker, SignatureVersion::Base)?;
        if p2sh_stack.last().map(|v| !cast_to_bool(v)).unwrap_or(true) {
            return Err(ScriptError::EqualVerify { ip: 0 });
        }

        if flags.contains(ScriptFlags::WITNESS) {
            if let Some(program) = witness_program(&redeem_script) {
                had_witness = true;
                verify_witness_program(&program, witness, flags, checker)?;
                p2sh_stack.truncate(p2sh_stack.len() - 1);
                p2sh_stack.push(vec![1]);
            }
        }
        stack = p2sh_stack;
    } else if flags.contains(ScriptFlags::WITNESS) {
        if let Some(program) = witness_program(script_pubkey) {
            had_witness = true;
            verify_witness_program(&program, witness, flags, checker)?;
            stack.truncate(stack.len() - 1);
            stack.push(vec![1]);
        }
    }

    if !had_witness && flags.contains(ScriptFlags::WITNESS) && !witness.is_empty() {
        return Err(ScriptError::WitnessMalleated);
    }

    if flags.contains(ScriptFlags::CLEANSTACK) && (flags.contains(ScriptFlags::P2SH) || had_witness) {
        if stack.len() != 1 {
            return Err(ScriptError::CleanStack);
        }
    }

    Ok(())
}

struct WitnessProgram {
    version: u8,
    program: Vec<u8>,
}

fn witness_program(script: &ScriptBuf) -> Option<WitnessProgram> {
    let bytes = script.as_bytes();
    if bytes.len() < 4 || bytes.len() > 42 {
        return None;
    }
    let version_byte = bytes[0];
    let version = if version_byte == op::OP_PUSHBYTES_0.to_u8() {
        0
    } else if (0x51..=0x60).contains(&version_byte) {
        version_byte - 0x50
    } else {
        return None;
    };
    let push_len = bytes[1] as usize;
    if bytes.len() != 2 + push_len {
        return None;
    }
    Some(WitnessProgram {
        version,
        program: bytes[2..].to_vec(),
    })
}

fn verify_witness_program<C: SignatureChecker>(
    program: &WitnessProgram,
    witness: &bitcoin::Witness,
    flags: ScriptFlags,
    checker: &C,
) -> ScriptResult<()> {
    if program.version != 0 {
        // Future witness versions are reserved for upgrade; the mandatory
        // subset just accepts them unchecked (spec §4.1 witness v0 only).
        return Ok(());
    }

    let mut stack: Stack = witness.iter().map(|item| item.to_vec()).collect();

    if program.program.len() == 32 {
        let script_bytes = stack
            .pop()
            .ok_or(ScriptError::WitnessProgramMismatch)?;
        if sha256::Hash::hash(&script_bytes).to_byte_array() != program.program[..] {
            return Err(ScriptError::WitnessProgramMismatch);
        }
        let script = ScriptBuf::from_bytes(script_bytes);
        execute(&script, &mut stack, flags, checker, SignatureVersion::WitnessV0)?;
    } else if program.program.len() == 20 {
        if stack.len() != 2 {
            return Err(ScriptError::WitnessProgramMismatch);
        }
        let pubkey = stack.pop().unwrap();
        let sig = stack.pop().unwrap();
        if hash160::Hash::hash(&pubkey).to_byte_array() != program.program[..] {
            return Err(ScriptError::WitnessProgramMismatch);
        }
        let script_code = ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_slice(&program.program).unwrap());
        stack.push(sig);
        stack.push(pubkey);
        execute(&script_code, &mut stack, flags, checker, SignatureVersion::WitnessV0)?;
    } else {
        return Err(ScriptError::WitnessProgramMismatch);
    }

    if stack.last().map(|v| !cast_to_bool(v)).unwrap_or(true) {
        return Err(ScriptError::EqualVerify { ip: 0 });
    }
    if stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }
    Ok(())
}

impl<'a, C: SignatureChecker> Interpreter<'a, C> {
    fn run(&mut self, script: &ScriptBuf, stack: &mut Stack, sig_version: SignatureVersion) -> ScriptResult<()> {
        let bytes = script.as_bytes();
        let mut ip = 0usize;
        let mut alt_stack: Stack = Vec::new();
        let mut exec_stack: Vec<bool> = Vec::new();

        while ip < bytes.len() {
            let executing = exec_stack.iter().all(|b| *b);
            let opcode = bytes[ip];
            let start_ip = ip;
            ip += 1;

            if opcode <= op::OP_PUSHDATA4.to_u8() {
                let (data, next) = read_push(bytes, start_ip)?;
                ip = next;
                if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
                    return Err(ScriptError::PushSize { ip: start_ip });
                }
                if executing {
                    if self.flags.contains(ScriptFlags::MINIMALDATA) && !is_minimal_push(opcode, &data) {
                        return Err(ScriptError::MinimalData { ip: start_ip });
                    }
                    push(stack, data)?;
                }
                continue;
            }

            if !executing && !is_branch_opcode(opcode) {
                continue;
            }

            if opcode > op::OP_PUSHNUM_16.to_u8() || opcode == op::OP_RESERVED.to_u8() {
                self.op_count += 1;
                if self.op_count > MAX_OPS_PER_SCRIPT {
                    return Err(ScriptError::OpCount);
                }
            }

            self.exec_opcode(
                opcode,
                start_ip,
                stack,
                &mut alt_stack,
                &mut exec_stack,
                executing,
                sig_version,
            )?;
        }

        if !exec_stack.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }
        if stack.len() + alt_stack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn exec_opcode(
        &mut self,
        opcode: u8,
        ip: usize,
        stack: &mut Stack,
        alt_stack: &mut Stack,
        exec_stack: &mut Vec<bool>,
        executing: bool,
        sig_version: SignatureVersion,
    ) -> ScriptResult<()> {
        macro_rules! pop {
            () => {
                stack.pop().ok_or(ScriptError::StackUnderflow { ip })?
            };
        }

        if opcode == op::OP_PUSHNUM_NEG1.to_u8() {
            if executing {
                push(stack, ScriptNum::new(-1).encode())?;
            }
            return Ok(());
        }
        if (op::OP_PUSHNUM_1.to_u8()..=op::OP_PUSHNUM_16.to_u8()).contains(&opcode) {
            if executing {
                let n = (opcode - op::OP_PUSHNUM_1.to_u8() + 1) as i64;
                push(stack, ScriptNum::new(n).encode())?;
            }
            return Ok(());
        }

        match Opcode::from(opcode) {
            op::OP_NOP => {}
            op::OP_IF | op::OP_NOTIF => {
                let mut value = false;
                if executing {
                    let top = pop!();
                    if self.flags.contains(ScriptFlags::MINIMALIF) && top.len() > 1 {
                        return Err(ScriptError::MinimalIf);
                    }
                    if self.flags.contains(ScriptFlags::MINIMALIF) && top.len() == 1 && top[0] != 1 {
                        return Err(ScriptError::MinimalIf);
                    }
                    value = cast_to_bool(&top);
                    if opcode == op::OP_NOTIF.to_u8() {
                        value = !value;
                    }
                }
                exec_stack.push(value);
            }
            op::OP_ELSE => {
                let top = exec_stack
                    .last_mut()
                    .ok_or(ScriptError::UnbalancedConditional)?;
                *top = !*top;
            }
            op::OP_ENDIF => {
                exec_stack.pop().ok_or(ScriptError::UnbalancedConditional)?;
            }
            op::OP_VERIFY => {
                if !cast_to_bool(&pop!()) {
                    return Err(ScriptError::EqualVerify { ip });
                }
            }
            op::OP_RETURN => {
                return Err(ScriptError::BadOpcode { ip });
            }
            op::OP_TOALTSTACK => {
                alt_stack.push(pop!());
            }
            op::OP_FROMALTSTACK => {
                let v = alt_stack.pop().ok_or(ScriptError::InvalidStackOperation { ip })?;
                stack.push(v);
            }
            op::OP_DROP => {
                pop!();
            }
            op::OP_DUP => {
                let v = stack.last().ok_or(ScriptError::StackUnderflow { ip })?.clone();
                stack.push(v);
            }
            op::OP_2DUP => {
                let len = stack.len();
                if len < 2 {
                    return Err(ScriptError::StackUnderflow { ip });
                }
                let a = stack[len - 2].clone();
                let b = stack[len - 1].clone();
                stack.push(a);
                stack.push(b);
            }
            op::OP_3DUP => {
                let len = stack.len();
                if len < 3 {
                    return Err(ScriptError::StackUnderflow { ip });
                }
                for i in 0..3 {
                    let v = stack[len - 3 + i].clone();
                    stack.push(v);
                }
            }
            op::OP_SWAP => {
                let len = stack.len();
                if len < 2 {
                    return Err(ScriptError::StackUnderflow { ip });
                }
                stack.swap(len - 1, len - 2);
            }
            op::OP_OVER => {
                let len = stack.len();
                if len < 2 {
                    return Err(ScriptError::StackUnderflow { ip });
                }
                stack.push(stack[len - 2].clone());
            }
            op::OP_2OVER => {
                let len = stack.len();
                if len < 4 {
                    return Err(ScriptError::StackUnderflow { ip });
                }
                stack.push(stack[len - 4].clone());
                stack.push(stack[len - 3].clone());
            }
            op::OP_ROT => {
                let len = stack.len();
                if len < 3 {
                    return Err(ScriptError::StackUnderflow { ip });
                }
                stack.swap(len - 3, len - 2);
                stack.swap(len - 2, len - 1);
            }
            op::OP_TUCK => {
                let len = stack.len();
                if len < 2 {
                    return Err(ScriptError::StackUnderflow { ip });
                }
                let top = stack[len - 1].clone();
                stack.insert(len - 2, top);
            }
            op::OP_IFDUP => {
                let top = stack.last().ok_or(ScriptError::StackUnderflow { ip })?;
                if cast_to_bool(top) {
                    let v = top.clone();
                    stack.push(v);
                }
            }
            op::OP_DEPTH => {
                push(stack, ScriptNum::new(stack.len() as i64).encode())?;
            }
            op::OP_NIP => {
                let len = stack.len();
                if len < 2 {
                    return Err(ScriptError::StackUnderflow { ip });
                }
                stack.remove(len - 2);
            }
            op::OP_PICK | op::OP_ROLL => {
                let n = ScriptNum::decode(&pop!(), 4, self.flags.contains(ScriptFlags::MINIMALDATA), ip)?.value();
                if n < 0 || n as usize >= stack.len() {
                    return Err(ScriptError::InvalidStackOperation { ip });
                }
                let idx = stack.len() - 1 - n as usize;
                let v = if opcode == op::OP_ROLL.to_u8() {
                    stack.remove(idx)
                } else {
                    stack[idx].clone()
                };
                stack.push(v);
            }
            op::OP_SIZE => {
                let len = stack.last().ok_or(ScriptError::StackUnderflow { ip })?.len();
                push(stack, ScriptNum::new(len as i64).encode())?;
            }
            op::OP_EQUAL => {
                let b = pop!();
                let a = pop!();
                push(stack, if a == b { vec![1] } else { vec![] })?;
            }
            op::OP_EQUALVERIFY => {
                let b = pop!();
                let a = pop!();
                if a != b {
                    return Err(ScriptError::EqualVerify { ip });
                }
            }
            op::OP_1ADD | op::OP_1SUB | op::OP_NEGATE | op::OP_ABS | op::OP_NOT | op::OP_0NOTEQUAL => {
                let n = ScriptNum::decode(&pop!(), 4, self.flags.contains(ScriptFlags::MINIMALDATA), ip)?.value();
                let result = match Opcode::from(opcode) {
                    op::OP_1ADD => n + 1,
                    op::OP_1SUB => n - 1,
                    op::OP_NEGATE => -n,
                    op::OP_ABS => n.abs(),
                    op::OP_NOT => (n == 0) as i64,
                    op::OP_0NOTEQUAL => (n != 0) as i64,
                    _ => unreachable!(),
                };
                push(stack, ScriptNum::new(result).encode())?;
            }
            op::OP_ADD | op::OP_SUB | op::OP_BOOLAND | op::OP_BOOLOR | op::OP_NUMEQUAL
            | op::OP_NUMEQUALVERIFY | op::OP_NUMNOTEQUAL | op::OP_LESSTHAN | op::OP_GREATERTHAN
            | op::OP_LESSTHANOREQUAL | op::OP_GREATERTHANOREQUAL | op::OP_MIN | op::OP_MAX => {
                let minimal = self.flags.contains(ScriptFlags::MINIMALDATA);
                let b = ScriptNum::decode(&pop!(), 4, minimal, ip)?.value();
                let a = ScriptNum::decode(&pop!(), 4, minimal, ip)?.value();
                let op_e = Opcode::from(opcode);
                if op_e == op::OP_NUMEQUALVERIFY {
                    if a != b {
                        return Err(ScriptError::NumEqualVerify { ip });
                    }
                    return Ok(());
                }
                let result = match op_e {
                    op::OP_ADD => a + b,
                    op::OP_SUB => a - b,
                    op::OP_BOOLAND => ((a != 0) && (b != 0)) as i64,
                    op::OP_BOOLOR => ((a != 0) || (b != 0)) as i64,
                    op::OP_NUMEQUAL => (a == b) as i64,
                    op::OP_NUMNOTEQUAL => (a != b) as i64,
                    op::OP_LESSTHAN => (a < b) as i64,
                    op::OP_GREATERTHAN => (a > b) as i64,
                    op::OP_LESSTHANOREQUAL => (a <= b) as i64,
                    op::OP_GREATERTHANOREQUAL => (a >= b) as i64,
                    op::OP_MIN => a.min(b),
                    op::OP_MAX => a.max(b),
                    _ => unreachable!(),
                };
                push(stack, ScriptNum::new(result).encode())?;
            }
            op::OP_WITHIN => {
                let minimal = self.flags.contains(ScriptFlags::MINIMALDATA);
                let max = ScriptNum::decode(&pop!(), 4, minimal, ip)?.value();
                let min = ScriptNum::decode(&pop!(), 4, minimal, ip)?.value();
                let x = ScriptNum::decode(&pop!(), 4, minimal, ip)?.value();
                push(stack, if x >= min && x < max { vec![1] } else { vec![] })?;
            }
            op::OP_RIPEMD160 => {
                let v = pop!();
                push(stack, ripemd160::Hash::hash(&v).to_byte_array().to_vec())?;
            }
            op::OP_SHA1 => {
                let v = pop!();
                push(stack, sha1::Hash::hash(&v).to_byte_array().to_vec())?;
            }
            op::OP_SHA256 => {
                let v = pop!();
                push(stack, sha256::Hash::hash(&v).to_byte_array().to_vec())?;
            }
            op::OP_HASH160 => {
                let v = pop!();
                push(stack, hash160::Hash::hash(&v).to_byte_array().to_vec())?;
            }
            op::OP_HASH256 => {
                let v = pop!();
                push(stack, sha256d::Hash::hash(&v).to_byte_array().to_vec())?;
            }
            op::OP_CODESEPARATOR => {
                self.code_sep_pos = ip + 1;
            }
            op::OP_CHECKSIG | op::OP_CHECKSIGVERIFY => {
                let pubkey = pop!();
                let sig = pop!();
                self.check_sig_flags(&sig)?;
                let subscript = self.subscript(sig_version);
                let ok = self.checker.check_sig(&sig, &pubkey, &subscript, sig_version);
                if !ok && self.flags.contains(ScriptFlags::NULLFAIL) && !sig.is_empty() {
                    return Err(ScriptError::SigNullFail { ip });
                }
                if opcode == op::OP_CHECKSIGVERIFY.to_u8() {
                    if !ok {
                        return Err(ScriptError::CheckSigVerify { ip });
                    }
                } else {
                    push(stack, if ok { vec![1] } else { vec![] })?;
                }
            }
            op::OP_CHECKMULTISIG | op::OP_CHECKMULTISIGVERIFY => {
                self.check_multisig(stack, ip, sig_version)?;
                if opcode == op::OP_CHECKMULTISIGVERIFY.to_u8() {
                    let v = pop!();
                    if !cast_to_bool(&v) {
                        return Err(ScriptError::CheckMultisigVerify { ip });
                    }
                }
            }
            op::OP_CHECKLOCKTIMEVERIFY => {
                if !self.flags.contains(ScriptFlags::CHECKLOCKTIMEVERIFY) {
                    if self.flags.contains(ScriptFlags::DISCOURAGE_UPGRADABLE_NOPS) {
                        return Err(ScriptError::DiscourageUpgradableNops { ip });
                    }
                } else {
                    let top = stack.last().ok_or(ScriptError::InvalidStackOperation { ip })?;
                    let n = ScriptNum::decode(top, 5, self.flags.contains(ScriptFlags::MINIMALDATA), ip)?.value();
                    if n < 0 {
                        return Err(ScriptError::NegativeLocktime { ip });
                    }
                    if !self.checker.check_lock_time(n) {
                        return Err(ScriptError::UnsatisfiedLocktime { ip });
                    }
                }
            }
            op::OP_CHECKSEQUENCEVERIFY => {
                if !self.flags.contains(ScriptFlags::CHECKSEQUENCEVERIFY) {
                    if self.flags.contains(ScriptFlags::DISCOURAGE_UPGRADABLE_NOPS) {
                        return Err(ScriptError::DiscourageUpgradableNops { ip });
                    }
                } else {
                    let top = stack.last().ok_or(ScriptError::InvalidStackOperation { ip })?;
                    let n = ScriptNum::decode(top, 5, self.flags.contains(ScriptFlags::MINIMALDATA), ip)?.value();
                    if n < 0 {
                        return Err(ScriptError::NegativeLocktime { ip });
                    }
                    if n & (1 << 31) == 0 && !self.checker.check_sequence(n) {
                        return Err(ScriptError::UnsatisfiedLocktime { ip });
                    }
                }
            }
            op::OP_NOP1 | op::OP_NOP4 | op::OP_NOP5 | op::OP_NOP6 | op::OP_NOP7 | op::OP_NOP8
            | op::OP_NOP9 | op::OP_NOP10 => {
                if self.flags.contains(ScriptFlags::DISCOURAGE_UPGRADABLE_NOPS) {
                    return Err(ScriptError::DiscourageUpgradableNops { ip });
                }
            }
            op::OP_CAT | op::OP_SUBSTR | op::OP_LEFT | op::OP_RIGHT | op::OP_INVERT | op::OP_AND
            | op::OP_OR | op::OP_XOR | op::OP_2MUL | op::OP_2DIV | op::OP_MUL | op::OP_DIV
            | op::OP_MOD | op::OP_LSHIFT | op::OP_RSHIFT => {
                return Err(ScriptError::DisabledOpcode { opcode, ip });
            }
            op::OP_VER | op::OP_VERIF | op::OP_VERNOTIF => {
                return Err(ScriptError::BadOpcode { ip });
            }
            op::OP_2DROP => {
                pop!();
                pop!();
            }
            _ => {
                return Err(ScriptError::BadOpcode { ip });
            }
        }
        let _ = exec_stack;
        Ok(())
    }

    /// The script a signature check commits to: the currently executing
    /// script from just after the last executed `OP_CODESEPARATOR` to the
    /// end (spec §4.1 "subscript = program from last CODESEPARATOR"). Legacy
    /// sighashes additionally drop any remaining `OP_CODESEPARATOR` bytes
    /// from that slice; BIP143 does not require this (the signature itself
    /// is never stripped out of the witness script).
    fn subscript(&self, sig_version: SignatureVersion) -> ScriptBuf {
        let bytes = self.script_code.as_bytes();
        let start = self.code_sep_pos.min(bytes.len());
        let slice = &bytes[start..];
        match sig_version {
            SignatureVersion::Base => ScriptBuf::from_bytes(strip_code_separators(slice)),
            SignatureVersion::WitnessV0 => ScriptBuf::from_bytes(slice.to_vec()),
        }
    }

    fn check_sig_flags(&self, sig: &[u8]) -> ScriptResult<()> {
        if sig.is_empty() {
            return Ok(());
        }
        if self.flags.contains(ScriptFlags::DERSIG)
            || self.flags.contains(ScriptFlags::STRICTENC)
            || self.flags.contains(ScriptFlags::LOW_S)
        {
            if !is_strict_der(&sig[..sig.len() - 1]) {
                return Err(ScriptError::SigDer { ip: 0 });
            }
        }
        if self.flags.contains(ScriptFlags::LOW_S) && !has_low_s(&sig[..sig.len() - 1]) {
            return Err(ScriptError::SigHighS { ip: 0 });
        }
        if self.flags.contains(ScriptFlags::STRICTENC) {
            let hash_type = sig[sig.len() - 1] & !0x80;
            if !(1..=3).contains(&hash_type) {
                return Err(ScriptError::SigHashType { ip: 0 });
            }
        }
        Ok(())
    }

    fn check_multisig(
        &mut self,
        stack: &mut Stack,
        ip: usize,
        sig_version: SignatureVersion,
    ) -> ScriptResult<()> {
        let minimal = self.flags.contains(ScriptFlags::MINIMALDATA);
        let pubkey_count = ScriptNum::decode(
            &stack.pop().ok_or(ScriptError::StackUnderflow { ip })?,
            4,
            minimal,
            ip,
        )?
        .value();
        if !(0..=MAX_PUBKEYS_PER_MULTISIG).contains(&pubkey_count) {
            return Err(ScriptError::PubKeyCount { ip });
        }
        self.op_count += pubkey_count as usize;
        if self.op_count > MAX_OPS_PER_SCRIPT {
            return Err(ScriptError::OpCount);
        }
        let mut pubkeys = Vec::with_capacity(pubkey_count as usize);
        for _ in 0..pubkey_count {
            pubkeys.push(stack.pop().ok_or(ScriptError::StackUnderflow { ip })?);
        }
        pubkeys.reverse();

        let sig_count = ScriptNum::decode(
            &stack.pop().ok_or(ScriptError::StackUnderflow { ip })?,
            4,
            minimal,
            ip,
        )?
        .value();
        if !(0..=pubkey_count).contains(&sig_count) {
            return Err(ScriptError::SigCount { ip });
        }
        let mut sigs = Vec::with_capacity(sig_count as usize);
        for _ in 0..sig_count {
            sigs.push(stack.pop().ok_or(ScriptError::StackUnderflow { ip })?);
        }
        sigs.reverse();

        // The historical off-by-one dummy element consumed by CHECKMULTISIG.
        let dummy = stack.pop().ok_or(ScriptError::StackUnderflow { ip })?;
        if self.flags.contains(ScriptFlags::NULLDUMMY) && !dummy.is_empty() {
            return Err(ScriptError::SigNullDummy { ip });
        }

        for sig in &sigs {
            self.check_sig_flags(sig)?;
        }

        let subscript = self.subscript(sig_version);
        let mut pk_idx = 0usize;
        let mut sig_idx = 0usize;
        let mut success = true;
        while success && sig_idx < sigs.len() {
            let remaining_sigs = sigs.len() - sig_idx;
            let remaining_keys = pubkeys.len() - pk_idx;
            if remaining_sigs > remaining_keys {
                success = false;
                break;
            }
            let ok = self
                .checker
                .check_sig(&sigs[sig_idx], &pubkeys[pk_idx], &subscript, sig_version);
            if ok {
                sig_idx += 1;
            }
            pk_idx += 1;
        }

        if !success && self.flags.contains(ScriptFlags::NULLFAIL) {
            if sigs.iter().any(|s| !s.is_empty()) {
                return Err(ScriptError::SigNullFail { ip });
            }
        }

        stack.push(if success { vec![1] } else { vec![] });
        Ok(())
    }
}

fn push(stack: &mut Stack, item: Vec<u8>) -> ScriptResult<()> {
    if stack.len() >= MAX_STACK_SIZE {
        return Err(ScriptError::StackSize);
    }
    stack.push(item);
    Ok(())
}

fn is_branch_opcode(opcode: u8) -> bool {
    opcode == op::OP_IF.to_u8()
        || opcode == op::OP_NOTIF.to_u8()
        || opcode == op::OP_ELSE.to_u8()
        || opcode == op::OP_ENDIF.to_u8()
}

fn read_push(bytes: &[u8], ip: usize) -> ScriptResult<(Vec<u8>, usize)> {
    let opcode = bytes[ip];
    let mut cursor = ip + 1;
    let len = if opcode < op::OP_PUSHDATA1.to_u8() {
        opcode as usize
    } else if opcode == op::OP_PUSHDATA1.to_u8() {
        let n = *bytes.get(cursor).ok_or(ScriptError::BadPush { ip })? as usize;
        cursor += 1;
        n
    } else if opcode == op::OP_PUSHDATA2.to_u8() {
        let b = bytes.get(cursor..cursor + 2).ok_or(ScriptError::BadPush { ip })?;
        cursor += 2;
        u16::from_le_bytes([b[0], b[1]]) as usize
    } else {
        let b = bytes.get(cursor..cursor + 4).ok_or(ScriptError::BadPush { ip })?;
        cursor += 4;
        u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
    };
    let data = bytes
        .get(cursor..cursor + len)
        .ok_or(ScriptError::BadPush { ip })?
        .to_vec();
    Ok((data, cursor + len))
}

/// Removes `OP_CODESEPARATOR` bytes from a subscript for legacy sighashing,
/// walking pushes so a data byte that happens to equal the opcode is never
/// mistaken for one. Falls back to copying the remainder verbatim if a
/// trailing push runs off the end of the script.
fn strip_code_separators(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut ip = 0usize;
    while ip < bytes.len() {
        let opcode = bytes[ip];
        if opcode == op::OP_CODESEPARATOR.to_u8() {
            ip += 1;
            continue;
        }
        if opcode <= op::OP_PUSHDATA4.to_u8() {
            match read_push(bytes, ip) {
                Ok((_, next)) => {
                    out.extend_from_slice(&bytes[ip..next]);
                    ip = next;
                }
                Err(_) => {
                    out.extend_from_slice(&bytes[ip..]);
                    break;
                }
            }
            continue;
        }
        out.push(opcode);
        ip += 1;
    }
    out
}

fn is_minimal_push(opcode: u8, data: &[u8]) -> bool {
    if data.is_empty() {
        return opcode == op::OP_PUSHBYTES_0.to_u8();
    }
    if data.len() == 1 && (1..=16).contains(&data[0]) {
        return opcode == op::OP_PUSHNUM_1.to_u8() + data[0] - 1;
    }
    if data.len() == 1 && data[0] == 0x81 {
        return opcode == op::OP_PUSHNUM_NEG1.to_u8();
    }
    if data.len() <= 75 {
        return opcode as usize == data.len();
    }
    if data.len() <= 255 {
        return opcode == op::OP_PUSHDATA1.to_u8();
    }
    if data.len() <= 65535 {
        return opcode == op::OP_PUSHDATA2.to_u8();
    }
    opcode == op::OP_PUSHDATA4.to_u8()
}

fn is_strict_der(sig: &[u8]) -> bool {
    if sig.len() < 9 || sig.len() > 73 {
        return false;
    }
    if sig[0] != 0x30 || sig[1] as usize != sig.len() - 2 {
        return false;
    }
    if sig[2] != 0x02 {
        return false;
    }
    let r_len = sig[3] as usize;
    if 4 + r_len >= sig.len() {
        return false;
    }
    if sig[4 + r_len] != 0x02 {
        return false;
    }
    let s_len = sig[5 + r_len] as usize;
    6 + r_len + s_len == sig.len()
}

fn has_low_s(sig: &[u8]) -> bool {
    if !is_strict_der(sig) {
        return false;
    }
    let r_len = sig[3] as usize;
    let s_start = 6 + r_len;
    let s_len = sig[5 + r_len] as usize;
    let s = &sig[s_start..s_start + s_len];

    // secp256k1 order / 2, big-endian, as the classic "low S" ceiling.
    const HALF_ORDER: [u8; 32] = [
        0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b,
        0x20, 0xa0,
    ];

    let trimmed = {
        let zeros = s.iter().take_while(|&&b| b == 0).count();
        &s[zeros.min(s.len().saturating_sub(1))..]
    };
    if trimmed.len() > 32 {
        return false;
    }
    let mut padded = [0u8; 32];
    padded[32 - trimmed.len()..].copy_from_slice(trimmed);
    padded <= HALF_ORDER
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysTrue;
    impl SignatureChecker for AlwaysTrue {
        fn check_sig(&self, _: &[u8], _: &[u8], _: &ScriptBuf, _: SignatureVersion) -> bool {
            true
        }
        fn check_lock_time(&self, _: i64) -> bool {
            true
        }
        fn check_sequence(&self, _: i64) -> bool {
            true
        }
    }

    fn run(script: &ScriptBuf) -> ScriptResult<Stack> {
        let mut stack = Vec::new();
        execute(script, &mut stack, ScriptFlags::standard(), &AlwaysTrue, SignatureVersion::Base)?;
        Ok(stack)
    }

    #[test]
    fn simple_arithmetic() {
        let script = bitcoin::script::Builder::new()
            .push_int(2)
            .push_int(3)
            .push_opcode(op::OP_ADD)
            .into_script();
        let stack = run(&script).unwrap();
        assert_eq!(ScriptNum::decode(&stack[0], 4, true, 0).unwrap().value(), 5);
    }

    #[test]
    fn equal_verify_passes_and_fails() {
        let ok = bitcoin::script::Builder::new()
            .push_slice(b"a")
            .push_slice(b"a")
            .push_opcode(op::OP_EQUALVERIFY)
            .into_script();
        assert!(run(&ok).is_ok());

        let bad = bitcoin::script::Builder::new()
            .push_slice(b"a")
            .push_slice(b"b")
            .push_opcode(op::OP_EQUALVERIFY)
            .into_script();
        assert!(run(&bad).is_err());
    }

    #[test]
    fn if_else_endif_branches() {
        let script = bitcoin::script::Builder::new()
            .push_int(1)
            .push_opcode(op::OP_IF)
            .push_int(10)
            .push_opcode(op::OP_ELSE)
            .push_int(20)
            .push_opcode(op::OP_ENDIF)
            .into_script();
        let stack = run(&script).unwrap();
        assert_eq!(ScriptNum::decode(&stack[0], 4, true, 0).unwrap().value(), 10);
    }

    #[test]
    fn unbalanced_conditional_rejected() {
        let script = bitcoin::script::Builder::new()
            .push_int(1)
            .push_opcode(op::OP_IF)
            .push_int(10)
            .into_script();
        assert!(run(&script).is_err());
    }

    #[test]
    fn disabled_opcode_rejected() {
        let script = bitcoin::script::Builder::new()
            .push_int(1)
            .push_int(2)
            .push_opcode(op::OP_CAT)
            .into_script();
        assert!(matches!(run(&script), Err(ScriptError::DisabledOpcode { .. })));
    }

    #[test]
    fn stack_size_limit_enforced() {
        let mut builder = bitcoin::script::Builder::new();
        for _ in 0..MAX_STACK_SIZE + 1 {
            builder = builder.push_int(1);
        }
        let script = builder.into_script();
        assert!(matches!(run(&script), Err(ScriptError::StackSize)));
    }

    #[test]
    fn push_size_limit_enforced() {
        let data = vec![0u8; MAX_SCRIPT_ELEMENT_SIZE + 1];
        let script = bitcoin::script::Builder::new().push_slice(&data[..]).into_script();
        assert!(matches!(run(&script), Err(ScriptError::PushSize { .. })));
    }

    fn dummy_spend_tx(script_pubkey: ScriptBuf) -> Transaction {
        use bitcoin::absolute::LockTime;
        use bitcoin::transaction::Version;
        use bitcoin::{OutPoint, Sequence, TxIn, TxOut, Witness};
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
                script_pubkey,
            }],
        }
    }

    // Exercises the real `TransactionSignatureChecker` (not the `AlwaysTrue`
    // stub) so a regression in subscript threading would actually fail this
    // suite.
    #[test]
    fn real_p2pkh_signature_verifies_against_its_own_subscript() {
        use bitcoin::ecdsa::EcdsaSighashType;
        use bitcoin::secp256k1::{Secp256k1, SecretKey};
        use bitcoin::Witness;

        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let pk = PublicKey::from_private_key(&secp, &bitcoin::PrivateKey::new(sk, bitcoin::Network::Regtest));
        let script_pubkey = ScriptBuf::new_p2pkh(&pk.pubkey_hash());

        let mut tx = dummy_spend_tx(ScriptBuf::new());
        let sighash_type = EcdsaSighashType::All;
        let hash = signature_hash(&tx, 0, &script_pubkey, 0, sighash_type, SignatureVersion::Base);
        let msg = secp256k1::Message::from_digest_slice(&hash).unwrap();
        let sig = secp.sign_ecdsa(&msg, &sk);
        let mut sig_bytes = sig.serialize_der().to_vec();
        sig_bytes.push(sighash_type.to_u32() as u8);

        let script_sig = bitcoin::script::Builder::new()
            .push_slice(&sig_bytes[..])
            .push_slice(&pk.inner.serialize()[..])
            .into_script();
        tx.input[0].script_sig = script_sig.clone();

        let checker = TransactionSignatureChecker {
            tx: &tx,
            input_index: 0,
            amount: 0,
        };
        verify(&script_sig, &script_pubkey, &Witness::new(), ScriptFlags::standard(), &checker).unwrap();
    }

    #[test]
    fn tampered_signature_fails_nullfail_under_real_checker() {
        use bitcoin::ecdsa::EcdsaSighashType;
        use bitcoin::secp256k1::{Secp256k1, SecretKey};
        use bitcoin::Witness;

        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[0x22; 32]).unwrap();
        let pk = PublicKey::from_private_key(&secp, &bitcoin::PrivateKey::new(sk, bitcoin::Network::Regtest));
        let script_pubkey = ScriptBuf::new_p2pkh(&pk.pubkey_hash());

        let mut tx = dummy_spend_tx(ScriptBuf::new());
        let sighash_type = EcdsaSighashType::All;
        let hash = signature_hash(&tx, 0, &script_pubkey, 0, sighash_type, SignatureVersion::Base);
        let msg = secp256k1::Message::from_digest_slice(&hash).unwrap();
        let sig = secp.sign_ecdsa(&msg, &sk);
        let mut sig_bytes = sig.serialize_der().to_vec();
        sig_bytes[6] ^= 0xff; // corrupt the R value
        sig_bytes.push(sighash_type.to_u32() as u8);

        let script_sig = bitcoin::script::Builder::new()
            .push_slice(&sig_bytes[..])
            .push_slice(&pk.inner.serialize()[..])
            .into_script();
        tx.input[0].script_sig = script_sig.clone();

        let checker = TransactionSignatureChecker {
            tx: &tx,
            input_index: 0,
            amount: 0,
        };
        let err = verify(&script_sig, &script_pubkey, &Witness::new(), ScriptFlags::standard(), &checker).unwrap_err();
        assert!(matches!(err, ScriptError::SigNullFail { .. }));
    }
}
