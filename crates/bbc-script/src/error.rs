/// Tagged script-evaluation failures (spec §4.1 "Failure modes"), each
/// carrying enough context (`ip` = opcode index at the point of failure) for
/// diagnostics without turning the evaluator into something stateful.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("bad opcode at ip {ip}")]
    BadOpcode { ip: usize },
    #[error("disabled opcode 0x{opcode:02x} at ip {ip}")]
    DisabledOpcode { opcode: u8, ip: usize },
    #[error("stack underflow at ip {ip}")]
    StackUnderflow { ip: usize },
    #[error("invalid stack operation at ip {ip}")]
    InvalidStackOperation { ip: usize },
    #[error("bad push at ip {ip}")]
    BadPush { ip: usize },
    #[error("non-minimal data push at ip {ip}")]
    MinimalData { ip: usize },
    #[error("push exceeds 520 bytes at ip {ip}")]
    PushSize { ip: usize },
    #[error("exceeded 201 non-push opcodes")]
    OpCount,
    #[error("OP_EQUALVERIFY failed at ip {ip}")]
    EqualVerify { ip: usize },
    #[error("OP_NUMEQUALVERIFY failed at ip {ip}")]
    NumEqualVerify { ip: usize },
    #[error("OP_CHECKSIGVERIFY failed at ip {ip}")]
    CheckSigVerify { ip: usize },
    #[error("OP_CHECKMULTISIGVERIFY failed at ip {ip}")]
    CheckMultisigVerify { ip: usize },
    #[error("stack exceeds 1000 elements")]
    StackSize,
    #[error("invalid signature count at ip {ip}")]
    SigCount { ip: usize },
    #[error("invalid pubkey count at ip {ip}")]
    PubKeyCount { ip: usize },
    #[error("scriptSig is not push-only")]
    SigPushOnly,
    #[error("signature is not strict DER at ip {ip}")]
    SigDer { ip: usize },
    #[error("invalid sighash type at ip {ip}")]
    SigHashType { ip: usize },
    #[error("signature has high S value at ip {ip}")]
    SigHighS { ip: usize },
    #[error("OP_CHECKMULTISIG dummy element not empty at ip {ip}")]
    SigNullDummy { ip: usize },
    #[error("failing signature check did not consume an empty signature at ip {ip}")]
    SigNullFail { ip: usize },
    #[error("witness program has wrong length")]
    WitnessProgramMismatch,
    #[error("witness was malleated")]
    WitnessMalleated,
    #[error("non-minimal OP_IF/NOTIF operand")]
    MinimalIf,
    #[error("upgradable NOP discouraged at ip {ip}")]
    DiscourageUpgradableNops { ip: usize },
    #[error("stack not clean after execution")]
    CleanStack,
    #[error("negative locktime operand at ip {ip}")]
    NegativeLocktime { ip: usize },
    #[error("locktime/sequence requirement not satisfied at ip {ip}")]
    UnsatisfiedLocktime { ip: usize },
    #[error("unbalanced IF/ELSE/ENDIF")]
    UnbalancedConditional,
    #[error("script exceeds 10000 bytes")]
    ScriptSize,
    #[error("pubkey is not encoded as compressed under WITNESS_PUBKEYTYPE at ip {ip}")]
    WitnessPubKeyType { ip: usize },
    #[error("sigop cost exceeds block limit")]
    SigopCost,
}

pub type ScriptResult<T> = Result<T, ScriptError>;
