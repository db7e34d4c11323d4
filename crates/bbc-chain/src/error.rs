#[derive(thiserror::Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Store(#[from] bbc_store::StoreError),
    #[error(transparent)]
    Script(#[from] bbc_script::ScriptError),
    #[error("bad proof of work at height {height}")]
    BadPow { height: u32 },
    #[error("bad difficulty bits at height {height}: expected {expected:#x}, got {got:#x}")]
    BadDifficultyBits { height: u32, expected: u32, got: u32 },
    #[error("block timestamp too old at height {height}")]
    TimeTooOld { height: u32 },
    #[error("block timestamp too far in the future at height {height}")]
    TimeTooNew { height: u32 },
    #[error("bad merkle root")]
    BadMerkleRoot,
    #[error("bad witness commitment")]
    BadWitnessCommitment,
    #[error("block exceeds max weight")]
    BadBlockWeight,
    #[error("sigop cost exceeds block limit")]
    BadSigopCost,
    #[error("duplicate coinbase txid before BIP34 exception height")]
    Bip30Violation,
    #[error("missing coin for input at tx {txid}")]
    MissingInput { txid: bitcoin::Txid },
    #[error("premature spend of coinbase output at height {height}")]
    PrematureCoinbaseSpend { height: u32 },
    #[error("inputs below outputs for tx {txid}")]
    InputsBelowOutputs { txid: bitcoin::Txid },
    #[error("contradicts checkpoint at height {height}")]
    CheckpointMismatch { height: u32 },
    #[error("parent block unknown, parked as orphan")]
    Orphan,
    #[error("block previously marked invalid")]
    KnownInvalid,
}

pub type ChainResult<T> = Result<T, ChainError>;
