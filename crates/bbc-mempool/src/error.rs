#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction has no inputs or outputs")]
    Empty,
    #[error("transaction has a negative or overflowing output value")]
    BadAmount,
    #[error("transaction spends the same outpoint twice")]
    DuplicateInput,
    #[error("transaction exceeds MAX_BLOCK_WEIGHT/4")]
    TooLarge,
    #[error("coinbase transactions are not relayed individually")]
    IsCoinbase,
    #[error("transaction is not standard")]
    NonStandard,
    #[error("transaction is not final")]
    NonFinal,
    #[error("transaction already in the mempool")]
    AlreadyKnown,
    #[error("transaction conflicts with an in-mempool spend, no RBF")]
    DoubleSpend,
    #[error("transaction below minimum relay fee")]
    InsufficientFee,
    #[error("transaction fee is implausibly high")]
    AbsurdFee,
    #[error("transaction exceeds the ancestor count limit")]
    TooManyAncestors,
    #[error("script verify failed under standard flags: {0}")]
    ScriptCheckFailed(String),
    #[error("script verify failed under mandatory flags: {0}")]
    MandatoryScriptCheckFailed(String),
    #[error(transparent)]
    Chain(#[from] ChainErrorWrapper),
}

/// `bbc_chain::ChainError` doesn't implement `Clone`/`PartialEq` (its
/// variants wrap store/script errors that don't either), so mempool errors
/// that originate from a chain lookup are flattened to their message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ChainErrorWrapper(pub String);

impl From<bbc_chain::ChainError> for MempoolError {
    fn from(e: bbc_chain::ChainError) -> Self {
        MempoolError::Chain(ChainErrorWrapper(e.to_string()))
    }
}

impl From<bbc_store::StoreError> for MempoolError {
    fn from(e: bbc_store::StoreError) -> Self {
        MempoolError::Chain(ChainErrorWrapper(e.to_string()))
    }
}

pub type MempoolResult<T> = Result<T, MempoolError>;
