#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("consensus decode error: {0}")]
    Decode(#[from] bitcoin::consensus::encode::Error),
    #[error("missing chain entry for hash {0}")]
    MissingEntry(bitcoin::BlockHash),
    #[error("missing block body for hash {0}")]
    MissingBlock(bitcoin::BlockHash),
    #[error("missing coin for outpoint {0}")]
    MissingCoin(bitcoin::OutPoint),
    #[error("no tip has been set")]
    NoTip,
    #[error("transaction conflict, retry")]
    TransactionConflict,
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<sled::transaction::TransactionError<StoreError>> for StoreError {
    fn from(e: sled::transaction::TransactionError<StoreError>) -> Self {
        match e {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => StoreError::Sled(e),
        }
    }
}
