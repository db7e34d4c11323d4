/// Spec §7: "Net errors are per-peer and never bubble to the chain" — this
/// is the one taxonomy branch that never crosses into `bbc-chain`/
/// `bbc-mempool`; the pool maps it to a disconnect/ban decision itself.
#[derive(thiserror::Error, Debug)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("consensus decode error: {0}")]
    Decode(#[from] bitcoin::consensus::encode::Error),
    #[error("bad magic bytes: expected {expected:?}, got {got:?}")]
    BadMagic { expected: [u8; 4], got: [u8; 4] },
    #[error("bad checksum for command {command}")]
    BadChecksum { command: String },
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("payload length {0} exceeds MAX_MESSAGE_SIZE")]
    OversizedPayload(u32),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("request timed out")]
    Timeout,
    #[error("peer host is banned")]
    Banned,
    #[error("peer disconnected")]
    Disconnected,
    #[error("chain engine error: {0}")]
    Chain(#[from] bbc_chain::ChainError),
}

pub type NetResult<T> = Result<T, NetError>;
