use crate::error::{NetError, NetResult};

/// The 12-byte ASCII command name carried in every message's header,
/// decoupled from the internal `Message` enum discriminant the same way
/// the teacher's reference `Message`/`Command` split does it (spec §4.5
/// expansion, grounded in `other_examples/` zebra-network's
/// `protocol/external/message.rs`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    Verack,
    Ping,
    Pong,
    GetAddr,
    Addr,
    Inv,
    GetData,
    NotFound,
    GetBlocks,
    GetHeaders,
    Headers,
    Tx,
    Block,
    MerkleBlock,
    Mempool,
    FilterLoad,
    FilterAdd,
    FilterClear,
    Reject,
    SendHeaders,
    FeeFilter,
    SendCmpct,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::GetAddr => "getaddr",
            Command::Addr => "addr",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::NotFound => "notfound",
            Command::GetBlocks => "getblocks",
            Command::GetHeaders => "getheaders",
            Command::Headers => "headers",
            Command::Tx => "tx",
            Command::Block => "block",
            Command::MerkleBlock => "merkleblock",
            Command::Mempool => "mempool",
            Command::FilterLoad => "filterload",
            Command::FilterAdd => "filteradd",
            Command::FilterClear => "filterclear",
            Command::Reject => "reject",
            Command::SendHeaders => "sendheaders",
            Command::FeeFilter => "feefilter",
            Command::SendCmpct => "sendcmpct",
        }
    }

    pub fn from_str(s: &str) -> NetResult<Self> {
        Ok(match s {
            "version" => Command::Version,
            "verack" => Command::Verack,
            "ping" => Command::Ping,
            "pong" => Command::Pong,
            "getaddr" => Command::GetAddr,
            "addr" => Command::Addr,
            "inv" => Command::Inv,
            "getdata" => Command::GetData,
            "notfound" => Command::NotFound,
            "getblocks" => Command::GetBlocks,
            "getheaders" => Command::GetHeaders,
            "headers" => Command::Headers,
            "tx" => Command::Tx,
            "block" => Command::Block,
            "merkleblock" => Command::MerkleBlock,
            "mempool" => Command::Mempool,
            "filterload" => Command::FilterLoad,
            "filteradd" => Command::FilterAdd,
            "filterclear" => Command::FilterClear,
            "reject" => Command::Reject,
            "sendheaders" => Command::SendHeaders,
            "feefilter" => Command::FeeFilter,
            "sendcmpct" => Command::SendCmpct,
            other => return Err(NetError::UnknownCommand(other.to_string())),
        })
    }

    /// Encodes into the 12-byte null-padded ASCII field (spec §6 framing).
    pub fn to_bytes(self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        let s = self.as_str().as_bytes();
        buf[..s.len()].copy_from_slice(s);
        buf
    }

    pub fn from_bytes(bytes: &[u8; 12]) -> NetResult<Self> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(12);
        let s = std::str::from_utf8(&bytes[..end]).map_err(|_| NetError::UnknownCommand("<non-utf8>".into()))?;
        Command::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        for cmd in [Command::Version, Command::GetHeaders, Command::SendCmpct] {
            let bytes = cmd.to_bytes();
            assert_eq!(Command::from_bytes(&bytes).unwrap(), cmd);
        }
    }

    #[test]
    fn pads_short_names_with_zero() {
        let bytes = Command::Tx.to_bytes();
        assert_eq!(&bytes[2..], &[0u8; 10]);
    }
}
