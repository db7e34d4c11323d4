use bitcoin::hashes::{sha256d, Hash};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{NetError, NetResult};
use crate::wire::command::Command;
use crate::wire::message::Message;

/// `MAX_SIZE` from Bitcoin Core's `net.h`: the hard cap on any single
/// message payload, enforced before allocating a buffer for it.
pub const MAX_MESSAGE_SIZE: u32 = 32 * 1024 * 1024;

fn checksum(payload: &[u8]) -> [u8; 4] {
    let hash = sha256d::Hash::hash(payload);
    let bytes = hash.to_byte_array();
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

/// Frames `message` per spec §6: 4-byte magic, 12-byte command, 4-byte LE
/// length, 4-byte checksum, payload.
pub fn encode_message(magic: [u8; 4], message: &Message) -> NetResult<Vec<u8>> {
    let payload = message.encode_payload()?;
    let mut out = Vec::with_capacity(24 + payload.len());
    out.extend_from_slice(&magic);
    out.extend_from_slice(&message.command().to_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum(&payload));
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Reads and decodes exactly one framed message from `reader`, validating
/// magic, length bound, and checksum before dispatching to
/// `Message::decode_payload`.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R, expected_magic: [u8; 4]) -> NetResult<Message> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).await?;
    if magic != expected_magic {
        return Err(NetError::BadMagic { expected: expected_magic, got: magic });
    }

    let mut command_bytes = [0u8; 12];
    reader.read_exact(&mut command_bytes).await?;
    let command = Command::from_bytes(&command_bytes)?;

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes);
    if len > MAX_MESSAGE_SIZE {
        return Err(NetError::OversizedPayload(len));
    }

    let mut expected_checksum = [0u8; 4];
    reader.read_exact(&mut expected_checksum).await?;

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    if checksum(&payload) != expected_checksum {
        return Err(NetError::BadChecksum { command: command.as_str().to_string() });
    }

    Message::decode_payload(command, &payload)
}

pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, magic: [u8; 4], message: &Message) -> NetResult<()> {
    let framed = encode_message(magic, message)?;
    writer.write_all(&framed).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::message::VersionPayload;
    use crate::wire::types::{NetAddr, ServiceFlags};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn sample_version() -> Message {
        let addr = NetAddr {
            services: ServiceFlags::NETWORK,
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8333),
        };
        Message::Version(VersionPayload {
            version: 70016,
            services: ServiceFlags::NETWORK.bits(),
            timestamp: 1_700_000_000,
            receiver: addr,
            sender: addr,
            nonce: 42,
            user_agent: "/bbc:0.1.0/".to_string(),
            start_height: 100,
            relay: true,
        })
    }

    #[tokio::test]
    async fn round_trips_a_version_message() {
        let magic = [0xfa, 0xbf, 0xb5, 0xda];
        let msg = sample_version();
        let framed = encode_message(magic, &msg).unwrap();

        let mut cursor = std::io::Cursor::new(framed);
        let decoded = read_message(&mut cursor, magic).await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn rejects_wrong_magic() {
        let msg = Message::Verack;
        let framed = encode_message([0xfa, 0xbf, 0xb5, 0xda], &msg).unwrap();
        let mut cursor = std::io::Cursor::new(framed);
        let err = read_message(&mut cursor, [0xf9, 0xbe, 0xb4, 0xd9]).await.unwrap_err();
        assert!(matches!(err, NetError::BadMagic { .. }));
    }

    #[tokio::test]
    async fn rejects_corrupted_checksum() {
        let msg = Message::Ping(7);
        let magic = [0xfa, 0xbf, 0xb5, 0xda];
        let mut framed = encode_message(magic, &msg).unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0xff;
        let mut cursor = std::io::Cursor::new(framed);
        let err = read_message(&mut cursor, magic).await.unwrap_err();
        assert!(matches!(err, NetError::BadChecksum { .. }));
    }
}
