use std::collections::HashSet;
use std::net::SocketAddr;

use bitcoin::{BlockHash, Txid};
use tokio::net::TcpStream;

use crate::error::NetResult;
use crate::wire::{read_message, write_message, Message, ServiceFlags, VersionPayload};

/// What we learned about a peer during its `version` handshake (spec §4.5
/// "Record peer services, agent, height, fee filter support, witness
/// support").
#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub version: i32,
    pub services: ServiceFlags,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
    pub supports_witness: bool,
    pub sends_headers: bool,
    pub fee_filter: Option<u64>,
}

/// One connected peer: the framed socket plus everything learned during the
/// handshake and the per-peer in-flight request queues (spec §4.5
/// "per-peer queues partition TX and BLOCK requests").
pub struct Peer {
    stream: TcpStream,
    magic: [u8; 4],
    pub info: PeerInfo,
    pub is_loader: bool,
    pending_tx: HashSet<Txid>,
    pending_blocks: HashSet<BlockHash>,
    ban_score: i32,
}

impl Peer {
    /// Dials `addr` and runs the handshake as the connecting side (spec
    /// §4.5 "Send version, expect version, reply verack, receive verack").
    pub async fn connect(addr: SocketAddr, magic: [u8; 4], my_version: VersionPayload) -> NetResult<Peer> {
        let stream = TcpStream::connect(addr).await?;
        Peer::handshake(stream, addr, magic, my_version, true).await
    }

    /// Completes the handshake as the accepting side of an already-open
    /// inbound socket.
    pub async fn accept(stream: TcpStream, addr: SocketAddr, magic: [u8; 4], my_version: VersionPayload) -> NetResult<Peer> {
        Peer::handshake(stream, addr, magic, my_version, false).await
    }

    async fn handshake(
        mut stream: TcpStream,
        addr: SocketAddr,
        magic: [u8; 4],
        my_version: VersionPayload,
        initiator: bool,
    ) -> NetResult<Peer> {
        if initiator {
            write_message(&mut stream, magic, &Message::Version(my_version.clone())).await?;
        }

        let their_version = loop {
            match read_message(&mut stream, magic).await? {
                Message::Version(v) => break v,
                _ => continue,
            }
        };

        if !initiator {
            write_message(&mut stream, magic, &Message::Version(my_version)).await?;
        }
        write_message(&mut stream, magic, &Message::Verack).await?;

        loop {
            match read_message(&mut stream, magic).await? {
                Message::Verack => break,
                _ => continue,
            }
        }

        let services = ServiceFlags::from_bits_retain(their_version.services);
        let info = PeerInfo {
            addr,
            version: their_version.version,
            services,
            user_agent: their_version.user_agent,
            start_height: their_version.start_height,
            relay: their_version.relay,
            supports_witness: services.contains(ServiceFlags::WITNESS),
            sends_headers: false,
            fee_filter: None,
        };

        Ok(Peer {
            stream,
            magic,
            info,
            is_loader: false,
            pending_tx: HashSet::new(),
            pending_blocks: HashSet::new(),
            ban_score: 0,
        })
    }

    pub async fn send(&mut self, message: &Message) -> NetResult<()> {
        write_message(&mut self.stream, self.magic, message).await
    }

    pub async fn recv(&mut self) -> NetResult<Message> {
        let message = read_message(&mut self.stream, self.magic).await?;
        self.apply_side_effects(&message);
        Ok(message)
    }

    /// Updates handshake-adjacent peer state from post-handshake messages
    /// that change how we treat the peer (spec §4.5 "exchange sendheaders
    /// and filterload as needed", "on feefilter, suppress relaying").
    fn apply_side_effects(&mut self, message: &Message) {
        match message {
            Message::SendHeaders => self.info.sends_headers = true,
            Message::FeeFilter(rate) => self.info.fee_filter = Some(*rate),
            _ => {}
        }
    }

    pub fn track_block_request(&mut self, hash: BlockHash) {
        self.pending_blocks.insert(hash);
    }

    pub fn fulfill_block(&mut self, hash: &BlockHash) -> bool {
        self.pending_blocks.remove(hash)
    }

    pub fn track_tx_request(&mut self, txid: Txid) {
        self.pending_tx.insert(txid);
    }

    pub fn fulfill_tx(&mut self, txid: &Txid) -> bool {
        self.pending_tx.remove(txid)
    }

    pub fn in_flight_blocks(&self) -> usize {
        self.pending_blocks.len()
    }

    pub fn in_flight_tx(&self) -> usize {
        self.pending_tx.len()
    }

    /// Whether a given `feefilter` threshold should suppress relaying a
    /// transaction of `fee_rate` sat/vB to this peer.
    pub fn suppresses(&self, fee_rate_sat_per_kvb: u64) -> bool {
        self.info.fee_filter.is_some_and(|min| fee_rate_sat_per_kvb < min)
    }

    pub fn add_ban_score(&mut self, score: i32) -> i32 {
        self.ban_score += score;
        self.ban_score
    }

    pub fn ban_score(&self) -> i32 {
        self.ban_score
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("addr", &self.info.addr)
            .field("user_agent", &self.info.user_agent)
            .field("is_loader", &self.is_loader)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::NetAddr;
    use bitcoin::hashes::Hash;
    use std::net::{IpAddr, Ipv4Addr};

    const MAGIC: [u8; 4] = [0xfa, 0xbf, 0xb5, 0xda];

    fn version_payload(user_agent: &str, services: u64) -> VersionPayload {
        let addr = NetAddr {
            services: ServiceFlags::from_bits_retain(services),
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 0),
        };
        VersionPayload {
            version: 70016,
            services,
            timestamp: 1_700_000_000,
            receiver: addr,
            sender: addr,
            nonce: 7,
            user_agent: user_agent.to_string(),
            start_height: 100,
            relay: true,
        }
    }

    #[tokio::test]
    async fn handshake_over_loopback_records_peer_info() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, addr) = listener.accept().await.unwrap();
            Peer::accept(stream, addr, MAGIC, version_payload("/bbc-server:0.1.0/", ServiceFlags::NETWORK.bits())).await.unwrap()
        });

        let client = Peer::connect(
            server_addr,
            MAGIC,
            version_payload("/bbc-client:0.1.0/", (ServiceFlags::NETWORK | ServiceFlags::WITNESS).bits()),
        )
        .await
        .unwrap();

        let server_peer = server.await.unwrap();
        assert_eq!(server_peer.info.user_agent, "/bbc-client:0.1.0/");
        assert!(server_peer.info.supports_witness);
        assert_eq!(client.info.user_agent, "/bbc-server:0.1.0/");
        assert!(!client.info.supports_witness);
    }

    #[tokio::test]
    async fn feefilter_message_updates_suppression_threshold() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, addr) = listener.accept().await.unwrap();
            let mut peer = Peer::accept(stream, addr, MAGIC, version_payload("/bbc-server:0.1.0/", 0)).await.unwrap();
            peer.recv().await.unwrap();
            peer
        });

        let mut client = Peer::connect(server_addr, MAGIC, version_payload("/bbc-client:0.1.0/", 0)).await.unwrap();
        client.send(&Message::FeeFilter(1000)).await.unwrap();

        let server_peer = server.await.unwrap();
        assert!(server_peer.suppresses(500));
        assert!(!server_peer.suppresses(2000));
    }

    #[tokio::test]
    async fn tracks_and_fulfills_in_flight_block_request() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, addr) = listener.accept().await.unwrap();
            Peer::accept(stream, addr, MAGIC, version_payload("/s/", 0)).await.unwrap()
        });
        let mut client = Peer::connect(server_addr, MAGIC, version_payload("/c/", 0)).await.unwrap();
        let _ = server.await.unwrap();

        let hash = BlockHash::from_byte_array([3u8; 32]);
        assert_eq!(client.in_flight_blocks(), 0);
        client.track_block_request(hash);
        assert_eq!(client.in_flight_blocks(), 1);
        assert!(client.fulfill_block(&hash));
        assert_eq!(client.in_flight_blocks(), 0);
    }
}
