//! Thin wiring of the consensus/sync core into a runnable process (spec §2
//! "a thin binary wiring the above together with `NetworkParams` for
//! mainnet/testnet/regtest, config loading, and `tracing` setup"). No RPC
//! server, no CLI surface beyond network/data-dir selection, per the
//! non-goals.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bbc_chain::Chain;
use bbc_mempool::Mempool;
use bbc_net::{NetAddr, Peer, Pool, ServiceFlags, VersionPayload};
use bbc_primitives::NetworkParams;
use bbc_store::{Store, StoreMode};
use bitcoin::block::Version as BlockVersion;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, CompactTarget, TxMerkleNode};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bbc-node", about = "Bitcoin consensus and synchronization core")]
struct Cli {
    /// Which network's parameters to run with.
    #[arg(long, default_value = "regtest")]
    network: String,

    /// Directory for the chain store; created if missing.
    #[arg(long, default_value = "./bbc-data")]
    data_dir: PathBuf,

    /// Peers to dial at startup, e.g. `127.0.0.1:18444`.
    #[arg(long)]
    connect: Vec<SocketAddr>,

    /// Optional TOML file overriding the selected network's `NetworkParams`
    /// (spec §6 "config surface").
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_params(network: &str, config: Option<&PathBuf>) -> Result<NetworkParams> {
    let mut params = match network {
        "mainnet" => NetworkParams::mainnet(),
        "regtest" => NetworkParams::regtest(),
        other => bail!("unsupported network {other:?}: expected \"mainnet\" or \"regtest\""),
    };
    if let Some(path) = config {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;
        params = toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
    }
    Ok(params)
}

fn mainnet_genesis_header(params: &NetworkParams) -> bitcoin::block::Header {
    bitcoin::block::Header {
        version: BlockVersion::ONE,
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33"
            .parse()
            .expect("valid mainnet genesis merkle root"),
        time: 1_231_006_505,
        bits: CompactTarget::from_consensus(params.pow_limit_bits),
        nonce: 2_083_236_893,
    }
}

fn regtest_genesis_header(params: &NetworkParams) -> bitcoin::block::Header {
    bitcoin::block::Header {
        version: BlockVersion::ONE,
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: TxMerkleNode::all_zeros(),
        time: 1_296_688_602,
        bits: CompactTarget::from_consensus(params.pow_limit_bits),
        nonce: 2,
    }
}

fn our_version_payload(start_height: i32) -> VersionPayload {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let services = ServiceFlags::NETWORK | ServiceFlags::WITNESS;
    let unspecified = NetAddr {
        services,
        addr: SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0),
    };
    VersionPayload {
        version: 70016,
        services: services.bits(),
        timestamp,
        receiver: unspecified,
        sender: unspecified,
        nonce: rand::random(),
        user_agent: "/bbc-node:0.1.0/".to_string(),
        start_height,
        relay: true,
    }
}

/// Dials and handshakes one `--connect` peer, then feeds every inbound
/// message through `Pool::handle_inbound` (spec §9 witness-inventory ban)
/// until the connection closes or the peer is disconnected for a
/// violation.
async fn run_peer(addr: SocketAddr, magic: [u8; 4], start_height: i32, pool: Arc<Pool>) {
    let mut peer = match Peer::connect(addr, magic, our_version_payload(start_height)).await {
        Ok(peer) => peer,
        Err(error) => {
            tracing::warn!(%addr, %error, "failed to connect to peer");
            return;
        }
    };
    tracing::info!(%addr, user_agent = %peer.info.user_agent, "peer connected");

    if let Ok(Some(message)) = pool.next_sync_request() {
        let _ = peer.send(&message).await;
    }

    loop {
        match peer.recv().await {
            Ok(message) => {
                if !pool.handle_inbound(&addr, &message) {
                    tracing::warn!(%addr, "disconnecting peer for protocol violation");
                    break;
                }
            }
            Err(error) => {
                tracing::warn!(%addr, %error, "peer connection closed");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();

    let params = Arc::new(load_params(&cli.network, cli.config.as_ref())?);
    let genesis_header = match cli.network.as_str() {
        "mainnet" => mainnet_genesis_header(&params),
        _ => regtest_genesis_header(&params),
    };

    std::fs::create_dir_all(&cli.data_dir).context("creating data directory")?;
    let store = Arc::new(Store::open(&cli.data_dir, params.clone(), StoreMode::Full).context("opening chain store")?);
    let chain = Arc::new(Chain::new(store.clone(), params.clone(), genesis_header).context("initializing chain engine")?);
    let mempool = Arc::new(Mempool::new(chain.clone(), store.clone(), params.clone()));
    let pool = Arc::new(Pool::new(chain.clone(), mempool.clone(), params.clone()));

    let tip = chain.tip();
    tracing::info!(network = %cli.network, height = tip.height, hash = %tip.hash(), "chain engine ready");

    if cli.connect.is_empty() {
        tracing::warn!("no peers configured (--connect); running with an empty peer set");
    }
    for peer_addr in &cli.connect {
        tokio::spawn(run_peer(*peer_addr, params.magic, tip.height as i32, pool.clone()));
    }

    let mut chain_events = chain.subscribe();
    let mut mempool_events = mempool.subscribe();
    loop {
        tokio::select! {
            event = chain_events.recv() => {
                match event {
                    Ok(event) => tracing::debug!(?event, "chain event"),
                    Err(_) => break,
                }
            }
            event = mempool_events.recv() => {
                match event {
                    Ok(event) => tracing::debug!(?event, "mempool event"),
                    Err(_) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    drop(pool);
    Ok(())
}
