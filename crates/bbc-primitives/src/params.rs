use bitcoin::block::Header as BlockHeader;
use bitcoin::{BlockHash, Network};
use serde::{Deserialize, Serialize};

/// A compiled-in `(height, hash)` pair. A fork that would rewrite a block at
/// or below a checkpoint height to a different hash fails validation
/// outright (spec §4.2 "Checkpoints").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub height: u32,
    pub hash: BlockHash,
}

/// A BIP9 versionbits deployment: which bit signals it, and the time window
/// during which signaling counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub name: &'static str,
    pub bit: u8,
    pub start_time: u32,
    pub timeout: u32,
    /// If true, the deployment is always active regardless of signaling
    /// (used for rules activated unconditionally on a given network, e.g.
    /// some test networks enabling segwit from genesis).
    pub always_active: bool,
}

/// All of the network-specific configuration the chain engine, store, and
/// sync driver need: consensus parameters, the checkpoint table, and the
/// policy constants spec §9's "Open Questions" resolved into concrete
/// numbers (`free_threshold`, `fee_halflife`).
///
/// Passed by reference/clone at construction, never read from a global —
/// see spec §9 "Global mutable state."
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkParams {
    pub network: Network,
    pub magic: [u8; 4],
    pub default_port: u16,
    pub dns_seeds: Vec<String>,
    pub checkpoints: Vec<Checkpoint>,

    pub genesis_hash: BlockHash,

    pub pow_limit_bits: u32,
    pub pow_target_timespan: u32,
    pub pow_target_spacing: u32,
    pub retarget_interval: u32,
    pub allow_min_difficulty_blocks: bool,
    pub no_retargeting: bool,

    pub subsidy_halving_interval: u32,

    pub bip34_height: u32,
    pub bip65_height: u32,
    pub bip66_height: u32,
    pub deployments: Vec<Deployment>,

    pub coinbase_maturity: u32,
    pub max_block_weight: u64,
    pub max_block_sigop_cost: u64,
    pub max_headers_results: usize,

    pub bip30_exceptions: Vec<(u32, BlockHash)>,

    pub prune_default_keep_blocks: u32,
    pub prune_after_height: u32,

    pub ban_threshold: i32,
    pub ban_time_secs: u64,

    pub free_threshold: f64,
    pub fee_halflife_secs: u64,
    pub min_relay_fee_rate: u64,
    pub dust_relay_fee_rate: u64,

    pub max_orphan_tx: usize,
    pub max_orphan_blocks: usize,
    pub mempool_max_bytes: u64,
    pub ancestor_limit: usize,
}

impl NetworkParams {
    /// Mainnet parameters. Values for `retarget_interval`, timespans,
    /// coinbase maturity, and the well-known activation heights reproduce
    /// Bitcoin Core's published constants per spec §1's non-goal ("behavior
    /// must reproduce Bitcoin Core semantics").
    pub fn mainnet() -> Self {
        NetworkParams {
            network: Network::Bitcoin,
            magic: [0xf9, 0xbe, 0xb4, 0xd9],
            default_port: 8333,
            dns_seeds: vec![
                "seed.bitcoin.sipa.be".into(),
                "dnsseed.bluematt.me".into(),
                "dnsseed.bitcoin.dashjr.org".into(),
            ],
            checkpoints: vec![Checkpoint {
                height: 0,
                hash: genesis_hash_mainnet(),
            }],
            genesis_hash: genesis_hash_mainnet(),
            pow_limit_bits: 0x1d00ffff,
            pow_target_timespan: 14 * 24 * 60 * 60,
            pow_target_spacing: 10 * 60,
            retarget_interval: 2016,
            allow_min_difficulty_blocks: false,
            no_retargeting: false,
            subsidy_halving_interval: 210_000,
            bip34_height: 227_931,
            bip65_height: 388_381,
            bip66_height: 363_725,
            deployments: vec![Deployment {
                name: "segwit",
                bit: 1,
                start_time: 1_479_168_000,
                timeout: 1_510_704_000,
                always_active: false,
            }],
            coinbase_maturity: 100,
            max_block_weight: 4_000_000,
            max_block_sigop_cost: 80_000,
            max_headers_results: 2000,
            bip30_exceptions: vec![],
            prune_default_keep_blocks: 288,
            prune_after_height: 100_000,
            ban_threshold: 100,
            ban_time_secs: 24 * 60 * 60,
            free_threshold: 144.0 * 100_000_000.0 / 250.0,
            fee_halflife_secs: 60 * 60,
            min_relay_fee_rate: 1000,
            dust_relay_fee_rate: 3000,
            max_orphan_tx: 100,
            max_orphan_blocks: 750,
            mempool_max_bytes: 300_000_000,
            ancestor_limit: 25,
        }
    }

    /// Regtest parameters: trivial difficulty, no checkpoints, deployments
    /// always active, used by tests and local development.
    pub fn regtest() -> Self {
        NetworkParams {
            network: Network::Regtest,
            magic: [0xfa, 0xbf, 0xb5, 0xda],
            default_port: 18444,
            dns_seeds: vec![],
            checkpoints: vec![],
            genesis_hash: genesis_hash_regtest(),
            pow_limit_bits: 0x207fffff,
            pow_target_timespan: 14 * 24 * 60 * 60,
            pow_target_spacing: 10 * 60,
            retarget_interval: 2016,
            allow_min_difficulty_blocks: true,
            no_retargeting: true,
            subsidy_halving_interval: 150,
            bip34_height: 0,
            bip65_height: 0,
            bip66_height: 0,
            deployments: vec![Deployment {
                name: "segwit",
                bit: 1,
                start_time: 0,
                timeout: u32::MAX,
                always_active: true,
            }],
            coinbase_maturity: 100,
            max_block_weight: 4_000_000,
            max_block_sigop_cost: 80_000,
            max_headers_results: 2000,
            bip30_exceptions: vec![],
            prune_default_keep_blocks: 288,
            prune_after_height: 1000,
            ban_threshold: 100,
            ban_time_secs: 24 * 60 * 60,
            free_threshold: 144.0 * 100_000_000.0 / 250.0,
            fee_halflife_secs: 60 * 60,
            min_relay_fee_rate: 1000,
            dust_relay_fee_rate: 3000,
            max_orphan_tx: 100,
            max_orphan_blocks: 750,
            mempool_max_bytes: 300_000_000,
            ancestor_limit: 25,
        }
    }

    /// Whether the given timestamp is within the allowed skew ahead of
    /// "network-adjusted now" for header sanity checks (spec §4.2: "ts <=
    /// network-adjusted now + 2h").
    pub fn max_future_block_time(&self, now: u32) -> u32 {
        now.saturating_add(2 * 60 * 60)
    }

    pub fn is_bip30_exception(&self, height: u32, hash: &BlockHash) -> bool {
        self.bip30_exceptions
            .iter()
            .any(|(h, hh)| *h == height && hh == hash)
    }

    pub fn checkpoint_at(&self, height: u32) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.height == height)
    }
}

fn genesis_hash_mainnet() -> BlockHash {
    use std::str::FromStr;
    BlockHash::from_str("000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26")
        .expect("valid mainnet genesis hash")
}

fn genesis_hash_regtest() -> BlockHash {
    use std::str::FromStr;
    BlockHash::from_str("0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206")
        .expect("valid regtest genesis hash")
}

/// Returns `true` if `header`'s own proof-of-work target equals the
/// network's absolute PoW limit, used by the min-difficulty special case on
/// test networks (spec §4.2).
pub fn is_min_difficulty(header: &BlockHeader, params: &NetworkParams) -> bool {
    header.bits.to_consensus() == params.pow_limit_bits
}
