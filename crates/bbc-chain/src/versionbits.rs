use bbc_primitives::{ChainEntry, Deployment, NetworkParams};
use bbc_store::Store;

use crate::error::ChainResult;

/// BIP9 deployment states (spec §4.2 "BIP34/65/66/68/112/141 activation per
/// deployment state").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThresholdState {
    Defined,
    Started,
    LockedIn,
    Active,
    Failed,
}

const RULE_BIT_MASK: u32 = 0xe000_0000;
const RULE_BIT_TOP: u32 = 0x2000_0000;

fn signals(header_version: i32, deployment: &Deployment) -> bool {
    let version = header_version as u32;
    (version & RULE_BIT_MASK) == RULE_BIT_TOP && (version >> deployment.bit) & 1 == 1
}

/// Computes the deployment state as of `tip` by walking back to the start
/// of the containing retarget period and counting signaling blocks within
/// it, then applying BIP9's defined/started/locked-in/active/failed state
/// machine over full periods since `start_time`.
///
/// Intermediate per-period states are cached in the store under the `v/`
/// prefix (spec §4.3 expansion) keyed by the last block hash of each
/// period, so a long-lived node doesn't replay the whole history on every
/// tip change.
pub fn state_at(
    store: &Store,
    params: &NetworkParams,
    deployment: &Deployment,
    tip: &ChainEntry,
) -> ChainResult<ThresholdState> {
    if deployment.always_active {
        return Ok(ThresholdState::Active);
    }

    let period = params.retarget_interval;
    let tip_period_start = (tip.height / period) * period;

    let mut periods = Vec::new();
    let mut height = tip_period_start;
    loop {
        periods.push(height);
        if height == 0 {
            break;
        }
        height -= period;
    }
    periods.reverse();

    let mut state = ThresholdState::Defined;
    for start_height in periods {
        let Some(start_hash) = store.hash_by_height(start_height)? else {
            continue;
        };
        let Some(start_entry) = store.entry(&start_hash)? else {
            continue;
        };

        if let Some(cached) = store.versionbits_state(&start_hash, deployment.name)? {
            state = decode_state(cached);
            continue;
        }

        state = advance_state(store, params, deployment, &start_entry, state)?;
        store.put_versionbits_state(&start_hash, deployment.name, encode_state(state))?;
    }

    Ok(state)
}

fn advance_state(
    store: &Store,
    params: &NetworkParams,
    deployment: &Deployment,
    period_start: &ChainEntry,
    previous: ThresholdState,
) -> ChainResult<ThresholdState> {
    match previous {
        ThresholdState::Failed | ThresholdState::Active => Ok(previous),
        ThresholdState::Defined => {
            if period_start.header.time >= deployment.timeout && deployment.timeout != 0 {
                Ok(ThresholdState::Failed)
            } else if period_start.header.time >= deployment.start_time {
                Ok(ThresholdState::Started)
            } else {
                Ok(ThresholdState::Defined)
            }
        }
        ThresholdState::Started => {
            if deployment.timeout != 0 && period_start.header.time >= deployment.timeout {
                return Ok(ThresholdState::Failed);
            }
            let threshold = params.retarget_interval * 95 / 100;
            let count = count_signaling(store, params, deployment, period_start)?;
            if count >= threshold {
                Ok(ThresholdState::LockedIn)
            } else {
                Ok(ThresholdState::Started)
            }
        }
        ThresholdState::LockedIn => Ok(ThresholdState::Active),
    }
}

fn count_signaling(
    store: &Store,
    params: &NetworkParams,
    deployment: &Deployment,
    period_start: &ChainEntry,
) -> ChainResult<u32> {
    let mut count = 0u32;
    let mut height = period_start.height;
    let end = height + params.retarget_interval;
    while height < end {
        let Some(hash) = store.hash_by_height(height)? else { break };
        let Some(entry) = store.entry(&hash)? else { break };
        if signals(entry.header.version.to_consensus(), deployment) {
            count += 1;
        }
        height += 1;
    }
    Ok(count)
}

fn encode_state(state: ThresholdState) -> u8 {
    match state {
        ThresholdState::Defined => 0,
        ThresholdState::Started => 1,
        ThresholdState::LockedIn => 2,
        ThresholdState::Active => 3,
        ThresholdState::Failed => 4,
    }
}

fn decode_state(byte: u8) -> ThresholdState {
    match byte {
        1 => ThresholdState::Started,
        2 => ThresholdState::LockedIn,
        3 => ThresholdState::Active,
        4 => ThresholdState::Failed,
        _ => ThresholdState::Defined,
    }
}
