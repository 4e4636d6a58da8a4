//! Last irreversible block estimation.

use dpos_types::{BlockHeight, PublicKey, Round};
use std::collections::BTreeSet;
use tracing::debug;

/// Estimate how many blocks back from the tip are irreversible.
///
/// Succeeds with `floor(2N/3) + 1` once that many distinct miners have
/// published an out value, counting the current round first and then the
/// previous round from its highest order down. A single-miner round is
/// trivially final with offset 1. Returns `None` when consent is not reached.
pub fn calculate_lib_offset(current: &Round, previous: Option<&Round>) -> Option<u64> {
    let miner_count = current.miner_count();
    if miner_count == 1 {
        return Some(1);
    }
    let minimum = current.minimum_consent_count();

    let mut counted: BTreeSet<PublicKey> = current
        .miners
        .values()
        .filter(|m| m.out_value.is_some())
        .map(|m| m.pubkey)
        .collect();
    if counted.len() >= minimum {
        return Some(minimum as u64);
    }

    let previous = previous?;
    for miner in previous.miners_by_order().into_iter().rev().take(miner_count) {
        if miner.out_value.is_some() {
            counted.insert(miner.pubkey);
        }
        if counted.len() >= minimum {
            debug!(
                round = current.round_number,
                offset = minimum,
                "Consent reached with previous round"
            );
            return Some(minimum as u64);
        }
    }

    debug!(
        round = current.round_number,
        counted = counted.len(),
        minimum,
        "Not enough miners for irreversibility"
    );
    None
}

/// Irreversible height implied by the miners that mined in `current`.
///
/// Takes the heights those miners reported in `previous`, sorted ascending.
/// With fewer than `floor(2N/3) + 1` of them the height is genesis; otherwise
/// it is the element at index `(count - 1) / 3`, which at least two thirds
/// of the reports are at or above.
pub fn calculate_lib_height(current: &Round, previous: &Round) -> BlockHeight {
    let mined: Vec<PublicKey> = current.mined_miners().iter().map(|m| m.pubkey).collect();
    let heights = previous.sorted_implied_irreversible_heights(&mined);
    if heights.len() < current.minimum_consent_count() {
        return BlockHeight::GENESIS;
    }
    heights[(heights.len() - 1) / 3]
}
