//! Structural checks on rounds proposed by other miners.

use crate::ConsensusError;
use dpos_core::{ChainStateReader, ConsensusBehaviour};
use dpos_types::{PublicKey, Round};
use std::time::Duration;
use tracing::debug;

/// Check the schedule of a round.
///
/// Orders must form the permutation `1..=N`, exactly one miner must be the
/// extra block producer, and consecutive slots must be evenly spaced by a
/// non-zero interval.
pub fn check_time_slots(round: &Round, default_interval: Duration) -> Result<(), ConsensusError> {
    let miners = round.miners_by_order();
    if miners.is_empty() {
        return Err(ConsensusError::InvalidRound(format!(
            "round {} has no miners",
            round.round_number
        )));
    }

    for (i, miner) in miners.iter().enumerate() {
        if miner.order != i as u32 + 1 {
            return Err(ConsensusError::InvalidRound(format!(
                "orders of round {} are not a permutation of 1..={}",
                round.round_number,
                miners.len()
            )));
        }
    }

    let producers = miners.iter().filter(|m| m.is_extra_block_producer).count();
    if producers != 1 {
        return Err(ConsensusError::InvalidRound(format!(
            "round {} has {producers} extra block producers",
            round.round_number
        )));
    }

    if miners.len() > 1 {
        let interval = round.mining_interval(default_interval);
        if interval.is_zero() {
            return Err(ConsensusError::InvalidRound(format!(
                "round {} has zero mining interval",
                round.round_number
            )));
        }
        for pair in miners.windows(2) {
            let gap = pair[1]
                .expected_mining_time
                .saturating_since(pair[0].expected_mining_time);
            if gap != interval {
                return Err(ConsensusError::InvalidRound(format!(
                    "uneven time slots in round {} at order {}",
                    round.round_number, pair[1].order
                )));
            }
        }
    }
    Ok(())
}

/// Reject a reference to a round other than `round`.
pub fn validate_round_id(round: &Round, expected: u64) -> Result<(), ConsensusError> {
    let actual = round.round_id();
    if actual != expected {
        return Err(ConsensusError::RoundIdMismatch { expected, actual });
    }
    Ok(())
}

/// Validate a round proposed for `behaviour` against persisted state, before
/// the host executes it.
pub fn validate_before_execution<R: ChainStateReader + ?Sized>(
    reader: &R,
    pubkey: &PublicKey,
    behaviour: ConsensusBehaviour,
    provided: &Round,
    default_interval: Duration,
) -> Result<(), ConsensusError> {
    let current = reader
        .current_round()
        .ok_or(ConsensusError::ChainNotInitialized)?;
    if !current.contains(pubkey) {
        return Err(ConsensusError::not_in_round(pubkey, current.round_number));
    }

    if behaviour.is_update_value() || behaviour == ConsensusBehaviour::TinyBlock {
        validate_round_id(provided, current.round_id())?;
    } else if behaviour.terminates_round() {
        let term_number = if behaviour == ConsensusBehaviour::NextTerm {
            current.term_number + 1
        } else {
            current.term_number
        };
        expect_successor(current, provided, term_number)?;
        check_time_slots(provided, default_interval)?;
    } else {
        return Err(ConsensusError::InvalidRound(format!(
            "nothing to validate for behaviour {behaviour}"
        )));
    }

    debug!(
        pubkey = %pubkey,
        behaviour = %behaviour,
        round = provided.round_number,
        "Validated consensus information"
    );
    Ok(())
}

fn expect_successor(current: &Round, provided: &Round, term_number: u64) -> Result<(), ConsensusError> {
    if provided.round_number != current.round_number + 1 {
        return Err(ConsensusError::InvalidRound(format!(
            "expected round {}, got {}",
            current.round_number + 1,
            provided.round_number
        )));
    }
    if provided.term_number != term_number {
        return Err(ConsensusError::InvalidRound(format!(
            "expected term {term_number}, got {}",
            provided.term_number
        )));
    }
    Ok(())
}
