//! Turning a behaviour into a timing directive for the mining scheduler.

use crate::{ConsensusError, DposConfig};
use dpos_core::{ConsensusBehaviour, ConsensusCommand, ConsensusHint};
use dpos_types::{PublicKey, Round, Timestamp};
use std::time::Duration;
use tracing::debug;

/// Build the command for `behaviour`, computed against `current`.
pub fn generate_command(
    behaviour: ConsensusBehaviour,
    current: &Round,
    previous_round_id: u64,
    pubkey: &PublicKey,
    now: Timestamp,
    config: &DposConfig,
) -> Result<ConsensusCommand, ConsensusError> {
    let interval = current.mining_interval(config.mining_interval);
    let interval_ms = interval.as_millis() as u64;
    let limit_ms = interval_ms / u64::from(config.tiny_block_allowance());
    let hint = |behaviour: ConsensusBehaviour| {
        ConsensusHint {
            behaviour,
            round_id: current.round_id(),
            previous_round_id,
        }
        .encode()
    };

    if matches!(
        behaviour,
        ConsensusBehaviour::Nothing | ConsensusBehaviour::ChainNotInitialized
    ) {
        let mut command = ConsensusCommand::invalid(now);
        command.hint = hint(behaviour)?;
        return Ok(command);
    }
    let miner = current
        .miner(pubkey)
        .ok_or_else(|| ConsensusError::not_in_round(pubkey, current.round_number))?;

    let command = match behaviour {
        ConsensusBehaviour::TinyBlock => {
            let allowance = u64::from(config.tiny_block_allowance());
            let produced = miner.actual_mining_times.len() as u64;
            let next_sub_slot = miner
                .expected_mining_time
                .add_millis(produced * interval_ms / allowance);
            let arranged = next_sub_slot.max(now);
            build(
                now,
                arranged,
                miner.expected_mining_time + interval,
                limit_ms,
                hint(behaviour)?,
            )
        }
        b if b.terminates_round() => {
            let arranged = arrange_abnormal_mining_time(current, pubkey, now, interval)?;
            build(now, arranged, arranged + interval, limit_ms, hint(behaviour)?)
        }
        _ => {
            let preceding_idle = miner.order > 1
                && current
                    .miner_at_order(miner.order - 1)
                    .is_some_and(|m| m.out_value.is_none());
            if current.round_number == 1 && preceding_idle {
                // Stagger skipped miners so they do not all terminate at once.
                let steps = u64::from(miner.order) + current.miner_count() as u64 - 1;
                let arranged = now.add_millis(steps * interval_ms);
                debug!(
                    pubkey = %pubkey,
                    order = miner.order,
                    "Preceding miner idle in first round, terminating instead"
                );
                build(now, arranged, arranged + interval, limit_ms, hint(ConsensusBehaviour::NextRound)?)
            } else {
                let arranged = miner.expected_mining_time;
                build(now, arranged, arranged + interval, limit_ms, hint(behaviour)?)
            }
        }
    };

    debug!(
        pubkey = %pubkey,
        behaviour = %behaviour,
        arranged = %command.arranged_mining_time,
        wait_ms = command.ms_until_next_mining,
        "Generated consensus command"
    );
    Ok(command)
}

/// When `pubkey` should try to terminate `round`.
///
/// The extra block producer uses its extra block slot while it is still
/// open. Everyone else waits for their own order's slot in the first future
/// round-length window, where a window is `N + 1` slots long (the extra block
/// slot included), so competing terminators never collide.
pub fn arrange_abnormal_mining_time(
    round: &Round,
    pubkey: &PublicKey,
    now: Timestamp,
    interval: Duration,
) -> Result<Timestamp, ConsensusError> {
    let miner = round
        .miner(pubkey)
        .ok_or_else(|| ConsensusError::not_in_round(pubkey, round.round_number))?;

    if miner.is_extra_block_producer {
        if let Some(extra_block_time) = round.extra_block_mining_time(interval) {
            if extra_block_time + interval > now {
                return Ok(extra_block_time);
            }
        }
    }

    let start = round.round_start_time().ok_or_else(|| {
        ConsensusError::InvalidRound(format!("round {} has no order 1 miner", round.round_number))
    })?;
    let interval_ms = (interval.as_millis() as u64).max(1);
    let total_ms = (round.miner_count() as u64 + 1) * interval_ms;
    let missed_rounds = now.saturating_since(start).as_millis() as u64 / total_ms;
    let future_start = start.add_millis((missed_rounds + 1) * total_ms);
    Ok(future_start.add_millis(u64::from(miner.order) * interval_ms))
}

fn build(
    now: Timestamp,
    arranged: Timestamp,
    due: Timestamp,
    limit_ms: u64,
    hint: Vec<u8>,
) -> ConsensusCommand {
    ConsensusCommand {
        arranged_mining_time: arranged,
        ms_until_next_mining: arranged.as_millis().saturating_sub(now.as_millis()),
        mining_due_time: due,
        limit_ms_of_mining_block: limit_ms,
        hint,
    }
}
