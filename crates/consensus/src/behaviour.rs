//! Deciding what a miner should do at a given moment.

use crate::{ConsensusError, DposConfig};
use dpos_core::{ChainStateReader, ConsensusBehaviour};
use dpos_types::{PublicKey, Round, Timestamp};
use std::time::Duration;
use tracing::debug;

/// Decide the behaviour of `pubkey` at `now`.
///
/// Returns [`ConsensusBehaviour::Nothing`] before genesis and for keys that are
/// not scheduled in the current round.
pub fn decide_behaviour<R: ChainStateReader + ?Sized>(
    reader: &R,
    pubkey: &PublicKey,
    now: Timestamp,
    config: &DposConfig,
) -> Result<ConsensusBehaviour, ConsensusError> {
    let Some(current) = reader.current_round() else {
        return Ok(ConsensusBehaviour::Nothing);
    };
    if !current.contains(pubkey) {
        return Ok(ConsensusBehaviour::Nothing);
    }
    let blockchain_start = reader
        .blockchain_start_timestamp()
        .ok_or(ConsensusError::MissingBlockchainStartTimestamp)?;

    let provider = BehaviourProvider {
        current,
        previous: reader.previous_round(),
        pubkey: *pubkey,
        now,
        config,
        blockchain_start,
    };
    let behaviour = provider.decide();
    debug!(
        pubkey = %pubkey,
        round = current.round_number,
        behaviour = %behaviour,
        "Decided consensus behaviour"
    );
    Ok(behaviour)
}

/// Decision table for one miner against one round.
pub struct BehaviourProvider<'a> {
    pub current: &'a Round,
    pub previous: Option<&'a Round>,
    pub pubkey: PublicKey,
    pub now: Timestamp,
    pub config: &'a DposConfig,
    pub blockchain_start: Timestamp,
}

impl BehaviourProvider<'_> {
    /// Run the decision table.
    pub fn decide(&self) -> ConsensusBehaviour {
        let Some(miner) = self.current.miner(&self.pubkey) else {
            return ConsensusBehaviour::Nothing;
        };
        let slot_passed =
            self.current
                .is_time_slot_passed(&self.pubkey, self.now, self.config.mining_interval);

        if miner.out_value.is_none() {
            if let Some(behaviour) = self.before_producing(miner.order, slot_passed) {
                return behaviour;
            }
        } else if !slot_passed
            && self.config.tiny_block_allowance() > 1
            && (miner.actual_mining_times.len() as u32) < self.config.tiny_block_allowance()
        {
            return ConsensusBehaviour::TinyBlock;
        }

        self.terminate()
    }

    fn before_producing(&self, order: u32, slot_passed: bool) -> Option<ConsensusBehaviour> {
        let Some(previous) = self.previous else {
            // Don't fork ahead of the boot miner.
            let boot_miner_idle = self
                .current
                .first_miner()
                .is_some_and(|first| first.out_value.is_none());
            if order != 1 && boot_miner_idle {
                return Some(ConsensusBehaviour::NextRound);
            }
            return Some(ConsensusBehaviour::UpdateValueWithoutPreviousInValue);
        };

        if previous.term_number != self.current.term_number || !previous.contains(&self.pubkey) {
            return Some(ConsensusBehaviour::UpdateValueWithoutPreviousInValue);
        }
        if !slot_passed {
            return Some(ConsensusBehaviour::UpdateValue);
        }
        None
    }

    fn terminate(&self) -> ConsensusBehaviour {
        if self.current.round_number == 1 {
            return ConsensusBehaviour::NextRound;
        }
        if need_to_change_term(self.current, self.blockchain_start, self.config.period) {
            ConsensusBehaviour::NextTerm
        } else {
            ConsensusBehaviour::NextRound
        }
    }
}

/// Whether enough miners have produced past the end of the current term's
/// period.
///
/// Each miner's latest mining time falls into period bucket
/// `(time - blockchain_start) / period`; the term changes once at least
/// `floor(2N/3) + 1` miners are outside bucket `term_number - 1`.
pub fn need_to_change_term(round: &Round, blockchain_start: Timestamp, period: Duration) -> bool {
    let period_ms = (period.as_millis() as u64).max(1);
    let current_bucket = round.term_number.saturating_sub(1);
    let moved_on = round
        .miners
        .values()
        .filter_map(|m| m.latest_mining_time())
        .filter(|t| t.saturating_since(blockchain_start).as_millis() as u64 / period_ms != current_bucket)
        .count();
    moved_on >= round.minimum_consent_count()
}
