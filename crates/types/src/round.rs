//! Round and per-miner schedule types.
//!
//! A [`Round`] is the schedule of one DPoS cycle: which miner mines in which
//! slot, plus everything each miner published while mining. Miners are kept
//! in a map keyed by public key; the map order carries no meaning. Anything
//! ordering-sensitive goes through [`Round::miners_by_order`].

use crate::{BlockHeight, Hash, PublicKey, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// One miner's entry in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerInRound {
    /// Miner public key.
    pub pubkey: PublicKey,

    /// Position in the round, `1..=N`.
    pub order: u32,

    /// Start of this miner's time slot.
    pub expected_mining_time: Timestamp,

    /// Times at which this miner actually produced blocks this round.
    /// More than one entry means tiny blocks were produced.
    pub actual_mining_times: Vec<Timestamp>,

    /// Commitment `Hash(in_value)`. Written once per round.
    pub out_value: Option<Hash>,

    /// Preimage of the previous round's out value, either published by this
    /// miner or reconstructed from shares.
    pub previous_in_value: Option<Hash>,

    /// Previous in value exactly as this miner published it. Reconstruction
    /// never writes here, so a forged reveal stays visible to evil detection.
    pub published_previous_in_value: Option<Hash>,

    /// Pseudo-random seed derived from the in value and the previous round.
    pub signature: Option<Hash>,

    /// Order this miner's signature maps to in the next round (0 = not mined).
    pub supposed_order_of_next_round: u32,

    /// Next-round order after conflict resolution (0 = not mined).
    pub final_order_of_next_round: u32,

    /// Blocks produced in the current term.
    pub produced_blocks: u64,

    /// Tiny blocks produced in this round.
    pub produced_tiny_blocks: u64,

    /// Time slots missed in the current term.
    pub missed_time_slots: u64,

    /// Whether this miner produces the round's extra block.
    pub is_extra_block_producer: bool,

    /// Shares of this miner's in value, keyed by recipient.
    pub encrypted_pieces: BTreeMap<PublicKey, Vec<u8>>,

    /// Shares this miner decrypted, keyed by the original sender.
    pub decrypted_pieces: BTreeMap<PublicKey, Vec<u8>>,

    /// Chain height this miner observed when it last produced.
    pub implied_irreversible_block_height: BlockHeight,
}

impl MinerInRound {
    /// Create a fresh entry with the given slot.
    pub fn new(pubkey: PublicKey, order: u32, expected_mining_time: Timestamp) -> Self {
        Self {
            pubkey,
            order,
            expected_mining_time,
            actual_mining_times: Vec::new(),
            out_value: None,
            previous_in_value: None,
            published_previous_in_value: None,
            signature: None,
            supposed_order_of_next_round: 0,
            final_order_of_next_round: 0,
            produced_blocks: 0,
            produced_tiny_blocks: 0,
            missed_time_slots: 0,
            is_extra_block_producer: false,
            encrypted_pieces: BTreeMap::new(),
            decrypted_pieces: BTreeMap::new(),
            implied_irreversible_block_height: BlockHeight::GENESIS,
        }
    }

    /// Whether this miner has produced its slot block in this round.
    pub fn has_mined(&self) -> bool {
        self.supposed_order_of_next_round != 0
    }

    /// Most recent actual mining time, if any.
    pub fn latest_mining_time(&self) -> Option<Timestamp> {
        self.actual_mining_times.last().copied()
    }
}

/// The schedule of miners and time slots for one round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Monotonic round number (first round is 1).
    pub round_number: u64,

    /// Term this round belongs to.
    pub term_number: u64,

    /// Seconds elapsed since the chain started, at round generation.
    pub blockchain_age: u64,

    /// Miner entries keyed by public key.
    pub miners: BTreeMap<PublicKey, MinerInRound>,

    /// Carried forward; maintained by the host's finality logic.
    pub confirmed_irreversible_block_height: BlockHeight,

    /// Carried forward; maintained by the host's finality logic.
    pub confirmed_irreversible_block_round_number: u64,

    /// Extra block producer of the round this one was generated from.
    pub extra_block_producer_of_previous_round: Option<PublicKey>,

    /// Set on the first round of a term or after a miner replacement.
    pub is_miner_list_just_changed: bool,
}

impl Round {
    /// Create an empty round.
    pub fn new(round_number: u64, term_number: u64) -> Self {
        Self {
            round_number,
            term_number,
            ..Default::default()
        }
    }

    /// Fingerprint of the schedule: the sum of all expected mining times in
    /// milliseconds. Depends on nothing but the expected mining times.
    pub fn round_id(&self) -> u64 {
        self.miners
            .values()
            .fold(0u64, |acc, m| acc.wrapping_add(m.expected_mining_time.as_millis()))
    }

    /// Whether the round has no miners.
    pub fn is_empty(&self) -> bool {
        self.miners.is_empty()
    }

    /// Number of miners, `N`.
    pub fn miner_count(&self) -> usize {
        self.miners.len()
    }

    /// Whether `pubkey` is scheduled in this round.
    pub fn contains(&self, pubkey: &PublicKey) -> bool {
        self.miners.contains_key(pubkey)
    }

    /// Look up a miner.
    pub fn miner(&self, pubkey: &PublicKey) -> Option<&MinerInRound> {
        self.miners.get(pubkey)
    }

    /// Look up a miner mutably.
    pub fn miner_mut(&mut self, pubkey: &PublicKey) -> Option<&mut MinerInRound> {
        self.miners.get_mut(pubkey)
    }

    /// All public keys, ascending by order.
    pub fn pubkeys_by_order(&self) -> Vec<PublicKey> {
        self.miners_by_order().iter().map(|m| m.pubkey).collect()
    }

    /// Miner entries sorted by `order` (ties broken by public key).
    pub fn miners_by_order(&self) -> Vec<&MinerInRound> {
        let mut miners: Vec<&MinerInRound> = self.miners.values().collect();
        miners.sort_by(|a, b| a.order.cmp(&b.order).then(a.pubkey.cmp(&b.pubkey)));
        miners
    }

    /// The miner holding `order`.
    pub fn miner_at_order(&self, order: u32) -> Option<&MinerInRound> {
        self.miners.values().find(|m| m.order == order)
    }

    /// The order-1 miner.
    pub fn first_miner(&self) -> Option<&MinerInRound> {
        self.miner_at_order(1)
    }

    /// The miner with the highest order.
    pub fn last_miner(&self) -> Option<&MinerInRound> {
        self.miners_by_order().last().copied()
    }

    /// The extra block producer of this round.
    pub fn extra_block_producer(&self) -> Option<&MinerInRound> {
        self.miners.values().find(|m| m.is_extra_block_producer)
    }

    /// Miners that produced their slot block, sorted by order.
    pub fn mined_miners(&self) -> Vec<&MinerInRound> {
        self.miners_by_order()
            .into_iter()
            .filter(|m| m.has_mined())
            .collect()
    }

    /// Miners that did not produce their slot block, sorted by order.
    pub fn not_mined_miners(&self) -> Vec<&MinerInRound> {
        self.miners_by_order()
            .into_iter()
            .filter(|m| !m.has_mined())
            .collect()
    }

    /// `floor(2N/3) + 1`, the number of miners needed for consent.
    pub fn minimum_consent_count(&self) -> usize {
        self.miner_count() * 2 / 3 + 1
    }

    /// Slot length: distance between the order-1 and order-2 slots, or
    /// `default` for rounds with fewer than two miners.
    pub fn mining_interval(&self, default: Duration) -> Duration {
        match (self.miner_at_order(1), self.miner_at_order(2)) {
            (Some(first), Some(second)) => second
                .expected_mining_time
                .saturating_since(first.expected_mining_time),
            _ => default,
        }
    }

    /// Start of the round (the order-1 slot).
    pub fn round_start_time(&self) -> Option<Timestamp> {
        self.first_miner().map(|m| m.expected_mining_time)
    }

    /// Start of the extra block slot, right after the last miner's slot.
    pub fn extra_block_mining_time(&self, default_interval: Duration) -> Option<Timestamp> {
        let interval = self.mining_interval(default_interval);
        self.last_miner()
            .map(|m| m.expected_mining_time + interval)
    }

    /// Whether `pubkey`'s time slot has already passed at `now`.
    ///
    /// Round 1 has no reliable schedule, so there the slot is derived from
    /// when the first miner actually started mining.
    pub fn is_time_slot_passed(
        &self,
        pubkey: &PublicKey,
        now: Timestamp,
        default_interval: Duration,
    ) -> bool {
        let Some(miner) = self.miner(pubkey) else {
            return false;
        };
        let interval = self.mining_interval(default_interval);

        if self.round_number != 1 {
            return miner.expected_mining_time + interval < now;
        }

        let Some(started) = self
            .first_miner()
            .and_then(|m| m.actual_mining_times.first().copied())
        else {
            return false;
        };
        let interval_ms = (interval.as_millis() as u64).max(1);
        let running = now.saturating_since(started).as_millis() as u64;
        let expected_order = running / interval_ms + 1;
        u64::from(miner.order) < expected_order
    }

    /// Derive the signature seed a miner publishes together with `in_value`:
    /// `Hash(in_value XOR s_1 XOR ... XOR s_N)` over this round's signatures.
    pub fn calculate_signature(&self, in_value: &Hash) -> Hash {
        let folded = self
            .miners
            .values()
            .filter_map(|m| m.signature)
            .fold(Hash::ZERO, |acc, sig| acc.xor(&sig));
        in_value.xor_and_hash(&folded)
    }

    /// Implied irreversible heights of the given miners, positive ones only,
    /// sorted ascending.
    pub fn sorted_implied_irreversible_heights(&self, pubkeys: &[PublicKey]) -> Vec<BlockHeight> {
        let mut heights: Vec<BlockHeight> = pubkeys
            .iter()
            .filter_map(|pk| self.miner(pk))
            .map(|m| m.implied_irreversible_block_height)
            .filter(|h| h.0 > 0)
            .collect();
        heights.sort();
        heights
    }

    /// Set of orders currently claimed as a next-round final order.
    pub fn claimed_next_orders(&self) -> BTreeSet<u32> {
        self.miners
            .values()
            .map(|m| m.final_order_of_next_round)
            .filter(|&o| o != 0)
            .collect()
    }

    /// Drop encrypted and decrypted pieces once they are no longer needed
    /// for reconstruction.
    pub fn clear_secret_sharing_information(&mut self) {
        for miner in self.miners.values_mut() {
            miner.encrypted_pieces.clear();
            miner.decrypted_pieces.clear();
        }
    }
}
