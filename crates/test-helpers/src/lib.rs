//! Test fixtures for DPoS round management.
//!
//! - [`keypair`] / [`keypairs`]: deterministic, properly signing miner keys
//! - [`build_round`]: a round with a hand-picked schedule
//! - [`TestChain`]: an in-memory [`ChainStateReader`]

use dpos_core::ChainStateReader;
use dpos_types::{
    CandidateRecord, ElectionSnapshot, Hash, KeyPair, MinerInRound, PublicKey, Round,
    Timestamp,
};
use std::collections::BTreeMap;
use std::time::Duration;

/// Deterministic keypair number `index`.
pub fn keypair(index: u8) -> KeyPair {
    let mut seed = [0u8; 32];
    seed[0] = index;
    seed[31] = 0xA5;
    KeyPair::from_seed(&seed)
}

/// `count` distinct deterministic keypairs.
pub fn keypairs(count: u8) -> Vec<KeyPair> {
    (1..=count).map(keypair).collect()
}

/// Public keys of `pairs`, in the same order.
pub fn pubkeys(pairs: &[KeyPair]) -> Vec<PublicKey> {
    pairs.iter().map(KeyPair::public_key).collect()
}

/// Build a round in which `miners[i]` has order `i + 1` and slot
/// `start + (i + 1) * interval`. Order 1 produces the extra block.
pub fn build_round(
    miners: &[PublicKey],
    round_number: u64,
    term_number: u64,
    start: Timestamp,
    interval: Duration,
) -> Round {
    let interval_ms = interval.as_millis() as u64;
    let mut round = Round::new(round_number, term_number);
    for (i, pubkey) in miners.iter().enumerate() {
        let order = i as u32 + 1;
        let slot = start.add_millis(interval_ms * u64::from(order));
        let mut miner = MinerInRound::new(*pubkey, order, slot);
        miner.is_extra_block_producer = order == 1;
        round.miners.insert(*pubkey, miner);
    }
    round
}

/// Mark `pubkey` as having produced its slot block in `round`.
///
/// Sets the out value to `Hash(in_value)`, the signature, and both next-round
/// orders to `next_order`.
pub fn mark_mined(
    round: &mut Round,
    pubkey: &PublicKey,
    in_value: &Hash,
    signature: Hash,
    next_order: u32,
) {
    if let Some(miner) = round.miner_mut(pubkey) {
        miner.out_value = Some(Hash::from_bytes(in_value.as_bytes()));
        miner.signature = Some(signature);
        miner.supposed_order_of_next_round = next_order;
        miner.final_order_of_next_round = next_order;
        miner.produced_blocks += 1;
        miner.actual_mining_times.push(miner.expected_mining_time);
    }
}

/// In-memory chain state.
#[derive(Debug, Clone, Default)]
pub struct TestChain {
    pub rounds: BTreeMap<u64, Round>,
    pub current_round_number: Option<u64>,
    pub current_term_number: Option<u64>,
    pub snapshots: BTreeMap<u64, ElectionSnapshot>,
    pub blockchain_start: Option<Timestamp>,
    pub initial_miners: Vec<PublicKey>,
    pub elected_miners: Option<Vec<PublicKey>>,
    pub records: BTreeMap<PublicKey, CandidateRecord>,
}

impl TestChain {
    /// A chain started at `start` by `initial_miners`, with no rounds yet.
    pub fn new(initial_miners: Vec<PublicKey>, start: Timestamp) -> Self {
        Self {
            blockchain_start: Some(start),
            initial_miners,
            ..Default::default()
        }
    }

    /// Persist `round` and make it current. A round with the current number
    /// replaces the stored one.
    pub fn push_round(&mut self, round: Round) {
        self.current_round_number = Some(round.round_number);
        self.current_term_number = Some(round.term_number);
        self.rounds.insert(round.round_number, round);
    }

    /// Store history records returned by the core.
    pub fn record_history(&mut self, records: impl IntoIterator<Item = CandidateRecord>) {
        for record in records {
            self.records.insert(record.pubkey, record);
        }
    }

    /// Record the election result of `term_number`.
    pub fn with_snapshot(mut self, term_number: u64, votes: &[(PublicKey, u64)]) -> Self {
        let snapshot = ElectionSnapshot {
            term_number,
            election_result: votes.iter().copied().collect(),
        };
        self.snapshots.insert(term_number, snapshot);
        self
    }

    /// Set the miners elected for the next term.
    pub fn with_elected(mut self, miners: Vec<PublicKey>) -> Self {
        self.elected_miners = Some(miners);
        self
    }

    /// Mutable access to the current round.
    pub fn current_round_mut(&mut self) -> Option<&mut Round> {
        let number = self.current_round_number?;
        self.rounds.get_mut(&number)
    }
}

impl ChainStateReader for TestChain {
    fn current_round_number(&self) -> Option<u64> {
        self.current_round_number
    }

    fn round(&self, round_number: u64) -> Option<&Round> {
        self.rounds.get(&round_number)
    }

    fn current_term_number(&self) -> Option<u64> {
        self.current_term_number
    }

    fn election_snapshot(&self, term_number: u64) -> Option<&ElectionSnapshot> {
        self.snapshots.get(&term_number)
    }

    fn blockchain_start_timestamp(&self) -> Option<Timestamp> {
        self.blockchain_start
    }

    fn initial_miners(&self) -> &[PublicKey] {
        &self.initial_miners
    }

    fn elected_miners(&self) -> Option<&[PublicKey]> {
        self.elected_miners.as_deref()
    }

    fn candidate_record(&self, pubkey: &PublicKey) -> Option<&CandidateRecord> {
        self.records.get(pubkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypairs_are_distinct_and_stable() {
        let a = pubkeys(&keypairs(5));
        let b = pubkeys(&keypairs(5));
        assert_eq!(a, b);
        let mut unique = a.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 5);
    }

    #[test]
    fn test_chain_tracks_current_and_previous() {
        let keys = pubkeys(&keypairs(3));
        let mut chain = TestChain::new(keys.clone(), Timestamp::EPOCH);
        assert!(chain.current_round().is_none());

        let interval = Duration::from_millis(4000);
        chain.push_round(build_round(&keys, 1, 1, Timestamp::EPOCH, interval));
        chain.push_round(build_round(&keys, 2, 1, Timestamp::from_secs(16), interval));

        assert_eq!(chain.current_round().unwrap().round_number, 2);
        assert_eq!(chain.previous_round().unwrap().round_number, 1);
        assert!(!chain.is_banned(&keys[0]));
    }
}
