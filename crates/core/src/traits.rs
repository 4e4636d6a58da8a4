//! Host-provided state access.

use dpos_types::{CandidateRecord, ElectionSnapshot, PublicKey, Round, Timestamp};

/// Read-only view of persisted consensus state.
///
/// The host implements this over its storage and hands it to the core for
/// the duration of one state transition. The core never writes through it;
/// every result it produces is returned for the host to persist.
///
/// All methods are synchronous and must return the same answer for the same
/// chain state on every node.
pub trait ChainStateReader {
    /// Number of the latest persisted round, `None` before genesis.
    fn current_round_number(&self) -> Option<u64>;

    /// A persisted round by number.
    fn round(&self, round_number: u64) -> Option<&Round>;

    /// Current term number, `None` before genesis.
    fn current_term_number(&self) -> Option<u64>;

    /// Election snapshot recorded for `term_number`.
    fn election_snapshot(&self, term_number: u64) -> Option<&ElectionSnapshot>;

    /// Timestamp of the genesis block.
    fn blockchain_start_timestamp(&self) -> Option<Timestamp>;

    /// Miners of the genesis term.
    fn initial_miners(&self) -> &[PublicKey];

    /// Miner list elected for the next term, if the election has produced one.
    fn elected_miners(&self) -> Option<&[PublicKey]>;

    /// Permanent history of a candidate.
    fn candidate_record(&self, pubkey: &PublicKey) -> Option<&CandidateRecord>;

    // Derived methods

    /// The latest persisted round.
    fn current_round(&self) -> Option<&Round> {
        self.current_round_number().and_then(|n| self.round(n))
    }

    /// The round before the current one.
    fn previous_round(&self) -> Option<&Round> {
        self.current_round_number()
            .and_then(|n| n.checked_sub(1))
            .filter(|&n| n > 0)
            .and_then(|n| self.round(n))
    }

    /// Whether a candidate has been evicted as an evil miner.
    fn is_banned(&self, pubkey: &PublicKey) -> bool {
        self.candidate_record(pubkey)
            .map(|record| record.is_evil)
            .unwrap_or(false)
    }
}
