//! Election inputs and long-lived candidate history.
//!
//! Both are produced and persisted by the host; the consensus core only
//! reads them (and returns updated history records for the host to store).

use crate::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Vote totals of a term, as recorded when the term ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionSnapshot {
    /// Term the snapshot was taken for.
    pub term_number: u64,

    /// Votes received per candidate.
    pub election_result: BTreeMap<PublicKey, u64>,
}

impl ElectionSnapshot {
    /// Candidates sorted by votes descending, ties by public key ascending.
    pub fn candidates_by_votes(&self) -> Vec<PublicKey> {
        let mut candidates: Vec<(&PublicKey, &u64)> = self.election_result.iter().collect();
        candidates.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        candidates.into_iter().map(|(pk, _)| *pk).collect()
    }
}

/// Permanent per-candidate production history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Candidate public key.
    pub pubkey: PublicKey,

    /// Blocks produced over all terms.
    pub produced_blocks: u64,

    /// Time slots missed over all terms.
    pub missed_time_slots: u64,

    /// Set once the candidate was evicted as an evil miner.
    pub is_evil: bool,
}

impl CandidateRecord {
    /// An empty history for `pubkey`.
    pub fn new(pubkey: PublicKey) -> Self {
        Self {
            pubkey,
            produced_blocks: 0,
            missed_time_slots: 0,
            is_evil: false,
        }
    }
}
