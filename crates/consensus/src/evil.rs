//! Evil miner detection and replacement.
//!
//! A miner is evil when the in value it reveals does not hash to the out
//! value it committed to in the previous round, or when it has missed more
//! time slots than the network tolerates. Evil miners are swapped for backup
//! candidates before the next round is generated.

use dpos_core::ChainStateReader;
use dpos_types::{CandidateRecord, Hash, MinerInRound, PublicKey, Round};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, warn};

/// Why a miner was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvilReason {
    /// Revealed previous in value does not match the committed out value.
    InconsistentReveal,

    /// Missed more time slots than tolerated.
    ExcessiveMissedTimeSlots,
}

impl fmt::Display for EvilReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvilReason::InconsistentReveal => f.write_str("inconsistent reveal"),
            EvilReason::ExcessiveMissedTimeSlots => f.write_str("excessive missed time slots"),
        }
    }
}

/// A flagged miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvilMiner {
    pub pubkey: PublicKey,
    pub reason: EvilReason,
}

/// One applied replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinerReplacement {
    pub evil: PublicKey,
    pub replacement: PublicKey,
    pub reason: EvilReason,
}

/// Result of [`replace_evil_miners`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplacementOutcome {
    /// Replacements applied to the round, in the order they were made.
    pub replacements: Vec<MinerReplacement>,

    /// Updated history records of the evicted miners, for the host to persist.
    pub history: Vec<CandidateRecord>,
}

impl ReplacementOutcome {
    /// Whether the miner list changed.
    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty()
    }
}

/// Whether `pubkey`'s revealed previous in value contradicts its commitment.
///
/// Only miners present in both rounds that published a value themselves this
/// round can be judged; values reconstructed from shares are not evidence. A
/// reveal against a missing commitment is inconsistent.
pub fn is_evil(current: &Round, previous: &Round, pubkey: &PublicKey) -> bool {
    let (Some(now), Some(before)) = (current.miner(pubkey), previous.miner(pubkey)) else {
        return false;
    };
    let Some(revealed) = now.published_previous_in_value else {
        return false;
    };
    before.out_value != Some(Hash::from_bytes(revealed.as_bytes()))
}

/// Miners whose revealed previous in value is inconsistent, by current order.
pub fn detect_inconsistent_reveals(current: &Round, previous: &Round) -> Vec<PublicKey> {
    current
        .miners_by_order()
        .into_iter()
        .filter(|m| is_evil(current, previous, &m.pubkey))
        .map(|m| m.pubkey)
        .collect()
}

/// Miners whose missed time slots exceed `tolerance`, by current order.
pub fn detect_unavailable_miners(current: &Round, tolerance: u64) -> Vec<PublicKey> {
    current
        .miners_by_order()
        .into_iter()
        .filter(|m| m.missed_time_slots > tolerance)
        .map(|m| m.pubkey)
        .collect()
}

/// Run both detectors. A miner caught by both is reported once, as an
/// inconsistent reveal.
pub fn detect_evil_miners(current: &Round, previous: &Round, tolerance: u64) -> Vec<EvilMiner> {
    let mut flagged: Vec<EvilMiner> = detect_inconsistent_reveals(current, previous)
        .into_iter()
        .map(|pubkey| EvilMiner {
            pubkey,
            reason: EvilReason::InconsistentReveal,
        })
        .collect();
    for pubkey in detect_unavailable_miners(current, tolerance) {
        if !flagged.iter().any(|e| e.pubkey == pubkey) {
            flagged.push(EvilMiner {
                pubkey,
                reason: EvilReason::ExcessiveMissedTimeSlots,
            });
        }
    }
    flagged
}

/// Pick up to `count` replacement miners.
///
/// Backup candidates of the previous term's election, by votes, come first;
/// initial miners fill any remaining places. Initial miners are never taken
/// from the candidate list, and current miners and banned keys are never
/// picked at all.
pub fn select_replacements<R: ChainStateReader + ?Sized>(
    count: usize,
    current: &Round,
    reader: &R,
) -> Vec<PublicKey> {
    let initial: BTreeSet<PublicKey> = reader.initial_miners().iter().copied().collect();
    let mut chosen: Vec<PublicKey> = Vec::with_capacity(count);
    let eligible = |pubkey: &PublicKey, chosen: &[PublicKey]| {
        !current.contains(pubkey) && !reader.is_banned(pubkey) && !chosen.contains(pubkey)
    };

    let snapshot = current
        .term_number
        .checked_sub(1)
        .and_then(|term| reader.election_snapshot(term));
    match snapshot {
        Some(snapshot) => {
            for candidate in snapshot.candidates_by_votes() {
                if chosen.len() == count {
                    break;
                }
                if !initial.contains(&candidate) && eligible(&candidate, &chosen) {
                    chosen.push(candidate);
                }
            }
        }
        None => warn!(
            term = current.term_number,
            "No election snapshot for previous term, falling back to initial miners"
        ),
    }

    for pubkey in reader.initial_miners() {
        if chosen.len() == count {
            break;
        }
        if eligible(pubkey, &chosen) {
            chosen.push(*pubkey);
        }
    }
    chosen
}

/// Replace `evil` miners in `round` with backup miners.
///
/// Each replacement takes over the evil miner's order, expected mining time
/// and extra block flag with fresh counters; the evil entry is removed and its
/// counters are folded into its history record, flagged evil. Evil miners for
/// which no replacement is available stay in the round.
pub fn replace_evil_miners<R: ChainStateReader + ?Sized>(
    round: &mut Round,
    evil: &[EvilMiner],
    reader: &R,
) -> ReplacementOutcome {
    let mut outcome = ReplacementOutcome::default();
    if evil.is_empty() {
        return outcome;
    }

    let candidates = select_replacements(evil.len(), round, reader);
    for (flagged, replacement) in evil.iter().zip(candidates.iter()) {
        let Some(evicted) = round.miners.remove(&flagged.pubkey) else {
            continue;
        };

        let mut record = reader
            .candidate_record(&flagged.pubkey)
            .cloned()
            .unwrap_or_else(|| CandidateRecord::new(flagged.pubkey));
        record.produced_blocks += evicted.produced_blocks;
        record.missed_time_slots += evicted.missed_time_slots;
        record.is_evil = true;
        outcome.history.push(record);

        let mut entry =
            MinerInRound::new(*replacement, evicted.order, evicted.expected_mining_time);
        entry.is_extra_block_producer = evicted.is_extra_block_producer;
        round.miners.insert(*replacement, entry);

        info!(
            evil = %flagged.pubkey,
            replacement = %replacement,
            reason = %flagged.reason,
            round = round.round_number,
            "Replaced evil miner"
        );
        outcome.replacements.push(MinerReplacement {
            evil: flagged.pubkey,
            replacement: *replacement,
            reason: flagged.reason,
        });
    }

    for flagged in evil.iter().skip(candidates.len()) {
        warn!(
            evil = %flagged.pubkey,
            reason = %flagged.reason,
            round = round.round_number,
            "No replacement available, evil miner stays in round"
        );
    }

    if !outcome.is_empty() {
        round.is_miner_list_just_changed = true;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_first_round_of_term;
    use dpos_types::{ElectionSnapshot, Timestamp};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn pk(b: u8) -> PublicKey {
        PublicKey([b; 32])
    }

    #[derive(Default)]
    struct Reader {
        initial: Vec<PublicKey>,
        snapshots: BTreeMap<u64, ElectionSnapshot>,
        records: BTreeMap<PublicKey, CandidateRecord>,
    }

    impl ChainStateReader for Reader {
        fn current_round_number(&self) -> Option<u64> {
            None
        }
        fn round(&self, _: u64) -> Option<&Round> {
            None
        }
        fn current_term_number(&self) -> Option<u64> {
            None
        }
        fn election_snapshot(&self, term_number: u64) -> Option<&ElectionSnapshot> {
            self.snapshots.get(&term_number)
        }
        fn blockchain_start_timestamp(&self) -> Option<Timestamp> {
            None
        }
        fn initial_miners(&self) -> &[PublicKey] {
            &self.initial
        }
        fn elected_miners(&self) -> Option<&[PublicKey]> {
            None
        }
        fn candidate_record(&self, pubkey: &PublicKey) -> Option<&CandidateRecord> {
            self.records.get(pubkey)
        }
    }

    fn round_of(keys: &[PublicKey], term: u64) -> Round {
        generate_first_round_of_term(keys, Duration::from_millis(4000), Timestamp(0), 5, term)
    }

    #[test]
    fn test_reveal_consistency() {
        let keys = [pk(0x30), pk(0x20), pk(0x10)];
        let mut previous = round_of(&keys, 1);
        let mut current = round_of(&keys, 1);

        let x = Hash::from_bytes(b"x");
        previous.miner_mut(&pk(0x30)).unwrap().out_value = Some(Hash::from_bytes(x.as_bytes()));
        current.miner_mut(&pk(0x30)).unwrap().published_previous_in_value = Some(x);
        assert!(!is_evil(&current, &previous, &pk(0x30)));

        current.miner_mut(&pk(0x30)).unwrap().published_previous_in_value =
            Some(Hash::from_bytes(b"y"));
        assert!(is_evil(&current, &previous, &pk(0x30)));
        assert_eq!(detect_inconsistent_reveals(&current, &previous), vec![pk(0x30)]);

        // A reconstructed value alone is not the miner's own claim.
        current.miner_mut(&pk(0x20)).unwrap().previous_in_value = Some(Hash::from_bytes(b"z"));
        assert!(!is_evil(&current, &previous, &pk(0x20)));
    }

    #[test]
    fn test_unavailable_detector_is_strict() {
        let keys = [pk(0x30), pk(0x20)];
        let mut round = round_of(&keys, 1);
        round.miner_mut(&pk(0x30)).unwrap().missed_time_slots = 10;
        round.miner_mut(&pk(0x20)).unwrap().missed_time_slots = 11;
        assert_eq!(detect_unavailable_miners(&round, 10), vec![pk(0x20)]);
    }

    #[test]
    fn test_detected_once_per_miner() {
        let keys = [pk(0x30), pk(0x20)];
        let previous = round_of(&keys, 1);
        let mut current = round_of(&keys, 1);
        let miner = current.miner_mut(&pk(0x30)).unwrap();
        miner.published_previous_in_value = Some(Hash::ZERO);
        miner.missed_time_slots = 100;

        let flagged = detect_evil_miners(&current, &previous, 5);
        assert_eq!(
            flagged,
            vec![EvilMiner {
                pubkey: pk(0x30),
                reason: EvilReason::InconsistentReveal
            }]
        );
    }

    #[test]
    fn test_selection_prefers_backup_candidates() {
        let keys = [pk(0x30), pk(0x20), pk(0x10)];
        let round = round_of(&keys, 2);

        let mut snapshot = ElectionSnapshot {
            term_number: 1,
            ..Default::default()
        };
        snapshot.election_result.insert(pk(0x30), 1_000); // current miner
        snapshot.election_result.insert(pk(0x40), 900); // initial miner
        snapshot.election_result.insert(pk(0x50), 500);
        snapshot.election_result.insert(pk(0x60), 700); // banned
        snapshot.election_result.insert(pk(0x70), 300);

        let mut reader = Reader {
            initial: vec![pk(0x30), pk(0x40)],
            ..Default::default()
        };
        reader.snapshots.insert(1, snapshot);
        reader.records.insert(
            pk(0x60),
            CandidateRecord {
                is_evil: true,
                ..CandidateRecord::new(pk(0x60))
            },
        );

        assert_eq!(select_replacements(2, &round, &reader), vec![pk(0x50), pk(0x70)]);
        assert_eq!(
            select_replacements(3, &round, &reader),
            vec![pk(0x50), pk(0x70), pk(0x40)]
        );
    }

    #[traced_test]
    #[test]
    fn test_replacement_takes_over_slot() {
        let keys = [pk(0x30), pk(0x20), pk(0x10)];
        let mut round = round_of(&keys, 1);
        {
            let evil = round.miner_mut(&pk(0x30)).unwrap();
            evil.produced_blocks = 12;
            evil.missed_time_slots = 3;
            evil.out_value = Some(Hash::ZERO);
        }
        let slot = {
            let evil = round.miner(&pk(0x30)).unwrap();
            (evil.order, evil.expected_mining_time, evil.is_extra_block_producer)
        };
        let mut reader = Reader {
            initial: vec![pk(0x30), pk(0x20), pk(0x10), pk(0x05)],
            ..Default::default()
        };
        reader.records.insert(
            pk(0x30),
            CandidateRecord {
                pubkey: pk(0x30),
                produced_blocks: 100,
                missed_time_slots: 1,
                is_evil: false,
            },
        );

        let evil = [EvilMiner {
            pubkey: pk(0x30),
            reason: EvilReason::InconsistentReveal,
        }];
        let before_id = round.round_id();
        let outcome = replace_evil_miners(&mut round, &evil, &reader);

        assert!(!round.contains(&pk(0x30)));
        let replacement = round.miner(&pk(0x05)).unwrap();
        assert_eq!(
            (replacement.order, replacement.expected_mining_time, replacement.is_extra_block_producer),
            slot
        );
        assert_eq!(replacement.produced_blocks, 0);
        assert_eq!(replacement.out_value, None);
        assert_eq!(round.round_id(), before_id);
        assert!(round.is_miner_list_just_changed);

        assert_eq!(
            outcome.history,
            vec![CandidateRecord {
                pubkey: pk(0x30),
                produced_blocks: 112,
                missed_time_slots: 4,
                is_evil: true,
            }]
        );
        assert!(logs_contain("Replaced evil miner"));
    }

    #[traced_test]
    #[test]
    fn test_evil_miner_without_replacement_stays() {
        let keys = [pk(0x30), pk(0x20)];
        let mut round = round_of(&keys, 1);
        round.is_miner_list_just_changed = false;
        let reader = Reader {
            initial: keys.to_vec(),
            ..Default::default()
        };
        let evil = [EvilMiner {
            pubkey: pk(0x20),
            reason: EvilReason::ExcessiveMissedTimeSlots,
        }];

        let outcome = replace_evil_miners(&mut round, &evil, &reader);
        assert!(outcome.is_empty());
        assert!(round.contains(&pk(0x20)));
        assert!(!round.is_miner_list_just_changed);
        assert!(logs_contain("No replacement available"));
    }
}
