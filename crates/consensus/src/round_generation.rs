//! Round generation.
//!
//! Computes the schedule of the next round from a completed round, and the
//! first round of a new term from a miner list.

use dpos_types::{MinerInRound, PublicKey, Round, Timestamp};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Build the first round of a term.
///
/// Miners are sorted by the first byte of their public key, descending, ties
/// broken by the full key ascending. Slot `i` (1-based) starts at
/// `start + i * interval`, and the order-1 miner produces the extra block.
pub fn generate_first_round_of_term(
    miners: &[PublicKey],
    mining_interval: Duration,
    start: Timestamp,
    round_number: u64,
    term_number: u64,
) -> Round {
    let mut sorted: Vec<PublicKey> = miners.to_vec();
    sorted.sort_by(|a, b| b.0[0].cmp(&a.0[0]).then(a.cmp(b)));
    sorted.dedup();

    let interval_ms = mining_interval.as_millis() as u64;
    let mut round = Round::new(round_number, term_number);
    for (i, pubkey) in sorted.iter().enumerate() {
        let order = i as u32 + 1;
        let mut miner = MinerInRound::new(
            *pubkey,
            order,
            start.add_millis(interval_ms * u64::from(order)),
        );
        miner.is_extra_block_producer = order == 1;
        round.miners.insert(*pubkey, miner);
    }
    round.is_miner_list_just_changed = true;

    debug!(
        round = round_number,
        term = term_number,
        miners = round.miner_count(),
        "Generated first round of term"
    );
    round
}

/// Generate the round that follows `current`.
///
/// Miners that produced their slot block keep their resolved
/// `final_order_of_next_round`; the others fill the remaining orders in their
/// current relative order and are charged one missed time slot.
/// `extra_block_producer_of_previous_round` is left unset; it names whoever
/// terminates `current` and is recorded by that miner.
pub fn generate_next_round(
    current: &Round,
    block_time: Timestamp,
    blockchain_start: Timestamp,
    default_interval: Duration,
) -> Round {
    let miner_count = current.miner_count() as u32;
    let interval_ms = current.mining_interval(default_interval).as_millis() as u64;
    let slot_time = |order: u32| block_time.add_millis(interval_ms * u64::from(order));

    let mut next = Round::new(current.round_number + 1, current.term_number);
    next.blockchain_age = if current.round_number == 1 {
        1
    } else {
        block_time.saturating_since(blockchain_start).as_secs()
    };

    let mined = current.mined_miners();
    let occupied: BTreeSet<u32> = mined.iter().map(|m| m.final_order_of_next_round).collect();
    for miner in &mined {
        let order = miner.final_order_of_next_round;
        let mut entry = MinerInRound::new(miner.pubkey, order, slot_time(order));
        entry.produced_blocks = miner.produced_blocks;
        entry.missed_time_slots = miner.missed_time_slots;
        next.miners.insert(miner.pubkey, entry);
    }

    let available = (1..=miner_count).filter(|o| !occupied.contains(o));
    for (order, miner) in available.zip(current.not_mined_miners()) {
        let mut entry = MinerInRound::new(miner.pubkey, order, slot_time(order));
        entry.produced_blocks = miner.produced_blocks;
        entry.missed_time_slots = miner.missed_time_slots + 1;
        next.miners.insert(miner.pubkey, entry);
    }

    let extra_block_order = next_extra_block_producer_order(current);
    let producer = next
        .miner_at_order(extra_block_order)
        .or_else(|| next.first_miner())
        .map(|m| m.pubkey);
    if let Some(pubkey) = producer {
        if let Some(miner) = next.miner_mut(&pubkey) {
            miner.is_extra_block_producer = true;
        }
    }

    break_continuous_mining(current, &mut next);

    next.confirmed_irreversible_block_height = current.confirmed_irreversible_block_height;
    next.confirmed_irreversible_block_round_number =
        current.confirmed_irreversible_block_round_number;

    debug!(
        round = next.round_number,
        mined = mined.len(),
        extra_block_order,
        "Generated next round"
    );
    next
}

/// Order of the next round's extra block producer.
///
/// Taken from the signature of the lowest-order miner that has one:
/// `|signature as i64| mod N + 1`. Defaults to 1 when nobody signed.
pub fn next_extra_block_producer_order(current: &Round) -> u32 {
    let miner_count = current.miner_count();
    if miner_count == 0 {
        return 1;
    }
    current
        .miners_by_order()
        .into_iter()
        .find_map(|m| m.signature)
        .map(|signature| order_from_signature(signature.to_i64(), miner_count))
        .unwrap_or(1)
}

/// `|value mod n| + 1`.
pub(crate) fn order_from_signature(value: i64, miner_count: usize) -> u32 {
    (value % miner_count as i64).unsigned_abs() as u32 + 1
}

/// Keep one miner from opening two consecutive slots.
///
/// If the next round's order-1 miner produced the current round's extra
/// block, it trades places with order 2. If the next round's last miner is
/// also the next round's extra block producer, it trades places with the
/// miner before it.
fn break_continuous_mining(current: &Round, next: &mut Round) {
    let miner_count = next.miner_count() as u32;
    if miner_count <= 1 {
        return;
    }

    let current_extra = current.extra_block_producer().map(|m| m.pubkey);
    if let Some(first) = next.first_miner().map(|m| m.pubkey) {
        if Some(first) == current_extra {
            if let Some(second) = next.miner_at_order(2).map(|m| m.pubkey) {
                debug!(round = next.round_number, "Swapping first two miners of next round");
                swap_slots(next, &first, &second);
            }
        }
    }

    let next_extra = next.extra_block_producer().map(|m| m.pubkey);
    if let Some(last) = next.miner_at_order(miner_count).map(|m| m.pubkey) {
        if Some(last) == next_extra {
            if let Some(before_last) = next.miner_at_order(miner_count - 1).map(|m| m.pubkey) {
                debug!(round = next.round_number, "Swapping last two miners of next round");
                swap_slots(next, &last, &before_last);
            }
        }
    }
}

fn swap_slots(round: &mut Round, a: &PublicKey, b: &PublicKey) {
    let (Some(slot_a), Some(slot_b)) = (
        round.miner(a).map(|m| (m.order, m.expected_mining_time)),
        round.miner(b).map(|m| (m.order, m.expected_mining_time)),
    ) else {
        return;
    };
    if let Some(miner) = round.miner_mut(a) {
        (miner.order, miner.expected_mining_time) = slot_b;
    }
    if let Some(miner) = round.miner_mut(b) {
        (miner.order, miner.expected_mining_time) = slot_a;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpos_types::Hash;

    fn pk(first: u8, rest: u8) -> PublicKey {
        let mut bytes = [rest; 32];
        bytes[0] = first;
        PublicKey(bytes)
    }

    fn signature_from(value: i64) -> Hash {
        let mut raw = [0u8; 32];
        raw[..8].copy_from_slice(&value.to_le_bytes());
        Hash::from_raw(raw)
    }

    #[test]
    fn test_first_round_of_term() {
        let miners = [pk(0x10, 1), pk(0xF0, 2), pk(0x80, 3)];
        let start = Timestamp::from_secs(1_000);
        let round =
            generate_first_round_of_term(&miners, Duration::from_millis(4000), start, 1, 1);

        assert_eq!(round.pubkeys_by_order(), vec![pk(0xF0, 2), pk(0x80, 3), pk(0x10, 1)]);
        for (i, miner) in round.miners_by_order().iter().enumerate() {
            assert_eq!(
                miner.expected_mining_time,
                start.add_millis(4000 * (i as u64 + 1))
            );
        }
        assert_eq!(round.extra_block_producer().unwrap().pubkey, pk(0xF0, 2));
        assert!(round.is_miner_list_just_changed);
    }

    #[test]
    fn test_first_round_tie_break_is_deterministic() {
        let a = [pk(0x42, 9), pk(0x42, 1), pk(0x42, 5)];
        let b = [pk(0x42, 5), pk(0x42, 9), pk(0x42, 1)];
        let start = Timestamp::from_secs(10);
        let ra = generate_first_round_of_term(&a, Duration::from_millis(4000), start, 1, 1);
        let rb = generate_first_round_of_term(&b, Duration::from_millis(4000), start, 1, 1);
        assert_eq!(ra, rb);
        assert_eq!(ra.first_miner().unwrap().pubkey, pk(0x42, 1));
    }

    /// Three miners a, b, c at orders 1, 2, 3 with a producing the extra
    /// block, all mined with the given final orders. a's signature picks the
    /// next extra block order.
    fn mined_round(finals: [u32; 3], extra_signature: i64) -> (Round, [PublicKey; 3]) {
        let keys = [pk(3, 0), pk(2, 0), pk(1, 0)];
        let mut round =
            generate_first_round_of_term(&keys, Duration::from_millis(4000), Timestamp(0), 2, 1);
        for (key, order) in keys.iter().zip(finals) {
            let miner = round.miner_mut(key).unwrap();
            miner.out_value = Some(Hash::ZERO);
            miner.signature = Some(signature_from(0));
            miner.supposed_order_of_next_round = order;
            miner.final_order_of_next_round = order;
        }
        round.miner_mut(&keys[0]).unwrap().signature = Some(signature_from(extra_signature));
        (round, keys)
    }

    fn slots(round: &Round) -> Vec<(PublicKey, u32, Timestamp, bool)> {
        round
            .miners_by_order()
            .into_iter()
            .map(|m| (m.pubkey, m.order, m.expected_mining_time, m.is_extra_block_producer))
            .collect()
    }

    #[test]
    fn test_extra_block_producer_does_not_open_next_round() {
        // Before breaking: a1, c2 (extra), b3. a also closed the current
        // round, so it trades places with c.
        let (round, [a, b, c]) = mined_round([1, 3, 2], 1);
        let block_time = Timestamp::from_secs(100);
        let next = generate_next_round(&round, block_time, Timestamp(0), Duration::from_millis(4000));

        assert_eq!(
            slots(&next),
            vec![
                (c, 1, block_time.add_millis(4000), true),
                (a, 2, block_time.add_millis(8000), false),
                (b, 3, block_time.add_millis(12000), false),
            ]
        );
        assert_eq!(next.extra_block_producer_of_previous_round, None);
    }

    #[test]
    fn test_extra_block_producer_does_not_close_next_round() {
        // Before breaking: b1, a2, c3 (extra). The extra block producer may
        // not hold the last slot, so it trades places with a.
        let (round, [a, b, c]) = mined_round([2, 1, 3], 2);
        let block_time = Timestamp::from_secs(100);
        let next = generate_next_round(&round, block_time, Timestamp(0), Duration::from_millis(4000));

        assert_eq!(
            slots(&next),
            vec![
                (b, 1, block_time.add_millis(4000), false),
                (c, 2, block_time.add_millis(8000), true),
                (a, 3, block_time.add_millis(12000), false),
            ]
        );
    }

    #[test]
    fn test_order_from_signature() {
        assert_eq!(order_from_signature(7, 3), 2);
        assert_eq!(order_from_signature(-7, 3), 2);
        assert_eq!(order_from_signature(i64::MIN, 5), 4);
        assert_eq!(order_from_signature(0, 1), 1);
    }

    #[test]
    fn test_extra_block_order_uses_lowest_signed_order() {
        let miners = [pk(3, 0), pk(2, 0), pk(1, 0)];
        let mut round =
            generate_first_round_of_term(&miners, Duration::from_millis(4000), Timestamp(0), 2, 1);
        assert_eq!(next_extra_block_producer_order(&round), 1);

        round.miner_mut(&pk(1, 0)).unwrap().signature = Some(signature_from(4));
        assert_eq!(next_extra_block_producer_order(&round), 2);

        round.miner_mut(&pk(2, 0)).unwrap().signature = Some(signature_from(6));
        assert_eq!(next_extra_block_producer_order(&round), 1);
    }
}
