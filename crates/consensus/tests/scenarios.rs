//! Worked examples of round scheduling, finality, sharing and eviction.

use dpos_consensus::{
    apply_normal_consensus_data, calculate_lib_offset, detect_evil_miners,
    generate_first_round_of_term, ConsensusState, ConsensusUpdate, DposConfig, EvilReason,
    TriggerInformation,
};
use dpos_core::{ChainStateReader, ConsensusBehaviour};
use dpos_test_helpers::{build_round, keypair, keypairs, mark_mined, pubkeys, TestChain};
use dpos_types::{Gf256Sharing, Hash, ThresholdSharing, Timestamp};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing_test::traced_test;

const INTERVAL: Duration = Duration::from_millis(4000);

#[test]
fn first_round_of_term_with_three_miners() {
    let miners = pubkeys(&keypairs(3));
    let start = Timestamp::from_secs(1_700_000_000);
    let round = generate_first_round_of_term(&miners, INTERVAL, start, 1, 1);

    let ordered = round.miners_by_order();
    assert_eq!(
        ordered.iter().map(|m| m.order).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    for miner in &ordered {
        assert_eq!(
            miner.expected_mining_time,
            start.add_millis(4000 * u64::from(miner.order))
        );
        assert_eq!(miner.is_extra_block_producer, miner.order == 1);
    }

    // Same input in a different order gives the same schedule.
    let mut shuffled = miners.clone();
    shuffled.rotate_left(1);
    assert_eq!(
        generate_first_round_of_term(&shuffled, INTERVAL, start, 1, 1),
        round
    );
}

#[test]
fn supposed_order_from_signature_without_conflict() {
    let miners = pubkeys(&keypairs(3));
    let mut round = build_round(&miners, 2, 1, Timestamp::EPOCH, INTERVAL);

    let supposed = apply_normal_consensus_data(
        &mut round,
        &miners[1],
        None,
        Hash::from_bytes(b"out"),
        Hash::with_i64_prefix(7),
    )
    .unwrap();

    assert_eq!(supposed, 2);
    let miner = round.miner(&miners[1]).unwrap();
    assert_eq!(miner.supposed_order_of_next_round, 2);
    assert_eq!(miner.final_order_of_next_round, 2);
}

#[test]
fn conflicting_supposed_orders_are_resolved() {
    let miners = pubkeys(&keypairs(5));
    let mut round = build_round(&miners, 2, 1, Timestamp::EPOCH, INTERVAL);

    // 6 mod 5 + 1 = 2 and 16 mod 5 + 1 = 2.
    apply_normal_consensus_data(&mut round, &miners[0], None, Hash::ZERO, Hash::with_i64_prefix(6))
        .unwrap();
    apply_normal_consensus_data(&mut round, &miners[3], None, Hash::ZERO, Hash::with_i64_prefix(16))
        .unwrap();

    assert_eq!(round.miner(&miners[3]).unwrap().final_order_of_next_round, 2);
    assert_eq!(round.miner(&miners[0]).unwrap().final_order_of_next_round, 3);

    let finals: Vec<u32> = round
        .mined_miners()
        .iter()
        .map(|m| m.final_order_of_next_round)
        .collect();
    let unique: BTreeSet<u32> = finals.iter().copied().collect();
    assert_eq!(unique.len(), finals.len());
}

#[test]
fn lib_offset_with_exact_consent() {
    let miners = pubkeys(&keypairs(7));
    let mut round = build_round(&miners, 5, 1, Timestamp::EPOCH, INTERVAL);
    for (i, pubkey) in miners.iter().take(5).enumerate() {
        mark_mined(&mut round, pubkey, &Hash::from_bytes(&[i as u8]), Hash::ZERO, i as u32 + 1);
    }

    assert_eq!(round.minimum_consent_count(), 5);
    assert_eq!(calculate_lib_offset(&round, None), Some(5));

    let single = build_round(&miners[..1], 5, 1, Timestamp::EPOCH, INTERVAL);
    assert_eq!(calculate_lib_offset(&single, None), Some(1));
}

#[test]
fn two_of_three_sharing() {
    let scheme = Gf256Sharing;
    let mut rng = ChaCha20Rng::seed_from_u64(2024);
    let shares = scheme.split(b"abc", 2, 3, &mut rng).unwrap();

    for pair in [[1u32, 2], [1, 3], [2, 3]] {
        let picked: Vec<Vec<u8>> = pair.iter().map(|&i| shares[i as usize - 1].clone()).collect();
        assert_eq!(scheme.reconstruct(&picked, &pair, 2).unwrap(), b"abc");
    }
    for i in 1..=3u32 {
        let single = vec![shares[i as usize - 1].clone()];
        assert!(scheme.reconstruct(&single, &[i], 2).is_err());
    }
}

#[traced_test]
#[test]
fn inconsistent_reveal_gets_miner_replaced() {
    let pairs = keypairs(4);
    let keys = pubkeys(&pairs);
    let (active, spare) = (&keys[..3], keys[3]);
    let evil = active[0];
    let start = Timestamp::from_secs(1_000);

    let x = Hash::from_bytes(b"X");
    let y = Hash::from_bytes(b"Y");

    let mut previous = build_round(active, 1, 1, start, INTERVAL);
    mark_mined(&mut previous, &evil, &x, Hash::with_i64_prefix(3), 1);

    let mut current = build_round(active, 2, 1, start.add_millis(16_000), INTERVAL);
    mark_mined(&mut current, &evil, &Hash::from_bytes(b"next"), Hash::with_i64_prefix(4), 2);
    current.miner_mut(&evil).unwrap().published_previous_in_value = Some(y);

    let flagged = detect_evil_miners(&current, &previous, 100);
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].pubkey, evil);
    assert_eq!(flagged[0].reason, EvilReason::InconsistentReveal);

    let mut chain = TestChain::new(keys.clone(), start);
    chain.push_round(previous);
    chain.push_round(current);

    let terminator = ConsensusState::new(keypair(2), DposConfig::default());
    assert_eq!(terminator.pubkey(), active[1]);
    let update = terminator
        .generate_consensus_update(
            &chain,
            ConsensusBehaviour::NextRound,
            Timestamp::from_secs(1_032),
            &TriggerInformation::default(),
        )
        .unwrap();

    let ConsensusUpdate::NextRound {
        round,
        replacements,
        history,
    } = update
    else {
        panic!("expected a next round update");
    };
    assert!(!round.contains(&evil));
    assert!(round.contains(&spare));
    assert!(round.is_miner_list_just_changed);
    assert_eq!(replacements.len(), 1);
    assert_eq!(replacements[0].replacement, spare);
    assert_eq!(history.len(), 1);
    assert!(history[0].is_evil);
    assert_eq!(round.miner(&spare).unwrap().missed_time_slots, 0);

    let orders: BTreeSet<u32> = round.miners.values().map(|m| m.order).collect();
    assert_eq!(orders, (1..=3).collect::<BTreeSet<u32>>());

    // The evicted key is banned once its record is stored.
    chain.record_history(history);
    assert!(chain.is_banned(&evil));
}
