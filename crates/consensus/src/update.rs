//! Recording block production in the current round.
//!
//! The producing node applies its own data with
//! [`apply_normal_consensus_data`] and publishes an [`UpdateValueInput`];
//! every other node replays that payload with [`apply_update_value`].

use crate::round_generation::order_from_signature;
use crate::ConsensusError;
use dpos_types::{
    BlockHeight, Hash, PublicKey, Round, Timestamp, TinyBlockInput, UpdateValueInput,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Record a miner's out value, signature and revealed previous in value, and
/// derive its next-round order.
///
/// `supposed = |signature as i64| mod N + 1`. Any other miner already holding
/// `supposed` as its final next-round order is moved to the first free order
/// found by probing forward from `supposed + 1`, wrapping around after `N`.
/// Conflicting miners are processed in ascending order of their current
/// `order`, so every node resolves the same conflicts the same way.
pub fn apply_normal_consensus_data(
    round: &mut Round,
    pubkey: &PublicKey,
    previous_in_value: Option<Hash>,
    out_value: Hash,
    signature: Hash,
) -> Result<u32, ConsensusError> {
    let round_number = round.round_number;
    let miner_count = round.miner_count();
    let miner = round
        .miner_mut(pubkey)
        .ok_or_else(|| ConsensusError::not_in_round(pubkey, round_number))?;

    match miner.out_value {
        Some(existing) if existing != out_value => {
            return Err(ConsensusError::InvalidRound(format!(
                "out value of {pubkey} already published in round {round_number}"
            )));
        }
        _ => miner.out_value = Some(out_value),
    }
    miner.signature = Some(signature);
    if let Some(revealed) = previous_in_value {
        miner.previous_in_value = Some(revealed);
        miner.published_previous_in_value = Some(revealed);
    }
    // The producer's own claim is released until conflicts are resolved.
    miner.final_order_of_next_round = 0;

    let supposed = order_from_signature(signature.to_i64(), miner_count);
    resolve_order_conflicts(round, pubkey, supposed);

    if let Some(miner) = round.miner_mut(pubkey) {
        miner.supposed_order_of_next_round = supposed;
        miner.final_order_of_next_round = supposed;
    }
    Ok(supposed)
}

fn resolve_order_conflicts(round: &mut Round, pubkey: &PublicKey, supposed: u32) {
    let miner_count = round.miner_count() as u32;
    let conflicting: Vec<PublicKey> = round
        .miners_by_order()
        .into_iter()
        .filter(|m| m.pubkey != *pubkey && m.final_order_of_next_round == supposed)
        .map(|m| m.pubkey)
        .collect();

    for other in conflicting {
        let claimed = round.claimed_next_orders();
        let free = (1..miner_count)
            .map(|step| (supposed - 1 + step) % miner_count + 1)
            .find(|candidate| !claimed.contains(candidate));

        match free {
            Some(order) => {
                debug!(
                    miner = %other,
                    from = supposed,
                    to = order,
                    "Resolved next-round order conflict"
                );
                if let Some(miner) = round.miner_mut(&other) {
                    miner.final_order_of_next_round = order;
                }
            }
            None => warn!(miner = %other, order = supposed, "No free next-round order"),
        }
    }
}

/// Record a block a miner produced in its time slot.
pub fn record_block_production(
    round: &mut Round,
    pubkey: &PublicKey,
    mining_time: Timestamp,
    implied_irreversible_height: BlockHeight,
) -> Result<(), ConsensusError> {
    let round_number = round.round_number;
    let miner = round
        .miner_mut(pubkey)
        .ok_or_else(|| ConsensusError::not_in_round(pubkey, round_number))?;
    miner.actual_mining_times.push(mining_time);
    miner.produced_blocks += 1;
    miner.implied_irreversible_block_height = implied_irreversible_height;
    Ok(())
}

/// Record a tiny block produced inside an already-mined slot.
pub fn apply_tiny_block(
    round: &mut Round,
    pubkey: &PublicKey,
    mining_time: Timestamp,
) -> Result<(), ConsensusError> {
    let round_number = round.round_number;
    let miner = round
        .miner_mut(pubkey)
        .ok_or_else(|| ConsensusError::not_in_round(pubkey, round_number))?;
    miner.actual_mining_times.push(mining_time);
    miner.produced_blocks += 1;
    miner.produced_tiny_blocks += 1;
    Ok(())
}

/// Build the payload a miner publishes after updating its entry.
pub fn extract_update_value(
    round: &Round,
    pubkey: &PublicKey,
    miners_previous_in_values: BTreeMap<PublicKey, Hash>,
) -> Result<UpdateValueInput, ConsensusError> {
    let miner = round
        .miner(pubkey)
        .ok_or_else(|| ConsensusError::not_in_round(pubkey, round.round_number))?;
    let (Some(out_value), Some(signature)) = (miner.out_value, miner.signature) else {
        return Err(ConsensusError::InvalidRound(format!(
            "{pubkey} has not published an out value in round {}",
            round.round_number
        )));
    };
    let actual_mining_time = miner.latest_mining_time().ok_or_else(|| {
        ConsensusError::InvalidRound(format!("{pubkey} has no actual mining time"))
    })?;

    let tune_order_information = round
        .miners
        .values()
        .filter(|m| m.final_order_of_next_round != 0)
        .map(|m| (m.pubkey, m.final_order_of_next_round))
        .collect();

    Ok(UpdateValueInput {
        round_id: round.round_id(),
        pubkey: *pubkey,
        out_value,
        signature,
        previous_in_value: miner.published_previous_in_value,
        actual_mining_time,
        supposed_order_of_next_round: miner.supposed_order_of_next_round,
        tune_order_information,
        encrypted_pieces: miner.encrypted_pieces.clone(),
        decrypted_pieces: miner.decrypted_pieces.clone(),
        miners_previous_in_values,
        implied_irreversible_block_height: miner.implied_irreversible_block_height,
    })
}

/// Replay another miner's published update onto the local current round.
pub fn apply_update_value(round: &mut Round, input: &UpdateValueInput) -> Result<(), ConsensusError> {
    let expected = round.round_id();
    if input.round_id != expected {
        return Err(ConsensusError::RoundIdMismatch {
            expected,
            actual: input.round_id,
        });
    }
    let round_number = round.round_number;
    let miner = round
        .miner_mut(&input.pubkey)
        .ok_or_else(|| ConsensusError::not_in_round(&input.pubkey, round_number))?;

    if matches!(miner.out_value, Some(existing) if existing != input.out_value) {
        return Err(ConsensusError::InvalidRound(format!(
            "out value of {} already published in round {round_number}",
            input.pubkey
        )));
    }
    miner.out_value = Some(input.out_value);
    miner.signature = Some(input.signature);
    if let Some(revealed) = input.previous_in_value {
        miner.previous_in_value = Some(revealed);
        miner.published_previous_in_value = Some(revealed);
    }
    miner.actual_mining_times.push(input.actual_mining_time);
    miner.produced_blocks += 1;
    miner.supposed_order_of_next_round = input.supposed_order_of_next_round;
    miner.encrypted_pieces = input.encrypted_pieces.clone();
    miner.decrypted_pieces = input.decrypted_pieces.clone();
    miner.implied_irreversible_block_height = input.implied_irreversible_block_height;

    for (pubkey, order) in &input.tune_order_information {
        if let Some(miner) = round.miner_mut(pubkey) {
            miner.final_order_of_next_round = *order;
        }
    }
    for (pubkey, in_value) in &input.miners_previous_in_values {
        if let Some(miner) = round.miner_mut(pubkey) {
            miner.previous_in_value = Some(*in_value);
        }
    }
    Ok(())
}

/// Replay another miner's tiny block onto the local current round.
pub fn apply_tiny_block_input(round: &mut Round, input: &TinyBlockInput) -> Result<(), ConsensusError> {
    let expected = round.round_id();
    if input.round_id != expected {
        return Err(ConsensusError::RoundIdMismatch {
            expected,
            actual: input.round_id,
        });
    }
    apply_tiny_block(round, &input.pubkey, input.actual_mining_time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_first_round_of_term;
    use std::time::Duration;

    fn keys(n: u8) -> Vec<PublicKey> {
        (0..n).map(|i| PublicKey([0xF0 - i * 0x10; 32])).collect()
    }

    fn round_of(n: u8) -> Round {
        generate_first_round_of_term(&keys(n), Duration::from_millis(4000), Timestamp(0), 2, 1)
    }

    fn signature_from(value: i64) -> Hash {
        let mut raw = [0u8; 32];
        raw[..8].copy_from_slice(&value.to_le_bytes());
        Hash::from_raw(raw)
    }

    #[test]
    fn test_supposed_order_without_conflict() {
        let mut round = round_of(3);
        let miner = keys(3)[1];
        let supposed = apply_normal_consensus_data(
            &mut round,
            &miner,
            None,
            Hash::from_bytes(b"out"),
            signature_from(7),
        )
        .unwrap();

        assert_eq!(supposed, 2);
        let entry = round.miner(&miner).unwrap();
        assert_eq!(entry.supposed_order_of_next_round, 2);
        assert_eq!(entry.final_order_of_next_round, 2);
        assert_eq!(entry.out_value, Some(Hash::from_bytes(b"out")));
    }

    #[test]
    fn test_conflict_moves_earlier_claimant_forward() {
        let mut round = round_of(5);
        let k = keys(5);
        let (a, b) = (k[0], k[1]);

        // 6 mod 5 + 1 = 2 and 11 mod 5 + 1 = 2.
        apply_normal_consensus_data(&mut round, &a, None, Hash::from_bytes(b"a"), signature_from(6))
            .unwrap();
        apply_normal_consensus_data(&mut round, &b, None, Hash::from_bytes(b"b"), signature_from(11))
            .unwrap();

        assert_eq!(round.miner(&b).unwrap().final_order_of_next_round, 2);
        assert_eq!(round.miner(&a).unwrap().final_order_of_next_round, 3);
        assert_eq!(round.miner(&a).unwrap().supposed_order_of_next_round, 2);
    }

    #[test]
    fn test_conflict_search_wraps_around() {
        let mut round = round_of(3);
        let k = keys(3);
        // Orders: k0 -> 3, k1 -> 1, then k2 also wants 3.
        apply_normal_consensus_data(&mut round, &k[0], None, Hash::from_bytes(b"0"), signature_from(2))
            .unwrap();
        apply_normal_consensus_data(&mut round, &k[1], None, Hash::from_bytes(b"1"), signature_from(3))
            .unwrap();
        apply_normal_consensus_data(&mut round, &k[2], None, Hash::from_bytes(b"2"), signature_from(5))
            .unwrap();

        assert_eq!(round.miner(&k[2]).unwrap().final_order_of_next_round, 3);
        assert_eq!(round.miner(&k[1]).unwrap().final_order_of_next_round, 1);
        assert_eq!(round.miner(&k[0]).unwrap().final_order_of_next_round, 2);
        assert_eq!(
            round.claimed_next_orders(),
            (1..=3).collect::<std::collections::BTreeSet<u32>>()
        );
    }

    #[test]
    fn test_own_reveal_is_kept_apart_from_reconstruction() {
        let mut round = round_of(3);
        let miner = keys(3)[0];
        let reconstructed = Hash::from_bytes(b"reconstructed");
        let claimed = Hash::from_bytes(b"claimed");
        round.miner_mut(&miner).unwrap().previous_in_value = Some(reconstructed);

        apply_normal_consensus_data(
            &mut round,
            &miner,
            Some(claimed),
            Hash::from_bytes(b"out"),
            signature_from(1),
        )
        .unwrap();
        let entry = round.miner(&miner).unwrap();
        assert_eq!(entry.previous_in_value, Some(claimed));
        assert_eq!(entry.published_previous_in_value, Some(claimed));

        // A later reconstruction only touches the shared field.
        round.miner_mut(&miner).unwrap().previous_in_value = Some(reconstructed);
        round.miner_mut(&miner).unwrap().actual_mining_times.push(Timestamp(1));
        let input = extract_update_value(&round, &miner, BTreeMap::new()).unwrap();
        assert_eq!(input.previous_in_value, Some(claimed));
    }

    #[test]
    fn test_out_value_is_write_once() {
        let mut round = round_of(3);
        let miner = keys(3)[0];
        apply_normal_consensus_data(&mut round, &miner, None, Hash::from_bytes(b"x"), signature_from(1))
            .unwrap();
        let result = apply_normal_consensus_data(
            &mut round,
            &miner,
            None,
            Hash::from_bytes(b"y"),
            signature_from(1),
        );
        assert!(matches!(result, Err(ConsensusError::InvalidRound(_))));
        assert_eq!(round.miner(&miner).unwrap().out_value, Some(Hash::from_bytes(b"x")));
    }

    #[test]
    fn test_unknown_miner_is_hard_error() {
        let mut round = round_of(3);
        let stranger = PublicKey([1; 32]);
        let result = apply_normal_consensus_data(
            &mut round,
            &stranger,
            None,
            Hash::ZERO,
            Hash::ZERO,
        );
        assert!(matches!(result, Err(ConsensusError::MinerNotInRound { .. })));
    }

    #[test]
    fn test_update_value_replay_matches_producer() {
        let producer_round = {
            let mut round = round_of(4);
            let miner = keys(4)[2];
            apply_normal_consensus_data(
                &mut round,
                &miner,
                Some(Hash::from_bytes(b"prev")),
                Hash::from_bytes(b"out"),
                signature_from(9),
            )
            .unwrap();
            record_block_production(&mut round, &miner, Timestamp(12_000), BlockHeight(40)).unwrap();
            round
        };
        let input = extract_update_value(&producer_round, &keys(4)[2], BTreeMap::new()).unwrap();

        let mut replica = round_of(4);
        apply_update_value(&mut replica, &input).unwrap();
        assert_eq!(replica, producer_round);
    }

    #[test]
    fn test_update_value_with_stale_round_id_rejected() {
        let mut round = round_of(3);
        let miner = keys(3)[0];
        apply_normal_consensus_data(&mut round, &miner, None, Hash::from_bytes(b"o"), signature_from(1))
            .unwrap();
        record_block_production(&mut round, &miner, Timestamp(4000), BlockHeight(1)).unwrap();
        let mut input = extract_update_value(&round, &miner, BTreeMap::new()).unwrap();
        input.round_id += 1;

        let mut replica = round_of(3);
        assert!(matches!(
            apply_update_value(&mut replica, &input),
            Err(ConsensusError::RoundIdMismatch { .. })
        ));
    }

    #[test]
    fn test_tiny_block_counters() {
        let mut round = round_of(3);
        let miner = keys(3)[1];
        let input = TinyBlockInput {
            round_id: round.round_id(),
            pubkey: miner,
            actual_mining_time: Timestamp(9000),
        };
        apply_tiny_block_input(&mut round, &input).unwrap();

        let entry = round.miner(&miner).unwrap();
        assert_eq!(entry.produced_tiny_blocks, 1);
        assert_eq!(entry.produced_blocks, 1);
        assert_eq!(entry.actual_mining_times, vec![Timestamp(9000)]);
    }
}
