//! Secret sharing of in values across the miners of a round.
//!
//! When a miner produces its slot it commits to `Hash(in_value)` and splits
//! `in_value` into one share per miner, each encrypted for its recipient.
//! During the following round every miner decrypts the shares addressed to it,
//! and once enough of them are published the original in value can be
//! recovered without the committing miner's cooperation.

use crate::ConsensusError;
use dpos_types::{
    decrypt_share, encrypt_share, Hash, KeyPair, PublicKey, Round, ThresholdSharing,
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Shares needed to reconstruct a secret split across `miner_count` miners:
/// `max(1, round(2N/3))`.
pub fn threshold_for(miner_count: usize) -> u32 {
    ((2 * miner_count + 1) / 3).max(1) as u32
}

/// What one round of sharing produced for the acting miner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretSharingOutcome {
    /// Ciphertexts of this miner's in value, keyed by recipient.
    pub encrypted_pieces: BTreeMap<PublicKey, Vec<u8>>,

    /// Shares this miner decrypted from the previous round, keyed by sender.
    pub decrypted_pieces: BTreeMap<PublicKey, Vec<u8>>,

    /// Previous in values recovered for other miners, keyed by miner.
    pub revealed_in_values: BTreeMap<PublicKey, Hash>,
}

/// Share the acting miner's `in_value`, decrypt the pieces it received last
/// round, and recover whatever previous in values now have enough shares.
///
/// Results are written into `current` and returned as well so they can be
/// published in the miner's update payload.
pub fn share_in_value(
    keypair: &KeyPair,
    in_value: &Hash,
    current: &mut Round,
    previous: Option<&Round>,
    sharing: &dyn ThresholdSharing,
) -> Result<SecretSharingOutcome, ConsensusError> {
    let pubkey = keypair.public_key();
    if !current.contains(&pubkey) {
        debug!(pubkey = %pubkey, round = current.round_number, "Not in round, skipping secret sharing");
        return Ok(SecretSharingOutcome::default());
    }

    let encrypted_pieces = encrypt_pieces(keypair, in_value, current, sharing)?;
    if let Some(miner) = current.miner_mut(&pubkey) {
        miner.encrypted_pieces = encrypted_pieces.clone();
    }

    let previous = previous.filter(|prev| {
        let same_term = prev.term_number == current.term_number;
        if !same_term {
            debug!(
                round = current.round_number,
                "Previous round belongs to another term, skipping decryption"
            );
        }
        same_term
    });
    let Some(previous) = previous else {
        return Ok(SecretSharingOutcome {
            encrypted_pieces,
            ..Default::default()
        });
    };

    let decrypted_pieces = decrypt_pieces(keypair, previous);
    if let Some(miner) = current.miner_mut(&pubkey) {
        miner
            .decrypted_pieces
            .extend(decrypted_pieces.iter().map(|(k, v)| (*k, v.clone())));
    }

    let revealed_in_values = reveal_shared_in_values(current, previous, sharing);

    Ok(SecretSharingOutcome {
        encrypted_pieces,
        decrypted_pieces,
        revealed_in_values,
    })
}

fn encrypt_pieces(
    keypair: &KeyPair,
    in_value: &Hash,
    current: &Round,
    sharing: &dyn ThresholdSharing,
) -> Result<BTreeMap<PublicKey, Vec<u8>>, ConsensusError> {
    let pubkey = keypair.public_key();
    let miner_count = current.miner_count();
    let threshold = threshold_for(miner_count);

    // Coefficients are derived from the miner's own signature so every
    // re-execution produces the same pieces.
    let seed = Hash::from_parts(&[
        b"secret-sharing".as_slice(),
        keypair.sign(in_value.as_bytes()).as_bytes(),
        &current.round_number.to_le_bytes(),
    ]);
    let mut rng = ChaCha20Rng::from_seed(seed.to_bytes());
    let shares = sharing.split(in_value.as_bytes(), threshold, miner_count as u32, &mut rng)?;

    let mut pieces = BTreeMap::new();
    for miner in current.miners_by_order() {
        if miner.pubkey == pubkey {
            continue;
        }
        let index = (miner.order as usize).checked_sub(1);
        let Some(share) = index.and_then(|i| shares.get(i)) else {
            return Err(ConsensusError::InvalidRound(format!(
                "order {} out of range in round {}",
                miner.order, current.round_number
            )));
        };
        let ciphertext = encrypt_share(keypair, &miner.pubkey, share)?;
        pieces.insert(miner.pubkey, ciphertext);
    }

    debug!(
        round = current.round_number,
        threshold,
        pieces = pieces.len(),
        "Encrypted in value shares"
    );
    Ok(pieces)
}

fn decrypt_pieces(keypair: &KeyPair, previous: &Round) -> BTreeMap<PublicKey, Vec<u8>> {
    let pubkey = keypair.public_key();
    let mut pieces = BTreeMap::new();
    for sender in previous.miners_by_order() {
        if sender.pubkey == pubkey {
            continue;
        }
        let Some(ciphertext) = sender.encrypted_pieces.get(&pubkey) else {
            continue;
        };
        match decrypt_share(keypair, &sender.pubkey, ciphertext) {
            Ok(plaintext) => {
                pieces.insert(sender.pubkey, plaintext);
            }
            Err(e) => {
                warn!(
                    sender = %sender.pubkey,
                    round = previous.round_number,
                    error = %e,
                    "Failed to decrypt share"
                );
            }
        }
    }
    pieces
}

/// Reconstruct previous in values for every sender of `previous` whose
/// decrypted shares, as published in `current`, reach the threshold.
///
/// A share decrypted by miner `M` was split at `M`'s order in `previous`, so
/// that order is its index. Recovered values are written onto the sender's
/// entry in `current`; a value that differs from one already recorded is
/// logged and replaced.
pub fn reveal_shared_in_values(
    current: &mut Round,
    previous: &Round,
    sharing: &dyn ThresholdSharing,
) -> BTreeMap<PublicKey, Hash> {
    let threshold = threshold_for(previous.miner_count());
    let mut revealed = BTreeMap::new();

    for sender in previous.miners_by_order() {
        if sender.out_value.is_none() {
            continue;
        }

        let mut indexed: Vec<(u32, &Vec<u8>)> = current
            .miners
            .values()
            .filter_map(|holder| {
                let piece = holder.decrypted_pieces.get(&sender.pubkey)?;
                let index = previous.miner(&holder.pubkey)?.order;
                Some((index, piece))
            })
            .collect();
        if indexed.len() < threshold as usize {
            continue;
        }
        indexed.sort_by_key(|(index, _)| *index);

        let indices: Vec<u32> = indexed.iter().map(|(index, _)| *index).collect();
        let shares: Vec<Vec<u8>> = indexed.iter().map(|(_, piece)| (*piece).clone()).collect();
        let recovered = match sharing.reconstruct(&shares, &indices, threshold) {
            Ok(bytes) => Hash::try_from_slice(&bytes),
            Err(e) => {
                warn!(sender = %sender.pubkey, error = %e, "Failed to reconstruct in value");
                continue;
            }
        };
        let Some(in_value) = recovered else {
            warn!(sender = %sender.pubkey, "Reconstructed in value has wrong length");
            continue;
        };

        let Some(entry) = current.miner_mut(&sender.pubkey) else {
            continue;
        };
        match entry.previous_in_value {
            Some(existing) if existing == in_value => continue,
            Some(existing) => warn!(
                miner = %sender.pubkey,
                recorded = %existing,
                reconstructed = %in_value,
                "Reconstructed in value differs from recorded value"
            ),
            None => debug!(miner = %sender.pubkey, "Revealed previous in value"),
        }
        entry.previous_in_value = Some(in_value);
        revealed.insert(sender.pubkey, in_value);
    }
    revealed
}
