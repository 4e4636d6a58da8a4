//! Per-miner payloads published when a miner produces a block.
//!
//! The producing node fills these from its locally updated round; every other
//! node replays them onto its own copy of the current round.

use crate::{BlockHeight, Hash, PublicKey, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything a miner publishes when it mines its time slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateValueInput {
    /// Round id of the round being updated.
    pub round_id: u64,

    /// Producing miner.
    pub pubkey: PublicKey,

    /// Commitment for this round.
    pub out_value: Hash,

    /// Signature seed for next-round ordering.
    pub signature: Hash,

    /// Revealed preimage of the previous round's out value.
    pub previous_in_value: Option<Hash>,

    /// Time the block was produced.
    pub actual_mining_time: Timestamp,

    /// Order derived from `signature`.
    pub supposed_order_of_next_round: u32,

    /// Final next-round orders of every miner after conflict resolution.
    pub tune_order_information: BTreeMap<PublicKey, u32>,

    /// Shares of the producer's in value, keyed by recipient.
    pub encrypted_pieces: BTreeMap<PublicKey, Vec<u8>>,

    /// Shares the producer decrypted, keyed by original sender.
    pub decrypted_pieces: BTreeMap<PublicKey, Vec<u8>>,

    /// Previous in values of other miners recovered by reconstruction.
    pub miners_previous_in_values: BTreeMap<PublicKey, Hash>,

    /// Chain height the producer observed.
    pub implied_irreversible_block_height: BlockHeight,
}

/// Payload of a tiny block (an extra block inside an existing slot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TinyBlockInput {
    /// Round id of the round being updated.
    pub round_id: u64,

    /// Producing miner.
    pub pubkey: PublicKey,

    /// Time the block was produced.
    pub actual_mining_time: Timestamp,
}
