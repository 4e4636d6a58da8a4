//! Per-node consensus state.
//!
//! [`ConsensusState`] ties the pieces of this crate together for one miner:
//! it decides behaviours, produces commands, and builds the consensus data a
//! block carries. It holds no chain state of its own; every call reads
//! persisted rounds through a [`ChainStateReader`] and returns new values for
//! the host to persist.

use crate::behaviour::decide_behaviour;
use crate::command::generate_command;
use crate::evil::{detect_evil_miners, replace_evil_miners, MinerReplacement, ReplacementOutcome};
use crate::irreversible;
use crate::round_generation::{generate_first_round_of_term, generate_next_round};
use crate::secret_sharing::share_in_value;
use crate::update::{
    apply_normal_consensus_data, apply_tiny_block, extract_update_value, record_block_production,
};
use crate::validation;
use crate::{ConsensusError, DposConfig};
use dpos_core::{ChainStateReader, ConsensusBehaviour, ConsensusCommand, ConsensusHint};
use dpos_types::{
    BlockHeight, CandidateRecord, Gf256Sharing, Hash, KeyPair, PublicKey, Round,
    ThresholdSharing, Timestamp, TinyBlockInput, UpdateValueInput,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Inputs the host supplies when asking for a block's consensus data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerInformation {
    /// In value to commit to. Derived from the signing key when absent.
    pub in_value: Option<Hash>,

    /// In value committed to in the previous round. Derived from the signing
    /// key when absent.
    pub previous_in_value: Option<Hash>,

    /// Height of the chain tip the block builds on.
    pub current_height: BlockHeight,
}

/// Consensus data produced for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusUpdate {
    /// The miner mined its time slot.
    UpdateValue {
        /// Current round with the miner's data applied.
        round: Round,
        /// Payload other nodes replay onto their copy.
        input: UpdateValueInput,
    },

    /// The miner produced a tiny block.
    TinyBlock {
        round: Round,
        input: TinyBlockInput,
    },

    /// The miner terminated the round.
    NextRound {
        /// The generated next round.
        round: Round,
        /// Evil miners swapped out before generation.
        replacements: Vec<MinerReplacement>,
        /// History records of the swapped-out miners.
        history: Vec<CandidateRecord>,
    },

    /// The miner terminated the term.
    NextTerm {
        /// First round of the new term.
        round: Round,
        /// Outgoing miners' history with this term's counters folded in.
        history: Vec<CandidateRecord>,
    },
}

impl ConsensusUpdate {
    /// The round the host should persist.
    pub fn round(&self) -> &Round {
        match self {
            ConsensusUpdate::UpdateValue { round, .. }
            | ConsensusUpdate::TinyBlock { round, .. }
            | ConsensusUpdate::NextRound { round, .. }
            | ConsensusUpdate::NextTerm { round, .. } => round,
        }
    }

    /// Behaviour this update was produced for.
    pub fn behaviour(&self) -> ConsensusBehaviour {
        match self {
            ConsensusUpdate::UpdateValue { input, .. } if input.previous_in_value.is_some() => {
                ConsensusBehaviour::UpdateValue
            }
            ConsensusUpdate::UpdateValue { .. } => {
                ConsensusBehaviour::UpdateValueWithoutPreviousInValue
            }
            ConsensusUpdate::TinyBlock { .. } => ConsensusBehaviour::TinyBlock,
            ConsensusUpdate::NextRound { .. } => ConsensusBehaviour::NextRound,
            ConsensusUpdate::NextTerm { .. } => ConsensusBehaviour::NextTerm,
        }
    }
}

/// Consensus logic bound to one miner's signing key.
pub struct ConsensusState {
    signing_key: KeyPair,
    config: DposConfig,
    sharing: Arc<dyn ThresholdSharing>,
}

impl std::fmt::Debug for ConsensusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusState")
            .field("pubkey", &self.signing_key.public_key())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConsensusState {
    /// Create a state using byte-wise Shamir sharing.
    pub fn new(signing_key: KeyPair, config: DposConfig) -> Self {
        Self::with_sharing(signing_key, config, Arc::new(Gf256Sharing))
    }

    /// Create a state with a custom threshold sharing scheme.
    pub fn with_sharing(
        signing_key: KeyPair,
        config: DposConfig,
        sharing: Arc<dyn ThresholdSharing>,
    ) -> Self {
        Self {
            signing_key,
            config,
            sharing,
        }
    }

    /// This miner's public key.
    pub fn pubkey(&self) -> PublicKey {
        self.signing_key.public_key()
    }

    /// Active configuration.
    pub fn config(&self) -> &DposConfig {
        &self.config
    }

    /// What this miner should do at `now`.
    pub fn behaviour<R: ChainStateReader + ?Sized>(
        &self,
        reader: &R,
        now: Timestamp,
    ) -> Result<ConsensusBehaviour, ConsensusError> {
        decide_behaviour(reader, &self.pubkey(), now, &self.config)
    }

    /// When and how this miner should mine next.
    pub fn consensus_command<R: ChainStateReader + ?Sized>(
        &self,
        reader: &R,
        now: Timestamp,
    ) -> Result<ConsensusCommand, ConsensusError> {
        let Some(current) = reader.current_round() else {
            let mut command = ConsensusCommand::invalid(now);
            command.hint = ConsensusHint {
                behaviour: ConsensusBehaviour::ChainNotInitialized,
                round_id: 0,
                previous_round_id: 0,
            }
            .encode()?;
            return Ok(command);
        };
        let behaviour = self.behaviour(reader, now)?;
        let previous_round_id = reader.previous_round().map(Round::round_id).unwrap_or(0);
        generate_command(
            behaviour,
            current,
            previous_round_id,
            &self.pubkey(),
            now,
            &self.config,
        )
    }

    /// Build the consensus data for a block produced at `now` under
    /// `behaviour`.
    pub fn generate_consensus_update<R: ChainStateReader + ?Sized>(
        &self,
        reader: &R,
        behaviour: ConsensusBehaviour,
        now: Timestamp,
        trigger: &TriggerInformation,
    ) -> Result<ConsensusUpdate, ConsensusError> {
        let current = current_round(reader)?;
        let previous = reader.previous_round();

        match behaviour {
            ConsensusBehaviour::UpdateValue
            | ConsensusBehaviour::UpdateValueWithoutPreviousInValue => {
                self.update_value(current, previous, behaviour, now, trigger)
            }
            ConsensusBehaviour::TinyBlock => {
                let mut round = current.clone();
                apply_tiny_block(&mut round, &self.pubkey(), now)?;
                let input = TinyBlockInput {
                    round_id: round.round_id(),
                    pubkey: self.pubkey(),
                    actual_mining_time: now,
                };
                Ok(ConsensusUpdate::TinyBlock { round, input })
            }
            ConsensusBehaviour::NextRound => self.next_round(reader, current, previous, now),
            ConsensusBehaviour::NextTerm => self.next_term(reader, current, now),
            ConsensusBehaviour::Nothing | ConsensusBehaviour::ChainNotInitialized => {
                Err(ConsensusError::InvalidRound(format!(
                    "no consensus data for behaviour {behaviour}"
                )))
            }
        }
    }

    fn update_value(
        &self,
        current: &Round,
        previous: Option<&Round>,
        behaviour: ConsensusBehaviour,
        now: Timestamp,
        trigger: &TriggerInformation,
    ) -> Result<ConsensusUpdate, ConsensusError> {
        let pubkey = self.pubkey();
        let mut round = current.clone();

        let in_value = trigger
            .in_value
            .unwrap_or_else(|| self.derive_in_value(current));
        let out_value = Hash::from_bytes(in_value.as_bytes());
        let previous_in_value = match (behaviour, previous) {
            (ConsensusBehaviour::UpdateValue, Some(previous)) => trigger
                .previous_in_value
                .or_else(|| self.derived_previous_in_value(previous)),
            _ => None,
        };
        let signature = previous
            .unwrap_or(current)
            .calculate_signature(&in_value);

        apply_normal_consensus_data(&mut round, &pubkey, previous_in_value, out_value, signature)?;
        record_block_production(&mut round, &pubkey, now, trigger.current_height)?;
        let shared = share_in_value(
            &self.signing_key,
            &in_value,
            &mut round,
            previous,
            self.sharing.as_ref(),
        )?;
        let input = extract_update_value(&round, &pubkey, shared.revealed_in_values)?;
        Ok(ConsensusUpdate::UpdateValue { round, input })
    }

    /// The in value this key derived for `previous`, if it matches the out
    /// value it committed to there.
    fn derived_previous_in_value(&self, previous: &Round) -> Option<Hash> {
        let committed = previous.miner(&self.pubkey())?.out_value?;
        let derived = self.derive_in_value(previous);
        if Hash::from_bytes(derived.as_bytes()) == committed {
            Some(derived)
        } else {
            warn!(
                round = previous.round_number,
                "Previous out value was not derived from this key, not revealing"
            );
            None
        }
    }

    fn next_round<R: ChainStateReader + ?Sized>(
        &self,
        reader: &R,
        current: &Round,
        previous: Option<&Round>,
        now: Timestamp,
    ) -> Result<ConsensusUpdate, ConsensusError> {
        let blockchain_start = reader
            .blockchain_start_timestamp()
            .ok_or(ConsensusError::MissingBlockchainStartTimestamp)?;

        let mut base = current.clone();
        let ReplacementOutcome {
            replacements,
            history,
        } = match previous {
            Some(previous) => {
                let evil =
                    detect_evil_miners(current, previous, self.config.tolerable_missed_time_slots);
                replace_evil_miners(&mut base, &evil, reader)
            }
            None => ReplacementOutcome::default(),
        };

        let mut next = generate_next_round(&base, now, blockchain_start, self.config.mining_interval);
        if !replacements.is_empty() {
            next.is_miner_list_just_changed = true;
            for replacement in &replacements {
                if let Some(miner) = next.miner_mut(&replacement.replacement) {
                    miner.missed_time_slots = 0;
                }
            }
        }
        self.record_termination(&mut next, now);

        info!(
            round = next.round_number,
            term = next.term_number,
            miners = next.miner_count(),
            replaced = replacements.len(),
            "Generated next round"
        );
        Ok(ConsensusUpdate::NextRound {
            round: next,
            replacements,
            history,
        })
    }

    fn next_term<R: ChainStateReader + ?Sized>(
        &self,
        reader: &R,
        current: &Round,
        now: Timestamp,
    ) -> Result<ConsensusUpdate, ConsensusError> {
        let term_number = reader
            .current_term_number()
            .ok_or(ConsensusError::MissingTermNumber)?;
        let blockchain_start = reader
            .blockchain_start_timestamp()
            .ok_or(ConsensusError::MissingBlockchainStartTimestamp)?;

        let miners = match reader.elected_miners() {
            Some(elected) if !elected.is_empty() => elected.to_vec(),
            _ => {
                warn!(
                    term = term_number + 1,
                    "No election result, keeping current miners for next term"
                );
                current.pubkeys_by_order()
            }
        };

        let mut next = generate_first_round_of_term(
            &miners,
            self.config.mining_interval,
            now,
            current.round_number + 1,
            term_number + 1,
        );
        next.blockchain_age = now.saturating_since(blockchain_start).as_secs();
        next.confirmed_irreversible_block_height = current.confirmed_irreversible_block_height;
        next.confirmed_irreversible_block_round_number =
            current.confirmed_irreversible_block_round_number;
        self.record_termination(&mut next, now);

        let history = current
            .miners_by_order()
            .into_iter()
            .map(|miner| {
                let mut record = reader
                    .candidate_record(&miner.pubkey)
                    .cloned()
                    .unwrap_or_else(|| CandidateRecord::new(miner.pubkey));
                record.produced_blocks += miner.produced_blocks;
                record.missed_time_slots += miner.missed_time_slots;
                record
            })
            .collect();

        info!(
            round = next.round_number,
            term = next.term_number,
            miners = next.miner_count(),
            "Generated first round of new term"
        );
        Ok(ConsensusUpdate::NextTerm {
            round: next,
            history,
        })
    }

    /// The terminating block counts as this miner's production in the new
    /// round.
    fn record_termination(&self, next: &mut Round, now: Timestamp) {
        let pubkey = self.pubkey();
        next.extra_block_producer_of_previous_round = Some(pubkey);
        if let Some(miner) = next.miner_mut(&pubkey) {
            miner.produced_blocks += 1;
            miner.actual_mining_times.push(now);
        }
    }

    /// Irreversibility offset for the current chain state.
    pub fn calculate_lib<R: ChainStateReader + ?Sized>(
        &self,
        reader: &R,
    ) -> Result<Option<u64>, ConsensusError> {
        let current = current_round(reader)?;
        Ok(irreversible::calculate_lib_offset(current, reader.previous_round()))
    }

    /// Irreversible height implied by the current round's producers.
    pub fn calculate_lib_height<R: ChainStateReader + ?Sized>(
        &self,
        reader: &R,
    ) -> Result<BlockHeight, ConsensusError> {
        let current = current_round(reader)?;
        let Some(previous) = reader.previous_round() else {
            warn!(round = current.round_number, "Previous round unavailable");
            return Ok(BlockHeight::GENESIS);
        };
        Ok(irreversible::calculate_lib_height(current, previous))
    }

    /// Validate a round `sender` proposed under `behaviour`.
    pub fn validate_before_execution<R: ChainStateReader + ?Sized>(
        &self,
        reader: &R,
        sender: &PublicKey,
        behaviour: ConsensusBehaviour,
        provided: &Round,
    ) -> Result<(), ConsensusError> {
        validation::validate_before_execution(
            reader,
            sender,
            behaviour,
            provided,
            self.config.mining_interval,
        )
    }

    /// Deterministic in value for `round`: `Hash(sign(round_id || round_number))`.
    pub fn derive_in_value(&self, round: &Round) -> Hash {
        let mut message = Vec::with_capacity(16);
        message.extend_from_slice(&round.round_id().to_le_bytes());
        message.extend_from_slice(&round.round_number.to_le_bytes());
        Hash::from_bytes(self.signing_key.sign(&message).as_bytes())
    }
}

fn current_round<R: ChainStateReader + ?Sized>(reader: &R) -> Result<&Round, ConsensusError> {
    let number = reader
        .current_round_number()
        .ok_or(ConsensusError::ChainNotInitialized)?;
    reader.round(number).ok_or(ConsensusError::MissingRound(number))
}
