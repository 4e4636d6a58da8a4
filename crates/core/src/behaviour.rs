//! Consensus behaviours and the hint passed along with a command.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The consensus action a miner should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsensusBehaviour {
    /// Not a miner of the current round, or nothing to do.
    Nothing,

    /// No round has been persisted yet.
    ChainNotInitialized,

    /// Mine the time slot without revealing a previous in value
    /// (first round of a term, or no previous round).
    UpdateValueWithoutPreviousInValue,

    /// Mine the time slot and reveal the previous in value.
    UpdateValue,

    /// Produce an extra block inside an already-mined time slot.
    TinyBlock,

    /// Terminate the current round.
    NextRound,

    /// Terminate the current term.
    NextTerm,
}

impl ConsensusBehaviour {
    /// Whether this behaviour mines a regular time slot.
    pub fn is_update_value(self) -> bool {
        matches!(
            self,
            ConsensusBehaviour::UpdateValue | ConsensusBehaviour::UpdateValueWithoutPreviousInValue
        )
    }

    /// Whether this behaviour ends the current round.
    pub fn terminates_round(self) -> bool {
        matches!(
            self,
            ConsensusBehaviour::NextRound | ConsensusBehaviour::NextTerm
        )
    }
}

impl fmt::Display for ConsensusBehaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsensusBehaviour::Nothing => "Nothing",
            ConsensusBehaviour::ChainNotInitialized => "ChainNotInitialized",
            ConsensusBehaviour::UpdateValueWithoutPreviousInValue => {
                "UpdateValueWithoutPreviousInValue"
            }
            ConsensusBehaviour::UpdateValue => "UpdateValue",
            ConsensusBehaviour::TinyBlock => "TinyBlock",
            ConsensusBehaviour::NextRound => "NextRound",
            ConsensusBehaviour::NextTerm => "NextTerm",
        };
        f.write_str(name)
    }
}

/// Errors encoding or decoding a [`ConsensusHint`].
#[derive(Debug, thiserror::Error)]
pub enum HintError {
    /// Encoding failed.
    #[error("failed to encode consensus hint: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Decoding failed.
    #[error("failed to decode consensus hint: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Extra information attached to a command, echoed back by the host when it
/// asks for the block's consensus data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusHint {
    /// Behaviour the command was produced for.
    pub behaviour: ConsensusBehaviour,

    /// Id of the round the command was computed against.
    pub round_id: u64,

    /// Id of the round before it (0 if none).
    pub previous_round_id: u64,
}

impl ConsensusHint {
    /// Encode with bincode's standard configuration.
    pub fn encode(&self) -> Result<Vec<u8>, HintError> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    /// Decode a hint produced by [`ConsensusHint::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, HintError> {
        let (hint, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(hint)
    }
}
