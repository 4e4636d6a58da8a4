//! Error types for the consensus core.

use dpos_core::HintError;
use dpos_types::{EncryptionError, PublicKey, SharingError};
use thiserror::Error;

/// Hard failures that abort the enclosing state transition.
///
/// Every variant indicates corrupted state or a bad proposal. Soft conditions
/// are logged and handled with a fallback instead of surfacing here.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// No round has been persisted yet.
    #[error("Chain not initialized")]
    ChainNotInitialized,

    /// The acting miner is not scheduled in the round.
    #[error("Miner {pubkey} is not in round {round_number}")]
    MinerNotInRound {
        /// Miner public key.
        pubkey: PublicKey,
        /// Round that was searched.
        round_number: u64,
    },

    /// A round reference does not match the locally computed round.
    #[error("Round id mismatch: expected {expected}, got {actual}")]
    RoundIdMismatch {
        /// Id of the local round.
        expected: u64,
        /// Id carried by the reference.
        actual: u64,
    },

    /// A historical round that must exist is missing.
    #[error("Round {0} not found")]
    MissingRound(u64),

    /// The current term number is unavailable.
    #[error("Current term number not available")]
    MissingTermNumber,

    /// The genesis timestamp is unavailable.
    #[error("Blockchain start timestamp not available")]
    MissingBlockchainStartTimestamp,

    /// A round or update violates a structural invariant.
    #[error("Invalid round: {0}")]
    InvalidRound(String),

    /// Threshold sharing failed.
    #[error("Secret sharing failed: {0}")]
    Sharing(#[from] SharingError),

    /// Share encryption failed.
    #[error("Share encryption failed: {0}")]
    Encryption(#[from] EncryptionError),

    /// Hint encoding failed.
    #[error(transparent)]
    Hint(#[from] HintError),
}

impl ConsensusError {
    pub(crate) fn not_in_round(pubkey: &PublicKey, round_number: u64) -> Self {
        ConsensusError::MinerNotInRound {
            pubkey: *pubkey,
            round_number,
        }
    }
}
